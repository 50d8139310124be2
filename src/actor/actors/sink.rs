//! SinkActor: terminal consumer.
//!
//! Runs its kernel once per set of queued inputs and hands every register
//! straight back. Also serves as the save actor for forward-model snapshots.

use crate::actor::context::{ActorContext, ActorEnv, ActorEvent, ActorStats};
use crate::actor::error::{ActorError, ActorResult};
use crate::actor::id::ActorId;
use crate::actor::kernel::{with_blob_accessor, Kernel, KernelCtx};
use crate::actor::message::ActorMsg;
use crate::actor::task::TaskProto;

pub struct SinkActor {
    ctx: ActorContext,
    kernel: Box<dyn Kernel>,
    last_piece: Option<u64>,
    last_model_version: Option<u64>,
}

impl SinkActor {
    pub fn new(task: &TaskProto, env: &ActorEnv, kernel: Box<dyn Kernel>) -> ActorResult<Self> {
        Ok(Self {
            ctx: ActorContext::new(task, env)?,
            kernel,
            last_piece: None,
            last_model_version: None,
        })
    }

    pub fn name(&self) -> &str {
        self.ctx.name()
    }

    pub fn actor_id(&self) -> ActorId {
        self.ctx.actor_id()
    }

    pub fn last_piece(&self) -> Option<u64> {
        self.last_piece
    }

    pub fn last_model_version(&self) -> Option<u64> {
        self.last_model_version
    }

    pub fn stats(&self) -> ActorStats {
        self.ctx.stats()
    }

    pub fn drain_outbox(&mut self) -> Vec<ActorMsg> {
        self.ctx.drain_outbox()
    }

    pub fn on_message(&mut self, msg: &ActorMsg) -> ActorResult<()> {
        match self.ctx.handle_generic(msg)? {
            None => Ok(()),
            Some(_) => Err(ActorError::UnknownRegst {
                actor: self.ctx.actor_id(),
                desc_id: msg.regst_desc_id(),
            }),
        }
    }

    pub fn is_read_ready(&self) -> bool {
        self.ctx.has_naive_consumed() && self.ctx.is_naive_read_ready()
    }

    pub fn is_write_ready(&self) -> bool {
        self.ctx.is_write_ready()
    }

    pub fn act(&mut self) -> ActorResult<()> {
        let actor = self.ctx.actor_id();
        let front = *self
            .ctx
            .naive_first_readable()
            .ok_or(ActorError::MissingInput { actor })?;

        let mut bindings = self.ctx.naive_input_bindings()?;
        bindings.extend(self.ctx.output_bindings(|_| true));
        let kernel_ctx = KernelCtx {
            piece_id: front.piece_id,
            model_version_id: front.model_version_id,
        };
        let kernel = &mut self.kernel;
        with_blob_accessor(&bindings, |blobs| kernel.forward(&kernel_ctx, blobs))?;

        self.ctx.send_regst_to_consumers(
            |_| true,
            |regst| {
                regst.set_piece_id(front.piece_id);
                regst.set_model_version_id(front.model_version_id);
            },
        )?;
        self.ctx.return_naive_readables();

        self.last_piece = Some(front.piece_id);
        self.last_model_version = front.model_version_id;
        self.ctx.note_act();
        self.ctx.emit(ActorEvent::Acted {
            actor,
            piece_id: front.piece_id,
            model_version_id: front.model_version_id,
        });
        tracing::debug!(actor = %actor, piece_id = front.piece_id, "sink consumed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::id::RegstDescId;
    use crate::actor::kernel::NoopKernel;
    use crate::actor::pool::RegstPool;
    use crate::actor::registry::RegstRegistry;
    use crate::actor::regst::RegstDesc;
    use crate::actor::task::TaskType;
    use crate::config::JobConfig;
    use std::sync::Arc;

    const IN: RegstDescId = RegstDescId(1);

    #[test]
    fn test_sink_records_and_returns() {
        let registry = Arc::new(
            RegstRegistry::new([RegstDesc::new(IN, "in", ActorId(0))
                .with_consumers(&[ActorId(1)])
                .with_register_num(2)
                .with_blob("data", &[1])])
            .unwrap(),
        );
        let env = ActorEnv::new(Arc::new(JobConfig::default()), registry.clone());
        let task = TaskProto::new(ActorId(1), TaskType::Sink).consume("in", IN);
        let mut sink = SinkActor::new(&task, &env, Box::new(NoopKernel)).unwrap();
        let mut upstream = RegstPool::new(ActorId(0), registry.store(IN).unwrap().clone()).unwrap();

        assert!(!sink.is_read_ready());
        let handle = upstream.publish().unwrap();
        sink.on_message(&ActorMsg::regst_ready(ActorId(0), ActorId(1), handle, 5, Some(2)))
            .unwrap();
        assert!(sink.is_read_ready());
        sink.act().unwrap();

        assert_eq!(sink.last_piece(), Some(5));
        assert_eq!(sink.last_model_version(), Some(2));
        let out = sink.drain_outbox();
        assert_eq!(out.len(), 1);
        assert!(out[0].is_return());
        assert!(upstream.release(out[0].handle()).unwrap());
    }
}
