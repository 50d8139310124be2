//! SourceActor: produces one data register per piece.
//!
//! The source has no inputs. It acts as long as pieces remain and every
//! produced descriptor has a free slot, so downstream backpressure throttles
//! it through the register pool.

use crate::actor::context::{ActorContext, ActorEnv, ActorEvent, ActorStats};
use crate::actor::error::{ActorError, ActorResult};
use crate::actor::id::ActorId;
use crate::actor::kernel::{with_blob_accessor, Kernel, KernelCtx};
use crate::actor::message::ActorMsg;
use crate::actor::task::TaskProto;

pub struct SourceActor {
    ctx: ActorContext,
    kernel: Box<dyn Kernel>,
    next_piece: u64,
    total_pieces: u64,
}

impl SourceActor {
    pub fn new(task: &TaskProto, env: &ActorEnv, kernel: Box<dyn Kernel>) -> ActorResult<Self> {
        let ctx = ActorContext::new(task, env)?;
        Ok(Self {
            ctx,
            kernel,
            next_piece: 0,
            total_pieces: env.job.total_pieces(),
        })
    }

    pub fn name(&self) -> &str {
        self.ctx.name()
    }

    pub fn actor_id(&self) -> ActorId {
        self.ctx.actor_id()
    }

    /// Pieces produced so far.
    pub fn produced(&self) -> u64 {
        self.next_piece
    }

    pub fn is_exhausted(&self) -> bool {
        self.next_piece >= self.total_pieces
    }

    pub fn stats(&self) -> ActorStats {
        self.ctx.stats()
    }

    pub fn drain_outbox(&mut self) -> Vec<ActorMsg> {
        self.ctx.drain_outbox()
    }

    /// Only returned registers are expected.
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
        !self.is_exhausted()
    }

    pub fn is_write_ready(&self) -> bool {
        self.ctx.produced_desc_ids().next().is_some() && self.ctx.is_write_ready()
    }

    pub fn act(&mut self) -> ActorResult<()> {
        let piece_id = self.next_piece;
        let bindings = self.ctx.output_bindings(|_| true);
        let kernel_ctx = KernelCtx {
            piece_id,
            model_version_id: None,
        };
        let kernel = &mut self.kernel;
        with_blob_accessor(&bindings, |blobs| kernel.forward(&kernel_ctx, blobs))?;

        self.ctx.send_regst_to_consumers(
            |_| true,
            |regst| {
                regst.set_piece_id(piece_id);
                regst.set_model_version_id(None);
            },
        )?;
        self.next_piece += 1;
        self.ctx.note_act();
        self.ctx.emit(ActorEvent::Acted {
            actor: self.ctx.actor_id(),
            piece_id,
            model_version_id: None,
        });

        if self.is_exhausted() {
            tracing::info!(
                actor = %self.ctx.actor_id(),
                pieces = self.next_piece,
                "source exhausted"
            );
            self.ctx.emit(ActorEvent::SourceExhausted {
                actor: self.ctx.actor_id(),
                pieces: self.next_piece,
            });
        }
        Ok(())
    }
}
