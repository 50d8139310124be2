//! ModelUpdateActor: producer of model versions.
//!
//! Publishes version 0 when constructed, consumes one `model_diff` register
//! per piece, and in training mode publishes version `b + 1` at the end of
//! batch `b`. A version handed back before its consumers used it for its
//! whole window (the initialization round-trip, or any return in inference)
//! is published again.

use crate::actor::context::{ActorContext, ActorEnv, ActorEvent, ActorStats, MsgRoute};
use crate::actor::error::{ActorError, ActorResult};
use crate::actor::id::{ActorId, RegstDescId};
use crate::actor::kernel::{with_blob_accessor, BlobBinding, Kernel, KernelCtx, RegstRole};
use crate::actor::message::ActorMsg;
use crate::actor::task::TaskProto;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Slot and version of the newest published model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LatestModel {
    slot: usize,
    version: u64,
}

pub struct ModelUpdateActor {
    ctx: ActorContext,
    kernel: Box<dyn Kernel>,
    model_desc: RegstDescId,
    staleness: u64,
    latest: LatestModel,
    diffs_received: u64,
    pieces_consumed: u64,
}

impl ModelUpdateActor {
    pub fn new(task: &TaskProto, env: &ActorEnv, kernel: Box<dyn Kernel>) -> ActorResult<Self> {
        let ctx = ActorContext::new(task, env)?;
        let model_desc = task.produced_desc("model");
        let pool = ctx.pool(model_desc).ok_or_else(|| {
            ActorError::InvalidPlan(format!("{} produces no 'model' register", task.name))
        })?;
        let staleness = pool.store().register_num().saturating_sub(1) as u64;
        let first = pool
            .acquire_writable()
            .ok_or(ActorError::UnregisteredDesc(model_desc))?;

        let mut actor = Self {
            ctx,
            kernel,
            model_desc,
            staleness,
            latest: LatestModel {
                slot: first.slot_index(),
                version: 0,
            },
            diffs_received: 0,
            pieces_consumed: 0,
        };

        let store = actor.ctx.store(model_desc)?;
        let bindings = [BlobBinding::write(RegstRole::Model, store, first)];
        let mut rng = StdRng::seed_from_u64(task.random_seed.unwrap_or(0));
        let snapshot = actor.ctx.checkpoint();
        let kernel = &mut actor.kernel;
        with_blob_accessor(&bindings, |blobs| {
            kernel.init_model_and_const_buf(&KernelCtx::default(), &mut rng, snapshot, blobs)
        })?;

        actor.publish_model(first.slot_index(), 0, 0)?;
        Ok(actor)
    }

    pub fn name(&self) -> &str {
        self.ctx.name()
    }

    pub fn actor_id(&self) -> ActorId {
        self.ctx.actor_id()
    }

    pub fn latest_version(&self) -> u64 {
        self.latest.version
    }

    pub fn pieces_consumed(&self) -> u64 {
        self.pieces_consumed
    }

    pub fn stats(&self) -> ActorStats {
        self.ctx.stats()
    }

    pub fn drain_outbox(&mut self) -> Vec<ActorMsg> {
        self.ctx.drain_outbox()
    }

    pub fn on_message(&mut self, msg: &ActorMsg) -> ActorResult<()> {
        match self.ctx.route(msg)? {
            MsgRoute::Returned => {
                self.ctx.handle_returned(msg)?;
                if msg.regst_desc_id() == self.model_desc {
                    self.on_model_returned(msg)?;
                }
                Ok(())
            }
            MsgRoute::Naive => {
                self.ctx.push_naive_readable(msg)?;
                self.diffs_received += 1;
                Ok(())
            }
            MsgRoute::Customized => Err(ActorError::UnknownRegst {
                actor: self.ctx.actor_id(),
                desc_id: msg.regst_desc_id(),
            }),
        }
    }

    /// Republish the newest version when it came back unused.
    fn on_model_returned(&mut self, msg: &ActorMsg) -> ActorResult<()> {
        let latest = self.latest;
        if msg.model_version_id() != Some(latest.version) {
            return Ok(());
        }
        let job = self.ctx.job();
        let returned_early = !job.is_train
            || (self.diffs_received < job.total_pieces()
                && self.diffs_received
                    <= job.last_piece_id_for_model_version(self.staleness, latest.version));
        let writable = self
            .ctx
            .pool(self.model_desc)
            .is_some_and(|p| p.is_writable(latest.slot));
        if returned_early && writable {
            tracing::debug!(
                actor = %self.ctx.actor_id(),
                version = latest.version,
                "republishing returned model"
            );
            let piece_id = self.pieces_consumed;
            self.publish_model(latest.slot, latest.version, piece_id)?;
        }
        Ok(())
    }

    fn publish_model(&mut self, slot: usize, version: u64, piece_id: u64) -> ActorResult<()> {
        self.ctx.send_slot_to_consumers(self.model_desc, slot, |regst| {
            regst.set_model_version_id(Some(version));
            regst.set_piece_id(piece_id);
        })?;
        self.latest = LatestModel { slot, version };
        self.ctx.emit(ActorEvent::ModelPublished {
            actor: self.ctx.actor_id(),
            model_version_id: version,
        });
        Ok(())
    }

    /// Whether consuming `piece_id` closes a batch that gets a new version.
    fn publishes_after(&self, piece_id: u64) -> bool {
        let job = self.ctx.job();
        job.is_train
            && job.is_last_piece_in_batch(piece_id)
            && job.batch_id(piece_id) + 1 < job.total_batch_num
    }

    pub fn is_read_ready(&self) -> bool {
        self.ctx.has_naive_consumed() && self.ctx.is_naive_read_ready()
    }

    /// The model pool only gates the acts that publish a new version.
    pub fn is_write_ready(&self) -> bool {
        let model_desc = self.model_desc;
        if !self.ctx.is_write_ready_excluding(|id| id == model_desc) {
            return false;
        }
        match self.ctx.naive_first_readable() {
            Some(front) if self.publishes_after(front.piece_id) => {
                self.ctx.cur_writable(model_desc).is_some()
            }
            _ => true,
        }
    }

    pub fn act(&mut self) -> ActorResult<()> {
        let actor = self.ctx.actor_id();
        let piece_id = self
            .ctx
            .naive_first_readable()
            .map(|r| r.piece_id)
            .ok_or(ActorError::MissingInput { actor })?;

        let target = if self.publishes_after(piece_id) {
            Some(
                self.ctx
                    .cur_writable(self.model_desc)
                    .ok_or(ActorError::UnregisteredDesc(self.model_desc))?,
            )
        } else {
            None
        };

        let mut bindings = self.ctx.naive_input_bindings()?;
        let store = self.ctx.store(self.model_desc)?;
        if let Some(target) = target {
            if target.slot_index() != self.latest.slot {
                let latest = store.handle(self.latest.slot);
                bindings.push(BlobBinding::read(RegstRole::Model, store.clone(), latest));
            }
            bindings.push(BlobBinding::write(RegstRole::Model, store, target));
        }

        let kernel_ctx = KernelCtx {
            piece_id,
            model_version_id: Some(self.latest.version),
        };
        let kernel = &mut self.kernel;
        with_blob_accessor(&bindings, |blobs| kernel.forward(&kernel_ctx, blobs))?;

        let model_desc = self.model_desc;
        self.ctx.send_regst_to_consumers(
            |id| id != model_desc,
            |regst| regst.set_piece_id(piece_id),
        )?;
        self.ctx.return_naive_readables();
        self.pieces_consumed += 1;

        if let Some(target) = target {
            let version = self.ctx.job().batch_id(piece_id) + 1;
            self.publish_model(target.slot_index(), version, piece_id)?;
            tracing::info!(actor = %actor, version, "model version published");
        }

        self.ctx.note_act();
        self.ctx.emit(ActorEvent::Acted {
            actor,
            piece_id,
            model_version_id: Some(self.latest.version),
        });
        Ok(())
    }
}
