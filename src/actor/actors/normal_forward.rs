//! NormalForwardActor: the forward-compute state machine.
//!
//! Consumed roles `model` and `const_model` are held by the actor itself;
//! every other consumed descriptor is a plain data input. Produced roles
//! `const_buf` and `forward_model` get special treatment: the constant buffer
//! is published once at initialization, and the forward-model snapshot only
//! leaves the actor at initialization and at batch boundaries.
//!
//! ```text
//!   ┌──────────────┐ model / const_model arrived ┌────────┐
//!   │ Initializing │ ──────────────────────────► │ Steady │
//!   └──────────────┘   init, return, notify      └────────┘
//! ```
//!
//! The actor starts directly in `Steady` when it has no random seed or
//! consumes neither model role.

use crate::actor::context::{ActorContext, ActorEnv, ActorEvent, ActorStats, ReadableRegst};
use crate::actor::error::{ActorError, ActorResult};
use crate::actor::id::{ActorId, RegstDescId};
use crate::actor::kernel::{with_blob_accessor, BlobBinding, Kernel, KernelCtx, RegstRole};
use crate::actor::message::ActorMsg;
use crate::actor::staleness::StalenessPolicy;
use crate::actor::task::TaskProto;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Seed used when initialization runs without a configured seed.
const DEFAULT_INIT_SEED: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardState {
    /// Waiting for the model registers needed by one-time initialization.
    Initializing,
    Steady,
}

pub struct NormalForwardActor {
    ctx: ActorContext,
    kernel: Box<dyn Kernel>,
    state: ForwardState,
    model_desc: RegstDescId,
    const_model_desc: RegstDescId,
    const_buf_desc: RegstDescId,
    forward_model_desc: RegstDescId,
    random_seed: Option<u64>,
    model: Option<ReadableRegst>,
    /// Last piece computed with the held model.
    model_last_piece: Option<u64>,
    const_model: Option<ReadableRegst>,
    policy: StalenessPolicy,
}

impl NormalForwardActor {
    pub fn new(task: &TaskProto, env: &ActorEnv, kernel: Box<dyn Kernel>) -> ActorResult<Self> {
        let mut ctx = ActorContext::new(task, env)?;
        let model_desc = task.consumed_desc("model");
        let const_model_desc = task.consumed_desc("const_model");
        ctx.set_customized(model_desc);
        ctx.set_customized(const_model_desc);

        let mut actor = Self {
            ctx,
            kernel,
            state: ForwardState::Initializing,
            model_desc,
            const_model_desc,
            const_buf_desc: task.produced_desc("const_buf"),
            forward_model_desc: task.produced_desc("forward_model"),
            random_seed: task.random_seed,
            model: None,
            model_last_piece: None,
            const_model: None,
            policy: StalenessPolicy::new(env.job.clone()),
        };

        let awaits_models =
            actor.random_seed.is_some() && (model_desc.is_some() || const_model_desc.is_some());
        if !awaits_models {
            if actor.forward_model_desc.is_some() || actor.const_buf_desc.is_some() {
                actor.init_model_and_const_buf()?;
            }
            actor.finish_init()?;
        }

        let const_buf_has_consumers = actor
            .ctx
            .pool(actor.const_buf_desc)
            .is_some_and(|p| !p.consumers().is_empty());
        if const_buf_has_consumers {
            actor.ctx.retire_writable(actor.const_buf_desc);
        }

        tracing::debug!(
            actor = %actor.ctx.actor_id(),
            name = actor.ctx.name(),
            state = ?actor.state,
            kernel = actor.kernel.name(),
            "forward actor created"
        );
        Ok(actor)
    }

    pub fn name(&self) -> &str {
        self.ctx.name()
    }

    pub fn actor_id(&self) -> ActorId {
        self.ctx.actor_id()
    }

    pub fn state(&self) -> ForwardState {
        self.state
    }

    pub fn held_model(&self) -> Option<&ReadableRegst> {
        self.model.as_ref()
    }

    pub fn held_const_model(&self) -> Option<&ReadableRegst> {
        self.const_model.as_ref()
    }

    pub fn staleness(&self) -> Option<u64> {
        self.policy.staleness()
    }

    pub fn policy(&self) -> &StalenessPolicy {
        &self.policy
    }

    pub fn context(&self) -> &ActorContext {
        &self.ctx
    }

    pub fn stats(&self) -> ActorStats {
        self.ctx.stats()
    }

    pub fn drain_outbox(&mut self) -> Vec<ActorMsg> {
        self.ctx.drain_outbox()
    }

    // ── Message handling ──

    pub fn on_message(&mut self, msg: &ActorMsg) -> ActorResult<()> {
        match self.state {
            ForwardState::Initializing => self.handle_init_message(msg),
            ForwardState::Steady => self.handle_normal_message(msg),
        }
    }

    fn handle_init_message(&mut self, msg: &ActorMsg) -> ActorResult<()> {
        if self.ctx.handle_generic(msg)?.is_none() {
            return Ok(());
        }
        let regst = ReadableRegst::from_msg(msg);
        let desc_id = msg.regst_desc_id();
        if desc_id == self.model_desc {
            if self.model.is_some() {
                return Err(ActorError::DuplicateModelDuringInit {
                    actor: self.ctx.actor_id(),
                });
            }
            self.fix_staleness()?;
            self.model = Some(regst);
        } else if desc_id == self.const_model_desc {
            if self.const_model.is_some() {
                return Err(ActorError::DuplicateConstModel {
                    actor: self.ctx.actor_id(),
                });
            }
            self.const_model = Some(regst);
        } else {
            return Err(self.unknown(desc_id));
        }

        if self.model_desc.is_some() && self.model.is_none() {
            return Ok(());
        }
        if self.const_model_desc.is_some() && self.const_model.is_none() {
            return Ok(());
        }

        self.init_model_and_const_buf()?;
        // The model contents were only needed to seed initialization.
        if let Some(model) = self.model.take() {
            self.ctx.send_regst_to_producer(&model);
        }
        if let Some(const_model) = self.const_model.take() {
            self.ctx.send_regst_to_producer(&const_model);
        }
        self.finish_init()
    }

    fn handle_normal_message(&mut self, msg: &ActorMsg) -> ActorResult<()> {
        if self.ctx.handle_generic(msg)?.is_none() {
            return Ok(());
        }
        let regst = ReadableRegst::from_msg(msg);
        let desc_id = msg.regst_desc_id();
        if desc_id == self.model_desc {
            self.fix_staleness()?;
            self.release_model();
            tracing::trace!(
                actor = %self.ctx.actor_id(),
                version = ?regst.model_version_id,
                "new model version"
            );
            self.model = Some(regst);
        } else if desc_id == self.const_model_desc {
            if self.const_model.is_some() {
                return Err(ActorError::DuplicateConstModel {
                    actor: self.ctx.actor_id(),
                });
            }
            self.const_model = Some(regst);
        } else {
            return Err(self.unknown(desc_id));
        }
        Ok(())
    }

    fn unknown(&self, desc_id: RegstDescId) -> ActorError {
        ActorError::UnknownRegst {
            actor: self.ctx.actor_id(),
            desc_id,
        }
    }

    fn fix_staleness(&mut self) -> ActorResult<()> {
        let register_num = self.ctx.store(self.model_desc)?.register_num();
        self.policy.fix_bound(register_num);
        Ok(())
    }

    // ── Initialization ──

    /// Run the kernel's one-time initializer. Blob names resolve against
    /// model, const_model, const_buf and forward_model, in that order.
    fn init_model_and_const_buf(&mut self) -> ActorResult<()> {
        let mut bindings = Vec::new();
        if let Some(model) = &self.model {
            bindings.push(BlobBinding::write(
                RegstRole::Model,
                self.ctx.store(model.handle.desc_id)?,
                model.handle,
            ));
        }
        if let Some(const_model) = &self.const_model {
            bindings.push(BlobBinding::write(
                RegstRole::ConstModel,
                self.ctx.store(const_model.handle.desc_id)?,
                const_model.handle,
            ));
        }
        if self.const_buf_desc.is_some() {
            let store = self.ctx.store(self.const_buf_desc)?;
            let handle = store.handle(0);
            bindings.push(BlobBinding::write(RegstRole::ConstBuf, store, handle));
        }
        if let Some(handle) = self.ctx.cur_writable(self.forward_model_desc) {
            bindings.push(BlobBinding::write(
                RegstRole::ForwardModel,
                self.ctx.store(self.forward_model_desc)?,
                handle,
            ));
        }

        let mut rng = StdRng::seed_from_u64(self.random_seed.unwrap_or(DEFAULT_INIT_SEED));
        let kernel_ctx = KernelCtx::default();
        let snapshot = self.ctx.checkpoint();
        let kernel = &mut self.kernel;
        with_blob_accessor(&bindings, |blobs| {
            kernel.init_model_and_const_buf(&kernel_ctx, &mut rng, snapshot, blobs)
        })
    }

    /// Emit the one-shot notifications and enter `Steady`.
    fn finish_init(&mut self) -> ActorResult<()> {
        if self.forward_model_desc.is_some() {
            self.publish_forward_model(0, None)?;
        }
        if self.const_buf_desc.is_some() {
            let const_buf = self.const_buf_desc;
            self.ctx.send_regst_to_consumers(|id| id == const_buf, |_| {})?;
        }
        self.state = ForwardState::Steady;
        tracing::info!(actor = %self.ctx.actor_id(), name = self.ctx.name(), "initialized");
        self.ctx.emit(ActorEvent::Initialized {
            actor: self.ctx.actor_id(),
        });
        Ok(())
    }

    // ── Readiness ──

    pub fn is_read_ready(&self) -> bool {
        if self.state != ForwardState::Steady {
            return false;
        }
        if self.model_desc.is_some() && self.model.is_none() {
            return false;
        }
        if self.const_model_desc.is_some() && self.const_model.is_none() {
            return false;
        }
        self.ctx.has_naive_consumed() && self.ctx.is_naive_read_ready()
    }

    pub fn is_write_ready(&self) -> bool {
        self.ctx.is_write_ready()
    }

    // ── Act ──

    pub fn act(&mut self) -> ActorResult<()> {
        let actor = self.ctx.actor_id();
        let model_version_id = self.model.as_ref().and_then(|m| m.model_version_id);
        let piece_id = self
            .ctx
            .naive_first_readable()
            .map(|r| r.piece_id)
            .ok_or(ActorError::MissingInput { actor })?;

        let bindings = self.act_bindings()?;
        let kernel_ctx = KernelCtx {
            piece_id,
            model_version_id,
        };
        let kernel = &mut self.kernel;
        with_blob_accessor(&bindings, |blobs| kernel.forward(&kernel_ctx, blobs))?;
        if self.model.is_some() {
            self.model_last_piece = Some(piece_id);
        }

        let const_buf = self.const_buf_desc;
        let forward_model = self.forward_model_desc;
        self.ctx.send_regst_to_consumers(
            |id| id != forward_model && id != const_buf,
            |regst| {
                regst.set_piece_id(piece_id);
                regst.set_model_version_id(model_version_id);
            },
        )?;
        self.ctx.return_naive_readables();

        let held_version = self
            .model
            .as_ref()
            .map(|m| m.model_version_id.unwrap_or(0));
        let outcome =
            self.policy
                .after_piece(actor, piece_id, held_version, forward_model.is_some())?;
        if outcome.release_model {
            self.release_model();
        }
        if let Some(batch_id) = outcome.snapshot_batch {
            self.publish_forward_model(batch_id, Some(piece_id))?;
        }

        self.ctx.note_act();
        self.ctx.emit(ActorEvent::Acted {
            actor,
            piece_id,
            model_version_id,
        });
        tracing::debug!(actor = %actor, piece_id, version = ?model_version_id, "act");
        Ok(())
    }

    fn act_bindings(&self) -> ActorResult<Vec<BlobBinding>> {
        let mut bindings = self.ctx.naive_input_bindings()?;
        if let Some(model) = &self.model {
            bindings.push(BlobBinding::read(
                RegstRole::Model,
                self.ctx.store(model.handle.desc_id)?,
                model.handle,
            ));
        }
        if let Some(const_model) = &self.const_model {
            bindings.push(BlobBinding::read(
                RegstRole::ConstModel,
                self.ctx.store(const_model.handle.desc_id)?,
                const_model.handle,
            ));
        }
        if self.const_buf_desc.is_some() {
            let store = self.ctx.store(self.const_buf_desc)?;
            let handle = store.handle(0);
            bindings.push(BlobBinding::read(RegstRole::ConstBuf, store, handle));
        }

        let const_buf = self.const_buf_desc;
        let forward_model = self.forward_model_desc;
        bindings.extend(
            self.ctx
                .output_bindings(|id| id != const_buf && id != forward_model),
        );
        // Last exported snapshot, readable and updatable by the kernel.
        if let Some(handle) = self.ctx.cur_writable(forward_model) {
            bindings.push(BlobBinding::write(
                RegstRole::ForwardModel,
                self.ctx.store(forward_model)?,
                handle,
            ));
        }
        Ok(bindings)
    }

    fn publish_forward_model(&mut self, batch_id: u64, piece_id: Option<u64>) -> ActorResult<()> {
        let forward_model = self.forward_model_desc;
        let sent = self.ctx.send_regst_to_consumers(
            |id| id == forward_model,
            |regst| {
                regst.set_model_version_id(Some(batch_id));
                if let Some(piece_id) = piece_id {
                    regst.set_piece_id(piece_id);
                }
            },
        )?;
        if sent == 0 {
            tracing::trace!(actor = %self.ctx.actor_id(), batch_id, "snapshot has no receiver");
            return Ok(());
        }
        tracing::debug!(actor = %self.ctx.actor_id(), batch_id, "forward model snapshot");
        self.ctx.emit(ActorEvent::SnapshotPublished {
            actor: self.ctx.actor_id(),
            batch_id,
        });
        Ok(())
    }

    fn release_model(&mut self) {
        if let Some(model) = self.model.take() {
            self.ctx.send_regst_to_producer(&model);
            self.ctx.emit(ActorEvent::ModelReleased {
                actor: self.ctx.actor_id(),
                model_version_id: model.model_version_id,
                piece_id: self.model_last_piece.take(),
            });
        }
    }

    // ── End of stream ──

    /// Return every held model register to its producer.
    pub fn teardown(&mut self) -> ActorResult<()> {
        self.release_model();
        if let Some(const_model) = self.const_model.take() {
            self.ctx.send_regst_to_producer(&const_model);
        }
        Ok(())
    }

    /// Visit the held registers of each declared customized role.
    pub fn for_each_customized_readable(&self, mut f: impl FnMut(&ReadableRegst)) {
        if self.model_desc.is_some() {
            if let Some(model) = &self.model {
                f(model);
            }
        }
        if self.const_model_desc.is_some() {
            if let Some(const_model) = &self.const_model {
                f(const_model);
            }
        }
    }
}

impl std::fmt::Debug for NormalForwardActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NormalForwardActor")
            .field("ctx", &self.ctx)
            .field("state", &self.state)
            .field("model", &self.model)
            .field("const_model", &self.const_model)
            .field("staleness", &self.policy.staleness())
            .finish()
    }
}
