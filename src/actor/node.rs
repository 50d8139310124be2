//! Actor abstraction.
//!
//! Two-layer design:
//! - **`ActorPlugin` trait**: for user-defined actor variants.
//! - **`BuiltinActor` enum**: for all built-in actors. Match arms dispatch
//!   statically on the hot path.
//!
//! `AnyActor` wraps either variant so schedulers handle both uniformly.

use crate::actor::actors::{ModelUpdateActor, NormalForwardActor, SinkActor, SourceActor};
use crate::actor::context::ActorStats;
use crate::actor::error::ActorResult;
use crate::actor::id::ActorId;
use crate::actor::message::ActorMsg;

/// Trait for pluggable/user-defined actors.
pub trait ActorPlugin: Send {
    fn name(&self) -> &str;

    fn actor_id(&self) -> ActorId;

    /// Handle one incoming message. Errors are fatal for the whole graph.
    fn on_message(&mut self, msg: &ActorMsg) -> ActorResult<()>;

    fn is_read_ready(&self) -> bool;

    fn is_write_ready(&self) -> bool;

    /// One unit of work. Only called when read-ready and write-ready.
    fn act(&mut self) -> ActorResult<()>;

    /// Messages produced since the last call.
    fn drain_outbox(&mut self) -> Vec<ActorMsg>;

    /// Called once when the graph stops.
    fn teardown(&mut self) -> ActorResult<()> {
        Ok(())
    }

    fn stats(&self) -> ActorStats;
}

/// Enum dispatch for built-in actors.
pub enum BuiltinActor {
    NormalForward(NormalForwardActor),
    Source(SourceActor),
    Sink(SinkActor),
    ModelUpdate(ModelUpdateActor),
}

impl BuiltinActor {
    pub fn name(&self) -> &str {
        match self {
            BuiltinActor::NormalForward(a) => a.name(),
            BuiltinActor::Source(a) => a.name(),
            BuiltinActor::Sink(a) => a.name(),
            BuiltinActor::ModelUpdate(a) => a.name(),
        }
    }

    pub fn actor_id(&self) -> ActorId {
        match self {
            BuiltinActor::NormalForward(a) => a.actor_id(),
            BuiltinActor::Source(a) => a.actor_id(),
            BuiltinActor::Sink(a) => a.actor_id(),
            BuiltinActor::ModelUpdate(a) => a.actor_id(),
        }
    }

    pub fn on_message(&mut self, msg: &ActorMsg) -> ActorResult<()> {
        match self {
            BuiltinActor::NormalForward(a) => a.on_message(msg),
            BuiltinActor::Source(a) => a.on_message(msg),
            BuiltinActor::Sink(a) => a.on_message(msg),
            BuiltinActor::ModelUpdate(a) => a.on_message(msg),
        }
    }

    pub fn is_read_ready(&self) -> bool {
        match self {
            BuiltinActor::NormalForward(a) => a.is_read_ready(),
            BuiltinActor::Source(a) => a.is_read_ready(),
            BuiltinActor::Sink(a) => a.is_read_ready(),
            BuiltinActor::ModelUpdate(a) => a.is_read_ready(),
        }
    }

    pub fn is_write_ready(&self) -> bool {
        match self {
            BuiltinActor::NormalForward(a) => a.is_write_ready(),
            BuiltinActor::Source(a) => a.is_write_ready(),
            BuiltinActor::Sink(a) => a.is_write_ready(),
            BuiltinActor::ModelUpdate(a) => a.is_write_ready(),
        }
    }

    pub fn act(&mut self) -> ActorResult<()> {
        match self {
            BuiltinActor::NormalForward(a) => a.act(),
            BuiltinActor::Source(a) => a.act(),
            BuiltinActor::Sink(a) => a.act(),
            BuiltinActor::ModelUpdate(a) => a.act(),
        }
    }

    pub fn drain_outbox(&mut self) -> Vec<ActorMsg> {
        match self {
            BuiltinActor::NormalForward(a) => a.drain_outbox(),
            BuiltinActor::Source(a) => a.drain_outbox(),
            BuiltinActor::Sink(a) => a.drain_outbox(),
            BuiltinActor::ModelUpdate(a) => a.drain_outbox(),
        }
    }

    pub fn teardown(&mut self) -> ActorResult<()> {
        match self {
            BuiltinActor::NormalForward(a) => a.teardown(),
            BuiltinActor::Source(_) | BuiltinActor::Sink(_) | BuiltinActor::ModelUpdate(_) => {
                Ok(())
            }
        }
    }

    pub fn stats(&self) -> ActorStats {
        match self {
            BuiltinActor::NormalForward(a) => a.stats(),
            BuiltinActor::Source(a) => a.stats(),
            BuiltinActor::Sink(a) => a.stats(),
            BuiltinActor::ModelUpdate(a) => a.stats(),
        }
    }
}

/// Wrapper that holds either a built-in actor (enum dispatch) or a plugin
/// (trait object).
pub enum AnyActor {
    Builtin(BuiltinActor),
    Plugin(Box<dyn ActorPlugin>),
}

impl AnyActor {
    pub fn name(&self) -> &str {
        match self {
            AnyActor::Builtin(a) => a.name(),
            AnyActor::Plugin(a) => a.name(),
        }
    }

    pub fn actor_id(&self) -> ActorId {
        match self {
            AnyActor::Builtin(a) => a.actor_id(),
            AnyActor::Plugin(a) => a.actor_id(),
        }
    }

    pub fn on_message(&mut self, msg: &ActorMsg) -> ActorResult<()> {
        match self {
            AnyActor::Builtin(a) => a.on_message(msg),
            AnyActor::Plugin(a) => a.on_message(msg),
        }
    }

    pub fn is_read_ready(&self) -> bool {
        match self {
            AnyActor::Builtin(a) => a.is_read_ready(),
            AnyActor::Plugin(a) => a.is_read_ready(),
        }
    }

    pub fn is_write_ready(&self) -> bool {
        match self {
            AnyActor::Builtin(a) => a.is_write_ready(),
            AnyActor::Plugin(a) => a.is_write_ready(),
        }
    }

    pub fn act(&mut self) -> ActorResult<()> {
        match self {
            AnyActor::Builtin(a) => a.act(),
            AnyActor::Plugin(a) => a.act(),
        }
    }

    pub fn drain_outbox(&mut self) -> Vec<ActorMsg> {
        match self {
            AnyActor::Builtin(a) => a.drain_outbox(),
            AnyActor::Plugin(a) => a.drain_outbox(),
        }
    }

    pub fn teardown(&mut self) -> ActorResult<()> {
        match self {
            AnyActor::Builtin(a) => a.teardown(),
            AnyActor::Plugin(a) => a.teardown(),
        }
    }

    pub fn stats(&self) -> ActorStats {
        match self {
            AnyActor::Builtin(a) => a.stats(),
            AnyActor::Plugin(a) => a.stats(),
        }
    }

    /// The forward actor inside, if this is one.
    pub fn as_forward(&self) -> Option<&NormalForwardActor> {
        match self {
            AnyActor::Builtin(BuiltinActor::NormalForward(a)) => Some(a),
            _ => None,
        }
    }

    /// Act while both readiness predicates hold. Returns the number of acts.
    pub fn act_until_blocked(&mut self) -> ActorResult<usize> {
        let mut acts = 0;
        while self.is_read_ready() && self.is_write_ready() {
            self.act()?;
            acts += 1;
        }
        Ok(acts)
    }
}

impl std::fmt::Debug for AnyActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnyActor")
            .field("actor_id", &self.actor_id())
            .field("name", &self.name())
            .finish()
    }
}
