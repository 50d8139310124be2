//! Factory map from task kinds to actor constructors.
//!
//! The built-in variants are registered by default; `register` replaces or
//! adds a constructor, which is how plugin actors enter a graph.

use crate::actor::actors::{ModelUpdateActor, NormalForwardActor, SinkActor, SourceActor};
use crate::actor::context::ActorEnv;
use crate::actor::error::{ActorError, ActorResult};
use crate::actor::kernel::Kernel;
use crate::actor::node::{AnyActor, BuiltinActor};
use crate::actor::task::{TaskProto, TaskType};
use std::collections::HashMap;

/// Builds one actor from its task, the shared environment and its kernel.
pub type ActorCtor =
    Box<dyn Fn(&TaskProto, &ActorEnv, Box<dyn Kernel>) -> ActorResult<AnyActor> + Send + Sync>;

type BuiltinCtor = fn(&TaskProto, &ActorEnv, Box<dyn Kernel>) -> ActorResult<BuiltinActor>;

fn builtin(ctor: BuiltinCtor) -> ActorCtor {
    Box::new(
        move |task: &TaskProto, env: &ActorEnv, kernel: Box<dyn Kernel>| -> ActorResult<AnyActor> {
            Ok(AnyActor::Builtin(ctor(task, env, kernel)?))
        },
    )
}

fn forward(task: &TaskProto, env: &ActorEnv, kernel: Box<dyn Kernel>) -> ActorResult<BuiltinActor> {
    Ok(BuiltinActor::NormalForward(NormalForwardActor::new(
        task, env, kernel,
    )?))
}

pub struct ActorFactory {
    ctors: HashMap<TaskType, ActorCtor>,
}

impl Default for ActorFactory {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ActorFactory {
    /// Factory with no constructors at all.
    pub fn empty() -> Self {
        Self {
            ctors: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut factory = Self::empty();
        factory.register(TaskType::NormalForward, builtin(forward));
        factory.register(TaskType::Loss, builtin(forward));
        factory.register(
            TaskType::Source,
            builtin(|task, env, kernel| {
                Ok(BuiltinActor::Source(SourceActor::new(task, env, kernel)?))
            }),
        );
        factory.register(
            TaskType::Sink,
            builtin(|task, env, kernel| Ok(BuiltinActor::Sink(SinkActor::new(task, env, kernel)?))),
        );
        factory.register(
            TaskType::ModelUpdate,
            builtin(|task, env, kernel| {
                Ok(BuiltinActor::ModelUpdate(ModelUpdateActor::new(
                    task, env, kernel,
                )?))
            }),
        );
        factory
    }

    /// Register `ctor` for `task_type`, returning the one it replaces.
    pub fn register(&mut self, task_type: TaskType, ctor: ActorCtor) -> Option<ActorCtor> {
        self.ctors.insert(task_type, ctor)
    }

    pub fn supports(&self, task_type: TaskType) -> bool {
        self.ctors.contains_key(&task_type)
    }

    pub fn create(
        &self,
        task: &TaskProto,
        env: &ActorEnv,
        kernel: Box<dyn Kernel>,
    ) -> ActorResult<AnyActor> {
        let ctor = self
            .ctors
            .get(&task.task_type)
            .ok_or_else(|| ActorError::UnknownTaskType(task.task_type.to_string()))?;
        ctor(task, env, kernel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::context::ActorStats;
    use crate::actor::id::{ActorId, RegstDescId};
    use crate::actor::kernel::NoopKernel;
    use crate::actor::message::ActorMsg;
    use crate::actor::node::ActorPlugin;
    use crate::actor::registry::RegstRegistry;
    use crate::actor::regst::RegstDesc;
    use crate::config::JobConfig;
    use std::sync::Arc;

    fn env() -> ActorEnv {
        let registry = RegstRegistry::new([RegstDesc::new(RegstDescId(1), "out", ActorId(0))
            .with_consumers(&[ActorId(1)])
            .with_blob("data", &[1])])
        .unwrap();
        ActorEnv::new(Arc::new(JobConfig::default()), Arc::new(registry))
    }

    struct Idle(ActorId);

    impl ActorPlugin for Idle {
        fn name(&self) -> &str {
            "idle"
        }
        fn actor_id(&self) -> ActorId {
            self.0
        }
        fn on_message(&mut self, _msg: &ActorMsg) -> ActorResult<()> {
            Ok(())
        }
        fn is_read_ready(&self) -> bool {
            false
        }
        fn is_write_ready(&self) -> bool {
            true
        }
        fn act(&mut self) -> ActorResult<()> {
            Ok(())
        }
        fn drain_outbox(&mut self) -> Vec<ActorMsg> {
            Vec::new()
        }
        fn stats(&self) -> ActorStats {
            ActorStats::default()
        }
    }

    #[test]
    fn test_loss_runs_forward_actor() {
        let factory = ActorFactory::default();
        let task = TaskProto::new(ActorId(1), TaskType::Loss).consume("in", RegstDescId(1));
        let actor = factory.create(&task, &env(), Box::new(NoopKernel)).unwrap();
        assert!(actor.as_forward().is_some());
    }

    #[test]
    fn test_unknown_task_type() {
        let factory = ActorFactory::empty();
        let task = TaskProto::new(ActorId(0), TaskType::Source);
        assert!(matches!(
            factory.create(&task, &env(), Box::new(NoopKernel)),
            Err(ActorError::UnknownTaskType(_))
        ));
    }

    #[test]
    fn test_plugin_replaces_builtin() {
        let mut factory = ActorFactory::default();
        let previous = factory.register(
            TaskType::Sink,
            Box::new(
                |task: &TaskProto,
                 _env: &ActorEnv,
                 _kernel: Box<dyn Kernel>|
                 -> ActorResult<AnyActor> {
                    Ok(AnyActor::Plugin(Box::new(Idle(task.actor_id))))
                },
            ),
        );
        assert!(previous.is_some());
        let task = TaskProto::new(ActorId(4), TaskType::Sink);
        let mut actor = factory.create(&task, &env(), Box::new(NoopKernel)).unwrap();
        assert_eq!(actor.name(), "idle");
        assert_eq!(actor.actor_id(), ActorId(4));
        assert_eq!(actor.act_until_blocked().unwrap(), 0);
    }
}
