//! Graph instantiation and schedulers.
//!
//! - [`GraphPlan`] / [`PlanBuilder`] - the compiled graph and its validation
//! - [`ActorGraph`] - one actor per task, built through the kernel registry
//!   and the actor factory
//! - [`LocalScheduler`] - deterministic single-threaded delivery, used by
//!   tests and for replaying interleavings
//! - [`ActorRuntime`] - one thread per actor connected by a [`MessageBus`]
//!
//! Every actor's first outbox (e.g. the initial model version) is collected
//! at instantiation and delivered before anything else.

pub mod bus;
pub mod graph;
pub mod local;
pub mod threaded;

pub use bus::MessageBus;
pub use graph::{demo_training_plan, GraphPlan, PlanBuilder, PlanStats};
pub use local::LocalScheduler;
pub use threaded::{ActorRuntime, ActorSummary, RunReport};

use crate::actor::{
    ActorEnv, ActorError, ActorEvent, ActorFactory, ActorId, ActorMsg, ActorResult, AnyActor,
    RegstRegistry, SnapshotReader, TaskType,
};
use crate::config::JobConfig;
use crate::kernels::KernelRegistry;
use crossbeam_channel::Sender;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Everything needed to turn a plan into actors, besides the plan itself.
pub struct GraphOptions {
    pub job: Arc<JobConfig>,
    pub kernels: KernelRegistry,
    pub factory: ActorFactory,
    pub checkpoint: Option<Arc<dyn SnapshotReader>>,
}

impl GraphOptions {
    pub fn new(job: JobConfig) -> Self {
        Self {
            job: Arc::new(job),
            kernels: KernelRegistry::default(),
            factory: ActorFactory::default(),
            checkpoint: None,
        }
    }

    pub fn with_kernels(mut self, kernels: KernelRegistry) -> Self {
        self.kernels = kernels;
        self
    }

    pub fn with_factory(mut self, factory: ActorFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_checkpoint(mut self, checkpoint: Arc<dyn SnapshotReader>) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }
}

/// Instantiated actors plus the messages they emitted while constructing.
pub struct ActorGraph {
    pub actors: Vec<AnyActor>,
    pub pending: Vec<ActorMsg>,
    pub registry: Arc<RegstRegistry>,
    pub job: Arc<JobConfig>,
}

impl ActorGraph {
    pub fn instantiate(
        plan: &GraphPlan,
        options: &GraphOptions,
        events: Option<Sender<ActorEvent>>,
    ) -> ActorResult<Self> {
        // Batch arithmetic divides by the cadence values.
        options
            .job
            .validate()
            .map_err(|e| ActorError::InvalidJob(e.to_string()))?;
        let stats = plan.validate()?;
        let registry = Arc::new(RegstRegistry::new(plan.regst_descs.iter().cloned())?);

        let mut env = ActorEnv::new(options.job.clone(), registry.clone());
        if let Some(checkpoint) = &options.checkpoint {
            env = env.with_checkpoint(checkpoint.clone());
        }
        if let Some(events) = events {
            env = env.with_events(events);
        }

        let mut actors = Vec::with_capacity(plan.tasks.len());
        let mut pending = Vec::new();
        for task in &plan.tasks {
            let kernel = options.kernels.create(&task.kernel)?;
            let mut actor = options.factory.create(task, &env, kernel)?;
            pending.extend(actor.drain_outbox());
            tracing::debug!(
                actor = %task.actor_id,
                name = %task.name,
                kernel = %task.kernel,
                "actor created"
            );
            actors.push(actor);
        }

        tracing::info!(
            "Graph instantiated: {} actors, {} descriptors, {} slots",
            stats.tasks,
            stats.regst_descs,
            stats.total_slots
        );

        Ok(Self {
            actors,
            pending,
            registry,
            job: options.job.clone(),
        })
    }
}

/// Tracks when a finite run has finished: every data sink has consumed the
/// final piece.
///
/// Sinks consuming a `forward_model` register only see snapshots and are not
/// waited on.
#[derive(Debug, Clone)]
pub struct CompletionTracker {
    remaining: BTreeSet<ActorId>,
    last_piece: Option<u64>,
}

impl CompletionTracker {
    pub fn new(plan: &GraphPlan, job: &JobConfig) -> Self {
        let last_piece = job.total_pieces().checked_sub(1);
        let remaining = match last_piece {
            Some(_) => plan
                .tasks
                .iter()
                .filter(|t| {
                    t.task_type == TaskType::Sink && !t.consumed.contains_key("forward_model")
                })
                .map(|t| t.actor_id)
                .collect(),
            None => BTreeSet::new(),
        };
        Self {
            remaining,
            last_piece,
        }
    }

    /// Feed one event. Returns whether the run is now complete.
    pub fn observe(&mut self, event: &ActorEvent) -> bool {
        if let ActorEvent::Acted { actor, piece_id, .. } = event {
            if Some(*piece_id) == self.last_piece {
                self.remaining.remove(actor);
            }
        }
        self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.remaining.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instantiate_collects_initial_messages() {
        let plan = demo_training_plan(2).unwrap();
        let options = GraphOptions::new(JobConfig::train(2, 2));
        let graph = ActorGraph::instantiate(&plan, &options, None).unwrap();
        assert_eq!(graph.actors.len(), 5);
        // The model updater publishes version 0 to the forward actor.
        assert_eq!(graph.pending.len(), 1);
        assert_eq!(graph.pending[0].dst(), ActorId(1));
        assert_eq!(graph.pending[0].model_version_id(), Some(0));
    }

    #[test]
    fn test_instantiate_unknown_kernel() {
        let mut plan = demo_training_plan(2).unwrap();
        plan.tasks[2].kernel = "softmax".into();
        let options = GraphOptions::new(JobConfig::default());
        assert!(ActorGraph::instantiate(&plan, &options, None).is_err());
    }

    #[test]
    fn test_instantiate_rejects_zero_cadence() {
        let plan = demo_training_plan(2).unwrap();
        for job in [
            JobConfig::train(2, 2).with_batches_per_snapshot(0),
            JobConfig::train(0, 2),
        ] {
            let result = ActorGraph::instantiate(&plan, &GraphOptions::new(job), None);
            assert!(matches!(result, Err(ActorError::InvalidJob(_))));
        }
    }

    #[test]
    fn test_completion_waits_for_data_sinks_only() {
        let plan = demo_training_plan(2).unwrap();
        let job = JobConfig::train(2, 2);
        let mut tracker = CompletionTracker::new(&plan, &job);
        assert!(!tracker.observe(&ActorEvent::Acted {
            actor: ActorId(4),
            piece_id: 3,
            model_version_id: None,
        }));
        assert!(!tracker.observe(&ActorEvent::Acted {
            actor: ActorId(2),
            piece_id: 2,
            model_version_id: None,
        }));
        assert!(tracker.observe(&ActorEvent::Acted {
            actor: ActorId(2),
            piece_id: 3,
            model_version_id: None,
        }));
    }
}
