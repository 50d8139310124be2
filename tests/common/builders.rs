//! Test graph builders

use actorflow::actor::{ActorId, Kernel, TaskType};
use actorflow::kernels::{CollectKernel, Collected, KernelRegistry};
use actorflow::runtime::{GraphPlan, PlanBuilder};
use parking_lot::Mutex;
use std::sync::Arc;

pub const LOADER: ActorId = ActorId(0);
pub const FORWARD: ActorId = ActorId(1);
pub const PRINTER: ActorId = ActorId(2);
pub const UPDATER: ActorId = ActorId(3);
pub const SAVER: ActorId = ActorId(4);

/// Builder for the single-layer training graph used across tests:
///
/// loader -> forward -> printer, forward -> updater (model_diff),
/// updater -> forward (model), forward -> saver (forward_model).
pub struct TrainingGraphBuilder {
    features: usize,
    data_slots: usize,
    model_slots: usize,
    seed: Option<u64>,
}

impl TrainingGraphBuilder {
    pub fn new() -> Self {
        Self {
            features: 2,
            data_slots: 2,
            model_slots: 2,
            seed: Some(7),
        }
    }

    pub fn features(mut self, features: usize) -> Self {
        self.features = features;
        self
    }

    pub fn data_slots(mut self, slots: usize) -> Self {
        self.data_slots = slots;
        self
    }

    /// Staleness bound is `slots - 1`.
    pub fn model_slots(mut self, slots: usize) -> Self {
        self.model_slots = slots;
        self
    }

    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn build(self) -> GraphPlan {
        let shape: &[usize] = &[self.features];
        let mut b = PlanBuilder::new();
        let loader = b.task(TaskType::Source, "loader", "fill_piece");
        let forward = b.task(TaskType::NormalForward, "forward", "affine");
        let printer = b.task(TaskType::Sink, "printer", "collect");
        let updater = b.task(TaskType::ModelUpdate, "updater", "sgd_update");
        let saver = b.task(TaskType::Sink, "saver", "saved");
        if let Some(seed) = self.seed {
            b.seed(forward, seed);
        }

        b.connect((loader, "out"), &[(forward, "in")], self.data_slots, &[("data", shape)]);
        b.connect(
            (forward, "out"),
            &[(printer, "in"), (updater, "model_diff")],
            self.data_slots,
            &[("data", shape)],
        );
        b.connect(
            (forward, "forward_model"),
            &[(saver, "forward_model")],
            1,
            &[("weight", shape), ("bias", shape)],
        );
        b.connect(
            (updater, "model"),
            &[(forward, "model")],
            self.model_slots,
            &[("weight", shape), ("bias", shape)],
        );
        b.build().expect("test graph is valid")
    }
}

/// Built-in kernels plus a `saved` kernel recording what the saver sees.
pub fn kernels_with_saver() -> (KernelRegistry, Arc<Mutex<Vec<Collected>>>) {
    let saved = Arc::new(Mutex::new(Vec::new()));
    let mut kernels = KernelRegistry::default();
    let shared = saved.clone();
    kernels.register(
        "saved",
        Box::new(move || -> Box<dyn Kernel> {
            Box::new(CollectKernel::shared(shared.clone()))
        }),
    );
    (kernels, saved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_training_graph_builder() {
        let plan = TrainingGraphBuilder::new().model_slots(1).build();
        let stats = plan.validate().unwrap();
        assert_eq!(stats.tasks, 5);
        assert_eq!(plan.task(FORWARD).unwrap().random_seed, Some(7));
    }
}
