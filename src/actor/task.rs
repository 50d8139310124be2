//! Task kinds and task descriptions handed over by the graph compiler.
//!
//! One actor is instantiated per `TaskProto`. The `TaskType` selects the
//! actor variant through the factory map in `factory.rs`.

use crate::actor::id::{ActorId, RegstDescId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kinds of graph tasks that can be instantiated as actors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskType {
    /// Data loader producing one register per piece.
    Source,
    /// Forward computation of a layer.
    NormalForward,
    /// Loss computation. Runs the same actor as `NormalForward`.
    Loss,
    /// Parameter update, producer of model versions.
    ModelUpdate,
    /// Terminal consumer (printing, saving, metrics).
    Sink,
}

impl TaskType {
    /// Get the display name for this task type.
    pub fn display_name(&self) -> &'static str {
        match self {
            TaskType::Source => "Source",
            TaskType::NormalForward => "Normal Forward",
            TaskType::Loss => "Loss",
            TaskType::ModelUpdate => "Model Update",
            TaskType::Sink => "Sink",
        }
    }

    /// Get all task types.
    pub fn all() -> &'static [TaskType] {
        &[
            TaskType::Source,
            TaskType::NormalForward,
            TaskType::Loss,
            TaskType::ModelUpdate,
            TaskType::Sink,
        ]
    }

    /// Whether actors of this kind run the forward-compute state machine.
    pub fn is_forward(&self) -> bool {
        matches!(self, TaskType::NormalForward | TaskType::Loss)
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Description of one graph task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProto {
    pub actor_id: ActorId,
    pub task_type: TaskType,
    /// Human-readable name used in logs.
    #[serde(default)]
    pub name: String,
    /// Kernel name resolved through the kernel registry.
    #[serde(default = "default_kernel")]
    pub kernel: String,
    /// Seed for one-time parameter initialization. `None` disables it.
    #[serde(default)]
    pub random_seed: Option<u64>,
    /// Consumed descriptors keyed by role name.
    #[serde(default)]
    pub consumed: BTreeMap<String, RegstDescId>,
    /// Produced descriptors keyed by role name.
    #[serde(default)]
    pub produced: BTreeMap<String, RegstDescId>,
}

fn default_kernel() -> String {
    "noop".to_string()
}

impl TaskProto {
    pub fn new(actor_id: ActorId, task_type: TaskType) -> Self {
        Self {
            actor_id,
            task_type,
            name: format!("{}#{}", task_type.display_name(), actor_id.0),
            kernel: default_kernel(),
            random_seed: None,
            consumed: BTreeMap::new(),
            produced: BTreeMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_kernel(mut self, kernel: impl Into<String>) -> Self {
        self.kernel = kernel.into();
        self
    }

    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }

    pub fn consume(mut self, role: impl Into<String>, desc_id: RegstDescId) -> Self {
        self.consumed.insert(role.into(), desc_id);
        self
    }

    pub fn produce(mut self, role: impl Into<String>, desc_id: RegstDescId) -> Self {
        self.produced.insert(role.into(), desc_id);
        self
    }

    /// Consumed descriptor for `role`, or `RegstDescId::NONE`.
    pub fn consumed_desc(&self, role: &str) -> RegstDescId {
        self.consumed.get(role).copied().unwrap_or(RegstDescId::NONE)
    }

    /// Produced descriptor for `role`, or `RegstDescId::NONE`.
    pub fn produced_desc(&self, role: &str) -> RegstDescId {
        self.produced.get(role).copied().unwrap_or(RegstDescId::NONE)
    }
}
