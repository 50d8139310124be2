//! Compiled graph plans.
//!
//! A `GraphPlan` is what the graph compiler hands over: the register
//! descriptors and one task per actor. `validate` checks the wiring before
//! anything is instantiated, so a bad plan fails as a whole instead of
//! stalling at run time.

use crate::actor::{ActorError, ActorId, ActorResult, RegstDesc, RegstDescId, TaskProto, TaskType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Register descriptors plus tasks, listed in actor id order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphPlan {
    #[serde(default)]
    pub regst_descs: Vec<RegstDesc>,
    #[serde(default)]
    pub tasks: Vec<TaskProto>,
}

/// Summary of a validated plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanStats {
    pub tasks: usize,
    pub regst_descs: usize,
    /// Physical slots across every descriptor.
    pub total_slots: usize,
    pub sources: usize,
    pub sinks: usize,
    pub forward_tasks: usize,
}

impl GraphPlan {
    pub fn new(regst_descs: Vec<RegstDesc>, tasks: Vec<TaskProto>) -> Self {
        Self { regst_descs, tasks }
    }

    pub fn task(&self, actor_id: ActorId) -> Option<&TaskProto> {
        self.tasks.get(actor_id.index())
    }

    /// Check that descriptors and tasks agree on every producer/consumer
    /// edge.
    pub fn validate(&self) -> ActorResult<PlanStats> {
        let invalid = |msg: String| Err(ActorError::InvalidPlan(msg));

        for (index, task) in self.tasks.iter().enumerate() {
            if task.actor_id.index() != index {
                return invalid(format!(
                    "task '{}' has id {} but is listed at position {}",
                    task.name, task.actor_id, index
                ));
            }
        }

        let mut descs: BTreeMap<RegstDescId, &RegstDesc> = BTreeMap::new();
        for desc in &self.regst_descs {
            if desc.id.is_none() {
                return invalid(format!("descriptor '{}' has no id", desc.name));
            }
            if desc.register_num == 0 {
                return invalid(format!("descriptor {} has register_num 0", desc.id));
            }
            if descs.insert(desc.id, desc).is_some() {
                return invalid(format!("descriptor {} declared twice", desc.id));
            }
        }

        // Edges as declared by the tasks.
        let mut producers: BTreeMap<RegstDescId, ActorId> = BTreeMap::new();
        let mut consumers: BTreeMap<RegstDescId, BTreeSet<ActorId>> = BTreeMap::new();
        for task in &self.tasks {
            for (role, &desc_id) in &task.produced {
                let Some(desc) = descs.get(&desc_id) else {
                    return invalid(format!(
                        "task '{}' produces undeclared descriptor {} as '{}'",
                        task.name, desc_id, role
                    ));
                };
                if desc.producer != task.actor_id {
                    return invalid(format!(
                        "descriptor {} names producer {}, but task '{}' produces it",
                        desc_id, desc.producer, task.name
                    ));
                }
                if producers.insert(desc_id, task.actor_id).is_some() {
                    return invalid(format!("descriptor {} produced under two roles", desc_id));
                }
            }
            for (role, &desc_id) in &task.consumed {
                if !descs.contains_key(&desc_id) {
                    return invalid(format!(
                        "task '{}' consumes undeclared descriptor {} as '{}'",
                        task.name, desc_id, role
                    ));
                }
                if !consumers.entry(desc_id).or_default().insert(task.actor_id) {
                    return invalid(format!(
                        "task '{}' consumes descriptor {} twice",
                        task.name, desc_id
                    ));
                }
            }
        }

        for desc in descs.values() {
            if !producers.contains_key(&desc.id) {
                return invalid(format!(
                    "descriptor {} ('{}') has no producing task",
                    desc.id, desc.name
                ));
            }
            let declared: BTreeSet<ActorId> = desc.consumers.iter().copied().collect();
            let actual = consumers.remove(&desc.id).unwrap_or_default();
            if declared != actual || declared.len() != desc.consumers.len() {
                return invalid(format!(
                    "descriptor {} lists consumers {:?} but {:?} consume it",
                    desc.id, desc.consumers, actual
                ));
            }
        }

        let count = |t: TaskType| self.tasks.iter().filter(|task| task.task_type == t).count();
        Ok(PlanStats {
            tasks: self.tasks.len(),
            regst_descs: descs.len(),
            total_slots: descs.values().map(|d| d.register_num).sum(),
            sources: count(TaskType::Source),
            sinks: count(TaskType::Sink),
            forward_tasks: self.tasks.iter().filter(|t| t.task_type.is_forward()).count(),
        })
    }
}

/// Builds plans edge by edge, keeping descriptors and tasks consistent.
#[derive(Debug, Default)]
pub struct PlanBuilder {
    plan: GraphPlan,
    next_desc: u32,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task running `kernel`. Returns its actor id.
    pub fn task(&mut self, task_type: TaskType, name: &str, kernel: &str) -> ActorId {
        let actor_id = ActorId(self.plan.tasks.len() as u32);
        self.plan.tasks.push(
            TaskProto::new(actor_id, task_type)
                .with_name(name)
                .with_kernel(kernel),
        );
        actor_id
    }

    pub fn seed(&mut self, actor_id: ActorId, seed: u64) -> &mut Self {
        if let Some(task) = self.plan.tasks.get_mut(actor_id.index()) {
            task.random_seed = Some(seed);
        }
        self
    }

    /// Declare a register flow from `producer` (under `role`) to each
    /// `(consumer, role)` pair.
    pub fn connect(
        &mut self,
        producer: (ActorId, &str),
        consumers: &[(ActorId, &str)],
        register_num: usize,
        blobs: &[(&str, &[usize])],
    ) -> RegstDescId {
        let desc_id = RegstDescId(self.next_desc);
        self.next_desc += 1;

        let (producer_id, produce_role) = producer;
        let mut desc = RegstDesc::new(desc_id, produce_role, producer_id)
            .with_register_num(register_num)
            .with_consumers(&consumers.iter().map(|(id, _)| *id).collect::<Vec<_>>());
        for (name, shape) in blobs {
            desc = desc.with_blob(*name, shape);
        }
        self.plan.regst_descs.push(desc);

        if let Some(task) = self.plan.tasks.get_mut(producer_id.index()) {
            task.produced.insert(produce_role.to_string(), desc_id);
        }
        for (consumer, role) in consumers {
            if let Some(task) = self.plan.tasks.get_mut(consumer.index()) {
                task.consumed.insert(role.to_string(), desc_id);
            }
        }
        desc_id
    }

    /// Validate and return the plan.
    pub fn build(self) -> ActorResult<GraphPlan> {
        self.plan.validate()?;
        Ok(self.plan)
    }
}

/// Single-layer training graph:
///
/// ```text
/// loader ──data──► affine ──data──► printer
///                   ▲  │  └──forward_model──► saver
///              model│  │model_diff
///                   │  ▼
///                   sgd
/// ```
pub fn demo_training_plan(features: usize) -> ActorResult<GraphPlan> {
    let shape: &[usize] = &[features];
    let mut b = PlanBuilder::new();
    let loader = b.task(TaskType::Source, "loader", "fill_piece");
    let affine = b.task(TaskType::NormalForward, "affine", "affine");
    let printer = b.task(TaskType::Sink, "printer", "collect");
    let sgd = b.task(TaskType::ModelUpdate, "sgd", "sgd_update");
    let saver = b.task(TaskType::Sink, "saver", "collect");
    b.seed(affine, 42);

    b.connect((loader, "out"), &[(affine, "in")], 2, &[("data", shape)]);
    b.connect(
        (affine, "out"),
        &[(printer, "in"), (sgd, "model_diff")],
        2,
        &[("data", shape)],
    );
    b.connect(
        (affine, "forward_model"),
        &[(saver, "forward_model")],
        1,
        &[("weight", shape), ("bias", shape)],
    );
    b.connect(
        (sgd, "model"),
        &[(affine, "model")],
        2,
        &[("weight", shape), ("bias", shape)],
    );
    b.build()
}
