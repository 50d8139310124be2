//! End-to-end runs on the threaded runtime

mod common;

use actorflow::actor::{
    ActorCtor, ActorEnv, ActorError, ActorEvent, ActorFactory, ActorId, ActorMsg, ActorPlugin,
    ActorResult, ActorStats, AnyActor, BlobAccessor, Kernel, KernelCtx, SinkActor, TaskProto,
    TaskType,
};
use actorflow::config::{JobConfig, PlanFile, RuntimeConfig, RuntimeSettings};
use actorflow::kernels::KernelRegistry;
use actorflow::runtime::{ActorRuntime, GraphOptions};
use actorflow::ActorFlowError;
use common::builders::{kernels_with_saver, TrainingGraphBuilder, FORWARD, PRINTER, SAVER, UPDATER};
use common::{snapshots_of, test_timeout};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn test_training_run_end_to_end() {
    let plan = TrainingGraphBuilder::new().features(4).build();
    let (kernels, saved) = kernels_with_saver();
    let job = JobConfig::train(3, 4);
    let options = GraphOptions::new(job.clone()).with_kernels(kernels);

    let mut runtime = ActorRuntime::start(&plan, &options, &RuntimeSettings::default()).unwrap();
    runtime.wait_until_complete(test_timeout()).unwrap();

    // The updater trails the sinks; wait for its final piece as well.
    let last_piece = job.total_pieces() - 1;
    let updater_done = |e: &ActorEvent| {
        matches!(e, ActorEvent::Acted { actor, piece_id, .. }
            if *actor == UPDATER && *piece_id == last_piece)
    };
    if !runtime.events().iter().any(updater_done) {
        runtime.wait_for(updater_done, test_timeout()).unwrap();
    }
    let report = runtime.join().unwrap();

    assert!(report.completed);
    assert_eq!(report.actor(FORWARD).unwrap().stats.acts, job.total_pieces());
    assert_eq!(report.actor(PRINTER).unwrap().stats.acts, job.total_pieces());
    assert_eq!(report.actor(UPDATER).unwrap().stats.acts, job.total_pieces());

    // One version per batch boundary except the last, plus the initial
    // version published twice (construction and after initialization).
    let published = report
        .events
        .iter()
        .filter(|e| matches!(e, ActorEvent::ModelPublished { .. }))
        .count() as u64;
    assert_eq!(published, job.total_batch_num + 1);

    // Snapshots reach the saver asynchronously, so only count what was
    // published.
    assert_eq!(snapshots_of(&report.events, FORWARD), vec![0, 0, 1, 2, 3]);
    assert!(saved.lock().len() <= 5);
}

#[test]
fn test_inference_run_end_to_end() {
    let plan = TrainingGraphBuilder::new().build();
    let options = GraphOptions::new(JobConfig::inference(2, 3));
    let report = ActorRuntime::run_to_completion(
        &plan,
        &options,
        &RuntimeSettings::default(),
        test_timeout(),
    )
    .unwrap();

    assert!(report.completed);
    assert_eq!(report.actor(PRINTER).unwrap().stats.acts, 6);
    assert!(report.events.iter().all(|e| match e {
        ActorEvent::Acted {
            model_version_id: Some(v),
            ..
        } => *v == 0,
        ActorEvent::ModelPublished {
            model_version_id, ..
        } => *model_version_id == 0,
        _ => true,
    }));
}

#[test]
fn test_plan_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let plan = TrainingGraphBuilder::new().build();
    let config = RuntimeConfig::new(JobConfig::train(2, 2));
    let plan_file = PlanFile::new(config, plan.clone());

    for name in ["plan.toml", "plan.json"] {
        let path = dir.path().join(name);
        plan_file.save(&path).unwrap();
        let loaded = PlanFile::load(&path).unwrap();
        assert_eq!(loaded.plan, plan);
        assert_eq!(loaded.config, plan_file.config);

        let report = ActorRuntime::run_to_completion(
            &loaded.plan,
            &GraphOptions::new(loaded.config.job.clone()),
            &loaded.config.runtime,
            test_timeout(),
        )
        .unwrap();
        assert!(report.completed);
    }
}

#[test]
fn test_invalid_plan_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "plan = 3").unwrap();
    assert!(matches!(
        PlanFile::load(&path),
        Err(ActorFlowError::Config(_))
    ));
}

/// Fails on the given piece.
struct FailingKernel {
    fail_on: u64,
}

impl Kernel for FailingKernel {
    fn name(&self) -> &str {
        "failing"
    }

    fn forward(&mut self, ctx: &KernelCtx, _blobs: &mut BlobAccessor<'_>) -> ActorResult<()> {
        if ctx.piece_id == self.fail_on {
            return Err(ActorError::kernel("failing", "piece rejected"));
        }
        Ok(())
    }
}

#[test]
fn test_kernel_failure_aborts_the_run() {
    let mut plan = TrainingGraphBuilder::new().build();
    plan.tasks[PRINTER.index()].kernel = "failing".to_string();
    let mut kernels = KernelRegistry::default();
    kernels.register(
        "failing",
        Box::new(|| -> Box<dyn Kernel> { Box::new(FailingKernel { fail_on: 1 }) }),
    );
    let options = GraphOptions::new(JobConfig::train(2, 3)).with_kernels(kernels);

    let err = ActorRuntime::run_to_completion(
        &plan,
        &options,
        &RuntimeSettings::default(),
        test_timeout(),
    )
    .unwrap_err();
    let actor_error = err.actor_error().cloned().unwrap();
    assert!(matches!(actor_error, ActorError::Kernel { .. }));
    assert!(!actor_error.is_wiring_defect());
}

#[test]
fn test_unknown_kernel_fails_instantiation() {
    let mut plan = TrainingGraphBuilder::new().build();
    plan.tasks[SAVER.index()].kernel = "missing".to_string();
    let Err(err) = ActorRuntime::start(
        &plan,
        &GraphOptions::new(JobConfig::train(1, 1)),
        &RuntimeSettings::default(),
    ) else {
        panic!("instantiation should fail");
    };
    assert_eq!(
        err.actor_error(),
        Some(&ActorError::UnknownKernel("missing".to_string()))
    );
}

/// Sink wrapper counting the pieces it consumed.
struct CountingSink {
    inner: SinkActor,
    seen: Arc<AtomicU64>,
}

impl ActorPlugin for CountingSink {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn actor_id(&self) -> ActorId {
        self.inner.actor_id()
    }

    fn on_message(&mut self, msg: &ActorMsg) -> ActorResult<()> {
        self.inner.on_message(msg)
    }

    fn is_read_ready(&self) -> bool {
        self.inner.is_read_ready()
    }

    fn is_write_ready(&self) -> bool {
        self.inner.is_write_ready()
    }

    fn act(&mut self) -> ActorResult<()> {
        self.inner.act()?;
        self.seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn drain_outbox(&mut self) -> Vec<ActorMsg> {
        self.inner.drain_outbox()
    }

    fn stats(&self) -> ActorStats {
        self.inner.stats()
    }
}

#[test]
fn test_plugin_actor_joins_the_graph() {
    let seen = Arc::new(AtomicU64::new(0));
    let mut factory = ActorFactory::default();
    let counter = seen.clone();
    let ctor: ActorCtor = Box::new(
        move |task: &TaskProto, env: &ActorEnv, kernel: Box<dyn Kernel>| -> ActorResult<AnyActor> {
            Ok(AnyActor::Plugin(Box::new(CountingSink {
                inner: SinkActor::new(task, env, kernel)?,
                seen: counter.clone(),
            })))
        },
    );
    factory.register(TaskType::Sink, ctor);

    let plan = TrainingGraphBuilder::new().build();
    let job = JobConfig::train(2, 2);
    let options = GraphOptions::new(job.clone()).with_factory(factory);
    let report = ActorRuntime::run_to_completion(
        &plan,
        &options,
        &RuntimeSettings::default(),
        test_timeout(),
    )
    .unwrap();

    assert!(report.completed);
    // The printer saw every piece; the saver may still be catching up.
    assert!(seen.load(Ordering::SeqCst) >= job.total_pieces());
}
