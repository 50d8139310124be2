//! actorflow - command line entry point
//!
//! Usage:
//!
//! ```text
//! actorflow                      run the built-in training demo
//! actorflow PLAN.toml|PLAN.json  run a plan file
//! actorflow --write-demo PATH    write the demo as a plan file and exit
//! ```

use actorflow::{
    actor::ActorEvent,
    config::{JobConfig, PlanFile, RuntimeConfig, DEFAULT_LOG_FILTER},
    runtime::{demo_training_plan, ActorRuntime, GraphOptions},
};
use anyhow::{bail, Context};
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEMO_FEATURES: usize = 4;
const RUN_TIMEOUT: Duration = Duration::from_secs(300);

fn demo_plan_file() -> anyhow::Result<PlanFile> {
    let plan = demo_training_plan(DEMO_FEATURES).context("Failed to build demo plan")?;
    Ok(PlanFile::new(RuntimeConfig::new(JobConfig::default()), plan))
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let plan_file = match args.as_slice() {
        [] => demo_plan_file()?,
        [flag, path] if flag == "--write-demo" => {
            demo_plan_file()?
                .save(path)
                .with_context(|| format!("Failed to write demo plan to {path}"))?;
            println!("Demo plan written to {path}");
            return Ok(());
        }
        [path] => PlanFile::load(path).with_context(|| format!("Failed to load plan {path}"))?,
        _ => bail!("usage: actorflow [PLAN_FILE | --write-demo PATH]"),
    };

    // Initialize logging
    let default_filter = if plan_file.config.runtime.log_filter.is_empty() {
        DEFAULT_LOG_FILTER.to_string()
    } else {
        plan_file.config.runtime.log_filter.clone()
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let job = plan_file.config.job.clone();
    tracing::info!(
        "Starting run: {} batches x {} pieces ({})",
        job.total_batch_num,
        job.pieces_per_batch,
        if job.is_train { "training" } else { "inference" }
    );

    let started = Instant::now();
    let options = GraphOptions::new(job);
    let report = ActorRuntime::run_to_completion(
        &plan_file.plan,
        &options,
        &plan_file.config.runtime,
        RUN_TIMEOUT,
    )
    .context("Run failed")?;

    let snapshots = report
        .events
        .iter()
        .filter(|e| matches!(e, ActorEvent::SnapshotPublished { .. }))
        .count();
    let versions = report
        .events
        .iter()
        .filter(|e| matches!(e, ActorEvent::ModelPublished { .. }))
        .count();

    println!(
        "Run {} in {:.2?}: {} acts, {} model publications, {} snapshots",
        if report.completed { "completed" } else { "stopped" },
        started.elapsed(),
        report.total_acts(),
        versions,
        snapshots
    );
    for actor in &report.actors {
        println!(
            "  {:>4} {:<16} acts={:<6} in={:<6} out={}",
            actor.actor_id.0,
            actor.name,
            actor.stats.acts,
            actor.stats.messages_in,
            actor.stats.messages_out
        );
    }
    Ok(())
}
