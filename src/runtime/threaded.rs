//! Threaded runtime: one OS thread per actor.
//!
//! Each actor thread loops on its inbox:
//! 1. Receive a message (or time out and re-check the running flag).
//! 2. Run the actor's handler.
//! 3. Act while read-ready and write-ready.
//! 4. Push the outbox onto the bus.
//!
//! The first actor error stops every thread. Held registers are handed back
//! on the way out, best effort.

use crate::actor::{ActorEvent, ActorId, ActorMsg, ActorStats, AnyActor};
use crate::config::RuntimeSettings;
use crate::error::{ActorFlowError, Result, ResultExt};
use crate::runtime::{ActorGraph, CompletionTracker, GraphOptions, GraphPlan, MessageBus};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Final counters of one actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorSummary {
    pub actor_id: ActorId,
    pub name: String,
    pub stats: ActorStats,
}

/// Outcome of a finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub actors: Vec<ActorSummary>,
    pub events: Vec<ActorEvent>,
    /// Whether every data sink saw the final piece.
    pub completed: bool,
}

impl RunReport {
    pub fn total_acts(&self) -> u64 {
        self.actors.iter().map(|a| a.stats.acts).sum()
    }

    pub fn actor(&self, actor_id: ActorId) -> Option<&ActorSummary> {
        self.actors.iter().find(|a| a.actor_id == actor_id)
    }
}

struct Failure {
    actor: String,
    error: ActorFlowError,
}

type SharedFailure = Arc<Mutex<Option<Failure>>>;

pub struct ActorRuntime {
    running: Arc<AtomicBool>,
    threads: Vec<(ActorId, String, JoinHandle<ActorStats>)>,
    events: Receiver<ActorEvent>,
    observed: Vec<ActorEvent>,
    failure: SharedFailure,
    completion: CompletionTracker,
    poll: Duration,
}

impl ActorRuntime {
    /// Instantiate `plan` and start one thread per actor.
    pub fn start(
        plan: &GraphPlan,
        options: &GraphOptions,
        settings: &RuntimeSettings,
    ) -> Result<Self> {
        let (events_tx, events_rx) = unbounded();
        let graph = ActorGraph::instantiate(plan, options, Some(events_tx))
            .context("instantiating graph")?;
        let completion = CompletionTracker::new(plan, &graph.job);
        let (bus, inboxes) = MessageBus::new(graph.actors.len(), settings.inbox_capacity);
        let running = Arc::new(AtomicBool::new(true));
        let failure: SharedFailure = Arc::new(Mutex::new(None));
        let poll = Duration::from_millis(settings.idle_poll_ms.max(1));

        let mut runtime = Self {
            running: running.clone(),
            threads: Vec::with_capacity(inboxes.len()),
            events: events_rx,
            observed: Vec::new(),
            failure: failure.clone(),
            completion,
            poll,
        };

        for (actor, inbox) in graph.actors.into_iter().zip(inboxes) {
            let actor_id = actor.actor_id();
            let name = actor.name().to_string();
            let worker = ActorWorker {
                actor,
                inbox,
                bus: bus.clone(),
                running: running.clone(),
                failure: failure.clone(),
                poll,
            };
            let spawned = std::thread::Builder::new()
                .name(format!("actor-{}", actor_id.0))
                .spawn(move || worker.run());
            match spawned {
                Ok(handle) => runtime.threads.push((actor_id, name, handle)),
                Err(e) => {
                    runtime.shutdown();
                    return Err(ActorFlowError::Io(e).with_context(format!("spawning '{name}'")));
                }
            }
        }

        if let Err(e) = bus.dispatch(graph.pending) {
            runtime.shutdown();
            return Err(e);
        }
        tracing::info!("Runtime started with {} actor threads", runtime.threads.len());
        Ok(runtime)
    }

    /// Start, wait until every data sink has seen the final piece, stop.
    pub fn run_to_completion(
        plan: &GraphPlan,
        options: &GraphOptions,
        settings: &RuntimeSettings,
        timeout: Duration,
    ) -> Result<RunReport> {
        let mut runtime = Self::start(plan, options, settings)?;
        let waited = runtime.wait_until_complete(timeout);
        // An actor failure is reported by join with its original error.
        let report = runtime.join()?;
        waited?;
        Ok(report)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask every actor thread to stop. Does not wait.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Events observed so far through `wait_for`.
    pub fn events(&self) -> &[ActorEvent] {
        &self.observed
    }

    fn aborted(&self) -> Option<ActorFlowError> {
        self.failure
            .lock()
            .as_ref()
            .map(|f| ActorFlowError::Aborted(format!("actor '{}': {}", f.actor, f.error)))
    }

    /// Block until an event satisfies `pred`, an actor fails, or `timeout`
    /// elapses.
    pub fn wait_for(
        &mut self,
        mut pred: impl FnMut(&ActorEvent) -> bool,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(err) = self.aborted() {
                return Err(err);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ActorFlowError::Timeout(format!(
                    "no matching event within {:?}",
                    timeout
                )));
            }
            match self.events.recv_timeout(remaining.min(self.poll)) {
                Ok(event) => {
                    let hit = pred(&event);
                    self.observed.push(event);
                    if hit {
                        return Ok(());
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ActorFlowError::Channel("event channel closed".to_string()));
                }
            }
        }
    }

    /// Block until every data sink has consumed the final piece.
    pub fn wait_until_complete(&mut self, timeout: Duration) -> Result<()> {
        let mut completion = self.completion.clone();
        for event in &self.observed {
            completion.observe(event);
        }
        if completion.is_complete() {
            self.completion = completion;
            return Ok(());
        }
        let waited = self.wait_for(|e| completion.observe(e), timeout);
        self.completion = completion;
        waited
    }

    /// Stop every thread and collect the results. The first actor failure,
    /// if any, is returned as the error.
    pub fn join(mut self) -> Result<RunReport> {
        self.shutdown();
        let mut actors = Vec::with_capacity(self.threads.len());
        let mut panicked = None;
        for (actor_id, name, handle) in self.threads.drain(..) {
            match handle.join() {
                Ok(stats) => actors.push(ActorSummary {
                    actor_id,
                    name,
                    stats,
                }),
                Err(_) => {
                    tracing::error!(actor = %actor_id, "actor thread '{}' panicked", name);
                    panicked.get_or_insert(name);
                }
            }
        }

        if let Some(failure) = self.failure.lock().take() {
            return Err(failure
                .error
                .with_context(format!("actor '{}'", failure.actor)));
        }
        if let Some(name) = panicked {
            return Err(ActorFlowError::ThreadPanic(name));
        }

        let late: Vec<ActorEvent> = self.events.try_iter().collect();
        self.observed.extend(late);
        let mut completion = self.completion.clone();
        for event in &self.observed {
            completion.observe(event);
        }
        tracing::info!("Runtime stopped, {} actors joined", actors.len());
        Ok(RunReport {
            actors,
            events: std::mem::take(&mut self.observed),
            completed: completion.is_complete(),
        })
    }
}

impl Drop for ActorRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// State moved into one actor thread.
struct ActorWorker {
    actor: AnyActor,
    inbox: Receiver<ActorMsg>,
    bus: MessageBus,
    running: Arc<AtomicBool>,
    failure: SharedFailure,
    poll: Duration,
}

impl ActorWorker {
    fn run(mut self) -> ActorStats {
        let actor_id = self.actor.actor_id();
        tracing::debug!(actor = %actor_id, name = self.actor.name(), "actor thread started");

        if let Err(error) = self.serve() {
            tracing::error!(actor = %actor_id, name = self.actor.name(), "actor failed: {}", error);
            let mut failure = self.failure.lock();
            if failure.is_none() {
                *failure = Some(Failure {
                    actor: self.actor.name().to_string(),
                    error,
                });
            }
            self.running.store(false, Ordering::SeqCst);
        }

        if let Err(e) = self.actor.teardown() {
            tracing::warn!(actor = %actor_id, "teardown failed: {}", e);
        }
        // Peers may already be gone; returns are best effort here.
        for msg in self.actor.drain_outbox() {
            self.bus.try_send(msg);
        }

        tracing::debug!(actor = %actor_id, "actor thread exiting");
        self.actor.stats()
    }

    fn serve(&mut self) -> Result<()> {
        self.act_and_flush()?;
        while self.running.load(Ordering::SeqCst) {
            match self.inbox.recv_timeout(self.poll) {
                Ok(msg) => {
                    self.actor.on_message(&msg)?;
                    self.act_and_flush()?;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        Ok(())
    }

    fn act_and_flush(&mut self) -> Result<()> {
        self.actor.act_until_blocked()?;
        let outbox = self.actor.drain_outbox();
        match self.bus.dispatch(outbox) {
            Err(_) if !self.running.load(Ordering::SeqCst) => Ok(()),
            other => other,
        }
    }
}
