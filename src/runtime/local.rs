//! Deterministic single-threaded scheduler.
//!
//! Messages are queued per (sender, receiver) pair. Delivering one message
//! runs the receiver's handler, lets it act until blocked, and queues its
//! outbox. Which pair is served next is up to the caller, which makes every
//! interleaving that respects per-pair FIFO order reproducible.

use crate::actor::{ActorError, ActorEvent, ActorId, ActorMsg, ActorResult, AnyActor};
use crate::runtime::{ActorGraph, GraphOptions, GraphPlan};
use crossbeam_channel::{unbounded, Receiver};
use std::collections::{BTreeMap, VecDeque};

pub struct LocalScheduler {
    actors: Vec<AnyActor>,
    queues: BTreeMap<(ActorId, ActorId), VecDeque<ActorMsg>>,
    events: Receiver<ActorEvent>,
    delivered: u64,
}

impl LocalScheduler {
    /// Instantiate `plan` and run every actor that can act right away.
    pub fn from_plan(plan: &GraphPlan, options: &GraphOptions) -> ActorResult<Self> {
        let (tx, rx) = unbounded();
        let graph = ActorGraph::instantiate(plan, options, Some(tx))?;
        Self::new(graph, rx)
    }

    pub fn new(graph: ActorGraph, events: Receiver<ActorEvent>) -> ActorResult<Self> {
        let mut scheduler = Self {
            actors: graph.actors,
            queues: BTreeMap::new(),
            events,
            delivered: 0,
        };
        scheduler.enqueue(graph.pending);
        for index in 0..scheduler.actors.len() {
            scheduler.run_actor(index)?;
        }
        Ok(scheduler)
    }

    fn enqueue(&mut self, msgs: Vec<ActorMsg>) {
        for msg in msgs {
            self.queues
                .entry((msg.src(), msg.dst()))
                .or_default()
                .push_back(msg);
        }
    }

    fn run_actor(&mut self, index: usize) -> ActorResult<usize> {
        let actor = &mut self.actors[index];
        let acts = actor.act_until_blocked()?;
        let outbox = actor.drain_outbox();
        self.enqueue(outbox);
        Ok(acts)
    }

    /// Messages waiting in any queue.
    pub fn pending(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    /// Pairs with at least one queued message, in (src, dst) order.
    pub fn ready_pairs(&self) -> Vec<(ActorId, ActorId)> {
        self.queues
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(pair, _)| *pair)
            .collect()
    }

    /// Deliver the oldest message from `src` to `dst`. Returns `false` when
    /// that pair has nothing queued.
    pub fn deliver_from(&mut self, src: ActorId, dst: ActorId) -> ActorResult<bool> {
        let Some(msg) = self.queues.get_mut(&(src, dst)).and_then(VecDeque::pop_front) else {
            return Ok(false);
        };
        let index = dst.index();
        let actor = self
            .actors
            .get_mut(index)
            .ok_or_else(|| ActorError::InvalidPlan(format!("message for unknown actor {dst}")))?;
        actor.on_message(&msg)?;
        self.delivered += 1;
        self.run_actor(index)?;
        Ok(true)
    }

    /// Deliver from the first non-empty pair. Returns `false` when idle.
    pub fn step(&mut self) -> ActorResult<bool> {
        match self.ready_pairs().first() {
            Some(&(src, dst)) => self.deliver_from(src, dst),
            None => Ok(false),
        }
    }

    /// Step until no message is queued or `max_steps` deliveries happened.
    /// Returns the number of deliveries.
    pub fn run_until_idle(&mut self, max_steps: usize) -> ActorResult<usize> {
        let mut steps = 0;
        while steps < max_steps && self.step()? {
            steps += 1;
        }
        Ok(steps)
    }

    /// Tear every actor down and queue what they hand back.
    pub fn teardown(&mut self) -> ActorResult<()> {
        for index in 0..self.actors.len() {
            let actor = &mut self.actors[index];
            actor.teardown()?;
            let outbox = actor.drain_outbox();
            self.enqueue(outbox);
        }
        Ok(())
    }

    pub fn actors(&self) -> &[AnyActor] {
        &self.actors
    }

    pub fn actor(&self, id: ActorId) -> Option<&AnyActor> {
        self.actors.get(id.index())
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Events emitted since the last call.
    pub fn drain_events(&self) -> Vec<ActorEvent> {
        self.events.try_iter().collect()
    }
}

impl std::fmt::Debug for LocalScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalScheduler")
            .field("actors", &self.actors)
            .field("pending", &self.pending())
            .field("delivered", &self.delivered)
            .finish()
    }
}
