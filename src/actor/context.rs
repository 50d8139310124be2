//! Generic actor machinery shared by every actor variant.
//!
//! `ActorContext` owns what the base of every actor needs:
//! - the producer-side pools of every produced descriptor,
//! - FIFO queues of readable registers for plain data inputs ("naive"
//!   consumed descriptors),
//! - the set of consumed descriptors the concrete actor handles itself
//!   ("customized", e.g. model registers),
//! - an outbox drained by the scheduler after every step.
//!
//! Actors never talk to the transport directly: everything they send lands in
//! the outbox, which keeps them testable without threads.

use crate::actor::error::{ActorError, ActorResult};
use crate::actor::id::{ActorId, RegstDescId, RegstHandle};
use crate::actor::kernel::{BlobBinding, RegstRole, SnapshotReader};
use crate::actor::message::ActorMsg;
use crate::actor::pool::{RegstPool, RegstStore};
use crate::actor::registry::RegstRegistry;
use crate::actor::regst::Regst;
use crate::actor::task::TaskProto;
use crate::config::JobConfig;
use crossbeam_channel::Sender;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

/// Process-wide, read-only state every actor is constructed with.
#[derive(Clone)]
pub struct ActorEnv {
    pub job: Arc<JobConfig>,
    pub registry: Arc<RegstRegistry>,
    pub checkpoint: Option<Arc<dyn SnapshotReader>>,
    pub events: Option<Sender<ActorEvent>>,
}

impl ActorEnv {
    pub fn new(job: Arc<JobConfig>, registry: Arc<RegstRegistry>) -> Self {
        Self {
            job,
            registry,
            checkpoint: None,
            events: None,
        }
    }

    pub fn with_checkpoint(mut self, checkpoint: Arc<dyn SnapshotReader>) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    pub fn with_events(mut self, events: Sender<ActorEvent>) -> Self {
        self.events = Some(events);
        self
    }
}

/// Observable milestones of an actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActorEvent {
    /// One-time initialization finished; the actor is now steady.
    Initialized { actor: ActorId },
    /// One `act()` completed.
    Acted {
        actor: ActorId,
        piece_id: u64,
        model_version_id: Option<u64>,
    },
    /// A model register went back to its producer.
    ModelReleased {
        actor: ActorId,
        model_version_id: Option<u64>,
        /// Last piece computed with it, `None` when released before serving
        /// any piece.
        piece_id: Option<u64>,
    },
    /// A forward-model snapshot was published.
    SnapshotPublished { actor: ActorId, batch_id: u64 },
    /// A new model version was published.
    ModelPublished { actor: ActorId, model_version_id: u64 },
    /// A source produced its final piece.
    SourceExhausted { actor: ActorId, pieces: u64 },
}

/// Per-actor counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActorStats {
    pub acts: u64,
    pub messages_in: u64,
    pub messages_out: u64,
}

/// A register received from a producer and not yet returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadableRegst {
    pub handle: RegstHandle,
    pub producer: ActorId,
    pub piece_id: u64,
    pub model_version_id: Option<u64>,
}

impl ReadableRegst {
    pub fn from_msg(msg: &ActorMsg) -> Self {
        Self {
            handle: msg.handle(),
            producer: msg.src(),
            piece_id: msg.piece_id(),
            model_version_id: msg.model_version_id(),
        }
    }
}

/// How an incoming message relates to this actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgRoute {
    /// A consumer gave back one of our produced registers.
    Returned,
    /// A plain data input.
    Naive,
    /// A consumed role the concrete actor handles.
    Customized,
}

pub struct ActorContext {
    actor_id: ActorId,
    name: String,
    job: Arc<JobConfig>,
    registry: Arc<RegstRegistry>,
    checkpoint: Option<Arc<dyn SnapshotReader>>,
    events: Option<Sender<ActorEvent>>,
    produced: BTreeMap<RegstDescId, RegstPool>,
    naive_consumed: BTreeMap<RegstDescId, VecDeque<ReadableRegst>>,
    customized_consumed: BTreeSet<RegstDescId>,
    outbox: Vec<ActorMsg>,
    stats: ActorStats,
}

impl ActorContext {
    /// Build the context for `task`. Every declared descriptor must be in
    /// the registry, and produced ones must name this actor as producer.
    pub fn new(task: &TaskProto, env: &ActorEnv) -> ActorResult<Self> {
        let mut produced = BTreeMap::new();
        for &desc_id in task.produced.values() {
            let store = env.registry.store(desc_id)?.clone();
            produced.insert(desc_id, RegstPool::new(task.actor_id, store)?);
        }

        let mut naive_consumed = BTreeMap::new();
        for &desc_id in task.consumed.values() {
            env.registry.store(desc_id)?;
            naive_consumed.insert(desc_id, VecDeque::new());
        }

        Ok(Self {
            actor_id: task.actor_id,
            name: task.name.clone(),
            job: env.job.clone(),
            registry: env.registry.clone(),
            checkpoint: env.checkpoint.clone(),
            events: env.events.clone(),
            produced,
            naive_consumed,
            customized_consumed: BTreeSet::new(),
            outbox: Vec::new(),
            stats: ActorStats::default(),
        })
    }

    #[inline]
    pub fn actor_id(&self) -> ActorId {
        self.actor_id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn job(&self) -> &JobConfig {
        &self.job
    }

    #[inline]
    pub fn registry(&self) -> &RegstRegistry {
        &self.registry
    }

    pub fn checkpoint(&self) -> Option<&dyn SnapshotReader> {
        self.checkpoint.as_deref()
    }

    pub fn stats(&self) -> ActorStats {
        self.stats
    }

    pub fn store(&self, desc_id: RegstDescId) -> ActorResult<Arc<RegstStore>> {
        self.registry.store(desc_id).cloned()
    }

    /// Take `desc_id` out of the generic data-input handling. The concrete
    /// actor receives those registers through its own handler.
    pub fn set_customized(&mut self, desc_id: RegstDescId) {
        if desc_id.is_some() {
            self.naive_consumed.remove(&desc_id);
            self.customized_consumed.insert(desc_id);
        }
    }

    pub fn emit(&self, event: ActorEvent) {
        if let Some(tx) = &self.events {
            // Observers are optional; a dropped receiver is not an error.
            let _ = tx.send(event);
        }
    }

    // ── Message routing ──

    /// Classify an incoming message. Registers of undeclared descriptors are
    /// a wiring defect.
    pub fn route(&mut self, msg: &ActorMsg) -> ActorResult<MsgRoute> {
        self.stats.messages_in += 1;
        let desc_id = msg.regst_desc_id();
        if msg.is_return() {
            if self.produced.contains_key(&desc_id) {
                return Ok(MsgRoute::Returned);
            }
        } else if self.naive_consumed.contains_key(&desc_id) {
            return Ok(MsgRoute::Naive);
        } else if self.customized_consumed.contains(&desc_id) {
            return Ok(MsgRoute::Customized);
        }
        Err(ActorError::UnknownRegst {
            actor: self.actor_id,
            desc_id,
        })
    }

    /// A consumer returned one of our registers.
    pub fn handle_returned(&mut self, msg: &ActorMsg) -> ActorResult<()> {
        let desc_id = msg.regst_desc_id();
        let pool = self
            .produced
            .get_mut(&desc_id)
            .ok_or(ActorError::UnknownRegst {
                actor: self.actor_id,
                desc_id,
            })?;
        if pool.release(msg.handle())? {
            tracing::trace!(
                actor = %self.actor_id,
                desc = %desc_id,
                slot = msg.handle().slot,
                "register writable again"
            );
        }
        Ok(())
    }

    /// Queue a plain data input.
    pub fn push_naive_readable(&mut self, msg: &ActorMsg) -> ActorResult<()> {
        let desc_id = msg.regst_desc_id();
        let queue = self
            .naive_consumed
            .get_mut(&desc_id)
            .ok_or(ActorError::UnknownRegst {
                actor: self.actor_id,
                desc_id,
            })?;
        queue.push_back(ReadableRegst::from_msg(msg));
        Ok(())
    }

    /// Generic handling for returned registers and data inputs. Returns
    /// `Some(route)` only for customized roles the caller must handle.
    pub fn handle_generic(&mut self, msg: &ActorMsg) -> ActorResult<Option<MsgRoute>> {
        match self.route(msg)? {
            MsgRoute::Returned => {
                self.handle_returned(msg)?;
                Ok(None)
            }
            MsgRoute::Naive => {
                self.push_naive_readable(msg)?;
                Ok(None)
            }
            MsgRoute::Customized => Ok(Some(MsgRoute::Customized)),
        }
    }

    // ── Readiness ──

    /// Every plain data input has at least one queued register.
    pub fn is_naive_read_ready(&self) -> bool {
        self.naive_consumed.values().all(|q| !q.is_empty())
    }

    pub fn has_naive_consumed(&self) -> bool {
        !self.naive_consumed.is_empty()
    }

    /// Every produced descriptor that gates writing has a free slot.
    pub fn is_write_ready(&self) -> bool {
        self.produced.values().all(|p| !p.blocks_write())
    }

    /// Like [`ActorContext::is_write_ready`], ignoring descriptors for which
    /// `skip` holds.
    pub fn is_write_ready_excluding(&self, mut skip: impl FnMut(RegstDescId) -> bool) -> bool {
        self.produced
            .iter()
            .all(|(id, p)| skip(*id) || !p.blocks_write())
    }

    pub fn naive_first_readable(&self) -> Option<&ReadableRegst> {
        self.naive_consumed.values().find_map(|q| q.front())
    }

    // ── Produced registers ──

    pub fn pool(&self, desc_id: RegstDescId) -> Option<&RegstPool> {
        self.produced.get(&desc_id)
    }

    pub fn produced_desc_ids(&self) -> impl Iterator<Item = RegstDescId> + '_ {
        self.produced.keys().copied()
    }

    /// Current writable slot of a produced descriptor.
    pub fn cur_writable(&self, desc_id: RegstDescId) -> Option<RegstHandle> {
        self.produced.get(&desc_id)?.acquire_writable()
    }

    /// Retire the write credit of a descriptor whose slot is handed to its
    /// consumers for good.
    pub fn retire_writable(&mut self, desc_id: RegstDescId) {
        if let Some(pool) = self.produced.get_mut(&desc_id) {
            pool.retire();
        }
    }

    /// Publish the current writable slot of every produced descriptor
    /// accepted by `filter`, after letting `stamp` update it. Returns the
    /// number of messages queued.
    pub fn send_regst_to_consumers<F, S>(
        &mut self,
        mut filter: F,
        mut stamp: S,
    ) -> ActorResult<usize>
    where
        F: FnMut(RegstDescId) -> bool,
        S: FnMut(&mut Regst),
    {
        let mut sent = 0;
        for (&desc_id, pool) in self.produced.iter_mut() {
            if !filter(desc_id) {
                continue;
            }
            let Some(current) = pool.acquire_writable() else {
                continue;
            };
            let (piece_id, model_version_id) = {
                let mut regst = pool.store().write(current)?;
                stamp(&mut *regst);
                (regst.piece_id(), regst.model_version_id())
            };
            let Some(handle) = pool.publish() else {
                continue;
            };
            for &consumer in pool.consumers() {
                self.outbox.push(ActorMsg::regst_ready(
                    self.actor_id,
                    consumer,
                    handle,
                    piece_id,
                    model_version_id,
                ));
                sent += 1;
            }
        }
        Ok(sent)
    }

    /// Publish one specific writable slot of `desc_id`.
    pub fn send_slot_to_consumers(
        &mut self,
        desc_id: RegstDescId,
        slot: usize,
        stamp: impl FnOnce(&mut Regst),
    ) -> ActorResult<Option<RegstHandle>> {
        let pool = self
            .produced
            .get_mut(&desc_id)
            .ok_or(ActorError::UnregisteredDesc(desc_id))?;
        let current = pool.store().handle(slot);
        let (piece_id, model_version_id) = {
            let mut regst = pool.store().write(current)?;
            stamp(&mut *regst);
            (regst.piece_id(), regst.model_version_id())
        };
        let Some(handle) = pool.publish_slot(slot) else {
            return Ok(None);
        };
        for &consumer in pool.consumers() {
            self.outbox.push(ActorMsg::regst_ready(
                self.actor_id,
                consumer,
                handle,
                piece_id,
                model_version_id,
            ));
        }
        Ok(Some(handle))
    }

    /// Give a borrowed register back to its producer.
    pub fn send_regst_to_producer(&mut self, regst: &ReadableRegst) {
        self.outbox.push(ActorMsg::regst_returned(
            self.actor_id,
            regst.producer,
            regst.handle,
            regst.piece_id,
            regst.model_version_id,
        ));
    }

    /// Return the front register of every data input, after an act.
    pub fn return_naive_readables(&mut self) {
        let fronts: Vec<ReadableRegst> = self
            .naive_consumed
            .values_mut()
            .filter_map(|q| q.pop_front())
            .collect();
        for regst in &fronts {
            self.send_regst_to_producer(regst);
        }
    }

    // ── Kernel bindings ──

    /// Read bindings for the front register of every data input.
    pub fn naive_input_bindings(&self) -> ActorResult<Vec<BlobBinding>> {
        self.naive_consumed
            .values()
            .filter_map(|q| q.front())
            .map(|r| {
                Ok(BlobBinding::read(
                    RegstRole::Input,
                    self.store(r.handle.desc_id)?,
                    r.handle,
                ))
            })
            .collect()
    }

    /// Write bindings for the current writable slot of every produced
    /// descriptor accepted by `filter`.
    pub fn output_bindings(&self, mut filter: impl FnMut(RegstDescId) -> bool) -> Vec<BlobBinding> {
        self.produced
            .iter()
            .filter(|(id, _)| filter(**id))
            .filter_map(|(_, pool)| {
                pool.acquire_writable()
                    .map(|h| BlobBinding::write(RegstRole::Output, pool.store().clone(), h))
            })
            .collect()
    }

    // ── Outbox ──

    pub fn note_act(&mut self) {
        self.stats.acts += 1;
    }

    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    /// Hand every queued message to the scheduler.
    pub fn drain_outbox(&mut self) -> Vec<ActorMsg> {
        self.stats.messages_out += self.outbox.len() as u64;
        std::mem::take(&mut self.outbox)
    }
}

impl std::fmt::Debug for ActorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorContext")
            .field("actor_id", &self.actor_id)
            .field("name", &self.name)
            .field("produced", &self.produced.keys().collect::<Vec<_>>())
            .field("naive_consumed", &self.naive_consumed.keys().collect::<Vec<_>>())
            .field("customized_consumed", &self.customized_consumed)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::regst::RegstDesc;
    use crate::actor::task::TaskType;

    const IN: RegstDescId = RegstDescId(1);
    const OUT: RegstDescId = RegstDescId(2);

    fn env() -> ActorEnv {
        let registry = RegstRegistry::new([
            RegstDesc::new(IN, "in", ActorId(0))
                .with_consumers(&[ActorId(1)])
                .with_blob("x", &[1]),
            RegstDesc::new(OUT, "out", ActorId(1))
                .with_consumers(&[ActorId(2)])
                .with_register_num(2)
                .with_blob("y", &[1]),
        ])
        .unwrap();
        ActorEnv::new(Arc::new(JobConfig::default()), Arc::new(registry))
    }

    fn ctx() -> ActorContext {
        let task = TaskProto::new(ActorId(1), TaskType::Sink)
            .consume("in", IN)
            .produce("out", OUT);
        ActorContext::new(&task, &env()).unwrap()
    }

    fn ready(piece_id: u64, generation: u64) -> ActorMsg {
        ActorMsg::regst_ready(
            ActorId(0),
            ActorId(1),
            RegstHandle::new(IN, 0, generation),
            piece_id,
            None,
        )
    }

    #[test]
    fn test_unknown_descriptor_is_rejected() {
        let mut ctx = ctx();
        let msg = ActorMsg::regst_ready(
            ActorId(0),
            ActorId(1),
            RegstHandle::new(RegstDescId(99), 0, 1),
            0,
            None,
        );
        assert!(matches!(
            ctx.handle_generic(&msg),
            Err(ActorError::UnknownRegst { .. })
        ));
    }

    #[test]
    fn test_naive_queue_and_return() {
        let mut ctx = ctx();
        assert!(!ctx.is_naive_read_ready());
        ctx.handle_generic(&ready(0, 1)).unwrap();
        ctx.handle_generic(&ready(1, 2)).unwrap();
        assert!(ctx.is_naive_read_ready());
        assert_eq!(ctx.naive_first_readable().map(|r| r.piece_id), Some(0));

        ctx.return_naive_readables();
        let out = ctx.drain_outbox();
        assert_eq!(out.len(), 1);
        assert!(out[0].is_return());
        assert_eq!(out[0].dst(), ActorId(0));
        assert_eq!(out[0].piece_id(), 0);
        assert_eq!(ctx.naive_first_readable().map(|r| r.piece_id), Some(1));
    }

    #[test]
    fn test_customized_roles_bypass_queue() {
        let mut ctx = ctx();
        ctx.set_customized(IN);
        assert!(ctx.is_naive_read_ready());
        assert_eq!(
            ctx.handle_generic(&ready(0, 1)).unwrap(),
            Some(MsgRoute::Customized)
        );
    }

    #[test]
    fn test_send_and_return_produced() {
        let mut ctx = ctx();
        let sent = ctx
            .send_regst_to_consumers(|_| true, |r| r.set_piece_id(5))
            .unwrap();
        assert_eq!(sent, 1);
        let out = ctx.drain_outbox();
        assert_eq!(out[0].dst(), ActorId(2));
        assert_eq!(out[0].piece_id(), 5);
        assert!(ctx.is_write_ready());

        ctx.send_regst_to_consumers(|_| true, |r| r.set_piece_id(6))
            .unwrap();
        assert!(!ctx.is_write_ready());

        let returned = ActorMsg::regst_returned(ActorId(2), ActorId(1), out[0].handle(), 5, None);
        ctx.handle_generic(&returned).unwrap();
        assert!(ctx.is_write_ready());
        assert_eq!(ctx.stats().messages_in, 1);
    }

    #[test]
    fn test_filter_skips_descriptors() {
        let mut ctx = ctx();
        let sent = ctx.send_regst_to_consumers(|id| id != OUT, |_| {}).unwrap();
        assert_eq!(sent, 0);
        assert_eq!(ctx.outbox_len(), 0);
    }

    #[test]
    fn test_wrong_producer_is_wiring_error() {
        let task = TaskProto::new(ActorId(3), TaskType::Source).produce("out", OUT);
        assert!(matches!(
            ActorContext::new(&task, &env()),
            Err(ActorError::WrongProducer { .. })
        ));
    }
}
