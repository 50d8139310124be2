//! Register pools and producer-side flow control.
//!
//! Two halves:
//! - **`RegstStore`**: the shared physical slots of one descriptor. Every
//!   actor touching the descriptor reaches the same store through the
//!   registry. Slots are addressed by `RegstHandle` (index + generation).
//! - **`RegstPool`**: the producer's private accounting: which slots are
//!   writable and how many consumers still borrow each published slot.
//!
//! The borrow/release protocol guarantees the slot locks are never contended
//! for writing: a producer only writes a slot nobody borrows, and a consumer
//! only reads a slot that was published to it.

use crate::actor::error::{ActorError, ActorResult};
use crate::actor::id::{ActorId, RegstDescId, RegstHandle};
use crate::actor::regst::{Regst, RegstDesc};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Physical slots of one register descriptor.
pub struct RegstStore {
    desc: RegstDesc,
    slots: Vec<RwLock<Regst>>,
    generations: Vec<AtomicU64>,
}

impl RegstStore {
    pub fn new(desc: RegstDesc) -> Self {
        let n = desc.register_num.max(1);
        let slots = (0..n).map(|_| RwLock::new(Regst::allocate(&desc))).collect();
        let generations = (0..n).map(|_| AtomicU64::new(0)).collect();
        Self {
            desc,
            slots,
            generations,
        }
    }

    #[inline]
    pub fn desc(&self) -> &RegstDesc {
        &self.desc
    }

    #[inline]
    pub fn register_num(&self) -> usize {
        self.slots.len()
    }

    /// Current handle of a slot.
    pub fn handle(&self, slot: usize) -> RegstHandle {
        RegstHandle::new(
            self.desc.id,
            slot as u32,
            self.generations[slot].load(Ordering::Acquire),
        )
    }

    /// Whether `handle` still designates the slot's current occupant.
    pub fn is_live(&self, handle: RegstHandle) -> bool {
        handle.desc_id == self.desc.id
            && handle.slot_index() < self.generations.len()
            && self.generations[handle.slot_index()].load(Ordering::Acquire) == handle.generation
    }

    fn check(&self, handle: RegstHandle) -> ActorResult<usize> {
        if self.is_live(handle) {
            Ok(handle.slot_index())
        } else {
            Err(ActorError::StaleHandle(handle))
        }
    }

    pub fn read(&self, handle: RegstHandle) -> ActorResult<RwLockReadGuard<'_, Regst>> {
        let slot = self.check(handle)?;
        Ok(self.slots[slot].read())
    }

    pub fn write(&self, handle: RegstHandle) -> ActorResult<RwLockWriteGuard<'_, Regst>> {
        let slot = self.check(handle)?;
        Ok(self.slots[slot].write())
    }

    /// Advance a slot's generation, invalidating every older handle.
    fn advance(&self, slot: usize) -> RegstHandle {
        let generation = self.generations[slot].fetch_add(1, Ordering::AcqRel) + 1;
        RegstHandle::new(self.desc.id, slot as u32, generation)
    }
}

impl std::fmt::Debug for RegstStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegstStore")
            .field("desc_id", &self.desc.id)
            .field("name", &self.desc.name)
            .field("register_num", &self.slots.len())
            .finish()
    }
}

/// Producer-side view of a descriptor's slots.
pub struct RegstPool {
    owner: ActorId,
    store: Arc<RegstStore>,
    /// Slots the producer may write, oldest first.
    writable: VecDeque<usize>,
    /// Outstanding borrowers per slot.
    reading_cnt: Vec<usize>,
    /// Slots published and not yet fully released.
    in_flight: usize,
    /// A retired pool no longer gates write-readiness.
    retired: bool,
}

impl RegstPool {
    pub fn new(owner: ActorId, store: Arc<RegstStore>) -> ActorResult<Self> {
        let desc = store.desc();
        if desc.producer != owner {
            return Err(ActorError::WrongProducer {
                desc_id: desc.id,
                expected: desc.producer,
                actual: owner,
            });
        }
        let n = store.register_num();
        Ok(Self {
            owner,
            store,
            writable: (0..n).collect(),
            reading_cnt: vec![0; n],
            in_flight: 0,
            retired: false,
        })
    }

    #[inline]
    pub fn desc_id(&self) -> RegstDescId {
        self.store.desc().id
    }

    #[inline]
    pub fn store(&self) -> &Arc<RegstStore> {
        &self.store
    }

    #[inline]
    pub fn consumers(&self) -> &[ActorId] {
        &self.store.desc().consumers
    }

    /// The slot the producer would write next, if any is free.
    pub fn acquire_writable(&self) -> Option<RegstHandle> {
        self.writable.front().map(|&slot| self.store.handle(slot))
    }

    pub fn is_writable(&self, slot: usize) -> bool {
        self.writable.contains(&slot)
    }

    pub fn writable_count(&self) -> usize {
        self.writable.len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Publish the front writable slot. See [`RegstPool::publish_slot`].
    pub fn publish(&mut self) -> Option<RegstHandle> {
        let slot = *self.writable.front()?;
        Some(self.publish_index(0, slot))
    }

    /// Publish a specific writable slot to every consumer.
    ///
    /// With consumers, the slot leaves the writable queue until all of them
    /// release it. With none, it stays writable. Either way the generation
    /// advances, so the returned handle is the one consumers must present.
    pub fn publish_slot(&mut self, slot: usize) -> Option<RegstHandle> {
        let pos = self.writable.iter().position(|&s| s == slot)?;
        Some(self.publish_index(pos, slot))
    }

    fn publish_index(&mut self, pos: usize, slot: usize) -> RegstHandle {
        let handle = self.store.advance(slot);
        let consumers = self.consumers().len();
        if consumers > 0 {
            self.writable.remove(pos);
            self.reading_cnt[slot] = consumers;
            self.in_flight += 1;
        }
        handle
    }

    /// A consumer released `handle`. Returns `true` when the slot became
    /// writable again.
    pub fn release(&mut self, handle: RegstHandle) -> ActorResult<bool> {
        let unexpected = || ActorError::UnexpectedReturn {
            actor: self.owner,
            handle,
        };
        if !self.store.is_live(handle) {
            return Err(unexpected());
        }
        let slot = handle.slot_index();
        if self.reading_cnt[slot] == 0 {
            return Err(unexpected());
        }
        self.reading_cnt[slot] -= 1;
        if self.reading_cnt[slot] == 0 {
            self.writable.push_back(slot);
            self.in_flight -= 1;
            return Ok(true);
        }
        Ok(false)
    }

    /// Stop counting this descriptor toward write-readiness.
    pub fn retire(&mut self) {
        self.retired = true;
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }

    /// Whether this pool currently blocks the producer from acting.
    ///
    /// Descriptors without consumers never leave the writable state, and
    /// retired ones are excluded outright.
    pub fn blocks_write(&self) -> bool {
        !self.retired && !self.consumers().is_empty() && self.writable.is_empty()
    }
}

impl std::fmt::Debug for RegstPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegstPool")
            .field("desc_id", &self.desc_id())
            .field("writable", &self.writable)
            .field("reading_cnt", &self.reading_cnt)
            .field("retired", &self.retired)
            .finish()
    }
}
