//! Identity types for the actor system.
//!
//! `ActorId` and `RegstDescId` are assigned by the graph compiler and stay
//! stable for the whole run. `ActorId` doubles as an index into the
//! scheduler's actor table.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an execution node. Index into the scheduler's actor table.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub u32);

impl ActorId {
    pub const INVALID: ActorId = ActorId(u32::MAX);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "ActorId(INVALID)")
        } else {
            write!(f, "ActorId({})", self.0)
        }
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Identifier of a register descriptor: one logical data flow between a
/// producer and its consumers, served by one or more physical slots.
///
/// `RegstDescId::NONE` marks a role the task does not declare.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegstDescId(pub u32);

impl RegstDescId {
    pub const NONE: RegstDescId = RegstDescId(u32::MAX);

    #[inline]
    pub fn is_some(self) -> bool {
        self != Self::NONE
    }

    #[inline]
    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

impl Default for RegstDescId {
    fn default() -> Self {
        Self::NONE
    }
}

impl fmt::Debug for RegstDescId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::NONE {
            write!(f, "RegstDescId(NONE)")
        } else {
            write!(f, "RegstDescId({})", self.0)
        }
    }
}

impl fmt::Display for RegstDescId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Handle to one physical slot of a register descriptor.
///
/// The generation is bumped every time the producer publishes the slot, so a
/// handle held past its release no longer matches the slot and every access
/// through it is rejected.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegstHandle {
    pub desc_id: RegstDescId,
    pub slot: u32,
    pub generation: u64,
}

impl RegstHandle {
    pub fn new(desc_id: RegstDescId, slot: u32, generation: u64) -> Self {
        Self {
            desc_id,
            slot,
            generation,
        }
    }

    #[inline]
    pub fn slot_index(self) -> usize {
        self.slot as usize
    }
}

impl fmt::Debug for RegstHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RegstHandle(desc={}, slot={}, gen={})",
            self.desc_id.0, self.slot, self.generation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_id() {
        let id = ActorId(42);
        assert!(id.is_valid());
        assert_eq!(id.index(), 42);
        assert!(!ActorId::INVALID.is_valid());
    }

    #[test]
    fn test_regst_desc_id_none() {
        assert!(RegstDescId::NONE.is_none());
        assert!(RegstDescId(3).is_some());
        assert_eq!(RegstDescId::default(), RegstDescId::NONE);
        assert_eq!(format!("{:?}", RegstDescId::NONE), "RegstDescId(NONE)");
    }

    #[test]
    fn test_handle_debug() {
        let h = RegstHandle::new(RegstDescId(7), 2, 9);
        assert_eq!(h.slot_index(), 2);
        assert_eq!(format!("{:?}", h), "RegstHandle(desc=7, slot=2, gen=9)");
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let json = serde_json::to_string(&ActorId(5)).unwrap();
        assert_eq!(json, "5");
        let id: RegstDescId = serde_json::from_str("11").unwrap();
        assert_eq!(id, RegstDescId(11));
    }
}
