//! Register descriptor registry.
//!
//! Resolves a descriptor id to its shared slot store and consumer list.
//! Built once when the graph is instantiated and treated as immutable after.

use crate::actor::error::{ActorError, ActorResult};
use crate::actor::id::RegstDescId;
use crate::actor::pool::RegstStore;
use crate::actor::regst::RegstDesc;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct RegstRegistry {
    stores: BTreeMap<RegstDescId, Arc<RegstStore>>,
}

impl RegstRegistry {
    pub fn new(descs: impl IntoIterator<Item = RegstDesc>) -> ActorResult<Self> {
        let mut stores = BTreeMap::new();
        for desc in descs {
            if desc.id.is_none() {
                return Err(ActorError::InvalidPlan(format!(
                    "descriptor '{}' uses the reserved NONE id",
                    desc.name
                )));
            }
            if desc.register_num == 0 {
                return Err(ActorError::InvalidPlan(format!(
                    "descriptor {} ('{}') has register_num 0",
                    desc.id, desc.name
                )));
            }
            let id = desc.id;
            if stores.insert(id, Arc::new(RegstStore::new(desc))).is_some() {
                return Err(ActorError::InvalidPlan(format!(
                    "descriptor {} declared twice",
                    id
                )));
            }
        }
        Ok(Self { stores })
    }

    pub fn store(&self, id: RegstDescId) -> ActorResult<&Arc<RegstStore>> {
        self.stores.get(&id).ok_or(ActorError::UnregisteredDesc(id))
    }

    pub fn desc(&self, id: RegstDescId) -> ActorResult<&RegstDesc> {
        self.store(id).map(|s| s.desc())
    }

    pub fn contains(&self, id: RegstDescId) -> bool {
        self.stores.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegstDesc> {
        self.stores.values().map(|s| s.desc())
    }
}
