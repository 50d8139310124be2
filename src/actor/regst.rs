//! Registers: reusable buffer slots exchanged between a producer and its
//! consumers.
//!
//! A `RegstDesc` is the compile-time description of one logical data flow
//! (who produces it, who consumes it, how many physical slots back it and
//! which blobs each slot carries). A `Regst` is one physical slot.

use crate::actor::id::{ActorId, RegstDescId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A dense `f32` tensor buffer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Blob {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl Blob {
    /// Zero-filled blob of the given shape.
    pub fn zeros(shape: &[usize]) -> Self {
        let len = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            data: vec![0.0; len],
        }
    }

    pub fn from_vec(shape: &[usize], data: Vec<f32>) -> Self {
        Self {
            shape: shape.to_vec(),
            data,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn fill(&mut self, value: f32) {
        self.data.iter_mut().for_each(|v| *v = value);
    }

    /// Copy `src` into `self`. Shapes must match element count.
    pub fn copy_from(&mut self, src: &Blob) -> bool {
        if src.data.len() != self.data.len() {
            return false;
        }
        self.data.copy_from_slice(&src.data);
        true
    }
}

/// Shape template of a blob carried by every slot of a descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobDesc {
    pub name: String,
    pub shape: Vec<usize>,
}

impl BlobDesc {
    pub fn new(name: impl Into<String>, shape: &[usize]) -> Self {
        Self {
            name: name.into(),
            shape: shape.to_vec(),
        }
    }
}

fn default_register_num() -> usize {
    1
}

/// Compile-time descriptor of one logical register flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegstDesc {
    pub id: RegstDescId,
    /// Human-readable name, e.g. "model" or "out".
    pub name: String,
    pub producer: ActorId,
    #[serde(default)]
    pub consumers: Vec<ActorId>,
    /// Number of physical slots. The producer may run `register_num - 1`
    /// steps ahead of its slowest consumer.
    #[serde(default = "default_register_num")]
    pub register_num: usize,
    #[serde(default)]
    pub blobs: Vec<BlobDesc>,
}

impl RegstDesc {
    pub fn new(id: RegstDescId, name: impl Into<String>, producer: ActorId) -> Self {
        Self {
            id,
            name: name.into(),
            producer,
            consumers: Vec::new(),
            register_num: 1,
            blobs: Vec::new(),
        }
    }

    pub fn with_consumers(mut self, consumers: &[ActorId]) -> Self {
        self.consumers = consumers.to_vec();
        self
    }

    pub fn with_register_num(mut self, register_num: usize) -> Self {
        self.register_num = register_num;
        self
    }

    pub fn with_blob(mut self, name: impl Into<String>, shape: &[usize]) -> Self {
        self.blobs.push(BlobDesc::new(name, shape));
        self
    }

    pub fn has_consumers(&self) -> bool {
        !self.consumers.is_empty()
    }
}

/// One physical register slot.
#[derive(Debug, Clone)]
pub struct Regst {
    desc_id: RegstDescId,
    piece_id: u64,
    model_version_id: Option<u64>,
    /// Pinned registers are never evicted from device memory.
    pub pinned: bool,
    /// Whether the payload is resident in memory.
    pub in_memory: bool,
    blobs: BTreeMap<String, Blob>,
}

impl Regst {
    /// Allocate a slot with zeroed blobs following the descriptor's template.
    pub fn allocate(desc: &RegstDesc) -> Self {
        let blobs = desc
            .blobs
            .iter()
            .map(|b| (b.name.clone(), Blob::zeros(&b.shape)))
            .collect();
        Self {
            desc_id: desc.id,
            piece_id: 0,
            model_version_id: None,
            pinned: false,
            in_memory: true,
            blobs,
        }
    }

    #[inline]
    pub fn desc_id(&self) -> RegstDescId {
        self.desc_id
    }

    #[inline]
    pub fn piece_id(&self) -> u64 {
        self.piece_id
    }

    #[inline]
    pub fn set_piece_id(&mut self, piece_id: u64) {
        self.piece_id = piece_id;
    }

    #[inline]
    pub fn model_version_id(&self) -> Option<u64> {
        self.model_version_id
    }

    #[inline]
    pub fn set_model_version_id(&mut self, model_version_id: Option<u64>) {
        self.model_version_id = model_version_id;
    }

    pub fn blob(&self, name: &str) -> Option<&Blob> {
        self.blobs.get(name)
    }

    pub fn blob_mut(&mut self, name: &str) -> Option<&mut Blob> {
        self.blobs.get_mut(name)
    }

    /// Insert or replace a blob outside of the descriptor's template.
    pub fn put_blob(&mut self, name: impl Into<String>, blob: Blob) {
        self.blobs.insert(name.into(), blob);
    }

    pub fn blob_names(&self) -> impl Iterator<Item = &str> {
        self.blobs.keys().map(String::as_str)
    }
}
