//! Compute interface consumed by actors.
//!
//! Kernels are external collaborators: the actor calls them synchronously
//! with a `BlobAccessor` that borrows the relevant registers for the duration
//! of the call. The borrow ends when the call returns, so a kernel cannot keep
//! a reference to any register.

use crate::actor::error::ActorResult;
use crate::actor::id::RegstHandle;
use crate::actor::pool::RegstStore;
use crate::actor::regst::{Blob, Regst};
use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use rand::rngs::StdRng;
use std::collections::HashMap;
use std::sync::Arc;

/// Role a register plays for the kernel call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegstRole {
    /// Plain data input.
    Input,
    /// Plain data output.
    Output,
    Model,
    ConstModel,
    ConstBuf,
    ForwardModel,
}

/// Per-call context.
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelCtx {
    pub piece_id: u64,
    pub model_version_id: Option<u64>,
}

/// Resolves blob names to the registers bound for one kernel call.
///
/// Lookups walk the bound registers in binding order, so the first register
/// carrying a blob of that name wins.
pub struct BlobAccessor<'a> {
    readable: Vec<(RegstRole, &'a Regst)>,
    writable: Vec<(RegstRole, &'a mut Regst)>,
}

impl<'a> BlobAccessor<'a> {
    pub fn new(
        readable: Vec<(RegstRole, &'a Regst)>,
        writable: Vec<(RegstRole, &'a mut Regst)>,
    ) -> Self {
        Self { readable, writable }
    }

    /// Read a blob from any bound register, readable ones first.
    pub fn input(&self, name: &str) -> Option<&Blob> {
        self.readable
            .iter()
            .find_map(|(_, r)| r.blob(name))
            .or_else(|| self.writable.iter().find_map(|(_, r)| r.blob(name)))
    }

    /// Writable blob from the writable registers.
    pub fn output(&mut self, name: &str) -> Option<&mut Blob> {
        self.writable.iter_mut().find_map(|(_, r)| r.blob_mut(name))
    }

    /// Read a blob from the register bound under `role`.
    pub fn role_input(&self, role: RegstRole, name: &str) -> Option<&Blob> {
        self.readable
            .iter()
            .filter(|(r, _)| *r == role)
            .find_map(|(_, regst)| regst.blob(name))
            .or_else(|| {
                self.writable
                    .iter()
                    .filter(|(r, _)| *r == role)
                    .find_map(|(_, regst)| regst.blob(name))
            })
    }

    /// Writable blob from the register bound under `role`.
    pub fn role_output(&mut self, role: RegstRole, name: &str) -> Option<&mut Blob> {
        self.writable
            .iter_mut()
            .filter(|(r, _)| *r == role)
            .find_map(|(_, regst)| regst.blob_mut(name))
    }

    /// Read both `input` and `output` in one call without aliasing.
    pub fn input_and_output(&mut self, input: &str, output: &str) -> Option<(&Blob, &mut Blob)> {
        let src = self.readable.iter().find_map(|(_, r)| r.blob(input))?;
        let dst = self.writable.iter_mut().find_map(|(_, r)| r.blob_mut(output))?;
        Some((src, dst))
    }

    /// Names of the blobs bound under `role`, without duplicates.
    pub fn blob_names(&self, role: RegstRole) -> Vec<String> {
        let readable = self.readable.iter().filter(|(r, _)| *r == role).map(|(_, g)| &**g);
        let writable = self.writable.iter().filter(|(r, _)| *r == role).map(|(_, g)| &**g);
        let mut names: Vec<String> = Vec::new();
        for regst in readable.chain(writable) {
            for name in regst.blob_names() {
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }
        names
    }
}

/// Read-only source of initial parameter values, keyed by parameter name.
pub trait SnapshotReader: Send + Sync {
    fn read_blob(&self, name: &str) -> Option<Blob>;
}

/// In-memory checkpoint.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshot {
    blobs: HashMap<String, Blob>,
}

impl MemorySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blob(mut self, name: impl Into<String>, blob: Blob) -> Self {
        self.blobs.insert(name.into(), blob);
        self
    }
}

impl SnapshotReader for MemorySnapshot {
    fn read_blob(&self, name: &str) -> Option<Blob> {
        self.blobs.get(name).cloned()
    }
}

/// Compute implementation driven by an actor.
pub trait Kernel: Send {
    fn name(&self) -> &str;

    /// One unit of work on the bound registers.
    fn forward(&mut self, ctx: &KernelCtx, blobs: &mut BlobAccessor<'_>) -> ActorResult<()>;

    /// One-time initialization of model and constant buffers.
    fn init_model_and_const_buf(
        &mut self,
        _ctx: &KernelCtx,
        _rng: &mut StdRng,
        _snapshot: Option<&dyn SnapshotReader>,
        _blobs: &mut BlobAccessor<'_>,
    ) -> ActorResult<()> {
        Ok(())
    }
}

/// A register to lock for one kernel call.
#[derive(Clone)]
pub struct BlobBinding {
    pub role: RegstRole,
    pub store: Arc<RegstStore>,
    pub handle: RegstHandle,
    pub writable: bool,
}

impl BlobBinding {
    pub fn read(role: RegstRole, store: Arc<RegstStore>, handle: RegstHandle) -> Self {
        Self {
            role,
            store,
            handle,
            writable: false,
        }
    }

    pub fn write(role: RegstRole, store: Arc<RegstStore>, handle: RegstHandle) -> Self {
        Self {
            role,
            store,
            handle,
            writable: true,
        }
    }
}

/// Lock every bound register, build the accessor and run `f` on it.
///
/// Bindings must name distinct slots; the guards are released when `f`
/// returns.
pub fn with_blob_accessor<R>(
    bindings: &[BlobBinding],
    f: impl FnOnce(&mut BlobAccessor<'_>) -> ActorResult<R>,
) -> ActorResult<R> {
    let mut read_guards: Vec<(RegstRole, RwLockReadGuard<'_, Regst>)> = Vec::new();
    let mut write_guards: Vec<(RegstRole, RwLockWriteGuard<'_, Regst>)> = Vec::new();
    for binding in bindings {
        if binding.writable {
            write_guards.push((binding.role, binding.store.write(binding.handle)?));
        } else {
            read_guards.push((binding.role, binding.store.read(binding.handle)?));
        }
    }

    let readable = read_guards.iter().map(|(role, g)| (*role, &**g)).collect();
    let writable = write_guards
        .iter_mut()
        .map(|(role, g)| (*role, &mut **g))
        .collect();
    let mut accessor = BlobAccessor::new(readable, writable);
    f(&mut accessor)
}

/// Kernel that does nothing.
#[derive(Debug, Default)]
pub struct NoopKernel;

impl Kernel for NoopKernel {
    fn name(&self) -> &str {
        "noop"
    }

    fn forward(&mut self, _ctx: &KernelCtx, _blobs: &mut BlobAccessor<'_>) -> ActorResult<()> {
        Ok(())
    }
}
