//! Reference kernels and the registry resolving kernel names from a plan.
//!
//! They are small and keep plans runnable end to end, touching every role of
//! the compute interface. Blob naming follows
//! one convention: data registers carry a `data` blob, models carry `weight`
//! and `bias`.

use crate::actor::{
    ActorError, ActorResult, Blob, BlobAccessor, Kernel, KernelCtx, NoopKernel, RegstRole,
    SnapshotReader,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;

/// Name of the data blob in every data register.
pub const DATA_BLOB: &str = "data";

/// Parameter blobs of the affine kernel.
pub const PARAM_BLOBS: [&str; 2] = ["weight", "bias"];

/// Builds a fresh kernel instance per actor.
pub type KernelCtor = Box<dyn Fn() -> Box<dyn Kernel> + Send + Sync>;

fn builtin<K: Kernel + Default + 'static>() -> KernelCtor {
    Box::new(|| -> Box<dyn Kernel> { Box::new(K::default()) })
}

/// Kernels by name.
pub struct KernelRegistry {
    ctors: HashMap<String, KernelCtor>,
}

impl Default for KernelRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl KernelRegistry {
    pub fn empty() -> Self {
        Self {
            ctors: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("noop", builtin::<NoopKernel>());
        registry.register("fill_piece", builtin::<FillPieceKernel>());
        registry.register("affine", builtin::<AffineKernel>());
        registry.register("collect", builtin::<CollectKernel>());
        registry.register("sgd_update", builtin::<SgdUpdateKernel>());
        registry
    }

    /// Register `ctor` under `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, ctor: KernelCtor) {
        self.ctors.insert(name.into(), ctor);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ctors.contains_key(name)
    }

    pub fn create(&self, name: &str) -> ActorResult<Box<dyn Kernel>> {
        self.ctors
            .get(name)
            .map(|ctor| ctor())
            .ok_or_else(|| ActorError::UnknownKernel(name.to_string()))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.ctors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

// ==================== fill_piece ====================

/// Fills every output blob with the piece id.
#[derive(Debug, Default)]
pub struct FillPieceKernel;

impl Kernel for FillPieceKernel {
    fn name(&self) -> &str {
        "fill_piece"
    }

    fn forward(&mut self, ctx: &KernelCtx, blobs: &mut BlobAccessor<'_>) -> ActorResult<()> {
        for name in blobs.blob_names(RegstRole::Output) {
            if let Some(blob) = blobs.role_output(RegstRole::Output, &name) {
                blob.fill(ctx.piece_id as f32);
            }
        }
        Ok(())
    }
}

// ==================== affine ====================

/// `out = weight * data + bias`, elementwise with broadcasting by repetition.
///
/// Also keeps the forward-model snapshot as a moving average of the model.
#[derive(Debug)]
pub struct AffineKernel {
    momentum: f32,
}

impl Default for AffineKernel {
    fn default() -> Self {
        Self { momentum: 0.9 }
    }
}

impl AffineKernel {
    pub fn with_momentum(momentum: f32) -> Self {
        Self { momentum }
    }

    fn param(blobs: &BlobAccessor<'_>, name: &str) -> Option<Blob> {
        blobs
            .role_input(RegstRole::Model, name)
            .or_else(|| blobs.role_input(RegstRole::ConstModel, name))
            .cloned()
    }
}

impl Kernel for AffineKernel {
    fn name(&self) -> &str {
        "affine"
    }

    fn forward(&mut self, _ctx: &KernelCtx, blobs: &mut BlobAccessor<'_>) -> ActorResult<()> {
        let input = blobs
            .role_input(RegstRole::Input, DATA_BLOB)
            .cloned()
            .ok_or_else(|| ActorError::kernel("affine", "missing input blob 'data'"))?;
        let weight = Self::param(blobs, "weight");
        let bias = Self::param(blobs, "bias");

        if let Some(out) = blobs.role_output(RegstRole::Output, DATA_BLOB) {
            for (i, (dst, x)) in out.data.iter_mut().zip(input.data.iter().cycle()).enumerate() {
                let w = weight
                    .as_ref()
                    .filter(|w| !w.is_empty())
                    .map_or(1.0, |w| w.data[i % w.len()]);
                let b = bias
                    .as_ref()
                    .filter(|b| !b.is_empty())
                    .map_or(0.0, |b| b.data[i % b.len()]);
                *dst = w * x + b;
            }
        }

        let momentum = self.momentum;
        for (name, param) in PARAM_BLOBS.iter().zip([weight, bias]) {
            let Some(param) = param else { continue };
            let Some(snapshot) = blobs.role_output(RegstRole::ForwardModel, name) else {
                continue;
            };
            if snapshot.len() != param.len() {
                return Err(ActorError::kernel(
                    "affine",
                    format!("forward model blob '{name}' does not match the model"),
                ));
            }
            for (s, p) in snapshot.data.iter_mut().zip(&param.data) {
                *s = momentum * *s + (1.0 - momentum) * p;
            }
        }
        Ok(())
    }

    fn init_model_and_const_buf(
        &mut self,
        _ctx: &KernelCtx,
        rng: &mut StdRng,
        snapshot: Option<&dyn SnapshotReader>,
        blobs: &mut BlobAccessor<'_>,
    ) -> ActorResult<()> {
        for name in PARAM_BLOBS {
            let Some(blob) = blobs.output(name) else {
                continue;
            };
            match snapshot.and_then(|s| s.read_blob(name)) {
                Some(saved) => {
                    if !blob.copy_from(&saved) {
                        return Err(ActorError::kernel(
                            "affine",
                            format!("checkpoint blob '{name}' has shape {:?}", saved.shape),
                        ));
                    }
                }
                None if name == "weight" => {
                    blob.data.iter_mut().for_each(|v| *v = rng.gen_range(-1.0..1.0));
                }
                None => blob.fill(0.0),
            }
            let initialized = blob.clone();
            // Seed the exported snapshot with the same values.
            if let Some(fm) = blobs.role_output(RegstRole::ForwardModel, name) {
                fm.copy_from(&initialized);
            }
        }
        Ok(())
    }
}

// ==================== collect ====================

/// One observation recorded by [`CollectKernel`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Collected {
    pub piece_id: u64,
    pub model_version_id: Option<u64>,
    pub sum: f32,
}

/// Sums every input blob per piece.
#[derive(Debug, Default)]
pub struct CollectKernel {
    seen: Option<Arc<Mutex<Vec<Collected>>>>,
    pieces: u64,
}

impl CollectKernel {
    /// Record every observation into `seen` as well.
    pub fn shared(seen: Arc<Mutex<Vec<Collected>>>) -> Self {
        Self {
            seen: Some(seen),
            pieces: 0,
        }
    }
}

impl Kernel for CollectKernel {
    fn name(&self) -> &str {
        "collect"
    }

    fn forward(&mut self, ctx: &KernelCtx, blobs: &mut BlobAccessor<'_>) -> ActorResult<()> {
        let sum: f32 = blobs
            .blob_names(RegstRole::Input)
            .iter()
            .filter_map(|name| blobs.role_input(RegstRole::Input, name))
            .map(|b| b.data.iter().sum::<f32>())
            .sum();
        self.pieces += 1;
        tracing::trace!(piece_id = ctx.piece_id, sum, "collected");
        if let Some(seen) = &self.seen {
            seen.lock().push(Collected {
                piece_id: ctx.piece_id,
                model_version_id: ctx.model_version_id,
                sum,
            });
        }
        Ok(())
    }
}

// ==================== sgd_update ====================

/// Accumulates a scalar gradient per piece and applies it whenever a
/// writable model register is bound.
#[derive(Debug)]
pub struct SgdUpdateKernel {
    learning_rate: f32,
    grad_sum: f32,
    pieces: u32,
}

impl Default for SgdUpdateKernel {
    fn default() -> Self {
        Self::with_learning_rate(0.01)
    }
}

impl SgdUpdateKernel {
    pub fn with_learning_rate(learning_rate: f32) -> Self {
        Self {
            learning_rate,
            grad_sum: 0.0,
            pieces: 0,
        }
    }
}

impl Kernel for SgdUpdateKernel {
    fn name(&self) -> &str {
        "sgd_update"
    }

    fn forward(&mut self, _ctx: &KernelCtx, blobs: &mut BlobAccessor<'_>) -> ActorResult<()> {
        if let Some(diff) = blobs.role_input(RegstRole::Input, DATA_BLOB) {
            if !diff.is_empty() {
                self.grad_sum += diff.data.iter().sum::<f32>() / diff.len() as f32;
            }
            self.pieces += 1;
        }

        let mut applied = false;
        for name in blobs.blob_names(RegstRole::Model) {
            let Some(latest) = blobs.role_input(RegstRole::Model, &name).cloned() else {
                continue;
            };
            let Some(next) = blobs.role_output(RegstRole::Model, &name) else {
                continue;
            };
            let step = self.learning_rate * self.grad_sum / self.pieces.max(1) as f32;
            next.copy_from(&latest);
            next.data.iter_mut().for_each(|v| *v -= step);
            applied = true;
        }
        if applied {
            self.grad_sum = 0.0;
            self.pieces = 0;
        }
        Ok(())
    }

    fn init_model_and_const_buf(
        &mut self,
        _ctx: &KernelCtx,
        _rng: &mut StdRng,
        snapshot: Option<&dyn SnapshotReader>,
        blobs: &mut BlobAccessor<'_>,
    ) -> ActorResult<()> {
        let Some(snapshot) = snapshot else {
            return Ok(());
        };
        for name in blobs.blob_names(RegstRole::Model) {
            if let (Some(saved), Some(blob)) = (
                snapshot.read_blob(&name),
                blobs.role_output(RegstRole::Model, &name),
            ) {
                blob.copy_from(&saved);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{
        with_blob_accessor, ActorId, BlobBinding, MemorySnapshot, RegstDesc, RegstDescId,
        RegstStore,
    };
    use rand::SeedableRng;

    fn store(id: u32, blobs: &[&str], len: usize) -> Arc<RegstStore> {
        let mut desc = RegstDesc::new(RegstDescId(id), "r", ActorId(0));
        for name in blobs {
            desc = desc.with_blob(*name, &[len]);
        }
        Arc::new(RegstStore::new(desc))
    }

    fn blob(store: &RegstStore, name: &str) -> Vec<f32> {
        store.read(store.handle(0)).unwrap().blob(name).unwrap().data.clone()
    }

    #[test]
    fn test_registry_builtins() {
        let registry = KernelRegistry::default();
        assert_eq!(
            registry.names(),
            vec!["affine", "collect", "fill_piece", "noop", "sgd_update"]
        );
        assert_eq!(registry.create("affine").unwrap().name(), "affine");
        assert!(matches!(
            registry.create("conv2d"),
            Err(ActorError::UnknownKernel(_))
        ));
    }

    #[test]
    fn test_fill_piece() {
        let out = store(1, &["data"], 3);
        let bindings = [BlobBinding::write(RegstRole::Output, out.clone(), out.handle(0))];
        let ctx = KernelCtx {
            piece_id: 7,
            model_version_id: None,
        };
        with_blob_accessor(&bindings, |b| FillPieceKernel.forward(&ctx, b)).unwrap();
        assert_eq!(blob(&out, "data"), vec![7.0; 3]);
    }

    #[test]
    fn test_affine_forward_and_snapshot_average() {
        let input = store(1, &["data"], 2);
        let model = store(2, &["weight", "bias"], 2);
        let out = store(3, &["data"], 2);
        let fm = store(4, &["weight", "bias"], 2);
        input.write(input.handle(0)).unwrap().blob_mut("data").unwrap().fill(2.0);
        model.write(model.handle(0)).unwrap().blob_mut("weight").unwrap().fill(3.0);
        model.write(model.handle(0)).unwrap().blob_mut("bias").unwrap().fill(1.0);

        let bindings = [
            BlobBinding::read(RegstRole::Input, input.clone(), input.handle(0)),
            BlobBinding::read(RegstRole::Model, model.clone(), model.handle(0)),
            BlobBinding::write(RegstRole::Output, out.clone(), out.handle(0)),
            BlobBinding::write(RegstRole::ForwardModel, fm.clone(), fm.handle(0)),
        ];
        let mut kernel = AffineKernel::with_momentum(0.5);
        with_blob_accessor(&bindings, |b| kernel.forward(&KernelCtx::default(), b)).unwrap();

        assert_eq!(blob(&out, "data"), vec![7.0, 7.0]);
        assert_eq!(blob(&fm, "weight"), vec![1.5, 1.5]);
        assert_eq!(blob(&fm, "bias"), vec![0.5, 0.5]);
    }

    #[test]
    fn test_affine_init_prefers_checkpoint() {
        let model = store(1, &["weight", "bias"], 2);
        let fm = store(2, &["weight", "bias"], 2);
        let snapshot =
            MemorySnapshot::new().with_blob("weight", Blob::from_vec(&[2], vec![0.25, 0.5]));
        let bindings = [
            BlobBinding::write(RegstRole::Model, model.clone(), model.handle(0)),
            BlobBinding::write(RegstRole::ForwardModel, fm.clone(), fm.handle(0)),
        ];
        let mut rng = StdRng::seed_from_u64(1);
        with_blob_accessor(&bindings, |b| {
            AffineKernel::default().init_model_and_const_buf(
                &KernelCtx::default(),
                &mut rng,
                Some(&snapshot as &dyn SnapshotReader),
                b,
            )
        })
        .unwrap();
        assert_eq!(blob(&model, "weight"), vec![0.25, 0.5]);
        assert_eq!(blob(&model, "bias"), vec![0.0, 0.0]);
        assert_eq!(blob(&fm, "weight"), vec![0.25, 0.5]);
    }

    #[test]
    fn test_affine_random_init_in_range() {
        let model = store(1, &["weight"], 16);
        let bindings = [BlobBinding::write(RegstRole::Model, model.clone(), model.handle(0))];
        let mut rng = StdRng::seed_from_u64(3);
        with_blob_accessor(&bindings, |b| {
            let ctx = KernelCtx::default();
            AffineKernel::default().init_model_and_const_buf(&ctx, &mut rng, None, b)
        })
        .unwrap();
        let w = blob(&model, "weight");
        assert!(w.iter().all(|v| (-1.0..1.0).contains(v)));
        assert!(w.iter().any(|v| *v != 0.0));
    }

    #[test]
    fn test_sgd_applies_only_with_writable_model() {
        let diff = store(1, &["data"], 2);
        let latest = store(2, &["weight"], 1);
        let next = store(3, &["weight"], 1);
        diff.write(diff.handle(0)).unwrap().blob_mut("data").unwrap().fill(1.0);
        latest.write(latest.handle(0)).unwrap().blob_mut("weight").unwrap().fill(1.0);

        let mut kernel = SgdUpdateKernel::with_learning_rate(0.5);
        let input_only = [BlobBinding::read(RegstRole::Input, diff.clone(), diff.handle(0))];
        with_blob_accessor(&input_only, |b| kernel.forward(&KernelCtx::default(), b)).unwrap();

        let update = [
            BlobBinding::read(RegstRole::Input, diff.clone(), diff.handle(0)),
            BlobBinding::read(RegstRole::Model, latest.clone(), latest.handle(0)),
            BlobBinding::write(RegstRole::Model, next.clone(), next.handle(0)),
        ];
        with_blob_accessor(&update, |b| kernel.forward(&KernelCtx::default(), b)).unwrap();
        assert_eq!(blob(&next, "weight"), vec![0.5]);
        assert_eq!(blob(&latest, "weight"), vec![1.0]);
    }

    #[test]
    fn test_collect_shares_observations() {
        let input = store(1, &["data"], 2);
        input.write(input.handle(0)).unwrap().blob_mut("data").unwrap().fill(1.5);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut kernel = CollectKernel::shared(seen.clone());
        let bindings = [BlobBinding::read(RegstRole::Input, input.clone(), input.handle(0))];
        let ctx = KernelCtx {
            piece_id: 4,
            model_version_id: Some(1),
        };
        with_blob_accessor(&bindings, |b| kernel.forward(&ctx, b)).unwrap();
        assert_eq!(
            *seen.lock(),
            vec![Collected {
                piece_id: 4,
                model_version_id: Some(1),
                sum: 3.0
            }]
        );
    }
}
