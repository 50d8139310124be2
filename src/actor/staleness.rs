//! Staleness-bounded model pipelining.
//!
//! A forward actor may keep computing on model version `v` while newer
//! versions are still being produced, but only up to
//! `last_piece_id_for_model_version(staleness, v)`. At that piece it must hand
//! the model register back so the producer can reuse the slot. Separately, in
//! training mode, the forward-model snapshot is exported at batch boundaries.

use crate::actor::error::{ActorError, ActorResult};
use crate::actor::id::ActorId;
use crate::config::JobConfig;
use std::sync::Arc;

/// What the policy decided after one piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PieceOutcome {
    /// The held model register must be released now.
    pub release_model: bool,
    /// The forward-model snapshot must be published under this batch id.
    pub snapshot_batch: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct StalenessPolicy {
    job: Arc<JobConfig>,
    staleness: Option<u64>,
    current_version: Option<u64>,
    last_piece_processed: Option<u64>,
}

impl StalenessPolicy {
    pub fn new(job: Arc<JobConfig>) -> Self {
        Self {
            job,
            staleness: None,
            current_version: None,
            last_piece_processed: None,
        }
    }

    /// Fix the bound from the model descriptor's slot count. Only the first
    /// call has an effect.
    pub fn fix_bound(&mut self, register_num: usize) -> u64 {
        *self
            .staleness
            .get_or_insert(register_num.saturating_sub(1) as u64)
    }

    pub fn staleness(&self) -> Option<u64> {
        self.staleness
    }

    pub fn current_version(&self) -> Option<u64> {
        self.current_version
    }

    pub fn last_piece_processed(&self) -> Option<u64> {
        self.last_piece_processed
    }

    /// Last piece model version `v` may serve.
    pub fn last_piece_id(&self, model_version_id: u64) -> u64 {
        self.job
            .last_piece_id_for_model_version(self.staleness.unwrap_or(0), model_version_id)
    }

    /// Record that `piece_id` was produced under `model_version_id` (None
    /// when the actor consumes no model) and decide what must follow.
    pub fn after_piece(
        &mut self,
        actor: ActorId,
        piece_id: u64,
        model_version_id: Option<u64>,
        has_forward_model: bool,
    ) -> ActorResult<PieceOutcome> {
        self.current_version = model_version_id;
        self.last_piece_processed = Some(piece_id);

        let mut outcome = PieceOutcome::default();
        if !self.job.is_train {
            return Ok(outcome);
        }

        if let Some(version) = model_version_id {
            let last_piece_id = self.last_piece_id(version);
            if piece_id > last_piece_id {
                return Err(ActorError::StalenessExceeded {
                    actor,
                    piece_id,
                    model_version_id: version,
                    last_piece_id,
                });
            }
            outcome.release_model = piece_id == last_piece_id;
        }

        if has_forward_model && self.job.is_last_piece_in_batch(piece_id) {
            let batch_id = self.job.batch_id(piece_id);
            if self.job.need_model_save(batch_id) {
                outcome.snapshot_batch = Some(batch_id);
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(job: JobConfig) -> StalenessPolicy {
        StalenessPolicy::new(Arc::new(job))
    }

    #[test]
    fn test_bound_is_fixed_once() {
        let mut p = policy(JobConfig::train(4, 10));
        assert_eq!(p.fix_bound(3), 2);
        assert_eq!(p.fix_bound(1), 2);
        assert_eq!(p.staleness(), Some(2));
    }

    #[test]
    fn test_release_at_window_end() {
        let mut p = policy(JobConfig::train(4, 10));
        p.fix_bound(1);
        for piece in 0..3 {
            let out = p.after_piece(ActorId(0), piece, Some(0), false).unwrap();
            assert!(!out.release_model);
        }
        let out = p.after_piece(ActorId(0), 3, Some(0), false).unwrap();
        assert!(out.release_model);
        assert_eq!(p.last_piece_processed(), Some(3));
        assert_eq!(p.current_version(), Some(0));
    }

    #[test]
    fn test_window_grows_with_staleness() {
        let mut p = policy(JobConfig::train(2, 10));
        p.fix_bound(3);
        assert_eq!(p.last_piece_id(0), 5);
        assert!(!p.after_piece(ActorId(0), 4, Some(0), false).unwrap().release_model);
        assert!(p.after_piece(ActorId(0), 5, Some(0), false).unwrap().release_model);
    }

    #[test]
    fn test_exceeding_window_is_fatal() {
        let mut p = policy(JobConfig::train(4, 10));
        p.fix_bound(1);
        let err = p.after_piece(ActorId(7), 4, Some(0), false).unwrap_err();
        assert_eq!(
            err,
            ActorError::StalenessExceeded {
                actor: ActorId(7),
                piece_id: 4,
                model_version_id: 0,
                last_piece_id: 3,
            }
        );
    }

    #[test]
    fn test_snapshot_only_at_saved_batch_end() {
        let mut p = policy(JobConfig::train(2, 4).with_batches_per_snapshot(2));
        let outcomes: Vec<_> = (0..8)
            .map(|piece| p.after_piece(ActorId(0), piece, None, true).unwrap().snapshot_batch)
            .collect();
        assert_eq!(
            outcomes,
            vec![None, None, None, Some(1), None, None, None, Some(3)]
        );
    }

    #[test]
    fn test_inference_never_releases_or_snapshots() {
        let mut p = policy(JobConfig::inference(1, 4));
        p.fix_bound(1);
        for piece in 0..8 {
            let out = p.after_piece(ActorId(0), piece, Some(0), true).unwrap();
            assert_eq!(out, PieceOutcome::default());
        }
    }
}
