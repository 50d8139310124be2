//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use actorflow::actor::{ActorEvent, ActorId};
use std::time::Duration;

/// Upper bound for threaded runs in tests
pub fn test_timeout() -> Duration {
    Duration::from_secs(20)
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f32, b: f32, epsilon: f32) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}

/// `(piece_id, model_version_id)` of every act of `actor`, in order
pub fn acts_of(events: &[ActorEvent], actor: ActorId) -> Vec<(u64, Option<u64>)> {
    events
        .iter()
        .filter_map(|e| match e {
            ActorEvent::Acted {
                actor: a,
                piece_id,
                model_version_id,
            } if *a == actor => Some((*piece_id, *model_version_id)),
            _ => None,
        })
        .collect()
}

/// Batch ids of every snapshot published by `actor`, in order
pub fn snapshots_of(events: &[ActorEvent], actor: ActorId) -> Vec<u64> {
    events
        .iter()
        .filter_map(|e| match e {
            ActorEvent::SnapshotPublished { actor: a, batch_id } if *a == actor => Some(*batch_id),
            _ => None,
        })
        .collect()
}
