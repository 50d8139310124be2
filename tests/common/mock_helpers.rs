//! Mock construction helpers

use actorflow::actor::{Blob, SnapshotReader};
use mockall::mock;

mock! {
    pub Checkpoint {}

    impl SnapshotReader for Checkpoint {
        fn read_blob(&self, name: &str) -> Option<Blob>;
    }
}

/// Checkpoint serving `weight` filled with `value` and nothing else
pub fn checkpoint_with_weight(features: usize, value: f32) -> MockCheckpoint {
    let mut checkpoint = MockCheckpoint::new();
    checkpoint
        .expect_read_blob()
        .returning(move |name| match name {
            "weight" => Some(Blob::from_vec(&[features], vec![value; features])),
            _ => None,
        });
    checkpoint
}
