//! Actor-level error types.
//!
//! Every variant here is a wiring or invariant violation. None of them is
//! retried: the scheduler stops the graph when an actor returns one.

use crate::actor::id::{ActorId, RegstDescId, RegstHandle};
use thiserror::Error;

/// Errors raised by actors, register pools and the graph plan.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActorError {
    #[error("Actor {actor} received register of undeclared descriptor {desc_id}")]
    UnknownRegst { actor: ActorId, desc_id: RegstDescId },

    #[error("Actor {actor} received a second const_model register")]
    DuplicateConstModel { actor: ActorId },

    #[error("Actor {actor} received a second model register while initializing")]
    DuplicateModelDuringInit { actor: ActorId },

    #[error(
        "Actor {actor} processed piece {piece_id} past last piece {last_piece_id} of model version {model_version_id}"
    )]
    StalenessExceeded {
        actor: ActorId,
        piece_id: u64,
        model_version_id: u64,
        last_piece_id: u64,
    },

    #[error("Stale register handle {0:?}")]
    StaleHandle(RegstHandle),

    #[error("Register {handle:?} returned to {actor} but it was not borrowed")]
    UnexpectedReturn { actor: ActorId, handle: RegstHandle },

    #[error("Actor {actor} has no readable data register to act on")]
    MissingInput { actor: ActorId },

    #[error("Descriptor {desc_id} is produced by {expected}, not {actual}")]
    WrongProducer {
        desc_id: RegstDescId,
        expected: ActorId,
        actual: ActorId,
    },

    #[error("Descriptor {0} is not registered")]
    UnregisteredDesc(RegstDescId),

    #[error("No actor factory registered for task type {0}")]
    UnknownTaskType(String),

    #[error("No kernel registered under name '{0}'")]
    UnknownKernel(String),

    #[error("Invalid graph plan: {0}")]
    InvalidPlan(String),

    #[error("Invalid job configuration: {0}")]
    InvalidJob(String),

    #[error("Kernel '{kernel}' failed: {message}")]
    Kernel { kernel: String, message: String },
}

impl ActorError {
    /// Build a kernel failure.
    pub fn kernel(kernel: impl Into<String>, message: impl Into<String>) -> Self {
        ActorError::Kernel {
            kernel: kernel.into(),
            message: message.into(),
        }
    }

    /// Graph-wiring defects: raised by a bad plan rather than by a kernel.
    pub fn is_wiring_defect(&self) -> bool {
        !matches!(self, ActorError::Kernel { .. })
    }
}

pub type ActorResult<T> = std::result::Result<T, ActorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_regst_display() {
        let err = ActorError::UnknownRegst {
            actor: ActorId(3),
            desc_id: RegstDescId(17),
        };
        assert_eq!(
            err.to_string(),
            "Actor ActorId(3) received register of undeclared descriptor RegstDescId(17)"
        );
        assert!(err.is_wiring_defect());
    }

    #[test]
    fn test_kernel_error_is_not_wiring() {
        let err = ActorError::kernel("affine", "shape mismatch");
        assert!(!err.is_wiring_defect());
        assert!(err.to_string().contains("shape mismatch"));
    }
}
