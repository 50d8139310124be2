//! Error handling for actorflow
//!
//! This module defines the crate-level error type and a Result alias for use
//! outside the actor hot path (configuration, plan loading, the runtime).

use crate::actor::ActorError;
use thiserror::Error;

/// Main error type for actorflow operations
#[derive(Error, Debug)]
pub enum ActorFlowError {
    /// Wiring or invariant violation raised by an actor
    #[error("Actor error: {0}")]
    Actor(#[from] ActorError),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to channel communication
    #[error("Channel error: {0}")]
    Channel(String),

    /// The runtime thread of an actor panicked
    #[error("Actor thread '{0}' panicked")]
    ThreadPanic(String),

    /// An actor failed and the graph was stopped
    #[error("Graph aborted: {0}")]
    Aborted(String),

    /// Timeout errors
    #[error("Timeout: {0}")]
    Timeout(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<ActorFlowError>,
    },
}

impl ActorFlowError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        ActorFlowError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The actor error at the root of this error, if any
    pub fn actor_error(&self) -> Option<&ActorError> {
        match self {
            ActorFlowError::Actor(e) => Some(e),
            ActorFlowError::WithContext { source, .. } => source.actor_error(),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for ActorFlowError {
    fn from(err: toml::de::Error) -> Self {
        ActorFlowError::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for ActorFlowError {
    fn from(err: toml::ser::Error) -> Self {
        ActorFlowError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for ActorFlowError {
    fn from(err: serde_json::Error) -> Self {
        ActorFlowError::Serialization(err.to_string())
    }
}

/// Result type alias for actorflow operations
pub type Result<T> = std::result::Result<T, ActorFlowError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<ActorFlowError>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }
}
