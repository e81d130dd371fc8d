//! Error types for mlsdk-core
//!
//! Only structural misuse and validation problems surface as [`Error`].
//! Failed deliveries are recorded as [`crate::types::DeliveryOutcome`]s in the
//! session history instead.

use thiserror::Error;

/// Main error type for the mlsdk-core library
#[derive(Error, Debug)]
pub enum Error {
    /// A message was enqueued before the session had a live queue
    #[error("session is not started; start the session before enqueueing messages")]
    NotStarted,

    /// The session already ended and cannot be restarted
    #[error("session has ended and cannot be restarted")]
    SessionEnded,

    /// Event name or property validation failed
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// Bounded delivery queue is full
    #[error("delivery queue is full ({capacity} pending messages)")]
    QueueFull { capacity: usize },

    /// Lifecycle method called outside of a tokio runtime
    #[error("no tokio runtime available to run the delivery worker")]
    NoRuntime,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport construction error
    #[error("transport error: {0}")]
    Transport(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type alias for mlsdk-core
pub type Result<T> = std::result::Result<T, Error>;
