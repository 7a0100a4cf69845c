//! Error taxonomy for the ingestion pipeline.
//!
//! Each component returns its own error type. Only [`IngestionPipeline`]
//! decides which of them abandon a message and which are absorbed.
//!
//! [`IngestionPipeline`]: crate::pipeline::IngestionPipeline

use std::time::Duration;
use thiserror::Error;

/// Errors raised while decoding a raw queue payload
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Payload is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Expected a JSON array at {path}")]
    NotAnArray { path: String },

    #[error("Expected {expected} elements at {path}, found {found}")]
    WrongLength {
        path: String,
        expected: usize,
        found: usize,
    },

    #[error("Value at {path} is not a number: {value}")]
    NotANumber { path: String, value: String },

    #[error("Value at {path} is not finite: {value}")]
    NotFinite { path: String, value: String },

    #[error("Value at {path} is not a 0/1 flag: {value}")]
    NotAFlag { path: String, value: String },
}

/// Errors raised when a reading cannot be projected into a document
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    #[error("Field group {field} has {found} values, expected {expected}")]
    ShapeMismatch {
        field: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Field {field} is not finite")]
    NonFinite { field: &'static str },
}

/// Errors raised while delivering an alert notification.
///
/// Never fatal: the dispatcher logs these and reports a
/// [`DispatchResult::Failed`](crate::notifier::DispatchResult::Failed).
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Notification request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Notification service responded with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Notifier is missing {0}")]
    NotConfigured(&'static str),
}

/// Errors raised by the document store
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to serialize document: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store write timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors raised by the message queue client
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to create queue client: {0}")]
    Creation(String),

    #[error("Failed to receive message: {0}")]
    Receive(String),

    #[error("Failed to acknowledge message {message_id}: {reason}")]
    Acknowledge { message_id: String, reason: String },

    #[error("Failed to release message {message_id}: {reason}")]
    Release { message_id: String, reason: String },

    #[error("Failed to dead-letter message {message_id}: {reason}")]
    DeadLetter { message_id: String, reason: String },
}

/// Reasons a single message was abandoned by the pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("Build failed: {0}")]
    Build(#[from] BuildError),

    #[error("Persist failed: {0}")]
    Persist(#[from] PersistError),

    #[error("Queue failure: {0}")]
    Queue(#[from] QueueError),
}

impl PipelineError {
    /// Whether the payload itself is bad, so redelivery cannot help
    pub fn is_poison(&self) -> bool {
        matches!(self, PipelineError::Decode(_) | PipelineError::Build(_))
    }
}
