//! # Error Types
//!
//! Structured error handling for the worker runtime using thiserror
//! for typed errors instead of `Box<dyn Error>` patterns.
//!
//! Handler-level failures are deliberately *not* represented here: a failing
//! handler is normalized into a [`crate::response::Response`] at the dispatch
//! boundary and never surfaces as a `WorkerError`.

use thiserror::Error;

use crate::codec::CodecError;

/// Errors surfaced by the worker runtime (connection, routing, transport).
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Connection attempts to the broker were exhausted. Fatal: the runner
    /// does not retry beyond the connection manager's own policy.
    #[error("broker connection failed after {attempts} attempts: {message}")]
    ConnectionExhausted { attempts: u32, message: String },

    #[error("broker channel error: {operation}: {message}")]
    Channel { operation: String, message: String },

    #[error("queue operation failed: {queue}: {operation}: {message}")]
    QueueOperation {
        queue: String,
        operation: String,
        message: String,
    },

    #[error("publish to {destination} failed: {message}")]
    Publish {
        destination: String,
        message: String,
    },

    /// A route path was registered twice on the same worker.
    #[error("duplicate route path: {path}")]
    DuplicateRoute { path: String },

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// An RPC reply never arrived because the underlying channel closed.
    #[error("reply channel closed for correlation id {correlation_id}")]
    ReplyChannelClosed { correlation_id: String },
}

impl WorkerError {
    /// Create a connection-exhausted error
    pub fn connection_exhausted(attempts: u32, message: impl Into<String>) -> Self {
        Self::ConnectionExhausted {
            attempts,
            message: message.into(),
        }
    }

    /// Create a channel error
    pub fn channel(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Channel {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a queue operation error
    pub fn queue_operation(
        queue: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::QueueOperation {
            queue: queue.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a publish error
    pub fn publish(destination: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Publish {
            destination: destination.into(),
            message: message.into(),
        }
    }

    /// Create a duplicate route error
    pub fn duplicate_route(path: impl Into<String>) -> Self {
        Self::DuplicateRoute { path: path.into() }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, WorkerError>;
