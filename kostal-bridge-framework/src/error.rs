//! Error types for the bridge framework.

use thiserror::Error;

/// Result type alias using [`BridgeError`].
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur in a bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// A sink rejected a measurement.
    #[error("Sink '{sink}' failed: {message}")]
    Sink { sink: String, message: String },

    /// The primary time-series target rejected a write.
    #[error("Write to {target} failed: {message}")]
    Write { target: String, message: String },

    /// The durable backlog could not be read or written.
    #[error("Backlog error at {path}: {message}")]
    Backlog { path: String, message: String },

    /// The inverter could not be read.
    #[error("Inverter read failed: {0}")]
    Inverter(String),

    /// Publishing to the message bus failed.
    #[error("Failed to publish to {topic}: {message}")]
    Publish { topic: String, message: String },

    /// Measurement encoding error.
    #[error(transparent)]
    Common(#[from] kostal_common::Error),

    /// Worker error.
    #[error("Worker error: {0}")]
    Worker(String),

    /// Generic error with context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl BridgeError {
    /// Create a sink error.
    pub fn sink(sink: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Sink {
            sink: sink.into(),
            message: message.into(),
        }
    }

    /// Create a write error.
    pub fn write(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Write {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Create a backlog error.
    pub fn backlog(path: impl AsRef<std::path::Path>, message: impl ToString) -> Self {
        Self::Backlog {
            path: path.as_ref().display().to_string(),
            message: message.to_string(),
        }
    }

    /// Create a worker error.
    pub fn worker(msg: impl Into<String>) -> Self {
        Self::Worker(msg.into())
    }

    /// Wrap an error with context.
    pub fn with_context<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::WithContext {
            context: context.into(),
            source: Box::new(source),
        }
    }
}
