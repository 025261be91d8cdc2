//! Error types for the producer/consumer system.

use std::sync::Arc;

use thiserror::Error;

use crate::token::CancelReason;

/// The main error type for the producer/consumer system.
///
/// Errors are cheap to clone so a coordinator can hand the same failure to
/// its downstream and to its own bookkeeping.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A producer failed on its own
    #[error("source error: {0}")]
    Source(#[source] Arc<dyn std::error::Error + Send + Sync>),

    /// A consumer refused an item or a close, usually because it is already
    /// closed or downstream capacity went away
    #[error("sink rejected input: {reason}")]
    SinkRejection { reason: String },

    /// A pipe was torn down because its token fired for an error reason
    #[error("cancelled: {0}")]
    Cancelled(CancelReason),

    /// Invalid construction arguments
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// No item arrived within the allowed window
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// A custom error with a message
    #[error("{0}")]
    Custom(String),
}

// Convenience constructors
impl Error {
    /// Create a source error from any error type
    pub fn from_source<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Error::Source(Arc::new(error))
    }

    /// Create a sink rejection with a reason
    pub fn sink_rejection<S: Into<String>>(reason: S) -> Self {
        Error::SinkRejection {
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Error::Configuration(message.into())
    }

    /// Create a timeout error
    pub fn timeout(duration_ms: u64) -> Self {
        Error::Timeout { duration_ms }
    }

    /// Create a custom error with a message
    pub fn custom<S: Into<String>>(message: S) -> Self {
        Error::Custom(message.into())
    }

    /// True for the rejection a closed or cancelled consumer returns.
    pub fn is_sink_rejection(&self) -> bool {
        matches!(self, Error::SinkRejection { .. })
    }

    /// True when this error only records a deliberate teardown.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }
}

// Common conversions
impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::sink_rejection("channel closed")
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for Error {
    fn from(e: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Error::Source(Arc::from(e))
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Custom(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Custom(s.to_string())
    }
}

/// Convenience type alias for Results in this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Helper trait for converting errors into our Error type
pub trait IntoError<T> {
    fn into_source_error(self) -> Result<T>;
    fn into_sink_rejection(self) -> Result<T>;
}

impl<T, E> IntoError<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn into_source_error(self) -> Result<T> {
        self.map_err(Error::from_source)
    }

    fn into_sink_rejection(self) -> Result<T> {
        self.map_err(|e| Error::sink_rejection(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_error_keeps_its_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = Error::from_source(io);
        assert_eq!(err.to_string(), "source error: disk gone");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn classifies_rejections_and_cancellations() {
        assert!(Error::sink_rejection("closed").is_sink_rejection());
        assert!(Error::Cancelled(CancelReason::SiblingFailed).is_cancellation());
        assert!(!Error::custom("boom").is_cancellation());
    }

    #[test]
    fn into_error_maps_foreign_errors() {
        let res: std::result::Result<(), std::fmt::Error> = Err(std::fmt::Error);
        assert!(matches!(res.into_source_error(), Err(Error::Source(_))));
        let res: std::result::Result<(), std::fmt::Error> = Err(std::fmt::Error);
        assert!(res.into_sink_rejection().unwrap_err().is_sink_rejection());
    }
}
