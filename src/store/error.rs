//! Event store error types
//!
//! Defines all errors that can occur while positioning, describing or
//! decoding events in an event store.

use thiserror::Error;

/// Errors that can occur in an event store adapter
#[derive(Error, Debug)]
pub enum StoreError {
    /// The segment holding the requested event could not be loaded
    #[error("Failed to load segment for event {event}: {reason}")]
    SegmentLoad { event: u64, reason: String },

    /// Requested field does not exist in the store
    #[error("Field not found: {0}")]
    UnknownField(String),

    /// A decode was attempted before any segment was loaded
    #[error("No segment loaded")]
    NotLoaded,

    /// The raw value of a field could not be decoded for an event
    #[error("Failed to decode {field} at local event {local_index}: {reason}")]
    Decode {
        field: String,
        local_index: u64,
        reason: String,
    },

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A segment file could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// No segment file survived the directory filters
    #[error("No segment files found in {0:?}")]
    NoSegments(std::path::PathBuf),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Parse(err.to_string())
    }
}

/// Result type alias for event store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::UnknownField("probe.amplitude".to_string());
        assert_eq!(err.to_string(), "Field not found: probe.amplitude");

        let err = StoreError::SegmentLoad {
            event: 42,
            reason: "file truncated".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to load segment for event 42: file truncated"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let store_err: StoreError = io_err.into();
        assert!(matches!(store_err, StoreError::Io(_)));
    }
}
