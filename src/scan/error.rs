//! Scan engine error types

use crate::store::StoreError;
use thiserror::Error;

/// Errors that can occur while configuring or running a scan
#[derive(Error, Debug)]
pub enum ScanError {
    /// Field is not known to the store, or was never activated
    #[error("Unknown field: {0}")]
    UnknownField(String),

    /// Field has a declared type with no mapped element kind
    #[error("Unsupported type {type_name} for field {field}")]
    UnsupportedType { field: String, type_name: String },

    /// Array position selector outside the allowed values
    #[error("Invalid array position {0}: allowed are >= 0, -1 (mean), -2 (max), -3 (min){1}")]
    InvalidSelector(i32, &'static str),

    /// Comparison operator other than '>', '<' or '='
    #[error("Invalid comparison operator: {0}")]
    InvalidComparison(String),

    /// Step between visited events must be positive
    #[error("Invalid step: must be at least 1")]
    InvalidStep,

    /// Event index outside the store
    #[error("Event {event} out of range (total: {total})")]
    EventOutOfRange { event: u64, total: u64 },

    /// A scan is running or has not been joined by a completion poll
    #[error("A scan is still in flight; poll until done before starting another")]
    Busy,

    /// Waiting on a handler that never started a scan
    #[error("No scan has been started")]
    Idle,

    /// No trigger search has completed yet
    #[error("No trigger search result available")]
    NoTriggerResult,

    /// The engine panicked; the session was recovered
    #[error("Scan engine panicked: {0}")]
    EnginePanicked(String),

    /// The background task was lost together with the scan session
    #[error("Scan session lost: {0}")]
    SessionLost(String),

    /// A field binding was read after a segment change without re-binding
    #[error("Binding for {field} is stale (bound to segment {bound:?}, current {current})")]
    StaleBinding {
        field: String,
        bound: Option<usize>,
        current: usize,
    },

    /// Event store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for scan operations
pub type ScanResult<T> = Result<T, ScanError>;
