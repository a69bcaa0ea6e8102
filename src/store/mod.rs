//! Event Store Adapters
//!
//! The scan engine reads events through the [`EventStore`] trait:
//!
//! - **types**: Field schemas and the typed `Samples` union
//! - **memory**: Segmented in-memory store
//! - **json**: Builds an in-memory store from a directory of JSON segment files
//! - **error**: Error types
//!
//! # Addressing
//!
//! ```text
//! global index:   0 1 2 3 4 | 5 6 7 | 8 9 ...
//! segment:        0         | 1     | 2
//! local index:    0 1 2 3 4 | 0 1 2 | 0 1 ...
//! ```
//!
//! Callers position the store with [`EventStore::load_segment_for`] and then
//! decode fields by local index. The returned [`SegmentPosition`] reports
//! whether the backing segment changed since the previous positioning, which
//! is the cue to re-bind any per-segment decode state.

pub mod error;
pub mod json;
pub mod memory;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use json::load_directory;
pub use memory::{Event, InMemoryStore};
pub use types::{ElementType, FieldSchema, Samples, ValueKind};

/// Result of positioning a store at a global event index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentPosition {
    /// Index of the event within its segment
    pub local_index: u64,
    /// Segment that holds the event
    pub segment: usize,
    /// True if a different segment was loaded by this call
    pub changed: bool,
}

/// An ordered, 0-based, fixed-length sequence of events spread over segments.
///
/// Stores are driven from a single background task at a time and therefore
/// only need to be `Send`.
pub trait EventStore: Send + 'static {
    /// Total number of events across all segments
    fn total_events(&self) -> u64;

    /// Number of segments (files) backing the store
    fn segment_count(&self) -> usize;

    /// Names of all fields the store can decode
    fn field_names(&self) -> Vec<String>;

    /// Load the segment containing `event` and return the local index.
    ///
    /// Fails with [`StoreError::SegmentLoad`] if the segment cannot be read;
    /// callers treat this as a skippable event.
    fn load_segment_for(&mut self, event: u64) -> StoreResult<SegmentPosition>;

    /// Declared schema of a field
    fn schema_of(&self, field: &str) -> StoreResult<FieldSchema>;

    /// Decode the value(s) of `field` for an event of the loaded segment
    fn decode_field(&mut self, field: &str, local_index: u64) -> StoreResult<Samples>;

    /// Decode the timestamp of an event of the loaded segment, in seconds
    fn decode_timestamp(&mut self, local_index: u64) -> StoreResult<f64>;
}
