//! Segmented in-memory event store
//!
//! Events are grouped into segments, each standing in for one file of a
//! recorded run. Segments can be marked unreadable to reproduce load
//! failures of damaged files.

use crate::store::error::{StoreError, StoreResult};
use crate::store::types::{FieldSchema, Samples};
use crate::store::{EventStore, SegmentPosition};
use std::collections::{BTreeMap, HashMap};

/// One recorded event
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Seconds since the epoch, sub-second fraction included
    pub timestamp: f64,
    /// Field values keyed by field name
    pub values: HashMap<String, Samples>,
}

impl Event {
    pub fn new(timestamp: f64) -> Self {
        Self {
            timestamp,
            values: HashMap::new(),
        }
    }

    /// Builder method: add a field value
    pub fn value(mut self, field: impl Into<String>, samples: impl Into<Samples>) -> Self {
        self.values.insert(field.into(), samples.into());
        self
    }
}

#[derive(Debug)]
struct MemorySegment {
    name: String,
    first_event: u64,
    events: Vec<Event>,
    readable: bool,
}

/// Event store keeping all segments in memory
#[derive(Debug, Default)]
pub struct InMemoryStore {
    schema: BTreeMap<String, FieldSchema>,
    segments: Vec<MemorySegment>,
    total: u64,
    current: Option<usize>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: declare a field
    pub fn field(mut self, name: impl Into<String>, schema: FieldSchema) -> Self {
        self.declare_field(name, schema);
        self
    }

    /// Builder method: append a segment
    pub fn segment(mut self, name: impl Into<String>, events: Vec<Event>) -> Self {
        self.push_segment(name, events);
        self
    }

    /// Declare a field, replacing any previous declaration with the same name
    pub fn declare_field(&mut self, name: impl Into<String>, schema: FieldSchema) {
        self.schema.insert(name.into(), schema);
    }

    /// Append a segment and return its index
    pub fn push_segment(&mut self, name: impl Into<String>, events: Vec<Event>) -> usize {
        let first_event = self.total;
        self.total += events.len() as u64;
        self.segments.push(MemorySegment {
            name: name.into(),
            first_event,
            events,
            readable: true,
        });
        self.segments.len() - 1
    }

    /// Mark a segment as (un)readable; loading an unreadable segment fails
    pub fn set_readable(&mut self, segment: usize, readable: bool) {
        if let Some(s) = self.segments.get_mut(segment) {
            s.readable = readable;
        }
    }

    /// Name of a segment
    pub fn segment_name(&self, segment: usize) -> Option<&str> {
        self.segments.get(segment).map(|s| s.name.as_str())
    }

    /// Number of events in each segment, in order
    pub fn segment_lengths(&self) -> Vec<u64> {
        self.segments.iter().map(|s| s.events.len() as u64).collect()
    }

    /// Timestamp of the first event of the first non-empty segment
    pub fn first_timestamp(&self) -> Option<f64> {
        self.segments
            .iter()
            .find_map(|s| s.events.first())
            .map(|e| e.timestamp)
    }

    /// Timestamp of the last event of the last non-empty segment
    pub fn last_timestamp(&self) -> Option<f64> {
        self.segments
            .iter()
            .rev()
            .find_map(|s| s.events.last())
            .map(|e| e.timestamp)
    }

    fn loaded(&self, local_index: u64) -> StoreResult<&Event> {
        let segment = self
            .current
            .and_then(|idx| self.segments.get(idx))
            .ok_or(StoreError::NotLoaded)?;

        segment
            .events
            .get(local_index as usize)
            .ok_or_else(|| StoreError::Decode {
                field: "<event>".to_string(),
                local_index,
                reason: format!(
                    "local index out of range for segment {} ({} events)",
                    segment.name,
                    segment.events.len()
                ),
            })
    }
}

impl EventStore for InMemoryStore {
    fn total_events(&self) -> u64 {
        self.total
    }

    fn segment_count(&self) -> usize {
        self.segments.len()
    }

    fn field_names(&self) -> Vec<String> {
        self.schema.keys().cloned().collect()
    }

    fn load_segment_for(&mut self, event: u64) -> StoreResult<SegmentPosition> {
        if event >= self.total {
            return Err(StoreError::SegmentLoad {
                event,
                reason: format!("event out of range (total: {})", self.total),
            });
        }

        // Last segment starting at or before the event; empty segments share
        // their start with the next one and are never selected.
        let idx = self
            .segments
            .partition_point(|s| s.first_event <= event)
            .saturating_sub(1);
        let segment = &self.segments[idx];

        if !segment.readable {
            return Err(StoreError::SegmentLoad {
                event,
                reason: format!("segment {} is not readable", segment.name),
            });
        }

        let changed = self.current != Some(idx);
        if changed {
            tracing::trace!(segment = %segment.name, "Loaded segment");
        }
        self.current = Some(idx);

        Ok(SegmentPosition {
            local_index: event - segment.first_event,
            segment: idx,
            changed,
        })
    }

    fn schema_of(&self, field: &str) -> StoreResult<FieldSchema> {
        self.schema
            .get(field)
            .cloned()
            .ok_or_else(|| StoreError::UnknownField(field.to_string()))
    }

    fn decode_field(&mut self, field: &str, local_index: u64) -> StoreResult<Samples> {
        if !self.schema.contains_key(field) {
            return Err(StoreError::UnknownField(field.to_string()));
        }

        let event = self.loaded(local_index)?;
        event
            .values
            .get(field)
            .cloned()
            .ok_or_else(|| StoreError::Decode {
                field: field.to_string(),
                local_index,
                reason: "no value recorded".to_string(),
            })
    }

    fn decode_timestamp(&mut self, local_index: u64) -> StoreResult<f64> {
        self.loaded(local_index).map(|e| e.timestamp)
    }
}
