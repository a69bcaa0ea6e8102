//! Directory of JSON segment files
//!
//! Each `*.json` file in the data directory is one segment:
//!
//! ```json
//! {
//!   "fields": { "probe.amplitude": { "kind": "array", "type": "float32" } },
//!   "events": [
//!     { "timestamp": 1527500000.25, "values": { "probe.amplitude": [0.1, 0.4] } }
//!   ]
//! }
//! ```
//!
//! Fields missing from `fields` are inferred from the first value seen:
//! numbers become `float64`, booleans become `bool`.

use crate::config::StoreConfig;
use crate::store::error::{StoreError, StoreResult};
use crate::store::memory::{Event, InMemoryStore};
use crate::store::types::{ElementType, FieldSchema, Samples, ValueKind};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct SegmentFile {
    #[serde(default)]
    fields: BTreeMap<String, FieldSchema>,
    #[serde(default)]
    events: Vec<RawEvent>,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    timestamp: f64,
    #[serde(default)]
    values: HashMap<String, RawValue>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawValue {
    Number(f64),
    Flag(bool),
    Numbers(Vec<f64>),
    Flags(Vec<bool>),
}

impl RawValue {
    fn inferred_schema(&self) -> FieldSchema {
        match self {
            RawValue::Number(_) => FieldSchema::scalar("float64"),
            RawValue::Flag(_) => FieldSchema::scalar("bool"),
            RawValue::Numbers(_) => FieldSchema::array("float64"),
            RawValue::Flags(_) => FieldSchema::array("bool"),
        }
    }

    fn into_samples(self, schema: &FieldSchema) -> Samples {
        // Unsupported declared types are kept as float64; activation rejects them.
        let element = ElementType::from_type_name(&schema.type_name).unwrap_or(ElementType::Float64);
        let values: Vec<f64> = match self {
            RawValue::Number(v) => vec![v],
            RawValue::Flag(b) => vec![if b { 1.0 } else { 0.0 }],
            RawValue::Numbers(v) => v,
            RawValue::Flags(v) => v.into_iter().map(|b| if b { 1.0 } else { 0.0 }).collect(),
        };
        Samples::from_f64(element, &values)
    }
}

/// A parsed segment file, ready to be appended to a store
struct LoadedSegment {
    path: PathBuf,
    fields: BTreeMap<String, FieldSchema>,
    events: Vec<RawEvent>,
}

impl LoadedSegment {
    fn first_timestamp(&self) -> f64 {
        self.events.first().map(|e| e.timestamp).unwrap_or(f64::INFINITY)
    }

    fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Check whether a file name matches one of the match strings.
///
/// An empty list matches everything.
pub fn matches_any(file: &str, match_strings: &[String]) -> bool {
    match_strings.is_empty() || match_strings.iter().any(|m| file.contains(m.as_str()))
}

fn read_segment(path: &Path) -> StoreResult<LoadedSegment> {
    let content = std::fs::read_to_string(path)?;
    let file: SegmentFile = serde_json::from_str(&content)
        .map_err(|e| StoreError::Parse(format!("{}: {}", path.display(), e)))?;

    Ok(LoadedSegment {
        path: path.to_path_buf(),
        fields: file.fields,
        events: file.events,
    })
}

/// Build an in-memory store from the segment files in `config.data_dir`.
///
/// Files are filtered by `match_strings`, ordered by name or by the timestamp
/// of their first event, and only the latest `max_files` are kept.
pub fn load_directory(config: &StoreConfig) -> StoreResult<InMemoryStore> {
    let dir = Path::new(&config.data_dir);
    if !dir.is_dir() {
        return Err(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} is not a directory", dir.display()),
        )));
    }

    if !config.match_strings.is_empty() {
        tracing::info!(match_strings = ?config.match_strings, "Filtering segment files");
    }

    let mut segments = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().map(|e| e != "json").unwrap_or(true) {
            continue;
        }
        if !matches_any(&path.to_string_lossy(), &config.match_strings) {
            continue;
        }
        segments.push(read_segment(&path)?);
    }

    if segments.is_empty() {
        tracing::error!(
            dir = %dir.display(),
            "No segment files found. Maybe the match strings did not match any file"
        );
        return Err(StoreError::NoSegments(dir.to_path_buf()));
    }

    if config.sort_by_time {
        segments.sort_by(|a, b| {
            a.first_timestamp()
                .total_cmp(&b.first_timestamp())
                .then_with(|| a.path.cmp(&b.path))
        });
    } else {
        segments.sort_by(|a, b| a.path.cmp(&b.path));
    }

    if config.max_files > 0 && config.max_files < segments.len() {
        segments.drain(..segments.len() - config.max_files);
    }

    let mut schema: BTreeMap<String, FieldSchema> = BTreeMap::new();
    let mut store = InMemoryStore::new();

    for segment in segments {
        tracing::info!(
            file = %segment.path.display(),
            first_timestamp = segment.first_timestamp(),
            events = segment.events.len(),
            "Adding segment"
        );

        for (name, field) in &segment.fields {
            schema.entry(name.clone()).or_insert_with(|| field.clone());
        }

        let name = segment.name();
        let mut events = Vec::with_capacity(segment.events.len());
        for raw in segment.events {
            let mut event = Event::new(raw.timestamp);
            for (field, value) in raw.values {
                let field_schema = schema
                    .entry(field.clone())
                    .or_insert_with(|| value.inferred_schema())
                    .clone();
                event.values.insert(field, value.into_samples(&field_schema));
            }
            events.push(event);
        }
        store.push_segment(name, events);
    }

    for (name, field) in schema {
        if field.kind == ValueKind::Array {
            tracing::debug!(field = %name, element = %field.type_name, "Array field");
        }
        store.declare_field(name, field);
    }

    Ok(store)
}
