//! # Tracescan
//!
//! Trace extraction and trigger search over large, segmented collections of
//! recorded events.
//!
//! ## Features
//!
//! - **Range scans**: per-field (x, y) traces over a decimated event range,
//!   with array fields reduced by element, mean, max or min
//! - **Trigger search**: exhaustive hit counting with result caching, or
//!   single-hit search from a cursor in either direction
//! - **Background execution**: one scan per handler on tokio's blocking pool,
//!   with lock-free progress, cooperative cancellation and poll-based joins
//! - **Segment-aware decoding**: field bindings re-bind explicitly whenever
//!   the store crosses into another segment
//!
//! ## Modules
//!
//! - [`store`]: Event store seam, typed samples, in-memory and JSON stores
//! - [`scan`]: Field registry, timeline and trigger engines, scan handler
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tracescan::config::StoreConfig;
//! use tracescan::scan::{Comparison, ScanHandler, TimelineRequest};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = tracescan::store::load_directory(&StoreConfig::default())?;
//!     let mut handler = ScanHandler::new(store);
//!
//!     // Mean of an array field over every 100th event
//!     handler.activate(["Probe/amplitude"])?;
//!     handler.start_timeline(&TimelineRequest::default().step(100).array_position(-1))?;
//!     let report = handler.wait(Duration::from_millis(100), None).await?;
//!     println!("{} events, {} skipped", report.processed, report.skipped);
//!
//!     // Every event whose amplitude peak exceeds 0.8
//!     handler.start_trigger_search("Probe/amplitude", 0.8, Comparison::Greater, -2)?;
//!     handler.wait(Duration::from_millis(100), None).await?;
//!     println!("First trigger: {:?}", handler.find_next_trigger(0)?);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod scan;
pub mod store;

// Re-export top-level types for convenience
pub use scan::{
    ArraySelector, Comparison, Direction, Reduction, ScanError, ScanHandler, ScanOutcome,
    ScanReport, ScanResult, ScanStatus, StopHandle, TimeAxis, TimelineRequest, Trace,
    TriggerDescriptor,
};

pub use store::{
    load_directory, ElementType, Event, EventStore, FieldSchema, InMemoryStore, Samples,
    SegmentPosition, StoreError, StoreResult, ValueKind,
};

pub use config::{Config, ConfigError, LoggingConfig, ScanConfig, StoreConfig};
