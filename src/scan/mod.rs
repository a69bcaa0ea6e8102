//! Scan Engine
//!
//! Extracts traces from a segmented event store and searches it for
//! triggers, in the background with progress and cancellation.
//!
//! - **registry**: Active fields and their per-segment decode bindings
//! - **timeline**: Single-event reads and range scans
//! - **trigger**: Exhaustive and single-hit trigger searches
//! - **controller**: Background task, shared progress and stop flags
//! - **handler**: Facade tying a store, a session and a controller together
//!
//! # Example
//!
//! ```no_run
//! use tracescan::scan::{ScanHandler, TimelineRequest};
//! use tracescan::store::InMemoryStore;
//! use std::time::Duration;
//!
//! # async fn run(store: InMemoryStore) -> Result<(), Box<dyn std::error::Error>> {
//! let mut handler = ScanHandler::new(store);
//! handler.activate(["probe.amplitude"])?;
//! handler.start_timeline(&TimelineRequest::default().step(10))?;
//!
//! let report = handler.wait(Duration::from_millis(100), None).await?;
//! let trace = handler.trace("probe.amplitude")?;
//! # Ok(())
//! # }
//! ```

pub mod controller;
pub mod error;
pub mod handler;
pub mod registry;
pub mod session;
pub mod timeline;
pub mod trigger;
pub mod types;

pub use controller::{Polled, ScanController, ScanState, StopHandle};
pub use error::{ScanError, ScanResult};
pub use handler::ScanHandler;
pub use registry::{normalize_field_name, FieldBinding, FieldRegistry};
pub use session::ScanSession;
pub use timeline::{TimelinePlan, TimelineRequest};
pub use trigger::TriggerDescriptor;
pub use types::{
    ArraySelector, Comparison, Direction, Reduction, ScanOutcome, ScanReport, ScanStatus,
    TimeAxis, Trace,
};
