//! Timeline Extraction Engine
//!
//! Two modes over the active fields of a session:
//!
//! - **single event**: decode one event and spread every array over its
//!   element index ([`read_event`])
//! - **range scan**: visit `start, start+step, ...` below `end`, reduce each
//!   field to one number per event and collect (x, y) traces
//!   ([`run_range_scan`])

use crate::config::ScanConfig;
use crate::scan::controller::ScanState;
use crate::scan::error::{ScanError, ScanResult};
use crate::scan::session::ScanSession;
use crate::scan::types::{Reduction, ScanOutcome, ScanReport, TimeAxis, Trace};

/// Parameters of a range scan
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineRequest {
    pub start: u64,
    /// Exclusive end; `None` scans to the last event
    pub end: Option<u64>,
    pub step: u64,
    /// `>= 0` element, `-1` mean, `-2` max, `-3` min
    pub array_position: i32,
    pub time_axis: TimeAxis,
}

impl Default for TimelineRequest {
    fn default() -> Self {
        Self {
            start: 0,
            end: None,
            step: 1,
            array_position: 0,
            time_axis: TimeAxis::default(),
        }
    }
}

impl TimelineRequest {
    /// Request with the scan defaults of a config
    pub fn from_config(config: &ScanConfig) -> Self {
        Self {
            step: config.step,
            array_position: config.array_position,
            time_axis: config.time_axis,
            ..Self::default()
        }
    }

    /// Builder method: event range
    pub fn range(mut self, start: u64, end: Option<u64>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    /// Builder method: step between visited events
    pub fn step(mut self, step: u64) -> Self {
        self.step = step;
        self
    }

    /// Builder method: array reduction selector
    pub fn array_position(mut self, position: i32) -> Self {
        self.array_position = position;
        self
    }

    /// Builder method: x axis content
    pub fn time_axis(mut self, time_axis: TimeAxis) -> Self {
        self.time_axis = time_axis;
        self
    }

    /// Validate against a store of `total` events
    pub fn plan(&self, total: u64) -> ScanResult<TimelinePlan> {
        if self.step == 0 {
            return Err(ScanError::InvalidStep);
        }
        let reduction = Reduction::try_from(self.array_position)?;

        let end = match self.end {
            Some(end) if end > total => {
                tracing::warn!(end, total, "Scan end beyond the last event, clamping");
                total
            }
            Some(end) => end,
            None => total,
        };
        let start = self.start.min(end);

        Ok(TimelinePlan {
            start,
            end,
            step: self.step,
            reduction,
            time_axis: self.time_axis,
            expected: (end - start).div_ceil(self.step),
        })
    }
}

/// A validated range scan
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimelinePlan {
    pub start: u64,
    pub end: u64,
    pub step: u64,
    pub reduction: Reduction,
    pub time_axis: TimeAxis,
    /// Number of events the scan visits if nothing is skipped
    pub expected: u64,
}

/// Decode one event and write every active field as a trace over its
/// element index.
///
/// Traces of earlier scans are dropped. A field that fails to decode is
/// logged and left out.
pub fn read_event(session: &mut ScanSession, event: u64) -> ScanResult<ScanReport> {
    let total = session.store.total_events();
    if event >= total {
        return Err(ScanError::EventOutOfRange { event, total });
    }

    let position = session.store.load_segment_for(event)?;
    session.registry.sync_segment(&position);
    session.traces.clear();

    let mut report = ScanReport::new(ScanOutcome::Completed);
    for binding in session.registry.bindings_mut() {
        if let Err(e) = binding.decode(&mut *session.store, &position) {
            if let ScanError::StaleBinding { .. } = e {
                return Err(e);
            }
            tracing::error!(field = binding.name(), event, error = %e, "Failed to read field");
            report.field_errors += 1;
            continue;
        }

        let values = binding.values();
        let trace = Trace {
            x: (0..values.len()).map(|i| i as f64).collect(),
            y: values.iter().collect(),
        };
        session.traces.insert(binding.name().to_string(), trace);
    }

    report.processed = 1;
    Ok(report)
}

/// Run a range scan; called on the background task.
///
/// Checks for a stop request before every event. Traces end up trimmed to
/// the number of events actually filled.
pub fn run_range_scan(
    session: &mut ScanSession,
    plan: &TimelinePlan,
    state: &ScanState,
) -> ScanResult<ScanReport> {
    tracing::debug!(
        start = plan.start,
        end = plan.end,
        step = plan.step,
        expected = plan.expected,
        "Starting range scan"
    );

    session.registry.invalidate();
    let capacity = plan.expected as usize;
    session.traces = session
        .registry
        .names()
        .into_iter()
        .map(|name| (name, Trace::with_len(capacity)))
        .collect();

    let mut report = ScanReport::new(ScanOutcome::Completed);
    let mut filled = 0usize;

    let mut event = plan.start;
    while event < plan.end {
        if state.is_interrupted() {
            tracing::debug!(event, filled, "Range scan interrupted");
            report.outcome = ScanOutcome::Interrupted;
            break;
        }

        let position = match session.store.load_segment_for(event) {
            Ok(position) => position,
            Err(e) => {
                tracing::debug!(event, error = %e, "Skipping event");
                report.skipped += 1;
                event += plan.step;
                continue;
            }
        };
        session.registry.sync_segment(&position);

        let timestamp = if plan.time_axis == TimeAxis::Off {
            None
        } else {
            match session.store.decode_timestamp(position.local_index) {
                Ok(t) => Some(t),
                Err(e) => {
                    tracing::debug!(event, error = %e, "Skipping event without timestamp");
                    report.skipped += 1;
                    event += plan.step;
                    continue;
                }
            }
        };

        for binding in session.registry.bindings_mut() {
            let is_array = binding.is_array();
            let x = match (plan.time_axis, timestamp) {
                (TimeAxis::On, Some(t)) => t,
                (TimeAxis::Auto, Some(t)) if !is_array => t,
                _ => event as f64,
            };

            // A field that cannot be read keeps its x with a NaN value
            let y = match binding.decode(&mut *session.store, &position) {
                Err(e @ ScanError::StaleBinding { .. }) => return Err(e),
                Err(e) => {
                    tracing::error!(field = binding.name(), event, error = %e, "Failed to read field");
                    report.field_errors += 1;
                    f64::NAN
                }
                Ok(_) => match plan.reduction.apply(binding.name(), binding.values(), is_array) {
                    Some(y) => y,
                    None => {
                        tracing::error!(field = binding.name(), event, "Array size is 0");
                        report.field_errors += 1;
                        f64::NAN
                    }
                },
            };

            if let Some(trace) = session.traces.get_mut(binding.name()) {
                trace.set(filled, x, y);
            }
        }

        filled += 1;
        state.set_progress(filled as u64, plan.expected);
        event += plan.step;
    }

    for trace in session.traces.values_mut() {
        trace.truncate(filled);
    }

    if report.skipped > 0 {
        tracing::error!(skipped = report.skipped, "Skipped events due to read errors");
    }
    if report.outcome == ScanOutcome::Completed {
        state.set_percentage(100.0);
    }

    report.processed = filled as u64;
    tracing::debug!(filled, outcome = ?report.outcome, "Range scan finished");
    Ok(report)
}
