//! Trigger Search Engine
//!
//! A [`TriggerDescriptor`] holds one condition (`field <op> threshold` under
//! an array selector) together with its search state. Two modes:
//!
//! - **exhaustive**: visits every event and counts the hits per event. The
//!   last complete exhaustive search is kept and an equivalent request is
//!   answered from it without touching the store.
//! - **single hit**: walks from one event past the caller's cursor in one
//!   direction and stops at the first hit. Never cached.
//!
//! The descriptor of a running search lives in the session's `current` slot
//! and is moved into the `last` slot when the search ends.

use crate::scan::controller::ScanState;
use crate::scan::error::{ScanError, ScanResult};
use crate::scan::registry::normalize_field_name;
use crate::scan::session::ScanSession;
use crate::scan::types::{ArraySelector, Comparison, Direction, Reduction, ScanOutcome, ScanReport};
use crate::store::Samples;

/// A trigger condition and the state of its search
#[derive(Debug)]
pub struct TriggerDescriptor {
    field: String,
    comparison: Comparison,
    threshold: f64,
    selector: ArraySelector,
    direction: Direction,
    simple_search: bool,
    /// Event the single-hit search starts next to
    origin: u64,
    next_event: Option<u64>,
    /// Hit count per event; exhaustive searches only
    hits: Vec<u32>,
    complete: bool,
}

impl TriggerDescriptor {
    /// Condition for a search over all events
    pub fn exhaustive(
        field: &str,
        comparison: Comparison,
        threshold: f64,
        selector: ArraySelector,
    ) -> Self {
        Self {
            field: normalize_field_name(field),
            comparison,
            threshold,
            selector,
            direction: Direction::Forward,
            simple_search: false,
            origin: 0,
            next_event: None,
            hits: Vec::new(),
            complete: false,
        }
    }

    /// Condition for a search for the first hit next to `current_event`
    pub fn single_hit(
        field: &str,
        comparison: Comparison,
        threshold: f64,
        selector: ArraySelector,
        current_event: u64,
        direction: Direction,
    ) -> Self {
        Self {
            direction,
            simple_search: true,
            origin: current_event,
            ..Self::exhaustive(field, comparison, threshold, selector)
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn comparison(&self) -> Comparison {
        self.comparison
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn selector(&self) -> ArraySelector {
        self.selector
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_simple_search(&self) -> bool {
        self.simple_search
    }

    /// True if the search visited its whole range without being stopped
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Hit found by a single-hit search
    pub fn next_event(&self) -> Option<u64> {
        self.next_event
    }

    /// Hit counts per event of an exhaustive search
    pub fn hits(&self) -> &[u32] {
        &self.hits
    }

    /// Two exhaustive searches for the same condition
    pub fn is_equivalent(&self, other: &TriggerDescriptor) -> bool {
        !self.simple_search
            && !other.simple_search
            && self.field == other.field
            && self.comparison == other.comparison
            && self.threshold == other.threshold
            && self.selector == other.selector
    }

    /// Total number of hits
    pub fn trigger_count(&self) -> u64 {
        if self.simple_search {
            self.next_event.is_some() as u64
        } else {
            self.hits.iter().map(|&h| h as u64).sum()
        }
    }

    /// Events with at least one hit, ascending
    pub fn triggered_events(&self) -> Vec<u64> {
        if self.simple_search {
            return self.next_event.into_iter().collect();
        }
        self.hits
            .iter()
            .enumerate()
            .filter(|&(_, &h)| h > 0)
            .map(|(i, _)| i as u64)
            .collect()
    }

    /// First hit after `from` (exclusive).
    ///
    /// A single-hit search already ran in its direction and answers with its
    /// hit.
    pub fn find_next(&self, from: u64) -> Option<u64> {
        if self.simple_search {
            return self.next_event;
        }
        let start = (from as usize).saturating_add(1);
        self.hits
            .get(start..)?
            .iter()
            .position(|&h| h > 0)
            .map(|offset| (start + offset) as u64)
    }

    /// Last hit before `from` (exclusive)
    pub fn find_previous(&self, from: u64) -> Option<u64> {
        if self.simple_search {
            return self.next_event;
        }
        let end = (from as usize).min(self.hits.len());
        self.hits[..end].iter().rposition(|&h| h > 0).map(|i| i as u64)
    }

    /// Test the decoded values of one event; counts hits in exhaustive mode
    fn evaluate(&mut self, event: u64, samples: &Samples, is_array: bool) -> bool {
        let count = match self.selector {
            ArraySelector::AnyElement => samples
                .iter()
                .filter(|&v| self.comparison.holds(v, self.threshold))
                .count() as u32,
            ArraySelector::Reduce(reduction) => {
                match reduction.apply(&self.field, samples, is_array) {
                    Some(v) => self.comparison.holds(v, self.threshold) as u32,
                    None => {
                        tracing::error!(field = %self.field, event, "Array size is 0 in trigger decision");
                        0
                    }
                }
            }
        };

        if !self.simple_search {
            if let Some(hits) = self.hits.get_mut(event as usize) {
                *hits += count;
            }
        }
        count > 0
    }
}

/// Run the search of the session's current descriptor; called on the
/// background task.
///
/// The descriptor ends up in the `last` slot unless the search was answered
/// from the cache or refused.
pub fn run_trigger_search(session: &mut ScanSession, state: &ScanState) -> ScanResult<ScanReport> {
    let mut trigger = session
        .current_trigger
        .take()
        .ok_or(ScanError::NoTriggerResult)?;

    if !trigger.simple_search {
        if let Some(last) = &session.last_trigger {
            if last.is_complete() && last.is_equivalent(&trigger) {
                tracing::info!(field = %trigger.field, "Trigger did not change. No search necessary");
                state.set_percentage(100.0);
                return Ok(ScanReport::new(ScanOutcome::Cached));
            }
        }
    }

    let is_array = session.registry.is_array_field(&trigger.field)?;
    if !is_array && trigger.selector != ArraySelector::Reduce(Reduction::Element(0)) {
        let reason = format!(
            "{} is not an array; array position must be 0, got {}",
            trigger.field,
            trigger.selector.position()
        );
        tracing::warn!(field = %trigger.field, "Trigger search aborted: {}", reason);
        session.last_trigger = None;
        return Ok(ScanReport::new(ScanOutcome::Aborted(reason)));
    }

    let total = session.store.total_events();
    let (mut cursor, to_process) = if trigger.simple_search {
        let cursor = trigger.direction.advance(trigger.origin as i64);
        if cursor < 0 || cursor >= total as i64 {
            tracing::error!(
                origin = trigger.origin,
                total,
                "Wrong start event given when starting a trigger search"
            );
            trigger.complete = true;
            session.last_trigger = Some(trigger);
            state.set_percentage(100.0);
            return Ok(ScanReport::new(ScanOutcome::Completed));
        }
        let to_process = match trigger.direction {
            Direction::Forward => total - cursor as u64,
            Direction::Backward => cursor as u64 + 1,
        };
        (cursor, to_process)
    } else {
        trigger.hits = vec![0; total as usize];
        (0, total)
    };

    tracing::debug!(
        field = %trigger.field,
        comparison = %trigger.comparison,
        threshold = trigger.threshold,
        position = trigger.selector.position(),
        simple = trigger.simple_search,
        "Starting trigger search"
    );

    session.registry.invalidate();
    let mut report = ScanReport::new(ScanOutcome::Completed);
    let mut visited = 0u64;

    while (0..total as i64).contains(&cursor) {
        if state.is_interrupted() {
            tracing::debug!(event = cursor, "Trigger search interrupted");
            report.outcome = ScanOutcome::Interrupted;
            break;
        }

        let event = cursor as u64;
        let mut hit = false;
        match session.store.load_segment_for(event) {
            Err(e) => {
                tracing::debug!(event, error = %e, "Skipping event");
                report.skipped += 1;
            }
            Ok(position) => {
                session.registry.sync_segment(&position);
                let binding = session
                    .registry
                    .get_mut(&trigger.field)
                    .ok_or_else(|| ScanError::UnknownField(trigger.field.clone()))?;

                match binding.decode(&mut *session.store, &position) {
                    Err(e @ ScanError::StaleBinding { .. }) => return Err(e),
                    Err(e) => {
                        tracing::error!(field = %trigger.field, event, error = %e, "Failed to read field");
                        report.field_errors += 1;
                    }
                    Ok(_) => {
                        hit = trigger.evaluate(event, binding.values(), is_array);
                        report.processed += 1;
                    }
                }
            }
        }

        visited += 1;
        state.set_progress(visited, to_process);

        if trigger.simple_search && hit {
            trigger.next_event = Some(event);
            break;
        }
        cursor = trigger.direction.advance(cursor);
    }

    if report.skipped > 0 {
        tracing::error!(skipped = report.skipped, "Skipped events due to read errors");
    }

    trigger.complete = report.outcome == ScanOutcome::Completed;
    if trigger.complete {
        state.set_percentage(100.0);
    }
    tracing::info!(
        field = %trigger.field,
        triggers = trigger.trigger_count(),
        outcome = ?report.outcome,
        "Trigger search finished"
    );
    session.last_trigger = Some(trigger);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Event, FieldSchema, InMemoryStore};

    /// `level = i % 5`, `wave = [i, 10 - i]`, 12 events over three segments
    fn store() -> InMemoryStore {
        let events = |range: std::ops::Range<usize>| -> Vec<Event> {
            range
                .map(|i| {
                    Event::new(i as f64)
                        .value("level", (i % 5) as f64)
                        .value("wave", vec![i as f64, 10.0 - i as f64])
                })
                .collect()
        };
        InMemoryStore::new()
            .field("level", FieldSchema::scalar("double"))
            .field("wave", FieldSchema::array("double"))
            .segment("a", events(0..4))
            .segment("b", events(4..8))
            .segment("c", events(8..12))
    }

    fn search(session: &mut ScanSession, trigger: TriggerDescriptor) -> ScanReport {
        session.activate([trigger.field().to_string()]).unwrap();
        session.current_trigger = Some(trigger);
        run_trigger_search(session, &ScanState::new()).unwrap()
    }

    fn gt(field: &str, threshold: f64, position: i32) -> TriggerDescriptor {
        TriggerDescriptor::exhaustive(
            field,
            Comparison::Greater,
            threshold,
            ArraySelector::try_from(position).unwrap(),
        )
    }

    #[test]
    fn test_exhaustive_counts_hits() {
        let mut session = ScanSession::new(store());
        let report = search(&mut session, gt("level", 2.5, 0));

        assert_eq!(report.outcome, ScanOutcome::Completed);
        assert_eq!(report.processed, 12);

        let last = session.last_trigger().unwrap();
        assert!(last.is_complete());
        assert_eq!(last.triggered_events(), vec![3, 4, 8, 9]);
        assert_eq!(last.trigger_count(), 4);
        assert_eq!(last.find_next(4), Some(8));
        assert_eq!(last.find_next(9), None);
        assert_eq!(last.find_previous(8), Some(4));
        assert_eq!(last.find_previous(3), None);
        assert_eq!(last.find_previous(100), Some(9));
    }

    #[test]
    fn test_any_element_counts_each_element() {
        let mut session = ScanSession::new(store());
        search(&mut session, gt("wave", 4.5, -4));

        // wave = [i, 10 - i]: both elements exceed 4.5 for i = 5
        let last = session.last_trigger().unwrap();
        assert_eq!(last.hits()[5], 2);
        assert_eq!(last.hits()[0], 1);
        assert_eq!(last.trigger_count(), 12 + 1);
    }

    #[test]
    fn test_array_reductions_in_search() {
        let mut session = ScanSession::new(store());
        // max of [i, 10 - i] is below 6 only for i = 5
        let trigger = TriggerDescriptor::exhaustive(
            "wave",
            Comparison::Less,
            6.0,
            ArraySelector::try_from(-2).unwrap(),
        );
        search(&mut session, trigger);
        assert_eq!(session.last_trigger().unwrap().triggered_events(), vec![5]);

        // position past the end clamps to the second element
        search(&mut session, gt("wave", 8.5, 7));
        assert_eq!(session.last_trigger().unwrap().triggered_events(), vec![0, 1]);
    }

    #[test]
    fn test_equivalence() {
        let a = gt("level", 1.0, 0);
        assert!(a.is_equivalent(&gt("level", 1.0, 0)));
        assert!(!a.is_equivalent(&gt("level", 2.0, 0)));
        assert!(!a.is_equivalent(&gt("wave", 1.0, 0)));
        assert!(!a.is_equivalent(&gt("level", 1.0, -1)));

        let simple = TriggerDescriptor::single_hit(
            "level",
            Comparison::Greater,
            1.0,
            ArraySelector::try_from(0).unwrap(),
            0,
            Direction::Forward,
        );
        assert!(!a.is_equivalent(&simple));
        assert!(!simple.is_equivalent(&simple));
    }

    #[test]
    fn test_misuse_guard_aborts() {
        let mut session = ScanSession::new(store());
        let report = search(&mut session, gt("level", 1.0, -1));

        assert!(matches!(report.outcome, ScanOutcome::Aborted(_)));
        assert_eq!(report.processed, 0);
        assert!(session.last_trigger().is_none());
    }

    #[test]
    fn test_single_hit_directions() {
        let mut session = ScanSession::new(store());
        let single = |from: u64, direction: Direction| {
            TriggerDescriptor::single_hit(
                "level",
                Comparison::Equal,
                4.0,
                ArraySelector::try_from(0).unwrap(),
                from,
                direction,
            )
        };

        search(&mut session, single(4, Direction::Forward));
        let last = session.last_trigger().unwrap();
        assert_eq!(last.next_event(), Some(9));
        assert_eq!(last.find_next(0), Some(9));
        assert_eq!(last.find_previous(0), Some(9));

        search(&mut session, single(9, Direction::Backward));
        assert_eq!(session.last_trigger().unwrap().next_event(), Some(4));

        search(&mut session, single(3, Direction::Backward));
        assert_eq!(session.last_trigger().unwrap().next_event(), None);
    }

    #[test]
    fn test_single_hit_skips_unreadable_segment() {
        let mut store = store();
        store.set_readable(1, false);
        let mut session = ScanSession::new(store);

        let trigger = TriggerDescriptor::single_hit(
            "level",
            Comparison::Equal,
            4.0,
            ArraySelector::try_from(0).unwrap(),
            0,
            Direction::Forward,
        );
        let report = search(&mut session, trigger);

        assert_eq!(report.skipped, 4);
        assert_eq!(session.last_trigger().unwrap().next_event(), Some(9));
    }

    #[test]
    fn test_interrupted_search_is_not_cached() {
        let mut session = ScanSession::new(store());
        session.activate(["level"]).unwrap();
        session.current_trigger = Some(gt("level", 2.5, 0));

        let state = ScanState::new();
        state.request_stop();
        let report = run_trigger_search(&mut session, &state).unwrap();
        assert_eq!(report.outcome, ScanOutcome::Interrupted);
        assert!(!session.last_trigger().unwrap().is_complete());

        let report = search(&mut session, gt("level", 2.5, 0));
        assert_eq!(report.outcome, ScanOutcome::Completed);
        assert_eq!(report.processed, 12);
    }
}
