//! Scan handler
//!
//! Facade over one event store: configure the active fields, read single
//! events synchronously, and run range scans and trigger searches in the
//! background while polling for progress.
//!
//! A handler owns its [`ScanSession`]. Starting a scan moves the session into
//! the background task; the completion poll moves it back. Until then every
//! query of traces or trigger results returns [`ScanError::Busy`].
//!
//! A panic inside the engine (usually from a store implementation) is caught
//! on the background task: the scan reports [`ScanOutcome::Failed`], its
//! traces are dropped and the session comes back usable. Only a task that
//! dies outside the engine loses the session, after which every call
//! returns [`ScanError::SessionLost`].

use crate::scan::controller::{ScanController, ScanState, StopHandle};
use crate::scan::error::{ScanError, ScanResult};
use crate::scan::registry::normalize_field_name;
use crate::scan::session::ScanSession;
use crate::scan::timeline::{self, TimelineRequest};
use crate::scan::trigger::{self, TriggerDescriptor};
use crate::scan::types::{ArraySelector, Comparison, Direction, ScanOutcome, ScanReport, ScanStatus, Trace};
use crate::store::EventStore;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

type EngineOutput = (ScanSession, ScanResult<ScanReport>);

/// Scan handler over one event store
#[derive(Debug)]
pub struct ScanHandler {
    session: Option<ScanSession>,
    controller: ScanController<EngineOutput>,
    total_events: u64,
    segment_count: usize,
    field_names: Vec<String>,
    last_report: Option<ScanReport>,
}

impl ScanHandler {
    pub fn new(store: impl EventStore) -> Self {
        let total_events = store.total_events();
        let segment_count = store.segment_count();
        let field_names = store.field_names();
        tracing::info!(
            events = total_events,
            segments = segment_count,
            fields = field_names.len(),
            "Opened event store"
        );

        Self {
            session: Some(ScanSession::new(store)),
            controller: ScanController::new(),
            total_events,
            segment_count,
            field_names,
            last_report: None,
        }
    }

    pub fn total_events(&self) -> u64 {
        self.total_events
    }

    pub fn segment_count(&self) -> usize {
        self.segment_count
    }

    /// All fields the store can decode
    pub fn field_names(&self) -> &[String] {
        &self.field_names
    }

    fn session(&self) -> ScanResult<&ScanSession> {
        if self.controller.is_running() {
            return Err(ScanError::Busy);
        }
        self.session
            .as_ref()
            .ok_or_else(|| ScanError::SessionLost("session was not returned by the scan task".to_string()))
    }

    fn session_mut(&mut self) -> ScanResult<&mut ScanSession> {
        if self.controller.is_running() {
            return Err(ScanError::Busy);
        }
        self.session
            .as_mut()
            .ok_or_else(|| ScanError::SessionLost("session was not returned by the scan task".to_string()))
    }

    /// Replace the active fields
    pub fn activate<I, S>(&mut self, fields: I) -> ScanResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.session_mut()?.activate(fields)
    }

    pub fn active_fields(&self) -> ScanResult<Vec<String>> {
        Ok(self.session()?.registry().names())
    }

    pub fn is_array_field(&self, field: &str) -> ScanResult<bool> {
        self.session()?.registry().is_array_field(field)
    }

    /// Read one event of the active fields; arrays spread over their index
    pub fn read_event(&mut self, event: u64) -> ScanResult<ScanReport> {
        timeline::read_event(self.session_mut()?, event)
    }

    /// Activate `fields` and read one event, returning the traces
    pub fn inspect<I, S>(&mut self, fields: I, event: u64) -> ScanResult<&BTreeMap<String, Trace>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let session = self.session_mut()?;
        session.activate(fields)?;
        timeline::read_event(session, event)?;
        Ok(session.traces())
    }

    /// Timestamp of one event in seconds
    pub fn read_timestamp(&mut self, event: u64) -> ScanResult<f64> {
        let total = self.total_events;
        let session = self.session_mut()?;
        if event >= total {
            return Err(ScanError::EventOutOfRange { event, total });
        }
        let position = session.store.load_segment_for(event)?;
        session.registry.sync_segment(&position);
        Ok(session.store.decode_timestamp(position.local_index)?)
    }

    /// Start a range scan over the active fields
    pub fn start_timeline(&mut self, request: &TimelineRequest) -> ScanResult<()> {
        let plan = request.plan(self.total_events)?;
        if self.session()?.registry().is_empty() {
            tracing::warn!("Range scan started without active fields");
        }

        self.launch(move |session, state| timeline::run_range_scan(session, &plan, state))
    }

    /// Start an exhaustive trigger search.
    ///
    /// `field` becomes the only active field and earlier traces are dropped.
    pub fn start_trigger_search(
        &mut self,
        field: &str,
        threshold: f64,
        comparison: Comparison,
        array_position: i32,
    ) -> ScanResult<()> {
        let selector = ArraySelector::try_from(array_position)?;
        let descriptor = TriggerDescriptor::exhaustive(field, comparison, threshold, selector);
        self.prepare_trigger(descriptor)?;
        self.launch(trigger::run_trigger_search)
    }

    /// Start a search for the first hit next to `current_event`
    pub fn start_simple_trigger_search(
        &mut self,
        field: &str,
        threshold: f64,
        comparison: Comparison,
        array_position: i32,
        current_event: u64,
        direction: Direction,
    ) -> ScanResult<()> {
        let selector = ArraySelector::try_from(array_position)?;
        let descriptor = TriggerDescriptor::single_hit(
            field,
            comparison,
            threshold,
            selector,
            current_event,
            direction,
        );
        self.prepare_trigger(descriptor)?;
        if let Some(session) = self.session.as_mut() {
            session.last_trigger = None;
        }
        self.launch(trigger::run_trigger_search)
    }

    fn prepare_trigger(&mut self, descriptor: TriggerDescriptor) -> ScanResult<()> {
        let session = self.session_mut()?;
        session.activate([descriptor.field()])?;
        session.traces.clear();
        session.current_trigger = Some(descriptor);
        Ok(())
    }

    fn launch<F>(&mut self, engine: F) -> ScanResult<()>
    where
        F: FnOnce(&mut ScanSession, &ScanState) -> ScanResult<ScanReport> + Send + 'static,
    {
        self.session_mut()?;
        let Some(mut session) = self.session.take() else {
            return Err(ScanError::SessionLost("no session to scan".to_string()));
        };

        self.last_report = None;
        self.controller.start(move |state| {
            let result = panic::catch_unwind(AssertUnwindSafe(|| engine(&mut session, state)))
                .unwrap_or_else(|payload| {
                    session.recover();
                    Err(ScanError::EnginePanicked(panic_message(payload.as_ref())))
                });
            (session, result)
        })
    }

    pub fn request_stop(&self) {
        self.controller.request_stop();
    }

    /// Handle for stopping the scan from another task or thread
    pub fn stop_handle(&self) -> StopHandle {
        self.controller.stop_handle()
    }

    /// Current progress. The poll that observes completion takes the session
    /// back and attaches the report.
    pub async fn poll(&mut self) -> ScanStatus {
        let polled = self.controller.poll().await;

        match polled.joined {
            Some(Ok((session, result))) => {
                self.session = Some(session);
                let report = result.unwrap_or_else(|e| {
                    tracing::error!(error = %e, "Scan failed");
                    ScanReport::new(ScanOutcome::Failed(e.to_string()))
                });
                self.last_report = Some(report);
            }
            Some(Err(e)) => {
                self.last_report = Some(ScanReport::new(ScanOutcome::Failed(e.to_string())));
            }
            None => {}
        }

        ScanStatus {
            done: polled.done,
            percentage: polled.percentage,
            report: if polled.done { self.last_report.clone() } else { None },
        }
    }

    /// Poll every `poll_interval` until the scan is done.
    ///
    /// Requests a stop once `timeout` has elapsed and keeps waiting for the
    /// engine to wind down.
    pub async fn wait(&mut self, poll_interval: Duration, timeout: Option<Duration>) -> ScanResult<ScanReport> {
        let started = Instant::now();
        let mut stop_requested = false;

        loop {
            let status = self.poll().await;
            if status.done {
                return status.report.ok_or(ScanError::Idle);
            }

            tracing::debug!(percentage = status.percentage, "Scan in progress");
            if let Some(timeout) = timeout {
                if !stop_requested && started.elapsed() >= timeout {
                    tracing::warn!(?timeout, "Scan timed out, requesting stop");
                    self.request_stop();
                    stop_requested = true;
                }
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Report of the last joined scan
    pub fn last_report(&self) -> Option<&ScanReport> {
        self.last_report.as_ref()
    }

    pub fn trace(&self, field: &str) -> ScanResult<Option<&Trace>> {
        Ok(self.session()?.traces().get(&normalize_field_name(field)))
    }

    pub fn traces(&self) -> ScanResult<&BTreeMap<String, Trace>> {
        Ok(self.session()?.traces())
    }

    /// Descriptor of the last finished trigger search
    pub fn last_trigger(&self) -> ScanResult<&TriggerDescriptor> {
        self.session()?.last_trigger().ok_or(ScanError::NoTriggerResult)
    }

    /// First triggered event after `from`
    pub fn find_next_trigger(&self, from: u64) -> ScanResult<Option<u64>> {
        Ok(self.last_trigger()?.find_next(from))
    }

    /// Last triggered event before `from`
    pub fn find_previous_trigger(&self, from: u64) -> ScanResult<Option<u64>> {
        Ok(self.last_trigger()?.find_previous(from))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::types::TimeAxis;
    use crate::store::{
        Event, FieldSchema, InMemoryStore, Samples, SegmentPosition, StoreResult,
    };
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    /// Counts positioning calls of the wrapped store
    struct CountingStore {
        inner: InMemoryStore,
        loads: Arc<AtomicU64>,
    }

    impl EventStore for CountingStore {
        fn total_events(&self) -> u64 {
            self.inner.total_events()
        }
        fn segment_count(&self) -> usize {
            self.inner.segment_count()
        }
        fn field_names(&self) -> Vec<String> {
            self.inner.field_names()
        }
        fn load_segment_for(&mut self, event: u64) -> StoreResult<SegmentPosition> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.inner.load_segment_for(event)
        }
        fn schema_of(&self, field: &str) -> StoreResult<FieldSchema> {
            self.inner.schema_of(field)
        }
        fn decode_field(&mut self, field: &str, local_index: u64) -> StoreResult<Samples> {
            self.inner.decode_field(field, local_index)
        }
        fn decode_timestamp(&mut self, local_index: u64) -> StoreResult<f64> {
            self.inner.decode_timestamp(local_index)
        }
    }

    /// Requests a stop through the handler's stop handle when `stop_at` is
    /// positioned, so the engine observes it before the next event
    struct StoppingStore {
        inner: InMemoryStore,
        stop_at: u64,
        handle: Arc<Mutex<Option<StopHandle>>>,
    }

    impl EventStore for StoppingStore {
        fn total_events(&self) -> u64 {
            self.inner.total_events()
        }
        fn segment_count(&self) -> usize {
            self.inner.segment_count()
        }
        fn field_names(&self) -> Vec<String> {
            self.inner.field_names()
        }
        fn load_segment_for(&mut self, event: u64) -> StoreResult<SegmentPosition> {
            if event == self.stop_at {
                if let Some(handle) = self.handle.lock().unwrap().as_ref() {
                    handle.request_stop();
                }
            }
            self.inner.load_segment_for(event)
        }
        fn schema_of(&self, field: &str) -> StoreResult<FieldSchema> {
            self.inner.schema_of(field)
        }
        fn decode_field(&mut self, field: &str, local_index: u64) -> StoreResult<Samples> {
            self.inner.decode_field(field, local_index)
        }
        fn decode_timestamp(&mut self, local_index: u64) -> StoreResult<f64> {
            self.inner.decode_timestamp(local_index)
        }
    }

    /// Panics when positioned on `panic_at` while armed
    struct PanickingStore {
        inner: InMemoryStore,
        panic_at: u64,
        armed: Arc<AtomicBool>,
    }

    impl EventStore for PanickingStore {
        fn total_events(&self) -> u64 {
            self.inner.total_events()
        }
        fn segment_count(&self) -> usize {
            self.inner.segment_count()
        }
        fn field_names(&self) -> Vec<String> {
            self.inner.field_names()
        }
        fn load_segment_for(&mut self, event: u64) -> StoreResult<SegmentPosition> {
            if event == self.panic_at && self.armed.load(Ordering::SeqCst) {
                panic!("corrupt segment at event {}", event);
            }
            self.inner.load_segment_for(event)
        }
        fn schema_of(&self, field: &str) -> StoreResult<FieldSchema> {
            self.inner.schema_of(field)
        }
        fn decode_field(&mut self, field: &str, local_index: u64) -> StoreResult<Samples> {
            self.inner.decode_field(field, local_index)
        }
        fn decode_timestamp(&mut self, local_index: u64) -> StoreResult<f64> {
            self.inner.decode_timestamp(local_index)
        }
    }

    /// Event `i` holds `arr = [i, i+1, ..., i+9]` and `level = i % 4`
    fn ten_events() -> InMemoryStore {
        let events = |range: std::ops::Range<u64>| -> Vec<Event> {
            range
                .map(|i| {
                    let arr: Vec<i32> = (i as i32..i as i32 + 10).collect();
                    Event::new(1_700_000_000.0 + i as f64 * 0.5)
                        .value("arr", arr)
                        .value("level", (i % 4) as f64)
                })
                .collect()
        };
        InMemoryStore::new()
            .field("arr", FieldSchema::array("int32"))
            .field("level", FieldSchema::scalar("double"))
            .segment("run_1", events(0..3))
            .segment("run_2", events(3..7))
            .segment("run_3", events(7..10))
    }

    const TICK: Duration = Duration::from_millis(2);

    #[tokio::test]
    async fn test_end_to_end_first_element() {
        let mut handler = ScanHandler::new(ten_events());
        assert_eq!(handler.total_events(), 10);
        assert_eq!(handler.segment_count(), 3);

        handler.activate(["arr"]).unwrap();
        handler
            .start_timeline(&TimelineRequest::default().array_position(0))
            .unwrap();
        let report = handler.wait(TICK, None).await.unwrap();

        assert_eq!(report.outcome, ScanOutcome::Completed);
        let trace = handler.trace("arr").unwrap().unwrap();
        assert_eq!(trace.y, (0..10).map(|v| v as f64).collect::<Vec<_>>());
        assert_eq!(trace.x[1] - trace.x[0], 0.5);
    }

    #[tokio::test]
    async fn test_index_axis_strictly_increasing_with_skips() {
        let mut store = ten_events();
        store.set_readable(1, false);
        let mut handler = ScanHandler::new(store);
        handler.activate(["arr", "level"]).unwrap();

        let request = TimelineRequest::default().time_axis(TimeAxis::Off);
        handler.start_timeline(&request).unwrap();
        let report = handler.wait(TICK, None).await.unwrap();

        assert_eq!(report.skipped, 4);
        for trace in handler.traces().unwrap().values() {
            assert_eq!(trace.len(), 10 - 4);
            assert_eq!(trace.x.len(), trace.y.len());
            assert!(trace.x.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[tokio::test]
    async fn test_cancellation_trims_traces() {
        let handle = Arc::new(Mutex::new(None));
        let store = StoppingStore {
            inner: ten_events(),
            stop_at: 4,
            handle: Arc::clone(&handle),
        };
        let mut handler = ScanHandler::new(store);
        *handle.lock().unwrap() = Some(handler.stop_handle());

        handler.activate(["arr"]).unwrap();
        handler.start_timeline(&TimelineRequest::default()).unwrap();
        let report = handler.wait(TICK, None).await.unwrap();

        // event 4 is filled, the stop is seen before event 5
        assert_eq!(report.outcome, ScanOutcome::Interrupted);
        assert_eq!(report.processed, 5);
        let trace = handler.trace("arr").unwrap().unwrap();
        assert_eq!(trace.len(), 5);
        assert_eq!(trace.x.len(), 5);
        assert!(handler.stop_handle().is_done());
    }

    #[tokio::test]
    async fn test_exhaustive_search_is_cached() {
        let loads = Arc::new(AtomicU64::new(0));
        let store = CountingStore {
            inner: ten_events(),
            loads: Arc::clone(&loads),
        };
        let mut handler = ScanHandler::new(store);

        handler.start_trigger_search("level", 2.5, Comparison::Greater, 0).unwrap();
        let report = handler.wait(TICK, None).await.unwrap();
        assert_eq!(report.outcome, ScanOutcome::Completed);
        assert_eq!(loads.load(Ordering::SeqCst), 10);
        assert_eq!(handler.last_trigger().unwrap().triggered_events(), vec![3, 7]);

        handler.start_trigger_search("level", 2.5, Comparison::Greater, 0).unwrap();
        let report = handler.wait(TICK, None).await.unwrap();
        assert_eq!(report.outcome, ScanOutcome::Cached);
        assert_eq!(loads.load(Ordering::SeqCst), 10);
        assert_eq!(handler.find_next_trigger(3).unwrap(), Some(7));
        assert_eq!(handler.find_previous_trigger(7).unwrap(), Some(3));
        assert_eq!(handler.find_previous_trigger(3).unwrap(), None);

        handler.start_trigger_search("level", 1.5, Comparison::Greater, 0).unwrap();
        handler.wait(TICK, None).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn test_simple_search_is_repeatable() {
        let loads = Arc::new(AtomicU64::new(0));
        let store = CountingStore {
            inner: ten_events(),
            loads: Arc::clone(&loads),
        };
        let mut handler = ScanHandler::new(store);

        let mut answers = Vec::new();
        for _ in 0..2 {
            handler
                .start_simple_trigger_search("level", 3.0, Comparison::Equal, 0, 3, Direction::Forward)
                .unwrap();
            handler.wait(TICK, None).await.unwrap();
            answers.push(handler.find_next_trigger(0).unwrap());
        }

        assert_eq!(answers, vec![Some(7), Some(7)]);
        // events 4..=7 visited on both runs
        assert_eq!(loads.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_simple_search_at_boundary_visits_nothing() {
        let loads = Arc::new(AtomicU64::new(0));
        let store = CountingStore {
            inner: ten_events(),
            loads: Arc::clone(&loads),
        };
        let mut handler = ScanHandler::new(store);

        handler
            .start_simple_trigger_search("level", 0.0, Comparison::Greater, 0, 9, Direction::Forward)
            .unwrap();
        let status = loop {
            let status = handler.poll().await;
            if status.done {
                break status;
            }
            tokio::time::sleep(TICK).await;
        };

        assert_eq!(status.percentage, 100.0);
        assert_eq!(handler.last_trigger().unwrap().next_event(), None);
        assert_eq!(loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_configuration_errors_are_synchronous() {
        let mut handler = ScanHandler::new(ten_events());

        assert!(matches!(
            handler.activate(["missing"]),
            Err(ScanError::UnknownField(_))
        ));
        assert!(matches!(
            handler.start_trigger_search("level", 1.0, Comparison::Greater, -5),
            Err(ScanError::InvalidSelector(-5, _))
        ));
        assert!(matches!(
            handler.start_timeline(&TimelineRequest::default().array_position(-4)),
            Err(ScanError::InvalidSelector(-4, _))
        ));
        assert!(matches!(
            handler.find_next_trigger(0),
            Err(ScanError::NoTriggerResult)
        ));
        assert!(matches!(handler.wait(TICK, None).await, Err(ScanError::Idle)));
    }

    #[tokio::test]
    async fn test_misuse_guard_reports_abort() {
        let mut handler = ScanHandler::new(ten_events());
        handler.start_trigger_search("level", 1.0, Comparison::Greater, 2).unwrap();
        let report = handler.wait(TICK, None).await.unwrap();

        assert!(matches!(report.outcome, ScanOutcome::Aborted(_)));
        assert_eq!(report.processed, 0);
        assert!(matches!(
            handler.last_trigger(),
            Err(ScanError::NoTriggerResult)
        ));
    }

    #[tokio::test]
    async fn test_queries_refused_while_running() {
        let mut handler = ScanHandler::new(ten_events());
        handler.activate(["arr"]).unwrap();
        handler.start_timeline(&TimelineRequest::default()).unwrap();

        assert!(matches!(handler.traces(), Err(ScanError::Busy)));
        assert!(matches!(
            handler.start_timeline(&TimelineRequest::default()),
            Err(ScanError::Busy)
        ));
        assert!(matches!(handler.read_event(0), Err(ScanError::Busy)));

        handler.wait(TICK, None).await.unwrap();
        assert_eq!(handler.traces().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_inspect_and_timestamp() {
        let mut handler = ScanHandler::new(ten_events());

        let traces = handler.inspect(["arr", "level"], 2).unwrap();
        assert_eq!(traces["arr"].y, (2..12).map(|v| v as f64).collect::<Vec<_>>());
        assert_eq!(traces["level"].y, vec![2.0]);
        assert_eq!(handler.active_fields().unwrap(), vec!["arr", "level"]);
        assert!(handler.is_array_field("arr").unwrap());

        assert_eq!(handler.read_timestamp(4).unwrap(), 1_700_000_002.0);
        assert!(matches!(
            handler.read_timestamp(10),
            Err(ScanError::EventOutOfRange { .. })
        ));
    }

    #[tokio::test]
    async fn test_panicking_store_fails_scan_and_keeps_session() {
        let armed = Arc::new(AtomicBool::new(true));
        let store = PanickingStore {
            inner: ten_events(),
            panic_at: 5,
            armed: Arc::clone(&armed),
        };
        let mut handler = ScanHandler::new(store);
        handler.activate(["arr"]).unwrap();
        handler.start_timeline(&TimelineRequest::default()).unwrap();

        let status = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let status = handler.poll().await;
                if status.done {
                    break status;
                }
                tokio::time::sleep(TICK).await;
            }
        })
        .await
        .unwrap();

        assert!(status.done);
        let report = status.report.unwrap();
        assert!(report.outcome.is_failure());
        match &report.outcome {
            ScanOutcome::Failed(reason) => assert!(reason.contains("corrupt segment at event 5")),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(handler.traces().unwrap().is_empty());

        // the session survives and the next scan runs normally
        armed.store(false, Ordering::SeqCst);
        handler.start_timeline(&TimelineRequest::default()).unwrap();
        let report = tokio::time::timeout(Duration::from_secs(5), handler.wait(TICK, None))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.outcome, ScanOutcome::Completed);
        assert_eq!(handler.trace("arr").unwrap().unwrap().len(), 10);
    }
}
