//! State owned by one handler and moved into the background task per scan

use crate::scan::registry::FieldRegistry;
use crate::scan::trigger::TriggerDescriptor;
use crate::scan::types::Trace;
use crate::store::EventStore;
use std::collections::BTreeMap;

/// Everything an engine reads or writes while it runs.
///
/// The handler hands the whole session to the background task and gets it
/// back on the completion poll, so traces and bindings are never visible to
/// the caller while a scan is in flight.
pub struct ScanSession {
    pub(crate) store: Box<dyn EventStore>,
    pub(crate) registry: FieldRegistry,
    pub(crate) traces: BTreeMap<String, Trace>,
    /// Descriptor of the search being started or running
    pub(crate) current_trigger: Option<TriggerDescriptor>,
    /// Descriptor of the last finished search
    pub(crate) last_trigger: Option<TriggerDescriptor>,
}

impl ScanSession {
    pub fn new(store: impl EventStore) -> Self {
        Self {
            store: Box::new(store),
            registry: FieldRegistry::new(),
            traces: BTreeMap::new(),
            current_trigger: None,
            last_trigger: None,
        }
    }

    pub fn store(&self) -> &dyn EventStore {
        &*self.store
    }

    pub fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    pub fn traces(&self) -> &BTreeMap<String, Trace> {
        &self.traces
    }

    pub fn last_trigger(&self) -> Option<&TriggerDescriptor> {
        self.last_trigger.as_ref()
    }

    /// Activate `fields` against the session's store
    pub fn activate<I, S>(&mut self, fields: I) -> crate::scan::ScanResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.registry.activate(&*self.store, fields)
    }

    /// Drop whatever a panicked engine left half written
    pub(crate) fn recover(&mut self) {
        self.traces.clear();
        self.registry.invalidate();
        self.current_trigger = None;
    }
}

impl std::fmt::Debug for ScanSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanSession")
            .field("total_events", &self.store.total_events())
            .field("registry", &self.registry)
            .field("traces", &self.traces.keys().collect::<Vec<_>>())
            .field("current_trigger", &self.current_trigger)
            .field("last_trigger", &self.last_trigger)
            .finish()
    }
}
