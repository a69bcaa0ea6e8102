//! Active Field Registry
//!
//! Tracks the fields bound for decoding. Each [`FieldBinding`] owns the
//! decode buffer of its field and remembers the segment it was bound
//! against. Crossing into another segment is an explicit transition
//! ([`FieldRegistry::sync_segment`]) that re-binds every field before any
//! buffer is read again; decoding through a stale binding is an error.

use crate::scan::error::{ScanError, ScanResult};
use crate::store::{ElementType, EventStore, Samples, SegmentPosition, StoreError, ValueKind};
use std::collections::BTreeMap;

/// Normalize a field path: `Probe/amplitude` → `Probe.amplitude`
pub fn normalize_field_name(name: &str) -> String {
    name.replace('/', ".")
}

/// Decode state of one active field
#[derive(Debug)]
pub struct FieldBinding {
    name: String,
    kind: ValueKind,
    element: ElementType,
    buffer: Samples,
    bound_segment: Option<usize>,
}

impl FieldBinding {
    fn new(name: String, kind: ValueKind, element: ElementType) -> Self {
        Self {
            name,
            kind,
            element,
            buffer: Samples::empty(element),
            bound_segment: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_array(&self) -> bool {
        self.kind == ValueKind::Array
    }

    pub fn element(&self) -> ElementType {
        self.element
    }

    /// Segment the binding was last bound against
    pub fn bound_segment(&self) -> Option<usize> {
        self.bound_segment
    }

    /// Values decoded by the last successful [`decode`](Self::decode)
    pub fn values(&self) -> &Samples {
        &self.buffer
    }

    fn rebind(&mut self, segment: usize) {
        self.bound_segment = Some(segment);
        self.buffer.clear();
    }

    /// Decode the field for the event at `position` into the owned buffer
    pub fn decode(
        &mut self,
        store: &mut dyn EventStore,
        position: &SegmentPosition,
    ) -> ScanResult<&Samples> {
        if self.bound_segment != Some(position.segment) {
            return Err(ScanError::StaleBinding {
                field: self.name.clone(),
                bound: self.bound_segment,
                current: position.segment,
            });
        }

        let samples = store.decode_field(&self.name, position.local_index)?;
        if samples.element_type() != self.element {
            return Err(StoreError::Decode {
                field: self.name.clone(),
                local_index: position.local_index,
                reason: format!(
                    "expected {} values, got {}",
                    self.element,
                    samples.element_type()
                ),
            }
            .into());
        }

        self.buffer = samples;
        Ok(&self.buffer)
    }
}

/// Set of fields currently bound for decoding
#[derive(Debug, Default)]
pub struct FieldRegistry {
    bindings: BTreeMap<String, FieldBinding>,
    segment: Option<usize>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the active fields.
    ///
    /// All current bindings are dropped first; on error the registry is
    /// left empty.
    pub fn activate<I, S>(&mut self, store: &dyn EventStore, names: I) -> ScanResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.bindings.clear();
        self.segment = None;

        let mut bindings = BTreeMap::new();
        for name in names {
            let name = normalize_field_name(name.as_ref());
            let schema = store.schema_of(&name).map_err(|e| match e {
                StoreError::UnknownField(f) => ScanError::UnknownField(f),
                other => ScanError::Store(other),
            })?;

            let element = ElementType::from_type_name(&schema.type_name).ok_or_else(|| {
                ScanError::UnsupportedType {
                    field: name.clone(),
                    type_name: schema.type_name.clone(),
                }
            })?;

            tracing::info!(
                field = %name,
                is_array = schema.kind == ValueKind::Array,
                element = %element,
                "Adding field to active fields"
            );
            bindings.insert(name.clone(), FieldBinding::new(name, schema.kind, element));
        }

        tracing::debug!(count = bindings.len(), "Activation done");
        self.bindings = bindings;
        Ok(())
    }

    /// Whether an active field is array-valued
    pub fn is_array_field(&self, name: &str) -> ScanResult<bool> {
        self.bindings
            .get(&normalize_field_name(name))
            .map(FieldBinding::is_array)
            .ok_or_else(|| ScanError::UnknownField(name.to_string()))
    }

    /// Forget the bound segment so the next positioning re-binds everything
    pub fn invalidate(&mut self) {
        self.segment = None;
    }

    /// Re-bind all fields if the store moved to another segment.
    ///
    /// Returns true if a re-bind happened.
    pub fn sync_segment(&mut self, position: &SegmentPosition) -> bool {
        if !position.changed && self.segment == Some(position.segment) {
            return false;
        }

        tracing::debug!(segment = position.segment, "Re-binding fields to new segment");
        for binding in self.bindings.values_mut() {
            binding.rebind(position.segment);
        }
        self.segment = Some(position.segment);
        true
    }

    pub fn get(&self, name: &str) -> Option<&FieldBinding> {
        self.bindings.get(&normalize_field_name(name))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut FieldBinding> {
        self.bindings.get_mut(&normalize_field_name(name))
    }

    pub fn bindings_mut(&mut self) -> impl Iterator<Item = &mut FieldBinding> {
        self.bindings.values_mut()
    }

    /// Names of the active fields, sorted
    pub fn names(&self) -> Vec<String> {
        self.bindings.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Event, FieldSchema, InMemoryStore};

    fn store() -> InMemoryStore {
        let events = |n: usize| -> Vec<Event> {
            (0..n)
                .map(|i| {
                    Event::new(i as f64)
                        .value("probe.amp", vec![i as f32, 1.0])
                        .value("gain", i as f64)
                })
                .collect()
        };
        InMemoryStore::new()
            .field("probe.amp", FieldSchema::array("float32"))
            .field("gain", FieldSchema::scalar("double"))
            .field("label", FieldSchema::scalar("string"))
            .segment("a", events(2))
            .segment("b", events(2))
    }

    #[test]
    fn test_activate_and_kind() {
        let store = store();
        let mut registry = FieldRegistry::new();
        registry.activate(&store, ["probe/amp", "gain"]).unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.is_array_field("probe.amp").unwrap());
        assert!(registry.is_array_field("probe/amp").unwrap());
        assert!(!registry.is_array_field("gain").unwrap());
        assert_eq!(registry.get("gain").unwrap().element(), ElementType::Float64);
        assert!(matches!(
            registry.is_array_field("other"),
            Err(ScanError::UnknownField(_))
        ));
    }

    #[test]
    fn test_activate_errors_clear_registry() {
        let store = store();
        let mut registry = FieldRegistry::new();
        registry.activate(&store, ["gain"]).unwrap();

        let err = registry.activate(&store, ["missing"]).unwrap_err();
        assert!(matches!(err, ScanError::UnknownField(ref f) if f == "missing"));
        assert!(registry.is_empty());

        let err = registry.activate(&store, ["label"]).unwrap_err();
        assert!(matches!(err, ScanError::UnsupportedType { .. }));
    }

    #[test]
    fn test_rebind_on_segment_change() {
        let mut store = store();
        let mut registry = FieldRegistry::new();
        registry.activate(&store, ["probe.amp"]).unwrap();

        let pos = store.load_segment_for(0).unwrap();
        assert!(registry.sync_segment(&pos));
        let binding = registry.get_mut("probe.amp").unwrap();
        assert_eq!(binding.decode(&mut store, &pos).unwrap().len(), 2);

        let pos = store.load_segment_for(1).unwrap();
        assert!(!registry.sync_segment(&pos));

        // crossing into segment 1 without re-binding is refused
        let next = store.load_segment_for(2).unwrap();
        let binding = registry.get_mut("probe.amp").unwrap();
        assert!(matches!(
            binding.decode(&mut store, &next),
            Err(ScanError::StaleBinding { bound: Some(0), current: 1, .. })
        ));

        assert!(registry.sync_segment(&next));
        let binding = registry.get_mut("probe.amp").unwrap();
        assert_eq!(binding.bound_segment(), Some(1));
        assert_eq!(
            binding.decode(&mut store, &next).unwrap(),
            &Samples::Float32(vec![0.0, 1.0])
        );
    }

    #[test]
    fn test_invalidate_forces_rebind() {
        let mut store = store();
        let mut registry = FieldRegistry::new();
        registry.activate(&store, ["gain"]).unwrap();

        let pos = store.load_segment_for(0).unwrap();
        registry.sync_segment(&pos);
        let pos = store.load_segment_for(1).unwrap();
        assert!(!registry.sync_segment(&pos));

        registry.invalidate();
        assert!(registry.sync_segment(&pos));
    }

    #[test]
    fn test_type_mismatch_is_decode_error() {
        let mut store = InMemoryStore::new()
            .field("x", FieldSchema::scalar("int32"))
            .segment("a", vec![Event::new(0.0).value("x", 1.5)]);
        let mut registry = FieldRegistry::new();
        registry.activate(&store, ["x"]).unwrap();

        let pos = store.load_segment_for(0).unwrap();
        registry.sync_segment(&pos);
        let err = registry.get_mut("x").unwrap().decode(&mut store, &pos).unwrap_err();
        assert!(matches!(err, ScanError::Store(StoreError::Decode { .. })));
    }
}
