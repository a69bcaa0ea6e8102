//! Core value types shared by event stores and the scan engine
//!
//! - `ElementType`: the closed set of numeric element kinds a field can hold
//! - `ValueKind`: scalar or array
//! - `FieldSchema`: what a store declares about a field
//! - `Samples`: decoded values of one field for one event, tagged by element kind

use serde::{Deserialize, Serialize};

/// Numeric element kind of a field
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Bool,
}

impl ElementType {
    /// Map a declared type name to an element kind.
    ///
    /// Narrow integer types share the 16 bit representation, unsigned types
    /// share the signed one of the same width.
    pub fn from_type_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        let element = match name.as_str() {
            "int16" | "i16" | "u16" | "uint16" | "i8" | "u8" | "int8" | "uint8" | "char"
            | "uchar" | "short" | "ushort" => ElementType::Int16,
            "int32" | "i32" | "u32" | "uint32" | "int" | "uint" => ElementType::Int32,
            "int64" | "i64" | "u64" | "uint64" | "long" | "ulong" => ElementType::Int64,
            "float32" | "f32" | "float" => ElementType::Float32,
            "float64" | "f64" | "double" => ElementType::Float64,
            "bool" | "boolean" => ElementType::Bool,
            _ => return None,
        };
        Some(element)
    }
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElementType::Int16 => write!(f, "int16"),
            ElementType::Int32 => write!(f, "int32"),
            ElementType::Int64 => write!(f, "int64"),
            ElementType::Float32 => write!(f, "float32"),
            ElementType::Float64 => write!(f, "float64"),
            ElementType::Bool => write!(f, "bool"),
        }
    }
}

/// Whether a field holds one value or an array of values per event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Scalar,
    Array,
}

/// Schema of a field as declared by the store.
///
/// The type name is kept as declared; resolving it to an [`ElementType`]
/// happens when the field is activated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldSchema {
    pub kind: ValueKind,
    #[serde(rename = "type")]
    pub type_name: String,
}

impl FieldSchema {
    pub fn scalar(type_name: impl Into<String>) -> Self {
        Self {
            kind: ValueKind::Scalar,
            type_name: type_name.into(),
        }
    }

    pub fn array(type_name: impl Into<String>) -> Self {
        Self {
            kind: ValueKind::Array,
            type_name: type_name.into(),
        }
    }
}

/// Conversion of a stored element to the real numbers used in traces
trait AsF64: Copy {
    fn as_f64(self) -> f64;
}

macro_rules! impl_as_f64 {
    ($($t:ty),*) => {
        $(impl AsF64 for $t {
            fn as_f64(self) -> f64 {
                self as f64
            }
        })*
    };
}

impl_as_f64!(i16, i32, i64, f32, f64);

impl AsF64 for bool {
    fn as_f64(self) -> f64 {
        if self {
            1.0
        } else {
            0.0
        }
    }
}

/// Decoded values of one field for one event.
///
/// Scalars are represented as a single element.
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Bool(Vec<bool>),
}

macro_rules! with_values {
    ($samples:expr, $v:ident => $body:expr) => {
        match $samples {
            Samples::Int16($v) => $body,
            Samples::Int32($v) => $body,
            Samples::Int64($v) => $body,
            Samples::Float32($v) => $body,
            Samples::Float64($v) => $body,
            Samples::Bool($v) => $body,
        }
    };
}

impl Samples {
    /// Empty buffer for the given element kind
    pub fn empty(element: ElementType) -> Self {
        match element {
            ElementType::Int16 => Samples::Int16(Vec::new()),
            ElementType::Int32 => Samples::Int32(Vec::new()),
            ElementType::Int64 => Samples::Int64(Vec::new()),
            ElementType::Float32 => Samples::Float32(Vec::new()),
            ElementType::Float64 => Samples::Float64(Vec::new()),
            ElementType::Bool => Samples::Bool(Vec::new()),
        }
    }

    /// Build samples of the given kind from real numbers (lossy for integers)
    pub fn from_f64(element: ElementType, values: &[f64]) -> Self {
        match element {
            ElementType::Int16 => Samples::Int16(values.iter().map(|v| *v as i16).collect()),
            ElementType::Int32 => Samples::Int32(values.iter().map(|v| *v as i32).collect()),
            ElementType::Int64 => Samples::Int64(values.iter().map(|v| *v as i64).collect()),
            ElementType::Float32 => Samples::Float32(values.iter().map(|v| *v as f32).collect()),
            ElementType::Float64 => Samples::Float64(values.to_vec()),
            ElementType::Bool => Samples::Bool(values.iter().map(|v| *v != 0.0).collect()),
        }
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            Samples::Int16(_) => ElementType::Int16,
            Samples::Int32(_) => ElementType::Int32,
            Samples::Int64(_) => ElementType::Int64,
            Samples::Float32(_) => ElementType::Float32,
            Samples::Float64(_) => ElementType::Float64,
            Samples::Bool(_) => ElementType::Bool,
        }
    }

    pub fn len(&self) -> usize {
        with_values!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all values, keeping the element kind
    pub fn clear(&mut self) {
        with_values!(self, v => v.clear())
    }

    /// Element at `index` as a real number
    pub fn get(&self, index: usize) -> Option<f64> {
        with_values!(self, v => v.get(index).map(|x| x.as_f64()))
    }

    pub fn last(&self) -> Option<f64> {
        with_values!(self, v => v.last().map(|x| x.as_f64()))
    }

    /// Iterate over all elements as real numbers
    pub fn iter(&self) -> Box<dyn Iterator<Item = f64> + '_> {
        with_values!(self, v => Box::new(v.iter().map(|x| x.as_f64())))
    }

    /// Arithmetic mean, `None` when empty
    pub fn mean(&self) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        Some(self.iter().sum::<f64>() / self.len() as f64)
    }

    pub fn max(&self) -> Option<f64> {
        self.iter().reduce(f64::max)
    }

    pub fn min(&self) -> Option<f64> {
        self.iter().reduce(f64::min)
    }
}

impl From<Vec<f64>> for Samples {
    fn from(values: Vec<f64>) -> Self {
        Samples::Float64(values)
    }
}

impl From<Vec<f32>> for Samples {
    fn from(values: Vec<f32>) -> Self {
        Samples::Float32(values)
    }
}

impl From<Vec<i32>> for Samples {
    fn from(values: Vec<i32>) -> Self {
        Samples::Int32(values)
    }
}

impl From<f64> for Samples {
    fn from(value: f64) -> Self {
        Samples::Float64(vec![value])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_name_mapping() {
        assert_eq!(ElementType::from_type_name("Float"), Some(ElementType::Float32));
        assert_eq!(ElementType::from_type_name("double"), Some(ElementType::Float64));
        assert_eq!(ElementType::from_type_name("UChar"), Some(ElementType::Int16));
        assert_eq!(ElementType::from_type_name("u64"), Some(ElementType::Int64));
        assert_eq!(ElementType::from_type_name("bool"), Some(ElementType::Bool));
        assert_eq!(ElementType::from_type_name("string"), None);
    }

    #[test]
    fn test_reductions() {
        let samples = Samples::Int32(vec![1, 2, 3, 4, 5]);
        assert_eq!(samples.mean(), Some(3.0));
        assert_eq!(samples.max(), Some(5.0));
        assert_eq!(samples.min(), Some(1.0));
        assert_eq!(samples.get(2), Some(3.0));
        assert_eq!(samples.get(10), None);
        assert_eq!(samples.last(), Some(5.0));
    }

    #[test]
    fn test_empty_reductions() {
        let samples = Samples::empty(ElementType::Float32);
        assert!(samples.is_empty());
        assert_eq!(samples.mean(), None);
        assert_eq!(samples.max(), None);
        assert_eq!(samples.min(), None);
    }

    #[test]
    fn test_bool_samples() {
        let samples = Samples::Bool(vec![true, false, true]);
        assert_eq!(samples.iter().collect::<Vec<_>>(), vec![1.0, 0.0, 1.0]);
        assert_eq!(samples.element_type(), ElementType::Bool);
    }

    #[test]
    fn test_from_f64_keeps_kind() {
        let samples = Samples::from_f64(ElementType::Int16, &[1.0, 2.9, -3.0]);
        assert_eq!(samples, Samples::Int16(vec![1, 2, -3]));

        let mut samples = Samples::from_f64(ElementType::Bool, &[0.0, 2.0]);
        assert_eq!(samples, Samples::Bool(vec![false, true]));
        samples.clear();
        assert!(samples.is_empty());
        assert_eq!(samples.element_type(), ElementType::Bool);
    }
}
