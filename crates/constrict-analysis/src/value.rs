//! The constant lattice
//!
//! Every stack slot and local variable is tracked as an [`AnalysisValue`].
//! The lattice is deliberately flat: a value is either a constant produced by
//! one specific instruction, or it is [`AnalysisValue::NotConstant`]. Equality
//! between constants compares the producing instruction (the origin), not the
//! payload, so two identical literals produced by different instructions merge
//! to [`AnalysisValue::NotConstant`] at a control-flow join.

use constrict_bytecode::{PrimitiveKind, TypeDesc};
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

/// Byte offset of the instruction that produced a constant
pub type Origin = u32;

/// A resolved class or primitive type tracked as a constant
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeToken {
    /// A primitive type, e.g. from a wrapper `TYPE` field
    Primitive(PrimitiveKind),
    /// The void pseudo-type
    Void,
    /// A named class
    Class(Arc<str>),
}

impl fmt::Display for TypeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive(kind) => f.write_str(kind.name()),
            Self::Void => f.write_str("void"),
            Self::Class(name) => f.write_str(name),
        }
    }
}

/// Payload of a scalar constant
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    /// The null reference
    Null,
    /// Boolean literal
    Bool(bool),
    /// Integer literal, widened to 64 bits while tracked
    Int(i64),
    /// Floating-point literal
    Float(f64),
    /// String literal
    Str(Arc<str>),
    /// Class literal or resolved class lookup
    Class(TypeToken),
}

/// A scalar constant together with its producing instruction
#[derive(Debug, Clone)]
pub struct ScalarConstant {
    /// Offset of the producing instruction
    pub origin: Origin,
    /// The constant payload
    pub value: ScalarValue,
}

/// A tracked array whose elements are known constants
///
/// Arrays are mutable, so the tracked picture is only valid while every alias
/// of the array is visible to the analysis. The transfer functions enforce
/// that by rewriting or invalidating all structurally equal slots whenever an
/// array is written or escapes.
#[derive(Debug, Clone)]
pub struct ArrayConstant {
    /// Offset of the instruction that produced this array picture
    pub origin: Origin,
    /// Array length
    pub len: usize,
    /// Declared element type
    pub element_kind: TypeDesc,
    /// Known elements by index; absent indices are unknown
    pub elements: FxHashMap<usize, ScalarValue>,
}

impl ArrayConstant {
    /// A fresh array with no known elements
    pub fn new(origin: Origin, len: usize, element_kind: TypeDesc) -> Self {
        Self {
            origin,
            len,
            element_kind,
            elements: FxHashMap::default(),
        }
    }

    /// Copy of this array with one element updated and a new origin
    ///
    /// Returns `None` when the index is out of bounds; such a store traps at
    /// runtime and the caller abandons tracking.
    pub fn with_element(&self, origin: Origin, index: usize, value: ScalarValue) -> Option<Self> {
        if index >= self.len {
            return None;
        }
        let mut copy = self.clone();
        copy.origin = origin;
        copy.elements.insert(index, value);
        Some(copy)
    }

    /// Known element at the given index
    pub fn element(&self, index: usize) -> Option<&ScalarValue> {
        self.elements.get(&index)
    }
}

/// A lattice value: a tracked constant or the top element
#[derive(Debug, Clone)]
pub enum AnalysisValue {
    /// Nothing is known about the value
    NotConstant,
    /// A scalar constant
    Scalar(ScalarConstant),
    /// An array with tracked elements
    Array(ArrayConstant),
}

impl AnalysisValue {
    /// A scalar constant produced at `origin`
    pub fn scalar(origin: Origin, value: ScalarValue) -> Self {
        Self::Scalar(ScalarConstant { origin, value })
    }

    /// Whether anything is known about this value
    pub fn is_constant(&self) -> bool {
        !matches!(self, Self::NotConstant)
    }

    /// The scalar payload, if this is a scalar constant
    pub fn as_scalar(&self) -> Option<&ScalarConstant> {
        match self {
            Self::Scalar(scalar) => Some(scalar),
            _ => None,
        }
    }

    /// The array picture, if this is a tracked array
    pub fn as_array(&self) -> Option<&ArrayConstant> {
        match self {
            Self::Array(array) => Some(array),
            _ => None,
        }
    }
}

/// Origin equality. Constants are equal when the same instruction produced
/// them, regardless of payload.
impl PartialEq for AnalysisValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::NotConstant, Self::NotConstant) => true,
            (Self::Scalar(a), Self::Scalar(b)) => a.origin == b.origin,
            (Self::Array(a), Self::Array(b)) => a.origin == b.origin,
            _ => false,
        }
    }
}

impl Eq for AnalysisValue {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_equality() {
        let a = AnalysisValue::scalar(4, ScalarValue::Int(1));
        let b = AnalysisValue::scalar(4, ScalarValue::Int(99));
        let c = AnalysisValue::scalar(9, ScalarValue::Int(1));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, AnalysisValue::NotConstant);
        assert_eq!(AnalysisValue::NotConstant, AnalysisValue::NotConstant);
    }

    #[test]
    fn test_array_with_element() {
        let array = ArrayConstant::new(0, 2, TypeDesc::reference("lang.String"));
        let updated = array.with_element(7, 1, ScalarValue::Str("x".into())).unwrap();
        assert_eq!(updated.origin, 7);
        assert_eq!(updated.element(1), Some(&ScalarValue::Str("x".into())));
        assert_eq!(updated.element(0), None);
        assert!(array.with_element(9, 2, ScalarValue::Null).is_none());
    }
}
