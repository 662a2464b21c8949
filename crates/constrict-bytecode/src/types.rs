//! Type descriptors for signatures and field declarations

use serde::{Deserialize, Serialize};
use std::fmt;

/// Primitive value kinds of the Constrict VM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveKind {
    /// Boolean
    Bool,
    /// 8-bit signed integer
    I8,
    /// 16-bit signed integer
    I16,
    /// Unicode character
    Char,
    /// 32-bit signed integer
    I32,
    /// 64-bit signed integer
    I64,
    /// 32-bit float
    F32,
    /// 64-bit float
    F64,
}

impl PrimitiveKind {
    /// The runtime name of this primitive type
    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::I8 => "int8",
            Self::I16 => "int16",
            Self::Char => "char",
            Self::I32 => "int32",
            Self::I64 => "int64",
            Self::F32 => "float32",
            Self::F64 => "float64",
        }
    }
}

/// Type descriptor used in field and method signatures
///
/// Descriptors drive operand counts for calls and the narrowing applied when
/// a tracked integer constant is read back as a typed argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeDesc {
    /// No value (return types only)
    Void,
    /// Primitive value
    Primitive(PrimitiveKind),
    /// Reference to a named class
    Reference(String),
    /// Array with the given element type
    Array(Box<TypeDesc>),
}

impl TypeDesc {
    /// Shorthand for a reference descriptor
    pub fn reference(name: impl Into<String>) -> Self {
        Self::Reference(name.into())
    }

    /// Shorthand for an array descriptor
    pub fn array(element: TypeDesc) -> Self {
        Self::Array(Box::new(element))
    }

    /// Check whether this descriptor denotes a primitive type
    pub fn is_primitive(&self) -> bool {
        matches!(self, Self::Primitive(_))
    }

    /// Binary encoding tag for the module format
    pub(crate) fn tag(&self) -> u8 {
        match self {
            Self::Void => 0,
            Self::Primitive(PrimitiveKind::Bool) => 1,
            Self::Primitive(PrimitiveKind::I8) => 2,
            Self::Primitive(PrimitiveKind::I16) => 3,
            Self::Primitive(PrimitiveKind::Char) => 4,
            Self::Primitive(PrimitiveKind::I32) => 5,
            Self::Primitive(PrimitiveKind::I64) => 6,
            Self::Primitive(PrimitiveKind::F32) => 7,
            Self::Primitive(PrimitiveKind::F64) => 8,
            Self::Reference(_) => 9,
            Self::Array(_) => 10,
        }
    }

    /// Decode a descriptor tag back into a primitive or void descriptor
    ///
    /// Reference and array tags carry trailing data and are handled by the
    /// module decoder.
    pub(crate) fn from_simple_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Void),
            1 => Some(Self::Primitive(PrimitiveKind::Bool)),
            2 => Some(Self::Primitive(PrimitiveKind::I8)),
            3 => Some(Self::Primitive(PrimitiveKind::I16)),
            4 => Some(Self::Primitive(PrimitiveKind::Char)),
            5 => Some(Self::Primitive(PrimitiveKind::I32)),
            6 => Some(Self::Primitive(PrimitiveKind::I64)),
            7 => Some(Self::Primitive(PrimitiveKind::F32)),
            8 => Some(Self::Primitive(PrimitiveKind::F64)),
            _ => None,
        }
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => write!(f, "void"),
            Self::Primitive(kind) => write!(f, "{}", kind.name()),
            Self::Reference(name) => write!(f, "{name}"),
            Self::Array(element) => write!(f, "{element}[]"),
        }
    }
}
