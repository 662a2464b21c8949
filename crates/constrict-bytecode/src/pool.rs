//! Constant pool for modules
//!
//! The pool holds the string literals, class references, field references
//! and method references that bytecode instructions refer to by index.

use crate::types::TypeDesc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reference to a class by fully qualified name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClassRef {
    /// Fully qualified class name, e.g. `lang.String`
    pub name: String,
}

/// Reference to a field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    /// Fully qualified name of the declaring class
    pub owner: String,
    /// Field name
    pub name: String,
    /// Declared field type
    pub ty: TypeDesc,
    /// Whether the field is static
    pub is_static: bool,
}

/// Reference to a method, including its full signature
///
/// The signature is what the analysis uses to compute operand counts at call
/// sites and to narrow tracked integer constants to the declared parameter
/// types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    /// Fully qualified name of the declaring class
    pub owner: String,
    /// Method name
    pub name: String,
    /// Declared parameter types, excluding the receiver
    pub params: Vec<TypeDesc>,
    /// Declared return type
    pub ret: TypeDesc,
    /// Whether calls pass a receiver object before the parameters
    pub has_receiver: bool,
}

impl MethodRef {
    /// Number of operands popped at a call site (receiver included)
    pub fn operand_count(&self) -> usize {
        self.params.len() + usize::from(self.has_receiver)
    }

    /// Whether the method returns a value
    pub fn returns_value(&self) -> bool {
        self.ret != TypeDesc::Void
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}(", self.owner, self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{param}")?;
        }
        write!(f, ")")
    }
}

/// Constant pool attached to a module
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstantPool {
    /// String literals
    pub strings: Vec<String>,
    /// Class references
    pub classes: Vec<ClassRef>,
    /// Field references
    pub fields: Vec<FieldRef>,
    /// Method references
    pub methods: Vec<MethodRef>,
}

impl ConstantPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a string literal, returning its index
    pub fn add_string(&mut self, value: impl Into<String>) -> u32 {
        self.strings.push(value.into());
        (self.strings.len() - 1) as u32
    }

    /// Add a class reference, returning its index
    pub fn add_class(&mut self, name: impl Into<String>) -> u32 {
        self.classes.push(ClassRef { name: name.into() });
        (self.classes.len() - 1) as u32
    }

    /// Add a field reference, returning its index
    pub fn add_field(&mut self, field: FieldRef) -> u32 {
        self.fields.push(field);
        (self.fields.len() - 1) as u32
    }

    /// Add a method reference, returning its index
    pub fn add_method(&mut self, method: MethodRef) -> u32 {
        self.methods.push(method);
        (self.methods.len() - 1) as u32
    }

    /// Look up a string literal
    pub fn get_string(&self, index: u32) -> Option<&str> {
        self.strings.get(index as usize).map(String::as_str)
    }

    /// Look up a class reference
    pub fn get_class(&self, index: u32) -> Option<&ClassRef> {
        self.classes.get(index as usize)
    }

    /// Look up a field reference
    pub fn get_field(&self, index: u32) -> Option<&FieldRef> {
        self.fields.get(index as usize)
    }

    /// Look up a method reference
    pub fn get_method(&self, index: u32) -> Option<&MethodRef> {
        self.methods.get(index as usize)
    }
}
