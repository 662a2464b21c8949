//! Call-site constant registry
//!
//! [`StrictReflectionRegistry`] runs the reflection analysis at most once per
//! method and caches the per-offset frames. Enforcement code then asks, for a
//! given call site and argument position, whether the argument is a
//! compile-time constant and what its value is. A method whose analysis
//! failed answers every query with "unknown", never with an error.

use crate::frame::AbstractFrame;
use crate::interpreter::Interpreter;
use crate::reflect::{well_known, ClassResolver, ReflectionAnalyzer, FOR_NAME, FOR_NAME_WITH_LOADER};
use crate::value::{AnalysisValue, ArrayConstant, ScalarValue, TypeToken};
use constrict_bytecode::{ConstantPool, Function, MethodRef, PrimitiveKind, TypeDesc};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Opaque identifier for an analyzed method, chosen by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId(pub u32);

/// A constant argument value, narrowed to the declared parameter type
#[derive(Debug, Clone, PartialEq)]
pub enum ConstOperand {
    /// The null reference, distinct from "not a constant"
    Null,
    /// Boolean constant
    Bool(bool),
    /// 8-bit integer constant
    I8(i8),
    /// 16-bit integer constant
    I16(i16),
    /// Character constant
    Char(char),
    /// 32-bit integer constant
    I32(i32),
    /// 64-bit integer constant
    I64(i64),
    /// Floating-point constant
    F64(f64),
    /// String constant
    Str(Arc<str>),
    /// Resolved class constant
    Class(TypeToken),
    /// Array constant with per-element values
    Array {
        /// Declared element type
        element_kind: TypeDesc,
        /// Elements in order; `None` marks an element with no known value
        elements: Vec<Option<ConstOperand>>,
    },
}

impl ConstOperand {
    /// Whether this constant is the null reference
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// Reflective members whose arguments the strict mode requires to be constant
static SENSITIVE_TARGETS: Lazy<Vec<MethodRef>> = Lazy::new(|| {
    let class = TypeDesc::reference(well_known::CLASS);
    let string = TypeDesc::reference(well_known::STRING);
    let class_array = TypeDesc::array(class);
    let record_component = TypeDesc::reference("lang.RecordComponent");
    let object = TypeDesc::reference("lang.Object");
    let field = TypeDesc::reference("lang.Field");
    let method = TypeDesc::reference("lang.Method");
    let constructor = TypeDesc::reference("lang.Constructor");
    let member = |name: &str, params: Vec<TypeDesc>, ret: TypeDesc| MethodRef {
        owner: well_known::CLASS.to_string(),
        name: name.to_string(),
        params,
        ret,
        has_receiver: true,
    };
    vec![
        FOR_NAME.clone(),
        FOR_NAME_WITH_LOADER.clone(),
        member("getField", vec![string.clone()], field.clone()),
        member("getDeclaredField", vec![string.clone()], field.clone()),
        member(
            "getMethod",
            vec![string.clone(), class_array.clone()],
            method.clone(),
        ),
        member(
            "getDeclaredMethod",
            vec![string.clone(), class_array.clone()],
            method.clone(),
        ),
        member("getConstructor", vec![class_array.clone()], constructor.clone()),
        member(
            "getDeclaredConstructor",
            vec![class_array.clone()],
            constructor.clone(),
        ),
        member("getFields", Vec::new(), TypeDesc::array(field.clone())),
        member("getDeclaredFields", Vec::new(), TypeDesc::array(field)),
        member("getMethods", Vec::new(), TypeDesc::array(method.clone())),
        member("getDeclaredMethods", Vec::new(), TypeDesc::array(method)),
        member("getConstructors", Vec::new(), TypeDesc::array(constructor.clone())),
        member(
            "getDeclaredConstructors",
            Vec::new(),
            TypeDesc::array(constructor),
        ),
        member("getClasses", Vec::new(), class_array.clone()),
        member("getDeclaredClasses", Vec::new(), class_array.clone()),
        member("getNestMembers", Vec::new(), class_array.clone()),
        member("getPermittedSubclasses", Vec::new(), class_array),
        member(
            "getRecordComponents",
            Vec::new(),
            TypeDesc::array(record_component),
        ),
        member("getSigners", Vec::new(), TypeDesc::array(object)),
    ]
});

/// Whether strict mode requires constant arguments for calls to this method
pub fn is_sensitive_target(target: &MethodRef) -> bool {
    SENSITIVE_TARGETS.iter().any(|m| m == target)
}

enum MethodEntry {
    Analyzed(FxHashMap<u32, AbstractFrame<AnalysisValue>>),
    Failed,
}

/// Caches per-method analysis results and answers call-site queries
pub struct StrictReflectionRegistry<R> {
    analyzer: ReflectionAnalyzer<R>,
    entries: DashMap<MethodId, MethodEntry>,
}

impl<R: ClassResolver> StrictReflectionRegistry<R> {
    /// Create a registry resolving `forName` through the given resolver
    pub fn new(resolver: R) -> Self {
        Self {
            analyzer: ReflectionAnalyzer::new(resolver),
            entries: DashMap::new(),
        }
    }

    /// Analyze a method, unless it has been analyzed before
    ///
    /// Idempotent: repeated calls for the same [`MethodId`] keep the first
    /// result and never rerun the analysis.
    pub fn analyze(&self, method: MethodId, function: &Function, constants: &ConstantPool) {
        self.entries.entry(method).or_insert_with(|| {
            match Interpreter::new(&self.analyzer, constants).analyze(function) {
                Ok(frames) => {
                    tracing::debug!(
                        method = method.0,
                        function = %function.name,
                        offsets = frames.len(),
                        "analyzed method"
                    );
                    MethodEntry::Analyzed(frames)
                }
                Err(error) => {
                    tracing::warn!(
                        method = method.0,
                        function = %function.name,
                        %error,
                        "analysis failed, treating every operand as unknown"
                    );
                    MethodEntry::Failed
                }
            }
        });
    }

    /// Whether the method has an analysis result (successful or failed)
    pub fn is_analyzed(&self, method: MethodId) -> bool {
        self.entries.contains_key(&method)
    }

    /// Constant value of one argument at a call site, if tracked
    ///
    /// `call_offset` is the offset of the call instruction in the analyzed
    /// method; `target` is the called method and `index` the operand position
    /// (the receiver, when present, is operand 0). Returns `None` when the
    /// method was not analyzed, the offset is unreachable, or the argument is
    /// not a compile-time constant.
    ///
    /// # Panics
    ///
    /// Panics when `index` is not a valid operand position for `target`; that
    /// is a caller bug, not a property of the analyzed code.
    pub fn constant_operand(
        &self,
        method: MethodId,
        call_offset: u32,
        target: &MethodRef,
        index: usize,
    ) -> Option<ConstOperand> {
        let operand_count = target.operand_count();
        assert!(
            index < operand_count,
            "operand index {index} out of range for {target}"
        );
        let entry = self.entries.get(&method)?;
        let frames = match entry.value() {
            MethodEntry::Analyzed(frames) => frames,
            MethodEntry::Failed => return None,
        };
        let frame = frames.get(&call_offset)?;
        // The frame is the state in effect when the call executes, so the
        // arguments are still on the stack: the last operand is on top.
        let operand = frame.operand(operand_count - index - 1)?;
        match operand {
            AnalysisValue::Scalar(scalar) => coerce_scalar(&scalar.value, target, index),
            AnalysisValue::Array(array) => Some(materialize_array(array)),
            AnalysisValue::NotConstant => None,
        }
    }
}

/// Narrow a tracked scalar to the declared type of the receiving parameter
fn coerce_scalar(value: &ScalarValue, target: &MethodRef, index: usize) -> Option<ConstOperand> {
    let declared = if target.has_receiver {
        // The receiver has no declared parameter type.
        index.checked_sub(1).and_then(|i| target.params.get(i))
    } else {
        target.params.get(index)
    };
    match value {
        ScalarValue::Null => Some(ConstOperand::Null),
        ScalarValue::Bool(b) => Some(ConstOperand::Bool(*b)),
        ScalarValue::Int(n) => narrow_int(*n, declared),
        ScalarValue::Float(f) => Some(ConstOperand::F64(*f)),
        ScalarValue::Str(s) => Some(ConstOperand::Str(s.clone())),
        ScalarValue::Class(token) => Some(ConstOperand::Class(token.clone())),
    }
}

fn narrow_int(n: i64, declared: Option<&TypeDesc>) -> Option<ConstOperand> {
    let kind = match declared {
        Some(TypeDesc::Primitive(kind)) => *kind,
        _ => return Some(ConstOperand::I64(n)),
    };
    let narrowed = match kind {
        PrimitiveKind::Bool => ConstOperand::Bool(n != 0),
        PrimitiveKind::I8 => ConstOperand::I8(n as i8),
        PrimitiveKind::I16 => ConstOperand::I16(n as i16),
        // Characters are tracked as offsets from '0'.
        PrimitiveKind::Char => {
            let code = ('0' as i64).wrapping_add(n) as u32;
            ConstOperand::Char(char::from_u32(code)?)
        }
        PrimitiveKind::I32 => ConstOperand::I32(n as i32),
        PrimitiveKind::I64 => ConstOperand::I64(n),
        PrimitiveKind::F32 | PrimitiveKind::F64 => ConstOperand::F64(n as f64),
    };
    Some(narrowed)
}

/// Expand a tracked array into per-element constants, in declaration order
fn materialize_array(array: &ArrayConstant) -> ConstOperand {
    let elements = (0..array.len)
        .map(|i| array.element(i).map(scalar_operand))
        .collect();
    ConstOperand::Array {
        element_kind: array.element_kind.clone(),
        elements,
    }
}

/// Array elements keep their tracked width; no parameter narrows them
fn scalar_operand(value: &ScalarValue) -> ConstOperand {
    match value {
        ScalarValue::Null => ConstOperand::Null,
        ScalarValue::Bool(b) => ConstOperand::Bool(*b),
        ScalarValue::Int(n) => ConstOperand::I64(*n),
        ScalarValue::Float(f) => ConstOperand::F64(*f),
        ScalarValue::Str(s) => ConstOperand::Str(s.clone()),
        ScalarValue::Class(token) => ConstOperand::Class(token.clone()),
    }
}
