//! Strict-reflection interpretation
//!
//! [`ReflectionAnalyzer`] instantiates the dataflow interpreter with the
//! constant lattice from [`crate::value`]. It tracks literals, single-origin
//! locals and array pictures, models `lang.Class.forName` by resolving the
//! class at analysis time, and invalidates any tracked array the moment an
//! alias escapes the analyzed frame.

use crate::frame::AbstractFrame;
use crate::interpreter::{Interpretation, Literal};
use crate::value::{AnalysisValue, ArrayConstant, ScalarValue, TypeToken};
use constrict_bytecode::{ClassRef, FieldRef, MethodRef, PrimitiveKind, TypeDesc};
use once_cell::sync::Lazy;

/// Names of the runtime classes the analysis has built-in knowledge of
pub mod well_known {
    /// The reflective class type
    pub const CLASS: &str = "lang.Class";
    /// The string type
    pub const STRING: &str = "lang.String";
    /// The class loader type
    pub const CLASS_LOADER: &str = "lang.ClassLoader";
    /// Static field on wrapper classes holding the unwrapped primitive type
    pub const TYPE_FIELD: &str = "TYPE";
}

/// `lang.Class.forName(name)`
pub static FOR_NAME: Lazy<MethodRef> = Lazy::new(|| MethodRef {
    owner: well_known::CLASS.to_string(),
    name: "forName".to_string(),
    params: vec![TypeDesc::reference(well_known::STRING)],
    ret: TypeDesc::reference(well_known::CLASS),
    has_receiver: false,
});

/// `lang.Class.forName(name, initialize, loader)`
pub static FOR_NAME_WITH_LOADER: Lazy<MethodRef> = Lazy::new(|| MethodRef {
    owner: well_known::CLASS.to_string(),
    name: "forName".to_string(),
    params: vec![
        TypeDesc::reference(well_known::STRING),
        TypeDesc::Primitive(PrimitiveKind::Bool),
        TypeDesc::reference(well_known::CLASS_LOADER),
    ],
    ret: TypeDesc::reference(well_known::CLASS),
    has_receiver: false,
});

/// The primitive type held by a wrapper class's `TYPE` field, if `owner` is
/// one of the wrappers
pub fn wrapper_type_token(owner: &str) -> Option<TypeToken> {
    Some(match owner {
        "lang.Bool" => TypeToken::Primitive(PrimitiveKind::Bool),
        "lang.Byte" => TypeToken::Primitive(PrimitiveKind::I8),
        "lang.Short" => TypeToken::Primitive(PrimitiveKind::I16),
        "lang.Char" => TypeToken::Primitive(PrimitiveKind::Char),
        "lang.Int" => TypeToken::Primitive(PrimitiveKind::I32),
        "lang.Long" => TypeToken::Primitive(PrimitiveKind::I64),
        "lang.Float" => TypeToken::Primitive(PrimitiveKind::F32),
        "lang.Double" => TypeToken::Primitive(PrimitiveKind::F64),
        "lang.Void" => TypeToken::Void,
        _ => return None,
    })
}

/// Resolves class names to type tokens at analysis time
///
/// A `forName` call whose name argument is a tracked constant is answered
/// through this trait. Returning `None` keeps the call result unknown; the
/// analysis never fails because a class is missing.
pub trait ClassResolver: Send + Sync {
    /// Resolve a fully qualified class name
    ///
    /// `initialize` carries the flag of the three-argument `forName`; the
    /// one-argument form passes `true`.
    fn resolve(&self, name: &str, initialize: bool) -> Option<TypeToken>;
}

impl<F> ClassResolver for F
where
    F: Fn(&str, bool) -> Option<TypeToken> + Send + Sync,
{
    fn resolve(&self, name: &str, initialize: bool) -> Option<TypeToken> {
        self(name, initialize)
    }
}

/// The [`Interpretation`] computing constant operands at reflective call sites
pub struct ReflectionAnalyzer<R> {
    resolver: R,
}

impl<R> ReflectionAnalyzer<R> {
    /// Create an analyzer resolving `forName` through the given resolver
    pub fn new(resolver: R) -> Self {
        Self { resolver }
    }

    /// Drop a tracked array from every slot that aliases it
    ///
    /// Called whenever an array value leaves the analyzed frame: passed to a
    /// call, stored to a field or local, or written through with something
    /// the analysis cannot track.
    fn invalidate_escaped(
        &self,
        state: &mut AbstractFrame<AnalysisValue>,
        value: &AnalysisValue,
    ) {
        if value.as_array().is_some() {
            state.rewrite(|slot| (slot == value).then_some(AnalysisValue::NotConstant));
        }
    }
}

impl<R: ClassResolver> ReflectionAnalyzer<R> {
    fn resolve_for_name(
        &self,
        origin: u32,
        name: &AnalysisValue,
        initialize: bool,
    ) -> AnalysisValue {
        let Some(ScalarValue::Str(name)) = name.as_scalar().map(|s| &s.value) else {
            return AnalysisValue::NotConstant;
        };
        match self.resolver.resolve(name, initialize) {
            Some(token) => AnalysisValue::scalar(origin, ScalarValue::Class(token)),
            None => AnalysisValue::NotConstant,
        }
    }
}

impl<R: ClassResolver> Interpretation for ReflectionAnalyzer<R> {
    type Value = AnalysisValue;

    fn top(&self) -> AnalysisValue {
        AnalysisValue::NotConstant
    }

    fn join(&self, left: &AnalysisValue, right: &AnalysisValue) -> AnalysisValue {
        // Origin equality: the same constant from two different instructions
        // does not survive a merge.
        if left == right {
            left.clone()
        } else {
            AnalysisValue::NotConstant
        }
    }

    fn literal(
        &self,
        origin: u32,
        _state: &mut AbstractFrame<AnalysisValue>,
        literal: Literal<'_>,
    ) -> AnalysisValue {
        let value = match literal {
            Literal::Null => ScalarValue::Null,
            Literal::Bool(b) => ScalarValue::Bool(b),
            Literal::Int(n) => ScalarValue::Int(n),
            Literal::Float(f) => ScalarValue::Float(f),
            Literal::Str(s) => ScalarValue::Str(s.into()),
        };
        AnalysisValue::scalar(origin, value)
    }

    fn class_literal(
        &self,
        origin: u32,
        _state: &mut AbstractFrame<AnalysisValue>,
        class: &ClassRef,
    ) -> AnalysisValue {
        AnalysisValue::scalar(
            origin,
            ScalarValue::Class(TypeToken::Class(class.name.as_str().into())),
        )
    }

    fn load_local(
        &self,
        origin: u32,
        _state: &mut AbstractFrame<AnalysisValue>,
        _index: u16,
        value: &AnalysisValue,
    ) -> AnalysisValue {
        // The load becomes the new origin. Arrays never survive in locals,
        // so only scalars are carried.
        match value.as_scalar() {
            Some(scalar) => AnalysisValue::scalar(origin, scalar.value.clone()),
            None => AnalysisValue::NotConstant,
        }
    }

    fn store_local(
        &self,
        origin: u32,
        state: &mut AbstractFrame<AnalysisValue>,
        _index: u16,
        value: AnalysisValue,
    ) -> AnalysisValue {
        match &value {
            AnalysisValue::Scalar(scalar) => {
                AnalysisValue::scalar(origin, scalar.value.clone())
            }
            AnalysisValue::Array(_) => {
                // A named array variable can be mutated through paths the
                // frame-local picture cannot see. Stop tracking it.
                self.invalidate_escaped(state, &value);
                AnalysisValue::NotConstant
            }
            AnalysisValue::NotConstant => AnalysisValue::NotConstant,
        }
    }

    fn new_array(
        &self,
        origin: u32,
        _state: &mut AbstractFrame<AnalysisValue>,
        element: &ClassRef,
        length: AnalysisValue,
    ) -> AnalysisValue {
        match length.as_scalar().map(|s| &s.value) {
            Some(&ScalarValue::Int(n)) if n >= 0 => AnalysisValue::Array(ArrayConstant::new(
                origin,
                n as usize,
                TypeDesc::reference(element.name.as_str()),
            )),
            _ => AnalysisValue::NotConstant,
        }
    }

    fn store_element(
        &self,
        origin: u32,
        state: &mut AbstractFrame<AnalysisValue>,
        array: AnalysisValue,
        index: AnalysisValue,
        value: AnalysisValue,
    ) {
        let Some(picture) = array.as_array() else {
            // Store into an untracked array leaves the frame unchanged.
            return;
        };

        let element_index = index.as_scalar().and_then(|s| match s.value {
            ScalarValue::Int(n) if n >= 0 => Some(n as usize),
            _ => None,
        });
        let element_value = value.as_scalar().map(|s| s.value.clone());

        if let (Some(element_index), Some(element_value)) = (element_index, element_value) {
            if let Some(updated) = picture.with_element(origin, element_index, element_value) {
                // Rewrite every alias of the old picture to the updated one.
                let updated = AnalysisValue::Array(updated);
                state.rewrite(|slot| (slot == &array).then(|| updated.clone()));
                return;
            }
        }

        // Unknown index, untracked value or out-of-bounds store.
        self.invalidate_escaped(state, &array);
        self.invalidate_escaped(state, &value);
    }

    fn store_field(
        &self,
        _origin: u32,
        state: &mut AbstractFrame<AnalysisValue>,
        _field: &FieldRef,
        _object: AnalysisValue,
        value: AnalysisValue,
    ) {
        self.invalidate_escaped(state, &value);
    }

    fn load_static(
        &self,
        origin: u32,
        _state: &mut AbstractFrame<AnalysisValue>,
        field: &FieldRef,
    ) -> AnalysisValue {
        if field.is_static && field.name == well_known::TYPE_FIELD {
            if let Some(token) = wrapper_type_token(&field.owner) {
                return AnalysisValue::scalar(origin, ScalarValue::Class(token));
            }
        }
        AnalysisValue::NotConstant
    }

    fn store_static(
        &self,
        _origin: u32,
        state: &mut AbstractFrame<AnalysisValue>,
        _field: &FieldRef,
        value: AnalysisValue,
    ) {
        self.invalidate_escaped(state, &value);
    }

    fn invoke(
        &self,
        origin: u32,
        state: &mut AbstractFrame<AnalysisValue>,
        method: &MethodRef,
        operands: Vec<AnalysisValue>,
    ) -> AnalysisValue {
        for operand in &operands {
            self.invalidate_escaped(state, operand);
        }
        if method == &*FOR_NAME {
            return self.resolve_for_name(origin, &operands[0], true);
        }
        if method == &*FOR_NAME_WITH_LOADER {
            let initialize = match operands[1].as_scalar().map(|s| &s.value) {
                Some(&ScalarValue::Bool(b)) => b,
                Some(&ScalarValue::Int(n)) => n != 0,
                _ => return AnalysisValue::NotConstant,
            };
            return self.resolve_for_name(origin, &operands[0], initialize);
        }
        AnalysisValue::NotConstant
    }

    fn invoke_void(
        &self,
        _origin: u32,
        state: &mut AbstractFrame<AnalysisValue>,
        _method: &MethodRef,
        operands: Vec<AnalysisValue>,
    ) {
        for operand in &operands {
            self.invalidate_escaped(state, operand);
        }
    }

    fn cast_check(
        &self,
        origin: u32,
        _state: &mut AbstractFrame<AnalysisValue>,
        _class: &ClassRef,
        object: AnalysisValue,
    ) -> AnalysisValue {
        // A cast of null always succeeds and stays null. Any other operand
        // comes out untracked; aliases elsewhere in the frame keep their
        // picture.
        match object.as_scalar().map(|s| &s.value) {
            Some(ScalarValue::Null) => AnalysisValue::scalar(origin, ScalarValue::Null),
            _ => AnalysisValue::NotConstant,
        }
    }
}
