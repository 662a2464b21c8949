//! Forward dataflow interpreter
//!
//! [`Interpreter`] runs a worklist fixpoint over a function's control-flow
//! graph, exception edges included. The lattice and the transfer behavior are
//! supplied by an [`Interpretation`]; every hook defaults to producing the top
//! element, so an interpretation only overrides the instructions it can say
//! something about.

use crate::error::AnalysisError;
use crate::frame::AbstractFrame;
use constrict_bytecode::{
    decode_function, ClassRef, ConstantPool, FieldRef, Function, Insn, MethodRef, Opcode,
};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use std::fmt;

/// A literal pushed by a constant instruction, with pool strings resolved
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal<'a> {
    /// The null reference
    Null,
    /// Boolean literal
    Bool(bool),
    /// Integer literal
    Int(i64),
    /// Floating-point literal
    Float(f64),
    /// String literal
    Str(&'a str),
}

/// Lattice and transfer functions for one dataflow analysis
///
/// Hooks receive the instruction offset as `origin`, the frame after the
/// instruction's operands have been popped, and the popped operands. A hook
/// may rewrite unrelated frame slots through the state, which is how array
/// aliasing is handled.
pub trait Interpretation {
    /// The tracked lattice value
    type Value: Clone + PartialEq + fmt::Debug;

    /// The top element: nothing is known
    fn top(&self) -> Self::Value;

    /// Join two values at a control-flow merge
    fn join(&self, left: &Self::Value, right: &Self::Value) -> Self::Value;

    /// A literal constant is pushed
    fn literal(
        &self,
        origin: u32,
        state: &mut AbstractFrame<Self::Value>,
        literal: Literal<'_>,
    ) -> Self::Value {
        let _ = (origin, state, literal);
        self.top()
    }

    /// A class literal is pushed
    fn class_literal(
        &self,
        origin: u32,
        state: &mut AbstractFrame<Self::Value>,
        class: &ClassRef,
    ) -> Self::Value {
        let _ = (origin, state, class);
        self.top()
    }

    /// A local variable is loaded; `value` is its current tracked value
    fn load_local(
        &self,
        origin: u32,
        state: &mut AbstractFrame<Self::Value>,
        index: u16,
        value: &Self::Value,
    ) -> Self::Value {
        let _ = (origin, state, index, value);
        self.top()
    }

    /// A value is stored to a local variable; the result becomes the local
    fn store_local(
        &self,
        origin: u32,
        state: &mut AbstractFrame<Self::Value>,
        index: u16,
        value: Self::Value,
    ) -> Self::Value {
        let _ = (origin, state, index, value);
        self.top()
    }

    /// A local variable is incremented in place
    fn increment_local(
        &self,
        origin: u32,
        state: &mut AbstractFrame<Self::Value>,
        index: u16,
        delta: i16,
        value: &Self::Value,
    ) -> Self::Value {
        let _ = (origin, state, index, delta, value);
        self.top()
    }

    /// A binary arithmetic, logic or comparison operation
    fn binary_op(
        &self,
        origin: u32,
        state: &mut AbstractFrame<Self::Value>,
        opcode: Opcode,
        left: Self::Value,
        right: Self::Value,
    ) -> Self::Value {
        let _ = (origin, state, opcode, left, right);
        self.top()
    }

    /// A unary operation or primitive conversion
    fn unary_op(
        &self,
        origin: u32,
        state: &mut AbstractFrame<Self::Value>,
        opcode: Opcode,
        value: Self::Value,
    ) -> Self::Value {
        let _ = (origin, state, opcode, value);
        self.top()
    }

    /// An object allocation
    fn new_object(
        &self,
        origin: u32,
        state: &mut AbstractFrame<Self::Value>,
        class: &ClassRef,
    ) -> Self::Value {
        let _ = (origin, state, class);
        self.top()
    }

    /// An array allocation with the given element type and length
    fn new_array(
        &self,
        origin: u32,
        state: &mut AbstractFrame<Self::Value>,
        element: &ClassRef,
        length: Self::Value,
    ) -> Self::Value {
        let _ = (origin, state, element, length);
        self.top()
    }

    /// An array element is loaded
    fn load_element(
        &self,
        origin: u32,
        state: &mut AbstractFrame<Self::Value>,
        array: Self::Value,
        index: Self::Value,
    ) -> Self::Value {
        let _ = (origin, state, array, index);
        self.top()
    }

    /// An array element is stored
    fn store_element(
        &self,
        origin: u32,
        state: &mut AbstractFrame<Self::Value>,
        array: Self::Value,
        index: Self::Value,
        value: Self::Value,
    ) {
        let _ = (origin, state, array, index, value);
    }

    /// An array length is read
    fn array_length(
        &self,
        origin: u32,
        state: &mut AbstractFrame<Self::Value>,
        array: Self::Value,
    ) -> Self::Value {
        let _ = (origin, state, array);
        self.top()
    }

    /// An instance field is loaded
    fn load_field(
        &self,
        origin: u32,
        state: &mut AbstractFrame<Self::Value>,
        field: &FieldRef,
        object: Self::Value,
    ) -> Self::Value {
        let _ = (origin, state, field, object);
        self.top()
    }

    /// An instance field is stored
    fn store_field(
        &self,
        origin: u32,
        state: &mut AbstractFrame<Self::Value>,
        field: &FieldRef,
        object: Self::Value,
        value: Self::Value,
    ) {
        let _ = (origin, state, field, object, value);
    }

    /// A static field is loaded
    fn load_static(
        &self,
        origin: u32,
        state: &mut AbstractFrame<Self::Value>,
        field: &FieldRef,
    ) -> Self::Value {
        let _ = (origin, state, field);
        self.top()
    }

    /// A static field is stored
    fn store_static(
        &self,
        origin: u32,
        state: &mut AbstractFrame<Self::Value>,
        field: &FieldRef,
        value: Self::Value,
    ) {
        let _ = (origin, state, field, value);
    }

    /// A call to a method that returns a value; operands are in push order
    fn invoke(
        &self,
        origin: u32,
        state: &mut AbstractFrame<Self::Value>,
        method: &MethodRef,
        operands: Vec<Self::Value>,
    ) -> Self::Value {
        let _ = (origin, state, method, operands);
        self.top()
    }

    /// A call to a void method; operands are in push order
    fn invoke_void(
        &self,
        origin: u32,
        state: &mut AbstractFrame<Self::Value>,
        method: &MethodRef,
        operands: Vec<Self::Value>,
    ) {
        let _ = (origin, state, method, operands);
    }

    /// A checked cast
    fn cast_check(
        &self,
        origin: u32,
        state: &mut AbstractFrame<Self::Value>,
        class: &ClassRef,
        object: Self::Value,
    ) -> Self::Value {
        let _ = (origin, state, class, object);
        self.top()
    }

    /// An instance-of test
    fn instance_of(
        &self,
        origin: u32,
        state: &mut AbstractFrame<Self::Value>,
        class: &ClassRef,
        object: Self::Value,
    ) -> Self::Value {
        let _ = (origin, state, class, object);
        self.top()
    }

    /// The value on the stack at entry to an exception handler
    fn caught_exception(&self) -> Self::Value {
        self.top()
    }
}

/// Worklist fixpoint driver over one function
pub struct Interpreter<'a, I> {
    interpretation: &'a I,
    constants: &'a ConstantPool,
}

impl<'a, I: Interpretation> Interpreter<'a, I> {
    /// Create an interpreter over the given pool
    pub fn new(interpretation: &'a I, constants: &'a ConstantPool) -> Self {
        Self {
            interpretation,
            constants,
        }
    }

    /// Run the analysis to a fixpoint
    ///
    /// Returns, for every reachable instruction offset, the frame in effect
    /// when that instruction executes (its operands still on the stack).
    pub fn analyze(
        &self,
        function: &Function,
    ) -> Result<FxHashMap<u32, AbstractFrame<I::Value>>, AnalysisError> {
        let instructions = decode_function(&function.code)?;
        let mut states: FxHashMap<u32, AbstractFrame<I::Value>> = FxHashMap::default();
        let Some(entry) = instructions.first() else {
            return Ok(states);
        };

        let index: FxHashMap<u32, usize> = instructions
            .iter()
            .enumerate()
            .map(|(position, instruction)| (instruction.offset, position))
            .collect();
        for handler in &function.exception_handlers {
            if !index.contains_key(&handler.handler) {
                return Err(AnalysisError::UnknownOffset(handler.handler));
            }
        }

        let entry_offset = entry.offset;
        states.insert(
            entry_offset,
            AbstractFrame::entry(function.local_count, self.interpretation.top()),
        );
        let mut worklist: VecDeque<u32> = VecDeque::from([entry_offset]);
        let mut queued: FxHashSet<u32> = FxHashSet::default();
        queued.insert(entry_offset);

        while let Some(offset) = worklist.pop_front() {
            queued.remove(&offset);
            let position = *index
                .get(&offset)
                .ok_or(AnalysisError::UnknownOffset(offset))?;
            let instruction = &instructions[position];
            let mut state = states
                .get(&offset)
                .ok_or(AnalysisError::UnknownOffset(offset))?
                .clone();
            self.transfer(offset, &instruction.insn, &mut state)?;

            let next = instructions.get(position + 1).map(|i| i.offset);
            for successor in instruction.insn.successors(next) {
                if !index.contains_key(&successor) {
                    return Err(AnalysisError::UnknownOffset(successor));
                }
                self.propagate(successor, state.clone(), &mut states, &mut worklist, &mut queued)?;
            }

            if instruction.insn.can_throw() {
                for handler in function.handlers_for(offset) {
                    let mut handler_state = state.clone();
                    handler_state.clear_stack();
                    handler_state.push(self.interpretation.caught_exception());
                    self.propagate(
                        handler.handler,
                        handler_state,
                        &mut states,
                        &mut worklist,
                        &mut queued,
                    )?;
                }
            }
        }

        Ok(states)
    }

    fn propagate(
        &self,
        target: u32,
        incoming: AbstractFrame<I::Value>,
        states: &mut FxHashMap<u32, AbstractFrame<I::Value>>,
        worklist: &mut VecDeque<u32>,
        queued: &mut FxHashSet<u32>,
    ) -> Result<(), AnalysisError> {
        match states.get(&target) {
            None => {
                states.insert(target, incoming);
                if queued.insert(target) {
                    worklist.push_back(target);
                }
            }
            Some(existing) => {
                let merged = existing
                    .merge(&incoming, |a, b| self.interpretation.join(a, b))
                    .map_err(|mismatch| AnalysisError::StackDepthMismatch {
                        offset: target,
                        left: mismatch.left,
                        right: mismatch.right,
                    })?;
                let changed = &merged != existing;
                if changed {
                    states.insert(target, merged);
                    if queued.insert(target) {
                        worklist.push_back(target);
                    }
                }
            }
        }
        Ok(())
    }

    fn transfer(
        &self,
        offset: u32,
        insn: &Insn,
        state: &mut AbstractFrame<I::Value>,
    ) -> Result<(), AnalysisError> {
        let interp = self.interpretation;
        match insn {
            Insn::Nop | Insn::Jmp { .. } | Insn::ReturnVoid => {}

            Insn::Pop | Insn::Return | Insn::Throw | Insn::Branch { .. } => {
                self.pop(state, offset)?;
            }
            Insn::Dup => {
                let top_value = state
                    .operand(0)
                    .ok_or(AnalysisError::StackUnderflow(offset))?
                    .clone();
                state.push(top_value);
            }
            Insn::Swap => {
                let a = self.pop(state, offset)?;
                let b = self.pop(state, offset)?;
                state.push(a);
                state.push(b);
            }

            Insn::ConstNull => {
                let value = interp.literal(offset, state, Literal::Null);
                state.push(value);
            }
            Insn::ConstBool(b) => {
                let value = interp.literal(offset, state, Literal::Bool(*b));
                state.push(value);
            }
            Insn::ConstI32(n) => {
                let value = interp.literal(offset, state, Literal::Int(i64::from(*n)));
                state.push(value);
            }
            Insn::ConstI64(n) => {
                let value = interp.literal(offset, state, Literal::Int(*n));
                state.push(value);
            }
            Insn::ConstF64(f) => {
                let value = interp.literal(offset, state, Literal::Float(*f));
                state.push(value);
            }
            Insn::ConstStr(pool_index) => {
                let string = self
                    .constants
                    .get_string(*pool_index)
                    .ok_or(AnalysisError::InvalidPoolRef {
                        offset,
                        index: *pool_index,
                    })?;
                let value = interp.literal(offset, state, Literal::Str(string));
                state.push(value);
            }
            Insn::ConstClass(pool_index) => {
                let class = self.class_ref(offset, *pool_index)?;
                let value = interp.class_literal(offset, state, class);
                state.push(value);
            }

            Insn::LoadLocal(local_index) => {
                let current = state
                    .local(*local_index)
                    .ok_or(AnalysisError::MissingLocal {
                        offset,
                        index: *local_index,
                    })?
                    .clone();
                let value = interp.load_local(offset, state, *local_index, &current);
                state.push(value);
            }
            Insn::StoreLocal(local_index) => {
                if state.local(*local_index).is_none() {
                    return Err(AnalysisError::MissingLocal {
                        offset,
                        index: *local_index,
                    });
                }
                let value = self.pop(state, offset)?;
                let stored = interp.store_local(offset, state, *local_index, value);
                state.set_local(*local_index, stored);
            }
            Insn::IncLocal(local_index, delta) => {
                let current = state
                    .local(*local_index)
                    .ok_or(AnalysisError::MissingLocal {
                        offset,
                        index: *local_index,
                    })?
                    .clone();
                let updated = interp.increment_local(offset, state, *local_index, *delta, &current);
                state.set_local(*local_index, updated);
            }

            Insn::Binary(opcode) => {
                let right = self.pop(state, offset)?;
                let left = self.pop(state, offset)?;
                let value = interp.binary_op(offset, state, *opcode, left, right);
                state.push(value);
            }
            Insn::Unary(opcode) => {
                let operand = self.pop(state, offset)?;
                let value = interp.unary_op(offset, state, *opcode, operand);
                state.push(value);
            }

            Insn::Call(pool_index) => {
                let method = self
                    .constants
                    .get_method(*pool_index)
                    .ok_or(AnalysisError::InvalidPoolRef {
                        offset,
                        index: *pool_index,
                    })?;
                let count = method.operand_count();
                let mut operands = Vec::with_capacity(count);
                for _ in 0..count {
                    operands.push(self.pop(state, offset)?);
                }
                operands.reverse();
                if method.returns_value() {
                    let value = interp.invoke(offset, state, method, operands);
                    state.push(value);
                } else {
                    interp.invoke_void(offset, state, method, operands);
                }
            }

            Insn::New(pool_index) => {
                let class = self.class_ref(offset, *pool_index)?;
                let value = interp.new_object(offset, state, class);
                state.push(value);
            }
            Insn::LoadField(pool_index) => {
                let field = self.field_ref(offset, *pool_index)?;
                let object = self.pop(state, offset)?;
                let value = interp.load_field(offset, state, field, object);
                state.push(value);
            }
            Insn::StoreField(pool_index) => {
                let field = self.field_ref(offset, *pool_index)?;
                let value = self.pop(state, offset)?;
                let object = self.pop(state, offset)?;
                interp.store_field(offset, state, field, object, value);
            }
            Insn::LoadStatic(pool_index) => {
                let field = self.field_ref(offset, *pool_index)?;
                let value = interp.load_static(offset, state, field);
                state.push(value);
            }
            Insn::StoreStatic(pool_index) => {
                let field = self.field_ref(offset, *pool_index)?;
                let value = self.pop(state, offset)?;
                interp.store_static(offset, state, field, value);
            }
            Insn::CastCheck(pool_index) => {
                let class = self.class_ref(offset, *pool_index)?;
                let object = self.pop(state, offset)?;
                let value = interp.cast_check(offset, state, class, object);
                state.push(value);
            }
            Insn::InstanceOf(pool_index) => {
                let class = self.class_ref(offset, *pool_index)?;
                let object = self.pop(state, offset)?;
                let value = interp.instance_of(offset, state, class, object);
                state.push(value);
            }

            Insn::NewArray(pool_index) => {
                let element = self.class_ref(offset, *pool_index)?;
                let length = self.pop(state, offset)?;
                let value = interp.new_array(offset, state, element, length);
                state.push(value);
            }
            Insn::LoadElem => {
                let element_index = self.pop(state, offset)?;
                let array = self.pop(state, offset)?;
                let value = interp.load_element(offset, state, array, element_index);
                state.push(value);
            }
            Insn::StoreElem => {
                let value = self.pop(state, offset)?;
                let element_index = self.pop(state, offset)?;
                let array = self.pop(state, offset)?;
                interp.store_element(offset, state, array, element_index, value);
            }
            Insn::ArrayLen => {
                let array = self.pop(state, offset)?;
                let value = interp.array_length(offset, state, array);
                state.push(value);
            }
        }
        Ok(())
    }

    fn pop(
        &self,
        state: &mut AbstractFrame<I::Value>,
        offset: u32,
    ) -> Result<I::Value, AnalysisError> {
        state.pop().ok_or(AnalysisError::StackUnderflow(offset))
    }

    fn class_ref(&self, offset: u32, index: u32) -> Result<&'a ClassRef, AnalysisError> {
        self.constants
            .get_class(index)
            .ok_or(AnalysisError::InvalidPoolRef { offset, index })
    }

    fn field_ref(&self, offset: u32, index: u32) -> Result<&'a FieldRef, AnalysisError> {
        self.constants
            .get_field(index)
            .ok_or(AnalysisError::InvalidPoolRef { offset, index })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use constrict_bytecode::{BytecodeWriter, Function, Opcode};

    /// Minimal value-based constant propagation, just enough to exercise the
    /// driver's merge and worklist behavior.
    struct IntConstants;

    impl Interpretation for IntConstants {
        type Value = Option<i64>;

        fn top(&self) -> Self::Value {
            None
        }

        fn join(&self, left: &Self::Value, right: &Self::Value) -> Self::Value {
            if left == right {
                *left
            } else {
                None
            }
        }

        fn literal(
            &self,
            _origin: u32,
            _state: &mut AbstractFrame<Self::Value>,
            literal: Literal<'_>,
        ) -> Self::Value {
            match literal {
                Literal::Int(n) => Some(n),
                _ => None,
            }
        }

        fn load_local(
            &self,
            _origin: u32,
            _state: &mut AbstractFrame<Self::Value>,
            _index: u16,
            value: &Self::Value,
        ) -> Self::Value {
            *value
        }

        fn store_local(
            &self,
            _origin: u32,
            _state: &mut AbstractFrame<Self::Value>,
            _index: u16,
            value: Self::Value,
        ) -> Self::Value {
            value
        }
    }

    fn analyze(function: &Function) -> FxHashMap<u32, AbstractFrame<Option<i64>>> {
        let pool = ConstantPool::new();
        Interpreter::new(&IntConstants, &pool).analyze(function).unwrap()
    }

    #[test]
    fn test_straight_line_propagation() {
        let mut writer = BytecodeWriter::new();
        writer.emit_const_i32(42); // 0
        writer.emit_store_local(0); // 5
        writer.emit_load_local(0); // 8
        writer.emit_return(); // 11

        let function = Function::new("f", 0, 1, writer.into_bytes());
        let states = analyze(&function);

        // At the RETURN the loaded constant is on the stack.
        assert_eq!(states[&11].operand(0), Some(&Some(42)));
    }

    #[test]
    fn test_branch_merge_loses_differing_constants() {
        let mut writer = BytecodeWriter::new();
        writer.emit_const_true(); // 0
        let site = writer.emit_jump(Opcode::JmpIfFalse); // 1
        writer.emit_const_i32(1); // 6
        writer.emit_store_local(0); // 11
        let done = writer.emit_jump(Opcode::Jmp); // 14
        writer.patch_jump(site); // else: 19
        writer.emit_const_i32(2);
        writer.emit_store_local(0);
        writer.patch_jump(done); // merge: 27
        writer.emit_load_local(0);
        writer.emit_return(); // 30

        let function = Function::new("f", 0, 1, writer.into_bytes());
        let states = analyze(&function);

        assert_eq!(states[&27].local(0), Some(&None));
        assert_eq!(states[&30].operand(0), Some(&None));
    }

    #[test]
    fn test_branch_merge_keeps_agreeing_constants() {
        let mut writer = BytecodeWriter::new();
        writer.emit_const_i32(5); // 0
        writer.emit_store_local(0); // 5
        writer.emit_const_true(); // 8
        let site = writer.emit_jump(Opcode::JmpIfFalse); // 9
        writer.emit_nop(); // 14
        writer.patch_jump(site); // merge: 15
        writer.emit_load_local(0);
        writer.emit_return();

        let function = Function::new("f", 0, 1, writer.into_bytes());
        let states = analyze(&function);

        // Both paths carry the same store, so the merge keeps it.
        assert_eq!(states[&15].local(0), Some(&Some(5)));
    }

    #[test]
    fn test_loop_converges() {
        let mut writer = BytecodeWriter::new();
        writer.emit_const_i32(0); // 0
        writer.emit_store_local(0); // 5
        let head = writer.offset(); // 8
        writer.emit_inc_local(0, 1); // 8
        writer.emit_load_local(0); // 13
        writer.emit_const_i32(10); // 16
        writer.emit_ilt(); // 21
        writer.emit_jump_to(Opcode::JmpIfTrue, head); // 22
        writer.emit_return_void(); // 27

        let function = Function::new("f", 0, 1, writer.into_bytes());
        let states = analyze(&function);

        // The increment defaults to top, so the loop-carried local is unknown
        // at the head after the back edge merges in.
        assert_eq!(states[&head].local(0), Some(&None));
        assert!(states.contains_key(&27));
    }

    #[test]
    fn test_exception_edge_replaces_stack() {
        let mut pool = ConstantPool::new();
        let method = pool.add_method(MethodRef {
            owner: "app.IO".to_string(),
            name: "read".to_string(),
            params: Vec::new(),
            ret: constrict_bytecode::TypeDesc::Void,
            has_receiver: false,
        });

        let mut writer = BytecodeWriter::new();
        writer.emit_const_i32(3); // 0
        writer.emit_store_local(0); // 5
        writer.emit_const_i32(8); // 8: left on the stack across the call
        writer.emit_call(method); // 13
        writer.emit_pop(); // 18
        writer.emit_return_void(); // 19
        let handler = writer.offset(); // 20
        writer.emit_pop();
        writer.emit_return_void();

        let mut function = Function::new("f", 0, 1, writer.into_bytes());
        function.exception_handlers.push(constrict_bytecode::ExceptionHandler {
            start: 0,
            end: handler,
            handler,
        });

        let states = Interpreter::new(&IntConstants, &pool)
            .analyze(&function)
            .unwrap();

        // Handler entry: one unknown value on the stack, locals preserved.
        assert_eq!(states[&handler].stack_depth(), 1);
        assert_eq!(states[&handler].operand(0), Some(&None));
        assert_eq!(states[&handler].local(0), Some(&Some(3)));
    }

    #[test]
    fn test_stack_underflow_reported() {
        let mut writer = BytecodeWriter::new();
        writer.emit_pop();
        writer.emit_return_void();

        let function = Function::new("f", 0, 0, writer.into_bytes());
        let pool = ConstantPool::new();
        let result = Interpreter::new(&IntConstants, &pool).analyze(&function);
        assert!(matches!(result, Err(AnalysisError::StackUnderflow(0))));
    }

    #[test]
    fn test_undeclared_local_reported() {
        let mut writer = BytecodeWriter::new();
        writer.emit_load_local(2);
        writer.emit_return();

        let function = Function::new("f", 0, 1, writer.into_bytes());
        let pool = ConstantPool::new();
        let result = Interpreter::new(&IntConstants, &pool).analyze(&function);
        assert!(matches!(
            result,
            Err(AnalysisError::MissingLocal { offset: 0, index: 2 })
        ));
    }
}
