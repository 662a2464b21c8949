//! End-to-end tests: build bytecode, run the registry, query call sites.

use constrict_analysis::reflect::{FOR_NAME, FOR_NAME_WITH_LOADER};
use constrict_analysis::{
    is_sensitive_target, well_known, ClassResolver, ConstOperand, MethodId,
    StrictReflectionRegistry, TypeToken,
};
use constrict_bytecode::{
    BytecodeWriter, ConstantPool, ExceptionHandler, Function, MethodRef, Opcode, PrimitiveKind,
    TypeDesc,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn known_classes() -> impl ClassResolver {
    |name: &str, _initialize: bool| {
        (name == "app.Known").then(|| TypeToken::Class("app.Known".into()))
    }
}

fn get_field_ref() -> MethodRef {
    MethodRef {
        owner: well_known::CLASS.to_string(),
        name: "getField".to_string(),
        params: vec![TypeDesc::reference(well_known::STRING)],
        ret: TypeDesc::reference("lang.Field"),
        has_receiver: true,
    }
}

fn get_method_ref() -> MethodRef {
    MethodRef {
        owner: well_known::CLASS.to_string(),
        name: "getMethod".to_string(),
        params: vec![
            TypeDesc::reference(well_known::STRING),
            TypeDesc::array(TypeDesc::reference(well_known::CLASS)),
        ],
        ret: TypeDesc::reference("lang.Method"),
        has_receiver: true,
    }
}

/// Offset the next emitted instruction will land at
fn at(writer: &BytecodeWriter) -> u32 {
    writer.offset()
}

#[test]
fn literal_argument_is_constant() {
    let mut pool = ConstantPool::new();
    let name = pool.add_string("password");
    let get_field = pool.add_method(get_field_ref());

    let mut w = BytecodeWriter::new();
    w.emit_load_local(0); // receiver parameter
    w.emit_const_str(name);
    let call = at(&w);
    w.emit_call(get_field);
    w.emit_pop();
    w.emit_return_void();

    let function = Function::new("lookup", 1, 1, w.into_bytes());
    let registry = StrictReflectionRegistry::new(known_classes());
    registry.analyze(MethodId(1), &function, &pool);

    let target = get_field_ref();
    assert_eq!(
        registry.constant_operand(MethodId(1), call, &target, 1),
        Some(ConstOperand::Str("password".into()))
    );
    // The receiver is a parameter, never constant.
    assert_eq!(registry.constant_operand(MethodId(1), call, &target, 0), None);
}

#[test]
fn constant_survives_single_assignment() {
    let mut pool = ConstantPool::new();
    let name = pool.add_string("password");
    let get_field = pool.add_method(get_field_ref());

    let mut w = BytecodeWriter::new();
    w.emit_const_str(name);
    w.emit_store_local(1);
    w.emit_load_local(0);
    w.emit_load_local(1);
    let call = at(&w);
    w.emit_call(get_field);
    w.emit_pop();
    w.emit_return_void();

    let function = Function::new("lookup", 1, 2, w.into_bytes());
    let registry = StrictReflectionRegistry::new(known_classes());
    registry.analyze(MethodId(1), &function, &pool);

    assert_eq!(
        registry.constant_operand(MethodId(1), call, &get_field_ref(), 1),
        Some(ConstOperand::Str("password".into()))
    );
}

#[test]
fn branch_merge_discards_constants() {
    // Both arms assign the same literal text, but from different
    // instructions. Origin equality makes the merge discard it.
    let mut pool = ConstantPool::new();
    let name = pool.add_string("password");
    let get_field = pool.add_method(get_field_ref());

    let mut w = BytecodeWriter::new();
    w.emit_const_true();
    let to_else = w.emit_jump(Opcode::JmpIfFalse);
    w.emit_const_str(name);
    w.emit_store_local(1);
    let to_merge = w.emit_jump(Opcode::Jmp);
    w.patch_jump(to_else);
    w.emit_const_str(name);
    w.emit_store_local(1);
    w.patch_jump(to_merge);
    w.emit_load_local(0);
    w.emit_load_local(1);
    let call = at(&w);
    w.emit_call(get_field);
    w.emit_pop();
    w.emit_return_void();

    let function = Function::new("lookup", 1, 2, w.into_bytes());
    let registry = StrictReflectionRegistry::new(known_classes());
    registry.analyze(MethodId(1), &function, &pool);

    assert_eq!(
        registry.constant_operand(MethodId(1), call, &get_field_ref(), 1),
        None
    );
}

#[test]
fn constant_defined_before_loop_survives_iteration() {
    let mut pool = ConstantPool::new();
    let name = pool.add_string("counter");
    let get_field = pool.add_method(get_field_ref());

    let mut w = BytecodeWriter::new();
    w.emit_const_str(name);
    w.emit_store_local(1);
    let head = at(&w);
    w.emit_load_local(0);
    w.emit_load_local(1);
    let call = at(&w);
    w.emit_call(get_field);
    w.emit_pop();
    w.emit_const_true();
    w.emit_jump_to(Opcode::JmpIfTrue, head);
    w.emit_return_void();

    let function = Function::new("poll", 1, 2, w.into_bytes());
    let registry = StrictReflectionRegistry::new(known_classes());
    registry.analyze(MethodId(1), &function, &pool);

    assert_eq!(
        registry.constant_operand(MethodId(1), call, &get_field_ref(), 1),
        Some(ConstOperand::Str("counter".into()))
    );
}

#[test]
fn reassignment_inside_loop_discards_constant() {
    let mut pool = ConstantPool::new();
    let first = pool.add_string("first");
    let second = pool.add_string("second");
    let get_field = pool.add_method(get_field_ref());

    let mut w = BytecodeWriter::new();
    w.emit_const_str(first);
    w.emit_store_local(1);
    let head = at(&w);
    w.emit_load_local(0);
    w.emit_load_local(1);
    let call = at(&w);
    w.emit_call(get_field);
    w.emit_pop();
    w.emit_const_str(second);
    w.emit_store_local(1);
    w.emit_const_true();
    w.emit_jump_to(Opcode::JmpIfTrue, head);
    w.emit_return_void();

    let function = Function::new("poll", 1, 2, w.into_bytes());
    let registry = StrictReflectionRegistry::new(known_classes());
    registry.analyze(MethodId(1), &function, &pool);

    // The back edge carries the second store into the loop head, so the load
    // before the call no longer sees a single origin.
    assert_eq!(
        registry.constant_operand(MethodId(1), call, &get_field_ref(), 1),
        None
    );
}

#[test]
fn reassignment_on_loop_exit_path_keeps_constant() {
    let mut pool = ConstantPool::new();
    let first = pool.add_string("first");
    let second = pool.add_string("second");
    let get_field = pool.add_method(get_field_ref());

    let mut w = BytecodeWriter::new();
    w.emit_const_str(first);
    w.emit_store_local(1);
    let head = at(&w);
    w.emit_load_local(0);
    w.emit_load_local(1);
    let call = at(&w);
    w.emit_call(get_field);
    w.emit_pop();
    w.emit_const_true();
    w.emit_jump_to(Opcode::JmpIfTrue, head);
    // Only the exiting path reassigns; no back edge carries the second
    // store to the loop head.
    w.emit_const_str(second);
    w.emit_store_local(1);
    w.emit_return_void();

    let function = Function::new("poll", 1, 2, w.into_bytes());
    let registry = StrictReflectionRegistry::new(known_classes());
    registry.analyze(MethodId(1), &function, &pool);

    assert_eq!(
        registry.constant_operand(MethodId(1), call, &get_field_ref(), 1),
        Some(ConstOperand::Str("first".into()))
    );
}

#[test]
fn parameters_are_never_constant() {
    let mut pool = ConstantPool::new();
    let get_field = pool.add_method(get_field_ref());

    let mut w = BytecodeWriter::new();
    w.emit_load_local(0);
    w.emit_load_local(1); // name arrives as a parameter
    let call = at(&w);
    w.emit_call(get_field);
    w.emit_pop();
    w.emit_return_void();

    let function = Function::new("lookup", 2, 2, w.into_bytes());
    let registry = StrictReflectionRegistry::new(known_classes());
    registry.analyze(MethodId(1), &function, &pool);

    assert_eq!(
        registry.constant_operand(MethodId(1), call, &get_field_ref(), 1),
        None
    );
}

#[test]
fn helper_return_value_is_never_constant() {
    let mut pool = ConstantPool::new();
    let helper = pool.add_method(MethodRef {
        owner: "app.Names".to_string(),
        name: "fieldName".to_string(),
        params: Vec::new(),
        ret: TypeDesc::reference(well_known::STRING),
        has_receiver: false,
    });
    let get_field = pool.add_method(get_field_ref());

    let mut w = BytecodeWriter::new();
    w.emit_load_local(0);
    w.emit_call(helper); // returns a string the analysis cannot see into
    let call = at(&w);
    w.emit_call(get_field);
    w.emit_pop();
    w.emit_return_void();

    let function = Function::new("lookup", 1, 1, w.into_bytes());
    let registry = StrictReflectionRegistry::new(known_classes());
    registry.analyze(MethodId(1), &function, &pool);

    assert_eq!(
        registry.constant_operand(MethodId(1), call, &get_field_ref(), 1),
        None
    );
}

#[test]
fn array_literal_at_call_site_is_constant() {
    let mut pool = ConstantPool::new();
    let run = pool.add_string("run");
    let string_class = pool.add_class(well_known::STRING);
    let class_class = pool.add_class(well_known::CLASS);
    let get_method = pool.add_method(get_method_ref());

    let mut w = BytecodeWriter::new();
    w.emit_load_local(0);
    w.emit_const_str(run);
    w.emit_const_i32(1);
    w.emit_new_array(class_class);
    w.emit_dup();
    w.emit_const_i32(0);
    w.emit_const_class(string_class);
    w.emit_store_elem();
    let call = at(&w);
    w.emit_call(get_method);
    w.emit_pop();
    w.emit_return_void();

    let function = Function::new("lookup", 1, 1, w.into_bytes());
    let registry = StrictReflectionRegistry::new(known_classes());
    registry.analyze(MethodId(1), &function, &pool);

    let target = get_method_ref();
    assert_eq!(
        registry.constant_operand(MethodId(1), call, &target, 1),
        Some(ConstOperand::Str("run".into()))
    );
    assert_eq!(
        registry.constant_operand(MethodId(1), call, &target, 2),
        Some(ConstOperand::Array {
            element_kind: TypeDesc::reference(well_known::CLASS),
            elements: vec![Some(ConstOperand::Class(TypeToken::Class(
                well_known::STRING.into()
            )))],
        })
    );
}

#[test]
fn array_through_named_variable_is_not_constant() {
    let mut pool = ConstantPool::new();
    let run = pool.add_string("run");
    let class_class = pool.add_class(well_known::CLASS);
    let get_method = pool.add_method(get_method_ref());

    let mut w = BytecodeWriter::new();
    w.emit_const_i32(0);
    w.emit_new_array(class_class);
    w.emit_store_local(1); // naming the array ends the tracking
    w.emit_load_local(0);
    w.emit_const_str(run);
    w.emit_load_local(1);
    let call = at(&w);
    w.emit_call(get_method);
    w.emit_pop();
    w.emit_return_void();

    let function = Function::new("lookup", 1, 2, w.into_bytes());
    let registry = StrictReflectionRegistry::new(known_classes());
    registry.analyze(MethodId(1), &function, &pool);

    assert_eq!(
        registry.constant_operand(MethodId(1), call, &get_method_ref(), 2),
        None
    );
}

#[test]
fn null_argument_is_a_tracked_constant() {
    let mut pool = ConstantPool::new();
    let get_field = pool.add_method(get_field_ref());

    let mut w = BytecodeWriter::new();
    w.emit_load_local(0);
    w.emit_const_null();
    let call = at(&w);
    w.emit_call(get_field);
    w.emit_pop();
    w.emit_return_void();

    let function = Function::new("lookup", 1, 1, w.into_bytes());
    let registry = StrictReflectionRegistry::new(known_classes());
    registry.analyze(MethodId(1), &function, &pool);

    let operand = registry
        .constant_operand(MethodId(1), call, &get_field_ref(), 1)
        .expect("null must be reported as a constant, not as unknown");
    assert!(operand.is_null());
}

#[test]
fn for_name_result_flows_into_member_lookup() {
    let mut pool = ConstantPool::new();
    let known = pool.add_string("app.Known");
    let run = pool.add_string("run");
    let class_class = pool.add_class(well_known::CLASS);
    let for_name = pool.add_method(FOR_NAME.clone());
    let get_method = pool.add_method(get_method_ref());

    let mut w = BytecodeWriter::new();
    w.emit_const_str(known);
    let resolve = at(&w);
    w.emit_call(for_name);
    w.emit_store_local(0);
    w.emit_load_local(0);
    w.emit_const_str(run);
    w.emit_const_i32(0);
    w.emit_new_array(class_class);
    let lookup = at(&w);
    w.emit_call(get_method);
    w.emit_pop();
    w.emit_return_void();

    let function = Function::new("reflective", 0, 1, w.into_bytes());
    let registry = StrictReflectionRegistry::new(known_classes());
    registry.analyze(MethodId(1), &function, &pool);

    assert!(is_sensitive_target(&FOR_NAME));
    assert_eq!(
        registry.constant_operand(MethodId(1), resolve, &FOR_NAME, 0),
        Some(ConstOperand::Str("app.Known".into()))
    );
    // The resolved class is the receiver of the member lookup.
    assert_eq!(
        registry.constant_operand(MethodId(1), lookup, &get_method_ref(), 0),
        Some(ConstOperand::Class(TypeToken::Class("app.Known".into())))
    );
}

#[test]
fn for_name_of_unknown_class_is_not_constant() {
    let mut pool = ConstantPool::new();
    let missing = pool.add_string("app.Missing");
    let for_name = pool.add_method(FOR_NAME.clone());
    let get_field = pool.add_method(get_field_ref());
    let name = pool.add_string("x");

    let mut w = BytecodeWriter::new();
    w.emit_const_str(missing);
    w.emit_call(for_name);
    w.emit_const_str(name);
    let call = at(&w);
    w.emit_call(get_field);
    w.emit_pop();
    w.emit_return_void();

    let function = Function::new("reflective", 0, 0, w.into_bytes());
    let registry = StrictReflectionRegistry::new(known_classes());
    registry.analyze(MethodId(1), &function, &pool);

    assert_eq!(
        registry.constant_operand(MethodId(1), call, &get_field_ref(), 0),
        None
    );
}

#[test]
fn for_name_with_loader_needs_constant_flag() {
    let mut pool = ConstantPool::new();
    let known = pool.add_string("app.Known");
    let for_name3 = pool.add_method(FOR_NAME_WITH_LOADER.clone());
    let get_field = pool.add_method(get_field_ref());
    let name = pool.add_string("x");

    let mut w = BytecodeWriter::new();
    w.emit_const_str(known);
    w.emit_const_false(); // do not initialize
    w.emit_const_null(); // bootstrap loader
    w.emit_call(for_name3);
    w.emit_const_str(name);
    let call = at(&w);
    w.emit_call(get_field);
    w.emit_pop();
    w.emit_return_void();

    let function = Function::new("reflective", 0, 0, w.into_bytes());
    let registry = StrictReflectionRegistry::new(known_classes());
    registry.analyze(MethodId(1), &function, &pool);

    assert_eq!(
        registry.constant_operand(MethodId(1), call, &get_field_ref(), 0),
        Some(ConstOperand::Class(TypeToken::Class("app.Known".into())))
    );
}

#[test]
fn integer_arguments_narrow_to_declared_types() {
    let mut pool = ConstantPool::new();
    let sink = MethodRef {
        owner: "app.Sink".to_string(),
        name: "set".to_string(),
        params: vec![
            TypeDesc::Primitive(PrimitiveKind::Bool),
            TypeDesc::Primitive(PrimitiveKind::I8),
            TypeDesc::Primitive(PrimitiveKind::Char),
        ],
        ret: TypeDesc::Void,
        has_receiver: false,
    };
    let sink_index = pool.add_method(sink.clone());

    let mut w = BytecodeWriter::new();
    w.emit_const_i32(1);
    w.emit_const_i32(300);
    w.emit_const_i32(5);
    let call = at(&w);
    w.emit_call(sink_index);
    w.emit_return_void();

    let function = Function::new("configure", 0, 0, w.into_bytes());
    let registry = StrictReflectionRegistry::new(known_classes());
    registry.analyze(MethodId(1), &function, &pool);

    assert_eq!(
        registry.constant_operand(MethodId(1), call, &sink, 0),
        Some(ConstOperand::Bool(true))
    );
    assert_eq!(
        registry.constant_operand(MethodId(1), call, &sink, 1),
        Some(ConstOperand::I8(44))
    );
    assert_eq!(
        registry.constant_operand(MethodId(1), call, &sink, 2),
        Some(ConstOperand::Char('5'))
    );
}

#[test]
fn analysis_runs_once_per_method() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let resolver = move |name: &str, _initialize: bool| {
        counter.fetch_add(1, Ordering::SeqCst);
        (name == "app.Known").then(|| TypeToken::Class("app.Known".into()))
    };

    let mut pool = ConstantPool::new();
    let known = pool.add_string("app.Known");
    let for_name = pool.add_method(FOR_NAME.clone());

    let mut w = BytecodeWriter::new();
    w.emit_const_str(known);
    let call = at(&w);
    w.emit_call(for_name);
    w.emit_pop();
    w.emit_return_void();

    let function = Function::new("reflective", 0, 0, w.into_bytes());
    let registry = StrictReflectionRegistry::new(resolver);

    registry.analyze(MethodId(7), &function, &pool);
    let first = registry.constant_operand(MethodId(7), call, &FOR_NAME, 0);
    registry.analyze(MethodId(7), &function, &pool);
    let second = registry.constant_operand(MethodId(7), call, &FOR_NAME, 0);

    assert_eq!(first, Some(ConstOperand::Str("app.Known".into())));
    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn failed_analysis_answers_unknown() {
    let mut pool = ConstantPool::new();
    pool.add_method(get_field_ref());

    // Pops from an empty stack; the analysis gives up on the whole method.
    let mut w = BytecodeWriter::new();
    w.emit_pop();
    w.emit_return_void();

    let function = Function::new("broken", 0, 0, w.into_bytes());
    let registry = StrictReflectionRegistry::new(known_classes());
    registry.analyze(MethodId(3), &function, &pool);

    assert!(registry.is_analyzed(MethodId(3)));
    assert_eq!(
        registry.constant_operand(MethodId(3), 0, &get_field_ref(), 0),
        None
    );
}

#[test]
fn constant_reaches_exception_handler() {
    let mut pool = ConstantPool::new();
    let name = pool.add_string("fallback");
    let risky = pool.add_method(MethodRef {
        owner: "app.IO".to_string(),
        name: "read".to_string(),
        params: Vec::new(),
        ret: TypeDesc::Void,
        has_receiver: false,
    });
    let get_field = pool.add_method(get_field_ref());

    let mut w = BytecodeWriter::new();
    w.emit_const_str(name);
    w.emit_store_local(1);
    w.emit_call(risky);
    w.emit_return_void();
    let handler = at(&w);
    w.emit_pop(); // discard the caught value
    w.emit_load_local(0);
    w.emit_load_local(1);
    let call = at(&w);
    w.emit_call(get_field);
    w.emit_pop();
    w.emit_return_void();

    let mut function = Function::new("recover", 1, 2, w.into_bytes());
    function.exception_handlers.push(ExceptionHandler {
        start: 0,
        end: handler,
        handler,
    });

    let registry = StrictReflectionRegistry::new(known_classes());
    registry.analyze(MethodId(1), &function, &pool);

    // The handler entered with the local still bound to its single store.
    assert_eq!(
        registry.constant_operand(MethodId(1), call, &get_field_ref(), 1),
        Some(ConstOperand::Str("fallback".into()))
    );
}

#[test]
fn query_at_unknown_offset_is_unknown() {
    let mut pool = ConstantPool::new();
    let get_field = pool.add_method(get_field_ref());

    let mut w = BytecodeWriter::new();
    w.emit_load_local(0);
    w.emit_const_null();
    w.emit_call(get_field);
    w.emit_pop();
    w.emit_return_void();

    let function = Function::new("lookup", 1, 1, w.into_bytes());
    let registry = StrictReflectionRegistry::new(known_classes());
    registry.analyze(MethodId(1), &function, &pool);

    // Offset 1 is inside the LOAD_LOCAL operand, not an instruction.
    assert_eq!(
        registry.constant_operand(MethodId(1), 1, &get_field_ref(), 1),
        None
    );
    // Unanalyzed method.
    assert_eq!(
        registry.constant_operand(MethodId(99), 0, &get_field_ref(), 1),
        None
    );
}
