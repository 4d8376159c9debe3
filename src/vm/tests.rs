//! Unit tests colocated with the VM, in the teacher's `vm/tests.rs` style:
//! direct construction/inspection rather than golden-output comparison
//! (full source-to-stdout scenarios live in `tests/end_to_end.rs`).

use super::*;
use crate::gc::Heap;
use crate::object::UpvalueState;

fn compile_ok(source: &str) -> crate::object::ObjFunction {
    let mut heap = Heap::new();
    crate::compiler::Compiler::compile(source, &mut heap).expect("expected successful compile")
}

#[test]
fn chunk_ends_with_nil_return() {
    let function = compile_ok("1 + 2;");
    let code = &function.chunk.code;
    assert_eq!(OpCode::from_u8(code[code.len() - 2]), OpCode::Nil);
    assert_eq!(OpCode::from_u8(code[code.len() - 1]), OpCode::Return);
}

#[test]
fn undefined_top_level_return_is_compile_error() {
    let mut heap = Heap::new();
    let result = crate::compiler::Compiler::compile("return 1;", &mut heap);
    assert!(result.is_err());
}

#[test]
fn self_referencing_initializer_is_compile_error() {
    let mut heap = Heap::new();
    let result = crate::compiler::Compiler::compile("{ var a = a; }", &mut heap);
    assert!(result.is_err());
}

#[test]
fn interpret_simple_arithmetic_succeeds() {
    let mut vm = Vm::new();
    let result = vm.interpret("print 1 + 2 * 3;");
    assert_eq!(result, crate::error::InterpretResult::Ok);
    assert!(vm.stack.is_empty());
    assert!(vm.frames.is_empty());
}

#[test]
fn undefined_global_read_is_runtime_error() {
    let mut vm = Vm::new();
    let result = vm.interpret("print missing;");
    assert_eq!(result, crate::error::InterpretResult::RuntimeError);
}

#[test]
fn calling_a_number_is_runtime_error() {
    let mut vm = Vm::new();
    let result = vm.interpret("var n = 1; n();");
    assert_eq!(result, crate::error::InterpretResult::RuntimeError);
}

#[test]
fn open_upvalue_list_is_captured_and_closed_in_order() {
    let mut vm = Vm::new();
    vm.stack = vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)];

    let first = ops_call::capture_upvalue(&mut vm, 0);
    let second = ops_call::capture_upvalue(&mut vm, 2);
    let third = ops_call::capture_upvalue(&mut vm, 1);

    // sorted by descending stack address
    let indices: Vec<usize> = vm
        .open_upvalues
        .iter()
        .map(|r| match vm.heap.get(*r).as_upvalue().unwrap().state {
            UpvalueState::Open(i) => i,
            UpvalueState::Closed(_) => unreachable!(),
        })
        .collect();
    assert_eq!(indices, vec![2, 1, 0]);

    ops_call::close_upvalues(&mut vm, 1);
    assert_eq!(vm.open_upvalues.len(), 1);
    assert!(matches!(
        vm.heap.get(first).as_upvalue().unwrap().state,
        UpvalueState::Open(_)
    ));
    assert!(matches!(
        vm.heap.get(second).as_upvalue().unwrap().state,
        UpvalueState::Closed(_)
    ));
    assert!(matches!(
        vm.heap.get(third).as_upvalue().unwrap().state,
        UpvalueState::Closed(_)
    ));
}

#[test]
fn string_interning_is_reference_equal() {
    let mut heap = Heap::new();
    let a = heap.intern_string("hello");
    let b = heap.intern_string("hello");
    assert_eq!(a, b);
}
