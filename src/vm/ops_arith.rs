//! Arithmetic, comparison and unary numeric operators.
//!
//! Grounded on the teacher's `vm/ops_arith.rs` per-operator handler shape
//! (one small function per opcode, stack in, stack out, `RuntimeError` on
//! mismatch) but retyped from the teacher's coercing `Value::Int`/`Value::Str`
//! operands to strict `Value::Number` typing per `spec.md` §4.3/§6: only
//! `+` overloads onto string concatenation, every other arithmetic and
//! ordering operator requires two numbers.

use crate::error::RuntimeError;
use crate::value::Value;
use crate::vm::Vm;

fn type_error(op: &str) -> RuntimeError {
    RuntimeError::TypeError(format!("Operands must be numbers for '{}'.", op))
}

pub(super) fn handle_binary_number(vm: &mut Vm, f: impl Fn(f64, f64) -> f64) -> Result<(), RuntimeError> {
    let b = vm.peek(0);
    let a = vm.peek(1);
    match (a.as_number(), b.as_number()) {
        (Some(x), Some(y)) => {
            vm.pop();
            vm.pop();
            vm.push(Value::Number(f(x, y)));
            Ok(())
        }
        _ => Err(vm.runtime_error(type_error("arithmetic"))),
    }
}

pub(super) fn handle_compare(vm: &mut Vm, f: impl Fn(f64, f64) -> bool) -> Result<(), RuntimeError> {
    let b = vm.peek(0);
    let a = vm.peek(1);
    match (a.as_number(), b.as_number()) {
        (Some(x), Some(y)) => {
            vm.pop();
            vm.pop();
            vm.push(Value::Bool(f(x, y)));
            Ok(())
        }
        _ => Err(vm.runtime_error(type_error("comparison"))),
    }
}

pub(super) fn handle_add(vm: &mut Vm) -> Result<(), RuntimeError> {
    let b = vm.peek(0);
    let a = vm.peek(1);
    if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
        vm.pop();
        vm.pop();
        vm.push(Value::Number(x + y));
        return Ok(());
    }
    if a.is_string(&vm.heap) && b.is_string(&vm.heap) {
        let left = vm.heap.get(a.as_obj().unwrap()).as_string().unwrap().bytes.clone();
        let right = vm.heap.get(b.as_obj().unwrap()).as_string().unwrap().bytes.clone();
        vm.pop();
        vm.pop();
        let concatenated = format!("{}{}", left, right);
        vm.maybe_collect(&[]);
        let r = vm.heap.intern_string(&concatenated);
        vm.push(Value::Obj(r));
        return Ok(());
    }
    Err(vm.runtime_error(RuntimeError::TypeError(
        "Operands must be two numbers or two strings.".to_string(),
    )))
}

pub(super) fn handle_negate(vm: &mut Vm) -> Result<(), RuntimeError> {
    match vm.peek(0).as_number() {
        Some(n) => {
            vm.pop();
            vm.push(Value::Number(-n));
            Ok(())
        }
        None => Err(vm.runtime_error(RuntimeError::TypeError("Operand must be a number.".to_string()))),
    }
}
