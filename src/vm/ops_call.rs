//! Call/return machinery: the calling convention for every callable kind,
//! closure creation and upvalue capture/close, and invocation fusion.
//!
//! Replaces the teacher's `vm/ops_control.rs` (named-function/tail-call/
//! jump/exception-block handlers for OMG's flat call model) with the
//! sliding-window stack-slot calling convention `spec.md` §4.4 requires;
//! the module-per-instruction-family shape and the "one handler per
//! opcode, explicit error propagation" style are kept from the teacher.

use crate::error::RuntimeError;
use crate::gc::ObjRef;
use crate::object::{ObjClosure, ObjInstance, ObjUpvalue, Object, UpvalueState};
use crate::value::Value;
use crate::vm::{CallFrame, Vm, FRAMES_MAX};

pub(super) fn call_value(vm: &mut Vm, callee: Value, argc: u8) -> Result<(), RuntimeError> {
    let Some(callee_ref) = callee.as_obj() else {
        return Err(vm.runtime_error(RuntimeError::NotCallable(describe(vm, callee))));
    };
    match vm.heap.get(callee_ref) {
        Object::Closure(_) => call_closure(vm, callee_ref, argc),
        Object::Native(_) => call_native(vm, callee_ref, argc),
        Object::Class(_) => call_class(vm, callee_ref, argc),
        Object::BoundMethod(_) => call_bound_method(vm, callee_ref, argc),
        _ => Err(vm.runtime_error(RuntimeError::NotCallable(describe(vm, callee)))),
    }
}

fn describe(vm: &Vm, value: Value) -> String {
    value.display(&vm.heap)
}

pub(super) fn call_closure(vm: &mut Vm, closure_ref: ObjRef, argc: u8) -> Result<(), RuntimeError> {
    let function_ref = vm.heap.get(closure_ref).as_closure().unwrap().function;
    let arity = vm.heap.get(function_ref).as_function().unwrap().arity;
    if argc != arity {
        return Err(vm.runtime_error(RuntimeError::ArityMismatch { expected: arity, got: argc }));
    }
    if vm.frames.len() >= FRAMES_MAX {
        return Err(vm.runtime_error(RuntimeError::StackOverflow));
    }
    let slot_base = vm.stack.len() - argc as usize - 1;
    vm.frames.push(CallFrame { closure: closure_ref, ip: 0, slot_base });
    Ok(())
}

fn call_native(vm: &mut Vm, native_ref: ObjRef, argc: u8) -> Result<(), RuntimeError> {
    let native = match vm.heap.get(native_ref) {
        Object::Native(n) => n,
        _ => unreachable!(),
    };
    if argc != native.arity {
        return Err(vm.runtime_error(RuntimeError::ArityMismatch { expected: native.arity, got: argc }));
    }
    let args_start = vm.stack.len() - argc as usize;
    let args: Vec<Value> = vm.stack[args_start..].to_vec();
    let function = native.function;
    match function(&args) {
        Ok(result) => {
            vm.stack.truncate(args_start - 1);
            vm.push(result);
            Ok(())
        }
        Err(message) => Err(vm.runtime_error(RuntimeError::TypeError(message))),
    }
}

fn call_class(vm: &mut Vm, class_ref: ObjRef, argc: u8) -> Result<(), RuntimeError> {
    vm.maybe_collect(&[class_ref]);
    let instance_ref = vm.heap.alloc_instance(ObjInstance::new(class_ref));
    let callee_slot = vm.stack.len() - argc as usize - 1;
    vm.stack[callee_slot] = Value::Obj(instance_ref);

    match lookup_method(vm, class_ref, "init") {
        Some(method_ref) => call_closure(vm, method_ref, argc),
        None => {
            if argc != 0 {
                return Err(vm.runtime_error(RuntimeError::ArityMismatch { expected: 0, got: argc }));
            }
            Ok(())
        }
    }
}

fn call_bound_method(vm: &mut Vm, bound_ref: ObjRef, argc: u8) -> Result<(), RuntimeError> {
    let (receiver, method) = {
        let bound = vm.heap.get(bound_ref).as_bound_method().unwrap();
        (bound.receiver, bound.method)
    };
    let callee_slot = vm.stack.len() - argc as usize - 1;
    vm.stack[callee_slot] = receiver;
    call_closure(vm, method, argc)
}

fn lookup_method(vm: &Vm, class_ref: ObjRef, name: &str) -> Option<ObjRef> {
    let class = vm.heap.get(class_ref).as_class().unwrap();
    for (key, value) in class.methods.entries() {
        if vm.heap.get(key).as_string().unwrap().bytes == name {
            return value.as_obj();
        }
    }
    None
}

pub(super) fn invoke(vm: &mut Vm, name_ref: ObjRef, argc: u8) -> Result<(), RuntimeError> {
    let receiver = vm.peek(argc as usize);
    let Some(instance_ref) = receiver.as_obj() else {
        return Err(vm.runtime_error(RuntimeError::UndefinedProperty("receiver is not an instance".to_string())));
    };
    let instance = match vm.heap.get(instance_ref) {
        Object::Instance(i) => i,
        _ => return Err(vm.runtime_error(RuntimeError::UndefinedProperty("receiver is not an instance".to_string()))),
    };
    let name = vm.heap.get(name_ref).as_string().unwrap().bytes.clone();
    let hash = vm.heap.get(name_ref).as_string().unwrap().hash;
    if let Some(field) = instance.fields.get(name_ref, hash) {
        let callee_slot = vm.stack.len() - argc as usize - 1;
        vm.stack[callee_slot] = field;
        return call_value(vm, field, argc);
    }
    let class_ref = instance.class;
    match lookup_method(vm, class_ref, &name) {
        Some(method_ref) => call_closure(vm, method_ref, argc),
        None => Err(vm.runtime_error(RuntimeError::UndefinedProperty(name))),
    }
}

pub(super) fn super_invoke(vm: &mut Vm, name_ref: ObjRef, argc: u8) -> Result<(), RuntimeError> {
    let superclass_value = vm.pop();
    let superclass_ref = superclass_value.as_obj().expect("super is not a class");
    let name = vm.heap.get(name_ref).as_string().unwrap().bytes.clone();
    match lookup_method(vm, superclass_ref, &name) {
        Some(method_ref) => call_closure(vm, method_ref, argc),
        None => Err(vm.runtime_error(RuntimeError::UndefinedProperty(name))),
    }
}

pub(super) fn handle_closure(vm: &mut Vm) -> Result<(), RuntimeError> {
    let function_ref = vm
        .read_constant()
        .as_obj()
        .expect("closure constant is not a function");
    let upvalue_count = vm.heap.get(function_ref).as_function().unwrap().upvalue_count;

    let mut upvalues = Vec::with_capacity(upvalue_count as usize);
    for _ in 0..upvalue_count {
        let is_local = vm.read_byte() != 0;
        let index = vm.read_byte();
        if is_local {
            let base = vm.frames.last().unwrap().slot_base;
            upvalues.push(capture_upvalue(vm, base + index as usize));
        } else {
            let enclosing_closure = vm.frames.last().unwrap().closure;
            let enclosing_upvalues = &vm.heap.get(enclosing_closure).as_closure().unwrap().upvalues;
            upvalues.push(enclosing_upvalues[index as usize]);
        }
    }

    vm.maybe_collect(&[function_ref]);
    let closure_ref = vm.heap.alloc_closure(ObjClosure { function: function_ref, upvalues });
    vm.push(Value::Obj(closure_ref));
    Ok(())
}

/// `captureUpvalue`: reuse an existing open upvalue at `stack_index` if one
/// exists, otherwise allocate a new one and splice it into the
/// descending-sorted open-upvalue list (`spec.md` §4.4/invariant 2).
pub(super) fn capture_upvalue(vm: &mut Vm, stack_index: usize) -> ObjRef {
    for &existing in &vm.open_upvalues {
        if let UpvalueState::Open(idx) = vm.heap.get(existing).as_upvalue().unwrap().state {
            if idx == stack_index {
                return existing;
            }
        }
    }
    vm.maybe_collect(&[]);
    let upvalue_ref = vm.heap.alloc_upvalue(ObjUpvalue { state: UpvalueState::Open(stack_index) });
    let position = vm
        .open_upvalues
        .iter()
        .position(|&r| match vm.heap.get(r).as_upvalue().unwrap().state {
            UpvalueState::Open(idx) => idx < stack_index,
            UpvalueState::Closed(_) => false,
        })
        .unwrap_or(vm.open_upvalues.len());
    vm.open_upvalues.insert(position, upvalue_ref);
    upvalue_ref
}

/// `closeUpvalues`: every open upvalue at or above `from` gets its value
/// copied into its own `closed` cell and is removed from the open list.
pub(super) fn close_upvalues(vm: &mut Vm, from: usize) {
    let mut i = 0;
    while i < vm.open_upvalues.len() {
        let r = vm.open_upvalues[i];
        let should_close = match vm.heap.get(r).as_upvalue().unwrap().state {
            UpvalueState::Open(idx) => idx >= from,
            UpvalueState::Closed(_) => false,
        };
        if should_close {
            let idx = match vm.heap.get(r).as_upvalue().unwrap().state {
                UpvalueState::Open(idx) => idx,
                UpvalueState::Closed(_) => unreachable!(),
            };
            let value = vm.stack[idx];
            if let Object::Upvalue(u) = vm.heap.get_mut(r) {
                u.state = UpvalueState::Closed(value);
            }
            vm.open_upvalues.remove(i);
        } else {
            i += 1;
        }
    }
}

/// Returns `true` if the outermost frame just returned (the VM should
/// halt).
pub(super) fn handle_return(vm: &mut Vm) -> Result<bool, RuntimeError> {
    let result = vm.pop();
    let frame = vm.frames.pop().unwrap();
    close_upvalues(vm, frame.slot_base);
    if vm.frames.is_empty() {
        vm.pop(); // the top-level script closure itself
        return Ok(true);
    }
    vm.stack.truncate(frame.slot_base);
    vm.push(result);
    Ok(false)
}
