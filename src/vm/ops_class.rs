//! Class/instance/property opcodes: `GET_PROPERTY`, `SET_PROPERTY`,
//! `GET_SUPER`, `CLASS`, `INHERIT`, `METHOD`.
//!
//! No teacher analogue — OMG has no class system. Grounded directly on
//! clox's `vm.c` (`callValue`'s CLASS/INSTANCE branches, `bindMethod`), kept
//! in the teacher's one-handler-per-opcode module style.

use crate::error::RuntimeError;
use crate::gc::ObjRef;
use crate::object::{ObjBoundMethod, ObjClass, Object};
use crate::value::Value;
use crate::vm::Vm;

fn bind_method(vm: &mut Vm, class_ref: ObjRef, name_ref: ObjRef) -> Result<ObjRef, RuntimeError> {
    let name = vm.heap.get(name_ref).as_string().unwrap().bytes.clone();
    let class = vm.heap.get(class_ref).as_class().unwrap();
    let method_ref = class
        .methods
        .entries()
        .into_iter()
        .find(|(key, _)| vm.heap.get(*key).as_string().unwrap().bytes == name)
        .and_then(|(_, value)| value.as_obj());
    match method_ref {
        Some(method_ref) => {
            let receiver = vm.peek(0);
            vm.maybe_collect(&[class_ref, method_ref]);
            Ok(vm.heap.alloc_bound_method(ObjBoundMethod { receiver, method: method_ref }))
        }
        None => Err(vm.runtime_error(RuntimeError::UndefinedProperty(name))),
    }
}

pub(super) fn handle_get_property(vm: &mut Vm) -> Result<(), RuntimeError> {
    let name_ref = vm.read_string();
    let receiver = vm.peek(0);
    let Some(instance_ref) = receiver.as_obj() else {
        return Err(vm.runtime_error(RuntimeError::UndefinedProperty("only instances have properties".to_string())));
    };
    let (class_ref, field) = match vm.heap.get(instance_ref) {
        Object::Instance(i) => {
            let hash = vm.heap.get(name_ref).as_string().unwrap().hash;
            (i.class, i.fields.get(name_ref, hash))
        }
        _ => return Err(vm.runtime_error(RuntimeError::UndefinedProperty("only instances have properties".to_string()))),
    };
    if let Some(value) = field {
        vm.pop();
        vm.push(value);
        return Ok(());
    }
    let bound_ref = bind_method(vm, class_ref, name_ref)?;
    vm.pop();
    vm.push(Value::Obj(bound_ref));
    Ok(())
}

pub(super) fn handle_set_property(vm: &mut Vm) -> Result<(), RuntimeError> {
    let name_ref = vm.read_string();
    let value = vm.peek(0);
    let receiver = vm.peek(1);
    let Some(instance_ref) = receiver.as_obj() else {
        return Err(vm.runtime_error(RuntimeError::UndefinedProperty("only instances have fields".to_string())));
    };
    let hash = vm.heap.get(name_ref).as_string().unwrap().hash;
    match vm.heap.get_mut(instance_ref) {
        Object::Instance(i) => {
            i.fields.set(name_ref, hash, value);
        }
        _ => return Err(vm.runtime_error(RuntimeError::UndefinedProperty("only instances have fields".to_string()))),
    }
    vm.pop();
    vm.pop();
    vm.push(value);
    Ok(())
}

pub(super) fn handle_get_super(vm: &mut Vm) -> Result<(), RuntimeError> {
    let name_ref = vm.read_string();
    let superclass_value = vm.pop();
    let superclass_ref = superclass_value.as_obj().expect("super is not a class");
    let bound_ref = bind_method(vm, superclass_ref, name_ref)?;
    vm.pop();
    vm.push(Value::Obj(bound_ref));
    Ok(())
}

pub(super) fn handle_class(vm: &mut Vm) -> Result<(), RuntimeError> {
    let name_ref = vm.read_string();
    vm.maybe_collect(&[name_ref]);
    let class_ref = vm.heap.alloc_class(ObjClass::new(name_ref));
    vm.push(Value::Obj(class_ref));
    Ok(())
}

pub(super) fn handle_inherit(vm: &mut Vm) -> Result<(), RuntimeError> {
    let superclass_value = vm.peek(1);
    let Some(superclass_ref) = superclass_value.as_obj() else {
        return Err(vm.runtime_error(RuntimeError::NotAClass(superclass_value.display(&vm.heap))));
    };
    if !matches!(vm.heap.get(superclass_ref), Object::Class(_)) {
        return Err(vm.runtime_error(RuntimeError::NotAClass(superclass_value.display(&vm.heap))));
    }
    let inherited = vm.heap.get(superclass_ref).as_class().unwrap().methods.entries();
    let subclass_value = vm.peek(0);
    let subclass_ref = subclass_value.as_obj().expect("subclass is not a class");
    for (key, value) in inherited {
        let hash = vm.heap.get(key).as_string().unwrap().hash;
        if let Object::Class(c) = vm.heap.get_mut(subclass_ref) {
            c.methods.set(key, hash, value);
        }
    }
    vm.pop(); // subclass, "super" local keeps the superclass live on stack
    Ok(())
}

pub(super) fn handle_method(vm: &mut Vm) -> Result<(), RuntimeError> {
    let name_ref = vm.read_string();
    let method = vm.peek(0);
    let class_value = vm.peek(1);
    let class_ref = class_value.as_obj().expect("method target is not a class");
    let hash = vm.heap.get(name_ref).as_string().unwrap().hash;
    if let Object::Class(c) = vm.heap.get_mut(class_ref) {
        c.methods.set(name_ref, hash, method);
    }
    vm.pop();
    Ok(())
}
