//! # Native Function Registry
//!
//! Grounded on the teacher's `vm/builtins.rs` dispatch shape (name-keyed
//! table, fixed `(argc, args) -> Value` signature) and its use of
//! `once_cell` — kept as this crate's sole third-party dependency. Narrowed
//! to the one native `spec.md` §6 actually specifies: `clock()`. The
//! teacher's file-I/O/`chr`/`hex`/`freeze` builtins have no Wisp
//! counterpart (no file or frozen-dict concepts here) and are dropped.

use once_cell::sync::Lazy;

use crate::object::ObjNative;
use crate::value::Value;
use crate::vm::Vm;

static START: Lazy<std::time::Instant> = Lazy::new(std::time::Instant::now);

fn clock_native(_args: &[Value]) -> Result<Value, String> {
    Ok(Value::Number(START.elapsed().as_secs_f64()))
}

/// Register every bundled native as a global, matching clox's
/// `defineNative` (called once at VM startup).
pub fn install(vm: &mut Vm) {
    Lazy::force(&START);
    vm.maybe_collect(&[]);
    let native_ref = vm.heap.alloc_native(ObjNative { name: "clock", arity: 0, function: clock_native });
    vm.maybe_collect(&[native_ref]);
    let name_ref = vm.heap.intern_string("clock");
    let hash = vm.heap.get(name_ref).as_string().unwrap().hash;
    vm.globals.set(name_ref, hash, Value::Obj(native_ref));
}
