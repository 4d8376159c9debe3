//! # Heap Object Model
//!
//! Defines [`Object`], the discriminated union of everything that lives in
//! the VM's heap arena, and the per-variant structs it wraps.
//!
//! Per `SPEC_FULL.md` §3, objects here carry no raw pointer and no
//! `next`-pointer allocation-list linkage: the arena in [`crate::gc::Heap`]
//! owns every object by value in a `Vec` slot, and an [`crate::gc::ObjRef`]
//! handle stands in for what clox represents as `Obj*`. The mark bit that
//! clox stores in the object header lives alongside the slot in the arena,
//! not on these structs.

use crate::chunk::Chunk;
use crate::gc::ObjRef;
use crate::table::Table;
use crate::value::Value;

/// A native function's Rust-side implementation: receives the argument
/// slice and returns a value or a runtime-error message.
pub type NativeFn = fn(args: &[Value]) -> Result<Value, String>;

pub struct ObjString {
    pub bytes: String,
    pub hash: u32,
}

pub struct ObjFunction {
    pub arity: u8,
    pub upvalue_count: u32,
    pub chunk: Chunk,
    /// `None` for the implicit top-level script function.
    pub name: Option<ObjRef>,
}

impl ObjFunction {
    pub fn new(name: Option<ObjRef>) -> Self {
        ObjFunction {
            arity: 0,
            upvalue_count: 0,
            chunk: Chunk::new(),
            name,
        }
    }
}

pub struct ObjNative {
    pub name: &'static str,
    pub arity: u8,
    pub function: NativeFn,
}

pub struct ObjClosure {
    pub function: ObjRef,
    pub upvalues: Vec<ObjRef>,
}

/// An upvalue's storage: `Open` while the captured slot is still on the
/// VM's operand stack, `Closed` after the owning frame has returned and
/// the value has been copied out.
pub enum UpvalueState {
    Open(usize),
    Closed(Value),
}

pub struct ObjUpvalue {
    pub state: UpvalueState,
}

pub struct ObjClass {
    pub name: ObjRef,
    pub methods: Table,
}

impl ObjClass {
    pub fn new(name: ObjRef) -> Self {
        ObjClass {
            name,
            methods: Table::new(),
        }
    }
}

pub struct ObjInstance {
    pub class: ObjRef,
    pub fields: Table,
}

impl ObjInstance {
    pub fn new(class: ObjRef) -> Self {
        ObjInstance {
            class,
            fields: Table::new(),
        }
    }
}

pub struct ObjBoundMethod {
    pub receiver: Value,
    pub method: ObjRef,
}

/// The kind tag clox stores in every object's header; kept here as a
/// standalone enum so the GC and disassembler can ask "what kind is this"
/// without matching the full [`Object`] payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjKind {
    Str,
    Function,
    Native,
    Closure,
    Upvalue,
    Class,
    Instance,
    BoundMethod,
}

pub enum Object {
    Str(ObjString),
    Function(ObjFunction),
    Native(ObjNative),
    Closure(ObjClosure),
    Upvalue(ObjUpvalue),
    Class(ObjClass),
    Instance(ObjInstance),
    BoundMethod(ObjBoundMethod),
}

impl Object {
    pub fn kind(&self) -> ObjKind {
        match self {
            Object::Str(_) => ObjKind::Str,
            Object::Function(_) => ObjKind::Function,
            Object::Native(_) => ObjKind::Native,
            Object::Closure(_) => ObjKind::Closure,
            Object::Upvalue(_) => ObjKind::Upvalue,
            Object::Class(_) => ObjKind::Class,
            Object::Instance(_) => ObjKind::Instance,
            Object::BoundMethod(_) => ObjKind::BoundMethod,
        }
    }

    pub fn as_string(&self) -> Option<&ObjString> {
        match self {
            Object::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&ObjFunction> {
        match self {
            Object::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_function_mut(&mut self) -> Option<&mut ObjFunction> {
        match self {
            Object::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_closure(&self) -> Option<&ObjClosure> {
        match self {
            Object::Closure(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<&ObjClass> {
        match self {
            Object::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_class_mut(&mut self) -> Option<&mut ObjClass> {
        match self {
            Object::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&ObjInstance> {
        match self {
            Object::Instance(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_instance_mut(&mut self) -> Option<&mut ObjInstance> {
        match self {
            Object::Instance(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_upvalue(&self) -> Option<&ObjUpvalue> {
        match self {
            Object::Upvalue(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_upvalue_mut(&mut self) -> Option<&mut ObjUpvalue> {
        match self {
            Object::Upvalue(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_bound_method(&self) -> Option<&ObjBoundMethod> {
        match self {
            Object::BoundMethod(b) => Some(b),
            _ => None,
        }
    }
}
