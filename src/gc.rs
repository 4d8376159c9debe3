//! # Heap Arena & Mark-Sweep Collector
//!
//! Per `SPEC_FULL.md` §3 (the arena re-architecture called for by `spec.md`
//! §9), heap objects are not threaded through a pointer-based allocation
//! list. They live in [`Heap`], a single growable arena of slots; an
//! [`ObjRef`] is a small index into that arena and doubles as clox's
//! `Obj*` identity for reference-equality purposes (string interning,
//! `Value::Obj` equality).
//!
//! The collector itself ([`Heap::collect_garbage`]) is a textbook
//! mark-sweep: a gray worklist seeded from explicit roots, `blacken_object`
//! tracing each object's outgoing references, then a linear sweep of arena
//! slots that frees anything left white and purges dead entries from the
//! string intern table (a weak table, per `spec.md` §4.8).

use crate::object::{Object, ObjKind, UpvalueState};
use crate::table::Interner;
use crate::value::Value;

/// A handle into the heap arena. Equality is reference identity: two
/// `ObjRef`s are equal iff they index the same slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjRef(u32);

struct Slot {
    object: Object,
    marked: bool,
}

/// Approximate per-object overhead, in lieu of `std::mem::size_of_val` on a
/// trait object; good enough for a heap-growth heuristic that only needs to
/// be in the right ballpark (clox does the analogous thing with `sizeof`).
fn approx_size(object: &Object) -> usize {
    match object {
        Object::Str(s) => 24 + s.bytes.len(),
        Object::Function(_) => 96,
        Object::Native(_) => 32,
        Object::Closure(c) => 24 + c.upvalues.len() * 4,
        Object::Upvalue(_) => 24,
        Object::Class(_) => 64,
        Object::Instance(_) => 64,
        Object::BoundMethod(_) => 24,
    }
}

/// The VM's heap arena, string intern table and GC bookkeeping.
pub struct Heap {
    slots: Vec<Option<Slot>>,
    free_list: Vec<u32>,
    interner: Interner,
    bytes_allocated: usize,
    next_gc: usize,
    pub stress_mode: bool,
    gray_worklist: Vec<ObjRef>,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            slots: Vec::new(),
            free_list: Vec::new(),
            interner: Interner::new(),
            bytes_allocated: 0,
            next_gc: 1024 * 1024,
            stress_mode: std::env::var("WISP_GC_STRESS").map(|v| v == "1").unwrap_or(false),
            gray_worklist: Vec::new(),
        }
    }

    fn insert(&mut self, object: Object) -> ObjRef {
        self.bytes_allocated += approx_size(&object);
        let slot = Slot { object, marked: false };
        if let Some(idx) = self.free_list.pop() {
            self.slots[idx as usize] = Some(slot);
            ObjRef(idx)
        } else {
            self.slots.push(Some(slot));
            ObjRef((self.slots.len() - 1) as u32)
        }
    }

    pub fn get(&self, r: ObjRef) -> &Object {
        self.slots[r.0 as usize]
            .as_ref()
            .map(|s| &s.object)
            .expect("dangling ObjRef")
    }

    pub fn get_mut(&mut self, r: ObjRef) -> &mut Object {
        self.slots[r.0 as usize]
            .as_mut()
            .map(|s| &mut s.object)
            .expect("dangling ObjRef")
    }

    pub fn kind_of(&self, r: ObjRef) -> ObjKind {
        self.get(r).kind()
    }

    /// Whether allocation pressure has crossed the heap-growth trigger, or
    /// stress mode forces a collection after every allocation.
    pub fn should_collect(&self) -> bool {
        self.stress_mode || self.bytes_allocated > self.next_gc
    }

    /// Intern a string, allocating a new `ObjString` only on a miss.
    /// Mirrors clox's `copyString`/`takeString` fused into one path since
    /// Rust strings are always owned here (no separate "take ownership of
    /// caller's buffer" variant is needed).
    pub fn intern_string(&mut self, bytes: &str) -> ObjRef {
        if let Some(existing) = self.interner.find(bytes) {
            return existing;
        }
        let hash = fnv1a(bytes.as_bytes());
        let r = self.insert(Object::Str(crate::object::ObjString {
            bytes: bytes.to_string(),
            hash,
        }));
        self.interner.insert(bytes, hash, r);
        r
    }

    pub fn alloc_function(&mut self, function: crate::object::ObjFunction) -> ObjRef {
        self.insert(Object::Function(function))
    }

    pub fn alloc_native(&mut self, native: crate::object::ObjNative) -> ObjRef {
        self.insert(Object::Native(native))
    }

    pub fn alloc_closure(&mut self, closure: crate::object::ObjClosure) -> ObjRef {
        self.insert(Object::Closure(closure))
    }

    pub fn alloc_upvalue(&mut self, upvalue: crate::object::ObjUpvalue) -> ObjRef {
        self.insert(Object::Upvalue(upvalue))
    }

    pub fn alloc_class(&mut self, class: crate::object::ObjClass) -> ObjRef {
        self.insert(Object::Class(class))
    }

    pub fn alloc_instance(&mut self, instance: crate::object::ObjInstance) -> ObjRef {
        self.insert(Object::Instance(instance))
    }

    pub fn alloc_bound_method(&mut self, bound: crate::object::ObjBoundMethod) -> ObjRef {
        self.insert(Object::BoundMethod(bound))
    }

    pub fn display_object(&self, r: ObjRef) -> String {
        match self.get(r) {
            Object::Str(s) => s.bytes.clone(),
            Object::Function(f) => match f.name {
                Some(name) => format!("<fn {}>", self.get(name).as_string().unwrap().bytes),
                None => "<script>".to_string(),
            },
            Object::Native(n) => format!("<native fn {}>", n.name),
            Object::Closure(c) => self.display_object(c.function),
            Object::Upvalue(_) => "<upvalue>".to_string(),
            Object::Class(c) => self.get(c.name).as_string().unwrap().bytes.clone(),
            Object::Instance(i) => {
                let class = self.get(i.class).as_class().unwrap();
                format!("{} instance", self.get(class.name).as_string().unwrap().bytes)
            }
            Object::BoundMethod(b) => self.display_object(b.method),
        }
    }

    fn mark_object(&mut self, r: ObjRef) {
        let slot = self.slots[r.0 as usize].as_mut().expect("dangling ObjRef");
        if slot.marked {
            return;
        }
        slot.marked = true;
        self.gray_worklist.push(r);
    }

    fn mark_value(&mut self, value: Value) {
        if let Value::Obj(r) = value {
            self.mark_object(r);
        }
    }

    /// Trace one gray object's outgoing references, per the table in
    /// `spec.md` §4.8.
    fn blacken(&mut self, r: ObjRef) {
        match self.slots[r.0 as usize].as_ref().unwrap().object_ref_kind() {
            ObjKind::Closure => {
                let (function, upvalues) = {
                    let c = self.get(r).as_closure().unwrap();
                    (c.function, c.upvalues.clone())
                };
                self.mark_object(function);
                for u in upvalues {
                    self.mark_object(u);
                }
            }
            ObjKind::Function => {
                let (name, constants) = {
                    let f = self.get(r).as_function().unwrap();
                    (f.name, f.chunk.constants.clone())
                };
                if let Some(name) = name {
                    self.mark_object(name);
                }
                for v in constants {
                    self.mark_value(v);
                }
            }
            ObjKind::Upvalue => {
                if let UpvalueState::Closed(v) = self.get(r).as_upvalue().unwrap().state {
                    self.mark_value(v);
                }
            }
            ObjKind::Class => {
                let (name, method_values) = {
                    let c = self.get(r).as_class().unwrap();
                    (c.name, c.methods.values())
                };
                self.mark_object(name);
                for v in method_values {
                    self.mark_value(v);
                }
            }
            ObjKind::Instance => {
                let (class, field_values) = {
                    let i = self.get(r).as_instance().unwrap();
                    (i.class, i.fields.values())
                };
                self.mark_object(class);
                for v in field_values {
                    self.mark_value(v);
                }
            }
            ObjKind::BoundMethod => {
                let (receiver, method) = {
                    let b = self.get(r).as_bound_method().unwrap();
                    (b.receiver, b.method)
                };
                self.mark_value(receiver);
                self.mark_object(method);
            }
            ObjKind::Str | ObjKind::Native => {}
        }
    }

    /// Run one full mark-sweep collection, marking `roots` plus
    /// `extra_roots` (the VM's stack/frames/globals/open-upvalues call this
    /// with their own roots; the compiler chain passes its in-progress
    /// function objects as `extra_roots` when allocation during compilation
    /// triggers a collection).
    pub fn collect_garbage(&mut self, roots: &[Value], extra_roots: &[ObjRef]) {
        for &v in roots {
            self.mark_value(v);
        }
        for &r in extra_roots {
            self.mark_object(r);
        }
        while let Some(r) = self.gray_worklist.pop() {
            self.blacken(r);
        }
        let marks = self.slots_marked();
        self.interner.remove_unmarked(&marks);
        self.sweep();
        self.next_gc = self.bytes_allocated * 2;
    }

    fn slots_marked(&self) -> Vec<bool> {
        self.slots.iter().map(|s| s.as_ref().map_or(false, |s| s.marked)).collect()
    }

    fn sweep(&mut self) {
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            match slot {
                Some(s) if s.marked => {
                    s.marked = false;
                }
                Some(s) => {
                    self.bytes_allocated -= approx_size(&s.object);
                    *slot = None;
                    self.free_list.push(idx as u32);
                }
                None => {}
            }
        }
    }
}

impl Slot {
    fn object_ref_kind(&self) -> ObjKind {
        self.object.kind()
    }
}

/// Exposes an `ObjRef`'s raw arena index for the intern table's weak sweep,
/// which needs to check liveness by slot position without a `Heap` handle.
pub fn obj_ref_index(r: ObjRef) -> usize {
    r.0 as usize
}

/// 32-bit FNV-1a, matching clox's `hashString` exactly.
pub fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 2166136261;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}
