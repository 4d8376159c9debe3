//! # Hash Table & String Interner
//!
//! Two data structures, both open-addressed with linear probing and
//! tombstone deletion per `spec.md` §4.5, but serving different keys:
//!
//! - [`Table`]: keyed by an already-interned string [`ObjRef`] plus its
//!   cached hash. Used for globals, instance fields and class methods.
//!   Since interning already guarantees one `ObjRef` per distinct string
//!   byte sequence, a `Table` lookup only needs to compare hash then
//!   `ObjRef` identity — no byte comparison.
//! - [`Interner`]: keyed by raw string bytes. Used exclusively to build the
//!   canonical `ObjRef` for a string *before* one exists, so it has to
//!   compare candidate bytes directly (`tableFindString` in clox).
//!
//! No single generic table serves both roles cleanly in safe Rust without
//! either duplicating the probe sequence or taking a closure for
//! byte-comparison on every lookup; grounded on clox's `table.c`, which
//! likewise has a dedicated `tableFindString` sitting beside the generic
//! `findEntry`.

use crate::gc::ObjRef;
use crate::value::Value;

const MAX_LOAD_FACTOR: f64 = 0.75;

enum Slot {
    Empty,
    Tombstone,
    Occupied { key: ObjRef, hash: u32, value: Value },
}

/// Generic interned-key table: globals, instance fields, class methods.
pub struct Table {
    slots: Vec<Slot>,
    count: usize, // occupied + tombstones, per spec.md's "count tracks non-empty"
}

impl Table {
    pub fn new() -> Self {
        Table { slots: Vec::new(), count: 0 }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn find_slot(slots: &[Slot], capacity: usize, key: ObjRef, hash: u32) -> usize {
        let mut index = (hash as usize) % capacity;
        let mut first_tombstone: Option<usize> = None;
        loop {
            match &slots[index] {
                Slot::Empty => return first_tombstone.unwrap_or(index),
                Slot::Tombstone => {
                    if first_tombstone.is_none() {
                        first_tombstone = Some(index);
                    }
                }
                Slot::Occupied { key: k, .. } if *k == key => return index,
                Slot::Occupied { .. } => {}
            }
            index = (index + 1) % capacity;
        }
    }

    fn grow(&mut self) {
        let new_capacity = if self.slots.is_empty() { 8 } else { self.slots.len() * 2 };
        let mut new_slots: Vec<Slot> = (0..new_capacity).map(|_| Slot::Empty).collect();
        let mut live = 0;
        for slot in self.slots.drain(..) {
            if let Slot::Occupied { key, hash, value } = slot {
                let idx = Self::find_slot(&new_slots, new_capacity, key, hash);
                new_slots[idx] = Slot::Occupied { key, hash, value };
                live += 1;
            }
        }
        self.slots = new_slots;
        self.count = live;
    }

    /// Sets `key` to `value`, growing first if the load factor would be
    /// exceeded. Returns `true` if this was a new key (clox's "new key"
    /// report used by `OP_DEFINE_GLOBAL`/`OP_SET_GLOBAL`).
    pub fn set(&mut self, key: ObjRef, hash: u32, value: Value) -> bool {
        if (self.count + 1) as f64 > self.capacity() as f64 * MAX_LOAD_FACTOR {
            self.grow();
        }
        let idx = Self::find_slot(&self.slots, self.capacity(), key, hash);
        let is_new = !matches!(self.slots[idx], Slot::Occupied { .. });
        if is_new && !matches!(self.slots[idx], Slot::Tombstone) {
            self.count += 1;
        }
        self.slots[idx] = Slot::Occupied { key, hash, value };
        is_new
    }

    pub fn get(&self, key: ObjRef, hash: u32) -> Option<Value> {
        if self.slots.is_empty() {
            return None;
        }
        let idx = Self::find_slot(&self.slots, self.capacity(), key, hash);
        match &self.slots[idx] {
            Slot::Occupied { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// Deletes `key`, leaving a tombstone in its place. Returns whether the
    /// key was present.
    pub fn delete(&mut self, key: ObjRef, hash: u32) -> bool {
        if self.slots.is_empty() {
            return false;
        }
        let idx = Self::find_slot(&self.slots, self.capacity(), key, hash);
        if matches!(self.slots[idx], Slot::Occupied { .. }) {
            self.slots[idx] = Slot::Tombstone;
            true
        } else {
            false
        }
    }

    pub fn values(&self) -> Vec<Value> {
        self.slots
            .iter()
            .filter_map(|s| match s {
                Slot::Occupied { value, .. } => Some(*value),
                _ => None,
            })
            .collect()
    }

    /// All `(key, value)` pairs, used when copying a superclass's methods
    /// into a subclass for `OP_INHERIT`.
    pub fn entries(&self) -> Vec<(ObjRef, Value)> {
        self.slots
            .iter()
            .filter_map(|s| match s {
                Slot::Occupied { key, value, .. } => Some((*key, *value)),
                _ => None,
            })
            .collect()
    }
}

enum InternSlot {
    Empty,
    Tombstone,
    Occupied { bytes: String, hash: u32, obj: ObjRef },
}

/// The string intern table: raw-byte lookup keyed on candidate bytes, used
/// only while turning source/constant text into the canonical `ObjRef` for
/// that content. A weak table: entries are purged for unmarked objects
/// during GC sweep (`tableRemoveWhite` in clox).
pub struct Interner {
    slots: Vec<InternSlot>,
    count: usize,
}

impl Interner {
    pub fn new() -> Self {
        Interner { slots: Vec::new(), count: 0 }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn find_slot(slots: &[InternSlot], capacity: usize, bytes: &str, hash: u32) -> usize {
        let mut index = (hash as usize) % capacity;
        let mut first_tombstone: Option<usize> = None;
        loop {
            match &slots[index] {
                InternSlot::Empty => return first_tombstone.unwrap_or(index),
                InternSlot::Tombstone => {
                    if first_tombstone.is_none() {
                        first_tombstone = Some(index);
                    }
                }
                InternSlot::Occupied { bytes: b, hash: h, .. } if *h == hash && b == bytes => {
                    return index
                }
                InternSlot::Occupied { .. } => {}
            }
            index = (index + 1) % capacity;
        }
    }

    fn grow(&mut self) {
        let new_capacity = if self.slots.is_empty() { 8 } else { self.slots.len() * 2 };
        let mut new_slots: Vec<InternSlot> = (0..new_capacity).map(|_| InternSlot::Empty).collect();
        let mut live = 0;
        for slot in self.slots.drain(..) {
            if let InternSlot::Occupied { bytes, hash, obj } = slot {
                let idx = Self::find_slot(&new_slots, new_capacity, &bytes, hash);
                new_slots[idx] = InternSlot::Occupied { bytes, hash, obj };
                live += 1;
            }
        }
        self.slots = new_slots;
        self.count = live;
    }

    pub fn find(&self, bytes: &str) -> Option<ObjRef> {
        if self.slots.is_empty() {
            return None;
        }
        let hash = crate::gc::fnv1a(bytes.as_bytes());
        let idx = Self::find_slot(&self.slots, self.capacity(), bytes, hash);
        match &self.slots[idx] {
            InternSlot::Occupied { obj, .. } => Some(*obj),
            InternSlot::Empty | InternSlot::Tombstone => None,
        }
    }

    pub fn insert(&mut self, bytes: &str, hash: u32, obj: ObjRef) {
        if (self.count + 1) as f64 > self.capacity() as f64 * MAX_LOAD_FACTOR {
            self.grow();
        }
        let idx = Self::find_slot(&self.slots, self.capacity(), bytes, hash);
        if matches!(self.slots[idx], InternSlot::Empty) {
            self.count += 1;
        }
        self.slots[idx] = InternSlot::Occupied { bytes: bytes.to_string(), hash, obj };
    }

    /// Weak-table sweep: drop entries whose `ObjRef` slot is not marked,
    /// leaving a tombstone behind (`tableRemoveWhite` in clox) so later
    /// probe chains through this slot stay intact.
    /// `marked` indexes the heap arena by slot id directly.
    pub fn remove_unmarked(&mut self, marked: &[bool]) {
        for slot in self.slots.iter_mut() {
            if let InternSlot::Occupied { obj, .. } = slot {
                if !marked.get(obj_index(*obj)).copied().unwrap_or(false) {
                    *slot = InternSlot::Tombstone;
                }
            }
        }
    }
}

fn obj_index(r: ObjRef) -> usize {
    crate::gc::obj_ref_index(r)
}
