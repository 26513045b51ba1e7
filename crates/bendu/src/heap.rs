//! The garbage-collected heap arena (spec.md §3, "Heap object"; §4.5 "GC").
//!
//! Grounded on the teacher's `heap.rs`: a slot arena (`Vec<Option<Entry>>`)
//! with a free list for slot reuse, `HeapId` as a stable index handle, and a
//! worklist-based reachability sweep. Two differences follow spec.md rather
//! than the teacher directly: collection here is a genuine tri-colour
//! mark-sweep (the teacher's Python runtime uses CPython-style refcounting
//! with an occasional cycle-breaking sweep), and capacity doubles whenever
//! the post-sweep live-to-capacity ratio exceeds 0.25, rather than running
//! on a fixed allocation-count interval.

use crate::{intern::StringId, value::Value};

/// Initial number of slots before the first doubling.
const INITIAL_CAPACITY: usize = 64;

/// A stable handle into the heap arena (spec.md §3, "a heap pointer").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapId(usize);

impl HeapId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn test_id(index: usize) -> Self {
        Self(index)
    }
}

/// Tri-colour mark state (spec.md §4.5, "GC (tri-colour mark-sweep,
/// stop-the-world)"). White = unvisited this cycle, Gray = reachable but its
/// children not yet scanned, Black = reachable and fully scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// The kind-dependent payload of one heap object (spec.md §3, "Heap
/// object").
#[derive(Debug, PartialEq)]
pub enum HeapData {
    Float(f32),
    /// Interned handle; the characters live in the process-wide string pool
    /// (`intern.rs`), not in this payload (spec.md §3: "String: interned
    /// handle").
    Str(StringId),
    Array(Vec<Value>),
    Tuple(Vec<Value>),
    /// An ADT instance (spec.md §3, "Custom: constructor-id, name pointer,
    /// fixed-size value array").
    Custom { ctor_id: u32, name: StringId, fields: Vec<Value> },
    /// spec.md §3: "Closure: package-id, entry offset, owning frame
    /// pointer."
    Closure { package_id: i32, offset: u32, frame: HeapId },
    /// spec.md §3: "Frame: optional enclosing-frame pointer + growable
    /// value vector (slot 0 reserved for enclosing link when closures use
    /// it)."
    Frame { enclosing: Option<HeapId>, slots: Vec<Value> },
}

impl HeapData {
    /// Every [`HeapId`] directly held by this object, for GC reachability.
    fn child_ids(&self, out: &mut Vec<HeapId>) {
        match self {
            Self::Float(_) | Self::Str(_) => {}
            Self::Array(items) | Self::Tuple(items) => {
                for v in items {
                    if let Value::Ref(id) = v {
                        out.push(*id);
                    }
                }
            }
            Self::Custom { fields, .. } => {
                for v in fields {
                    if let Value::Ref(id) = v {
                        out.push(*id);
                    }
                }
            }
            Self::Closure { frame, .. } => out.push(*frame),
            Self::Frame { enclosing, slots } => {
                if let Some(id) = enclosing {
                    out.push(*id);
                }
                for v in slots {
                    if let Value::Ref(id) = v {
                        out.push(*id);
                    }
                }
            }
        }
    }
}

struct Entry {
    color: Color,
    refcount: u32,
    data: HeapData,
}

/// The GC-managed arena backing every heap-allocated [`Value`].
#[derive(Default)]
pub struct Heap {
    entries: Vec<Option<Entry>>,
    free_list: Vec<HeapId>,
    capacity: usize,
}

impl Heap {
    pub fn new() -> Self {
        Self { entries: Vec::new(), free_list: Vec::new(), capacity: INITIAL_CAPACITY }
    }

    pub fn allocate(&mut self, data: HeapData) -> HeapId {
        let entry = Entry { color: Color::White, refcount: 1, data };
        if let Some(id) = self.free_list.pop() {
            self.entries[id.index()] = Some(entry);
            id
        } else {
            let id = HeapId(self.entries.len());
            self.entries.push(Some(entry));
            id
        }
    }

    pub fn get(&self, id: HeapId) -> &HeapData {
        &self.entries[id.index()].as_ref().expect("Heap::get: slot freed").data
    }

    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        &mut self.entries[id.index()].as_mut().expect("Heap::get_mut: slot freed").data
    }

    #[cfg(test)]
    pub(crate) fn get_opt(&self, id: HeapId) -> Option<&HeapData> {
        self.entries.get(id.index()).and_then(Option::as_ref).map(|e| &e.data)
    }

    pub fn inc_ref(&mut self, id: HeapId) {
        let entry = self.entries[id.index()].as_mut().expect("Heap::inc_ref: slot freed");
        entry.refcount += 1;
    }

    /// Decrements `id`'s refcount, freeing the slot immediately once it
    /// reaches zero (spec.md §4.5: refcounting is an optimization to
    /// "promptly free scratch values"; it does not replace the mark-sweep
    /// collector, which remains responsible for cycles).
    pub fn dec_ref(&mut self, id: HeapId) {
        let refcount = {
            let entry = self.entries[id.index()].as_mut().expect("Heap::dec_ref: slot freed");
            entry.refcount -= 1;
            entry.refcount
        };
        if refcount == 0 {
            self.free_slot(id);
        }
    }

    fn free_slot(&mut self, id: HeapId) {
        let Some(entry) = self.entries[id.index()].take() else { return };
        let mut children = Vec::new();
        entry.data.child_ids(&mut children);
        for child in children {
            self.dec_ref(child);
        }
        self.free_list.push(id);
    }

    #[cfg(test)]
    pub(crate) fn refcount(&self, id: HeapId) -> u32 {
        self.entries[id.index()].as_ref().expect("Heap::refcount: slot freed").refcount
    }

    fn live_count(&self) -> usize {
        self.entries.len() - self.free_list.len()
    }

    /// Whether the arena has grown enough since the last sweep to warrant
    /// another collection (spec.md §3: "triggered when heap size exceeds
    /// capacity").
    pub fn should_collect(&self) -> bool {
        self.live_count() >= self.capacity
    }

    /// Runs one stop-the-world tri-colour mark-sweep rooted at `roots`
    /// (spec.md §4.5, "GC"). Doubles `capacity` if more than a quarter of it
    /// is still live after the sweep (spec.md §3: "capacity doubles
    /// whenever the live-to-capacity ratio exceeds 0.25 after a sweep").
    pub fn collect(&mut self, roots: &[&Value]) {
        for slot in &mut self.entries {
            if let Some(entry) = slot {
                entry.color = Color::White;
            }
        }

        let mut gray_stack: Vec<HeapId> = roots.iter().filter_map(|v| if let Value::Ref(id) = v { Some(*id) } else { None }).collect();
        for &id in &gray_stack {
            if let Some(entry) = self.entries[id.index()].as_mut() {
                entry.color = Color::Gray;
            }
        }

        while let Some(id) = gray_stack.pop() {
            let mut children = Vec::new();
            if let Some(entry) = self.entries[id.index()].as_mut() {
                entry.data.child_ids(&mut children);
                entry.color = Color::Black;
            }
            for child in children {
                if let Some(entry) = self.entries[child.index()].as_mut()
                    && entry.color == Color::White
                {
                    entry.color = Color::Gray;
                    gray_stack.push(child);
                }
            }
        }

        for (index, slot) in self.entries.iter_mut().enumerate() {
            let is_garbage = matches!(slot, Some(entry) if entry.color == Color::White);
            if is_garbage {
                *slot = None;
                self.free_list.push(HeapId(index));
            }
        }

        let live = self.live_count();
        if self.capacity > 0 && (live as f64) / (self.capacity as f64) > 0.25 {
            self.capacity *= 2;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_reuses_freed_slots() {
        let mut heap = Heap::new();
        let a = heap.allocate(HeapData::Float(1.0));
        heap.dec_ref(a);
        let b = heap.allocate(HeapData::Float(2.0));
        assert_eq!(a, b);
    }

    #[test]
    fn unreachable_cycle_is_collected_by_mark_sweep() {
        let mut heap = Heap::new();
        let a = heap.allocate(HeapData::Tuple(vec![Value::Unit]));
        let b = heap.allocate(HeapData::Tuple(vec![Value::Ref(a)]));
        // Close the cycle: a's first slot now points back at b. Overwrite
        // in place so refcounting alone can never reach zero.
        *heap.get_mut(a) = HeapData::Tuple(vec![Value::Ref(b)]);

        heap.collect(&[]);

        assert!(heap.get_opt(a).is_none());
        assert!(heap.get_opt(b).is_none());
    }

    #[test]
    fn reachable_object_survives_collection() {
        let mut heap = Heap::new();
        let id = heap.allocate(HeapData::Float(3.0));
        let root = Value::Ref(id);
        heap.collect(&[&root]);
        assert_eq!(heap.get(id), &HeapData::Float(3.0));
    }

    #[test]
    fn capacity_doubles_when_live_ratio_is_high() {
        let mut heap = Heap::new();
        let mut roots = Vec::new();
        for _ in 0..20 {
            roots.push(Value::Ref(heap.allocate(HeapData::Float(0.0))));
        }
        let capacity_before = heap.capacity;
        let root_refs: Vec<&Value> = roots.iter().collect();
        heap.collect(&root_refs);
        assert!(heap.capacity > capacity_before);
    }
}
