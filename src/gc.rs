//! Garbage-collected heap for Determa
//!
//! A non-moving mark-and-sweep collector over a slot pool. Every object
//! lives in one `Slot` together with its mark bit, the way a heap header
//! word would sit in front of a C object; handles are indices into the
//! pool and stay valid exactly as long as the object is reachable from a
//! root. Swept slots are remembered and handed out again on the next
//! allocation.
//!
//! The pending worklist is an ordinary vector outside the pool, so
//! collection never allocates on the heap it is collecting.

use std::collections::HashMap;

use crate::value::Function;

/// Collection threshold floor (1 MiB)
const TRIGGER_FLOOR: usize = 1 << 20;

/// The live-byte multiplier applied after each sweep
const GROWTH_FACTOR: usize = 2;

/// A handle to a heap-allocated object; an index into the heap's pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub usize);

/// The heap-object kinds
pub enum Object {
    String(String),
    Function(Function),
}

impl Object {
    /// Handles this object references (traced during marking)
    pub fn children(&self) -> Vec<Handle> {
        match self {
            // Strings have no outgoing references
            Object::String(_) => vec![],
            Object::Function(f) => f.children(),
        }
    }

    /// Size accounted against the collection trigger. Must match
    /// exactly between alloc and free.
    pub fn size_bytes(&self) -> usize {
        match self {
            Object::String(s) => std::mem::size_of::<Object>() + s.len(),
            Object::Function(f) => {
                std::mem::size_of::<Object>()
                    + f.name.as_ref().map_or(0, |n| n.len())
                    + f.chunk.code.len()
                    + f.chunk.constants.len() * std::mem::size_of::<crate::value::Value>()
            }
        }
    }
}

/// One pool entry: the object, if the slot is live, and its mark bit
struct Slot {
    obj: Option<Object>,
    marked: bool,
}

pub struct Heap {
    /// Object pool; a handle is an index in here
    slots: Vec<Slot>,

    /// Indices of swept slots, reused before the pool grows
    recycled: Vec<usize>,

    /// Marked-but-untraced handles (the gray worklist)
    pending: Vec<Handle>,

    /// String interner for deduplication
    interner: HashMap<String, Handle>,

    pub bytes_allocated: usize,

    /// Allocation level that triggers the next collection
    trigger: usize,
}

impl Heap {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            recycled: Vec::new(),
            pending: Vec::new(),
            interner: HashMap::new(),
            bytes_allocated: 0,
            trigger: TRIGGER_FLOOR,
        }
    }

    /// Allocate a string, or return the existing interned handle
    pub fn alloc_string(&mut self, s: String) -> Handle {
        match self.interner.get(&s) {
            Some(&existing) => existing,
            None => {
                let handle = self.alloc(Object::String(s.clone()));
                self.interner.insert(s, handle);
                handle
            }
        }
    }

    pub fn alloc_function(&mut self, f: Function) -> Handle {
        self.alloc(Object::Function(f))
    }

    fn alloc(&mut self, obj: Object) -> Handle {
        self.bytes_allocated += obj.size_bytes();

        let slot = Slot {
            obj: Some(obj),
            marked: false,
        };

        match self.recycled.pop() {
            Some(idx) => {
                self.slots[idx] = slot;
                Handle(idx)
            }
            None => {
                self.slots.push(slot);
                Handle(self.slots.len() - 1)
            }
        }
    }

    pub fn get_string(&self, handle: Handle) -> Option<&String> {
        match self.slots.get(handle.0)?.obj.as_ref()? {
            Object::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn get_function(&self, handle: Handle) -> Option<&Function> {
        match self.slots.get(handle.0)?.obj.as_ref()? {
            Object::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Number of live objects in the pool
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.obj.is_some()).count()
    }

    pub fn is_marked(&self, handle: Handle) -> bool {
        self.slots.get(handle.0).is_some_and(|s| s.marked)
    }

    /// Has allocation crossed the collection trigger?
    pub fn wants_gc(&self) -> bool {
        self.bytes_allocated >= self.trigger
    }

    /// Flag an object reachable and queue it for tracing. Dead handles
    /// and already-marked objects fall through without effect.
    pub fn mark(&mut self, handle: Handle) {
        let Some(slot) = self.slots.get_mut(handle.0) else {
            return;
        };
        if slot.marked || slot.obj.is_none() {
            return;
        }

        slot.marked = true;
        self.pending.push(handle);
    }

    /// Drain the worklist until everything reachable carries a mark
    pub fn trace_references(&mut self) {
        while let Some(handle) = self.pending.pop() {
            // Collect first; marking children mutates the pool
            let children = self.slots[handle.0]
                .obj
                .as_ref()
                .map(Object::children)
                .unwrap_or_default();

            for child in children {
                self.mark(child);
            }
        }
    }

    /// One walk over the pool: survivors lose their mark bit for the
    /// next cycle, everything unmarked is reclaimed and its slot queued
    /// for reuse. Finishes by recomputing the collection trigger.
    pub fn sweep(&mut self) {
        let mut reclaimed = 0;

        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if slot.marked {
                slot.marked = false;
            } else if let Some(obj) = slot.obj.take() {
                reclaimed += obj.size_bytes();
                self.recycled.push(idx);
            }
        }

        // Interner entries whose slots just emptied must not resurrect
        // a dead handle
        let slots = &self.slots;
        self.interner
            .retain(|_, handle| slots[handle.0].obj.is_some());

        self.bytes_allocated -= reclaimed;
        self.trigger = (self.bytes_allocated * GROWTH_FACTOR).max(TRIGGER_FLOOR);
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_interning() {
        let mut heap = Heap::new();
        let a = heap.alloc_string("hello".to_string());
        let b = heap.alloc_string("hello".to_string());
        let c = heap.alloc_string("world".to_string());

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(heap.live_count(), 2);
    }

    #[test]
    fn test_unmarked_objects_are_swept() {
        let mut heap = Heap::new();
        let garbage = heap.alloc_string("garbage".to_string());
        let before = heap.bytes_allocated;
        assert!(before > 0);

        heap.trace_references();
        heap.sweep();

        assert!(heap.bytes_allocated < before);
        assert_eq!(heap.live_count(), 0);
        assert!(heap.get_string(garbage).is_none());
    }

    #[test]
    fn test_marked_objects_survive() {
        let mut heap = Heap::new();
        let keep = heap.alloc_string("treasure".to_string());
        let _drop = heap.alloc_string("garbage".to_string());
        let before = heap.bytes_allocated;

        heap.mark(keep);
        heap.trace_references();
        heap.sweep();

        assert!(heap.bytes_allocated < before);
        assert_eq!(heap.get_string(keep).map(String::as_str), Some("treasure"));
        assert_eq!(heap.live_count(), 1);
    }

    #[test]
    fn test_marks_cleared_after_sweep() {
        let mut heap = Heap::new();
        let keep = heap.alloc_string("still here".to_string());

        heap.mark(keep);
        heap.trace_references();
        heap.sweep();

        assert!(!heap.is_marked(keep));
    }

    #[test]
    fn test_marking_is_idempotent() {
        let mut heap = Heap::new();
        let keep = heap.alloc_string("once".to_string());

        heap.mark(keep);
        heap.mark(keep);
        heap.trace_references();
        heap.sweep();

        assert_eq!(heap.live_count(), 1);
    }

    #[test]
    fn test_freed_slots_are_reused() {
        let mut heap = Heap::new();
        let first = heap.alloc_string("first".to_string());
        heap.trace_references();
        heap.sweep();

        let second = heap.alloc_string("second".to_string());
        assert_eq!(first.0, second.0);
    }

    #[test]
    fn test_interner_pruned_on_sweep() {
        let mut heap = Heap::new();
        let _old = heap.alloc_string("gone".to_string());
        heap.trace_references();
        heap.sweep();

        // A fresh allocation of the same text gets a live slot again
        let fresh = heap.alloc_string("gone".to_string());
        assert_eq!(heap.get_string(fresh).map(String::as_str), Some("gone"));
    }
}
