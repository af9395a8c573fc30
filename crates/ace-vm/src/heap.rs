//! The managed heap (§3 "Heap", §4.7 "Garbage collection").
//!
//! Modeled as a generational-index slab rather than a literal arena of boxed nodes: slots are
//! reused after a sweep, and each [`HeapIndex`] carries the generation it was allocated under,
//! so a stale pointer into a freed-and-reused slot is detected instead of silently aliasing
//! an unrelated object.

use ace_vm_interface::ExceptionKind;

use crate::value::Value;

/// A stable, generational index into the [`Heap`]. Two indices compare equal only if they
/// name the same slot *and* the same generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapIndex {
    slot: u32,
    generation: u32,
}

/// A named object field: `MOV_MEM_HASH` writes it, `LOAD_MEM_HASH` reads it by
/// [`crate::hash::fnv1`] hash rather than by name.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    /// FNV-1 hash of the member's declared name.
    pub name_hash: u32,
    /// The member's current value.
    pub value: Value,
}

/// A heap-allocated object instance: a set of members laid out according to its [`TypeInfo`].
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    /// The heap slot holding this object's [`TypeInfo`]. Stored (rather than borrowed) so the
    /// collector must trace it like any other child and the type stays alive as long as any
    /// instance references it, even if nothing else roots the type directly.
    pub type_ref: HeapIndex,
    /// Field values in the type's declared order.
    pub members: Vec<Member>,
}

impl Object {
    /// Looks up a member by its FNV-1 name hash (`LOAD_MEM_HASH`/`HAS_MEM_HASH`).
    #[must_use]
    pub fn find(&self, name_hash: u32) -> Option<&Value> {
        self.members
            .iter()
            .find(|m| m.name_hash == name_hash)
            .map(|m| &m.value)
    }

    /// Writes (or inserts) a member by its FNV-1 name hash (`MOV_MEM_HASH`).
    pub fn set(&mut self, name_hash: u32, value: Value) {
        if let Some(member) = self.members.iter_mut().find(|m| m.name_hash == name_hash) {
            member.value = value;
        } else {
            self.members.push(Member { name_hash, value });
        }
    }

    /// Reads a member by its declared field position (`LOAD_MEM`).
    ///
    /// # Errors
    /// Returns [`ExceptionKind::IndexOutOfBounds`] if `index >= type.size`.
    pub fn get_by_index(&self, index: u8) -> Result<Value, ExceptionKind> {
        self.members.get(index as usize).map(|m| m.value).ok_or(ExceptionKind::IndexOutOfBounds)
    }

    /// Writes a member by its declared field position (`MOV_MEM`).
    ///
    /// # Errors
    /// Returns [`ExceptionKind::IndexOutOfBounds`] if `index >= type.size`.
    pub fn set_by_index(&mut self, index: u8, value: Value) -> Result<(), ExceptionKind> {
        let member = self.members.get_mut(index as usize).ok_or(ExceptionKind::IndexOutOfBounds)?;
        member.value = value;
        Ok(())
    }
}

/// A heap-allocated array. Indexing is checked; out-of-range access raises
/// [`ExceptionKind::IndexOutOfBounds`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Array {
    /// Elements in order.
    pub items: Vec<Value>,
}

impl Array {
    /// Resolves a possibly-negative logical index to a real slot index, wrapping a negative
    /// index around the array length exactly once (`arr[-1]` is the last element; `arr[-len-1]`
    /// is still out of range rather than wrapping again).
    fn resolve(&self, index: i64) -> Result<usize, ExceptionKind> {
        let len = self.items.len() as i64;
        let wrapped = if index < 0 { index + len } else { index };
        usize::try_from(wrapped).ok().filter(|&i| i < self.items.len()).ok_or(ExceptionKind::IndexOutOfBounds)
    }

    /// Bounds-checked, wraparound-aware element access for `LOAD_ARRAYIDX`.
    ///
    /// # Errors
    /// Returns [`ExceptionKind::IndexOutOfBounds`] if still out of range after wrapping.
    pub fn get(&self, index: i64) -> Result<Value, ExceptionKind> {
        self.resolve(index).map(|i| self.items[i])
    }

    /// Bounds-checked, wraparound-aware element write for `MOV_ARRAYIDX`.
    ///
    /// # Errors
    /// Returns [`ExceptionKind::IndexOutOfBounds`] if still out of range after wrapping.
    pub fn set(&mut self, index: i64, value: Value) -> Result<(), ExceptionKind> {
        let i = self.resolve(index)?;
        self.items[i] = value;
        Ok(())
    }
}

/// A type descriptor produced by `STORE_STATIC_TYPE`/`NEW`: the ordered field names a fresh
/// [`Object`] of this type is initialized with.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeInfo {
    /// The type's declared name, as it appears in diagnostics and `to_repr`.
    pub name: String,
    /// Field names in declaration order. `NEW` allocates one [`Member`] per entry, each
    /// initialized to `Value::HeapPointer(None)`, hashed with [`crate::hash::fnv1`].
    pub member_names: Vec<String>,
}

/// A dynamically-loaded native library handle (§6.4), kept on the heap like any other
/// reference-counted resource so it is unloaded once unreachable.
pub struct NativeLibrary {
    /// Path (or platform-resolved name) the library was loaded from, kept for diagnostics.
    pub path: String,
    pub(crate) library: libloading::Library,
}

impl std::fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeLibrary").field("path", &self.path).finish_non_exhaustive()
    }
}

impl PartialEq for NativeLibrary {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && std::ptr::eq(&self.library, &other.library)
    }
}

/// Any value the heap can own, addressed through a [`HeapIndex`].
#[derive(Debug, PartialEq)]
#[non_exhaustive]
pub enum HeapValue {
    /// An owned UTF-8 string, e.g. from `STORE_STATIC_STRING`/`LOAD_STRING` or concatenation.
    Str(String),
    /// A resizable array of [`Value`].
    Array(Array),
    /// An object instance.
    Object(Object),
    /// A type descriptor.
    TypeInfo(TypeInfo),
    /// A loaded native library.
    NativeLibrary(NativeLibrary),
}

struct Slot {
    value: Option<HeapValue>,
    generation: u32,
    marked: bool,
}

/// The VM's managed heap: a generational-index slab of [`HeapValue`]s, collected by
/// mark-and-sweep (§4.7) whenever live occupancy crosses a soft threshold that doubles (up to
/// a hard ceiling) when a collection fails to bring occupancy back under it.
#[derive(Debug)]
pub struct Heap {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    live_count: usize,
    /// Soft threshold: a collection is attempted once `live_count` reaches this.
    max_objects: usize,
    /// Hard ceiling `max_objects` is allowed to grow to before `HeapOverflow` is raised.
    hard_ceiling: usize,
}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot")
            .field("occupied", &self.value.is_some())
            .field("generation", &self.generation)
            .field("marked", &self.marked)
            .finish()
    }
}

impl Heap {
    /// Creates an empty heap with the given initial soft threshold and hard ceiling.
    #[must_use]
    pub fn new(max_objects: usize, hard_ceiling: usize) -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            live_count: 0,
            max_objects,
            hard_ceiling,
        }
    }

    /// Number of live (allocated, not-yet-swept) objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live_count
    }

    /// Whether the heap currently holds no live objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live_count == 0
    }

    /// Whether live occupancy has reached the soft threshold, i.e. a collection should run
    /// before the next allocation.
    #[must_use]
    pub fn needs_collection(&self) -> bool {
        self.live_count >= self.max_objects
    }

    /// Whether `max_objects` has already grown to (or past) the hard ceiling, i.e. a
    /// collection that fails to free enough slots should raise `HeapOverflow` rather than
    /// grow again.
    #[must_use]
    pub fn at_hard_ceiling(&self) -> bool {
        self.max_objects >= self.hard_ceiling
    }

    /// Doubles the soft threshold, capped at the hard ceiling.
    pub fn grow_threshold(&mut self) {
        self.max_objects = (self.max_objects * 2).min(self.hard_ceiling);
    }

    /// Allocates `value` into a free (or fresh) slot, bumping its generation, and returns the
    /// index that now owns it. Does not consult or enforce `max_objects`/`hard_ceiling` —
    /// callers run GC policy (see `VMState::heap_alloc`) before calling this.
    pub fn insert(&mut self, value: HeapValue) -> HeapIndex {
        self.live_count += 1;
        if let Some(slot) = self.free_list.pop() {
            let entry = &mut self.slots[slot as usize];
            entry.value = Some(value);
            entry.generation += 1;
            entry.marked = false;
            HeapIndex {
                slot,
                generation: entry.generation,
            }
        } else {
            let slot = u32::try_from(self.slots.len()).expect("heap slot count exceeds u32");
            self.slots.push(Slot {
                value: Some(value),
                generation: 0,
                marked: false,
            });
            HeapIndex { slot, generation: 0 }
        }
    }

    /// Looks up a heap value by index. Returns `None` for a null/out-of-range/stale
    /// (generation-mismatched) index.
    #[must_use]
    pub fn get(&self, index: HeapIndex) -> Option<&HeapValue> {
        let slot = self.slots.get(index.slot as usize)?;
        (slot.generation == index.generation).then_some(slot.value.as_ref()).flatten()
    }

    /// Mutable lookup; see [`Heap::get`].
    pub fn get_mut(&mut self, index: HeapIndex) -> Option<&mut HeapValue> {
        let slot = self.slots.get_mut(index.slot as usize)?;
        if slot.generation != index.generation {
            return None;
        }
        slot.value.as_mut()
    }

    /// Resets every slot's mark bit ahead of a new mark phase.
    pub fn clear_marks(&mut self) {
        for slot in &mut self.slots {
            slot.marked = false;
        }
    }

    /// Marks `index` live, returning whether it was newly marked (i.e. the caller should
    /// recurse into its children) as opposed to already marked (cycle/shared reference).
    pub fn mark(&mut self, index: HeapIndex) -> bool {
        let Some(slot) = self.slots.get_mut(index.slot as usize) else {
            return false;
        };
        if slot.generation != index.generation || slot.marked {
            return false;
        }
        slot.marked = true;
        true
    }

    /// Returns the direct heap-pointer children of the value at `index`, for the collector to
    /// push onto its mark worklist. Yields nothing for an already-freed or stale index.
    #[must_use]
    pub fn children(&self, index: HeapIndex) -> Vec<HeapIndex> {
        match self.get(index) {
            Some(HeapValue::Array(arr)) => arr.items.iter().filter_map(value_child).collect(),
            Some(HeapValue::Object(obj)) => {
                let mut out: Vec<_> = obj.members.iter().filter_map(|m| value_child(&m.value)).collect();
                out.push(obj.type_ref);
                out
            }
            _ => Vec::new(),
        }
    }

    /// Frees every unmarked slot, returning the number of objects collected.
    pub fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for (slot_idx, slot) in self.slots.iter_mut().enumerate() {
            if slot.value.is_some() && !slot.marked {
                slot.value = None;
                freed += 1;
                self.free_list.push(u32::try_from(slot_idx).expect("slot index exceeds u32"));
            }
        }
        self.live_count -= freed;
        freed
    }
}

fn value_child(value: &Value) -> Option<HeapIndex> {
    match value {
        Value::HeapPointer(Some(idx)) => Some(*idx),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get_round_trips() {
        let mut heap = Heap::new(16, 1024);
        let idx = heap.insert(HeapValue::Str("hi".to_string()));
        assert_eq!(heap.get(idx), Some(&HeapValue::Str("hi".to_string())));
    }

    #[test]
    fn sweeping_unmarked_value_frees_it_and_its_slot_is_reused() {
        let mut heap = Heap::new(16, 1024);
        let idx = heap.insert(HeapValue::Str("gone".to_string()));
        heap.clear_marks();
        assert_eq!(heap.sweep(), 1);
        assert_eq!(heap.get(idx), None);
        assert_eq!(heap.len(), 0);

        let reused = heap.insert(HeapValue::Str("new".to_string()));
        assert_eq!(heap.get(reused), Some(&HeapValue::Str("new".to_string())));
        // the stale index into the freed slot must not alias the new occupant
        assert_eq!(heap.get(idx), None);
    }

    #[test]
    fn marked_value_survives_sweep() {
        let mut heap = Heap::new(16, 1024);
        let idx = heap.insert(HeapValue::Str("kept".to_string()));
        heap.clear_marks();
        heap.mark(idx);
        assert_eq!(heap.sweep(), 0);
        assert_eq!(heap.get(idx), Some(&HeapValue::Str("kept".to_string())));
    }

    #[test]
    fn children_follows_array_elements_and_object_type_ref() {
        let mut heap = Heap::new(16, 1024);
        let inner = heap.insert(HeapValue::Str("leaf".to_string()));
        let arr_idx = heap.insert(HeapValue::Array(Array {
            items: vec![Value::HeapPointer(Some(inner)), Value::I32(1)],
        }));
        let kids = heap.children(arr_idx);
        assert_eq!(kids, vec![inner]);
    }

    #[test]
    fn grow_threshold_is_capped_at_hard_ceiling() {
        let mut heap = Heap::new(10, 15);
        heap.grow_threshold();
        assert_eq!(heap.max_objects, 15);
        heap.grow_threshold();
        assert_eq!(heap.max_objects, 15);
        assert!(heap.at_hard_ceiling());
    }
}
