//! Shared VM state and its synchronization (§4.8 "Threading", §9 design notes).
//!
//! A single process-wide [`std::sync::Mutex`] guards the heap, static memory, the thread
//! table, and the "good" flag, and is acquired once per dispatched instruction (not once per
//! thread-lifetime) — the coarse-grained model the original VM uses instead of per-object
//! locking. Static memory is written only by `STORE_STATIC_*` instructions, which in any
//! well-formed program all execute on the main thread before it reaches the `CALL` that could
//! first spawn another thread, but it is still guarded here rather than hoisted out: nothing
//! in the instruction set stops a malformed or adversarial program from interleaving a
//! `STORE_STATIC_*` with another thread's `LOAD_STATIC`, and the lock already has to be taken
//! for every instruction regardless. Each OS thread's
//! [`crate::bytecode_stream::BytecodeStream`] is kept outside this lock: only that thread ever
//! reads or advances it, so the opcode byte is read *before* the lock is taken and only the
//! decoded instruction's execution happens while held.

use std::collections::HashMap;
use std::sync::Mutex;

use ace_vm_interface::ExceptionKind;

use crate::heap::{Heap, HeapValue};
use crate::static_memory::StaticMemory;
use crate::thread::{ExecutionThread, ThreadId};
use crate::value::Value;

/// Initial soft GC threshold (§4.7): collection is attempted once live heap occupancy reaches
/// this many objects.
pub const INITIAL_GC_THRESHOLD: usize = 4_096;

/// Hard ceiling the soft threshold is allowed to grow to before allocation raises
/// `HeapOverflow` instead of growing again.
pub const HARD_HEAP_CEILING: usize = 8_388_608;

/// Everything the process-wide mutex guards.
#[derive(Debug)]
pub struct VMStateInner {
    /// The managed heap.
    pub heap: Heap,
    /// The `STORE_STATIC_*`-populated table `LOAD_STATIC`/`LOAD_STRING`/`LOAD_ADDR`/
    /// `LOAD_FUNC`/`LOAD_TYPE` read from.
    pub static_memory: StaticMemory,
    /// Every live thread, keyed by id.
    pub threads: HashMap<ThreadId, ExecutionThread>,
    /// Cleared the first time any thread's dispatch loop hits an unrecoverable condition
    /// (an unhandled exception at the top level, or a malformed-program decode failure); once
    /// false, every other thread's dispatch loop exits at its next check.
    pub good: bool,
    next_thread_id: u32,
}

impl VMStateInner {
    fn new() -> Self {
        let mut threads = HashMap::new();
        threads.insert(ThreadId::MAIN, ExecutionThread::new(ThreadId::MAIN));
        Self {
            heap: Heap::new(INITIAL_GC_THRESHOLD, HARD_HEAP_CEILING),
            static_memory: StaticMemory::new(),
            threads,
            good: true,
            next_thread_id: 1,
        }
    }

    /// Appends an already-resolved value to static memory, as finishing execution of a
    /// `STORE_STATIC_*` instruction does (the heap allocation for string/type payloads, if
    /// any, has already happened by the time this is called).
    pub fn store_static(&mut self, value: Value) -> u16 {
        self.static_memory.push(value)
    }

    /// Allocates `value` onto the heap, triggering a mark-and-sweep collection first if the
    /// soft threshold has been reached, and growing the threshold (up to the hard ceiling) if
    /// collection didn't free enough to get back under it (§4.7).
    ///
    /// # Errors
    /// Returns [`ExceptionKind::HeapOverflow`] if the heap is still at/above its hard ceiling
    /// after collecting.
    pub fn heap_alloc(&mut self, value: HeapValue) -> Result<crate::heap::HeapIndex, ExceptionKind> {
        if self.heap.needs_collection() {
            crate::gc::collect(&mut self.heap, &self.threads, &self.static_memory);
            if self.heap.needs_collection() {
                if self.heap.at_hard_ceiling() {
                    return Err(ExceptionKind::HeapOverflow);
                }
                self.heap.grow_threshold();
            }
        }
        Ok(self.heap.insert(value))
    }

    /// Registers bookkeeping for a newly spawned thread and returns its id. Does not itself
    /// start an OS thread — see [`crate::natives::NativeContext::spawn_thread`], which owns
    /// the `Arc`s needed to actually launch one.
    pub fn register_thread(&mut self, stack_capacity: usize) -> ThreadId {
        let id = ThreadId(self.next_thread_id);
        self.next_thread_id += 1;
        self.threads
            .insert(id, ExecutionThread::with_stack_capacity(id, stack_capacity));
        id
    }

    /// Marks the VM as no longer good, e.g. after an unhandled exception reaches the top of
    /// the main thread (§4.6, §7).
    pub fn mark_bad(&mut self) {
        self.good = false;
    }
}

/// The full shared state of a running VM: the mutex-guarded [`VMStateInner`] plus nothing
/// else — the program's bytecode and static memory are immutable after load and live in
/// [`crate::program::Program`] instead, shared via `Arc` without needing this lock at all.
#[derive(Debug)]
pub struct VMState {
    inner: Mutex<VMStateInner>,
}

impl Default for VMState {
    fn default() -> Self {
        Self::new()
    }
}

impl VMState {
    /// A fresh VM state with just the main thread registered.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VMStateInner::new()),
        }
    }

    /// Acquires the process-wide lock. Poisoning (a panic while held) is treated as fatal to
    /// the whole VM, matching `good = false` propagating to every thread: recovering the
    /// guard's data anyway would mean running atop possibly-torn invariants.
    pub fn lock(&self) -> std::sync::MutexGuard<'_, VMStateInner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_starts_with_only_the_main_thread() {
        let state = VMState::new();
        let inner = state.lock();
        assert_eq!(inner.threads.len(), 1);
        assert!(inner.threads.contains_key(&ThreadId::MAIN));
        assert!(inner.good);
    }

    #[test]
    fn register_thread_assigns_increasing_non_main_ids() {
        let state = VMState::new();
        let mut inner = state.lock();
        let a = inner.register_thread(1024);
        let b = inner.register_thread(1024);
        assert_ne!(a, ThreadId::MAIN);
        assert_ne!(a, b);
    }

    #[test]
    fn heap_alloc_grows_threshold_rather_than_overflowing_immediately() {
        let state = VMState::new();
        let mut inner = state.lock();
        inner.heap = Heap::new(1, 4);
        inner.heap_alloc(HeapValue::Str("a".into())).unwrap();
        // second allocation crosses the soft threshold with nothing to collect; must grow
        // rather than raise HeapOverflow since we are nowhere near the hard ceiling
        assert!(inner.heap_alloc(HeapValue::Str("b".into())).is_ok());
    }
}
