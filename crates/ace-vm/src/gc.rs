//! Mark-and-sweep collection (§4.7 "Garbage collection").
//!
//! Roots are every register and every stack slot of every live thread, plus every slot of
//! static memory — a `STORE_STATIC_STRING` literal has no thread touching it until some
//! `LOAD_STATIC` runs, but it must survive every collection in between. Marking is iterative
//! (a worklist, not recursion) so a deeply nested array-of-arrays can't blow the collector's
//! own stack the way a naive recursive marker would.

use std::collections::HashMap;

use crate::heap::Heap;
use crate::static_memory::StaticMemory;
use crate::thread::{ExecutionThread, ThreadId};
use crate::value::Value;

/// Runs one full mark-and-sweep pass: marks everything reachable from `threads`' registers and
/// stacks and from `static_memory`, then sweeps every unmarked heap slot. Returns the number of
/// objects freed.
pub fn collect(
    heap: &mut Heap,
    threads: &HashMap<ThreadId, ExecutionThread>,
    static_memory: &StaticMemory,
) -> usize {
    heap.clear_marks();

    let mut worklist = Vec::new();
    for thread in threads.values() {
        collect_roots(thread, &mut worklist);
    }
    for value in static_memory.iter() {
        if let Value::HeapPointer(Some(ptr)) = value {
            worklist.push(*ptr);
        }
    }

    while let Some(idx) = worklist.pop() {
        if heap.mark(idx) {
            worklist.extend(heap.children(idx));
        }
    }

    heap.sweep()
}

fn collect_roots(thread: &ExecutionThread, worklist: &mut Vec<crate::heap::HeapIndex>) {
    for reg_idx in 0..crate::registers::REGISTER_COUNT as u8 {
        if let Ok(Value::HeapPointer(Some(ptr))) = thread.registers.get(reg_idx) {
            worklist.push(ptr);
        }
    }
    for depth in 0..thread.stack.len() {
        // `load_index` addresses by absolute slot, which is exactly what a root scan needs.
        if let Ok(Value::HeapPointer(Some(ptr))) = thread.stack.load_index(depth as u16) {
            worklist.push(ptr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HeapValue;
    use crate::thread::ThreadId;

    #[test]
    fn unrooted_object_is_collected() {
        let mut heap = Heap::new(16, 1024);
        heap.insert(HeapValue::Str("garbage".to_string()));
        let threads = HashMap::from([(ThreadId::MAIN, ExecutionThread::new(ThreadId::MAIN))]);
        assert_eq!(collect(&mut heap, &threads, &StaticMemory::new()), 1);
        assert_eq!(heap.len(), 0);
    }

    #[test]
    fn object_referenced_by_a_register_survives() {
        let mut heap = Heap::new(16, 1024);
        let idx = heap.insert(HeapValue::Str("kept".to_string()));
        let mut thread = ExecutionThread::new(ThreadId::MAIN);
        thread.registers.set(0, Value::HeapPointer(Some(idx))).unwrap();
        let threads = HashMap::from([(ThreadId::MAIN, thread)]);
        assert_eq!(collect(&mut heap, &threads, &StaticMemory::new()), 0);
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn object_referenced_only_by_the_stack_survives() {
        let mut heap = Heap::new(16, 1024);
        let idx = heap.insert(HeapValue::Str("kept".to_string()));
        let mut thread = ExecutionThread::new(ThreadId::MAIN);
        thread.stack.push(Value::HeapPointer(Some(idx))).unwrap();
        let threads = HashMap::from([(ThreadId::MAIN, thread)]);
        assert_eq!(collect(&mut heap, &threads, &StaticMemory::new()), 0);
    }

    #[test]
    fn transitively_reachable_array_element_survives() {
        let mut heap = Heap::new(16, 1024);
        let leaf = heap.insert(HeapValue::Str("leaf".to_string()));
        let arr = heap.insert(HeapValue::Array(crate::heap::Array {
            items: vec![Value::HeapPointer(Some(leaf))],
        }));
        let mut thread = ExecutionThread::new(ThreadId::MAIN);
        thread.registers.set(0, Value::HeapPointer(Some(arr))).unwrap();
        let threads = HashMap::from([(ThreadId::MAIN, thread)]);
        assert_eq!(collect(&mut heap, &threads, &StaticMemory::new()), 0);
        assert_eq!(heap.len(), 2);
    }

    #[test]
    fn object_referenced_only_by_static_memory_survives() {
        let mut heap = Heap::new(16, 1024);
        let idx = heap.insert(HeapValue::Str("kept".to_string()));
        let mut statics = StaticMemory::new();
        statics.push(Value::HeapPointer(Some(idx)));
        let threads = HashMap::from([(ThreadId::MAIN, ExecutionThread::new(ThreadId::MAIN))]);
        assert_eq!(collect(&mut heap, &threads, &statics), 0);
        assert_eq!(heap.len(), 1);
    }
}
