//! Register-load opcodes (§4.3 `LOAD_*`): everything that reads a value into a register from
//! an immediate, static memory, the stack, or a heap-resident array/object.

use ace_vm_interface::ExceptionKind;

use crate::error::VmError;
use crate::heap::HeapValue;
use crate::thread::ThreadId;
use crate::value::Value;

use super::Ctx;

/// `LOAD_I32`/`LOAD_I64`/`LOAD_F32`/`LOAD_F64 reg, #imm`: loads a literal straight into `reg`.
pub fn load_immediate(ctx: &mut Ctx, reg: u8, value: Value) -> Result<(), VmError> {
    ctx.set_reg(reg, value)
}

/// `LOAD_NULL`/`LOAD_TRUE`/`LOAD_FALSE reg`.
pub fn load_constant(ctx: &mut Ctx, reg: u8, value: Value) -> Result<(), VmError> {
    ctx.set_reg(reg, value)
}

/// `LOAD_OFFSET reg, #k`: reads `stack[sp - k]` on the *dispatched* thread's own stack.
pub fn load_offset(ctx: &mut Ctx, reg: u8, offset: u16) -> Result<(), VmError> {
    match ctx.thread().stack.load_offset(offset) {
        Ok(value) => ctx.set_reg(reg, value),
        Err(kind) => {
            ctx.raise(kind);
            Ok(())
        }
    }
}

/// `LOAD_INDEX reg, #k`: reads absolute slot `k` of the *main* thread's stack, regardless of
/// which thread is dispatching — this is the cross-thread value-sharing mechanism (§4.8).
pub fn load_index(ctx: &mut Ctx, reg: u8, index: u16) -> Result<(), VmError> {
    let Some(main) = ctx.state.threads.get(&ThreadId::MAIN) else {
        return Err(VmError::UnknownThread(ThreadId::MAIN));
    };
    match main.stack.load_index(index) {
        Ok(value) => ctx.set_reg(reg, value),
        Err(kind) => {
            ctx.raise(kind);
            Ok(())
        }
    }
}

/// `LOAD_STATIC reg, #k`: reads a `STORE_STATIC_*`-populated slot by index.
///
/// # Errors
/// Returns [`VmError::BadStaticReference`] if `k` was never populated — a malformed program,
/// not a guest-catchable condition.
pub fn load_static(ctx: &mut Ctx, reg: u8, index: u16) -> Result<(), VmError> {
    let value = ctx.state.static_memory.get(index)?;
    ctx.set_reg(reg, value)
}

/// `LOAD_STRING reg, "..."`: heap-allocates the inlined string literal directly, independent of
/// static memory (§4.3: distinct from `LOAD_STATIC`, so repeated execution of a `LOAD_STRING`
/// inside a loop allocates a fresh string each time, exactly as `STORE_STATIC_STRING` followed
/// by `LOAD_STATIC` would not).
pub fn load_string(ctx: &mut Ctx, reg: u8, literal: &str) -> Result<(), VmError> {
    match ctx.alloc(HeapValue::Str(literal.to_string())) {
        Ok(idx) => ctx.set_reg(reg, Value::HeapPointer(Some(idx))),
        Err(kind) => {
            ctx.raise(kind);
            Ok(())
        }
    }
}

/// `LOAD_MEM dst, src, #index`: reads object member `index` by declared field position.
pub fn load_mem(ctx: &mut Ctx, dst: u8, src: u8, index: u8) -> Result<(), VmError> {
    let Some(value) = field_by_index(ctx, src, index)? else {
        return Ok(());
    };
    ctx.set_reg(dst, value)
}

/// `LOAD_MEM_HASH dst, src, #hash`: reads object member `hash` by FNV-1 name hash.
pub fn load_mem_hash(ctx: &mut Ctx, dst: u8, src: u8, hash: u32) -> Result<(), VmError> {
    let Some(value) = field_by_hash(ctx, src, hash)? else {
        return Ok(());
    };
    ctx.set_reg(dst, value)
}

/// `HAS_MEM_HASH dst, src, #hash`: `dst` becomes `Bool(true)`/`Bool(false)` for whether `src`
/// has a member named by that hash. Unlike `LOAD_MEM_HASH`, never raises `MemberNotFound` — a
/// missing member is a normal, non-exceptional result (§4.3).
pub fn has_mem_hash(ctx: &mut Ctx, dst: u8, src: u8, hash: u32) -> Result<(), VmError> {
    let object = ctx.reg(src)?;
    let found = match object {
        Value::HeapPointer(Some(idx)) => matches!(
            ctx.heap().get(idx),
            Some(HeapValue::Object(obj)) if obj.find(hash).is_some()
        ),
        _ => false,
    };
    ctx.set_reg(dst, Value::Bool(found))
}

/// `LOAD_ARRAYIDX dst, src, index_reg`: reads array element `index_reg` (itself a register
/// holding an integer), wrapping a negative index around the array length exactly once. A
/// string-typed index is a distinct, reserved-but-unimplemented case (`NotImplemented`), not
/// folded into the generic `BadIndexType` for every other non-integer operand.
pub fn load_array_idx(ctx: &mut Ctx, dst: u8, src: u8, index_reg: u8) -> Result<(), VmError> {
    let array = ctx.reg(src)?;
    let index_value = ctx.reg(index_reg)?;
    let index = match index_value.get_integer() {
        Some(index) => index,
        None if is_string(ctx, &index_value) => {
            ctx.raise(ExceptionKind::NotImplemented("string array index".to_string()));
            return Ok(());
        }
        None => {
            ctx.raise(ExceptionKind::BadIndexType);
            return Ok(());
        }
    };
    let Value::HeapPointer(array_ptr) = array else {
        ctx.raise(ExceptionKind::NotAnArray);
        return Ok(());
    };
    let Some(idx) = array_ptr else {
        ctx.raise(ExceptionKind::NullReference);
        return Ok(());
    };
    let Some(HeapValue::Array(arr)) = ctx.heap().get(idx) else {
        ctx.raise(ExceptionKind::NotAnArray);
        return Ok(());
    };
    match arr.get(index) {
        Ok(value) => ctx.set_reg(dst, value),
        Err(kind) => {
            ctx.raise(kind);
            Ok(())
        }
    }
}

fn is_string(ctx: &Ctx, value: &Value) -> bool {
    matches!(value, Value::HeapPointer(Some(idx)) if matches!(ctx.heap().get(*idx), Some(HeapValue::Str(_))))
}

fn field_by_index(ctx: &mut Ctx, src: u8, index: u8) -> Result<Option<Value>, VmError> {
    let object = ctx.reg(src)?;
    let Value::HeapPointer(Some(idx)) = object else {
        ctx.raise(if matches!(object, Value::HeapPointer(None)) {
            ExceptionKind::NullReference
        } else {
            ExceptionKind::NotAnObject
        });
        return Ok(None);
    };
    match ctx.heap().get(idx) {
        Some(HeapValue::Object(obj)) => match obj.get_by_index(index) {
            Ok(value) => Ok(Some(value)),
            Err(kind) => {
                ctx.raise(kind);
                Ok(None)
            }
        },
        _ => {
            ctx.raise(ExceptionKind::NotAnObject);
            Ok(None)
        }
    }
}

fn field_by_hash(ctx: &mut Ctx, src: u8, hash: u32) -> Result<Option<Value>, VmError> {
    let object = ctx.reg(src)?;
    let Value::HeapPointer(Some(idx)) = object else {
        ctx.raise(if matches!(object, Value::HeapPointer(None)) {
            ExceptionKind::NullReference
        } else {
            ExceptionKind::NotAnObject
        });
        return Ok(None);
    };
    match ctx.heap().get(idx) {
        Some(HeapValue::Object(obj)) => match obj.find(hash) {
            Some(value) => Ok(Some(*value)),
            None => {
                ctx.raise(ExceptionKind::MemberNotFound);
                Ok(None)
            }
        },
        _ => {
            ctx.raise(ExceptionKind::NotAnObject);
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{Array, Member, Object};
    use crate::state::VMState;

    fn ctx_with(state: &mut crate::state::VMStateInner) -> Ctx<'_> {
        Ctx {
            state,
            thread_id: ThreadId::MAIN,
        }
    }

    #[test]
    fn load_index_always_reads_the_main_threads_stack() {
        let vm = VMState::new();
        let mut inner = vm.lock();
        inner.threads.get_mut(&ThreadId::MAIN).unwrap().stack.push(Value::I32(42)).unwrap();
        let other = inner.register_thread(64);
        let mut ctx = Ctx { state: &mut inner, thread_id: other };
        load_index(&mut ctx, 0, 0).unwrap();
        assert_eq!(ctx.reg(0).unwrap(), Value::I32(42));
    }

    #[test]
    fn load_array_idx_wraps_a_negative_index_once() {
        let vm = VMState::new();
        let mut inner = vm.lock();
        let idx = inner.heap.insert(HeapValue::Array(Array {
            items: vec![Value::I32(10), Value::I32(20), Value::I32(30)],
        }));
        let mut ctx = ctx_with(&mut inner);
        ctx.set_reg(0, Value::HeapPointer(Some(idx))).unwrap();
        ctx.set_reg(1, Value::I32(-1)).unwrap();
        load_array_idx(&mut ctx, 2, 0, 1).unwrap();
        assert_eq!(ctx.reg(2).unwrap(), Value::I32(30));
    }

    #[test]
    fn load_array_idx_on_a_null_reference_raises_null_reference_not_not_an_array() {
        let vm = VMState::new();
        let mut inner = vm.lock();
        let mut ctx = ctx_with(&mut inner);
        ctx.set_reg(0, Value::HeapPointer(None)).unwrap();
        ctx.set_reg(1, Value::I32(0)).unwrap();
        load_array_idx(&mut ctx, 2, 0, 1).unwrap();
        assert_eq!(ctx.thread().exception.exception_occurred, Some(ExceptionKind::NullReference));
    }

    #[test]
    fn load_array_idx_with_a_string_index_raises_not_implemented() {
        let vm = VMState::new();
        let mut inner = vm.lock();
        let arr_idx = inner.heap.insert(HeapValue::Array(Array {
            items: vec![Value::I32(1)],
        }));
        let str_idx = inner.heap.insert(HeapValue::Str("0".into()));
        let mut ctx = ctx_with(&mut inner);
        ctx.set_reg(0, Value::HeapPointer(Some(arr_idx))).unwrap();
        ctx.set_reg(1, Value::HeapPointer(Some(str_idx))).unwrap();
        load_array_idx(&mut ctx, 2, 0, 1).unwrap();
        assert!(matches!(
            ctx.thread().exception.exception_occurred,
            Some(ExceptionKind::NotImplemented(_))
        ));
    }

    #[test]
    fn load_mem_hash_on_a_null_reference_raises_null_reference() {
        let vm = VMState::new();
        let mut inner = vm.lock();
        let mut ctx = ctx_with(&mut inner);
        ctx.set_reg(0, Value::HeapPointer(None)).unwrap();
        load_mem_hash(&mut ctx, 1, 0, 0x1234).unwrap();
        assert_eq!(ctx.thread().exception.exception_occurred, Some(ExceptionKind::NullReference));
    }

    #[test]
    fn has_mem_hash_never_raises_for_a_missing_member() {
        let vm = VMState::new();
        let mut inner = vm.lock();
        let type_idx = inner.heap.insert(HeapValue::TypeInfo(crate::heap::TypeInfo {
            name: "T".into(),
            member_names: vec![],
        }));
        let obj_idx = inner.heap.insert(HeapValue::Object(Object {
            type_ref: type_idx,
            members: vec![Member { name_hash: 1, value: Value::I32(1) }],
        }));
        let mut ctx = ctx_with(&mut inner);
        ctx.set_reg(0, Value::HeapPointer(Some(obj_idx))).unwrap();
        has_mem_hash(&mut ctx, 1, 0, 0xdead).unwrap();
        assert_eq!(ctx.reg(1).unwrap(), Value::Bool(false));
        assert!(!ctx.thread().exception.is_pending());
    }
}
