//! Register-store, stack, and static-memory-producing opcodes (§4.3 `MOV_*`, `PUSH*`/`POP*`,
//! `STORE_STATIC_*`).

use ace_vm_interface::{ExceptionKind, FunctionFlags};

use crate::error::VmError;
use crate::heap::{HeapValue, TypeInfo};
use crate::thread::ThreadId;
use crate::value::Value;

use super::Ctx;

/// `STORE_STATIC_STRING "..."`: heap-allocates the string immediately and appends it to static
/// memory (§6.1) — not a lazy, materialize-on-first-`LOAD_STATIC` scheme.
pub fn store_static_string(ctx: &mut Ctx, literal: &str) -> Result<u16, VmError> {
    let idx = match ctx.alloc(HeapValue::Str(literal.to_string())) {
        Ok(idx) => idx,
        Err(kind) => {
            ctx.raise(kind);
            return Ok(ctx.state.static_memory.len() as u16);
        }
    };
    Ok(ctx.state.store_static(Value::HeapPointer(Some(idx))))
}

/// `STORE_STATIC_ADDRESS #addr`.
pub fn store_static_address(ctx: &mut Ctx, addr: u32) -> u16 {
    ctx.state.store_static(Value::Address(addr))
}

/// `STORE_STATIC_FUNCTION #addr, #nargs, #flags`.
pub fn store_static_function(ctx: &mut Ctx, addr: u32, nargs: u8, flags: FunctionFlags) -> u16 {
    ctx.state.store_static(Value::Function { addr, nargs, flags })
}

/// `STORE_STATIC_TYPE "name" [member names...]`: resolves a [`TypeInfo`] and heap-allocates it
/// immediately, the same as `STORE_STATIC_STRING` does for strings.
pub fn store_static_type(ctx: &mut Ctx, name: String, member_names: Vec<String>) -> Result<u16, VmError> {
    let idx = match ctx.alloc(HeapValue::TypeInfo(TypeInfo { name, member_names })) {
        Ok(idx) => idx,
        Err(kind) => {
            ctx.raise(kind);
            return Ok(ctx.state.static_memory.len() as u16);
        }
    };
    Ok(ctx.state.store_static(Value::HeapPointer(Some(idx))))
}

/// `MOV_OFFSET #k, reg`: writes `stack[sp - k]` on the dispatched thread's own stack. Note the
/// operand order — offset before register — is reversed from `LOAD_OFFSET`.
pub fn mov_offset(ctx: &mut Ctx, offset: u16, reg: u8) -> Result<(), VmError> {
    let value = ctx.reg(reg)?;
    match ctx.thread_mut().stack.store_offset(offset, value) {
        Ok(()) => Ok(()),
        Err(kind) => {
            ctx.raise(kind);
            Ok(())
        }
    }
}

/// `MOV_INDEX #k, reg`: writes absolute slot `k` of the *main* thread's stack, regardless of
/// which thread is dispatching (§4.8) — the same cross-thread sharing mechanism as
/// `LOAD_INDEX`.
pub fn mov_index(ctx: &mut Ctx, index: u16, reg: u8) -> Result<(), VmError> {
    let value = ctx.reg(reg)?;
    let Some(main) = ctx.state.threads.get_mut(&ThreadId::MAIN) else {
        return Err(VmError::UnknownThread(ThreadId::MAIN));
    };
    match main.stack.store_index(index, value) {
        Ok(()) => Ok(()),
        Err(kind) => {
            ctx.raise(kind);
            Ok(())
        }
    }
}

/// `MOV_MEM dst, #index, src`: writes object member `index` by declared field position.
pub fn mov_mem(ctx: &mut Ctx, dst: u8, index: u8, src: u8) -> Result<(), VmError> {
    let value = ctx.reg(src)?;
    let object = ctx.reg(dst)?;
    let Value::HeapPointer(Some(idx)) = object else {
        ctx.raise(if matches!(object, Value::HeapPointer(None)) {
            ExceptionKind::NullReference
        } else {
            ExceptionKind::NotAnObject
        });
        return Ok(());
    };
    match ctx.state.heap.get_mut(idx) {
        Some(HeapValue::Object(obj)) => {
            if let Err(kind) = obj.set_by_index(index, value) {
                ctx.raise(kind);
            }
        }
        _ => ctx.raise(ExceptionKind::NotAnObject),
    }
    Ok(())
}

/// `MOV_MEM_HASH dst, #hash, src`: writes (or inserts) object member `hash` by FNV-1 name hash.
pub fn mov_mem_hash(ctx: &mut Ctx, dst: u8, hash: u32, src: u8) -> Result<(), VmError> {
    let value = ctx.reg(src)?;
    let object = ctx.reg(dst)?;
    let Value::HeapPointer(Some(idx)) = object else {
        ctx.raise(if matches!(object, Value::HeapPointer(None)) {
            ExceptionKind::NullReference
        } else {
            ExceptionKind::NotAnObject
        });
        return Ok(());
    };
    match ctx.state.heap.get_mut(idx) {
        Some(HeapValue::Object(obj)) => obj.set(hash, value),
        _ => ctx.raise(ExceptionKind::NotAnObject),
    }
    Ok(())
}

/// `MOV_ARRAYIDX dst, #index, src`: writes array element `index`, an *immediate* — unlike
/// `LOAD_ARRAYIDX`'s register operand, this is a genuine asymmetry in the instruction set, not
/// an oversight (see design notes). Still supports the same negative-wraparound-once rule.
pub fn mov_array_idx(ctx: &mut Ctx, dst: u8, index: u32, src: u8) -> Result<(), VmError> {
    let value = ctx.reg(src)?;
    let array = ctx.reg(dst)?;
    let Value::HeapPointer(Some(idx)) = array else {
        ctx.raise(ExceptionKind::NotAnArray);
        return Ok(());
    };
    match ctx.state.heap.get_mut(idx) {
        Some(HeapValue::Array(arr)) => {
            if let Err(kind) = arr.set(i64::from(index), value) {
                ctx.raise(kind);
            }
        }
        _ => ctx.raise(ExceptionKind::NotAnArray),
    }
    Ok(())
}

/// `MOV_REG dst, src`.
pub fn mov_reg(ctx: &mut Ctx, dst: u8, src: u8) -> Result<(), VmError> {
    let value = ctx.reg(src)?;
    ctx.set_reg(dst, value)
}

/// `PUSH reg`.
pub fn push(ctx: &mut Ctx, reg: u8) -> Result<(), VmError> {
    let value = ctx.reg(reg)?;
    Ok(ctx.thread_mut().stack.push(value)?)
}

/// `POP` (no operand): discards the top of stack, if any.
pub fn pop(ctx: &mut Ctx) {
    ctx.thread_mut().stack.pop();
}

/// `POP_N #n`: discards the top `n` values.
pub fn pop_n(ctx: &mut Ctx, n: u8) {
    ctx.thread_mut().stack.pop_n(n as usize);
}

/// `PUSH_ARRAY array_reg, value_reg`: appends `value_reg`'s value onto the array `array_reg`
/// points to.
pub fn push_array(ctx: &mut Ctx, array_reg: u8, value_reg: u8) -> Result<(), VmError> {
    let value = ctx.reg(value_reg)?;
    let array = ctx.reg(array_reg)?;
    let Value::HeapPointer(Some(idx)) = array else {
        ctx.raise(ExceptionKind::NotAnArray);
        return Ok(());
    };
    match ctx.state.heap.get_mut(idx) {
        Some(HeapValue::Array(arr)) => arr.items.push(value),
        _ => ctx.raise(ExceptionKind::NotAnArray),
    }
    Ok(())
}
