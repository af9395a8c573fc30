//! Object/array construction opcodes (§4.3 `NEW`, `NEW_ARRAY`).

use ace_vm_interface::ExceptionKind;

use crate::error::VmError;
use crate::hash::fnv1;
use crate::heap::{Array, HeapValue, Member, Object};
use crate::value::Value;

use super::Ctx;

/// `NEW dst, src`: `src` holds a heap pointer to a `TypeInfo` (as resolved by `LOAD_TYPE`);
/// allocates a fresh instance with one member per declared field, each initialized to null and
/// hashed with [`fnv1`].
pub fn new_object(ctx: &mut Ctx, dst: u8, src: u8) -> Result<(), VmError> {
    let type_value = ctx.reg(src)?;
    let Value::HeapPointer(Some(type_idx)) = type_value else {
        ctx.raise(ExceptionKind::TypeError(format!(
            "cannot construct from '{}', expected a type",
            type_value.type_string()
        )));
        return Ok(());
    };
    let Some(HeapValue::TypeInfo(info)) = ctx.heap().get(type_idx) else {
        ctx.raise(ExceptionKind::TypeError("NEW operand does not reference a type".to_string()));
        return Ok(());
    };
    let members = info
        .member_names
        .iter()
        .map(|name| Member {
            name_hash: fnv1(name.as_bytes()),
            value: Value::HeapPointer(None),
        })
        .collect();
    match ctx.alloc(HeapValue::Object(Object {
        type_ref: type_idx,
        members,
    })) {
        Ok(idx) => ctx.set_reg(dst, Value::HeapPointer(Some(idx))),
        Err(kind) => {
            ctx.raise(kind);
            Ok(())
        }
    }
}

/// `NEW_ARRAY dst, #size`: allocates a fresh array of `size` null elements.
pub fn new_array(ctx: &mut Ctx, dst: u8, size: u32) -> Result<(), VmError> {
    let items = vec![Value::HeapPointer(None); size as usize];
    match ctx.alloc(HeapValue::Array(Array { items })) {
        Ok(idx) => ctx.set_reg(dst, Value::HeapPointer(Some(idx))),
        Err(kind) => {
            ctx.raise(kind);
            Ok(())
        }
    }
}
