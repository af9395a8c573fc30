//! Branching and try/catch scope opcodes (§4.3 `JMP`/`JE`/`JNE`/`JG`/`JGE`, `BEGIN_TRY`/
//! `END_TRY`, §4.6 "Exceptions").
//!
//! `JMP` and its conditional variants take a *register* operand holding a `Value::Address`
//! rather than an immediate address baked into the instruction — the same way `CALL` and
//! `BEGIN_TRY` address their targets, so a jump table can be built out of ordinary array/object
//! values instead of only ever jumping to a compile-time-fixed location.

use ace_vm_interface::ExceptionKind;

use crate::bytecode_stream::BytecodeStream;
use crate::error::VmError;
use crate::registers::CompareFlag;
use crate::value::Value;

use super::Ctx;

fn jump_target(ctx: &mut Ctx, reg: u8) -> Result<Option<u32>, VmError> {
    match ctx.reg(reg)? {
        Value::Address(addr) => Ok(Some(addr)),
        other => {
            ctx.raise(ExceptionKind::TypeError(format!(
                "cannot jump to '{}', expected an address",
                other.type_string()
            )));
            Ok(None)
        }
    }
}

/// `JMP reg`: unconditional jump.
pub fn jmp(ctx: &mut Ctx, reg: u8, stream: &mut BytecodeStream) -> Result<(), VmError> {
    if let Some(addr) = jump_target(ctx, reg)? {
        stream.seek(addr as usize);
    }
    Ok(())
}

/// `JE reg`: jumps if the last `CMP`/`CMPZ` found its operands equal.
pub fn je(ctx: &mut Ctx, reg: u8, stream: &mut BytecodeStream) -> Result<(), VmError> {
    jump_if(ctx, reg, stream, |flag| flag == CompareFlag::Equal)
}

/// `JNE reg`: jumps unless the last comparison found its operands equal.
pub fn jne(ctx: &mut Ctx, reg: u8, stream: &mut BytecodeStream) -> Result<(), VmError> {
    jump_if(ctx, reg, stream, |flag| flag != CompareFlag::Equal)
}

/// `JG reg`: jumps if the last comparison's left operand was greater.
pub fn jg(ctx: &mut Ctx, reg: u8, stream: &mut BytecodeStream) -> Result<(), VmError> {
    jump_if(ctx, reg, stream, |flag| flag == CompareFlag::Greater)
}

/// `JGE reg`: jumps if the last comparison's left operand was greater than or equal.
pub fn jge(ctx: &mut Ctx, reg: u8, stream: &mut BytecodeStream) -> Result<(), VmError> {
    jump_if(ctx, reg, stream, |flag| matches!(flag, CompareFlag::Greater | CompareFlag::Equal))
}

fn jump_if(
    ctx: &mut Ctx,
    reg: u8,
    stream: &mut BytecodeStream,
    take: impl FnOnce(CompareFlag) -> bool,
) -> Result<(), VmError> {
    if !take(ctx.thread().registers.compare) {
        // the address register must still be read even when not taken, matching the original
        // decoder reading all of an instruction's fixed operands unconditionally.
        let _ = ctx.reg(reg)?;
        return Ok(());
    }
    if let Some(addr) = jump_target(ctx, reg)? {
        stream.seek(addr as usize);
    }
    Ok(())
}

/// `BEGIN_TRY reg`: opens a try scope, pushing a `TryCatchInfo` marker the way `CALL` pushes a
/// `FunctionCall` marker, and incrementing the thread's nesting counter (§4.6).
pub fn begin_try(ctx: &mut Ctx, reg: u8) -> Result<(), VmError> {
    let Some(catch_address) = jump_target(ctx, reg)? else {
        return Ok(());
    };
    ctx.thread_mut().exception.try_counter += 1;
    ctx.thread_mut().stack.push(Value::TryCatchInfo { catch_address })?;
    Ok(())
}

/// `END_TRY` (no operand): closes the innermost try scope without an exception having fired,
/// popping its marker and decrementing the nesting counter.
pub fn end_try(ctx: &mut Ctx) {
    let thread = ctx.thread_mut();
    if matches!(thread.stack.top(), Some(Value::TryCatchInfo { .. })) {
        thread.stack.pop();
    }
    thread.exception.try_counter = thread.exception.try_counter.saturating_sub(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::VMState;
    use crate::thread::ThreadId;

    fn ctx_with(state: &mut crate::state::VMStateInner) -> Ctx<'_> {
        Ctx {
            state,
            thread_id: ThreadId::MAIN,
        }
    }

    #[test]
    fn jmp_seeks_the_stream_to_the_registers_address() {
        let vm = VMState::new();
        let mut inner = vm.lock();
        let mut ctx = ctx_with(&mut inner);
        ctx.set_reg(0, Value::Address(10)).unwrap();
        let mut stream = BytecodeStream::new(vec![0; 20]);
        jmp(&mut ctx, 0, &mut stream).unwrap();
        assert_eq!(stream.position(), 10);
    }

    #[test]
    fn je_does_not_jump_when_the_last_comparison_was_not_equal() {
        let vm = VMState::new();
        let mut inner = vm.lock();
        let mut ctx = ctx_with(&mut inner);
        ctx.set_reg(0, Value::Address(10)).unwrap();
        ctx.thread_mut().registers.compare = CompareFlag::Greater;
        let mut stream = BytecodeStream::new(vec![0; 20]);
        je(&mut ctx, 0, &mut stream).unwrap();
        assert_eq!(stream.position(), 0);
    }

    #[test]
    fn begin_try_pushes_a_marker_and_increments_try_counter() {
        let vm = VMState::new();
        let mut inner = vm.lock();
        let mut ctx = ctx_with(&mut inner);
        ctx.set_reg(0, Value::Address(99)).unwrap();
        begin_try(&mut ctx, 0).unwrap();
        assert_eq!(ctx.thread().exception.try_counter, 1);
        assert_eq!(ctx.thread().stack.top(), Some(Value::TryCatchInfo { catch_address: 99 }));
        end_try(&mut ctx);
        assert_eq!(ctx.thread().exception.try_counter, 0);
        assert!(ctx.thread().stack.is_empty());
    }
}
