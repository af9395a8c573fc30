//! The fetch/decode/execute loop (§4.5 "Dispatcher").
//!
//! One [`run_thread`] call is the entire lifetime of one VM thread: it owns that thread's
//! [`BytecodeStream`] cursor locally (never shared, never behind the state lock — see
//! [`crate::state`]'s module doc), reads one opcode byte, takes the process-wide lock for just
//! long enough to decode and execute that single instruction's handler, and repeats until the
//! thread finishes, a host-visible [`VmError`] stops it, or [`VMStateInner::good`] goes false
//! out from under it because some other thread hit one first.
//!
//! Exception propagation (§4.6) is checked once per iteration, before the next opcode is even
//! fetched: if the dispatched thread has a pending exception and is inside a `BEGIN_TRY` scope,
//! the stream unwinds to the nearest enclosing `TryCatchInfo` marker's catch address and the
//! exception is cleared; otherwise — no open try scope — the exception is unhandled and the
//! thread stops, surfaced to its caller as [`VmError::Unhandled`]. For the main thread this is
//! the process's unhandled-exception exit path (§7); for a spawned thread it just ends that
//! thread, same as in the original VM.

use std::sync::Arc;

use ace_vm_interface::Opcode;

use crate::bytecode_stream::BytecodeStream;
use crate::error::VmError;
use crate::instruction_handlers::{arithmetic, calls, control_flow, io, loads, objects, stores, Ctx};
use crate::program::Program;
use crate::state::VMState;
use crate::thread::ThreadId;
use crate::value::Value;

/// Runs `thread_id` to completion against `program`, starting at `start_addr`.
///
/// Returns `Ok(())` if the thread ran off the end of its function (or hit `EXIT`) normally.
/// Returns `Err(VmError::Unhandled(..))` if an exception escaped every enclosing `try` scope —
/// for the main thread, the caller is expected to treat this as the process's exit condition
/// (§7); for a thread spawned by a native, this just ends that thread.
///
/// # Errors
/// See [`VmError`]'s variants: a malformed program (truncated operand, bad static reference,
/// out-of-range register) stops the thread immediately rather than being treated as a
/// guest-catchable [`ExceptionKind`].
pub fn run_thread(
    vm: &Arc<VMState>,
    program: &Arc<Program>,
    thread_id: ThreadId,
    start_addr: u32,
) -> Result<(), VmError> {
    let mut sink = io::Stdout;
    run_thread_with_sink(vm, program, thread_id, start_addr, &mut sink)
}

/// Same as [`run_thread`], but `ECHO`/`ECHO_NEWLINE` write through the given `sink` rather than
/// the process's real standard output — the seam an embedder (or a test) uses to capture a
/// program's output instead of a real process stream.
///
/// # Errors
/// See [`run_thread`].
pub fn run_thread_with_sink(
    vm: &Arc<VMState>,
    program: &Arc<Program>,
    thread_id: ThreadId,
    start_addr: u32,
    sink: &mut dyn io::OutputSink,
) -> Result<(), VmError> {
    let mut stream = program.stream_at(start_addr);

    let result = run(vm, program, thread_id, &mut stream, sink);

    if !thread_id.is_main() {
        let mut inner = vm.lock();
        inner.threads.remove(&thread_id);
    }

    result
}

fn run(
    vm: &Arc<VMState>,
    program: &Arc<Program>,
    thread_id: ThreadId,
    stream: &mut BytecodeStream,
    sink: &mut dyn io::OutputSink,
) -> Result<(), VmError> {
    loop {
        {
            let inner = vm.lock();
            if !inner.good {
                return Ok(());
            }
        }

        if let Some(outcome) = handle_pending_exception(vm, thread_id, stream, sink)? {
            return outcome;
        }

        if stream.eof() {
            return Ok(());
        }

        let raw_opcode = stream.read::<u8>()?;
        let Some(opcode) = Opcode::from_u8(raw_opcode) else {
            tracing::warn!(thread = %thread_id, byte = raw_opcode, "unknown opcode, skipping");
            continue;
        };

        let mut inner = vm.lock();
        let mut ctx = Ctx {
            state: &mut inner,
            thread_id,
        };
        let outcome = dispatch(&mut ctx, opcode, stream, vm, program, sink);
        let finished = ctx.thread().finished;
        drop(inner);

        if outcome.is_err() {
            vm.lock().mark_bad();
            return outcome;
        }

        if finished {
            return Ok(());
        }
    }
}

/// Checks the dispatched thread's latched exception (§4.6): unwinds to the nearest open `try`
/// scope's catch address if one exists, clearing the exception and the frame it unwound
/// through; otherwise reports it as unhandled — writing the required `unhandled exception: ...`
/// line through `sink` (§4.6, §7) before returning the error, so an embedder's `Captured` sink
/// sees it exactly as a real terminal would via `Stdout`. Returns `None` to keep dispatching, or
/// `Some(outcome)` if the thread's loop is done.
fn handle_pending_exception(
    vm: &Arc<VMState>,
    thread_id: ThreadId,
    stream: &mut BytecodeStream,
    sink: &mut dyn io::OutputSink,
) -> Result<Option<Result<(), VmError>>, VmError> {
    let mut inner = vm.lock();
    let Some(thread) = inner.threads.get_mut(&thread_id) else {
        return Ok(Some(Ok(())));
    };
    if !thread.exception.is_pending() {
        return Ok(None);
    }
    if !thread.exception.in_try_scope() {
        let kind = thread.clear_exception().expect("is_pending just checked");
        inner.mark_bad();
        sink.write(&format!("unhandled exception: {kind}\n"));
        return Ok(Some(Err(VmError::Unhandled(kind))));
    }

    // unwind the stack to the nearest TryCatchInfo marker, popping every call/try frame above
    // it along the way (§4.6: an exception raised inside a callee unwinds through its RET).
    loop {
        match thread.stack.pop() {
            Some(Value::TryCatchInfo { catch_address }) => {
                thread.exception.try_counter = thread.exception.try_counter.saturating_sub(1);
                thread.clear_exception();
                stream.seek(catch_address as usize);
                return Ok(None);
            }
            Some(Value::FunctionCall { .. }) => {
                thread.func_depth = thread.func_depth.saturating_sub(1);
            }
            Some(_) => {}
            None => {
                // no marker left to unwind to despite try_counter > 0 — a malformed program.
                let kind = thread.clear_exception().expect("is_pending just checked");
                inner.mark_bad();
                sink.write(&format!("unhandled exception: {kind}\n"));
                return Ok(Some(Err(VmError::Unhandled(kind))));
            }
        }
    }
}

#[allow(clippy::too_many_lines)]
fn dispatch(
    ctx: &mut Ctx,
    opcode: Opcode,
    stream: &mut BytecodeStream,
    vm: &Arc<VMState>,
    program: &Arc<Program>,
    sink: &mut dyn io::OutputSink,
) -> Result<(), VmError> {
    use Opcode::{
        Add, And, BeginTry, Call, Cmp, CmpZ, Div, Echo, EchoNewline, EndTry, Exit, HasMemHash, Je,
        Jg, Jge, Jmp, Jne, LoadAddr, LoadArrayIdx, LoadF32, LoadF64, LoadFalse, LoadFunc, LoadI32,
        LoadI64, LoadIndex, LoadMem, LoadMemHash, LoadNull, LoadOffset, LoadStatic, LoadString,
        LoadTrue, LoadType, Mod, MovArrayIdx, MovIndex, MovMem, MovMemHash, MovOffset, MovReg,
        Mul, Neg, New, NewArray, Nop, Or, Pop, PopN, Push, PushArray, Ret, Shl, Shr,
        StoreStaticAddress, StoreStaticFunction, StoreStaticString, StoreStaticType, Sub, Xor,
    };

    match opcode {
        Nop => Ok(()),
        Exit => {
            ctx.thread_mut().finished = true;
            Ok(())
        }

        StoreStaticString => {
            let literal = stream.read_string_u32_len()?;
            stores::store_static_string(ctx, &literal)?;
            Ok(())
        }
        StoreStaticAddress => {
            let addr = stream.read::<u32>()?;
            stores::store_static_address(ctx, addr);
            Ok(())
        }
        StoreStaticFunction => {
            let addr = stream.read::<u32>()?;
            let nargs = stream.read::<u8>()?;
            let flags = ace_vm_interface::FunctionFlags::from_bits_truncate(stream.read::<u8>()?);
            stores::store_static_function(ctx, addr, nargs, flags);
            Ok(())
        }
        StoreStaticType => {
            let name = stream.read_string_u16_len()?;
            let count = stream.read::<u16>()?;
            let mut members = Vec::with_capacity(count as usize);
            for _ in 0..count {
                members.push(stream.read_string_u16_len()?);
            }
            stores::store_static_type(ctx, name, members)?;
            Ok(())
        }

        LoadI32 => {
            let reg = stream.read::<u8>()?;
            let value = stream.read::<i32>()?;
            loads::load_immediate(ctx, reg, Value::I32(value))
        }
        LoadI64 => {
            let reg = stream.read::<u8>()?;
            let value = stream.read::<i64>()?;
            loads::load_immediate(ctx, reg, Value::I64(value))
        }
        LoadF32 => {
            let reg = stream.read::<u8>()?;
            let value = stream.read::<f32>()?;
            loads::load_immediate(ctx, reg, Value::F32(value))
        }
        LoadF64 => {
            let reg = stream.read::<u8>()?;
            let value = stream.read::<f64>()?;
            loads::load_immediate(ctx, reg, Value::F64(value))
        }
        LoadOffset => {
            let reg = stream.read::<u8>()?;
            let offset = stream.read::<u16>()?;
            loads::load_offset(ctx, reg, offset)
        }
        LoadIndex => {
            let reg = stream.read::<u8>()?;
            let index = stream.read::<u16>()?;
            loads::load_index(ctx, reg, index)
        }
        LoadStatic => {
            let reg = stream.read::<u8>()?;
            let index = stream.read::<u16>()?;
            loads::load_static(ctx, reg, index)
        }
        LoadString => {
            let reg = stream.read::<u8>()?;
            let literal = stream.read_string_u32_len()?;
            loads::load_string(ctx, reg, &literal)
        }
        LoadAddr => {
            let reg = stream.read::<u8>()?;
            let index = stream.read::<u16>()?;
            let value = ctx.state.static_memory.get(index)?;
            loads::load_immediate(ctx, reg, value)
        }
        LoadFunc => {
            let reg = stream.read::<u8>()?;
            let index = stream.read::<u16>()?;
            let value = ctx.state.static_memory.get(index)?;
            loads::load_immediate(ctx, reg, value)
        }
        LoadType => {
            let reg = stream.read::<u8>()?;
            let index = stream.read::<u16>()?;
            let value = ctx.state.static_memory.get(index)?;
            loads::load_immediate(ctx, reg, value)
        }
        LoadNull => {
            let reg = stream.read::<u8>()?;
            loads::load_constant(ctx, reg, Value::HeapPointer(None))
        }
        LoadTrue => {
            let reg = stream.read::<u8>()?;
            loads::load_constant(ctx, reg, Value::Bool(true))
        }
        LoadFalse => {
            let reg = stream.read::<u8>()?;
            loads::load_constant(ctx, reg, Value::Bool(false))
        }
        LoadMem => {
            let dst = stream.read::<u8>()?;
            let src = stream.read::<u8>()?;
            let index = stream.read::<u8>()?;
            loads::load_mem(ctx, dst, src, index)
        }
        LoadMemHash => {
            let dst = stream.read::<u8>()?;
            let src = stream.read::<u8>()?;
            let hash = stream.read::<u32>()?;
            loads::load_mem_hash(ctx, dst, src, hash)
        }
        HasMemHash => {
            let dst = stream.read::<u8>()?;
            let src = stream.read::<u8>()?;
            let hash = stream.read::<u32>()?;
            loads::has_mem_hash(ctx, dst, src, hash)
        }
        LoadArrayIdx => {
            let dst = stream.read::<u8>()?;
            let src = stream.read::<u8>()?;
            let index_reg = stream.read::<u8>()?;
            loads::load_array_idx(ctx, dst, src, index_reg)
        }

        MovOffset => {
            let offset = stream.read::<u16>()?;
            let reg = stream.read::<u8>()?;
            stores::mov_offset(ctx, offset, reg)
        }
        MovIndex => {
            let index = stream.read::<u16>()?;
            let reg = stream.read::<u8>()?;
            stores::mov_index(ctx, index, reg)
        }
        MovMem => {
            let dst = stream.read::<u8>()?;
            let index = stream.read::<u8>()?;
            let src = stream.read::<u8>()?;
            stores::mov_mem(ctx, dst, index, src)
        }
        MovMemHash => {
            let dst = stream.read::<u8>()?;
            let hash = stream.read::<u32>()?;
            let src = stream.read::<u8>()?;
            stores::mov_mem_hash(ctx, dst, hash, src)
        }
        MovArrayIdx => {
            let dst = stream.read::<u8>()?;
            let index = stream.read::<u32>()?;
            let src = stream.read::<u8>()?;
            stores::mov_array_idx(ctx, dst, index, src)
        }
        MovReg => {
            let dst = stream.read::<u8>()?;
            let src = stream.read::<u8>()?;
            stores::mov_reg(ctx, dst, src)
        }

        Push => {
            let reg = stream.read::<u8>()?;
            stores::push(ctx, reg)
        }
        Pop => {
            stores::pop(ctx);
            Ok(())
        }
        PopN => {
            let n = stream.read::<u8>()?;
            stores::pop_n(ctx, n);
            Ok(())
        }
        PushArray => {
            let array_reg = stream.read::<u8>()?;
            let value_reg = stream.read::<u8>()?;
            stores::push_array(ctx, array_reg, value_reg)
        }

        Echo => {
            let reg = stream.read::<u8>()?;
            io::echo(ctx, reg, sink)
        }
        EchoNewline => {
            io::echo_newline(sink);
            Ok(())
        }

        Jmp => {
            let reg = stream.read::<u8>()?;
            control_flow::jmp(ctx, reg, stream)
        }
        Je => {
            let reg = stream.read::<u8>()?;
            control_flow::je(ctx, reg, stream)
        }
        Jne => {
            let reg = stream.read::<u8>()?;
            control_flow::jne(ctx, reg, stream)
        }
        Jg => {
            let reg = stream.read::<u8>()?;
            control_flow::jg(ctx, reg, stream)
        }
        Jge => {
            let reg = stream.read::<u8>()?;
            control_flow::jge(ctx, reg, stream)
        }
        BeginTry => {
            let reg = stream.read::<u8>()?;
            control_flow::begin_try(ctx, reg)
        }
        EndTry => {
            control_flow::end_try(ctx);
            Ok(())
        }

        Call => {
            let reg = stream.read::<u8>()?;
            let nargs = stream.read::<u8>()?;
            calls::call(ctx, reg, nargs, stream, vm, program)
        }
        Ret => calls::ret(ctx, stream),

        New => {
            let dst = stream.read::<u8>()?;
            let src = stream.read::<u8>()?;
            objects::new_object(ctx, dst, src)
        }
        NewArray => {
            let dst = stream.read::<u8>()?;
            let size = stream.read::<u32>()?;
            objects::new_array(ctx, dst, size)
        }

        Cmp => {
            let lhs = stream.read::<u8>()?;
            let rhs = stream.read::<u8>()?;
            arithmetic::cmp(ctx, lhs, rhs)
        }
        CmpZ => {
            let reg = stream.read::<u8>()?;
            arithmetic::cmpz(ctx, reg)
        }
        Neg => {
            let reg = stream.read::<u8>()?;
            arithmetic::neg(ctx, reg)
        }

        Add | Sub | Mul | Div | Mod => {
            let lhs = stream.read::<u8>()?;
            let rhs = stream.read::<u8>()?;
            let dst = stream.read::<u8>()?;
            arithmetic::numeric_binary(ctx, numeric_op(opcode), lhs, rhs, dst)
        }
        And | Or | Xor | Shl | Shr => {
            let lhs = stream.read::<u8>()?;
            let rhs = stream.read::<u8>()?;
            let dst = stream.read::<u8>()?;
            arithmetic::bitwise_binary(ctx, bitwise_op(opcode), lhs, rhs, dst)
        }
    }
}

fn numeric_op(opcode: Opcode) -> arithmetic::NumericOp {
    match opcode {
        Opcode::Add => arithmetic::NumericOp::Add,
        Opcode::Sub => arithmetic::NumericOp::Sub,
        Opcode::Mul => arithmetic::NumericOp::Mul,
        Opcode::Div => arithmetic::NumericOp::Div,
        Opcode::Mod => arithmetic::NumericOp::Mod,
        _ => unreachable!("numeric_op called with a non-numeric opcode"),
    }
}

fn bitwise_op(opcode: Opcode) -> arithmetic::BitwiseOp {
    match opcode {
        Opcode::And => arithmetic::BitwiseOp::And,
        Opcode::Or => arithmetic::BitwiseOp::Or,
        Opcode::Xor => arithmetic::BitwiseOp::Xor,
        Opcode::Shl => arithmetic::BitwiseOp::Shl,
        Opcode::Shr => arithmetic::BitwiseOp::Shr,
        _ => unreachable!("bitwise_op called with a non-bitwise opcode"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction_handlers::io::Captured;
    use crate::program::Program;

    fn assemble(ops: &[u8]) -> Arc<Program> {
        Arc::new(Program::new(ops.to_vec(), 0))
    }

    #[test]
    fn nop_then_exit_finishes_the_thread_cleanly() {
        let vm = Arc::new(VMState::new());
        let program = assemble(&[Opcode::Nop as u8, Opcode::Exit as u8]);
        let result = run_thread(&vm, &program, ThreadId::MAIN, 0);
        assert!(result.is_ok());
    }

    #[test]
    fn echoing_a_loaded_i32_writes_its_decimal_rendering() {
        let vm = Arc::new(VMState::new());
        let mut bytecode = vec![Opcode::LoadI32 as u8, 0];
        bytecode.extend_from_slice(&7i32.to_le_bytes());
        bytecode.push(Opcode::Echo as u8);
        bytecode.push(0);
        bytecode.push(Opcode::Exit as u8);
        let program = assemble(&bytecode);
        let mut stream = program.stream_at(0);
        let mut sink = Captured::default();
        run(&vm, &program, ThreadId::MAIN, &mut stream, &mut sink).unwrap();
        assert_eq!(sink.0, "7");
    }

    #[test]
    fn an_exception_with_no_open_try_scope_is_unhandled() {
        let vm = Arc::new(VMState::new());
        // DIV r0, r1 -> r2, with r0=1 r1=0 (both default-null, so this actually raises
        // TypeError; what matters here is only that *some* exception propagates unhandled).
        let bytecode = vec![Opcode::Div as u8, 0, 1, 2];
        let program = assemble(&bytecode);
        let mut stream = program.stream_at(0);
        let mut sink = Captured::default();
        let result = run(&vm, &program, ThreadId::MAIN, &mut stream, &mut sink);
        let Err(VmError::Unhandled(kind)) = result else {
            panic!("expected an unhandled exception, got {result:?}");
        };
        assert!(!vm.lock().good);
        assert_eq!(sink.0, format!("unhandled exception: {kind}\n"));
    }

    #[test]
    fn an_exception_inside_a_try_scope_jumps_to_the_catch_address() {
        let vm = Arc::new(VMState::new());
        // BEGIN_TRY r0 (r0 holds Address(catch)); DIV r1,r2->r3 raises TypeError (both null);
        // catch: LOAD_I32 r4, #42; EXIT
        let mut bytecode = Vec::new();
        let mut header = Vec::new();
        header.push(Opcode::StoreStaticAddress as u8);
        // catch address is filled in once we know the body's length, so store a placeholder
        // and patch it below.
        let patch_at = header.len();
        header.extend_from_slice(&0u32.to_le_bytes());

        let mut body = Vec::new();
        body.push(Opcode::LoadAddr as u8);
        body.push(0); // r0
        body.extend_from_slice(&0u16.to_le_bytes()); // static index 0
        body.push(Opcode::BeginTry as u8);
        body.push(0);
        body.push(Opcode::Div as u8);
        body.push(1);
        body.push(2);
        body.push(3);
        // if the div exception is (incorrectly) not caught, execution falls through here
        body.push(Opcode::LoadI32 as u8);
        body.push(4);
        body.extend_from_slice(&0i32.to_le_bytes());
        body.push(Opcode::Exit as u8);

        let catch_addr = (header.len() + body.len()) as u32;
        header[patch_at..patch_at + 4].copy_from_slice(&catch_addr.to_le_bytes());

        let mut catch_block = Vec::new();
        catch_block.push(Opcode::LoadI32 as u8);
        catch_block.push(4);
        catch_block.extend_from_slice(&42i32.to_le_bytes());
        catch_block.push(Opcode::Exit as u8);

        bytecode.extend_from_slice(&header);
        bytecode.extend_from_slice(&body);
        bytecode.extend_from_slice(&catch_block);

        let program = assemble(&bytecode);
        let result = run_thread(&vm, &program, ThreadId::MAIN, 0);
        assert!(result.is_ok());
        let inner = vm.lock();
        let reg4 = inner.threads[&ThreadId::MAIN].registers.get(4).unwrap();
        assert_eq!(reg4, Value::I32(42));
    }
}
