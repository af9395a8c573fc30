//! The Invoker: `CALL`/`RET` (§4.4 "Invoker — unified call protocol").
//!
//! `CALL target, #nargs` accepts three shapes of `target`, tried in order: a bound native
//! function, a heap object exposing a `"$invoke"` member (uniform call syntax lowers `x.f(..)`
//! to this), or a bytecode `Function`. Arguments are always already pushed on the calling
//! thread's own stack, in declaration order, before `CALL` dispatches.
//!
//! Return values travel through register `r0` rather than the stack — the stack protocol
//! (push args, `CALL`, `RET` leaves one value behind) is reserved for what the *caller* sees;
//! internally, the callee's last act before `RET` is to leave its result in `r0`, and `RET`
//! itself performs the args-for-result stack swap. This keeps `RET`'s precondition ("the top
//! of the stack is a `FunctionCall` marker") literally true and gives every `CALL`, native or
//! not, the same externally observable stack effect: `nargs` arguments in, one result out.

use ace_vm_interface::{ExceptionKind, FunctionFlags};

use crate::bytecode_stream::BytecodeStream;
use crate::error::VmError;
use crate::hash::fnv1;
use crate::heap::{Array, HeapValue};
use crate::natives::NativeContext;
use crate::program::Program;
use crate::state::VMState;
use crate::value::Value;

use std::sync::Arc;

use super::Ctx;

/// Register the VM convention uses to pass a callee's result back to its caller across `RET`.
const RETURN_REGISTER: u8 = 0;

/// `CALL reg, #nargs`: invokes the value in `reg` with the top `nargs` stack slots as arguments.
pub fn call(
    ctx: &mut Ctx,
    reg: u8,
    nargs: u8,
    stream: &mut BytecodeStream,
    vm: &Arc<VMState>,
    program: &Arc<Program>,
) -> Result<(), VmError> {
    let target = ctx.reg(reg)?;
    invoke(ctx, target, nargs, stream, vm, program)
}

fn invoke(
    ctx: &mut Ctx,
    target: Value,
    nargs: u8,
    stream: &mut BytecodeStream,
    vm: &Arc<VMState>,
    program: &Arc<Program>,
) -> Result<(), VmError> {
    match target {
        Value::NativeFunction(ptr) => call_native(ctx, ptr, nargs, vm, program),
        Value::HeapPointer(Some(idx)) => match ctx.heap().get(idx) {
            Some(HeapValue::Object(obj)) => {
                let invoke_hash = fnv1(b"$invoke");
                match obj.find(invoke_hash).copied() {
                    Some(invoke_target) => {
                        insert_self_as_first_arg(ctx, target, nargs)?;
                        invoke(ctx, invoke_target, nargs + 1, stream, vm, program)
                    }
                    None => {
                        ctx.raise(ExceptionKind::NotCallable("object".to_string()));
                        Ok(())
                    }
                }
            }
            _ => {
                ctx.raise(ExceptionKind::NotCallable(target.type_string().to_string()));
                Ok(())
            }
        },
        Value::Function { addr, nargs: declared, flags } => {
            call_function(ctx, addr, declared, flags, nargs, stream)
        }
        other => {
            ctx.raise(ExceptionKind::NotCallable(other.type_string().to_string()));
            Ok(())
        }
    }
}

/// Shifts the top `nargs` stack slots up by one and writes `self_value` into the slot that opens
/// up underneath them, turning `f(args...)` into `f(self, args...)` (UCS, §4.4 step 2).
fn insert_self_as_first_arg(ctx: &mut Ctx, self_value: Value, nargs: u8) -> Result<(), VmError> {
    let thread = ctx.thread_mut();
    let mut args = Vec::with_capacity(nargs as usize);
    for _ in 0..nargs {
        args.push(thread.stack.pop().ok_or(VmError::MissingCallMarker)?);
    }
    args.reverse();
    thread.stack.push(self_value)?;
    for arg in args {
        thread.stack.push(arg)?;
    }
    Ok(())
}

fn call_native(
    ctx: &mut Ctx,
    ptr: crate::natives::NativeFunctionPtr,
    nargs: u8,
    vm: &Arc<VMState>,
    program: &Arc<Program>,
) -> Result<(), VmError> {
    let thread_id = ctx.thread_id;
    let mut args = Vec::with_capacity(nargs as usize);
    for _ in 0..nargs {
        args.push(ctx.thread_mut().stack.pop().ok_or(VmError::MissingCallMarker)?);
    }
    args.reverse();
    let mut native_ctx = NativeContext::new(ctx.state, thread_id, &args, Arc::clone(vm), Arc::clone(program));
    if let Err(kind) = ptr(&mut native_ctx) {
        ctx.raise(kind);
    }
    Ok(())
}

fn call_function(
    ctx: &mut Ctx,
    addr: u32,
    declared: u8,
    flags: FunctionFlags,
    nargs: u8,
    stream: &mut BytecodeStream,
) -> Result<(), VmError> {
    let variadic = flags.contains(FunctionFlags::VARIADIC);
    let arg_slot_count: i32 = if variadic {
        let min_args = declared.saturating_sub(1);
        if nargs < min_args {
            ctx.raise(ExceptionKind::InvalidArgs {
                expected: min_args,
                got: nargs,
                variadic: true,
            });
            return Ok(());
        }
        let extra = nargs - min_args;
        let mut packed = Vec::with_capacity(extra as usize);
        for _ in 0..extra {
            packed.push(ctx.thread_mut().stack.pop().ok_or(VmError::MissingCallMarker)?);
        }
        packed.reverse();
        match ctx.alloc(HeapValue::Array(Array { items: packed })) {
            Ok(idx) => ctx.thread_mut().stack.push(Value::HeapPointer(Some(idx)))?,
            Err(kind) => {
                ctx.raise(kind);
                return Ok(());
            }
        }
        i32::from(declared)
    } else {
        if nargs != declared {
            ctx.raise(ExceptionKind::InvalidArgs {
                expected: declared,
                got: nargs,
                variadic: false,
            });
            return Ok(());
        }
        i32::from(declared)
    };

    let marker = Value::FunctionCall {
        return_addr: stream.position() as u32,
        varargs_push: arg_slot_count,
    };
    ctx.thread_mut().stack.push(marker)?;
    stream.seek(addr as usize);
    ctx.thread_mut().func_depth += 1;
    Ok(())
}

/// `RET` (no operand): unwinds the innermost call frame and hands the caller the value in
/// [`RETURN_REGISTER`].
pub fn ret(ctx: &mut Ctx, stream: &mut BytecodeStream) -> Result<(), VmError> {
    let result = ctx.reg(RETURN_REGISTER)?;
    let thread = ctx.thread_mut();
    let Some(Value::FunctionCall { return_addr, varargs_push }) = thread.stack.pop() else {
        return Err(VmError::MissingCallMarker);
    };
    thread.stack.pop_n(varargs_push.max(0) as usize);
    thread.stack.push(result)?;
    stream.seek(return_addr as usize);
    thread.func_depth = thread.func_depth.saturating_sub(1);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{Member, Object};
    use crate::thread::ThreadId;

    fn ctx_with(state: &mut crate::state::VMStateInner) -> Ctx<'_> {
        Ctx {
            state,
            thread_id: ThreadId::MAIN,
        }
    }

    fn program() -> Arc<Program> {
        Arc::new(Program::new(vec![0u8; 64], 0))
    }

    #[test]
    fn calling_a_non_variadic_function_pushes_a_marker_and_seeks_to_addr() {
        let vm = Arc::new(VMState::new());
        let prog = program();
        let mut inner = vm.lock();
        let mut ctx = ctx_with(&mut inner);
        ctx.set_reg(0, Value::I32(1)).unwrap();
        ctx.set_reg(1, Value::I32(2)).unwrap();
        ctx.thread_mut().stack.push(Value::I32(1)).unwrap();
        ctx.thread_mut().stack.push(Value::I32(2)).unwrap();
        ctx.set_reg(
            2,
            Value::Function {
                addr: 40,
                nargs: 2,
                flags: FunctionFlags::empty(),
            },
        )
        .unwrap();
        let mut stream = BytecodeStream::new(vec![0u8; 64]);
        call(&mut ctx, 2, 2, &mut stream, &vm, &prog).unwrap();
        assert_eq!(stream.position(), 40);
        assert_eq!(ctx.thread().func_depth, 1);
        assert!(matches!(ctx.thread().stack.top(), Some(Value::FunctionCall { .. })));
    }

    #[test]
    fn ret_restores_the_pre_call_depth_plus_one_return_value() {
        let vm = Arc::new(VMState::new());
        let prog = program();
        let mut inner = vm.lock();
        let mut ctx = ctx_with(&mut inner);
        let base_depth = ctx.thread().stack.len();
        ctx.thread_mut().stack.push(Value::I32(10)).unwrap();
        ctx.thread_mut().stack.push(Value::I32(20)).unwrap();
        ctx.set_reg(
            0,
            Value::Function {
                addr: 8,
                nargs: 2,
                flags: FunctionFlags::empty(),
            },
        )
        .unwrap();
        let mut stream = BytecodeStream::new(vec![0u8; 64]);
        stream.seek(4);
        call(&mut ctx, 0, 2, &mut stream, &vm, &prog).unwrap();
        ctx.set_reg(0, Value::I32(99)).unwrap();
        ret(&mut ctx, &mut stream).unwrap();
        assert_eq!(stream.position(), 4);
        assert_eq!(ctx.thread().func_depth, 0);
        assert_eq!(ctx.thread().stack.len(), base_depth + 1);
        assert_eq!(ctx.thread().stack.top(), Some(Value::I32(99)));
    }

    #[test]
    fn variadic_call_packs_the_extra_arguments_into_a_trailing_array() {
        let vm = Arc::new(VMState::new());
        let prog = program();
        let mut inner = vm.lock();
        let mut ctx = ctx_with(&mut inner);
        for v in [1, 2, 3, 4] {
            ctx.thread_mut().stack.push(Value::I32(v)).unwrap();
        }
        ctx.set_reg(
            0,
            Value::Function {
                addr: 8,
                nargs: 2,
                flags: FunctionFlags::VARIADIC,
            },
        )
        .unwrap();
        let mut stream = BytecodeStream::new(vec![0u8; 64]);
        call(&mut ctx, 0, 4, &mut stream, &vm, &prog).unwrap();
        // stack: [.., arg0=1, array, marker]
        assert!(matches!(ctx.thread().stack.top(), Some(Value::FunctionCall { .. })));
        let array_slot = ctx.thread().stack.load_offset(2).unwrap();
        let Value::HeapPointer(Some(idx)) = array_slot else { panic!() };
        let Some(HeapValue::Array(arr)) = ctx.heap().get(idx) else { panic!() };
        assert_eq!(arr.items, vec![Value::I32(2), Value::I32(3), Value::I32(4)]);
    }

    #[test]
    fn invalid_args_raises_without_pushing_a_marker() {
        let vm = Arc::new(VMState::new());
        let prog = program();
        let mut inner = vm.lock();
        let mut ctx = ctx_with(&mut inner);
        ctx.thread_mut().stack.push(Value::I32(1)).unwrap();
        ctx.set_reg(
            0,
            Value::Function {
                addr: 8,
                nargs: 2,
                flags: FunctionFlags::empty(),
            },
        )
        .unwrap();
        let mut stream = BytecodeStream::new(vec![0u8; 64]);
        call(&mut ctx, 0, 1, &mut stream, &vm, &prog).unwrap();
        assert!(matches!(
            ctx.thread().exception.exception_occurred,
            Some(ExceptionKind::InvalidArgs { expected: 2, got: 1, variadic: false })
        ));
        assert!(!matches!(ctx.thread().stack.top(), Some(Value::FunctionCall { .. })));
    }

    #[test]
    fn calling_a_non_callable_value_raises_not_callable() {
        let vm = Arc::new(VMState::new());
        let prog = program();
        let mut inner = vm.lock();
        let mut ctx = ctx_with(&mut inner);
        ctx.set_reg(0, Value::I32(5)).unwrap();
        let mut stream = BytecodeStream::new(vec![0u8; 64]);
        call(&mut ctx, 0, 0, &mut stream, &vm, &prog).unwrap();
        assert!(matches!(ctx.thread().exception.exception_occurred, Some(ExceptionKind::NotCallable(_))));
    }

    #[test]
    fn invoking_an_object_with_dollar_invoke_leaves_the_stack_balanced_after_ret() {
        let vm = Arc::new(VMState::new());
        let prog = program();
        let mut inner = vm.lock();
        let type_idx = inner.heap.insert(HeapValue::TypeInfo(crate::heap::TypeInfo {
            name: "Widget".into(),
            member_names: vec![],
        }));
        let method = Value::Function {
            addr: 16,
            nargs: 2, // (self, x)
            flags: FunctionFlags::empty(),
        };
        let obj_idx = inner.heap.insert(HeapValue::Object(Object {
            type_ref: type_idx,
            members: vec![Member {
                name_hash: fnv1(b"$invoke"),
                value: method,
            }],
        }));
        let mut ctx = ctx_with(&mut inner);
        let base_depth = ctx.thread().stack.len();
        ctx.set_reg(0, Value::HeapPointer(Some(obj_idx))).unwrap();
        ctx.thread_mut().stack.push(Value::I32(7)).unwrap();
        let mut stream = BytecodeStream::new(vec![0u8; 64]);
        stream.seek(4);
        call(&mut ctx, 0, 1, &mut stream, &vm, &prog).unwrap();
        assert_eq!(stream.position(), 16);
        assert!(matches!(ctx.thread().stack.top(), Some(Value::FunctionCall { .. })));

        // RET must reclaim both slots the marker accounts for (self + x), not just x: the
        // UCS-inserted `self` is a real argument slot, and leaving it behind would strand a
        // slot on the stack on every `$invoke` call.
        ctx.set_reg(0, Value::I32(99)).unwrap();
        ret(&mut ctx, &mut stream).unwrap();
        assert_eq!(stream.position(), 4);
        assert_eq!(ctx.thread().stack.len(), base_depth + 1);
        assert_eq!(ctx.thread().stack.top(), Some(Value::I32(99)));
    }
}
