//! Host/embedding-facing errors (§7 "External interfaces", SPEC_FULL error-handling section).
//!
//! [`ExceptionKind`](ace_vm_interface::ExceptionKind) is the guest-visible, catchable failure
//! a bytecode program can observe and recover from via `BEGIN_TRY`/`END_TRY`. [`VmError`] is
//! the disjoint, host-visible failure a Rust embedder gets back from [`crate::dispatcher`] or
//! [`crate::program`] for conditions no bytecode `TRY` scope could ever have caught — a
//! corrupt program, a stack that overflowed its fixed capacity, or an exception that reached
//! the top of the main thread unhandled.

use ace_vm_interface::ExceptionKind;

use crate::bytecode_stream::{StringReadError, UnexpectedEof};
use crate::stack::StackOverflow;
use crate::static_memory::StaticIndexOutOfRange;

/// A failure that stops the whole VM rather than one thread's bytecode.
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    /// An instruction ran off the end of the bytecode buffer mid-decode.
    #[error("malformed program: {0}")]
    Truncated(#[from] UnexpectedEof),
    /// A length-prefixed string payload was not valid UTF-8.
    #[error("malformed program: {0}")]
    BadStringPayload(#[from] StringReadError),
    /// `LOAD_STATIC` named a static-memory slot that was never populated.
    #[error("malformed program: {0}")]
    BadStaticReference(#[from] StaticIndexOutOfRange),
    /// A thread's stack exceeded its fixed capacity.
    #[error("{0}")]
    StackOverflow(#[from] StackOverflow),
    /// A register index named by an instruction was outside the register file.
    #[error("{0}")]
    BadRegister(#[from] crate::registers::RegisterOutOfRange),
    /// An exception reached the top of the main thread's call stack uncaught (§4.6, §7): the
    /// process exits with status 1 and this is printed to the configured error sink.
    #[error("unhandled exception: {0}")]
    Unhandled(ExceptionKind),
    /// A reference to an unknown thread id, e.g. a stale handle after the thread exited.
    #[error("no such thread: {0}")]
    UnknownThread(crate::thread::ThreadId),
    /// `RET` executed with something other than a `FunctionCall` marker on top of the stack —
    /// only a mismatched `CALL`/`RET` pair (a malformed program) can cause this.
    #[error("RET with no matching CALL: stack top was not a function-call marker")]
    MissingCallMarker,
}
