//! Per-thread execution state (§3 "ExecutionThread", §4.6 "Exceptions").
//!
//! Thread #0 is always the main thread (§4.8 "Threading"): it is the one created when a
//! [`crate::program::Program`] starts, and the VM treats its exit as the whole process's exit.

use ace_vm_interface::ExceptionKind;

use crate::registers::RegisterFile;
use crate::stack::{Stack, DEFAULT_STACK_CAPACITY};

/// Identifies one of a VM's threads. Thread `0` is always the main thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub u32);

impl ThreadId {
    /// The main thread, created when the program starts.
    pub const MAIN: ThreadId = ThreadId(0);

    /// Whether this is the main thread.
    #[must_use]
    pub fn is_main(self) -> bool {
        self == Self::MAIN
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "thread#{}", self.0)
    }
}

/// Try/catch bookkeeping (§4.6): `BEGIN_TRY` increments `try_counter` and pushes a
/// `TryCatchInfo` marker; any exception raised while `try_counter > 0` latches into
/// `exception_occurred` instead of immediately unwinding, and the dispatcher checks the latch
/// once per instruction to decide whether to branch to the nearest catch address.
#[derive(Debug, Clone, Default)]
pub struct ExceptionState {
    /// Number of `BEGIN_TRY` scopes currently open on this thread.
    pub try_counter: u32,
    /// The most recently raised exception that has not yet been caught or propagated past the
    /// program's top level. Latches rather than resets on each instruction so the dispatcher
    /// has a chance to observe it even when the raising instruction itself doesn't jump.
    pub exception_occurred: Option<ExceptionKind>,
}

impl ExceptionState {
    /// Whether an exception is currently pending dispatch.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.exception_occurred.is_some()
    }

    /// Whether this thread is inside at least one `BEGIN_TRY`/`END_TRY` scope.
    #[must_use]
    pub fn in_try_scope(&self) -> bool {
        self.try_counter > 0
    }
}

/// One thread's full execution state: its registers, its stack, and its exception/try
/// bookkeeping. Does *not* hold the thread's bytecode cursor — each OS thread keeps its own
/// [`crate::bytecode_stream::BytecodeStream`] locally, outside the lock that guards this
/// struct, since only that OS thread ever reads or advances it.
#[derive(Debug, Clone)]
pub struct ExecutionThread {
    /// This thread's identifier.
    pub id: ThreadId,
    /// General-purpose registers and comparison flag.
    pub registers: RegisterFile,
    /// Value stack.
    pub stack: Stack,
    /// Try/catch and pending-exception bookkeeping.
    pub exception: ExceptionState,
    /// Call depth, incremented by `CALL` and decremented by `RET`; used to detect the main
    /// thread's outermost `RET` (program exit) versus an ordinary function return.
    pub func_depth: u32,
    /// Whether the thread has run off the end of its function (i.e. exited normally).
    pub finished: bool,
}

impl ExecutionThread {
    /// Creates a fresh thread with a stack of the default capacity and no pending exception.
    #[must_use]
    pub fn new(id: ThreadId) -> Self {
        Self::with_stack_capacity(id, DEFAULT_STACK_CAPACITY)
    }

    /// Creates a fresh thread with an explicit stack capacity, as `spawn_thread` allows a
    /// caller-specified stack size (SPEC_FULL §4).
    #[must_use]
    pub fn with_stack_capacity(id: ThreadId, stack_capacity: usize) -> Self {
        Self {
            id,
            registers: RegisterFile::new(),
            stack: Stack::new(stack_capacity),
            exception: ExceptionState::default(),
            func_depth: 0,
            finished: false,
        }
    }

    /// Latches `kind` as the pending exception, unless one is already pending — the first
    /// exception raised wins, matching the original "latch, don't overwrite" semantics (the
    /// bug noted in the design notes is exactly the case of a second raise clobbering the
    /// first before the dispatcher observes it).
    pub fn raise(&mut self, kind: ExceptionKind) {
        if self.exception.exception_occurred.is_none() {
            self.exception.exception_occurred = Some(kind);
        }
    }

    /// Clears the pending exception, as `END_TRY`/a successful catch-branch does.
    pub fn clear_exception(&mut self) -> Option<ExceptionKind> {
        self.exception.exception_occurred.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_thread_id_is_zero() {
        assert_eq!(ThreadId::MAIN, ThreadId(0));
        assert!(ThreadId::MAIN.is_main());
    }

    #[test]
    fn raise_latches_the_first_exception_not_the_second() {
        let mut thread = ExecutionThread::new(ThreadId::MAIN);
        thread.raise(ExceptionKind::NullReference);
        thread.raise(ExceptionKind::DivisionByZero);
        assert_eq!(
            thread.exception.exception_occurred,
            Some(ExceptionKind::NullReference)
        );
    }

    #[test]
    fn clear_exception_takes_the_latched_value() {
        let mut thread = ExecutionThread::new(ThreadId::MAIN);
        thread.raise(ExceptionKind::DivisionByZero);
        assert_eq!(thread.clear_exception(), Some(ExceptionKind::DivisionByZero));
        assert!(!thread.exception.is_pending());
    }
}
