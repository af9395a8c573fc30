//! Opcode semantics (§4.3 "InstructionHandler"), split by category the way the spec groups
//! them. Each submodule operates through [`Ctx`], a thin borrow of the thread currently being
//! dispatched plus the shared VM state it belongs to.

pub mod arithmetic;
pub mod calls;
pub mod control_flow;
pub mod io;
pub mod loads;
pub mod objects;
pub mod stores;

use ace_vm_interface::ExceptionKind;

use crate::heap::{Heap, HeapIndex, HeapValue};
use crate::registers::RegisterOutOfRange;
use crate::state::VMStateInner;
use crate::thread::{ExecutionThread, ThreadId};
use crate::value::Value;
use crate::error::VmError;

/// A thin view onto the thread being dispatched and the shared state it runs against, handed
/// to every instruction handler function so they don't each need their own parameter list of
/// `&mut VMStateInner` plus a `ThreadId` to look it up with.
pub struct Ctx<'a> {
    /// The VM state this thread belongs to.
    pub state: &'a mut VMStateInner,
    /// The thread currently being dispatched.
    pub thread_id: ThreadId,
}

impl<'a> Ctx<'a> {
    /// Borrows the dispatched thread. Panics only if `thread_id` names a thread that has
    /// already exited and been removed — the dispatcher never calls a handler after that.
    pub(crate) fn thread(&self) -> &ExecutionThread {
        self.state
            .threads
            .get(&self.thread_id)
            .expect("dispatched thread missing from thread table")
    }

    pub(crate) fn thread_mut(&mut self) -> &mut ExecutionThread {
        self.state
            .threads
            .get_mut(&self.thread_id)
            .expect("dispatched thread missing from thread table")
    }

    pub(crate) fn main_thread_mut(&mut self) -> &mut ExecutionThread {
        self.state
            .threads
            .get_mut(&ThreadId::MAIN)
            .expect("main thread missing from thread table")
    }

    /// Reads a register on the dispatched thread.
    ///
    /// # Errors
    /// Returns [`VmError::BadRegister`] if `reg` is out of range — an emitter bug, not a
    /// guest-catchable condition.
    pub fn reg(&self, reg: u8) -> Result<Value, VmError> {
        Ok(self.thread().registers.get(reg).map_err(wrap_reg)?)
    }

    /// Writes a register on the dispatched thread.
    ///
    /// # Errors
    /// See [`Ctx::reg`].
    pub fn set_reg(&mut self, reg: u8, value: Value) -> Result<(), VmError> {
        self.thread_mut().registers.set(reg, value).map_err(wrap_reg)
    }

    /// Latches a guest-catchable exception onto the dispatched thread (§4.6).
    pub fn raise(&mut self, kind: ExceptionKind) {
        self.thread_mut().raise(kind);
    }

    /// Allocates a value onto the heap, running GC policy first (§4.7).
    ///
    /// # Errors
    /// Returns [`ExceptionKind::HeapOverflow`] if the heap can't be grown further.
    pub fn alloc(&mut self, value: HeapValue) -> Result<HeapIndex, ExceptionKind> {
        self.state.heap_alloc(value)
    }

    /// Read-only heap access.
    #[must_use]
    pub fn heap(&self) -> &Heap {
        &self.state.heap
    }
}

fn wrap_reg(e: RegisterOutOfRange) -> VmError {
    VmError::BadRegister(e)
}
