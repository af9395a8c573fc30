//! # Ace VM Stable Interface
//!
//! This crate defines the wire format and native-function ABI shared by the Ace bytecode
//! emitter, any host embedding [`ace_vm`](https://docs.rs/ace_vm), and native-library authors.
//! It intentionally knows nothing about the VM's runtime data model ([`Value`], the heap, the
//! dispatch loop) — only the bytes on the wire and the small set of flags and exception kinds
//! a caller needs to interpret without linking the VM itself.

pub use self::{
    exception::{ExceptionKind, UnhandledExceptionLine},
    opcode::{FunctionFlags, Opcode},
};

mod exception;
mod opcode;
