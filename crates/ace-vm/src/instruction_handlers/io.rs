//! Output opcodes (§4.3 `ECHO`/`ECHO_NEWLINE`, SPEC_FULL "Output sink").
//!
//! Writes go through [`OutputSink`] rather than directly to `stdout`, so an embedder (or a
//! test) can capture them instead of a real process stream — the same seam the teacher crate's
//! own diagnostics writer uses for its circuit output.

use std::io::Write;

use crate::error::VmError;
use crate::value::Value;

use super::Ctx;

/// Where `ECHO`/`ECHO_NEWLINE` write their rendered output. `Send` so a dispatched thread can
/// hold a boxed sink across the `std::thread::spawn` boundary.
pub trait OutputSink: Send {
    /// Writes a chunk of already-rendered text.
    fn write(&mut self, text: &str);
}

/// Writes to the process's real standard output.
#[derive(Debug, Default)]
pub struct Stdout;

impl OutputSink for Stdout {
    fn write(&mut self, text: &str) {
        let _ = std::io::stdout().write_all(text.as_bytes());
    }
}

/// Captures output in memory, for tests and embedders that don't want a bytecode program's
/// `ECHO`s going to the real terminal.
#[derive(Debug, Default, Clone)]
pub struct Captured(pub String);

impl OutputSink for Captured {
    fn write(&mut self, text: &str) {
        self.0.push_str(text);
    }
}

/// `ECHO reg`: renders `reg` the way [`Value::to_display_string`] does (unquoted strings,
/// recursive array/object rendering) and writes it to `sink`.
pub fn echo(ctx: &mut Ctx, reg: u8, sink: &mut dyn OutputSink) -> Result<(), VmError> {
    let value = ctx.reg(reg)?;
    let text = value.to_display_string(ctx.heap());
    sink.write(&text);
    Ok(())
}

/// `ECHO_NEWLINE` (no operand): writes a single `\n`.
pub fn echo_newline(sink: &mut dyn OutputSink) {
    sink.write("\n");
}
