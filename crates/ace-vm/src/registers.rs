//! Per-thread general-purpose registers and the comparison flag (§3 "RegisterFile", §4.3 `CMP`).

use crate::value::Value;

/// Number of general-purpose registers a thread has (§3: `r0`..`r7`).
pub const REGISTER_COUNT: usize = 8;

/// The three-state result of the last `CMP`/`CMPZ`, consumed by `JE`/`JNE`/`JG`/`JGE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompareFlag {
    /// No comparison has run yet on this thread, or the last one could not be evaluated.
    #[default]
    None,
    /// The last comparison's operands were equal.
    Equal,
    /// The last comparison's left operand was greater than its right operand.
    Greater,
}

/// A thread's fixed bank of general-purpose registers plus its comparison flag.
///
/// Registers start out holding the null pointer, matching the original VM's zero-initialized
/// register file.
#[derive(Debug, Clone)]
pub struct RegisterFile {
    slots: [Value; REGISTER_COUNT],
    /// Result of the most recent `CMP`/`CMPZ`.
    pub compare: CompareFlag,
}

/// A register index named by an instruction operand was outside `0..REGISTER_COUNT`.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
#[error("register index {0} out of range (0..{REGISTER_COUNT})")]
pub struct RegisterOutOfRange(pub u8);

impl Default for RegisterFile {
    fn default() -> Self {
        Self {
            slots: [Value::HeapPointer(None); REGISTER_COUNT],
            compare: CompareFlag::None,
        }
    }
}

impl RegisterFile {
    /// A fresh register file with every register null and no pending comparison.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads register `index`.
    ///
    /// # Errors
    /// Returns [`RegisterOutOfRange`] if `index >= REGISTER_COUNT`.
    pub fn get(&self, index: u8) -> Result<Value, RegisterOutOfRange> {
        self.slots
            .get(index as usize)
            .copied()
            .ok_or(RegisterOutOfRange(index))
    }

    /// Writes register `index`.
    ///
    /// # Errors
    /// Returns [`RegisterOutOfRange`] if `index >= REGISTER_COUNT`.
    pub fn set(&mut self, index: u8, value: Value) -> Result<(), RegisterOutOfRange> {
        let slot = self
            .slots
            .get_mut(index as usize)
            .ok_or(RegisterOutOfRange(index))?;
        *slot = value;
        Ok(())
    }
}
