use std::fmt;

/// A single bytecode opcode identifier.
///
/// Numeric values are part of the wire format (§6.1): the emitter and the
/// VM must agree on them bit-exactly. `Opcode as u8` round-trips through
/// [`Opcode::from_u8`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[non_exhaustive]
pub enum Opcode {
    Nop = 0x00,
    StoreStaticString,
    StoreStaticAddress,
    StoreStaticFunction,
    StoreStaticType,
    LoadI32,
    LoadI64,
    LoadF32,
    LoadF64,
    LoadOffset,
    LoadIndex,
    LoadStatic,
    LoadString,
    LoadAddr,
    LoadFunc,
    LoadType,
    LoadMem,
    LoadMemHash,
    LoadArrayIdx,
    LoadNull,
    LoadTrue,
    LoadFalse,
    MovOffset,
    MovIndex,
    MovMem,
    MovMemHash,
    MovArrayIdx,
    MovReg,
    HasMemHash,
    Push,
    Pop,
    PopN,
    PushArray,
    Echo,
    EchoNewline,
    Jmp,
    Je,
    Jne,
    Jg,
    Jge,
    Call,
    Ret,
    BeginTry,
    EndTry,
    New,
    NewArray,
    Cmp,
    CmpZ,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Exit,
}

impl Opcode {
    /// Lowest and highest valid discriminants, used to bounds-check before transmuting.
    const MIN: u8 = Opcode::Nop as u8;
    const MAX: u8 = Opcode::Exit as u8;

    /// Decodes a raw byte read off a [`BytecodeStream`](crate) into an opcode.
    ///
    /// Returns `None` for any byte the emitter never produces; per §4.3 this is not fatal —
    /// the dispatcher logs a diagnostic and drains the stream.
    #[must_use]
    pub const fn from_u8(byte: u8) -> Option<Self> {
        if byte < Self::MIN || byte > Self::MAX {
            return None;
        }
        // SAFETY: `byte` is within the contiguous, `#[repr(u8)]` discriminant range checked above.
        Some(unsafe { std::mem::transmute::<u8, Opcode>(byte) })
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

bitflags::bitflags! {
    /// Function descriptor flags (§6.2). Unset high bits are reserved and must be zero.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FunctionFlags: u8 {
        /// The function accepts a variable number of trailing arguments, packed into an array.
        const VARIADIC = 1 << 0;
        /// The function is a generator (suspends and resumes rather than running to completion).
        const GENERATOR = 1 << 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_round_trips_through_u8() {
        for byte in Opcode::MIN..=Opcode::MAX {
            let op = Opcode::from_u8(byte).unwrap();
            assert_eq!(op as u8, byte);
        }
    }

    #[test]
    fn out_of_range_byte_is_unknown() {
        assert!(Opcode::from_u8(Opcode::MAX + 1).is_none());
        assert!(Opcode::from_u8(u8::MAX).is_none());
    }

    #[test]
    fn nop_is_zero() {
        assert_eq!(Opcode::Nop as u8, 0);
    }
}
