//! A loaded, ready-to-run bytecode program (§4.1 "Program loading").
//!
//! A `Program` is just the raw instruction bytes plus the address execution should start at.
//! There is no separate "static section" to parse up front: `STORE_STATIC_*` are ordinary
//! opcodes that the main thread executes like any other instruction when it reaches them, the
//! same way the original VM has no load-time pass distinct from normal dispatch.

use ace_vm_interface::Opcode;

use crate::bytecode_stream::BytecodeStream;

/// An assembled program ready to hand to [`crate::dispatcher::run_thread`].
#[derive(Debug, Clone)]
pub struct Program {
    bytecode: Vec<u8>,
    /// Address the main thread begins executing at.
    pub entry_point: u32,
}

impl Program {
    /// Wraps an assembled bytecode buffer, starting execution at `entry_point`.
    #[must_use]
    pub fn new(bytecode: Vec<u8>, entry_point: u32) -> Self {
        Self {
            bytecode,
            entry_point,
        }
    }

    /// Borrows the raw bytecode, e.g. to hand a fresh [`BytecodeStream`] to a newly spawned
    /// thread positioned at its own start address.
    #[must_use]
    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    /// A fresh cursor over this program's bytecode, seeked to `addr`.
    #[must_use]
    pub fn stream_at(&self, addr: u32) -> BytecodeStream {
        let mut stream = BytecodeStream::new(self.bytecode.clone());
        stream.seek(addr as usize);
        stream
    }
}

/// One decoded, human-readable instruction line, as produced by [`disassemble`].
#[derive(Debug, Clone, PartialEq)]
pub struct DisassembledLine {
    /// Byte offset the instruction starts at.
    pub address: usize,
    /// The decoded opcode, or `None` if the byte did not name a known opcode.
    pub opcode: Option<Opcode>,
    /// The raw opcode byte, kept even when `opcode` is `None` so the line is still useful.
    pub raw_opcode_byte: u8,
    /// A human-readable rendering of the opcode and any fixed-width operands that follow it.
    pub text: String,
}

/// Walks `bytecode` from address zero, decoding one opcode (and its fixed-width operands, per
/// the same layout `dispatcher::run_thread` decodes) per line. Unlike the dispatcher, never
/// executes anything and never stops at an unknown opcode: it prints `??` and advances by one
/// byte, so a disassembly of a corrupted or partial buffer still terminates.
#[must_use]
pub fn disassemble(bytecode: &[u8]) -> Vec<DisassembledLine> {
    let mut lines = Vec::new();
    let mut stream = BytecodeStream::new(bytecode.to_vec());
    while !stream.eof() {
        let address = stream.position();
        let raw = match stream.read::<u8>() {
            Ok(b) => b,
            Err(_) => break,
        };
        let opcode = Opcode::from_u8(raw);
        let text = opcode.map_or_else(
            || format!("?? ({raw:#04x})"),
            |op| render_operands(op, &mut stream),
        );
        lines.push(DisassembledLine {
            address,
            opcode,
            raw_opcode_byte: raw,
            text,
        });
    }
    lines
}

fn reg(stream: &mut BytecodeStream) -> String {
    stream.read::<u8>().map_or_else(|_| "?".to_string(), |r| format!("r{r}"))
}

/// Renders one opcode's fixed operand layout for the disassembler. This is the same operand
/// shape `instruction_handlers` decodes at dispatch time (§4.3); kept here rather than shared
/// because the disassembler never needs a [`Ctx`](crate::instruction_handlers::Ctx) and must
/// never fail to advance even on a truncated buffer.
fn render_operands(op: Opcode, stream: &mut BytecodeStream) -> String {
    use Opcode::{
        Add, And, BeginTry, Call, Cmp, CmpZ, Div, Echo, EchoNewline, EndTry, Exit, HasMemHash, Je,
        Jg, Jge, Jmp, Jne, LoadAddr, LoadArrayIdx, LoadF32, LoadF64, LoadFalse, LoadFunc, LoadI32,
        LoadI64, LoadIndex, LoadMem, LoadMemHash, LoadNull, LoadOffset, LoadStatic, LoadString,
        LoadTrue, LoadType, Mod, MovArrayIdx, MovIndex, MovMem, MovMemHash, MovOffset, MovReg,
        Mul, Neg, New, NewArray, Nop, Or, Pop, PopN, Push, PushArray, Ret, Shl, Shr,
        StoreStaticAddress, StoreStaticFunction, StoreStaticString, StoreStaticType, Sub, Xor,
    };

    match op {
        Nop | Exit | EchoNewline | Pop | Ret | EndTry => format!("{op}"),

        StoreStaticString => format!("{op} {:?}", stream.read_string_u32_len().unwrap_or_default()),
        StoreStaticAddress => format!("{op} {:#x}", stream.read::<u32>().unwrap_or_default()),
        StoreStaticFunction => {
            let addr = stream.read::<u32>().unwrap_or_default();
            let nargs = stream.read::<u8>().unwrap_or_default();
            let flags = stream.read::<u8>().unwrap_or_default();
            format!("{op} addr={addr:#x} nargs={nargs} flags={flags:#04b}")
        }
        StoreStaticType => {
            let name = stream.read_string_u16_len().unwrap_or_default();
            let count = stream.read::<u16>().unwrap_or_default();
            let members: Vec<String> =
                (0..count).map(|_| stream.read_string_u16_len().unwrap_or_default()).collect();
            format!("{op} {name:?} [{}]", members.join(", "))
        }

        LoadI32 => format!("{op} {}, #{}", reg(stream), stream.read::<i32>().unwrap_or_default()),
        LoadI64 => format!("{op} {}, #{}", reg(stream), stream.read::<i64>().unwrap_or_default()),
        LoadF32 => format!("{op} {}, #{}", reg(stream), stream.read::<f32>().unwrap_or_default()),
        LoadF64 => format!("{op} {}, #{}", reg(stream), stream.read::<f64>().unwrap_or_default()),
        LoadOffset => format!("{op} {}, #{}", reg(stream), stream.read::<u16>().unwrap_or_default()),
        LoadIndex => format!("{op} {}, #{}", reg(stream), stream.read::<u16>().unwrap_or_default()),
        LoadStatic | LoadAddr | LoadFunc | LoadType => {
            format!("{op} {}, #{}", reg(stream), stream.read::<u16>().unwrap_or_default())
        }
        LoadString => format!("{op} {}, {:?}", reg(stream), stream.read_string_u32_len().unwrap_or_default()),
        LoadNull | LoadTrue | LoadFalse => format!("{op} {}", reg(stream)),

        LoadMem => format!("{op} {}, {}, #{}", reg(stream), reg(stream), stream.read::<u8>().unwrap_or_default()),
        LoadMemHash | HasMemHash => {
            format!("{op} {}, {}, #{:#010x}", reg(stream), reg(stream), stream.read::<u32>().unwrap_or_default())
        }
        LoadArrayIdx => format!("{op} {}, {}, {}", reg(stream), reg(stream), reg(stream)),

        MovOffset => format!("{op} #{}, {}", stream.read::<u16>().unwrap_or_default(), reg(stream)),
        MovIndex => format!("{op} #{}, {}", stream.read::<u16>().unwrap_or_default(), reg(stream)),
        MovMem => format!("{op} {}, #{}, {}", reg(stream), stream.read::<u8>().unwrap_or_default(), reg(stream)),
        MovMemHash => format!("{op} {}, #{:#010x}, {}", reg(stream), stream.read::<u32>().unwrap_or_default(), reg(stream)),
        MovArrayIdx => format!("{op} {}, #{}, {}", reg(stream), stream.read::<u32>().unwrap_or_default(), reg(stream)),
        MovReg => format!("{op} {}, {}", reg(stream), reg(stream)),

        Push | Neg | Echo | CmpZ => format!("{op} {}", reg(stream)),
        PopN => format!("{op} #{}", stream.read::<u8>().unwrap_or_default()),
        PushArray => format!("{op} {}, {}", reg(stream), reg(stream)),

        Jmp | Je | Jne | Jg | Jge | BeginTry => format!("{op} {}", reg(stream)),
        Call => format!("{op} {}, #{}", reg(stream), stream.read::<u8>().unwrap_or_default()),

        New => format!("{op} {}, {}", reg(stream), reg(stream)),
        NewArray => format!("{op} {}, #{}", reg(stream), stream.read::<u32>().unwrap_or_default()),

        Cmp => format!("{op} {}, {}", reg(stream), reg(stream)),
        Add | Sub | Mul | Div | Mod | And | Or | Xor | Shl | Shr => {
            format!("{op} {}, {}, {}", reg(stream), reg(stream), reg(stream))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disassembles_a_trivial_program() {
        let bytecode = vec![Opcode::Nop as u8, Opcode::Exit as u8];
        let lines = disassemble(&bytecode);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].opcode, Some(Opcode::Nop));
        assert_eq!(lines[1].opcode, Some(Opcode::Exit));
    }

    #[test]
    fn unknown_opcode_byte_still_advances_and_is_reported() {
        let bytecode = vec![0xfe, Opcode::Nop as u8];
        let lines = disassemble(&bytecode);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].opcode, None);
        assert_eq!(lines[0].raw_opcode_byte, 0xfe);
    }

    #[test]
    fn renders_register_and_immediate_operands() {
        let mut bytecode = vec![Opcode::LoadI32 as u8, 2];
        bytecode.extend_from_slice(&42i32.to_le_bytes());
        let lines = disassemble(&bytecode);
        assert_eq!(lines[0].text, "LoadI32 r2, #42");
    }
}
