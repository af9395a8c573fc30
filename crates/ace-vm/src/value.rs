//! The dynamically-typed register/stack value (§3 "Value", §4.2).
//!
//! Every variant is plain data — `Value` is `Copy` the same way the original `union`-backed
//! value was trivially copyable. Heap-resident payloads (strings, arrays, objects, types,
//! native libraries) are referenced through [`HeapIndex`], never embedded.

use ace_vm_interface::FunctionFlags;

use crate::heap::{Heap, HeapIndex};
use crate::natives::NativeFunctionPtr;

/// Soft cap on how many array elements [`Value::to_repr`] will render before truncating with
/// a `...` marker, so that printing a huge array can't itself become a denial of service.
pub const ARRAY_DISPLAY_BUDGET: usize = 256;

/// A register, stack slot, or array/object element.
#[derive(Debug, Clone, Copy, PartialEq)]
#[non_exhaustive]
pub enum Value {
    /// 32-bit signed integer.
    I32(i32),
    /// 64-bit signed integer.
    I64(i64),
    /// 32-bit IEEE-754 float.
    F32(f32),
    /// 64-bit IEEE-754 float.
    F64(f64),
    /// Boolean.
    Bool(bool),
    /// A pointer into the managed heap, or the null pointer.
    HeapPointer(Option<HeapIndex>),
    /// A raw bytecode address, as loaded by `LOAD_ADDR` / `STORE_STATIC_ADDRESS`.
    Address(u32),
    /// A bytecode function reference, as loaded by `LOAD_FUNC` / `STORE_STATIC_FUNCTION`.
    Function {
        /// Entry address of the function body.
        addr: u32,
        /// Fixed (non-variadic) argument count.
        nargs: u8,
        /// `FunctionFlags::VARIADIC` / `FunctionFlags::GENERATOR`.
        flags: FunctionFlags,
    },
    /// A native (host) function bound via the dynamic library loader (§6.3, §6.4).
    NativeFunction(NativeFunctionPtr),
    /// A transient stack marker pushed by `CALL`, consumed by `RET` (§4.4). Never reachable
    /// from a register and never produced by user bytecode directly.
    FunctionCall {
        /// Address to resume at after the callee returns.
        return_addr: u32,
        /// Number of variadic arguments packed below this marker on the stack.
        varargs_push: i32,
    },
    /// A transient stack marker pushed by `BEGIN_TRY`, consumed by `END_TRY` or by exception
    /// unwinding (§4.6).
    TryCatchInfo {
        /// Address of the catch block to jump to if an exception is raised before `END_TRY`.
        catch_address: u32,
    },
}

impl Value {
    /// The short type name used by `TYPE_ERROR` messages and the `typeof`-style native, and as
    /// the discriminant in [`Value::to_repr`].
    #[must_use]
    pub fn type_string(&self) -> &'static str {
        match self {
            Value::I32(_) => "I32",
            Value::I64(_) => "I64",
            Value::F32(_) => "F32",
            Value::F64(_) => "F64",
            Value::Bool(_) => "BOOLEAN",
            Value::HeapPointer(None) => "NULL",
            Value::HeapPointer(Some(_)) => "HEAP_POINTER",
            Value::Address(_) => "ADDRESS",
            Value::Function { .. } => "FUNCTION",
            Value::NativeFunction(_) => "NATIVE_FUNCTION",
            Value::FunctionCall { .. } => "FUNCTION_CALL",
            Value::TryCatchInfo { .. } => "TRY_CATCH_INFO",
        }
    }

    /// Widens any integer variant to `i64`. Used by bitwise ops and array/stack indexing,
    /// which reject floats outright rather than truncating them.
    #[must_use]
    pub fn get_integer(&self) -> Option<i64> {
        match *self {
            Value::I32(n) => Some(i64::from(n)),
            Value::I64(n) => Some(n),
            _ => None,
        }
    }

    /// Widens any numeric variant (integer or float) to `f64`, per the `MATCH_TYPES` join
    /// order used by arithmetic (§4.2: F64 > F32 > I64 > I32).
    #[must_use]
    pub fn get_number(&self) -> Option<f64> {
        match *self {
            Value::I32(n) => Some(f64::from(n)),
            Value::I64(n) => Some(n as f64),
            Value::F32(n) => Some(f64::from(n)),
            Value::F64(n) => Some(n),
            _ => None,
        }
    }

    /// Widens only the float variants to `f64`. `NEG` and `CMPZ` try [`Value::get_integer`]
    /// first and fall back to this, so that `NEG` on an integer stays an integer.
    #[must_use]
    pub fn get_float(&self) -> Option<f64> {
        match *self {
            Value::F32(n) => Some(f64::from(n)),
            Value::F64(n) => Some(n),
            _ => None,
        }
    }

    /// Whether this value is "truthy" for `JE`/`JNE`-style branching on non-boolean operands:
    /// zero numbers and the null pointer are falsy, everything else (including non-null
    /// pointers, addresses, and functions) is truthy.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match *self {
            Value::I32(n) => n != 0,
            Value::I64(n) => n != 0,
            Value::F32(n) => n != 0.0,
            Value::F64(n) => n != 0.0,
            Value::Bool(b) => b,
            Value::HeapPointer(ptr) => ptr.is_some(),
            Value::Address(_)
            | Value::Function { .. }
            | Value::NativeFunction(_)
            | Value::FunctionCall { .. }
            | Value::TryCatchInfo { .. } => true,
        }
    }

    /// Renders the value the way `ECHO` does: strings print their contents unquoted, arrays
    /// and objects print their elements/members recursively and truncate past
    /// [`ARRAY_DISPLAY_BUDGET`] entries.
    #[must_use]
    pub fn to_display_string(&self, heap: &Heap) -> String {
        self.render(heap, false)
    }

    /// Renders the value the way a debugger/REPL would echo it back: strings are quoted, so
    /// that `to_repr` round-trips through a human reader unambiguously.
    #[must_use]
    pub fn to_repr(&self, heap: &Heap) -> String {
        self.render(heap, true)
    }

    fn render(&self, heap: &Heap, quote_strings: bool) -> String {
        use crate::heap::HeapValue;

        match self {
            Value::I32(n) => n.to_string(),
            Value::I64(n) => n.to_string(),
            Value::F32(n) => n.to_string(),
            Value::F64(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::HeapPointer(None) => "null".to_string(),
            Value::HeapPointer(Some(idx)) => match heap.get(*idx) {
                None | Some(HeapValue::NativeLibrary(_)) => "<native library>".to_string(),
                Some(HeapValue::Str(s)) if quote_strings => format!("{s:?}"),
                Some(HeapValue::Str(s)) => s.clone(),
                Some(HeapValue::Array(arr)) => {
                    let mut out = String::from("[");
                    for (i, item) in arr.items.iter().enumerate() {
                        if i >= ARRAY_DISPLAY_BUDGET {
                            out.push_str(", ...");
                            break;
                        }
                        if i > 0 {
                            out.push_str(", ");
                        }
                        out.push_str(&item.render(heap, true));
                    }
                    out.push(']');
                    out
                }
                Some(HeapValue::Object(obj)) => {
                    let type_name = match heap.get(obj.type_ref) {
                        Some(HeapValue::TypeInfo(t)) => t.name.as_str(),
                        _ => "?",
                    };
                    let mut out = format!("{type_name} {{");
                    for (i, member) in obj.members.iter().enumerate() {
                        if i >= ARRAY_DISPLAY_BUDGET {
                            out.push_str(", ...");
                            break;
                        }
                        if i > 0 {
                            out.push_str(", ");
                        }
                        out.push_str(&format!("#{:08x}: ", member.name_hash));
                        out.push_str(&member.value.render(heap, true));
                    }
                    out.push('}');
                    out
                }
                Some(HeapValue::TypeInfo(t)) => format!("<type {}>", t.name),
            },
            Value::Address(addr) => format!("<address {addr:#010x}>"),
            Value::Function { addr, nargs, .. } => format!("<function @{addr:#010x}/{nargs}>"),
            Value::NativeFunction(_) => "<native function>".to_string(),
            Value::FunctionCall { .. } | Value::TryCatchInfo { .. } => {
                "<internal stack marker>".to_string()
            }
        }
    }
}

/// The `MATCH_TYPES` numeric promotion join used by binary arithmetic (§4.2): whichever
/// operand's type sorts highest wins, in the order F64 > F32 > I64 > I32. Booleans and
/// pointers never participate; callers reject them before calling this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NumericRank {
    /// Lowest rank: both operands are `I32`.
    I32,
    /// Either operand is `I64` and neither is a float.
    I64,
    /// Either operand is `F32` and neither is `F64`.
    F32,
    /// Highest rank: either operand is `F64`.
    F64,
}

impl NumericRank {
    #[must_use]
    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::I32(_) => Some(NumericRank::I32),
            Value::I64(_) => Some(NumericRank::I64),
            Value::F32(_) => Some(NumericRank::F32),
            Value::F64(_) => Some(NumericRank::F64),
            _ => None,
        }
    }

    /// Computes the join rank of a pair of values, returning `None` if either is non-numeric.
    #[must_use]
    pub fn join(lhs: &Value, rhs: &Value) -> Option<Self> {
        Some(NumericRank::of(lhs)?.max(NumericRank::of(rhs)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_rank_promotes_to_the_widest_operand() {
        assert_eq!(
            NumericRank::join(&Value::I32(1), &Value::I64(2)),
            Some(NumericRank::I64)
        );
        assert_eq!(
            NumericRank::join(&Value::I64(1), &Value::F32(2.0)),
            Some(NumericRank::F32)
        );
        assert_eq!(
            NumericRank::join(&Value::F32(1.0), &Value::F64(2.0)),
            Some(NumericRank::F64)
        );
    }

    #[test]
    fn numeric_rank_rejects_non_numeric_operands() {
        assert_eq!(NumericRank::join(&Value::Bool(true), &Value::I32(1)), None);
    }

    #[test]
    fn get_integer_widens_i32_but_not_floats() {
        assert_eq!(Value::I32(5).get_integer(), Some(5));
        assert_eq!(Value::F32(5.0).get_integer(), None);
    }

    #[test]
    fn null_pointer_is_falsy_non_null_is_truthy() {
        assert!(!Value::HeapPointer(None).is_truthy());
        assert!(Value::Address(0).is_truthy());
    }

    #[test]
    fn to_display_string_renders_plain_numbers() {
        let heap = crate::heap::Heap::new(16, 1024);
        assert_eq!(Value::I32(42).to_display_string(&heap), "42");
    }
}
