//! Arithmetic, bitwise, and comparison opcodes (§4.2 "Numeric promotion", §4.3 `ADD`..`CMPZ`).

use ace_vm_interface::ExceptionKind;

use crate::error::VmError;
use crate::heap::HeapValue;
use crate::registers::CompareFlag;
use crate::value::{NumericRank, Value};

use super::Ctx;

/// The four numeric binary opcodes that also define division/modulo-by-zero (`ADD`/`SUB`/
/// `MUL` never fail on their operand values, only on operand type).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// `ADD`/`SUB`/`MUL`/`DIV`/`MOD lhs, rhs, dst` (§4.2): promotes both operands to their join
/// rank, computes, and raises `DivisionByZero` for integer `DIV`/`MOD` by zero rather than
/// wrapping or panicking. Non-numeric operands raise `TypeError`.
pub fn numeric_binary(ctx: &mut Ctx, op: NumericOp, lhs: u8, rhs: u8, dst: u8) -> Result<(), VmError> {
    let lv = ctx.reg(lhs)?;
    let rv = ctx.reg(rhs)?;
    let Some(rank) = NumericRank::join(&lv, &rv) else {
        ctx.raise(ExceptionKind::TypeError(format!(
            "cannot apply arithmetic to '{}' and '{}'",
            lv.type_string(),
            rv.type_string()
        )));
        return Ok(());
    };

    let result = match rank {
        NumericRank::I32 => {
            let (a, b) = (lv.get_integer().unwrap() as i32, rv.get_integer().unwrap() as i32);
            match checked_integer(op, i64::from(a), i64::from(b)) {
                Ok(v) => Value::I32(v as i32),
                Err(kind) => {
                    ctx.raise(kind);
                    return Ok(());
                }
            }
        }
        NumericRank::I64 => {
            let (a, b) = (lv.get_integer().unwrap(), rv.get_integer().unwrap());
            match checked_integer(op, a, b) {
                Ok(v) => Value::I64(v),
                Err(kind) => {
                    ctx.raise(kind);
                    return Ok(());
                }
            }
        }
        NumericRank::F32 => {
            let (a, b) = (lv.get_number().unwrap() as f32, rv.get_number().unwrap() as f32);
            match apply_float(op, f64::from(a), f64::from(b)) {
                Ok(v) => Value::F32(v as f32),
                Err(kind) => {
                    ctx.raise(kind);
                    return Ok(());
                }
            }
        }
        NumericRank::F64 => {
            let (a, b) = (lv.get_number().unwrap(), rv.get_number().unwrap());
            match apply_float(op, a, b) {
                Ok(v) => Value::F64(v),
                Err(kind) => {
                    ctx.raise(kind);
                    return Ok(());
                }
            }
        }
    };
    ctx.set_reg(dst, result)
}

fn checked_integer(op: NumericOp, a: i64, b: i64) -> Result<i64, ExceptionKind> {
    match op {
        NumericOp::Add => Ok(a.wrapping_add(b)),
        NumericOp::Sub => Ok(a.wrapping_sub(b)),
        NumericOp::Mul => Ok(a.wrapping_mul(b)),
        NumericOp::Div if b == 0 => Err(ExceptionKind::DivisionByZero),
        NumericOp::Div => Ok(a.wrapping_div(b)),
        NumericOp::Mod if b == 0 => Err(ExceptionKind::DivisionByZero),
        NumericOp::Mod => Ok(a.wrapping_rem(b)),
    }
}

/// Unlike native IEEE-754 division, `DIV`/`MOD` by a zero float still raise `DivisionByZero`
/// (§4.2) rather than producing `inf`/`NaN` — the VM gives guest code one uniform catchable
/// failure for division by zero regardless of operand rank.
fn apply_float(op: NumericOp, a: f64, b: f64) -> Result<f64, ExceptionKind> {
    match op {
        NumericOp::Add => Ok(a + b),
        NumericOp::Sub => Ok(a - b),
        NumericOp::Mul => Ok(a * b),
        NumericOp::Div if b == 0.0 => Err(ExceptionKind::DivisionByZero),
        NumericOp::Div => Ok(a / b),
        NumericOp::Mod if b == 0.0 => Err(ExceptionKind::DivisionByZero),
        NumericOp::Mod => Ok(a % b),
    }
}

/// `NEG reg` (§4.3): negates in place, preserving the operand's own numeric type rather than
/// promoting it.
pub fn neg(ctx: &mut Ctx, reg: u8) -> Result<(), VmError> {
    let value = ctx.reg(reg)?;
    let negated = match value {
        Value::I32(n) => Value::I32(n.wrapping_neg()),
        Value::I64(n) => Value::I64(n.wrapping_neg()),
        Value::F32(n) => Value::F32(-n),
        Value::F64(n) => Value::F64(-n),
        other => {
            ctx.raise(ExceptionKind::TypeError(format!("cannot negate '{}'", other.type_string())));
            return Ok(());
        }
    };
    ctx.set_reg(reg, negated)
}

/// The bitwise/shift opcodes, which operate only on integers (§4.2: floats raise `TypeError`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitwiseOp {
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

/// `AND`/`OR`/`XOR`/`SHL`/`SHR lhs, rhs, dst` (§4.3): both operands widened to `i64`, result
/// stored back as `I64`. A shift amount is masked to 6 bits, matching a native `i64` shift.
pub fn bitwise_binary(ctx: &mut Ctx, op: BitwiseOp, lhs: u8, rhs: u8, dst: u8) -> Result<(), VmError> {
    let lv = ctx.reg(lhs)?;
    let rv = ctx.reg(rhs)?;
    let (Some(a), Some(b)) = (lv.get_integer(), rv.get_integer()) else {
        ctx.raise(ExceptionKind::TypeError(format!(
            "cannot apply bitwise op to '{}' and '{}'",
            lv.type_string(),
            rv.type_string()
        )));
        return Ok(());
    };
    let result = match op {
        BitwiseOp::And => a & b,
        BitwiseOp::Or => a | b,
        BitwiseOp::Xor => a ^ b,
        BitwiseOp::Shl => a.wrapping_shl((b & 0x3f) as u32),
        BitwiseOp::Shr => a.wrapping_shr((b & 0x3f) as u32),
    };
    ctx.set_reg(dst, Value::I64(result))
}

/// `CMP lhs, rhs` (§4.3): sets the thread's [`CompareFlag`] for a later `JE`/`JNE`/`JG`/`JGE`.
/// Numeric operands compare by promoted value; strings compare lexicographically; heap pointers
/// compare by identity (distinct non-null strings fall through to the lexicographic rule above
/// them). A register always compares equal to itself, even before values are read — this is
/// what keeps `CMP r, r` deterministically `EQUAL` for every type, including `NaN` floats.
/// Mismatched or otherwise non-comparable operand types raise `InvalidComparison`.
pub fn cmp(ctx: &mut Ctx, lhs: u8, rhs: u8) -> Result<(), VmError> {
    if lhs == rhs {
        ctx.thread_mut().registers.compare = CompareFlag::Equal;
        return Ok(());
    }
    let lv = ctx.reg(lhs)?;
    let rv = ctx.reg(rhs)?;
    match compare(ctx, &lv, &rv) {
        Ok(flag) => ctx.thread_mut().registers.compare = flag,
        Err(kind) => ctx.raise(kind),
    }
    Ok(())
}

/// `CMPZ reg` (§4.3): compares `reg` against the zero/null/false value of its own type.
/// `Function` values are never zero; variants with no zero-equivalent (e.g. `FunctionCall`,
/// `TryCatchInfo` markers) raise `InvalidComparison`.
pub fn cmpz(ctx: &mut Ctx, reg: u8) -> Result<(), VmError> {
    let value = ctx.reg(reg)?;
    let zero = match value {
        Value::I32(_) => Value::I32(0),
        Value::I64(_) => Value::I64(0),
        Value::F32(_) => Value::F32(0.0),
        Value::F64(_) => Value::F64(0.0),
        Value::Bool(_) => Value::Bool(false),
        Value::HeapPointer(_) => Value::HeapPointer(None),
        Value::Function { .. } => {
            ctx.thread_mut().registers.compare = CompareFlag::None;
            return Ok(());
        }
        other => {
            ctx.raise(ExceptionKind::InvalidComparison {
                lhs_type: other.type_string().to_string(),
                rhs_type: other.type_string().to_string(),
            });
            return Ok(());
        }
    };
    match compare(ctx, &value, &zero) {
        Ok(flag) => ctx.thread_mut().registers.compare = flag,
        Err(kind) => ctx.raise(kind),
    }
    Ok(())
}

fn compare(ctx: &Ctx, lhs: &Value, rhs: &Value) -> Result<CompareFlag, ExceptionKind> {
    if let Some(rank) = NumericRank::join(lhs, rhs) {
        let (a, b) = (lhs.get_number().unwrap(), rhs.get_number().unwrap());
        let _ = rank;
        return Ok(if a == b {
            CompareFlag::Equal
        } else if a > b {
            CompareFlag::Greater
        } else {
            CompareFlag::None
        });
    }
    match (lhs, rhs) {
        (Value::Bool(a), Value::Bool(b)) => Ok(if a == b {
            CompareFlag::Equal
        } else if *a & !*b {
            CompareFlag::Greater
        } else {
            CompareFlag::None
        }),
        (Value::Address(a), Value::Address(b)) => Ok(if a == b {
            CompareFlag::Equal
        } else if a > b {
            CompareFlag::Greater
        } else {
            CompareFlag::None
        }),
        (Value::HeapPointer(None), Value::HeapPointer(None)) => Ok(CompareFlag::Equal),
        (Value::HeapPointer(a), Value::HeapPointer(b)) if a == b => Ok(CompareFlag::Equal),
        (Value::HeapPointer(Some(a)), Value::HeapPointer(Some(b))) => {
            match (ctx.heap().get(*a), ctx.heap().get(*b)) {
                (Some(HeapValue::Str(s1)), Some(HeapValue::Str(s2))) => Ok(match s1.cmp(s2) {
                    std::cmp::Ordering::Equal => CompareFlag::Equal,
                    std::cmp::Ordering::Greater => CompareFlag::Greater,
                    std::cmp::Ordering::Less => CompareFlag::None,
                }),
                _ => Err(ExceptionKind::InvalidComparison {
                    lhs_type: lhs.type_string().to_string(),
                    rhs_type: rhs.type_string().to_string(),
                }),
            }
        }
        _ => Err(ExceptionKind::InvalidComparison {
            lhs_type: lhs.type_string().to_string(),
            rhs_type: rhs.type_string().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::VMState;
    use crate::thread::ThreadId;

    fn ctx_with<'a>(state: &'a mut crate::state::VMStateInner) -> Ctx<'a> {
        Ctx {
            state,
            thread_id: ThreadId::MAIN,
        }
    }

    #[test]
    fn add_promotes_i32_and_i64_to_i64() {
        let vm = VMState::new();
        let mut inner = vm.lock();
        let mut ctx = ctx_with(&mut inner);
        ctx.set_reg(0, Value::I32(2)).unwrap();
        ctx.set_reg(1, Value::I64(3)).unwrap();
        numeric_binary(&mut ctx, NumericOp::Add, 0, 1, 2).unwrap();
        assert_eq!(ctx.reg(2).unwrap(), Value::I64(5));
    }

    #[test]
    fn integer_division_by_zero_raises_a_catchable_exception() {
        let vm = VMState::new();
        let mut inner = vm.lock();
        let mut ctx = ctx_with(&mut inner);
        ctx.set_reg(0, Value::I32(1)).unwrap();
        ctx.set_reg(1, Value::I32(0)).unwrap();
        numeric_binary(&mut ctx, NumericOp::Div, 0, 1, 2).unwrap();
        assert_eq!(
            ctx.thread().exception.exception_occurred,
            Some(ExceptionKind::DivisionByZero)
        );
    }

    #[test]
    fn cmp_of_a_register_against_itself_is_always_equal() {
        let vm = VMState::new();
        let mut inner = vm.lock();
        let mut ctx = ctx_with(&mut inner);
        ctx.set_reg(0, Value::I32(7)).unwrap();
        cmp(&mut ctx, 0, 0).unwrap();
        assert_eq!(ctx.thread().registers.compare, CompareFlag::Equal);
    }

    #[test]
    fn float_division_by_zero_also_raises_division_by_zero() {
        let vm = VMState::new();
        let mut inner = vm.lock();
        let mut ctx = ctx_with(&mut inner);
        ctx.set_reg(0, Value::F64(1.0)).unwrap();
        ctx.set_reg(1, Value::F64(0.0)).unwrap();
        numeric_binary(&mut ctx, NumericOp::Div, 0, 1, 2).unwrap();
        assert_eq!(
            ctx.thread().exception.exception_occurred,
            Some(ExceptionKind::DivisionByZero)
        );
    }

    #[test]
    fn cmp_of_mismatched_types_raises_invalid_comparison() {
        let vm = VMState::new();
        let mut inner = vm.lock();
        let mut ctx = ctx_with(&mut inner);
        ctx.set_reg(0, Value::I32(1)).unwrap();
        ctx.set_reg(1, Value::Bool(true)).unwrap();
        cmp(&mut ctx, 0, 1).unwrap();
        assert!(matches!(
            ctx.thread().exception.exception_occurred,
            Some(ExceptionKind::InvalidComparison { .. })
        ));
    }

    #[test]
    fn cmp_of_booleans_treats_true_as_greater_than_false() {
        let vm = VMState::new();
        let mut inner = vm.lock();
        let mut ctx = ctx_with(&mut inner);
        ctx.set_reg(0, Value::Bool(true)).unwrap();
        ctx.set_reg(1, Value::Bool(false)).unwrap();
        cmp(&mut ctx, 0, 1).unwrap();
        assert_eq!(ctx.thread().registers.compare, CompareFlag::Greater);
        cmp(&mut ctx, 1, 0).unwrap();
        assert_eq!(ctx.thread().registers.compare, CompareFlag::None);
        cmp(&mut ctx, 0, 0).unwrap();
        assert_eq!(ctx.thread().registers.compare, CompareFlag::Equal);
    }

    #[test]
    fn cmp_of_distinct_strings_is_lexicographic() {
        let vm = VMState::new();
        let mut inner = vm.lock();
        let a = inner.heap.insert(crate::heap::HeapValue::Str("apple".into()));
        let b = inner.heap.insert(crate::heap::HeapValue::Str("banana".into()));
        let mut ctx = ctx_with(&mut inner);
        ctx.set_reg(0, Value::HeapPointer(Some(a))).unwrap();
        ctx.set_reg(1, Value::HeapPointer(Some(b))).unwrap();
        cmp(&mut ctx, 0, 1).unwrap();
        assert_eq!(ctx.thread().registers.compare, CompareFlag::None);
        cmp(&mut ctx, 1, 0).unwrap();
        assert_eq!(ctx.thread().registers.compare, CompareFlag::Greater);
    }

    #[test]
    fn bitwise_op_on_a_float_raises_type_error() {
        let vm = VMState::new();
        let mut inner = vm.lock();
        let mut ctx = ctx_with(&mut inner);
        ctx.set_reg(0, Value::F32(1.0)).unwrap();
        ctx.set_reg(1, Value::I32(1)).unwrap();
        bitwise_binary(&mut ctx, BitwiseOp::And, 0, 1, 2).unwrap();
        assert!(matches!(
            ctx.thread().exception.exception_occurred,
            Some(ExceptionKind::TypeError(_))
        ));
    }
}
