//! Arithmetic, comparison and shift cells.
//!
//! All value arithmetic goes through `num-bigint` two's-complement
//! conversion, so operand and result widths are unrestricted. Any undefined
//! input bit makes the whole output undefined at the declared width; the
//! only exception is the data operand of a shift, whose undefined bits move
//! positionally.

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{One, Signed as _, ToPrimitive, Zero};
use serde::{Deserialize, Serialize};

use crate::cell::{port_signal, EvalOutput, Port, SignalMap};
use crate::signal::{Bit, Signal};

/// Widths of a unary operation, `in` → `out`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnaryBits {
    #[serde(rename = "in")]
    pub input: usize,
    pub out: usize,
}

/// Widths of a binary operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinBits {
    pub in1: usize,
    pub in2: usize,
    pub out: usize,
}

/// Widths of a comparison (the output is always one bit).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CmpBits {
    pub in1: usize,
    pub in2: usize,
}

/// Per-operand signedness of a binary operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinSigned {
    #[serde(default)]
    pub in1: bool,
    #[serde(default)]
    pub in2: bool,
}

/// Signedness of a unary operand.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnarySigned {
    #[serde(rename = "in", default)]
    pub input: bool,
}

/// Signedness flags of a shift: `in1` picks sign vs zero extension of the
/// data operand, `in2` makes the amount a signed magnitude-plus-direction,
/// `out` selects an arithmetic right shift.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftSigned {
    #[serde(default)]
    pub in1: bool,
    #[serde(default)]
    pub in2: bool,
    #[serde(default)]
    pub out: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnaryArithParams {
    pub bits: UnaryBits,
    #[serde(default)]
    pub signed: UnarySigned,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArithParams {
    pub bits: BinBits,
    #[serde(default)]
    pub signed: BinSigned,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompareParams {
    pub bits: CmpBits,
    #[serde(default)]
    pub signed: BinSigned,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftParams {
    pub bits: BinBits,
    #[serde(default)]
    pub signed: ShiftSigned,
    /// Fill vacated bit positions with undefined instead of zeros.
    #[serde(default)]
    pub fillx: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryArithOp {
    Neg,
    Pos,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Eq,
    Ne,
    Ge,
    Gt,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShiftDir {
    Left,
    Right,
}

pub fn unary_ports(p: &UnaryArithParams) -> Vec<Port> {
    vec![
        Port::input("in", p.bits.input),
        Port::output("out", p.bits.out),
    ]
}

pub fn binary_ports(p: &ArithParams) -> Vec<Port> {
    vec![
        Port::input("in1", p.bits.in1),
        Port::input("in2", p.bits.in2),
        Port::output("out", p.bits.out),
    ]
}

pub fn compare_ports(p: &CompareParams) -> Vec<Port> {
    vec![
        Port::input("in1", p.bits.in1),
        Port::input("in2", p.bits.in2),
        Port::output("out", 1),
    ]
}

pub fn shift_ports(p: &ShiftParams) -> Vec<Port> {
    vec![
        Port::input("in1", p.bits.in1),
        Port::input("in2", p.bits.in2),
        Port::output("out", p.bits.out),
    ]
}

pub fn eval_unary(op: UnaryArithOp, p: &UnaryArithParams, inputs: &SignalMap) -> EvalOutput {
    let a = port_signal(inputs, "in", p.bits.input);
    let Some(value) = a.to_bigint(p.signed.input) else {
        return EvalOutput::single("out", Signal::undefined(p.bits.out));
    };
    let value = match op {
        UnaryArithOp::Neg => -value,
        UnaryArithOp::Pos => value,
    };
    EvalOutput::single("out", Signal::from_bigint(&value, p.bits.out))
}

pub fn eval_binary(op: ArithOp, p: &ArithParams, inputs: &SignalMap) -> EvalOutput {
    let a = port_signal(inputs, "in1", p.bits.in1);
    let b = port_signal(inputs, "in2", p.bits.in2);
    let (Some(av), Some(bv)) = (a.to_bigint(p.signed.in1), b.to_bigint(p.signed.in2)) else {
        return EvalOutput::single("out", Signal::undefined(p.bits.out));
    };
    let value = match op {
        ArithOp::Add => av + bv,
        ArithOp::Sub => av - bv,
        ArithOp::Mul => av * bv,
        // Division and modulo by zero pass the dividend through unchanged.
        ArithOp::Div => {
            if bv.is_zero() {
                av
            } else {
                av / bv
            }
        }
        ArithOp::Mod => {
            if bv.is_zero() {
                av
            } else {
                av % bv
            }
        }
        ArithOp::Pow => pow_mod(&av, &bv, p.bits.out),
    };
    EvalOutput::single("out", Signal::from_bigint(&value, p.bits.out))
}

/// `base^exp` reduced modulo 2^out_bits. Negative exponents yield zero
/// (integer semantics).
fn pow_mod(base: &BigInt, exp: &BigInt, out_bits: usize) -> BigInt {
    if exp.is_negative() {
        return BigInt::zero();
    }
    let modulus = BigUint::one() << out_bits;
    let wide = BigInt::from_biguint(Sign::Plus, modulus.clone());
    let mut b = base % &wide;
    if b.is_negative() {
        b += &wide;
    }
    let b = b.magnitude().clone();
    let e = exp.magnitude().clone();
    BigInt::from_biguint(Sign::Plus, b.modpow(&e, &modulus))
}

pub fn eval_compare(op: CompareOp, p: &CompareParams, inputs: &SignalMap) -> EvalOutput {
    let a = port_signal(inputs, "in1", p.bits.in1);
    let b = port_signal(inputs, "in2", p.bits.in2);
    let (Some(av), Some(bv)) = (a.to_bigint(p.signed.in1), b.to_bigint(p.signed.in2)) else {
        return EvalOutput::single("out", Signal::undefined(1));
    };
    let result = match op {
        CompareOp::Lt => av < bv,
        CompareOp::Le => av <= bv,
        CompareOp::Eq => av == bv,
        CompareOp::Ne => av != bv,
        CompareOp::Ge => av >= bv,
        CompareOp::Gt => av > bv,
    };
    EvalOutput::single("out", Signal::from_bool(result))
}

pub fn eval_shift(dir: ShiftDir, p: &ShiftParams, inputs: &SignalMap) -> EvalOutput {
    let out_bits = p.bits.out;
    let amount_sig = port_signal(inputs, "in2", p.bits.in2);
    let Some(amount) = amount_sig.to_bigint(p.signed.in2) else {
        return EvalOutput::single("out", Signal::undefined(out_bits));
    };

    let data = port_signal(inputs, "in1", p.bits.in1);
    let extended = if p.signed.in1 {
        data.sign_extend(out_bits)
    } else {
        data.zero_extend(out_bits)
    };

    // Positive = left; a right shift flips the sign, and a signed amount
    // may flip it back.
    let shift = match dir {
        ShiftDir::Left => amount,
        ShiftDir::Right => -amount,
    };
    let limit = out_bits as i64;
    let n = shift.to_i64().unwrap_or(if shift.is_negative() {
        -limit
    } else {
        limit
    });
    let n = n.clamp(-limit, limit);

    let msb = if extended.width() > 0 {
        extended.get(extended.width() - 1)
    } else {
        Bit::Zero
    };
    let fill_low = if p.fillx { Bit::X } else { Bit::Zero };
    let fill_high = if p.fillx {
        Bit::X
    } else if p.signed.out {
        msb
    } else {
        Bit::Zero
    };

    let mut bits = vec![Bit::Zero; out_bits];
    if n >= 0 {
        let n = n as usize;
        for (i, bit) in bits.iter_mut().enumerate() {
            *bit = if i < n {
                fill_low
            } else {
                extended.get(i - n)
            };
        }
    } else {
        let m = (-n) as usize;
        for (i, bit) in bits.iter_mut().enumerate() {
            *bit = if i + m < out_bits {
                extended.get(i + m)
            } else {
                fill_high
            };
        }
    }
    EvalOutput::single("out", Signal::from_bits(bits))
}
