//! Tri-state signal values.
//!
//! A [`Signal`] is a fixed-width vector of tri-valued bits (0, 1, undefined),
//! stored least-significant-bit first. It supplies the bitwise boolean
//! operations with their tri-state truth tables, arithmetic via big-integer
//! conversion, concatenation/slicing, extension, and defined-ness queries the
//! cell catalog is built on.
//!
//! Undefined bits are contagious except where boolean short-circuiting
//! applies: `0 & x = 0` and `1 | x = 1` are defined regardless of the other
//! operand.
//!
//! The textual form is a binary string, most significant bit first, using the
//! characters `0`, `1` and `x` (e.g. `"10x1"`); serde uses this form.

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{One, Signed as _, ToPrimitive, Zero};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

/// A single tri-valued bit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Bit {
    /// Logic low.
    #[default]
    Zero,
    /// Logic high.
    One,
    /// Undefined / unknown.
    X,
}

impl Bit {
    /// Returns true if this bit is 0 or 1.
    #[inline]
    pub fn is_defined(self) -> bool {
        self != Bit::X
    }

    /// Tri-state AND: a defined 0 operand dominates.
    pub fn and(self, other: Bit) -> Bit {
        match (self, other) {
            (Bit::Zero, _) | (_, Bit::Zero) => Bit::Zero,
            (Bit::One, Bit::One) => Bit::One,
            _ => Bit::X,
        }
    }

    /// Tri-state OR: a defined 1 operand dominates.
    pub fn or(self, other: Bit) -> Bit {
        match (self, other) {
            (Bit::One, _) | (_, Bit::One) => Bit::One,
            (Bit::Zero, Bit::Zero) => Bit::Zero,
            _ => Bit::X,
        }
    }

    /// Tri-state XOR: any undefined operand yields undefined.
    pub fn xor(self, other: Bit) -> Bit {
        match (self, other) {
            (Bit::X, _) | (_, Bit::X) => Bit::X,
            (a, b) if a == b => Bit::Zero,
            _ => Bit::One,
        }
    }

    /// Tri-state NOT.
    pub fn not(self) -> Bit {
        match self {
            Bit::Zero => Bit::One,
            Bit::One => Bit::Zero,
            Bit::X => Bit::X,
        }
    }

    fn to_char(self) -> char {
        match self {
            Bit::Zero => '0',
            Bit::One => '1',
            Bit::X => 'x',
        }
    }

    fn from_char(c: char) -> Option<Bit> {
        match c {
            '0' => Some(Bit::Zero),
            '1' => Some(Bit::One),
            'x' | 'X' => Some(Bit::X),
            _ => None,
        }
    }
}

impl From<bool> for Bit {
    fn from(v: bool) -> Bit {
        if v {
            Bit::One
        } else {
            Bit::Zero
        }
    }
}

/// A fixed-width tri-state bit vector, LSB first.
///
/// Two signals are equal iff they have the same width and all bits match;
/// an undefined bit only matches another undefined bit.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Signal {
    bits: Vec<Bit>,
}

impl Signal {
    /// All-zero signal of the given width.
    pub fn zeros(width: usize) -> Signal {
        Signal {
            bits: vec![Bit::Zero; width],
        }
    }

    /// All-one signal of the given width.
    pub fn ones(width: usize) -> Signal {
        Signal {
            bits: vec![Bit::One; width],
        }
    }

    /// All-undefined signal of the given width.
    pub fn undefined(width: usize) -> Signal {
        Signal {
            bits: vec![Bit::X; width],
        }
    }

    /// Builds a signal from LSB-first bits.
    pub fn from_bits(bits: Vec<Bit>) -> Signal {
        Signal { bits }
    }

    /// Single-bit signal.
    pub fn bit(b: Bit) -> Signal {
        Signal { bits: vec![b] }
    }

    /// Single-bit signal from a boolean.
    pub fn from_bool(v: bool) -> Signal {
        Signal::bit(Bit::from(v))
    }

    /// Builds a signal of `width` bits from the low bits of `value`.
    pub fn from_u64(value: u64, width: usize) -> Signal {
        let bits = (0..width)
            .map(|i| {
                if i < 64 && (value >> i) & 1 == 1 {
                    Bit::One
                } else {
                    Bit::Zero
                }
            })
            .collect();
        Signal { bits }
    }

    /// Parses an MSB-first binary string of `0`/`1`/`x` characters.
    pub fn parse(s: &str) -> Option<Signal> {
        let mut bits: Vec<Bit> = s.chars().map(Bit::from_char).collect::<Option<_>>()?;
        bits.reverse();
        Some(Signal { bits })
    }

    /// Number of bits.
    #[inline]
    pub fn width(&self) -> usize {
        self.bits.len()
    }

    /// The bit at position `i` (0 = LSB).
    #[inline]
    pub fn get(&self, i: usize) -> Bit {
        self.bits[i]
    }

    /// Replaces the bit at position `i`.
    #[inline]
    pub fn set(&mut self, i: usize, b: Bit) {
        self.bits[i] = b;
    }

    /// LSB-first view of the bits.
    pub fn bits(&self) -> &[Bit] {
        &self.bits
    }

    /// True if every bit is 0 or 1.
    pub fn is_fully_defined(&self) -> bool {
        self.bits.iter().all(|b| b.is_defined())
    }

    /// True if every bit is undefined.
    pub fn is_all_undefined(&self) -> bool {
        self.bits.iter().all(|b| *b == Bit::X)
    }

    /// True for a width-1 signal whose bit equals `level`.
    pub fn is_level(&self, level: Bit) -> bool {
        self.width() == 1 && self.bits[0] == level
    }

    /// Bitwise AND; both operands must have equal width.
    pub fn and(&self, other: &Signal) -> Signal {
        self.zip(other, Bit::and)
    }

    /// Bitwise OR; both operands must have equal width.
    pub fn or(&self, other: &Signal) -> Signal {
        self.zip(other, Bit::or)
    }

    /// Bitwise XOR; both operands must have equal width.
    pub fn xor(&self, other: &Signal) -> Signal {
        self.zip(other, Bit::xor)
    }

    /// Bitwise NOT.
    pub fn not(&self) -> Signal {
        Signal {
            bits: self.bits.iter().map(|b| b.not()).collect(),
        }
    }

    fn zip(&self, other: &Signal, f: impl Fn(Bit, Bit) -> Bit) -> Signal {
        debug_assert_eq!(self.width(), other.width());
        Signal {
            bits: self
                .bits
                .iter()
                .zip(other.bits.iter())
                .map(|(a, b)| f(*a, *b))
                .collect(),
        }
    }

    /// Folds all bits with `f` down to a single bit; undefined width-0
    /// reductions yield `init`.
    pub fn reduce(&self, init: Bit, f: impl Fn(Bit, Bit) -> Bit) -> Bit {
        self.bits.iter().fold(init, |acc, b| f(acc, *b))
    }

    /// Concatenates `high` above this signal (this signal supplies the LSBs).
    pub fn concat(&self, high: &Signal) -> Signal {
        let mut bits = self.bits.clone();
        bits.extend_from_slice(&high.bits);
        Signal { bits }
    }

    /// The bit range `[lo, lo + width)` as a new signal.
    ///
    /// Positions past the end read as undefined.
    pub fn slice(&self, lo: usize, width: usize) -> Signal {
        let bits = (lo..lo + width)
            .map(|i| self.bits.get(i).copied().unwrap_or(Bit::X))
            .collect();
        Signal { bits }
    }

    /// Resizes to `width`, filling new high bits with zero and truncating
    /// from the top.
    pub fn zero_extend(&self, width: usize) -> Signal {
        self.extend_with(width, Bit::Zero)
    }

    /// Resizes to `width`, replicating the sign bit into new high bits and
    /// truncating from the top. An empty signal extends with zeros.
    pub fn sign_extend(&self, width: usize) -> Signal {
        let fill = self.bits.last().copied().unwrap_or(Bit::Zero);
        self.extend_with(width, fill)
    }

    /// Resizes to `width` with an explicit fill bit.
    pub fn extend_with(&self, width: usize, fill: Bit) -> Signal {
        let mut bits = self.bits.clone();
        bits.resize(width, fill);
        bits.truncate(width);
        Signal { bits }
    }

    /// Unsigned value as `u64`, if fully defined and within range.
    pub fn to_u64(&self) -> Option<u64> {
        if !self.is_fully_defined() {
            return None;
        }
        let mut v: u64 = 0;
        for (i, b) in self.bits.iter().enumerate() {
            if *b == Bit::One {
                if i >= 64 {
                    return None;
                }
                v |= 1 << i;
            }
        }
        Some(v)
    }

    /// Converts to an arbitrary-precision integer, `None` when any bit is
    /// undefined. With `signed` the vector is read as two's complement.
    pub fn to_bigint(&self, signed: bool) -> Option<BigInt> {
        if !self.is_fully_defined() {
            return None;
        }
        let mut mag = BigUint::zero();
        for (i, b) in self.bits.iter().enumerate() {
            if *b == Bit::One {
                mag.set_bit(i as u64, true);
            }
        }
        let mut value = BigInt::from_biguint(Sign::Plus, mag);
        if signed && matches!(self.bits.last(), Some(Bit::One)) {
            value -= BigInt::one() << self.width();
        }
        Some(value)
    }

    /// Builds a `width`-bit signal from the two's-complement value of
    /// `value` modulo 2^width.
    pub fn from_bigint(value: &BigInt, width: usize) -> Signal {
        let modulus = BigInt::one() << width;
        let mut m = value % &modulus;
        if m.is_negative() {
            m += &modulus;
        }
        let (_, mag) = m.into_parts();
        let bits = (0..width)
            .map(|i| Bit::from(mag.bit(i as u64)))
            .collect();
        Signal { bits }
    }

    /// Unsigned value as `usize` for addressing, `None` when undefined or
    /// out of `usize` range.
    pub fn to_address(&self) -> Option<usize> {
        self.to_bigint(false)?.to_usize()
    }
}

impl Default for Signal {
    /// The empty (zero-width) signal.
    fn default() -> Signal {
        Signal { bits: Vec::new() }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in self.bits.iter().rev() {
            write!(f, "{}", b.to_char())?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Signal {
    type Err = String;

    fn from_str(s: &str) -> Result<Signal, String> {
        Signal::parse(s).ok_or_else(|| format!("invalid signal literal: {s:?}"))
    }
}

impl Serialize for Signal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Signal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Signal, D::Error> {
        struct SignalVisitor;

        impl<'de> Visitor<'de> for SignalVisitor {
            type Value = Signal;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a binary string of 0/1/x characters")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Signal, E> {
                Signal::parse(v)
                    .ok_or_else(|| E::custom(format!("invalid signal literal: {v:?}")))
            }
        }

        deserializer.deserialize_str(SignalVisitor)
    }
}
