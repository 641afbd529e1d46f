//! 16.16 fixed-point scalar arithmetic.
//!
//! Every "number" field in a synced component is represented by [`Fixed`].
//! All operations are total: there is no native `f32`/`f64` transcendental
//! call anywhere in this module, so results are bit-identical across any
//! conformant 64-bit integer platform.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

use crate::trig;

/// Number of fractional bits in the 16.16 representation.
pub const FRAC_BITS: u32 = 16;
/// `1.0` in fixed-point representation.
pub const ONE: i32 = 1 << FRAC_BITS;

/// A 16.16 signed fixed-point number, backed by a raw `i32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fixed(pub i32);

impl Fixed {
    pub const ZERO: Fixed = Fixed(0);
    pub const ONE: Fixed = Fixed(ONE);
    pub const HALF: Fixed = Fixed(ONE / 2);

    /// Wraps a raw 16.16 word directly (no conversion).
    pub const fn from_raw(raw: i32) -> Fixed {
        Fixed(raw)
    }

    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Quantizes a host float into fixed-point: `round(f * 2^16)`.
    pub fn to_fixed(f: f64) -> Fixed {
        Fixed((f * ONE as f64).round() as i32)
    }

    /// Dequantizes back to a host float. Not used during simulation; only
    /// for host-boundary display/debug.
    pub fn to_float(self) -> f64 {
        self.0 as f64 / ONE as f64
    }

    pub const fn from_int(i: i32) -> Fixed {
        Fixed(i << FRAC_BITS)
    }

    pub const fn to_int(self) -> i32 {
        self.0 >> FRAC_BITS
    }

    pub fn abs(self) -> Fixed {
        Fixed(self.0.saturating_abs())
    }

    pub fn sign(self) -> i32 {
        match self.0 {
            0 => 0,
            n if n > 0 => 1,
            _ => -1,
        }
    }

    pub fn min(self, other: Fixed) -> Fixed {
        Fixed(self.0.min(other.0))
    }

    pub fn max(self, other: Fixed) -> Fixed {
        Fixed(self.0.max(other.0))
    }

    pub fn clamp(self, lo: Fixed, hi: Fixed) -> Fixed {
        self.max(lo).min(hi)
    }

    pub fn floor(self) -> Fixed {
        Fixed(self.0 & !(ONE - 1))
    }

    pub fn ceil(self) -> Fixed {
        let floored = self.floor();
        if floored == self {
            self
        } else {
            floored + Fixed::ONE
        }
    }

    /// Multiplication via a 64-bit intermediate to avoid overflow.
    pub fn mul(self, other: Fixed) -> Fixed {
        let prod = (self.0 as i64) * (other.0 as i64);
        Fixed((prod >> FRAC_BITS) as i32)
    }

    /// Division via a 64-bit intermediate. Division by zero saturates to
    /// `i32::MAX`/`i32::MIN` rather than panicking, matching the kernel's
    /// "every function totally defined" rule.
    pub fn div(self, other: Fixed) -> Fixed {
        if other.0 == 0 {
            return if self.0 >= 0 {
                Fixed(i32::MAX)
            } else {
                Fixed(i32::MIN)
            };
        }
        let numer = (self.0 as i64) << FRAC_BITS;
        Fixed((numer / other.0 as i64) as i32)
    }

    /// Integer Newton-Raphson square root, converging to the integer part
    /// of `sqrt(v * 2^16)`.
    pub fn sqrt(self) -> Fixed {
        if self.0 <= 0 {
            return Fixed::ZERO;
        }
        // Work in the doubled fixed-point domain: sqrt(v) in 16.16 equals
        // isqrt(v << 16) when v is itself 16.16 (since sqrt(v*2^16) = v*2^8
        // only holds for integers; use isqrt on v<<FRAC_BITS directly).
        let target = (self.0 as u64) << FRAC_BITS;
        let mut x = target;
        if x == 0 {
            return Fixed::ZERO;
        }
        // initial guess: highest set bit halved
        let mut guess: u64 = 1u64 << ((64 - x.leading_zeros()) / 2 + 1);
        loop {
            let next = (guess + target / guess) / 2;
            if next >= guess {
                x = guess;
                break;
            }
            guess = next;
        }
        Fixed(x as i32)
    }

    pub fn sin(self) -> Fixed {
        trig::sin(self)
    }

    pub fn cos(self) -> Fixed {
        trig::cos(self)
    }

    pub fn atan2(self, x: Fixed) -> Fixed {
        trig::atan2(self, x)
    }
}

impl Add for Fixed {
    type Output = Fixed;
    fn add(self, rhs: Fixed) -> Fixed {
        Fixed(self.0.wrapping_add(rhs.0))
    }
}

impl Sub for Fixed {
    type Output = Fixed;
    fn sub(self, rhs: Fixed) -> Fixed {
        Fixed(self.0.wrapping_sub(rhs.0))
    }
}

impl Mul for Fixed {
    type Output = Fixed;
    fn mul(self, rhs: Fixed) -> Fixed {
        Fixed::mul(self, rhs)
    }
}

impl Div for Fixed {
    type Output = Fixed;
    fn div(self, rhs: Fixed) -> Fixed {
        Fixed::div(self, rhs)
    }
}

impl Neg for Fixed {
    type Output = Fixed;
    fn neg(self) -> Fixed {
        Fixed(self.0.wrapping_neg())
    }
}

impl fmt::Display for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.5}", self.to_float())
    }
}
