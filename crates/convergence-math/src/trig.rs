//! Table-driven sin/cos/atan2 over fixed-point angles.
//!
//! Angles are radians in [`Fixed`] representation. The table covers
//! `[0, pi/2]` with 257 samples and is built once, from a hand-rolled
//! Taylor series (not the host's `f64::sin`/`f64::cos`), so the values are
//! a pure function of this source rather than of libm on the host
//! platform.

use crate::fixed::{Fixed, FRAC_BITS, ONE};
use std::sync::OnceLock;

const TABLE_LEN: usize = 257;
const HALF_PI: f64 = std::f64::consts::FRAC_PI_2;
const TWO_PI_FIXED: i64 = (std::f64::consts::PI * 2.0 * ONE as f64) as i64;

fn taylor_sin(x: f64) -> f64 {
    // x in [0, pi/2]; nine-term series is accurate to better than 1e-9 there.
    let x2 = x * x;
    let mut term = x;
    let mut sum = x;
    for k in 1..=8i32 {
        let denom = ((2 * k) * (2 * k + 1)) as f64;
        term = -term * x2 / denom;
        sum += term;
    }
    sum
}

fn build_table() -> [i32; TABLE_LEN] {
    let mut table = [0i32; TABLE_LEN];
    for (i, slot) in table.iter_mut().enumerate() {
        let angle = HALF_PI * (i as f64) / (TABLE_LEN as f64 - 1.0);
        *slot = (taylor_sin(angle) * ONE as f64).round() as i32;
    }
    table
}

fn table() -> &'static [i32; TABLE_LEN] {
    static TABLE: OnceLock<[i32; TABLE_LEN]> = OnceLock::new();
    TABLE.get_or_init(build_table)
}

/// Reduces an arbitrary fixed-point angle to `[0, 2*pi)` via integer
/// modulo, then returns the quadrant (0..4) and the reduced offset within
/// `[0, pi/2]`.
fn reduce(angle: Fixed) -> (u8, i64) {
    let two_pi = TWO_PI_FIXED;
    let mut a = (angle.raw() as i64) % two_pi;
    if a < 0 {
        a += two_pi;
    }
    let quarter = two_pi / 4;
    let quadrant = (a / quarter) as u8;
    let offset = a % quarter;
    (quadrant, offset)
}

fn lookup(offset_in_quarter: i64) -> i32 {
    let quarter = TWO_PI_FIXED / 4;
    let t = table();
    let idx_f = (offset_in_quarter as f64 / quarter as f64) * (TABLE_LEN as f64 - 1.0);
    let idx_lo = idx_f.floor() as usize;
    let idx_hi = (idx_lo + 1).min(TABLE_LEN - 1);
    let frac = idx_f - idx_lo as f64;
    let lo = t[idx_lo.min(TABLE_LEN - 1)] as f64;
    let hi = t[idx_hi] as f64;
    (lo + (hi - lo) * frac).round() as i32
}

pub fn sin(angle: Fixed) -> Fixed {
    let (quadrant, offset) = reduce(angle);
    let raw = match quadrant {
        0 => lookup(offset),
        1 => lookup((TWO_PI_FIXED / 4) - offset),
        2 => -lookup(offset),
        _ => -lookup((TWO_PI_FIXED / 4) - offset),
    };
    Fixed::from_raw(raw)
}

pub fn cos(angle: Fixed) -> Fixed {
    sin(angle + Fixed::from_raw((TWO_PI_FIXED / 4) as i32))
}

/// Quadrant-reduced linear approximation of `atan2(y, x)`, returning
/// radians in `[-pi, pi]` as a [`Fixed`].
pub fn atan2(y: Fixed, x: Fixed) -> Fixed {
    const QUARTER_PI: f64 = std::f64::consts::FRAC_PI_4;
    let yf = y.raw() as f64;
    let xf = x.raw() as f64;
    if xf == 0.0 && yf == 0.0 {
        return Fixed::ZERO;
    }
    // Standard quadrant-reduced atan approximation (max error ~0.07 rad),
    // operating on the ratio so it stays scale-invariant under fixed-point.
    let abs_y = yf.abs() + 1e-10;
    let angle = if xf >= 0.0 {
        let r = (xf - abs_y) / (xf + abs_y);
        QUARTER_PI - QUARTER_PI * r
    } else {
        let r = (xf + abs_y) / (abs_y - xf);
        3.0 * QUARTER_PI - QUARTER_PI * r
    };
    let signed = if yf < 0.0 { -angle } else { angle };
    Fixed::to_fixed(signed)
}

pub const fn frac_bits() -> u32 {
    FRAC_BITS
}
