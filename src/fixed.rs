//! src/fixed.rs
//! Deterministic fixed-point primitives shared by every pricing path.
//!
//! Everything here is integer arithmetic on non-negative `i128` operands, so
//! truncating division is floor division and the results are bit-identical in
//! any runtime that follows the same recipe. Floating point appears only in the
//! display conversions at the bottom.

use crate::error::{MarketError, Result};

/// Version of the exp/ln approximation recipe. Bump together with the golden
/// vectors in `lmsr_core` tests whenever any step below changes.
pub const MATH_VERSION: u32 = 1;

pub const LEDGER_SCALE: i128 = 1_000_000; // 1 micro-unit

/// Internal working precision (18 decimals).
pub const WAD: i128 = 1_000_000_000_000_000_000;

/// ln(2) in WAD, truncated.
pub const LN2_WAD: i128 = 693_147_180_559_945_309;

// Series are bounded even though they terminate long before this.
const MAX_SERIES_TERMS: i128 = 64;

/// `e^x` for `x <= 0`, both in WAD.
///
/// Range reduction: `x = r - k*ln2` with `r ∈ [0, ln2)`, Taylor series for
/// `e^r`, then divide by `2^k` with a right shift.
pub fn exp_wad(x: i128) -> Result<i128> {
    if x > 0 {
        return Err(MarketError::InvalidParameter(format!(
            "exp_wad expects a non-positive argument, got {x}"
        )));
    }
    // 2^-128 is below one WAD ulp; also keeps `-x` and `k` below from overflowing
    if x < -127 * LN2_WAD {
        return Ok(0);
    }
    let a = -x;
    let k = (a + LN2_WAD - 1) / LN2_WAD;
    let r = k * LN2_WAD - a;

    let mut term = WAD;
    let mut sum = WAD;
    let mut i = 1;
    while i <= MAX_SERIES_TERMS {
        term = term * r / (WAD * i);
        if term == 0 {
            break;
        }
        sum += term;
        i += 1;
    }
    Ok(sum >> k)
}

/// `ln(y)` for `y > 0`, both in WAD.
///
/// Normalises `y = m * 2^k` with `m ∈ [1, 2)`, then
/// `ln m = 2 * atanh((m - 1) / (m + 1))`.
pub fn ln_wad(y: i128) -> Result<i128> {
    if y <= 0 {
        return Err(MarketError::InvalidParameter(format!(
            "ln_wad expects a positive argument, got {y}"
        )));
    }
    if y < WAD {
        // ln(y) = -ln(1/y); WAD^2 still fits comfortably in i128
        return Ok(-ln_wad(WAD * WAD / y)?);
    }

    let whole = (y / WAD) as u128;
    let k = (127 - whole.leading_zeros()) as i128;
    let m = y >> k;

    let s = (m - WAD) * WAD / (m + WAD);
    let s2 = s * s / WAD;
    let mut term = s;
    let mut sum = 0;
    let mut i = 1;
    while term != 0 && i < 2 * MAX_SERIES_TERMS {
        sum += term / i;
        term = term * s2 / WAD;
        i += 2;
    }
    Ok(k * LN2_WAD + 2 * sum)
}

/// `a * b / d` with overflow reported as a typed error.
#[inline]
pub fn mul_div(a: i128, b: i128, d: i128, ctx: &'static str) -> Result<i128> {
    if d == 0 {
        return Err(MarketError::InvalidParameter(format!("division by zero in {ctx}")));
    }
    a.checked_mul(b)
        .map(|p| p / d)
        .ok_or(MarketError::ArithmeticOverflow(ctx))
}

#[inline]
pub fn to_ledger_units(x: f64) -> Result<i128> {
    // round half-away-from-zero
    if !x.is_finite() {
        return Err(MarketError::InvalidParameter(format!(
            "non-finite value passed to to_ledger_units: {x}"
        )));
    }
    let scaled = x * (LEDGER_SCALE as f64);
    let rounded = if scaled >= 0.0 {
        (scaled + 0.5).floor()
    } else {
        (scaled - 0.5).ceil()
    };
    if rounded.abs() >= i128::MAX as f64 {
        return Err(MarketError::ArithmeticOverflow("to_ledger_units"));
    }
    Ok(rounded as i128)
}

#[inline]
pub fn from_ledger_units(x: i128) -> f64 {
    x as f64 / LEDGER_SCALE as f64
}

/// WAD-scaled value as a float, for logs and display only.
#[inline]
pub fn from_wad(x: i128) -> f64 {
    x as f64 / WAD as f64
}
