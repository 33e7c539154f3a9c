//! src/lmsr_core.rs
//! N-outcome LMSR core on the deterministic fixed-point primitives in `fixed`.
//!
//! Quantities, `b` and costs are ledger units (`i128`, 1e6 scale); prices are
//! WAD (1e18 scale). Every function here is pure, so previews and the
//! settlement engine can call it concurrently without coordination.

use std::fmt;

use crate::error::{MarketError, Result};
use crate::fixed::{exp_wad, ln_wad, mul_div, WAD};

/// Scale of the values returned by [`price`] and [`prices`].
pub const PRICE_SCALE: i128 = WAD;

/// Owned quantity vector plus liquidity parameter.
#[derive(Clone, PartialEq, Eq)]
pub struct Book {
    pub quantities: Vec<i128>,
    pub b: i128,
}

impl fmt::Debug for Book {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Book")
            .field("quantities", &self.quantities)
            .field("b", &self.b)
            .field("prices", &prices(&self.quantities, self.b).ok())
            .finish()
    }
}

impl Book {
    pub fn new(outcome_count: usize, b: i128) -> Result<Self> {
        let book = Self { quantities: vec![0; outcome_count], b };
        validate(&book.quantities, b)?;
        Ok(book)
    }

    pub fn outcome_count(&self) -> usize {
        self.quantities.len()
    }

    pub fn cost(&self) -> Result<i128> {
        cost(&self.quantities, self.b)
    }

    pub fn prices(&self) -> Result<Vec<i128>> {
        prices(&self.quantities, self.b)
    }

    pub fn buy_quote(&self, outcome: usize, amount: i128) -> Result<i128> {
        buy_quote(&self.quantities, self.b, outcome, amount)
    }

    pub fn sell_quote(&self, outcome: usize, amount: i128) -> Result<i128> {
        sell_quote(&self.quantities, self.b, outcome, amount)
    }
}

// -----------------------
// Deterministic math
// -----------------------

fn validate(q: &[i128], b: i128) -> Result<()> {
    if b <= 0 {
        return Err(MarketError::InvalidParameter(format!(
            "liquidity parameter must be positive, got {b}"
        )));
    }
    if q.len() < 2 {
        return Err(MarketError::InvalidParameter(format!(
            "need at least 2 outcomes, got {}",
            q.len()
        )));
    }
    if let Some(neg) = q.iter().find(|&&qi| qi < 0) {
        return Err(MarketError::InvalidParameter(format!(
            "quantities must be non-negative, got {neg}"
        )));
    }
    Ok(())
}

fn check_outcome(q: &[i128], outcome: usize) -> Result<()> {
    if outcome >= q.len() {
        return Err(MarketError::OutcomeOutOfRange {
            outcome,
            outcome_count: q.len(),
        });
    }
    Ok(())
}

/// Shifted exponentials: returns `max_i(q_i/b)` and `e^(q_i/b - max)` per
/// outcome, all in WAD. The largest term is exactly `WAD`.
fn shifted_exponents(q: &[i128], b: i128) -> Result<(i128, Vec<i128>)> {
    validate(q, b)?;
    let scaled = q
        .iter()
        .map(|&qi| mul_div(qi, WAD, b, "q/b"))
        .collect::<Result<Vec<_>>>()?;
    let max = scaled.iter().copied().max().unwrap_or(0);
    let exps = scaled
        .iter()
        .map(|&x| exp_wad(x - max))
        .collect::<Result<Vec<_>>>()?;
    Ok((max, exps))
}

/// `C(q) = b * ln(Σ exp(q_i / b))`, floored to ledger units.
pub fn cost(q: &[i128], b: i128) -> Result<i128> {
    let (max, exps) = shifted_exponents(q, b)?;
    let sum: i128 = exps.iter().sum();
    let log_sum_exp = max
        .checked_add(ln_wad(sum)?)
        .ok_or(MarketError::ArithmeticOverflow("log-sum-exp"))?;
    mul_div(b, log_sum_exp, WAD, "b*lse")
}

/// Instantaneous price of `outcome` in WAD, clamped into `[1, WAD - 1]`.
pub fn price(q: &[i128], b: i128, outcome: usize) -> Result<i128> {
    check_outcome(q, outcome)?;
    let all = prices(q, b)?;
    Ok(all[outcome])
}

/// All instantaneous prices in WAD; they sum to `WAD` within `N` ulps.
pub fn prices(q: &[i128], b: i128) -> Result<Vec<i128>> {
    let (_, exps) = shifted_exponents(q, b)?;
    let sum: i128 = exps.iter().sum();
    exps.iter()
        .map(|&e| mul_div(e, WAD, sum, "price").map(|p| p.clamp(1, WAD - 1)))
        .collect()
}

/// Cost of buying `amount` shares of `outcome`: `C(q + Δe_k) - C(q)`.
pub fn buy_quote(q: &[i128], b: i128, outcome: usize, amount: i128) -> Result<i128> {
    check_outcome(q, outcome)?;
    if amount < 0 {
        return Err(MarketError::InvalidParameter(format!(
            "buy amount must be non-negative, got {amount}"
        )));
    }
    if amount == 0 {
        validate(q, b)?;
        return Ok(0);
    }
    let mut after = q.to_vec();
    after[outcome] = after[outcome]
        .checked_add(amount)
        .ok_or(MarketError::ArithmeticOverflow("buy quantity"))?;
    Ok(cost(&after, b)? - cost(q, b)?)
}

/// Proceeds of selling `amount` shares of `outcome`: `C(q) - C(q - Δe_k)`.
/// Capped by the market's outstanding quantity, not by any trader balance.
pub fn sell_quote(q: &[i128], b: i128, outcome: usize, amount: i128) -> Result<i128> {
    check_outcome(q, outcome)?;
    if amount < 0 {
        return Err(MarketError::InvalidParameter(format!(
            "sell amount must be non-negative, got {amount}"
        )));
    }
    if amount > q[outcome] {
        return Err(MarketError::InsufficientOutstandingShares {
            requested: amount,
            available: q[outcome],
        });
    }
    if amount == 0 {
        validate(q, b)?;
        return Ok(0);
    }
    let mut after = q.to_vec();
    after[outcome] -= amount;
    Ok(cost(q, b)? - cost(&after, b)?)
}

/// Worst-case subsidy of a market started from all-zero quantities: `b * ln(N)`.
pub fn max_subsidy(outcome_count: usize, b: i128) -> Result<i128> {
    cost(&vec![0; outcome_count], b)
}

// -----------------------
// Tests
// -----------------------
