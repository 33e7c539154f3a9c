//! Authoritative market state machine: trades, lifecycle transitions and
//! redemption.
//!
//! Markets live in an arena indexed by [`MarketId`]; positions are keyed by
//! `(MarketId, TraderId)`. The engine is the single writer for every market it
//! owns, so callers that share it across tasks wrap it in one lock and every
//! mutation for a market lands in that market's ledger in a total order.
//!
//! Every operation validates completely before mutating, so a failed call
//! leaves quantities, status and positions untouched. Time-driven transitions
//! (cutoff, deadline) are a function of the clock and the market's data fields;
//! they are applied before an operation is evaluated, whether or not the
//! operation then succeeds.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{MarketError, Result};
use crate::fixed::{mul_div, LEDGER_SCALE};
use crate::lmsr_core::Book;
use crate::market::{
    LedgerEntry, LedgerEvent, LockReason, Market, MarketId, MarketSnapshot, MarketSpec,
    MarketStatus, Position, Side, TraderId, VoidReason,
};

/// Source of "now" for cutoff and deadline evaluation.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for simulations and tests.
#[derive(Debug, Clone)]
pub struct ManualClock(Arc<Mutex<DateTime<Utc>>>);

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self(Arc::new(Mutex::new(start)))
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.0.lock().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Engine-wide settings that do not vary per market.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Payout per winning share, in ledger units.
    pub redemption_unit: i128,
    pub max_outcomes: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            redemption_unit: LEDGER_SCALE,
            max_outcomes: 64,
        }
    }
}

/// Result of a committed trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeReceipt {
    /// Cost charged (buy) or proceeds paid (sell), in ledger units.
    pub cash: i128,
    pub new_quantities: Vec<i128>,
    pub seq: u64,
}

pub struct SettlementEngine {
    markets: Vec<Market>,
    positions: HashMap<(MarketId, TraderId), Position>,
    settings: EngineSettings,
    clock: Arc<dyn Clock>,
}

impl SettlementEngine {
    pub fn new(settings: EngineSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            markets: Vec::new(),
            positions: HashMap::new(),
            settings,
            clock,
        }
    }

    pub fn with_system_clock(settings: EngineSettings) -> Self {
        Self::new(settings, Arc::new(SystemClock))
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    pub fn market_count(&self) -> usize {
        self.markets.len()
    }

    // -----------------------
    // Creation and reads
    // -----------------------

    pub fn create_market(&mut self, spec: MarketSpec) -> Result<MarketId> {
        if spec.outcome_count > self.settings.max_outcomes {
            return Err(MarketError::InvalidParameter(format!(
                "outcome count {} exceeds maximum {}",
                spec.outcome_count, self.settings.max_outcomes
            )));
        }
        if let Some(cutoff) = spec.trading_cutoff {
            if cutoff > spec.resolution_deadline {
                return Err(MarketError::InvalidParameter(
                    "trading cutoff must not be after the resolution deadline".into(),
                ));
            }
        }
        let book = Book::new(spec.outcome_count, spec.liquidity_b)?;

        let id = MarketId(self.markets.len() as u64);
        let mut market = Market::new(id, book, &spec);
        market.record(
            self.clock.now(),
            LedgerEvent::Created {
                outcome_count: spec.outcome_count,
                liquidity_b: spec.liquidity_b,
            },
        );
        self.markets.push(market);

        info!(
            market = %id,
            outcome_count = spec.outcome_count,
            liquidity_b = spec.liquidity_b,
            deadline = %spec.resolution_deadline,
            "market created"
        );
        Ok(id)
    }

    pub fn market(&self, id: MarketId) -> Result<&Market> {
        self.markets
            .get(id.0 as usize)
            .ok_or(MarketError::MarketNotFound(id))
    }

    fn market_mut(&mut self, id: MarketId) -> Result<&mut Market> {
        self.markets
            .get_mut(id.0 as usize)
            .ok_or(MarketError::MarketNotFound(id))
    }

    /// Status and void reason reflect any cutoff or deadline already passed,
    /// even if no mutating call has recorded the transition yet.
    pub fn snapshot(&self, id: MarketId) -> Result<MarketSnapshot> {
        let market = self.market(id)?;
        let mut snapshot = market.snapshot();
        let (status, void_reason) = effective_status(market, self.clock.now());
        snapshot.status = status;
        snapshot.void_reason = void_reason;
        Ok(snapshot)
    }

    pub fn ledger(&self, id: MarketId) -> Result<&[LedgerEntry]> {
        Ok(self.market(id)?.ledger())
    }

    pub fn position(&self, id: MarketId, trader: TraderId) -> Option<&Position> {
        self.positions.get(&(id, trader))
    }

    /// Prices of the current book, whatever the market's status.
    pub fn prices(&self, id: MarketId) -> Result<Vec<i128>> {
        self.market(id)?.book.prices()
    }

    /// Read-only preview; stale as soon as another trade commits. Priced from
    /// the book alone, so it does not check whether trading is still open.
    pub fn quote_buy(&self, id: MarketId, outcome: usize, amount: i128) -> Result<i128> {
        self.market(id)?.book.buy_quote(outcome, amount)
    }

    /// Read-only preview; same caveats as [`Self::quote_buy`].
    pub fn quote_sell(&self, id: MarketId, outcome: usize, amount: i128) -> Result<i128> {
        self.market(id)?.book.sell_quote(outcome, amount)
    }

    // -----------------------
    // Time-driven transitions
    // -----------------------

    /// Applies any cutoff/deadline transition that is due and returns the
    /// resulting status.
    pub fn advance(&mut self, id: MarketId) -> Result<MarketStatus> {
        let now = self.clock.now();
        let market = self.market_mut(id)?;
        apply_due_transitions(market, now);
        Ok(market.status)
    }

    // -----------------------
    // Trading
    // -----------------------

    pub fn execute_buy(
        &mut self,
        id: MarketId,
        trader: TraderId,
        outcome: usize,
        amount: i128,
        max_cost: i128,
    ) -> Result<TradeReceipt> {
        let now = self.clock.now();
        let market = self.markets.get_mut(id.0 as usize).ok_or(MarketError::MarketNotFound(id))?;
        apply_due_transitions(market, now);
        ensure_open(market)?;
        ensure_positive(amount)?;

        // Always against the live book, never a cached preview.
        let cost = market.book.buy_quote(outcome, amount)?;
        if cost > max_cost {
            debug!(market = %id, %trader, outcome, cost, max_cost, "buy rejected by slippage bound");
            return Err(MarketError::SlippageExceeded { quoted: cost, bound: max_cost });
        }
        let collected = market
            .collected
            .checked_add(cost)
            .ok_or(MarketError::ArithmeticOverflow("collected"))?;

        let outcome_count = market.outcome_count();
        market.book.quantities[outcome] += amount;
        market.collected = collected;
        market.record(
            now,
            LedgerEvent::Trade { trader, side: Side::Buy, outcome, amount, cash: cost },
        );
        let receipt = TradeReceipt {
            cash: cost,
            new_quantities: market.book.quantities.clone(),
            seq: market.ledger.len() as u64 - 1,
        };

        let position = self
            .positions
            .entry((id, trader))
            .or_insert_with(|| Position::new(outcome_count));
        position.shares[outcome] += amount;
        position.paid += cost;

        info!(market = %id, %trader, outcome, amount, cost, "buy executed");
        Ok(receipt)
    }

    pub fn execute_sell(
        &mut self,
        id: MarketId,
        trader: TraderId,
        outcome: usize,
        amount: i128,
        min_proceeds: i128,
    ) -> Result<TradeReceipt> {
        let now = self.clock.now();
        let market = self.markets.get_mut(id.0 as usize).ok_or(MarketError::MarketNotFound(id))?;
        apply_due_transitions(market, now);
        ensure_open(market)?;
        ensure_positive(amount)?;
        if outcome >= market.outcome_count() {
            return Err(MarketError::OutcomeOutOfRange {
                outcome,
                outcome_count: market.outcome_count(),
            });
        }

        let held = self
            .positions
            .get(&(id, trader))
            .map(|p| p.shares[outcome])
            .unwrap_or(0);
        if held < amount {
            return Err(MarketError::InsufficientOutstandingShares {
                requested: amount,
                available: held,
            });
        }

        let proceeds = market.book.sell_quote(outcome, amount)?;
        if proceeds < min_proceeds {
            debug!(market = %id, %trader, outcome, proceeds, min_proceeds, "sell rejected by slippage bound");
            return Err(MarketError::SlippageExceeded { quoted: proceeds, bound: min_proceeds });
        }

        market.book.quantities[outcome] -= amount;
        market.collected -= proceeds;
        market.record(
            now,
            LedgerEvent::Trade { trader, side: Side::Sell, outcome, amount, cash: proceeds },
        );
        let receipt = TradeReceipt {
            cash: proceeds,
            new_quantities: market.book.quantities.clone(),
            seq: market.ledger.len() as u64 - 1,
        };

        if let Some(position) = self.positions.get_mut(&(id, trader)) {
            position.shares[outcome] -= amount;
            position.received += proceeds;
        }

        info!(market = %id, %trader, outcome, amount, proceeds, "sell executed");
        Ok(receipt)
    }

    // -----------------------
    // Lifecycle
    // -----------------------

    /// Explicit halt request from the oracle pipeline. Idempotent on Locked.
    pub fn lock(&mut self, id: MarketId) -> Result<MarketStatus> {
        let now = self.clock.now();
        let market = self.market_mut(id)?;
        apply_due_transitions(market, now);
        match market.status {
            MarketStatus::Open => {
                market.status = MarketStatus::Locked;
                market.record(now, LedgerEvent::Locked { reason: LockReason::Halt });
                info!(market = %id, "market halted");
                Ok(MarketStatus::Locked)
            }
            MarketStatus::Locked => Ok(MarketStatus::Locked),
            status => Err(MarketError::MarketAlreadyResolved { market: id, status }),
        }
    }

    /// Applies an oracle result. Same outcome twice is a no-op success.
    pub fn resolve(&mut self, id: MarketId, outcome: usize) -> Result<MarketStatus> {
        let now = self.clock.now();
        let market = self.market_mut(id)?;
        apply_due_transitions(market, now);
        if outcome >= market.outcome_count() {
            return Err(MarketError::OutcomeOutOfRange {
                outcome,
                outcome_count: market.outcome_count(),
            });
        }
        match market.status {
            MarketStatus::Locked => {
                market.status = MarketStatus::Resolved;
                market.resolved_outcome = Some(outcome);
                market.record(now, LedgerEvent::Resolved { outcome });
                info!(market = %id, outcome, "market resolved");
                Ok(MarketStatus::Resolved)
            }
            MarketStatus::Resolved if market.resolved_outcome == Some(outcome) => {
                debug!(market = %id, outcome, "duplicate resolution ignored");
                Ok(MarketStatus::Resolved)
            }
            MarketStatus::Open => Err(MarketError::MarketNotLocked { market: id, status: MarketStatus::Open }),
            MarketStatus::Voided if market.void_reason == Some(VoidReason::DeadlineElapsed) => {
                warn!(market = %id, outcome, "resolution arrived after deadline");
                Err(MarketError::ResolutionWindowExpired(id))
            }
            status => {
                warn!(market = %id, outcome, %status, "conflicting resolution rejected");
                Err(MarketError::MarketAlreadyResolved { market: id, status })
            }
        }
    }

    /// Oracle reported the event cancelled. Open or Locked -> Voided.
    pub fn void(&mut self, id: MarketId) -> Result<MarketStatus> {
        let now = self.clock.now();
        let market = self.market_mut(id)?;
        apply_due_transitions(market, now);
        match market.status {
            MarketStatus::Open | MarketStatus::Locked => {
                market.status = MarketStatus::Voided;
                market.void_reason = Some(VoidReason::Cancelled);
                market.record(now, LedgerEvent::Voided { reason: VoidReason::Cancelled });
                info!(market = %id, "market voided: event cancelled");
                Ok(MarketStatus::Voided)
            }
            MarketStatus::Voided => Ok(MarketStatus::Voided),
            status => Err(MarketError::MarketAlreadyResolved { market: id, status }),
        }
    }

    // -----------------------
    // Redemption
    // -----------------------

    pub fn redeem(&mut self, id: MarketId, trader: TraderId) -> Result<i128> {
        let now = self.clock.now();
        let unit = self.settings.redemption_unit;
        let market = self.markets.get_mut(id.0 as usize).ok_or(MarketError::MarketNotFound(id))?;
        apply_due_transitions(market, now);
        if !market.status.is_terminal() {
            return Err(MarketError::MarketNotResolved(id));
        }
        let position = self
            .positions
            .get_mut(&(id, trader))
            .ok_or(MarketError::PositionNotFound { market: id, trader })?;
        if position.redeemed {
            return Err(MarketError::AlreadyRedeemed { market: id, trader });
        }

        let payout = match (market.status, market.resolved_outcome) {
            (MarketStatus::Resolved, Some(winner)) => {
                mul_div(position.shares[winner], unit, LEDGER_SCALE, "payout")?
            }
            _ => position.net_contribution(),
        };

        position.redeemed = true;
        market.collected -= payout;
        market.record(now, LedgerEvent::Redeemed { trader, payout });
        info!(market = %id, %trader, payout, status = %market.status, "position redeemed");
        Ok(payout)
    }
}

fn ensure_open(market: &Market) -> Result<()> {
    if market.status != MarketStatus::Open {
        return Err(MarketError::MarketNotOpen { market: market.id, status: market.status });
    }
    Ok(())
}

fn ensure_positive(amount: i128) -> Result<()> {
    if amount <= 0 {
        return Err(MarketError::InvalidParameter(format!(
            "trade amount must be positive, got {amount}"
        )));
    }
    Ok(())
}

/// Status the market has at `now` once due transitions are taken into account.
fn effective_status(market: &Market, now: DateTime<Utc>) -> (MarketStatus, Option<VoidReason>) {
    let mut status = market.status;
    if status == MarketStatus::Open && market.trading_cutoff.is_some_and(|cutoff| now >= cutoff) {
        status = MarketStatus::Locked;
    }
    if matches!(status, MarketStatus::Open | MarketStatus::Locked) && now >= market.resolution_deadline {
        return (MarketStatus::Voided, Some(VoidReason::DeadlineElapsed));
    }
    (status, market.void_reason)
}

fn apply_due_transitions(market: &mut Market, now: DateTime<Utc>) {
    if market.status == MarketStatus::Open {
        if let Some(cutoff) = market.trading_cutoff {
            if now >= cutoff {
                market.status = MarketStatus::Locked;
                market.record(now, LedgerEvent::Locked { reason: LockReason::Cutoff });
                info!(market = %market.id, "market locked at cutoff");
            }
        }
    }
    // An Open market past its deadline was never locked; it still voids.
    if matches!(market.status, MarketStatus::Open | MarketStatus::Locked)
        && now >= market.resolution_deadline
    {
        market.status = MarketStatus::Voided;
        market.void_reason = Some(VoidReason::DeadlineElapsed);
        market.record(now, LedgerEvent::Voided { reason: VoidReason::DeadlineElapsed });
        warn!(market = %market.id, "resolution deadline elapsed, market voided");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    const S: i128 = LEDGER_SCALE;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    fn engine() -> (SettlementEngine, ManualClock) {
        let clock = ManualClock::new(start());
        let engine = SettlementEngine::new(EngineSettings::default(), Arc::new(clock.clone()));
        (engine, clock)
    }

    fn match_market(engine: &mut SettlementEngine) -> MarketId {
        let spec = MarketSpec::new(3, 100 * S, start() + Duration::days(2))
            .with_cutoff(start() + Duration::hours(2));
        engine.create_market(spec).unwrap()
    }

    #[test]
    fn create_validates_parameters() {
        let (mut engine, _) = engine();
        let deadline = start() + Duration::days(1);
        assert!(engine.create_market(MarketSpec::new(1, S, deadline)).is_err());
        assert!(engine.create_market(MarketSpec::new(3, 0, deadline)).is_err());
        assert!(engine.create_market(MarketSpec::new(65, S, deadline)).is_err());
        let late_cutoff = MarketSpec::new(2, S, deadline).with_cutoff(deadline + Duration::hours(1));
        assert!(engine.create_market(late_cutoff).is_err());
        assert_eq!(engine.market_count(), 0);

        let id = engine.create_market(MarketSpec::new(3, S, deadline)).unwrap();
        let snap = engine.snapshot(id).unwrap();
        assert_eq!(snap.quantities, vec![0, 0, 0]);
        assert_eq!(snap.status, MarketStatus::Open);
    }

    #[test]
    fn buy_charges_live_quote_and_updates_position() {
        let (mut engine, _) = engine();
        let m = match_market(&mut engine);
        let trader = TraderId(7);

        let preview = engine.quote_buy(m, 0, 10 * S).unwrap();
        let receipt = engine.execute_buy(m, trader, 0, 10 * S, preview).unwrap();
        assert_eq!(receipt.cash, 3_445_647);
        assert_eq!(receipt.new_quantities, vec![10 * S, 0, 0]);

        let pos = engine.position(m, trader).unwrap();
        assert_eq!(pos.shares, vec![10 * S, 0, 0]);
        assert_eq!(pos.paid, 3_445_647);
        assert_eq!(engine.market(m).unwrap().collected, 3_445_647);
    }

    #[test]
    fn stale_preview_hits_slippage_bound() {
        let (mut engine, _) = engine();
        let m = match_market(&mut engine);
        let preview = engine.quote_buy(m, 0, 10 * S).unwrap();
        engine.execute_buy(m, TraderId(1), 0, 50 * S, i128::MAX).unwrap();

        let before = engine.snapshot(m).unwrap();
        let err = engine.execute_buy(m, TraderId(2), 0, 10 * S, preview).unwrap_err();
        assert!(matches!(err, MarketError::SlippageExceeded { bound, .. } if bound == preview));
        assert_eq!(engine.snapshot(m).unwrap(), before);
        assert!(engine.position(m, TraderId(2)).is_none());
    }

    #[test]
    fn sell_capped_by_trader_holdings() {
        let (mut engine, _) = engine();
        let m = match_market(&mut engine);
        engine.execute_buy(m, TraderId(1), 1, 20 * S, i128::MAX).unwrap();
        engine.execute_buy(m, TraderId(2), 1, 5 * S, i128::MAX).unwrap();

        let err = engine.execute_sell(m, TraderId(2), 1, 6 * S, 0).unwrap_err();
        assert_eq!(
            err,
            MarketError::InsufficientOutstandingShares { requested: 6 * S, available: 5 * S }
        );

        let receipt = engine.execute_sell(m, TraderId(2), 1, 5 * S, 0).unwrap();
        assert!(receipt.cash > 0);
        assert_eq!(receipt.new_quantities, vec![0, 20 * S, 0]);
        let pos = engine.position(m, TraderId(2)).unwrap();
        assert_eq!(pos.shares[1], 0);
        assert_eq!(pos.received, receipt.cash);
    }

    #[test]
    fn sell_min_proceeds_enforced() {
        let (mut engine, _) = engine();
        let m = match_market(&mut engine);
        engine.execute_buy(m, TraderId(1), 2, 10 * S, i128::MAX).unwrap();
        let proceeds = engine.quote_sell(m, 2, 10 * S).unwrap();
        let err = engine.execute_sell(m, TraderId(1), 2, 10 * S, proceeds + 1).unwrap_err();
        assert!(matches!(err, MarketError::SlippageExceeded { .. }));
        assert_eq!(engine.position(m, TraderId(1)).unwrap().shares[2], 10 * S);
    }

    #[test]
    fn zero_and_negative_trades_rejected() {
        let (mut engine, _) = engine();
        let m = match_market(&mut engine);
        assert!(matches!(
            engine.execute_buy(m, TraderId(1), 0, 0, i128::MAX),
            Err(MarketError::InvalidParameter(_))
        ));
        assert!(matches!(
            engine.execute_sell(m, TraderId(1), 0, -3, 0),
            Err(MarketError::InvalidParameter(_))
        ));
        assert!(matches!(
            engine.execute_buy(m, TraderId(1), 3, S, i128::MAX),
            Err(MarketError::OutcomeOutOfRange { outcome: 3, outcome_count: 3 })
        ));
    }

    #[test]
    fn cutoff_locks_and_rejects_trades() {
        let (mut engine, clock) = engine();
        let m = match_market(&mut engine);
        clock.advance(Duration::hours(2));
        let err = engine.execute_buy(m, TraderId(1), 0, S, i128::MAX).unwrap_err();
        assert_eq!(
            err,
            MarketError::MarketNotOpen { market: m, status: MarketStatus::Locked }
        );
        assert_eq!(engine.snapshot(m).unwrap().quantities, vec![0, 0, 0]);
    }

    #[test]
    fn resolve_requires_lock_and_is_idempotent() {
        let (mut engine, _) = engine();
        let m = match_market(&mut engine);
        assert_eq!(
            engine.resolve(m, 0),
            Err(MarketError::MarketNotLocked { market: m, status: MarketStatus::Open })
        );

        assert_eq!(engine.lock(m).unwrap(), MarketStatus::Locked);
        assert_eq!(engine.lock(m).unwrap(), MarketStatus::Locked);
        assert_eq!(engine.resolve(m, 3), Err(MarketError::OutcomeOutOfRange { outcome: 3, outcome_count: 3 }));

        assert_eq!(engine.resolve(m, 2).unwrap(), MarketStatus::Resolved);
        let first = engine.snapshot(m).unwrap();
        let ledger_len = engine.ledger(m).unwrap().len();
        assert_eq!(engine.resolve(m, 2).unwrap(), MarketStatus::Resolved);
        assert_eq!(engine.snapshot(m).unwrap(), first);
        assert_eq!(engine.ledger(m).unwrap().len(), ledger_len);

        assert_eq!(
            engine.resolve(m, 1),
            Err(MarketError::MarketAlreadyResolved { market: m, status: MarketStatus::Resolved })
        );
        assert_eq!(engine.snapshot(m).unwrap().resolved_outcome, Some(2));
    }

    #[test]
    fn deadline_voids_and_blocks_late_resolution() {
        let (mut engine, clock) = engine();
        let m = match_market(&mut engine);
        engine.execute_buy(m, TraderId(1), 0, 10 * S, i128::MAX).unwrap();
        clock.advance(Duration::days(3));

        assert_eq!(engine.resolve(m, 0), Err(MarketError::ResolutionWindowExpired(m)));
        let snap = engine.snapshot(m).unwrap();
        assert_eq!(snap.status, MarketStatus::Voided);
        assert_eq!(snap.void_reason, Some(VoidReason::DeadlineElapsed));
        assert_eq!(snap.resolved_outcome, None);
    }

    #[test]
    fn redeem_pays_winners_once() {
        let (mut engine, _) = engine();
        let m = match_market(&mut engine);
        engine.execute_buy(m, TraderId(1), 0, 10 * S, i128::MAX).unwrap();
        engine.execute_buy(m, TraderId(2), 1, 4 * S, i128::MAX).unwrap();

        assert_eq!(engine.redeem(m, TraderId(1)), Err(MarketError::MarketNotResolved(m)));

        engine.lock(m).unwrap();
        assert_eq!(engine.redeem(m, TraderId(1)), Err(MarketError::MarketNotResolved(m)));
        engine.resolve(m, 0).unwrap();

        assert_eq!(engine.redeem(m, TraderId(1)).unwrap(), 10 * S);
        assert_eq!(
            engine.redeem(m, TraderId(1)),
            Err(MarketError::AlreadyRedeemed { market: m, trader: TraderId(1) })
        );
        // losing shares pay zero, explicitly
        assert_eq!(engine.redeem(m, TraderId(2)).unwrap(), 0);
        assert_eq!(
            engine.redeem(m, TraderId(3)),
            Err(MarketError::PositionNotFound { market: m, trader: TraderId(3) })
        );
        assert!(engine.position(m, TraderId(1)).unwrap().redeemed);
    }

    #[test]
    fn voided_market_refunds_net_contribution() {
        let (mut engine, _) = engine();
        let m = match_market(&mut engine);
        let buy = engine.execute_buy(m, TraderId(1), 0, 30 * S, i128::MAX).unwrap();
        let sell = engine.execute_sell(m, TraderId(1), 0, 10 * S, 0).unwrap();
        engine.execute_buy(m, TraderId(2), 2, 5 * S, i128::MAX).unwrap();

        assert_eq!(engine.void(m).unwrap(), MarketStatus::Voided);
        assert_eq!(engine.void(m).unwrap(), MarketStatus::Voided);
        assert!(matches!(engine.resolve(m, 0), Err(MarketError::MarketAlreadyResolved { .. })));

        assert_eq!(engine.redeem(m, TraderId(1)).unwrap(), buy.cash - sell.cash);
        let t2_paid = engine.position(m, TraderId(2)).unwrap().paid;
        assert_eq!(engine.redeem(m, TraderId(2)).unwrap(), t2_paid);
        assert_eq!(engine.market(m).unwrap().collected, 0);
    }

    #[test]
    fn ledger_records_every_accepted_change() {
        let (mut engine, _) = engine();
        let m = match_market(&mut engine);
        engine.execute_buy(m, TraderId(1), 0, S, i128::MAX).unwrap();
        let _ = engine.execute_buy(m, TraderId(1), 0, S, 0);
        engine.lock(m).unwrap();
        engine.resolve(m, 0).unwrap();
        engine.redeem(m, TraderId(1)).unwrap();

        let kinds: Vec<_> = engine
            .ledger(m)
            .unwrap()
            .iter()
            .map(|e| std::mem::discriminant(&e.event))
            .collect();
        assert_eq!(kinds.len(), 5);
        let seqs: Vec<u64> = engine.ledger(m).unwrap().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
        assert!(matches!(
            engine.ledger(m).unwrap()[2].event,
            LedgerEvent::Locked { reason: LockReason::Halt }
        ));
    }

    #[test]
    fn markets_are_isolated() {
        let (mut engine, _) = engine();
        let a = match_market(&mut engine);
        let b = match_market(&mut engine);
        engine.execute_buy(a, TraderId(1), 0, 10 * S, i128::MAX).unwrap();
        assert_eq!(engine.snapshot(b).unwrap().quantities, vec![0, 0, 0]);
        assert!(engine.position(b, TraderId(1)).is_none());
        assert_eq!(engine.market(MarketId(99)).unwrap_err(), MarketError::MarketNotFound(MarketId(99)));
    }

    #[test]
    fn reads_report_due_transitions_without_recording_them() {
        let (mut engine, clock) = engine();
        let m = match_market(&mut engine);
        engine.execute_buy(m, TraderId(1), 0, 5 * S, i128::MAX).unwrap();
        let recorded = engine.ledger(m).unwrap().len();

        clock.advance(Duration::hours(2));
        assert_eq!(engine.snapshot(m).unwrap().status, MarketStatus::Locked);
        assert_eq!(engine.market(m).unwrap().status, MarketStatus::Open);
        assert_eq!(engine.ledger(m).unwrap().len(), recorded);
        // quotes price the book and stay available
        assert!(engine.quote_buy(m, 1, S).unwrap() > 0);

        clock.advance(Duration::days(2));
        let snap = engine.snapshot(m).unwrap();
        assert_eq!(snap.status, MarketStatus::Voided);
        assert_eq!(snap.void_reason, Some(VoidReason::DeadlineElapsed));

        // the next mutating call records both transitions
        assert_eq!(engine.advance(m).unwrap(), MarketStatus::Voided);
        assert_eq!(engine.ledger(m).unwrap().len(), recorded + 2);
        assert_eq!(engine.snapshot(m).unwrap(), engine.market(m).unwrap().snapshot());
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn large_payouts_are_logged_in_full() {
        let settings = EngineSettings { redemption_unit: 10_000_000 * S * S, ..EngineSettings::default() };
        let mut engine = SettlementEngine::new(settings, Arc::new(ManualClock::new(start())));
        assert_eq!(engine.settings().redemption_unit, 10_000_000_000_000_000_000);
        let m = match_market(&mut engine);
        engine.execute_buy(m, TraderId(1), 0, S, i128::MAX).unwrap();
        engine.lock(m).unwrap();
        engine.resolve(m, 0).unwrap();

        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();
        let payout = tracing::subscriber::with_default(subscriber, || engine.redeem(m, TraderId(1)).unwrap());

        // above i64::MAX
        assert_eq!(payout, 10_000_000_000_000_000_000);
        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("payout=10000000000000000000"), "{output}");
    }
}
