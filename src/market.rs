//! Market, position and ledger records owned by the settlement engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::lmsr_core::Book;

/// Index of a market in the engine's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MarketId(pub u64);

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Market#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TraderId(pub u64);

impl fmt::Display for TraderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Trader#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketStatus {
    Open,
    Locked,
    Resolved,
    Voided,
}

impl MarketStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, MarketStatus::Resolved | MarketStatus::Voided)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketStatus::Open => "open",
            MarketStatus::Locked => "locked",
            MarketStatus::Resolved => "resolved",
            MarketStatus::Voided => "voided",
        }
    }
}

impl fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockReason {
    Cutoff,
    Halt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoidReason {
    Cancelled,
    DeadlineElapsed,
}

/// Trade direction, parsed at the API boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "buy" => Some(Side::Buy),
            "sell" => Some(Side::Sell),
            _ => None,
        }
    }
}

/// Creation parameters. `b` and deadlines are immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSpec {
    pub outcome_count: usize,
    /// Liquidity parameter in ledger units.
    pub liquidity_b: i128,
    /// Trading stops at or after this instant; `None` means only an explicit halt locks.
    pub trading_cutoff: Option<DateTime<Utc>>,
    pub resolution_deadline: DateTime<Utc>,
}

impl MarketSpec {
    pub fn new(outcome_count: usize, liquidity_b: i128, resolution_deadline: DateTime<Utc>) -> Self {
        Self {
            outcome_count,
            liquidity_b,
            trading_cutoff: None,
            resolution_deadline,
        }
    }

    pub fn with_cutoff(mut self, cutoff: DateTime<Utc>) -> Self {
        self.trading_cutoff = Some(cutoff);
        self
    }
}

/// Serialize-only: the internal tag cannot buffer `i128` fields on the way in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerEvent {
    Created { outcome_count: usize, liquidity_b: i128 },
    Trade { trader: TraderId, side: Side, outcome: usize, amount: i128, cash: i128 },
    Locked { reason: LockReason },
    Resolved { outcome: usize },
    Voided { reason: VoidReason },
    Redeemed { trader: TraderId, payout: i128 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub event: LedgerEvent,
}

#[derive(Debug, Clone)]
pub struct Market {
    pub id: MarketId,
    pub book: Book,
    pub status: MarketStatus,
    pub resolved_outcome: Option<usize>,
    pub void_reason: Option<VoidReason>,
    pub trading_cutoff: Option<DateTime<Utc>>,
    pub resolution_deadline: DateTime<Utc>,
    /// Net cash held by the market maker: buys - sells - payouts.
    pub collected: i128,
    pub(crate) ledger: Vec<LedgerEntry>,
}

impl Market {
    pub(crate) fn new(id: MarketId, book: Book, spec: &MarketSpec) -> Self {
        Self {
            id,
            book,
            status: MarketStatus::Open,
            resolved_outcome: None,
            void_reason: None,
            trading_cutoff: spec.trading_cutoff,
            resolution_deadline: spec.resolution_deadline,
            collected: 0,
            ledger: Vec::new(),
        }
    }

    pub fn outcome_count(&self) -> usize {
        self.book.outcome_count()
    }

    pub fn ledger(&self) -> &[LedgerEntry] {
        &self.ledger
    }

    pub(crate) fn record(&mut self, at: DateTime<Utc>, event: LedgerEvent) {
        let seq = self.ledger.len() as u64;
        self.ledger.push(LedgerEntry { seq, at, event });
    }

    pub fn snapshot(&self) -> MarketSnapshot {
        MarketSnapshot {
            id: self.id,
            outcome_count: self.outcome_count(),
            quantities: self.book.quantities.clone(),
            liquidity_b: self.book.b,
            status: self.status,
            resolved_outcome: self.resolved_outcome,
            void_reason: self.void_reason,
            trading_cutoff: self.trading_cutoff,
            resolution_deadline: self.resolution_deadline,
            collected: self.collected,
        }
    }
}

/// Serializable read-only view of a market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub id: MarketId,
    pub outcome_count: usize,
    pub quantities: Vec<i128>,
    pub liquidity_b: i128,
    pub status: MarketStatus,
    pub resolved_outcome: Option<usize>,
    pub void_reason: Option<VoidReason>,
    pub trading_cutoff: Option<DateTime<Utc>>,
    pub resolution_deadline: DateTime<Utc>,
    pub collected: i128,
}

/// Per-trader holdings in one market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub shares: Vec<i128>,
    /// Total paid across all buys.
    pub paid: i128,
    /// Total received across all sells.
    pub received: i128,
    /// Spent flag; set by the single successful redeem.
    pub redeemed: bool,
}

impl Position {
    pub fn new(outcome_count: usize) -> Self {
        Self {
            shares: vec![0; outcome_count],
            paid: 0,
            received: 0,
            redeemed: false,
        }
    }

    /// Net contributed capital, floored at zero.
    pub fn net_contribution(&self) -> i128 {
        (self.paid - self.received).max(0)
    }
}
