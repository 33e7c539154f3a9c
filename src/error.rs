//! Typed failures for the pricing, settlement and oracle layers.
//!
//! Pure functions (cost, quotes, codecs) return these as plain values with no
//! side effects. The settlement engine returns them before touching any state.

use thiserror::Error;

use crate::market::{MarketId, MarketStatus, TraderId};

pub type Result<T> = std::result::Result<T, MarketError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarketError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("market {0} not found")]
    MarketNotFound(MarketId),

    #[error("market {market} is not open for trading (status: {status})")]
    MarketNotOpen { market: MarketId, status: MarketStatus },

    #[error("market {market} is not locked (status: {status})")]
    MarketNotLocked { market: MarketId, status: MarketStatus },

    #[error("market {market} already settled as {status}")]
    MarketAlreadyResolved { market: MarketId, status: MarketStatus },

    #[error("market {0} is not resolved or voided yet")]
    MarketNotResolved(MarketId),

    #[error("outcome {outcome} out of range for {outcome_count} outcomes")]
    OutcomeOutOfRange { outcome: usize, outcome_count: usize },

    #[error("insufficient outstanding shares: requested {requested}, available {available}")]
    InsufficientOutstandingShares { requested: i128, available: i128 },

    #[error("slippage exceeded: quoted {quoted}, bound {bound}")]
    SlippageExceeded { quoted: i128, bound: i128 },

    #[error("resolution window for market {0} has expired")]
    ResolutionWindowExpired(MarketId),

    #[error("trader {trader} has no position in market {market}")]
    PositionNotFound { market: MarketId, trader: TraderId },

    #[error("trader {trader} already redeemed in market {market}")]
    AlreadyRedeemed { market: MarketId, trader: TraderId },

    #[error("round still in progress: {unresolved} fixture(s) unresolved")]
    RoundInProgress { unresolved: usize },

    #[error("event not resolvable yet: {0}")]
    UnresolvableEvent(String),

    #[error("malformed oracle data: {0}")]
    MalformedOracleData(String),

    #[error("arithmetic overflow in {0}")]
    ArithmeticOverflow(&'static str),
}

impl MarketError {
    /// Only "not yet" oracle answers are worth retrying with the same query.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MarketError::UnresolvableEvent(_))
    }

    /// Stable machine-readable code for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            MarketError::InvalidParameter(_) => "invalid_parameter",
            MarketError::MarketNotFound(_) => "market_not_found",
            MarketError::MarketNotOpen { .. } => "market_not_open",
            MarketError::MarketNotLocked { .. } => "market_not_locked",
            MarketError::MarketAlreadyResolved { .. } => "market_already_resolved",
            MarketError::MarketNotResolved(_) => "market_not_resolved",
            MarketError::OutcomeOutOfRange { .. } => "outcome_out_of_range",
            MarketError::InsufficientOutstandingShares { .. } => "insufficient_outstanding_shares",
            MarketError::SlippageExceeded { .. } => "slippage_exceeded",
            MarketError::ResolutionWindowExpired(_) => "resolution_window_expired",
            MarketError::PositionNotFound { .. } => "position_not_found",
            MarketError::AlreadyRedeemed { .. } => "already_redeemed",
            MarketError::RoundInProgress { .. } => "round_in_progress",
            MarketError::UnresolvableEvent(_) => "unresolvable_event",
            MarketError::MalformedOracleData(_) => "malformed_oracle_data",
            MarketError::ArithmeticOverflow(_) => "arithmetic_overflow",
        }
    }
}
