//! LMSR Markets Library
//!
//! Pricing, quoting and settlement for outcome-based prediction markets run
//! against a logarithmic market scoring rule market maker.

// Re-export modules for use in binaries
pub mod api;
pub mod config;
pub mod error;
pub mod fixed;
pub mod lmsr_core;
pub mod market;
pub mod oracle;
pub mod settlement;
pub mod stress;
pub mod tournament;

pub use error::{MarketError, Result};
pub use market::{MarketId, MarketSpec, MarketStatus, TraderId};
pub use settlement::SettlementEngine;

#[cfg(test)]
mod tests;
