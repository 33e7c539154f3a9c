//! Load simulation for the settlement engine
//!
//! This module exercises:
//! 1. **Correctness**: live quotes, slippage bounds, lifecycle and redemption
//! 2. **Financial Invariants**: prices sum to one, holdings never go negative,
//!    and the market maker never loses more than `b * ln(N)`
//! 3. **Performance**: trade throughput across independent markets in parallel
//! 4. **Market Accuracy**: simulated traders with varying skill levels

use anyhow::{bail, Result};
use chrono::{Duration, TimeZone, Utc};
use rand::prelude::*;
use rand::rngs::StdRng;
use rayon::prelude::*;
use std::env;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::error::MarketError;
use crate::fixed::{from_ledger_units, LEDGER_SCALE, WAD};
use crate::lmsr_core::max_subsidy;
use crate::market::{MarketId, MarketSpec, MarketStatus, TraderId};
use crate::settlement::{EngineSettings, ManualClock, SettlementEngine};

// Simulation Parameters (defaults; override via STRESS_* env vars)
const NUM_TRADERS: usize = 200;
const NUM_MARKETS: usize = 64;
const TRADES_PER_MARKET: usize = 2_000;
const OUTCOMES: usize = 3;
const LIQUIDITY_B: f64 = 500.0;
const SELL_PROBABILITY: f64 = 0.25;
const VOID_PROBABILITY: f64 = 0.1;
const MAX_TRADE_SHARES: f64 = 50.0;
const SEED: u64 = 0x5eed;

#[derive(Debug, Clone)]
pub struct StressConfig {
    pub num_traders: usize,
    pub num_markets: usize,
    pub trades_per_market: usize,
    pub outcomes: usize,
    pub liquidity_b: f64,
    pub sell_probability: f64,
    pub void_probability: f64,
    pub max_trade_shares: f64,
    pub seed: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            num_traders: NUM_TRADERS,
            num_markets: NUM_MARKETS,
            trades_per_market: TRADES_PER_MARKET,
            outcomes: OUTCOMES,
            liquidity_b: LIQUIDITY_B,
            sell_probability: SELL_PROBABILITY,
            void_probability: VOID_PROBABILITY,
            max_trade_shares: MAX_TRADE_SHARES,
            seed: SEED,
        }
    }
}

impl StressConfig {
    pub fn from_env() -> Self {
        Self {
            num_traders: env_usize("STRESS_NUM_TRADERS", NUM_TRADERS),
            num_markets: env_usize("STRESS_NUM_MARKETS", NUM_MARKETS),
            trades_per_market: env_usize("STRESS_TRADES_PER_MARKET", TRADES_PER_MARKET),
            outcomes: env_usize("STRESS_OUTCOMES", OUTCOMES).max(2),
            liquidity_b: env_f64_min("STRESS_LIQUIDITY_B", LIQUIDITY_B, 0.001),
            sell_probability: env_f64_clamped("STRESS_SELL_PROBABILITY", SELL_PROBABILITY, 0.0, 1.0),
            void_probability: env_f64_clamped("STRESS_VOID_PROBABILITY", VOID_PROBABILITY, 0.0, 1.0),
            max_trade_shares: env_f64_min("STRESS_MAX_TRADE_SHARES", MAX_TRADE_SHARES, 0.000001),
            seed: env::var("STRESS_SEED")
                .ok()
                .and_then(|value| value.parse().ok())
                .unwrap_or(SEED),
        }
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn env_f64(name: &str, default: f64) -> f64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(default)
}

fn env_f64_clamped(name: &str, default: f64, min: f64, max: f64) -> f64 {
    env_f64(name, default).clamp(min, max)
}

fn env_f64_min(name: &str, default: f64, min: f64) -> f64 {
    env_f64(name, default).max(min)
}

/// Represents a simulated trader with a defined skill level
#[derive(Debug, Clone)]
struct TestTrader {
    id: TraderId,
    skill: f64, // 0.0 = pure noise, 1.0 = always backs the true outcome
}

/// Outcome of simulating one market end to end.
#[derive(Debug, Clone, Default)]
struct MarketRun {
    trades: usize,
    rejected: usize,
    /// Worst mark-to-worst-outcome loss seen at any point, ledger units.
    max_loss: i128,
    subsidy_bound: i128,
    favourite_correct: bool,
    voided: bool,
    final_collected: i128,
}

#[derive(Debug, Clone, Default)]
pub struct StressReport {
    pub markets: usize,
    pub trades: usize,
    pub rejected: usize,
    pub voided: usize,
    pub accuracy: f64,
    pub max_loss_ratio: f64,
    pub trades_per_sec: f64,
}

/// Runs every market on its own engine in parallel and checks invariants.
pub fn run_stress_test(config: &StressConfig) -> Result<StressReport> {
    let started = Instant::now();
    let traders: Vec<TestTrader> = {
        let mut rng = StdRng::seed_from_u64(config.seed);
        (0..config.num_traders)
            .map(|i| TestTrader {
                id: TraderId(i as u64),
                skill: rng.gen_range(0.0..1.0),
            })
            .collect()
    };

    let runs = (0..config.num_markets)
        .into_par_iter()
        .map(|index| simulate_market(config, &traders, index as u64))
        .collect::<Result<Vec<_>>>()?;

    let elapsed = started.elapsed().as_secs_f64().max(f64::EPSILON);
    let trades: usize = runs.iter().map(|r| r.trades).sum();
    let resolved: Vec<_> = runs.iter().filter(|r| !r.voided).collect();
    let correct = resolved.iter().filter(|r| r.favourite_correct).count();
    let report = StressReport {
        markets: runs.len(),
        trades,
        rejected: runs.iter().map(|r| r.rejected).sum(),
        voided: runs.len() - resolved.len(),
        accuracy: if resolved.is_empty() { 0.0 } else { correct as f64 / resolved.len() as f64 },
        max_loss_ratio: runs
            .iter()
            .map(|r| r.max_loss as f64 / r.subsidy_bound as f64)
            .fold(0.0, f64::max),
        trades_per_sec: trades as f64 / elapsed,
    };

    info!(
        markets = report.markets,
        trades = report.trades,
        rejected = report.rejected,
        voided = report.voided,
        accuracy = report.accuracy,
        max_loss_ratio = report.max_loss_ratio,
        trades_per_sec = report.trades_per_sec,
        "stress test complete"
    );
    Ok(report)
}

fn simulate_market(config: &StressConfig, traders: &[TestTrader], index: u64) -> Result<MarketRun> {
    let mut rng = StdRng::seed_from_u64(config.seed ^ (index.wrapping_mul(0x9e37_79b9_7f4a_7c15)));
    let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().unwrap_or_else(Utc::now);
    let clock = ManualClock::new(start);
    let mut engine = SettlementEngine::new(
        EngineSettings { max_outcomes: config.outcomes.max(2), ..EngineSettings::default() },
        Arc::new(clock.clone()),
    );

    let b = crate::fixed::to_ledger_units(config.liquidity_b)?;
    let market = engine.create_market(
        MarketSpec::new(config.outcomes, b, start + Duration::days(7))
            .with_cutoff(start + Duration::days(1)),
    )?;
    let true_outcome = rng.gen_range(0..config.outcomes);
    let subsidy_bound = max_subsidy(config.outcomes, b)?;
    // per-trade floor rounding on cost and payout
    let epsilon = config.outcomes as i128 + 2;

    let mut run = MarketRun { subsidy_bound, ..MarketRun::default() };
    let max_shares = (config.max_trade_shares * LEDGER_SCALE as f64).max(1.0) as i128;

    for _ in 0..config.trades_per_market {
        let trader = traders.choose(&mut rng).cloned().unwrap_or(TestTrader {
            id: TraderId(0),
            skill: 0.0,
        });
        let outcome = if rng.gen_bool(trader.skill) {
            true_outcome
        } else {
            rng.gen_range(0..config.outcomes)
        };

        let result = if rng.gen_bool(config.sell_probability) {
            let held = engine
                .position(market, trader.id)
                .map(|p| p.shares[outcome])
                .unwrap_or(0);
            if held == 0 {
                continue;
            }
            let amount = rng.gen_range(1..=held);
            let quote = engine.quote_sell(market, outcome, amount)?;
            // tolerate a little slippage, as a real client would
            engine.execute_sell(market, trader.id, outcome, amount, quote - quote / 100)
        } else {
            let amount = rng.gen_range(1..=max_shares);
            let quote = engine.quote_buy(market, outcome, amount)?;
            engine.execute_buy(market, trader.id, outcome, amount, quote)
        };

        match result {
            Ok(_) => run.trades += 1,
            Err(MarketError::SlippageExceeded { .. }) => run.rejected += 1,
            Err(e) => return Err(e.into()),
        }

        let loss = check_invariants(&engine, market, config.outcomes)?;
        run.max_loss = run.max_loss.max(loss);
        if loss > subsidy_bound + epsilon {
            bail!("market {market}: loss {loss} exceeds subsidy bound {subsidy_bound}");
        }
    }

    let prices = engine.prices(market)?;
    let favourite = prices
        .iter()
        .enumerate()
        .max_by_key(|(_, p)| **p)
        .map(|(i, _)| i);
    run.favourite_correct = favourite == Some(true_outcome);

    clock.advance(Duration::days(1));
    if engine.advance(market)? != MarketStatus::Locked {
        bail!("market {market} did not lock at cutoff");
    }
    run.voided = rng.gen_bool(config.void_probability);
    if run.voided {
        engine.void(market)?;
    } else {
        engine.resolve(market, true_outcome)?;
    }

    let collected_before = engine.market(market)?.collected;
    let mut paid_out = 0;
    for trader in traders {
        match engine.redeem(market, trader.id) {
            Ok(payout) => paid_out += payout,
            Err(MarketError::PositionNotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }
    }
    // Refunds of a voided market follow net contributions, which the
    // subsidy bound does not cover.
    if !run.voided && paid_out > collected_before + subsidy_bound + epsilon {
        bail!("market {market}: paid {paid_out} against {collected_before} collected");
    }
    run.final_collected = engine.market(market)?.collected;
    debug!(
        %market,
        trades = run.trades,
        voided = run.voided,
        final_collected = from_ledger_units(run.final_collected),
        "market simulation finished"
    );
    Ok(run)
}

/// Returns the market maker's loss if the worst outcome for it won now.
fn check_invariants(engine: &SettlementEngine, market: MarketId, outcomes: usize) -> Result<i128> {
    let snapshot = engine.snapshot(market)?;
    if snapshot.quantities.iter().any(|&q| q < 0) {
        bail!("market {market}: negative quantity {:?}", snapshot.quantities);
    }
    let prices = engine.prices(market)?;
    let sum: i128 = prices.iter().sum();
    if (sum - WAD).abs() > outcomes as i128 || prices.iter().any(|&p| p <= 0 || p >= WAD) {
        bail!("market {market}: prices {prices:?} do not form a distribution");
    }
    let worst_payout = snapshot.quantities.iter().copied().max().unwrap_or(0);
    Ok(worst_payout - snapshot.collected)
}
