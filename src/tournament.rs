//! Multi-round bracket sequencing for tournament-winner markets.
//!
//! The market's outcome vector is the full initial roster and never shrinks;
//! eliminated teams are only tracked here. Rounds are consumed strictly in
//! order and the tournament final resolves the market exactly once.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{MarketError, Result};
use crate::market::{MarketId, MarketStatus};
use crate::oracle::{ResultPayload, RoundPayload};
use crate::settlement::SettlementEngine;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fixture {
    pub match_id: u32,
    pub kickoff: u32,
    pub resolved: bool,
    /// Roster index of the winner once resolved.
    pub winner_index: Option<usize>,
    pub is_round_final: bool,
    pub is_tournament_final: bool,
}

#[derive(Debug, Clone)]
pub struct TournamentBracket {
    market: MarketId,
    roster: Vec<u32>,
    rounds: Vec<Vec<Fixture>>,
    eliminated: BTreeSet<usize>,
    champion: Option<usize>,
}

impl TournamentBracket {
    /// `roster[i]` is the provider team id behind outcome `i`.
    pub fn new(engine: &SettlementEngine, market: MarketId, roster: Vec<u32>) -> Result<Self> {
        let outcome_count = engine.market(market)?.outcome_count();
        if roster.len() != outcome_count {
            return Err(MarketError::InvalidParameter(format!(
                "roster has {} teams but market has {outcome_count} outcomes",
                roster.len()
            )));
        }
        let unique: BTreeSet<_> = roster.iter().collect();
        if unique.len() != roster.len() {
            return Err(MarketError::InvalidParameter("roster contains duplicate team ids".into()));
        }
        Ok(Self {
            market,
            roster,
            rounds: Vec::new(),
            eliminated: BTreeSet::new(),
            champion: None,
        })
    }

    pub fn market(&self) -> MarketId {
        self.market
    }

    pub fn roster(&self) -> &[u32] {
        &self.roster
    }

    pub fn rounds(&self) -> &[Vec<Fixture>] {
        &self.rounds
    }

    pub fn current_round(&self) -> Option<&[Fixture]> {
        self.rounds.last().map(Vec::as_slice)
    }

    pub fn unresolved_in_current_round(&self) -> usize {
        self.current_round()
            .map(|r| r.iter().filter(|f| !f.resolved).count())
            .unwrap_or(0)
    }

    /// Roster indices of teams that lost a resolved fixture.
    pub fn eliminated(&self) -> impl Iterator<Item = usize> + '_ {
        self.eliminated.iter().copied()
    }

    pub fn champion(&self) -> Option<usize> {
        self.champion
    }

    fn roster_index(&self, team_id: u32) -> Result<usize> {
        self.roster
            .iter()
            .position(|&id| id == team_id)
            .ok_or_else(|| MarketError::MalformedOracleData(format!("team {team_id} not in roster")))
    }

    fn find_fixture(&self, match_id: u32) -> Option<(usize, usize)> {
        self.rounds.iter().enumerate().find_map(|(r, round)| {
            round
                .iter()
                .position(|f| f.match_id == match_id)
                .map(|i| (r, i))
        })
    }

    /// Enqueues the next round once the current one is fully resolved.
    /// Re-delivery of an already enqueued round is a no-op. Returns the number
    /// of fixtures added.
    pub fn enqueue_round(&mut self, payload: &RoundPayload) -> Result<usize> {
        if payload.is_empty() {
            return Ok(0);
        }
        let known = payload
            .fixtures
            .iter()
            .filter(|f| self.find_fixture(f.id).is_some())
            .count();
        if known == payload.fixtures.len() {
            debug!(market = %self.market, "round already enqueued");
            return Ok(0);
        }
        if known > 0 {
            return Err(MarketError::MalformedOracleData(
                "round payload overlaps an earlier round".into(),
            ));
        }
        if self.champion.is_some() {
            return Err(MarketError::MarketAlreadyResolved {
                market: self.market,
                status: MarketStatus::Resolved,
            });
        }
        let unresolved = self.unresolved_in_current_round();
        if unresolved > 0 {
            return Err(MarketError::RoundInProgress { unresolved });
        }

        let last = payload.last_index() as usize;
        let round: Vec<Fixture> = payload
            .fixtures
            .iter()
            .enumerate()
            .map(|(i, f)| Fixture {
                match_id: f.id,
                kickoff: f.timestamp,
                resolved: false,
                winner_index: None,
                is_round_final: i == last,
                is_tournament_final: payload.is_tournament_end(),
            })
            .collect();
        let added = round.len();
        self.rounds.push(round);
        info!(market = %self.market, round = self.rounds.len(), fixtures = added, "round enqueued");
        Ok(added)
    }

    /// Applies one fixture result. Resolving the tournament final halts the
    /// market if needed and resolves it with the champion's roster index.
    pub fn record_result(
        &mut self,
        engine: &mut SettlementEngine,
        match_id: u32,
        result: &ResultPayload,
    ) -> Result<Option<MarketStatus>> {
        let (round, slot) = self.find_fixture(match_id).ok_or_else(|| {
            MarketError::MalformedOracleData(format!("fixture {match_id} was never enqueued"))
        })?;
        let winner_team = result.winner_team_id().ok_or_else(|| {
            MarketError::UnresolvableEvent(format!("fixture {match_id} reported without a winner"))
        })?;
        let winner = self.roster_index(winner_team)?;
        let loser_team = if winner_team == result.home_team_id {
            result.away_team_id
        } else {
            result.home_team_id
        };
        let loser = self.roster_index(loser_team)?;
        if winner == loser {
            return Err(MarketError::MalformedOracleData(format!(
                "fixture {match_id} pairs team {winner_team} against itself"
            )));
        }

        let fixture = &self.rounds[round][slot];
        if fixture.resolved {
            if fixture.winner_index != Some(winner) {
                return Err(MarketError::MarketAlreadyResolved {
                    market: self.market,
                    status: engine.market(self.market)?.status,
                });
            }
            debug!(market = %self.market, match_id, "duplicate fixture result ignored");
            return Ok(None);
        }
        if round + 1 != self.rounds.len() {
            return Err(MarketError::MalformedOracleData(format!(
                "fixture {match_id} belongs to a completed round"
            )));
        }
        if let Some(out) = [winner, loser].into_iter().find(|i| self.eliminated.contains(i)) {
            return Err(MarketError::MalformedOracleData(format!(
                "fixture {match_id} names team {} which is already eliminated",
                self.roster[out]
            )));
        }

        let is_final = fixture.is_tournament_final;
        let settled = if is_final {
            // settle first so a failure leaves the bracket untouched
            if engine.market(self.market)?.status == MarketStatus::Open {
                engine.lock(self.market)?;
            }
            let status = engine.resolve(self.market, winner)?;
            self.champion = Some(winner);
            Some(status)
        } else {
            None
        };

        let fixture = &mut self.rounds[round][slot];
        fixture.resolved = true;
        fixture.winner_index = Some(winner);
        self.eliminated.insert(loser);
        info!(market = %self.market, match_id, winner, loser, tournament_final = is_final, "fixture resolved");
        Ok(settled)
    }
}
