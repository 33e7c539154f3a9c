//! Oracle boundary: turns raw football fixture data into resolved outcomes and
//! round discovery payloads, and encodes both as big-endian 32-bit words.
//!
//! Fetching is the caller's job (including retries); everything here is a pure
//! function of the fixture data handed in, so replaying a query is always safe.

use serde::{Deserialize, Serialize};

use crate::error::{MarketError, Result};

// -----------------------
// Raw provider data
// -----------------------

/// One fixture as returned by the football data provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureData {
    pub fixture: FixtureInfo,
    #[serde(default)]
    pub league: Option<LeagueInfo>,
    pub teams: Teams,
    #[serde(default)]
    pub goals: Goals,
    #[serde(default)]
    pub score: Option<Score>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureInfo {
    pub id: i64,
    /// Kickoff, unix seconds.
    pub timestamp: i64,
    pub status: FixtureStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureStatus {
    pub short: String,
}

impl FixtureStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self.short.as_str(), "FT" | "AET" | "PEN")
    }

    /// Terminal non-results; the pipeline voids the market on these.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.short.as_str(), "CANC" | "ABD" | "AWD" | "WO")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeagueInfo {
    pub round: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Teams {
    pub home: Team,
    pub away: Team,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Goals {
    pub home: Option<i64>,
    pub away: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Score {
    #[serde(default)]
    pub penalty: Option<Goals>,
}

// -----------------------
// Match resolution
// -----------------------

/// Outcome index of a three-way match market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum MatchOutcome {
    Home = 0,
    Draw = 1,
    Away = 2,
}

impl MatchOutcome {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_word(word: u32) -> Result<Self> {
        match word {
            0 => Ok(MatchOutcome::Home),
            1 => Ok(MatchOutcome::Draw),
            2 => Ok(MatchOutcome::Away),
            other => Err(MarketError::MalformedOracleData(format!("unknown outcome word {other}"))),
        }
    }

    fn from_score(home: i64, away: i64) -> Self {
        match home.cmp(&away) {
            std::cmp::Ordering::Greater => MatchOutcome::Home,
            std::cmp::Ordering::Less => MatchOutcome::Away,
            std::cmp::Ordering::Equal => MatchOutcome::Draw,
        }
    }
}

/// `[outcome, homeTeamId, awayTeamId]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultPayload {
    pub outcome: MatchOutcome,
    pub home_team_id: u32,
    pub away_team_id: u32,
}

impl ResultPayload {
    pub const WORDS: usize = 3;

    pub fn words(&self) -> Vec<u32> {
        vec![self.outcome as u32, self.home_team_id, self.away_team_id]
    }

    pub fn encode(&self) -> Vec<u8> {
        words_to_bytes(&self.words())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let words = bytes_to_words(bytes)?;
        if words.len() != Self::WORDS {
            return Err(MarketError::MalformedOracleData(format!(
                "result payload needs {} words, got {}",
                Self::WORDS,
                words.len()
            )));
        }
        Ok(Self {
            outcome: MatchOutcome::from_word(words[0])?,
            home_team_id: words[1],
            away_team_id: words[2],
        })
    }

    /// Team id of the winner, if the match was not drawn.
    pub fn winner_team_id(&self) -> Option<u32> {
        match self.outcome {
            MatchOutcome::Home => Some(self.home_team_id),
            MatchOutcome::Away => Some(self.away_team_id),
            MatchOutcome::Draw => None,
        }
    }
}

fn finished_goals(data: &FixtureData) -> Result<(i64, i64)> {
    if !data.fixture.status.is_finished() {
        return Err(MarketError::UnresolvableEvent(format!(
            "fixture {} has status {}",
            data.fixture.id, data.fixture.status.short
        )));
    }
    match (data.goals.home, data.goals.away) {
        (Some(home), Some(away)) if home >= 0 && away >= 0 => Ok((home, away)),
        _ => Err(MarketError::MalformedOracleData(format!(
            "finished fixture {} is missing goals",
            data.fixture.id
        ))),
    }
}

/// Three-way result of a finished match. Level goals are a draw regardless of
/// how the match was finished.
pub fn classify_match(data: &FixtureData) -> Result<ResultPayload> {
    let (home, away) = finished_goals(data)?;
    Ok(ResultPayload {
        outcome: MatchOutcome::from_score(home, away),
        home_team_id: fit_u32(data.teams.home.id, "teams.home.id")?,
        away_team_id: fit_u32(data.teams.away.id, "teams.away.id")?,
    })
}

/// Knockout result: a level score is settled by the shoot-out when reported.
pub fn knockout_result(data: &FixtureData) -> Result<ResultPayload> {
    let mut result = classify_match(data)?;
    if result.outcome != MatchOutcome::Draw {
        return Ok(result);
    }
    let penalties = data.score.as_ref().and_then(|s| s.penalty.as_ref());
    match penalties.and_then(|p| p.home.zip(p.away)) {
        Some((home, away)) if home != away => {
            result.outcome = MatchOutcome::from_score(home, away);
            Ok(result)
        }
        _ => Err(MarketError::UnresolvableEvent(format!(
            "knockout fixture {} level without a shoot-out result",
            data.fixture.id
        ))),
    }
}

// -----------------------
// Round discovery
// -----------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundFixture {
    pub id: u32,
    pub timestamp: u32,
}

/// `[isTournamentEnd, lastIndex, fixtureId_0..n, timestamp_0..n]`; empty is `[0, 0]`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoundPayload {
    pub fixtures: Vec<RoundFixture>,
}

impl RoundPayload {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.fixtures.is_empty()
    }

    /// A round of exactly one fixture is the final.
    pub fn is_tournament_end(&self) -> bool {
        self.fixtures.len() == 1
    }

    pub fn last_index(&self) -> u32 {
        self.fixtures.len().saturating_sub(1) as u32
    }

    pub fn words(&self) -> Vec<u32> {
        if self.is_empty() {
            return vec![0, 0];
        }
        let mut words = Vec::with_capacity(2 + 2 * self.fixtures.len());
        words.push(u32::from(self.is_tournament_end()));
        words.push(self.last_index());
        words.extend(self.fixtures.iter().map(|f| f.id));
        words.extend(self.fixtures.iter().map(|f| f.timestamp));
        words
    }

    pub fn encode(&self) -> Vec<u8> {
        words_to_bytes(&self.words())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let words = bytes_to_words(bytes)?;
        if words.len() < 2 {
            return Err(MarketError::MalformedOracleData(
                "round payload needs at least 2 words".into(),
            ));
        }
        if words.len() == 2 {
            if words[0] != 0 || words[1] != 0 {
                return Err(MarketError::MalformedOracleData(
                    "round payload without entries must be [0, 0]".into(),
                ));
            }
            return Ok(Self::empty());
        }

        let count = words[1] as usize + 1;
        if words.len() != 2 + 2 * count {
            return Err(MarketError::MalformedOracleData(format!(
                "round payload with {count} fixtures needs {} words, got {}",
                2 + 2 * count,
                words.len()
            )));
        }
        let end = match words[0] {
            0 => false,
            1 => true,
            other => {
                return Err(MarketError::MalformedOracleData(format!(
                    "isTournamentEnd must be 0 or 1, got {other}"
                )))
            }
        };
        if end != (count == 1) {
            return Err(MarketError::MalformedOracleData(format!(
                "isTournamentEnd={} inconsistent with {count} fixtures",
                words[0]
            )));
        }

        let (ids, stamps) = words[2..].split_at(count);
        let fixtures = ids
            .iter()
            .zip(stamps)
            .map(|(&id, &timestamp)| RoundFixture { id, timestamp })
            .collect();
        Ok(Self { fixtures })
    }
}

/// Picks the most recently started round (by earliest kickoff at or before
/// `now`) and returns its fixtures sorted by kickoff.
pub fn round_payload(fixtures: &[FixtureData], now: i64) -> Result<RoundPayload> {
    let mut rounds: Vec<(&str, i64)> = Vec::new();
    for data in fixtures {
        let round = data
            .league
            .as_ref()
            .map(|l| l.round.as_str())
            .ok_or_else(|| {
                MarketError::MalformedOracleData(format!("fixture {} has no round", data.fixture.id))
            })?;
        match rounds.iter_mut().find(|(name, _)| *name == round) {
            Some((_, first)) => *first = (*first).min(data.fixture.timestamp),
            None => rounds.push((round, data.fixture.timestamp)),
        }
    }

    let current = rounds
        .iter()
        .filter(|(_, first)| *first <= now)
        .max_by_key(|(_, first)| *first)
        .map(|(name, _)| *name);
    let Some(current) = current else {
        return Ok(RoundPayload::empty());
    };

    let mut selected = fixtures
        .iter()
        .filter(|d| d.league.as_ref().map(|l| l.round.as_str()) == Some(current))
        .map(|d| {
            Ok(RoundFixture {
                id: fit_u32(d.fixture.id, "fixture.id")?,
                timestamp: fit_u32(d.fixture.timestamp, "fixture.timestamp")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    selected.sort_by_key(|f| (f.timestamp, f.id));
    Ok(RoundPayload { fixtures: selected })
}

// -----------------------
// Word encoding
// -----------------------

pub fn fit_u32(value: i64, field: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| {
        MarketError::MalformedOracleData(format!("{field}={value} does not fit in 32 unsigned bits"))
    })
}

pub fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_be_bytes()).collect()
}

pub fn bytes_to_words(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.len() % 4 != 0 {
        return Err(MarketError::MalformedOracleData(format!(
            "payload length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
