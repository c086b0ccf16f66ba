//! Shared types for the bookie engine.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that provider, market,
//! storage, and engine modules can depend on them without
//! circular references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::odds;

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

/// One bettable event as seen from the odds provider.
///
/// The engine never mutates market truth — markets are fetched, cached,
/// and read. Only the provider boundary constructs these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    /// Provider event id.
    pub id: String,
    /// Provider sport key, e.g. "basketball_nba".
    pub sport_key: String,
    /// Human-readable sport title, e.g. "NBA".
    pub sport_title: String,
    pub home_team: String,
    pub away_team: String,
    pub commence_time: DateTime<Utc>,
    pub status: MarketStatus,
    /// Priced selections, normalized to decimal odds at the provider boundary.
    pub quotes: HashMap<Selection, Quote>,
    /// Final result once the market has finished.
    pub result: Option<GameResult>,
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} vs {} ({}, {})",
            self.sport_title, self.home_team, self.away_team, self.status, self.id,
        )
    }
}

impl Market {
    /// The quote for a selection, if the provider priced it.
    pub fn quote(&self, selection: Selection) -> Option<&Quote> {
        self.quotes.get(&selection)
    }

    /// Whether the event's start time has passed.
    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.commence_time <= now
    }

    /// Whether bets may still be placed (pre-game only).
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.status == MarketStatus::Scheduled && !self.has_started(now)
    }

    /// Helper to build a test market with sensible defaults.
    #[cfg(test)]
    pub fn sample() -> Self {
        let mut quotes = HashMap::new();
        quotes.insert(Selection::Home, Quote::from_american(-110, None));
        quotes.insert(Selection::Away, Quote::from_american(130, None));
        quotes.insert(Selection::Over, Quote::from_american(-105, Some(44.5)));
        quotes.insert(Selection::Under, Quote::from_american(-115, Some(44.5)));
        Market {
            id: "evt-001".to_string(),
            sport_key: "americanfootball_nfl".to_string(),
            sport_title: "NFL".to_string(),
            home_team: "Chiefs".to_string(),
            away_team: "Bills".to_string(),
            commence_time: Utc::now() + chrono::Duration::hours(6),
            status: MarketStatus::Scheduled,
            quotes,
            result: None,
        }
    }
}

/// Priced outcome on a market. American odds are kept for display;
/// decimal odds drive every payout computation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub american: i32,
    pub decimal: f64,
    /// Line for spread/total selections; absent on moneyline.
    pub point: Option<f64>,
}

impl Quote {
    pub fn from_american(american: i32, point: Option<f64>) -> Self {
        Quote {
            american,
            decimal: odds::american_to_decimal(american),
            point,
        }
    }
}

impl fmt::Display for Quote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.point {
            Some(p) => write!(f, "{} ({:.1})", odds::format_american(self.american), p),
            None => write!(f, "{}", odds::format_american(self.american)),
        }
    }
}

/// Final score and winner for a finished market.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GameResult {
    pub home_score: Option<i64>,
    pub away_score: Option<i64>,
    /// Explicit winner (admin override or outright markets). When absent,
    /// the moneyline winner is derived from the scores.
    pub winner: Option<Selection>,
}

impl GameResult {
    pub fn from_scores(home: i64, away: i64) -> Self {
        GameResult {
            home_score: Some(home),
            away_score: Some(away),
            winner: None,
        }
    }

    /// The moneyline winner: explicit winner if set, otherwise derived
    /// from the scores. `Draw` when the scores are level.
    pub fn moneyline_winner(&self) -> Option<Selection> {
        if let Some(w) = self.winner {
            return Some(w);
        }
        match (self.home_score, self.away_score) {
            (Some(h), Some(a)) if h > a => Some(Selection::Home),
            (Some(h), Some(a)) if a > h => Some(Selection::Away),
            (Some(_), Some(_)) => Some(Selection::Draw),
            _ => None,
        }
    }

    /// Whether enough information exists to settle spread/total bets.
    pub fn has_scores(&self) -> bool {
        self.home_score.is_some() && self.away_score.is_some()
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// External market lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketStatus {
    Scheduled,
    Live,
    Finished,
    Cancelled,
}

impl MarketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketStatus::Scheduled => "scheduled",
            MarketStatus::Live => "live",
            MarketStatus::Finished => "finished",
            MarketStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MarketStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(MarketStatus::Scheduled),
            "live" => Ok(MarketStatus::Live),
            "finished" => Ok(MarketStatus::Finished),
            "cancelled" => Ok(MarketStatus::Cancelled),
            _ => Err(anyhow::anyhow!("Unknown market status: {s}")),
        }
    }
}

/// One choice within a market. Moneyline (home/away/draw), totals
/// (over/under), and spreads (spread_home/spread_away).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    Home,
    Away,
    Draw,
    Over,
    Under,
    SpreadHome,
    SpreadAway,
}

impl Selection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Selection::Home => "home",
            Selection::Away => "away",
            Selection::Draw => "draw",
            Selection::Over => "over",
            Selection::Under => "under",
            Selection::SpreadHome => "spread_home",
            Selection::SpreadAway => "spread_away",
        }
    }

    /// Whether this selection needs a line (point) to settle.
    pub fn needs_point(&self) -> bool {
        matches!(
            self,
            Selection::Over | Selection::Under | Selection::SpreadHome | Selection::SpreadAway
        )
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Selection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "home" => Ok(Selection::Home),
            "away" => Ok(Selection::Away),
            "draw" => Ok(Selection::Draw),
            "over" => Ok(Selection::Over),
            "under" => Ok(Selection::Under),
            "spread_home" => Ok(Selection::SpreadHome),
            "spread_away" => Ok(Selection::SpreadAway),
            _ => Err(anyhow::anyhow!("Unknown selection: {s}")),
        }
    }
}

/// Bet lifecycle status. `Pending` is the only non-terminal state;
/// the transition out of it happens exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetStatus {
    Pending,
    Won,
    Lost,
    Cancelled,
    Void,
}

impl BetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetStatus::Pending => "pending",
            BetStatus::Won => "won",
            BetStatus::Lost => "lost",
            BetStatus::Cancelled => "cancelled",
            BetStatus::Void => "void",
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self != BetStatus::Pending
    }
}

impl fmt::Display for BetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BetStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BetStatus::Pending),
            "won" => Ok(BetStatus::Won),
            "lost" => Ok(BetStatus::Lost),
            "cancelled" => Ok(BetStatus::Cancelled),
            "void" => Ok(BetStatus::Void),
            _ => Err(anyhow::anyhow!("Unknown bet status: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Bet & Parlay
// ---------------------------------------------------------------------------

/// A single-leg bet. Odds are snapshotted at placement and never change;
/// the payout on a win is `amount × odds` rounded to the nearest minor unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bet {
    pub id: i64,
    pub user_id: i64,
    pub market_id: String,
    pub sport_key: String,
    /// Event start, snapshotted at placement — drives the cancellation window.
    pub commence_time: DateTime<Utc>,
    pub selection: Selection,
    /// Line locked at placement for spread/total selections.
    pub point: Option<f64>,
    /// Wager in minor currency units. Always positive.
    pub amount: i64,
    /// Decimal odds locked at placement.
    pub odds: f64,
    pub status: BetStatus,
    /// Amount credited back on resolution (win payout or refund). Zero while
    /// pending or lost.
    pub payout: i64,
    pub placed_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Bet {
    /// The payout this bet would receive if it wins.
    pub fn payout_if_won(&self) -> i64 {
        odds::payout(self.amount, self.odds)
    }
}

impl fmt::Display for Bet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} {} on {} @ {:.2}x [{}]",
            self.id, self.amount, self.selection, self.market_id, self.odds, self.status,
        )
    }
}

/// Status of one parlay leg. Legs have no stake of their own; they only
/// contribute odds to the parlay product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegStatus {
    Pending,
    Won,
    Lost,
    /// Market cancelled — leg drops out of the odds product.
    Void,
}

impl LegStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LegStatus::Pending => "pending",
            LegStatus::Won => "won",
            LegStatus::Lost => "lost",
            LegStatus::Void => "void",
        }
    }
}

impl fmt::Display for LegStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LegStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(LegStatus::Pending),
            "won" => Ok(LegStatus::Won),
            "lost" => Ok(LegStatus::Lost),
            "void" => Ok(LegStatus::Void),
            _ => Err(anyhow::anyhow!("Unknown leg status: {s}")),
        }
    }
}

/// One leg of a parlay, with odds locked at build time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParlayLeg {
    pub id: i64,
    pub parlay_id: i64,
    pub market_id: String,
    pub sport_key: String,
    pub commence_time: DateTime<Utc>,
    pub selection: Selection,
    pub point: Option<f64>,
    pub odds: f64,
    pub status: LegStatus,
}

/// A multi-leg bet. Lost as soon as any leg loses; won only when every
/// non-void leg wins. Void legs drop out of the combined odds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parlay {
    pub id: i64,
    pub user_id: i64,
    pub amount: i64,
    pub status: BetStatus,
    pub payout: i64,
    pub placed_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub legs: Vec<ParlayLeg>,
}

impl Parlay {
    /// Combined decimal odds across non-void legs.
    pub fn combined_odds(&self) -> f64 {
        odds::combined_odds(
            self.legs
                .iter()
                .filter(|l| l.status != LegStatus::Void)
                .map(|l| l.odds),
        )
    }
}

impl fmt::Display for Parlay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Combined odds shift as legs void, so the American quote is
        // recomputed from the current product rather than stored.
        let combined = self.combined_odds();
        write!(
            f,
            "#P{} {} legs, {} @ {} ({:.2}x) [{}]",
            self.id,
            self.legs.len(),
            self.amount,
            odds::format_american(odds::decimal_to_american(combined)),
            combined,
            self.status,
        )
    }
}

// ---------------------------------------------------------------------------
// Wallet
// ---------------------------------------------------------------------------

/// A user wallet. Mutated only through the ledger's atomic operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: i64,
    /// Balance in minor currency units. Never negative.
    pub balance: i64,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain errors surfaced to the calling layer. Transient fetch/quota
/// problems are handled inside the market cache and never appear here
/// unless no data has ever been available.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Stake must be positive (got {0})")]
    InvalidStake(i64),

    #[error("Insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: i64, available: i64 },

    #[error("Market closed for betting: {0}")]
    MarketClosed(String),

    #[error("Selection {selection} not offered on market {market}")]
    InvalidSelection { market: String, selection: Selection },

    #[error("No usable odds for market {0}")]
    OddsUnavailable(String),

    #[error("Parlay references market {0} more than once")]
    DuplicateLeg(String),

    #[error("Parlay needs at least 2 legs")]
    TooFewLegs,

    #[error("Parlay exceeds the maximum of {0} legs")]
    TooManyLegs(usize),

    #[error("Bet not found: {0}")]
    NotFound(i64),

    #[error("Bet belongs to another user")]
    NotOwner,

    #[error("Market has already started")]
    AlreadyStarted,

    #[error("Bet is no longer pending")]
    NotPending,

    #[error("No market data available for {0}")]
    DataUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
