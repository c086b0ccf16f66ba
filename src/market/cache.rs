//! TTL-bounded market boards with stale fallback.
//!
//! Every read goes here, never straight to the provider. Each sport gets
//! two boards (odds and scores) refreshed lazily: a read inside the TTL is
//! served from memory, an expired read triggers a fetch only if the quota
//! governor admits it. When the fetch is denied or fails, the previous
//! board is served flagged stale rather than erroring out. An error only
//! surfaces when no board has ever been loaded for the sport.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::QuotaGovernor;
use crate::provider::{OddsProvider, ODDS_FETCH_COST, SCORES_FETCH_COST};
use crate::types::{EngineError, Market};

// ---------------------------------------------------------------------------
// Board state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct CacheEntry {
    markets: HashMap<String, Market>,
    fetched_at: Instant,
}

/// A single cached market plus freshness metadata, for bet placement
/// and settlement decisions.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub market: Market,
    /// True when the TTL has lapsed and no refresh was possible.
    pub stale: bool,
    /// Time since the backing board was fetched.
    pub age: Duration,
}

/// A whole sport's board plus freshness metadata.
#[derive(Debug, Clone)]
pub struct Board {
    pub markets: HashMap<String, Market>,
    pub stale: bool,
    pub age: Duration,
}

#[derive(Clone, Copy)]
enum Kind {
    Odds,
    Scores,
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

pub struct MarketCache {
    provider: Arc<dyn OddsProvider>,
    governor: Arc<QuotaGovernor>,
    odds_ttl: Duration,
    scores_ttl: Duration,
    odds_boards: RwLock<HashMap<String, CacheEntry>>,
    score_boards: RwLock<HashMap<String, CacheEntry>>,
}

impl MarketCache {
    pub fn new(
        provider: Arc<dyn OddsProvider>,
        governor: Arc<QuotaGovernor>,
        odds_ttl: Duration,
        scores_ttl: Duration,
    ) -> Self {
        Self {
            provider,
            governor,
            odds_ttl,
            scores_ttl,
            odds_boards: RwLock::new(HashMap::new()),
            score_boards: RwLock::new(HashMap::new()),
        }
    }

    /// The odds board for a sport: every priced upcoming market.
    pub async fn odds(&self, sport: &str) -> Result<Board, EngineError> {
        self.load(sport, Kind::Odds, None).await
    }

    /// The scores board for a sport, keyed by market id. Finished markets
    /// carry their result.
    pub async fn scores(&self, sport: &str) -> Result<Board, EngineError> {
        self.load(sport, Kind::Scores, None).await
    }

    /// A single market off the odds board.
    pub async fn market(&self, sport: &str, market_id: &str) -> Result<Snapshot, EngineError> {
        let board = self.load(sport, Kind::Odds, None).await?;
        Self::pick(board, sport, market_id)
    }

    /// Like [`market`](Self::market), but treats any board older than
    /// `max_age` as expired, triggering a refresh the display TTL would
    /// not. Placement uses this with its tighter freshness bound; the
    /// caller still checks the returned age, since a denied or failed
    /// refresh serves the old board.
    pub async fn market_fresh(
        &self,
        sport: &str,
        market_id: &str,
        max_age: Duration,
    ) -> Result<Snapshot, EngineError> {
        let board = self.load(sport, Kind::Odds, Some(max_age)).await?;
        Self::pick(board, sport, market_id)
    }

    fn pick(board: Board, sport: &str, market_id: &str) -> Result<Snapshot, EngineError> {
        let market = board
            .markets
            .get(market_id)
            .cloned()
            .ok_or_else(|| EngineError::DataUnavailable(format!("{market_id} in {sport}")))?;
        Ok(Snapshot {
            market,
            stale: board.stale,
            age: board.age,
        })
    }

    /// Remaining provider credits in the current quota window.
    pub fn quota_remaining(&self) -> u32 {
        self.governor.remaining()
    }

    // -- Core load path --------------------------------------------------

    async fn load(
        &self,
        sport: &str,
        kind: Kind,
        ttl_override: Option<Duration>,
    ) -> Result<Board, EngineError> {
        let (boards, configured_ttl, cost) = match kind {
            Kind::Odds => (&self.odds_boards, self.odds_ttl, ODDS_FETCH_COST),
            Kind::Scores => (&self.score_boards, self.scores_ttl, SCORES_FETCH_COST),
        };
        let ttl = ttl_override.unwrap_or(configured_ttl).min(configured_ttl);

        // Fast path: board within TTL.
        {
            let guard = boards.read().await;
            if let Some(entry) = guard.get(sport) {
                let age = entry.fetched_at.elapsed();
                if age < ttl {
                    return Ok(Board {
                        markets: entry.markets.clone(),
                        stale: false,
                        age,
                    });
                }
            }
        }

        // Expired or missing: refresh if the quota allows.
        if self.governor.try_admit(cost) {
            let fetched = match kind {
                Kind::Odds => self.provider.fetch_odds(sport).await,
                Kind::Scores => self.provider.fetch_scores(sport).await,
            };
            match fetched {
                Ok(markets) => {
                    debug!(sport, count = markets.len(), "Refreshed market board");
                    let entry = CacheEntry {
                        markets: markets.into_iter().map(|m| (m.id.clone(), m)).collect(),
                        fetched_at: Instant::now(),
                    };
                    let board = Board {
                        markets: entry.markets.clone(),
                        stale: false,
                        age: Duration::ZERO,
                    };
                    // Last writer wins; a concurrent refresh of the same
                    // sport just overwrites with equally-fresh data.
                    boards.write().await.insert(sport.to_string(), entry);
                    return Ok(board);
                }
                Err(err) => {
                    warn!(sport, error = %err, "Market fetch failed, falling back to stale board");
                }
            }
        } else {
            warn!(
                sport,
                remaining = self.governor.remaining(),
                "Quota exhausted, serving stale board"
            );
        }

        // Serve the expired board flagged stale, if we ever had one.
        let guard = boards.read().await;
        match guard.get(sport) {
            Some(entry) => Ok(Board {
                markets: entry.markets.clone(),
                stale: true,
                age: entry.fetched_at.elapsed(),
            }),
            None => Err(EngineError::DataUnavailable(sport.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
