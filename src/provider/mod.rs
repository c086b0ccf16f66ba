//! Odds/market provider integrations.
//!
//! Defines the `OddsProvider` trait and the the-odds-api client. Providers
//! return fully normalized `Market` values — decimal odds, typed selections,
//! parsed scores — so nothing downstream ever touches provider JSON.

pub mod odds_api;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::Market;

/// Quota credit cost of one odds-board fetch (markets × regions).
pub const ODDS_FETCH_COST: u32 = 3;
/// Quota credit cost of one score-board fetch.
pub const SCORES_FETCH_COST: u32 = 2;

/// Abstraction over the external odds/market source.
///
/// Implementors fetch the current odds board and score board for a sport.
/// Calls are mediated by the Quota Governor — implementations must not
/// retry internally.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OddsProvider: Send + Sync {
    /// Fetch upcoming/live events with current odds for a sport.
    async fn fetch_odds(&self, sport: &str) -> Result<Vec<Market>>;

    /// Fetch recent scores (completed and in-progress events) for a sport.
    async fn fetch_scores(&self, sport: &str) -> Result<Vec<Market>>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}
