//! the-odds-api integration.
//!
//! Fetches odds boards and score boards and normalizes them into `Market`.
//!
//! API docs: https://the-odds-api.com/liveapi/guides/v4/
//! Base URL: https://api.the-odds-api.com/v4
//! Auth: `apiKey` query parameter. Quota: credit-priced per request
//! (odds = markets × regions credits, scores with daysFrom = 2 credits);
//! remaining budget reported via `x-requests-remaining` response header.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info};

use super::OddsProvider;
use crate::types::{GameResult, Market, MarketStatus, Quote, Selection};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const DEFAULT_BASE_URL: &str = "https://api.the-odds-api.com/v4";
const PROVIDER_NAME: &str = "the-odds-api";

/// Scores endpoint lookback, to catch games completed between cycles.
const SCORES_DAYS_FROM: u32 = 3;

// ---------------------------------------------------------------------------
// API response types (the-odds-api JSON → Rust)
// ---------------------------------------------------------------------------

/// One event on the odds board. Only the fields we need.
#[derive(Debug, Deserialize)]
struct OddsEvent {
    id: String,
    sport_key: String,
    #[serde(default)]
    sport_title: String,
    commence_time: DateTime<Utc>,
    #[serde(default)]
    home_team: String,
    #[serde(default)]
    away_team: String,
    #[serde(default)]
    bookmakers: Vec<Bookmaker>,
}

#[derive(Debug, Deserialize)]
struct Bookmaker {
    #[serde(default)]
    markets: Vec<BookMarket>,
}

#[derive(Debug, Deserialize)]
struct BookMarket {
    key: String,
    #[serde(default)]
    outcomes: Vec<OutcomePrice>,
}

#[derive(Debug, Deserialize)]
struct OutcomePrice {
    #[serde(default)]
    name: String,
    price: Option<f64>,
    #[serde(default)]
    point: Option<f64>,
}

/// One event on the score board.
#[derive(Debug, Deserialize)]
struct ScoreEvent {
    id: String,
    sport_key: String,
    #[serde(default)]
    sport_title: String,
    commence_time: DateTime<Utc>,
    #[serde(default)]
    completed: bool,
    #[serde(default)]
    home_team: String,
    #[serde(default)]
    away_team: String,
    #[serde(default)]
    scores: Option<Vec<TeamScore>>,
}

#[derive(Debug, Deserialize)]
struct TeamScore {
    #[serde(default)]
    name: String,
    score: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// the-odds-api HTTP client.
pub struct TheOddsApi {
    http: Client,
    base_url: String,
    api_key: String,
    /// Bookmaker region for odds requests, e.g. "us".
    region: String,
}

impl TheOddsApi {
    pub fn new(api_key: String, base_url: Option<String>, region: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("bookie/0.1.0 (betting-ledger)")
            .build()
            .context("Failed to build HTTP client for the-odds-api")?;

        Ok(Self {
            http,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            region: region.unwrap_or_else(|| "us".to_string()),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!(url = %url, "Fetching from the-odds-api");

        let resp = self
            .http
            .get(url)
            .query(&[("apiKey", self.api_key.as_str())])
            .send()
            .await
            .context("the-odds-api request failed")?;

        // Quota headers are the provider's own accounting; log them so the
        // governor's window budget can be tuned against reality.
        let used = header_value(&resp, "x-requests-used");
        let remaining = header_value(&resp, "x-requests-remaining");
        if used.is_some() || remaining.is_some() {
            info!(used = ?used, remaining = ?remaining, "the-odds-api quota");
        }

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("the-odds-api error {status}: {body}");
        }

        resp.json::<T>()
            .await
            .context("Failed to parse the-odds-api response")
    }

    // -- Normalization ---------------------------------------------------

    /// Map one odds-board event into a `Market`. The first bookmaker with
    /// priced markets wins; later books are ignored — one book is enough
    /// for a fictional-currency ledger.
    fn event_to_market(event: OddsEvent, now: DateTime<Utc>) -> Market {
        let mut quotes = HashMap::new();

        for bookmaker in &event.bookmakers {
            for market in &bookmaker.markets {
                match market.key.as_str() {
                    "h2h" if !quotes.contains_key(&Selection::Home) => {
                        for outcome in &market.outcomes {
                            let Some(price) = outcome.price else { continue };
                            let quote = Quote::from_american(price.round() as i32, None);
                            if outcome.name == event.home_team {
                                quotes.insert(Selection::Home, quote);
                            } else if outcome.name == event.away_team {
                                quotes.insert(Selection::Away, quote);
                            } else if outcome.name.eq_ignore_ascii_case("draw") {
                                quotes.insert(Selection::Draw, quote);
                            }
                        }
                    }
                    "spreads" if !quotes.contains_key(&Selection::SpreadHome) => {
                        for outcome in &market.outcomes {
                            let (Some(price), Some(point)) = (outcome.price, outcome.point) else {
                                continue;
                            };
                            let quote = Quote::from_american(price.round() as i32, Some(point));
                            if outcome.name == event.home_team {
                                quotes.insert(Selection::SpreadHome, quote);
                            } else if outcome.name == event.away_team {
                                quotes.insert(Selection::SpreadAway, quote);
                            }
                        }
                    }
                    "totals" if !quotes.contains_key(&Selection::Over) => {
                        for outcome in &market.outcomes {
                            let (Some(price), Some(point)) = (outcome.price, outcome.point) else {
                                continue;
                            };
                            let quote = Quote::from_american(price.round() as i32, Some(point));
                            if outcome.name.eq_ignore_ascii_case("over") {
                                quotes.insert(Selection::Over, quote);
                            } else if outcome.name.eq_ignore_ascii_case("under") {
                                quotes.insert(Selection::Under, quote);
                            }
                        }
                    }
                    _ => {}
                }
            }
            if !quotes.is_empty() {
                break;
            }
        }

        let status = if event.commence_time <= now {
            MarketStatus::Live
        } else {
            MarketStatus::Scheduled
        };

        Market {
            id: event.id,
            sport_key: event.sport_key,
            sport_title: event.sport_title,
            home_team: event.home_team,
            away_team: event.away_team,
            commence_time: event.commence_time,
            status,
            quotes,
            result: None,
        }
    }

    /// Map one score-board event into a `Market` carrying its result.
    fn score_to_market(event: ScoreEvent, now: DateTime<Utc>) -> Market {
        let mut home_score = None;
        let mut away_score = None;
        if let Some(scores) = &event.scores {
            for s in scores {
                let parsed = s.score.as_deref().and_then(parse_score);
                if s.name == event.home_team {
                    home_score = parsed;
                } else if s.name == event.away_team {
                    away_score = parsed;
                }
            }
        }

        let status = if event.completed {
            MarketStatus::Finished
        } else if event.commence_time <= now {
            MarketStatus::Live
        } else {
            MarketStatus::Scheduled
        };

        let result = if event.completed {
            Some(GameResult {
                home_score,
                away_score,
                winner: None,
            })
        } else {
            None
        };

        Market {
            id: event.id,
            sport_key: event.sport_key,
            sport_title: event.sport_title,
            home_team: event.home_team,
            away_team: event.away_team,
            commence_time: event.commence_time,
            status,
            quotes: HashMap::new(),
            result,
        }
    }
}

/// Parse a score string into an integer. Handles cricket-style scores
/// like "234/5" by taking the runs portion.
fn parse_score(raw: &str) -> Option<i64> {
    raw.split('/').next()?.trim().parse().ok()
}

fn header_value(resp: &reqwest::Response, name: &str) -> Option<String> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

#[async_trait]
impl OddsProvider for TheOddsApi {
    async fn fetch_odds(&self, sport: &str) -> Result<Vec<Market>> {
        let url = format!(
            "{}/sports/{}/odds?regions={}&markets=h2h,spreads,totals&oddsFormat=american",
            self.base_url,
            urlencoding::encode(sport),
            self.region,
        );
        let events: Vec<OddsEvent> = self.get_json(&url).await?;
        let now = Utc::now();
        Ok(events
            .into_iter()
            .map(|e| Self::event_to_market(e, now))
            .collect())
    }

    async fn fetch_scores(&self, sport: &str) -> Result<Vec<Market>> {
        let url = format!(
            "{}/sports/{}/scores?daysFrom={}",
            self.base_url,
            urlencoding::encode(sport),
            SCORES_DAYS_FROM,
        );
        let events: Vec<ScoreEvent> = self.get_json(&url).await?;
        let now = Utc::now();
        Ok(events
            .into_iter()
            .map(|e| Self::score_to_market(e, now))
            .collect())
    }

    fn name(&self) -> &str {
        PROVIDER_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn odds_event_json() -> serde_json::Value {
        serde_json::json!({
            "id": "evt-abc",
            "sport_key": "americanfootball_nfl",
            "sport_title": "NFL",
            "commence_time": "2030-01-15T23:00:00Z",
            "home_team": "Chiefs",
            "away_team": "Bills",
            "bookmakers": [{
                "key": "draftkings",
                "title": "DraftKings",
                "markets": [
                    {
                        "key": "h2h",
                        "outcomes": [
                            { "name": "Chiefs", "price": -120 },
                            { "name": "Bills", "price": 105 }
                        ]
                    },
                    {
                        "key": "spreads",
                        "outcomes": [
                            { "name": "Chiefs", "price": -110, "point": -2.5 },
                            { "name": "Bills", "price": -110, "point": 2.5 }
                        ]
                    },
                    {
                        "key": "totals",
                        "outcomes": [
                            { "name": "Over", "price": -105, "point": 47.5 },
                            { "name": "Under", "price": -115, "point": 47.5 }
                        ]
                    }
                ]
            }]
        })
    }

    #[test]
    fn test_event_parses_all_market_kinds() {
        let event: OddsEvent = serde_json::from_value(odds_event_json()).unwrap();
        let market = TheOddsApi::event_to_market(event, Utc::now());

        assert_eq!(market.id, "evt-abc");
        assert_eq!(market.status, MarketStatus::Scheduled);
        assert_eq!(market.quote(Selection::Home).unwrap().american, -120);
        assert_eq!(market.quote(Selection::Away).unwrap().american, 105);
        assert_eq!(market.quote(Selection::SpreadHome).unwrap().point, Some(-2.5));
        assert_eq!(market.quote(Selection::Over).unwrap().point, Some(47.5));
        assert_eq!(market.quote(Selection::Under).unwrap().american, -115);
        assert!(market.quote(Selection::Draw).is_none());
    }

    #[test]
    fn test_event_with_draw_outcome() {
        let mut json = odds_event_json();
        json["bookmakers"][0]["markets"][0]["outcomes"]
            .as_array_mut()
            .unwrap()
            .push(serde_json::json!({ "name": "Draw", "price": 220 }));
        let event: OddsEvent = serde_json::from_value(json).unwrap();
        let market = TheOddsApi::event_to_market(event, Utc::now());
        assert_eq!(market.quote(Selection::Draw).unwrap().american, 220);
    }

    #[test]
    fn test_event_without_bookmakers_has_no_quotes() {
        let mut json = odds_event_json();
        json["bookmakers"] = serde_json::json!([]);
        let event: OddsEvent = serde_json::from_value(json).unwrap();
        let market = TheOddsApi::event_to_market(event, Utc::now());
        assert!(market.quotes.is_empty());
    }

    #[test]
    fn test_started_event_is_live() {
        let mut json = odds_event_json();
        json["commence_time"] = serde_json::json!("2020-01-01T00:00:00Z");
        let event: OddsEvent = serde_json::from_value(json).unwrap();
        let market = TheOddsApi::event_to_market(event, Utc::now());
        assert_eq!(market.status, MarketStatus::Live);
    }

    #[test]
    fn test_score_event_completed() {
        let json = serde_json::json!({
            "id": "evt-abc",
            "sport_key": "americanfootball_nfl",
            "sport_title": "NFL",
            "commence_time": "2020-01-01T00:00:00Z",
            "completed": true,
            "home_team": "Chiefs",
            "away_team": "Bills",
            "scores": [
                { "name": "Chiefs", "score": "27" },
                { "name": "Bills", "score": "24" }
            ]
        });
        let event: ScoreEvent = serde_json::from_value(json).unwrap();
        let market = TheOddsApi::score_to_market(event, Utc::now());

        assert_eq!(market.status, MarketStatus::Finished);
        let result = market.result.unwrap();
        assert_eq!(result.home_score, Some(27));
        assert_eq!(result.away_score, Some(24));
        assert_eq!(result.moneyline_winner(), Some(Selection::Home));
    }

    #[test]
    fn test_score_event_in_progress_has_no_result() {
        let json = serde_json::json!({
            "id": "evt-abc",
            "sport_key": "cricket_ipl",
            "commence_time": "2020-01-01T00:00:00Z",
            "completed": false,
            "home_team": "A",
            "away_team": "B",
            "scores": [
                { "name": "A", "score": "101" },
                { "name": "B", "score": "88" }
            ]
        });
        let event: ScoreEvent = serde_json::from_value(json).unwrap();
        let market = TheOddsApi::score_to_market(event, Utc::now());
        assert_eq!(market.status, MarketStatus::Live);
        assert!(market.result.is_none());
    }

    #[test]
    fn test_parse_score_plain_and_cricket() {
        assert_eq!(parse_score("27"), Some(27));
        assert_eq!(parse_score("234/5"), Some(234));
        assert_eq!(parse_score(" 7 "), Some(7));
        assert_eq!(parse_score("n/a"), None);
        assert_eq!(parse_score(""), None);
    }

    #[test]
    fn test_client_name() {
        let client = TheOddsApi::new("key".into(), None, None).unwrap();
        assert_eq!(client.name(), "the-odds-api");
    }
}
