//! Periodic settlement of pending bets against finished markets.
//!
//! A cycle is conservative by construction: it only spends quota on sports
//! that still carry unresolved money, defers anything whose data is too
//! stale to trust, and pays out through guarded status transitions
//! co-transacted with the wallet credit. Re-running a cycle, or two cycles
//! overlapping, changes nothing a completed cycle already settled.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::ledger::WalletLedger;
use crate::market::MarketCache;
use crate::odds;
use crate::storage::{self, Store};
use crate::types::{
    BetStatus, EngineError, GameResult, LegStatus, MarketStatus, Selection,
};

// ---------------------------------------------------------------------------
// Outcome determination (pure)
// ---------------------------------------------------------------------------

/// How a single selection fared against a final result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Won,
    Lost,
    /// Landed exactly on the line: stake refunded.
    Push,
}

/// Grade a selection against a final result. `None` means the result does
/// not carry enough information yet; the bet stays pending.
///
/// A level moneyline score is a win for `Draw` and a push for `Home`/`Away`.
pub fn settle_selection(
    selection: Selection,
    point: Option<f64>,
    result: &GameResult,
) -> Option<Outcome> {
    match selection {
        Selection::Home | Selection::Away | Selection::Draw => {
            let winner = result.moneyline_winner()?;
            Some(if winner == selection {
                Outcome::Won
            } else if winner == Selection::Draw {
                Outcome::Push
            } else {
                Outcome::Lost
            })
        }
        Selection::SpreadHome | Selection::SpreadAway => {
            let (home, away) = (result.home_score?, result.away_score?);
            let line = point?;
            let margin = match selection {
                Selection::SpreadHome => home as f64 + line - away as f64,
                _ => away as f64 + line - home as f64,
            };
            Some(grade_margin(margin))
        }
        Selection::Over | Selection::Under => {
            let total = (result.home_score? + result.away_score?) as f64;
            let line = point?;
            let margin = match selection {
                Selection::Over => total - line,
                _ => line - total,
            };
            Some(grade_margin(margin))
        }
    }
}

fn grade_margin(margin: f64) -> Outcome {
    if margin > 0.0 {
        Outcome::Won
    } else if margin < 0.0 {
        Outcome::Lost
    } else {
        Outcome::Push
    }
}

// ---------------------------------------------------------------------------
// Market resolution
// ---------------------------------------------------------------------------

/// Why a market is being resolved.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Disposition {
    /// Final result known: grade each selection.
    Finished(GameResult),
    /// Market cancelled: everything voids with a full refund.
    Cancelled,
}

/// Tally from resolving one market.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarketResolution {
    pub bets_won: u64,
    pub bets_lost: u64,
    pub bets_voided: u64,
    pub parlays_settled: u64,
    pub total_paid: i64,
}

impl MarketResolution {
    fn settled_anything(&self) -> bool {
        self.bets_won + self.bets_lost + self.bets_voided + self.parlays_settled > 0
    }
}

/// Resolve every pending bet and parlay leg on one market, inside one
/// transaction. Guarded transitions make this safe to call again with the
/// same arguments: already-resolved rows match nothing and pay nothing.
pub(crate) async fn resolve_market(
    store: &Store,
    ledger: &WalletLedger,
    sport_key: &str,
    market_id: &str,
    disposition: Disposition,
    now: DateTime<Utc>,
) -> Result<MarketResolution, EngineError> {
    let bets = store.pending_bets_for_market(sport_key, market_id).await?;
    let legs = store.pending_legs_for_market(sport_key, market_id).await?;
    if bets.is_empty() && legs.is_empty() {
        return Ok(MarketResolution::default());
    }

    let mut stats = MarketResolution::default();
    let mut tx = store.pool().begin().await?;

    // Single bets: grade, transition, credit — all under the guard.
    for bet in &bets {
        let graded = match disposition {
            Disposition::Cancelled => Some((BetStatus::Void, bet.amount)),
            Disposition::Finished(result) => {
                settle_selection(bet.selection, bet.point, &result).map(|o| match o {
                    Outcome::Won => (BetStatus::Won, bet.payout_if_won()),
                    Outcome::Lost => (BetStatus::Lost, 0),
                    Outcome::Push => (BetStatus::Void, bet.amount),
                })
            }
        };
        let Some((status, payout)) = graded else {
            debug!(bet_id = bet.id, market_id, "Result incomplete, bet stays pending");
            continue;
        };

        let changed = storage::mark_bet_in(&mut tx, bet.id, status, payout, now).await?;
        if changed == 0 {
            continue;
        }
        if payout > 0 {
            ledger.credit_in(&mut tx, bet.user_id, payout).await?;
            stats.total_paid += payout;
        }
        match status {
            BetStatus::Won => stats.bets_won += 1,
            BetStatus::Lost => stats.bets_lost += 1,
            _ => stats.bets_voided += 1,
        }
        debug!(bet_id = bet.id, user_id = bet.user_id, status = %status, payout, "Settled bet");
    }

    // Parlay legs on this market, then any parlay they complete.
    let mut touched_parlays = Vec::new();
    for leg in &legs {
        let status = match disposition {
            Disposition::Cancelled => Some(LegStatus::Void),
            Disposition::Finished(result) => {
                settle_selection(leg.selection, leg.point, &result).map(|o| match o {
                    Outcome::Won => LegStatus::Won,
                    Outcome::Lost => LegStatus::Lost,
                    Outcome::Push => LegStatus::Void,
                })
            }
        };
        let Some(status) = status else { continue };

        if storage::mark_leg_in(&mut tx, leg.id, status).await? > 0
            && !touched_parlays.contains(&leg.parlay_id)
        {
            touched_parlays.push(leg.parlay_id);
        }
    }

    for parlay_id in touched_parlays {
        let Some(parlay) = storage::parlay_with_legs_in(&mut tx, parlay_id).await? else {
            continue;
        };
        if parlay.status != BetStatus::Pending {
            continue;
        }

        let any_lost = parlay.legs.iter().any(|l| l.status == LegStatus::Lost);
        let any_pending = parlay.legs.iter().any(|l| l.status == LegStatus::Pending);
        let all_void = parlay.legs.iter().all(|l| l.status == LegStatus::Void);

        // A single lost leg sinks the parlay immediately; otherwise wait
        // for every leg to resolve.
        let (status, payout) = if any_lost {
            (BetStatus::Lost, 0)
        } else if any_pending {
            continue;
        } else if all_void {
            (BetStatus::Void, parlay.amount)
        } else {
            (
                BetStatus::Won,
                odds::payout(parlay.amount, parlay.combined_odds()),
            )
        };

        let changed = storage::mark_parlay_in(&mut tx, parlay_id, status, payout, now).await?;
        if changed == 0 {
            continue;
        }
        if payout > 0 {
            ledger.credit_in(&mut tx, parlay.user_id, payout).await?;
            stats.total_paid += payout;
        }
        stats.parlays_settled += 1;
        info!(parlay_id, user_id = parlay.user_id, status = %status, payout, "Settled parlay");
    }

    tx.commit().await?;
    Ok(stats)
}

// ---------------------------------------------------------------------------
// Settlement loop body
// ---------------------------------------------------------------------------

/// Counters for one settlement cycle, logged at the end of each pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct CycleReport {
    pub sports_checked: u64,
    pub markets_settled: u64,
    pub bets_won: u64,
    pub bets_lost: u64,
    pub bets_voided: u64,
    pub parlays_settled: u64,
    pub deferred: u64,
    pub total_paid: i64,
}

impl CycleReport {
    fn absorb(&mut self, r: &MarketResolution) {
        self.bets_won += r.bets_won;
        self.bets_lost += r.bets_lost;
        self.bets_voided += r.bets_voided;
        self.parlays_settled += r.parlays_settled;
        self.total_paid += r.total_paid;
        if r.settled_anything() {
            self.markets_settled += 1;
        }
    }
}

pub struct Settler {
    store: Store,
    ledger: Arc<WalletLedger>,
    cache: Arc<MarketCache>,
    /// Score boards older than this are not trusted for payouts; the
    /// sport is deferred to the next cycle instead.
    settle_max_age: Duration,
}

impl Settler {
    pub fn new(
        store: Store,
        ledger: Arc<WalletLedger>,
        cache: Arc<MarketCache>,
        settle_max_age: Duration,
    ) -> Self {
        Self {
            store,
            ledger,
            cache,
            settle_max_age,
        }
    }

    /// One settlement pass. Never fails: a sport or market that cannot be
    /// settled right now is logged and deferred to the next cycle.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();
        let now = Utc::now();

        let sports = match self.store.pending_sports().await {
            Ok(sports) => sports,
            Err(err) => {
                error!(error = %err, "Could not enumerate sports with pending bets");
                return report;
            }
        };
        if sports.is_empty() {
            debug!("No pending bets, nothing to settle");
            return report;
        }

        for sport in &sports {
            report.sports_checked += 1;
            let board = match self.cache.scores(sport).await {
                Ok(board) => board,
                Err(err) => {
                    warn!(sport, error = %err, "No score data, deferring sport");
                    report.deferred += 1;
                    continue;
                }
            };
            if board.stale && board.age > self.settle_max_age {
                warn!(
                    sport,
                    age_secs = board.age.as_secs(),
                    "Score board too stale to pay out, deferring sport"
                );
                report.deferred += 1;
                continue;
            }

            let market_ids = match self.store.pending_markets_for_sport(sport).await {
                Ok(ids) => ids,
                Err(err) => {
                    error!(sport, error = %err, "Could not list pending markets, deferring sport");
                    report.deferred += 1;
                    continue;
                }
            };

            for market_id in &market_ids {
                let disposition = match board.markets.get(market_id) {
                    Some(m) if m.status == MarketStatus::Cancelled => Disposition::Cancelled,
                    Some(m) if m.status == MarketStatus::Finished && m.has_started(now) => {
                        match m.result {
                            Some(result) => Disposition::Finished(result),
                            None => {
                                debug!(market_id, "Finished without a result yet, deferring");
                                report.deferred += 1;
                                continue;
                            }
                        }
                    }
                    Some(_) => continue, // not finished yet
                    None => {
                        debug!(sport, market_id, "Market absent from score board, deferring");
                        report.deferred += 1;
                        continue;
                    }
                };

                match resolve_market(&self.store, &self.ledger, sport, market_id, disposition, now)
                    .await
                {
                    Ok(stats) => report.absorb(&stats),
                    Err(err) => {
                        error!(sport, market_id, error = %err, "Market resolution failed, deferring");
                        report.deferred += 1;
                    }
                }
            }
        }

        info!(
            sports_checked = report.sports_checked,
            markets_settled = report.markets_settled,
            bets_won = report.bets_won,
            bets_lost = report.bets_lost,
            bets_voided = report.bets_voided,
            parlays_settled = report.parlays_settled,
            deferred = report.deferred,
            total_paid = report.total_paid,
            "Settlement cycle complete"
        );
        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn result(home: i64, away: i64) -> GameResult {
        GameResult::from_scores(home, away)
    }

    // -- settle_selection --

    #[test]
    fn test_moneyline_grading() {
        let r = result(27, 24);
        assert_eq!(settle_selection(Selection::Home, None, &r), Some(Outcome::Won));
        assert_eq!(settle_selection(Selection::Away, None, &r), Some(Outcome::Lost));
        assert_eq!(settle_selection(Selection::Draw, None, &r), Some(Outcome::Lost));
    }

    #[test]
    fn test_level_score_pushes_sides_and_pays_draw() {
        let r = result(21, 21);
        assert_eq!(settle_selection(Selection::Home, None, &r), Some(Outcome::Push));
        assert_eq!(settle_selection(Selection::Away, None, &r), Some(Outcome::Push));
        assert_eq!(settle_selection(Selection::Draw, None, &r), Some(Outcome::Won));
    }

    #[test]
    fn test_explicit_winner_beats_scores() {
        let r = GameResult {
            home_score: Some(10),
            away_score: Some(20),
            winner: Some(Selection::Home),
        };
        assert_eq!(settle_selection(Selection::Home, None, &r), Some(Outcome::Won));
    }

    #[test]
    fn test_spread_grading() {
        // Home favored by 2.5, wins by 3: covers.
        let r = result(27, 24);
        assert_eq!(
            settle_selection(Selection::SpreadHome, Some(-2.5), &r),
            Some(Outcome::Won)
        );
        assert_eq!(
            settle_selection(Selection::SpreadAway, Some(2.5), &r),
            Some(Outcome::Lost)
        );
        // Wins by exactly the whole-number line: push both ways.
        assert_eq!(
            settle_selection(Selection::SpreadHome, Some(-3.0), &r),
            Some(Outcome::Push)
        );
        assert_eq!(
            settle_selection(Selection::SpreadAway, Some(3.0), &r),
            Some(Outcome::Push)
        );
    }

    #[test]
    fn test_total_grading() {
        let r = result(27, 24); // total 51
        assert_eq!(
            settle_selection(Selection::Over, Some(47.5), &r),
            Some(Outcome::Won)
        );
        assert_eq!(
            settle_selection(Selection::Under, Some(47.5), &r),
            Some(Outcome::Lost)
        );
        assert_eq!(
            settle_selection(Selection::Over, Some(51.0), &r),
            Some(Outcome::Push)
        );
        assert_eq!(
            settle_selection(Selection::Under, Some(51.0), &r),
            Some(Outcome::Push)
        );
    }

    #[test]
    fn test_incomplete_result_defers() {
        let r = GameResult {
            home_score: Some(27),
            away_score: None,
            winner: None,
        };
        assert_eq!(settle_selection(Selection::Home, None, &r), None);
        assert_eq!(settle_selection(Selection::Over, Some(40.0), &r), None);
        // Spread without a stored line cannot be graded either.
        assert_eq!(
            settle_selection(Selection::SpreadHome, None, &result(1, 0)),
            None
        );
    }
}
