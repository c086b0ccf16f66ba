//! Bet placement, parlay building, cancellation, and account queries.
//!
//! Every placement pairs the wallet debit and the bet insert in one
//! transaction; every cancellation pairs the guarded status flip with the
//! refund. Odds are snapshotted here and never re-read afterwards.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::settlement::{self, Disposition, MarketResolution};
use crate::ledger::WalletLedger;
use crate::market::MarketCache;
use crate::storage::{self, Store};
use crate::types::{
    Bet, BetStatus, EngineError, GameResult, LegStatus, Parlay, ParlayLeg, Selection, Wallet,
};

/// One requested parlay leg, before validation and odds lookup.
#[derive(Debug, Clone)]
pub struct LegSpec {
    pub sport_key: String,
    pub market_id: String,
    pub selection: Selection,
}

pub struct BetEngine {
    store: Store,
    ledger: Arc<WalletLedger>,
    cache: Arc<MarketCache>,
    /// Oldest odds snapshot a placement will accept.
    placement_max_age: Duration,
    max_parlay_legs: usize,
}

impl BetEngine {
    pub fn new(
        store: Store,
        ledger: Arc<WalletLedger>,
        cache: Arc<MarketCache>,
        placement_max_age: Duration,
        max_parlay_legs: usize,
    ) -> Self {
        Self {
            store,
            ledger,
            cache,
            placement_max_age,
            max_parlay_legs,
        }
    }

    // -- Placement -------------------------------------------------------

    /// Place a single bet: validate the market and quote, debit the stake,
    /// and persist the bet with its odds locked.
    pub async fn place_bet(
        &self,
        user_id: i64,
        sport_key: &str,
        market_id: &str,
        selection: Selection,
        amount: i64,
    ) -> Result<Bet, EngineError> {
        if amount <= 0 {
            return Err(EngineError::InvalidStake(amount));
        }
        let now = Utc::now();
        let mut bet = self
            .validated_leg(sport_key, market_id, selection, now)
            .await?;
        bet.user_id = user_id;
        bet.amount = amount;
        bet.placed_at = now;

        let mut tx = self.store.pool().begin().await?;
        self.ledger.debit_in(&mut tx, user_id, amount).await?;
        bet.id = storage::insert_bet_in(&mut tx, &bet).await?;
        tx.commit().await?;

        info!(
            bet_id = bet.id,
            user_id,
            market_id,
            selection = %selection,
            amount,
            odds = bet.odds,
            "Placed bet"
        );
        Ok(bet)
    }

    /// Build a parlay: validate every leg, combine odds as a product, and
    /// persist the parlay with one debit.
    pub async fn build_parlay(
        &self,
        user_id: i64,
        specs: &[LegSpec],
        amount: i64,
    ) -> Result<Parlay, EngineError> {
        if amount <= 0 {
            return Err(EngineError::InvalidStake(amount));
        }
        if specs.len() < 2 {
            return Err(EngineError::TooFewLegs);
        }
        if specs.len() > self.max_parlay_legs {
            return Err(EngineError::TooManyLegs(self.max_parlay_legs));
        }

        let mut seen = HashSet::new();
        for spec in specs {
            if !seen.insert((spec.sport_key.as_str(), spec.market_id.as_str())) {
                return Err(EngineError::DuplicateLeg(spec.market_id.clone()));
            }
        }

        let now = Utc::now();
        let mut legs = Vec::with_capacity(specs.len());
        for spec in specs {
            let bet = self
                .validated_leg(&spec.sport_key, &spec.market_id, spec.selection, now)
                .await?;
            legs.push(ParlayLeg {
                id: 0,
                parlay_id: 0,
                market_id: bet.market_id,
                sport_key: bet.sport_key,
                commence_time: bet.commence_time,
                selection: bet.selection,
                point: bet.point,
                odds: bet.odds,
                status: LegStatus::Pending,
            });
        }

        let mut parlay = Parlay {
            id: 0,
            user_id,
            amount,
            status: BetStatus::Pending,
            payout: 0,
            placed_at: now,
            resolved_at: None,
            legs,
        };

        let mut tx = self.store.pool().begin().await?;
        self.ledger.debit_in(&mut tx, user_id, amount).await?;
        parlay.id = storage::insert_parlay_in(&mut tx, &parlay).await?;
        tx.commit().await?;

        info!(
            parlay_id = parlay.id,
            user_id,
            legs = parlay.legs.len(),
            amount,
            combined_odds = parlay.combined_odds(),
            "Built parlay"
        );
        Ok(parlay)
    }

    /// Validate one market/selection and return a bet skeleton carrying the
    /// locked quote. Stake and ownership are filled in by the caller.
    async fn validated_leg(
        &self,
        sport_key: &str,
        market_id: &str,
        selection: Selection,
        now: DateTime<Utc>,
    ) -> Result<Bet, EngineError> {
        let snap = self
            .cache
            .market_fresh(sport_key, market_id, self.placement_max_age)
            .await?;
        if !snap.market.is_open(now) {
            return Err(EngineError::MarketClosed(market_id.to_string()));
        }
        // A denied or failed refresh serves the old board; odds that old
        // are not lockable.
        if snap.age > self.placement_max_age {
            return Err(EngineError::OddsUnavailable(market_id.to_string()));
        }
        let quote = snap
            .market
            .quote(selection)
            .ok_or_else(|| EngineError::InvalidSelection {
                market: market_id.to_string(),
                selection,
            })?;
        if selection.needs_point() && quote.point.is_none() {
            return Err(EngineError::OddsUnavailable(market_id.to_string()));
        }

        let bet = Bet {
            id: 0,
            user_id: 0,
            market_id: market_id.to_string(),
            sport_key: sport_key.to_string(),
            commence_time: snap.market.commence_time,
            selection,
            point: quote.point,
            amount: 0,
            odds: quote.decimal,
            status: BetStatus::Pending,
            payout: 0,
            placed_at: now,
            resolved_at: None,
        };
        Ok(bet)
    }

    // -- Cancellation ----------------------------------------------------

    /// Cancel a pending bet before its market starts; full refund.
    pub async fn cancel_bet(&self, user_id: i64, bet_id: i64) -> Result<Bet, EngineError> {
        let bet = self
            .store
            .bet(bet_id)
            .await?
            .ok_or(EngineError::NotFound(bet_id))?;
        if bet.user_id != user_id {
            return Err(EngineError::NotOwner);
        }
        if bet.status != BetStatus::Pending {
            return Err(EngineError::NotPending);
        }
        let now = Utc::now();
        if bet.commence_time <= now {
            return Err(EngineError::AlreadyStarted);
        }

        let mut tx = self.store.pool().begin().await?;
        let changed =
            storage::mark_bet_in(&mut tx, bet_id, BetStatus::Cancelled, bet.amount, now).await?;
        if changed == 0 {
            // Raced a settlement or another cancel.
            return Err(EngineError::NotPending);
        }
        self.ledger.credit_in(&mut tx, user_id, bet.amount).await?;
        tx.commit().await?;

        info!(bet_id, user_id, refund = bet.amount, "Cancelled bet");
        self.store.bet(bet_id).await?.ok_or(EngineError::NotFound(bet_id))
    }

    /// Cancel a pending parlay; refused once any leg's market has started.
    pub async fn cancel_parlay(&self, user_id: i64, parlay_id: i64) -> Result<Parlay, EngineError> {
        let parlay = self
            .store
            .parlay(parlay_id)
            .await?
            .ok_or(EngineError::NotFound(parlay_id))?;
        if parlay.user_id != user_id {
            return Err(EngineError::NotOwner);
        }
        if parlay.status != BetStatus::Pending {
            return Err(EngineError::NotPending);
        }
        let now = Utc::now();
        if parlay.legs.iter().any(|l| l.commence_time <= now) {
            return Err(EngineError::AlreadyStarted);
        }

        let mut tx = self.store.pool().begin().await?;
        let changed =
            storage::mark_parlay_in(&mut tx, parlay_id, BetStatus::Cancelled, parlay.amount, now)
                .await?;
        if changed == 0 {
            return Err(EngineError::NotPending);
        }
        self.ledger
            .credit_in(&mut tx, user_id, parlay.amount)
            .await?;
        tx.commit().await?;

        info!(parlay_id, user_id, refund = parlay.amount, "Cancelled parlay");
        self.store
            .parlay(parlay_id)
            .await?
            .ok_or(EngineError::NotFound(parlay_id))
    }

    // -- Queries ---------------------------------------------------------

    pub async fn balance(&self, user_id: i64) -> Result<i64, EngineError> {
        self.ledger.balance(user_id).await
    }

    pub async fn pending_bets(&self, user_id: i64) -> Result<Vec<Bet>, EngineError> {
        Ok(self.store.user_pending_bets(user_id).await?)
    }

    pub async fn bet_history(&self, user_id: i64, limit: i64) -> Result<Vec<Bet>, EngineError> {
        Ok(self.store.user_bet_history(user_id, limit).await?)
    }

    pub async fn pending_parlays(&self, user_id: i64) -> Result<Vec<Parlay>, EngineError> {
        Ok(self.store.user_pending_parlays(user_id).await?)
    }

    pub async fn parlay_history(&self, user_id: i64, limit: i64) -> Result<Vec<Parlay>, EngineError> {
        Ok(self.store.user_parlay_history(user_id, limit).await?)
    }

    /// Richest wallets first.
    pub async fn leaderboard(&self, limit: i64) -> Result<Vec<Wallet>, EngineError> {
        Ok(self.store.top_wallets(limit).await?)
    }

    // -- Admin -----------------------------------------------------------

    /// Manually resolve a market with a known final score, for games the
    /// provider misreports or never finalizes. Drives the same guarded
    /// settlement path as the loop.
    pub async fn resolve_market(
        &self,
        sport_key: &str,
        market_id: &str,
        home_score: i64,
        away_score: i64,
    ) -> Result<MarketResolution, EngineError> {
        let result = GameResult::from_scores(home_score, away_score);
        settlement::resolve_market(
            &self.store,
            &self.ledger,
            sport_key,
            market_id,
            Disposition::Finished(result),
            Utc::now(),
        )
        .await
    }

    /// Manually void a market: every pending bet refunds, every pending
    /// leg voids and drops from its parlay's odds product.
    pub async fn void_market(
        &self,
        sport_key: &str,
        market_id: &str,
    ) -> Result<MarketResolution, EngineError> {
        settlement::resolve_market(
            &self.store,
            &self.ledger,
            sport_key,
            market_id,
            Disposition::Cancelled,
            Utc::now(),
        )
        .await
    }

    /// Reset every wallet to `amount` (season reset).
    pub async fn reset_all(&self, amount: i64) -> Result<u64, EngineError> {
        self.ledger.reset_all(amount).await
    }

    /// Scale every balance by `factor` (economy rebalance).
    pub async fn adjust_all(&self, factor: f64) -> Result<u64, EngineError> {
        self.ledger.adjust_all(factor).await
    }
}
