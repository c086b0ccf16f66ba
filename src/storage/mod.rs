//! SQLite persistence for wallets, bets, and parlays.
//!
//! All SQL lives here. Mutations that must be atomic with a wallet
//! movement are exposed as `_in` functions over a raw connection so the
//! calling layer can compose them inside one transaction. Status
//! transitions are guarded (`WHERE status = 'pending'`), which is what
//! makes settlement idempotent: a replayed transition matches zero rows
//! and pays nothing twice.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

use crate::types::{Bet, BetStatus, LegStatus, Parlay, ParlayLeg, Wallet};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS wallets (
    user_id   INTEGER PRIMARY KEY,
    balance   INTEGER NOT NULL CHECK (balance >= 0)
);

CREATE TABLE IF NOT EXISTS bets (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id       INTEGER NOT NULL,
    market_id     TEXT    NOT NULL,
    sport_key     TEXT    NOT NULL,
    commence_time TEXT    NOT NULL,
    selection     TEXT    NOT NULL,
    point         REAL,
    amount        INTEGER NOT NULL,
    odds          REAL    NOT NULL,
    status        TEXT    NOT NULL DEFAULT 'pending',
    payout        INTEGER NOT NULL DEFAULT 0,
    placed_at     TEXT    NOT NULL,
    resolved_at   TEXT
);

CREATE TABLE IF NOT EXISTS parlays (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     INTEGER NOT NULL,
    amount      INTEGER NOT NULL,
    status      TEXT    NOT NULL DEFAULT 'pending',
    payout      INTEGER NOT NULL DEFAULT 0,
    placed_at   TEXT    NOT NULL,
    resolved_at TEXT
);

CREATE TABLE IF NOT EXISTS parlay_legs (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    parlay_id     INTEGER NOT NULL REFERENCES parlays(id),
    market_id     TEXT    NOT NULL,
    sport_key     TEXT    NOT NULL,
    commence_time TEXT    NOT NULL,
    selection     TEXT    NOT NULL,
    point         REAL,
    odds          REAL    NOT NULL,
    status        TEXT    NOT NULL DEFAULT 'pending'
);

CREATE INDEX IF NOT EXISTS idx_bets_user    ON bets (user_id, status);
CREATE INDEX IF NOT EXISTS idx_bets_market  ON bets (sport_key, market_id, status);
CREATE INDEX IF NOT EXISTS idx_legs_market  ON parlay_legs (sport_key, market_id, status);
CREATE INDEX IF NOT EXISTS idx_legs_parlay  ON parlay_legs (parlay_id);
"#;

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if needed) the database at `path` and apply the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to open SQLite database")?;

        let store = Self { pool };
        store.init().await?;
        info!(path = %path.as_ref().display(), "Database ready");
        Ok(store)
    }

    /// In-memory database for tests. Pinned to one connection so the
    /// database outlives individual checkouts.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory SQLite database")?;

        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .context("Failed to apply database schema")?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // -- Bets ------------------------------------------------------------

    pub async fn bet(&self, id: i64) -> sqlx::Result<Option<Bet>> {
        sqlx::query("SELECT * FROM bets WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| bet_from_row(&row))
            .transpose()
    }

    pub async fn pending_bets_for_market(
        &self,
        sport_key: &str,
        market_id: &str,
    ) -> sqlx::Result<Vec<Bet>> {
        let rows = sqlx::query(
            "SELECT * FROM bets WHERE sport_key = ? AND market_id = ? AND status = 'pending'",
        )
        .bind(sport_key)
        .bind(market_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(bet_from_row).collect()
    }

    pub async fn user_pending_bets(&self, user_id: i64) -> sqlx::Result<Vec<Bet>> {
        let rows = sqlx::query(
            "SELECT * FROM bets WHERE user_id = ? AND status = 'pending' ORDER BY placed_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(bet_from_row).collect()
    }

    pub async fn user_bet_history(&self, user_id: i64, limit: i64) -> sqlx::Result<Vec<Bet>> {
        let rows = sqlx::query(
            "SELECT * FROM bets WHERE user_id = ? AND status != 'pending' \
             ORDER BY resolved_at DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(bet_from_row).collect()
    }

    // -- Parlays ---------------------------------------------------------

    pub async fn parlay(&self, id: i64) -> sqlx::Result<Option<Parlay>> {
        let mut conn = self.pool.acquire().await?;
        parlay_with_legs_in(&mut conn, id).await
    }

    pub async fn pending_legs_for_market(
        &self,
        sport_key: &str,
        market_id: &str,
    ) -> sqlx::Result<Vec<ParlayLeg>> {
        let rows = sqlx::query(
            "SELECT l.* FROM parlay_legs l \
             JOIN parlays p ON p.id = l.parlay_id \
             WHERE l.sport_key = ? AND l.market_id = ? \
               AND l.status = 'pending' AND p.status = 'pending'",
        )
        .bind(sport_key)
        .bind(market_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(leg_from_row).collect()
    }

    pub async fn user_pending_parlays(&self, user_id: i64) -> sqlx::Result<Vec<Parlay>> {
        let ids: Vec<i64> = sqlx::query(
            "SELECT id FROM parlays WHERE user_id = ? AND status = 'pending' ORDER BY placed_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| row.get("id"))
        .collect();

        let mut parlays = Vec::with_capacity(ids.len());
        let mut conn = self.pool.acquire().await?;
        for id in ids {
            if let Some(parlay) = parlay_with_legs_in(&mut conn, id).await? {
                parlays.push(parlay);
            }
        }
        Ok(parlays)
    }

    pub async fn user_parlay_history(&self, user_id: i64, limit: i64) -> sqlx::Result<Vec<Parlay>> {
        let ids: Vec<i64> = sqlx::query(
            "SELECT id FROM parlays WHERE user_id = ? AND status != 'pending' \
             ORDER BY resolved_at DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| row.get("id"))
        .collect();

        let mut parlays = Vec::with_capacity(ids.len());
        let mut conn = self.pool.acquire().await?;
        for id in ids {
            if let Some(parlay) = parlay_with_legs_in(&mut conn, id).await? {
                parlays.push(parlay);
            }
        }
        Ok(parlays)
    }

    /// Sports that still carry unresolved money, in placement order.
    /// The settlement loop only spends quota on these.
    pub async fn pending_sports(&self) -> sqlx::Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT sport_key, MIN(placed_at) AS first FROM ( \
                 SELECT sport_key, placed_at FROM bets WHERE status = 'pending' \
                 UNION ALL \
                 SELECT l.sport_key, p.placed_at FROM parlay_legs l \
                 JOIN parlays p ON p.id = l.parlay_id \
                 WHERE l.status = 'pending' AND p.status = 'pending' \
             ) GROUP BY sport_key ORDER BY first",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|row| row.get("sport_key")).collect())
    }

    /// Markets in a sport that still have pending bets or parlay legs.
    pub async fn pending_markets_for_sport(&self, sport_key: &str) -> sqlx::Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT market_id FROM ( \
                 SELECT market_id FROM bets WHERE sport_key = ?1 AND status = 'pending' \
                 UNION \
                 SELECT l.market_id FROM parlay_legs l \
                 JOIN parlays p ON p.id = l.parlay_id \
                 WHERE l.sport_key = ?1 AND l.status = 'pending' AND p.status = 'pending' \
             )",
        )
        .bind(sport_key)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|row| row.get("market_id")).collect())
    }

    // -- Wallets ---------------------------------------------------------

    pub async fn top_wallets(&self, limit: i64) -> sqlx::Result<Vec<Wallet>> {
        let rows = sqlx::query(
            "SELECT user_id, balance FROM wallets ORDER BY balance DESC, user_id LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| Wallet {
                user_id: row.get("user_id"),
                balance: row.get("balance"),
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Transaction-scoped writes
// ---------------------------------------------------------------------------

/// Insert a bet row (the `id` field of `bet` is ignored). Returns the new id.
pub(crate) async fn insert_bet_in(conn: &mut SqliteConnection, bet: &Bet) -> sqlx::Result<i64> {
    let result = sqlx::query(
        "INSERT INTO bets \
         (user_id, market_id, sport_key, commence_time, selection, point, \
          amount, odds, status, payout, placed_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(bet.user_id)
    .bind(&bet.market_id)
    .bind(&bet.sport_key)
    .bind(bet.commence_time)
    .bind(bet.selection.as_str())
    .bind(bet.point)
    .bind(bet.amount)
    .bind(bet.odds)
    .bind(bet.status.as_str())
    .bind(bet.payout)
    .bind(bet.placed_at)
    .execute(conn)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Insert a parlay and its legs. Returns the new parlay id.
pub(crate) async fn insert_parlay_in(
    conn: &mut SqliteConnection,
    parlay: &Parlay,
) -> sqlx::Result<i64> {
    let result = sqlx::query(
        "INSERT INTO parlays (user_id, amount, status, payout, placed_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(parlay.user_id)
    .bind(parlay.amount)
    .bind(parlay.status.as_str())
    .bind(parlay.payout)
    .bind(parlay.placed_at)
    .execute(&mut *conn)
    .await?;
    let parlay_id = result.last_insert_rowid();

    for leg in &parlay.legs {
        sqlx::query(
            "INSERT INTO parlay_legs \
             (parlay_id, market_id, sport_key, commence_time, selection, point, odds, status) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(parlay_id)
        .bind(&leg.market_id)
        .bind(&leg.sport_key)
        .bind(leg.commence_time)
        .bind(leg.selection.as_str())
        .bind(leg.point)
        .bind(leg.odds)
        .bind(leg.status.as_str())
        .execute(&mut *conn)
        .await?;
    }
    Ok(parlay_id)
}

/// Move a pending bet to a terminal status. Returns the number of rows
/// changed: zero means the bet was already resolved and nothing happened.
pub(crate) async fn mark_bet_in(
    conn: &mut SqliteConnection,
    bet_id: i64,
    status: BetStatus,
    payout: i64,
    resolved_at: DateTime<Utc>,
) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "UPDATE bets SET status = ?, payout = ?, resolved_at = ? \
         WHERE id = ? AND status = 'pending'",
    )
    .bind(status.as_str())
    .bind(payout)
    .bind(resolved_at)
    .bind(bet_id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

/// Move a pending parlay to a terminal status, guarded like [`mark_bet_in`].
pub(crate) async fn mark_parlay_in(
    conn: &mut SqliteConnection,
    parlay_id: i64,
    status: BetStatus,
    payout: i64,
    resolved_at: DateTime<Utc>,
) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "UPDATE parlays SET status = ?, payout = ?, resolved_at = ? \
         WHERE id = ? AND status = 'pending'",
    )
    .bind(status.as_str())
    .bind(payout)
    .bind(resolved_at)
    .bind(parlay_id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

/// Move a pending parlay leg to a terminal status.
pub(crate) async fn mark_leg_in(
    conn: &mut SqliteConnection,
    leg_id: i64,
    status: LegStatus,
) -> sqlx::Result<u64> {
    let result = sqlx::query("UPDATE parlay_legs SET status = ? WHERE id = ? AND status = 'pending'")
        .bind(status.as_str())
        .bind(leg_id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}

/// Load a parlay with its legs on an existing connection, so settlement
/// can inspect leg states inside its own transaction.
pub(crate) async fn parlay_with_legs_in(
    conn: &mut SqliteConnection,
    id: i64,
) -> sqlx::Result<Option<Parlay>> {
    let Some(row) = sqlx::query("SELECT * FROM parlays WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
    else {
        return Ok(None);
    };

    let leg_rows = sqlx::query("SELECT * FROM parlay_legs WHERE parlay_id = ? ORDER BY id")
        .bind(id)
        .fetch_all(&mut *conn)
        .await?;

    let legs = leg_rows
        .iter()
        .map(leg_from_row)
        .collect::<sqlx::Result<Vec<_>>>()?;

    Ok(Some(Parlay {
        id: row.get("id"),
        user_id: row.get("user_id"),
        amount: row.get("amount"),
        status: parse_column(&row, "status")?,
        payout: row.get("payout"),
        placed_at: row.get("placed_at"),
        resolved_at: row.get("resolved_at"),
        legs,
    }))
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn bet_from_row(row: &SqliteRow) -> sqlx::Result<Bet> {
    Ok(Bet {
        id: row.get("id"),
        user_id: row.get("user_id"),
        market_id: row.get("market_id"),
        sport_key: row.get("sport_key"),
        commence_time: row.get("commence_time"),
        selection: parse_column(row, "selection")?,
        point: row.get("point"),
        amount: row.get("amount"),
        odds: row.get("odds"),
        status: parse_column(row, "status")?,
        payout: row.get("payout"),
        placed_at: row.get("placed_at"),
        resolved_at: row.get("resolved_at"),
    })
}

fn leg_from_row(row: &SqliteRow) -> sqlx::Result<ParlayLeg> {
    Ok(ParlayLeg {
        id: row.get("id"),
        parlay_id: row.get("parlay_id"),
        market_id: row.get("market_id"),
        sport_key: row.get("sport_key"),
        commence_time: row.get("commence_time"),
        selection: parse_column(row, "selection")?,
        point: row.get("point"),
        odds: row.get("odds"),
        status: parse_column(row, "status")?,
    })
}

fn parse_column<T>(row: &SqliteRow, column: &str) -> sqlx::Result<T>
where
    T: FromStr<Err = anyhow::Error>,
{
    let raw: String = row.get(column);
    raw.parse().map_err(|e: anyhow::Error| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: e.into(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
