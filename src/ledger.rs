//! Wallet ledger: the only code that moves balances.
//!
//! Balances are integers in minor currency units and can never go
//! negative. Debits are a single conditional UPDATE (`AND balance >= ?`),
//! so an overdraw is impossible even with concurrent spenders; the schema's
//! CHECK constraint backstops the same invariant. The `_in` variants run on
//! a caller-supplied connection so a wallet movement and the bet row it
//! funds commit or roll back together.

use sqlx::sqlite::SqlitePool;
use sqlx::{Row, SqliteConnection};
use tracing::{debug, info};

use crate::types::EngineError;

pub struct WalletLedger {
    pool: SqlitePool,
    /// Balance granted to a wallet on first touch.
    starting_balance: i64,
}

impl WalletLedger {
    pub fn new(pool: SqlitePool, starting_balance: i64) -> Self {
        Self {
            pool,
            starting_balance,
        }
    }

    /// Current balance, creating the wallet with the starting balance on
    /// first sight of the user.
    pub async fn balance(&self, user_id: i64) -> Result<i64, EngineError> {
        let mut conn = self.pool.acquire().await?;
        self.ensure_wallet_in(&mut conn, user_id).await?;
        let row = sqlx::query("SELECT balance FROM wallets WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&mut *conn)
            .await?;
        Ok(row.get("balance"))
    }

    /// Debit a wallet, failing with `InsufficientFunds` if the balance
    /// cannot cover the amount.
    pub async fn debit(&self, user_id: i64, amount: i64) -> Result<(), EngineError> {
        let mut conn = self.pool.acquire().await?;
        self.debit_in(&mut conn, user_id, amount).await
    }

    /// Credit a wallet.
    pub async fn credit(&self, user_id: i64, amount: i64) -> Result<(), EngineError> {
        let mut conn = self.pool.acquire().await?;
        self.credit_in(&mut conn, user_id, amount).await
    }

    /// Reset every wallet to `amount`. One statement, so no wallet is ever
    /// observed half-reset.
    pub async fn reset_all(&self, amount: i64) -> Result<u64, EngineError> {
        let result = sqlx::query("UPDATE wallets SET balance = ?")
            .bind(amount)
            .execute(&self.pool)
            .await?;
        info!(amount, wallets = result.rows_affected(), "Reset all wallets");
        Ok(result.rows_affected())
    }

    /// Scale every balance by `factor`, truncating toward zero. Used for
    /// economy rebalancing between seasons.
    pub async fn adjust_all(&self, factor: f64) -> Result<u64, EngineError> {
        let result = sqlx::query("UPDATE wallets SET balance = CAST(balance * ? AS INTEGER)")
            .bind(factor)
            .execute(&self.pool)
            .await?;
        info!(factor, wallets = result.rows_affected(), "Adjusted all wallets");
        Ok(result.rows_affected())
    }

    // -- Transaction-scoped variants --------------------------------------

    pub(crate) async fn ensure_wallet_in(
        &self,
        conn: &mut SqliteConnection,
        user_id: i64,
    ) -> Result<(), EngineError> {
        sqlx::query("INSERT OR IGNORE INTO wallets (user_id, balance) VALUES (?, ?)")
            .bind(user_id)
            .bind(self.starting_balance)
            .execute(conn)
            .await?;
        Ok(())
    }

    pub(crate) async fn debit_in(
        &self,
        conn: &mut SqliteConnection,
        user_id: i64,
        amount: i64,
    ) -> Result<(), EngineError> {
        self.ensure_wallet_in(&mut *conn, user_id).await?;

        // The guard makes check-and-spend one atomic statement.
        let result = sqlx::query(
            "UPDATE wallets SET balance = balance - ?1 WHERE user_id = ?2 AND balance >= ?1",
        )
        .bind(amount)
        .bind(user_id)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            let row = sqlx::query("SELECT balance FROM wallets WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(&mut *conn)
                .await?;
            let available: i64 = row.get("balance");
            return Err(EngineError::InsufficientFunds {
                needed: amount,
                available,
            });
        }
        debug!(user_id, amount, "Debited wallet");
        Ok(())
    }

    pub(crate) async fn credit_in(
        &self,
        conn: &mut SqliteConnection,
        user_id: i64,
        amount: i64,
    ) -> Result<(), EngineError> {
        self.ensure_wallet_in(&mut *conn, user_id).await?;
        sqlx::query("UPDATE wallets SET balance = balance + ? WHERE user_id = ?")
            .bind(amount)
            .bind(user_id)
            .execute(&mut *conn)
            .await?;
        debug!(user_id, amount, "Credited wallet");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Store;
    use std::sync::Arc;

    async fn ledger() -> (Store, WalletLedger) {
        let store = Store::open_in_memory().await.unwrap();
        let ledger = WalletLedger::new(store.pool().clone(), 10_000);
        (store, ledger)
    }

    #[tokio::test]
    async fn test_first_touch_grants_starting_balance() {
        let (_store, ledger) = ledger().await;
        assert_eq!(ledger.balance(42).await.unwrap(), 10_000);
    }

    #[tokio::test]
    async fn test_debit_and_credit() {
        let (_store, ledger) = ledger().await;
        ledger.debit(1, 4_000).await.unwrap();
        assert_eq!(ledger.balance(1).await.unwrap(), 6_000);
        ledger.credit(1, 1_500).await.unwrap();
        assert_eq!(ledger.balance(1).await.unwrap(), 7_500);
    }

    #[tokio::test]
    async fn test_overdraw_rejected_and_balance_untouched() {
        let (_store, ledger) = ledger().await;
        let err = ledger.debit(1, 10_001).await.unwrap_err();
        match err {
            EngineError::InsufficientFunds { needed, available } => {
                assert_eq!(needed, 10_001);
                assert_eq!(available, 10_000);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(ledger.balance(1).await.unwrap(), 10_000);
    }

    #[tokio::test]
    async fn test_debit_to_exactly_zero_allowed() {
        let (_store, ledger) = ledger().await;
        ledger.debit(1, 10_000).await.unwrap();
        assert_eq!(ledger.balance(1).await.unwrap(), 0);
        assert!(ledger.debit(1, 1).await.is_err());
    }

    #[tokio::test]
    async fn test_reset_and_adjust_all() {
        let (_store, ledger) = ledger().await;
        ledger.debit(1, 2_000).await.unwrap();
        ledger.credit(2, 6_000).await.unwrap();

        ledger.adjust_all(0.5).await.unwrap();
        assert_eq!(ledger.balance(1).await.unwrap(), 4_000);
        assert_eq!(ledger.balance(2).await.unwrap(), 8_000);

        ledger.reset_all(10_000).await.unwrap();
        assert_eq!(ledger.balance(1).await.unwrap(), 10_000);
        assert_eq!(ledger.balance(2).await.unwrap(), 10_000);
    }

    #[tokio::test]
    async fn test_concurrent_spending_never_overdraws() {
        let (_store, ledger) = ledger().await;
        ledger.balance(1).await.unwrap();

        let ledger = Arc::new(ledger);
        let mut handles = Vec::new();
        for _ in 0..20 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(
                async move { ledger.debit(1, 1_000).await.is_ok() },
            ));
        }

        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap() {
                succeeded += 1;
            }
        }

        // Exactly ten 1_000 debits fit in a 10_000 balance.
        assert_eq!(succeeded, 10);
        assert_eq!(ledger.balance(1).await.unwrap(), 0);
    }
}
