//! Wallet primitives over the wallets table. Every function takes a bare
//! connection so callers compose debit/credit with their own statements in
//! one transaction — the ledger must never charge a user without recording
//! the stake, or vice versa.

use sqlx::SqliteConnection;

use crate::error::{DomainError, Result};

pub async fn balance(conn: &mut SqliteConnection, user_id: i64) -> Result<f64> {
    let balance: Option<f64> =
        sqlx::query_scalar("SELECT balance FROM wallets WHERE user_id = ?1")
            .bind(user_id)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(balance.unwrap_or(0.0))
}

/// Debits `amount` iff the spendable balance covers it. The guard lives in
/// the UPDATE itself so a concurrent debit can never push the balance
/// negative.
pub async fn debit(conn: &mut SqliteConnection, user_id: i64, amount: f64) -> Result<()> {
    let available = balance(&mut *conn, user_id).await?;
    let updated = sqlx::query(
        "UPDATE wallets SET balance = balance - ?1 WHERE user_id = ?2 AND balance >= ?1",
    )
    .bind(amount)
    .bind(user_id)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if updated == 0 {
        return Err(DomainError::InsufficientBalance {
            available,
            required: amount,
        }
        .into());
    }
    Ok(())
}

/// Credits `amount`, creating the wallet row on first touch.
pub async fn credit(conn: &mut SqliteConnection, user_id: i64, amount: f64) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO wallets (user_id, balance, reputation) VALUES (?1, ?2, 0)
        ON CONFLICT(user_id) DO UPDATE SET balance = balance + excluded.balance
        "#,
    )
    .bind(user_id)
    .bind(amount)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn credit_reputation(
    conn: &mut SqliteConnection,
    user_id: i64,
    delta: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO wallets (user_id, balance, reputation) VALUES (?1, 0, ?2)
        ON CONFLICT(user_id) DO UPDATE SET reputation = reputation + excluded.reputation
        "#,
    )
    .bind(user_id)
    .bind(delta)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn reputation(conn: &mut SqliteConnection, user_id: i64) -> Result<i64> {
    let reputation: Option<i64> =
        sqlx::query_scalar("SELECT reputation FROM wallets WHERE user_id = ?1")
            .bind(user_id)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(reputation.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::test_util::test_pool;

    #[tokio::test]
    async fn debit_rejects_insufficient_balance_without_touching_it() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        credit(&mut conn, 1, 50.0).await.unwrap();
        let err = debit(&mut conn, 1, 80.0).await.unwrap_err();
        match err {
            AppError::Domain(DomainError::InsufficientBalance { available, required }) => {
                assert!((available - 50.0).abs() < 1e-9);
                assert!((required - 80.0).abs() < 1e-9);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!((balance(&mut conn, 1).await.unwrap() - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn credit_creates_wallet_on_first_touch() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        assert_eq!(balance(&mut conn, 9).await.unwrap(), 0.0);
        credit(&mut conn, 9, 12.5).await.unwrap();
        credit(&mut conn, 9, 7.5).await.unwrap();
        assert!((balance(&mut conn, 9).await.unwrap() - 20.0).abs() < 1e-9);

        credit_reputation(&mut conn, 9, 12).await.unwrap();
        assert_eq!(reputation(&mut conn, 9).await.unwrap(), 12);
    }
}
