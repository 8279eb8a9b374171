// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// PostgreSQL Credit Ledger
//
// Exactly-one-debit-per-analysis rests on the partial unique index over
// (analysis_id, kind): the commit is an INSERT .. ON CONFLICT DO NOTHING
// followed by a balance-guarded UPDATE, both inside one transaction. Zero
// inserted rows means a concurrent commit already won; zero updated rows
// means the balance guard failed and the whole commit rolls back. This holds
// across server instances because the database, not the process, arbitrates.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::analysis::{AnalysisId, UserId};
use crate::domain::credit::{
    Authorization, CommitOutcome, CreditLedger, CreditTransaction, LedgerError, TransactionCursor,
    TransactionKind, TransactionPage,
};
use crate::infrastructure::db::Database;

pub struct PostgresCreditLedger {
    db: Database,
}

impl PostgresCreditLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn stored_balance(&self, user: UserId) -> Result<i64, LedgerError> {
        let row = sqlx::query("SELECT balance FROM credit_accounts WHERE user_id = $1")
            .bind(user.0)
            .fetch_optional(self.db.get_pool())
            .await?;
        row.map(|r| r.try_get("balance").map_err(LedgerError::from))
            .transpose()?
            .ok_or(LedgerError::AccountNotFound(user))
    }
}

fn kind_from_str(s: &str) -> Result<TransactionKind, LedgerError> {
    match s {
        "purchase" => Ok(TransactionKind::Purchase),
        "debit" => Ok(TransactionKind::Debit),
        "refund" => Ok(TransactionKind::Refund),
        other => Err(LedgerError::Storage(format!("unknown transaction kind '{}'", other))),
    }
}

fn row_to_transaction(row: &sqlx::postgres::PgRow) -> Result<CreditTransaction, LedgerError> {
    Ok(CreditTransaction {
        id: row.try_get("id")?,
        user_id: UserId(row.try_get::<Uuid, _>("user_id")?),
        kind: kind_from_str(row.try_get("kind")?)?,
        amount: row.try_get("amount")?,
        analysis_id: row.try_get::<Option<Uuid>, _>("analysis_id")?.map(AnalysisId),
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl CreditLedger for PostgresCreditLedger {
    async fn open_account(&self, user: UserId, initial_balance: i64) -> Result<(), LedgerError> {
        let mut tx = self.db.get_pool().begin().await?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO credit_accounts (user_id, balance, version)
            VALUES ($1, $2, 1)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user.0)
        .bind(initial_balance.max(0))
        .execute(&mut *tx)
        .await?;

        // Log the welcome grant so the balance always equals the log sum
        if inserted.rows_affected() == 1 && initial_balance > 0 {
            sqlx::query(
                r#"
                INSERT INTO credit_transactions (id, user_id, kind, amount, analysis_id, description, created_at)
                VALUES ($1, $2, 'purchase', $3, NULL, $4, $5)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(user.0)
            .bind(initial_balance)
            .bind("Welcome credit grant")
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn balance(&self, user: UserId) -> Result<i64, LedgerError> {
        self.stored_balance(user).await
    }

    async fn reserve_and_check(&self, user: UserId, cost: i64) -> Result<Authorization, LedgerError> {
        if cost <= 0 {
            return Err(LedgerError::InvalidAmount(cost));
        }
        let balance = self.stored_balance(user).await?;
        if balance >= cost {
            Ok(Authorization::Authorized)
        } else {
            Ok(Authorization::InsufficientBalance { balance, required: cost })
        }
    }

    async fn commit_debit(
        &self,
        user: UserId,
        analysis_id: AnalysisId,
        cost: i64,
        description: &str,
    ) -> Result<CommitOutcome, LedgerError> {
        if cost <= 0 {
            return Err(LedgerError::InvalidAmount(cost));
        }
        let mut tx = self.db.get_pool().begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO credit_transactions (id, user_id, kind, amount, analysis_id, description, created_at)
            VALUES ($1, $2, 'debit', $3, $4, $5, $6)
            ON CONFLICT (analysis_id, kind) WHERE analysis_id IS NOT NULL DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user.0)
        .bind(-cost)
        .bind(analysis_id.0)
        .bind(description)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(CommitOutcome::AlreadyCommitted);
        }

        let updated = sqlx::query(
            r#"
            UPDATE credit_accounts
            SET balance = balance - $2, version = version + 1
            WHERE user_id = $1 AND balance >= $2
            RETURNING balance
            "#,
        )
        .bind(user.0)
        .bind(cost)
        .fetch_optional(&mut *tx)
        .await?;

        match updated {
            Some(row) => {
                let new_balance: i64 = row.try_get("balance")?;
                tx.commit().await?;
                Ok(CommitOutcome::Committed { new_balance })
            }
            None => {
                tx.rollback().await?;
                let balance = self.stored_balance(user).await?;
                Err(LedgerError::InsufficientBalance { balance, required: cost })
            }
        }
    }

    async fn commit_refund(
        &self,
        user: UserId,
        analysis_id: AnalysisId,
        description: &str,
    ) -> Result<CommitOutcome, LedgerError> {
        let mut tx = self.db.get_pool().begin().await?;

        let debit = sqlx::query(
            "SELECT amount FROM credit_transactions WHERE analysis_id = $1 AND kind = 'debit'",
        )
        .bind(analysis_id.0)
        .fetch_optional(&mut *tx)
        .await?;
        let amount: i64 = match debit {
            Some(row) => -row.try_get::<i64, _>("amount")?,
            None => {
                tx.rollback().await?;
                return Err(LedgerError::NothingToRefund(analysis_id));
            }
        };

        let inserted = sqlx::query(
            r#"
            INSERT INTO credit_transactions (id, user_id, kind, amount, analysis_id, description, created_at)
            VALUES ($1, $2, 'refund', $3, $4, $5, $6)
            ON CONFLICT (analysis_id, kind) WHERE analysis_id IS NOT NULL DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user.0)
        .bind(amount)
        .bind(analysis_id.0)
        .bind(description)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(CommitOutcome::AlreadyCommitted);
        }

        let row = sqlx::query(
            r#"
            UPDATE credit_accounts
            SET balance = balance + $2, version = version + 1
            WHERE user_id = $1
            RETURNING balance
            "#,
        )
        .bind(user.0)
        .bind(amount)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(LedgerError::AccountNotFound(user))?;

        let new_balance: i64 = row.try_get("balance")?;
        tx.commit().await?;
        Ok(CommitOutcome::Committed { new_balance })
    }

    async fn credit_purchase(
        &self,
        user: UserId,
        amount: i64,
        description: &str,
    ) -> Result<i64, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let mut tx = self.db.get_pool().begin().await?;

        sqlx::query(
            r#"
            INSERT INTO credit_transactions (id, user_id, kind, amount, analysis_id, description, created_at)
            VALUES ($1, $2, 'purchase', $3, NULL, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user.0)
        .bind(amount)
        .bind(description)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(
            r#"
            UPDATE credit_accounts
            SET balance = balance + $2, version = version + 1
            WHERE user_id = $1
            RETURNING balance
            "#,
        )
        .bind(user.0)
        .bind(amount)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(LedgerError::AccountNotFound(user))?;

        let new_balance: i64 = row.try_get("balance")?;
        tx.commit().await?;
        Ok(new_balance)
    }

    async fn transactions(
        &self,
        user: UserId,
        cursor: Option<TransactionCursor>,
        limit: usize,
    ) -> Result<TransactionPage, LedgerError> {
        // Fetch one extra row to decide whether another page exists
        let fetch = (limit + 1) as i64;
        let rows = match cursor {
            Some(cursor) => {
                sqlx::query(
                    r#"
                    SELECT id, user_id, kind, amount, analysis_id, description, created_at
                    FROM credit_transactions
                    WHERE user_id = $1 AND (created_at, id) < ($2, $3)
                    ORDER BY created_at DESC, id DESC
                    LIMIT $4
                    "#,
                )
                .bind(user.0)
                .bind(cursor.created_at)
                .bind(cursor.id)
                .bind(fetch)
                .fetch_all(self.db.get_pool())
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT id, user_id, kind, amount, analysis_id, description, created_at
                    FROM credit_transactions
                    WHERE user_id = $1
                    ORDER BY created_at DESC, id DESC
                    LIMIT $2
                    "#,
                )
                .bind(user.0)
                .bind(fetch)
                .fetch_all(self.db.get_pool())
                .await?
            }
        };

        let mut items: Vec<CreditTransaction> =
            rows.iter().map(row_to_transaction).collect::<Result<_, _>>()?;
        let has_more = items.len() > limit;
        items.truncate(limit);
        let next = if has_more {
            items.last().map(|t| TransactionCursor { created_at: t.created_at, id: t.id })
        } else {
            None
        };
        Ok(TransactionPage { items, next })
    }

    async fn reconcile(&self, user: UserId) -> Result<(), LedgerError> {
        let stored = self.stored_balance(user).await?;
        let row = sqlx::query(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT AS derived FROM credit_transactions WHERE user_id = $1",
        )
        .bind(user.0)
        .fetch_one(self.db.get_pool())
        .await?;
        let derived: i64 = row.try_get("derived")?;
        if stored != derived {
            return Err(LedgerError::Inconsistency { user, stored, derived });
        }
        Ok(())
    }
}
