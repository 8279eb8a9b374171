// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Credit Ledger - Append-Only Transaction Log with Derived Balance
//
// The ledger is the only mutable shared resource in the orchestrator core.
// Balances are derived from an append-only transaction log; the atomic unit
// in `commit_debit` is (uniqueness check, balance check, append + balance
// update). Exactly-one-debit-per-analysis is enforced by a uniqueness
// constraint on (analysis_id, kind) in the log, not by in-process locking,
// so it stays correct across server instances.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::analysis::{AnalysisId, UserId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditAccount {
    pub user_id: UserId,
    /// Non-negative invariant; equals the sum of all committed transactions
    pub balance: i64,
    /// Bumped on every mutation, used for optimistic concurrency
    pub version: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Purchase,
    Debit,
    Refund,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Purchase => "purchase",
            TransactionKind::Debit => "debit",
            TransactionKind::Refund => "refund",
        }
    }
}

/// One row of the append-only log. Never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditTransaction {
    pub id: Uuid,
    pub user_id: UserId,
    pub kind: TransactionKind,
    /// Signed: positive for purchase/refund, negative for debit
    pub amount: i64,
    /// Present for debits and refunds; at most one row per (analysis, kind)
    pub analysis_id: Option<AnalysisId>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Affordability pre-check result. Read-only; no hold is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    Authorized,
    InsufficientBalance { balance: i64, required: i64 },
}

/// Outcome of an idempotent commit (debit or refund). A rejected commit is
/// an `Err(LedgerError)` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed { new_balance: i64 },
    /// The idempotency guard fired; the earlier commit stands.
    AlreadyCommitted,
}

/// Opaque restartable position in the reverse-chronological transaction feed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransactionCursor {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

#[derive(Debug, Clone)]
pub struct TransactionPage {
    pub items: Vec<CreditTransaction>,
    pub next: Option<TransactionCursor>,
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient balance: have {balance}, need {required}")]
    InsufficientBalance { balance: i64, required: i64 },

    #[error("account not found for user {0}")]
    AccountNotFound(UserId),

    #[error("no debit to refund for analysis {0}")]
    NothingToRefund(AnalysisId),

    /// Balance and transaction log disagree. Fatal: surfaced to the caller,
    /// never auto-corrected.
    #[error("ledger inconsistency for user {user}: stored balance {stored}, log sum {derived}")]
    Inconsistency { user: UserId, stored: i64, derived: i64 },

    #[error("invalid amount: {0}")]
    InvalidAmount(i64),

    #[error("ledger storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        LedgerError::Storage(err.to_string())
    }
}

/// Credit ledger contract: the affordability pre-check and the idempotent
/// debit, plus the purchase, refund and history surface of the credits API.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Create the account if it does not exist yet. No-op when it does.
    async fn open_account(&self, user: UserId, initial_balance: i64) -> Result<(), LedgerError>;

    /// Current balance, reflecting every committed transaction.
    async fn balance(&self, user: UserId) -> Result<i64, LedgerError>;

    /// Affordability pre-check before any provider is invoked. Pure read;
    /// no soft hold is placed.
    async fn reserve_and_check(&self, user: UserId, cost: i64) -> Result<Authorization, LedgerError>;

    /// Atomically append a debit tied to `analysis_id` and update the
    /// balance. Concurrent calls for the same analysis yield exactly one
    /// `Committed`; the rest see `AlreadyCommitted`.
    async fn commit_debit(
        &self,
        user: UserId,
        analysis_id: AnalysisId,
        cost: i64,
        description: &str,
    ) -> Result<CommitOutcome, LedgerError>;

    /// Refund the original debit for `analysis_id`, at most once.
    async fn commit_refund(
        &self,
        user: UserId,
        analysis_id: AnalysisId,
        description: &str,
    ) -> Result<CommitOutcome, LedgerError>;

    /// Add purchased credits and append a `Purchase` row. Returns the new
    /// balance. Payment gateway integration happens upstream.
    async fn credit_purchase(
        &self,
        user: UserId,
        amount: i64,
        description: &str,
    ) -> Result<i64, LedgerError>;

    /// Reverse-chronological transaction feed, restartable via cursor.
    async fn transactions(
        &self,
        user: UserId,
        cursor: Option<TransactionCursor>,
        limit: usize,
    ) -> Result<TransactionPage, LedgerError>;

    /// Recompute the balance from the log and compare against the stored
    /// balance. A mismatch is surfaced as `Inconsistency`.
    async fn reconcile(&self, user: UserId) -> Result<(), LedgerError>;
}
