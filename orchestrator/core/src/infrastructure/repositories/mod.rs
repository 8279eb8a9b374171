// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Implementations
//!
//! In-memory backends for development and tests, PostgreSQL backends for
//! production. Both pairs implement the same domain contracts; the in-memory
//! ledger mirrors the uniqueness and balance-guard semantics the PostgreSQL
//! schema enforces with constraints.

pub mod postgres_analysis;
pub mod postgres_ledger;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::domain::analysis::{
    Analysis, AnalysisId, AnalysisResult, ProviderResult, UserId,
};
use crate::domain::credit::{
    Authorization, CommitOutcome, CreditAccount, CreditLedger, CreditTransaction, LedgerError,
    TransactionCursor, TransactionKind, TransactionPage,
};
use crate::domain::error::DomainError;
use crate::domain::repository::{AnalysisRepository, HistoryCursor, RepositoryError};

pub use postgres_analysis::PostgresAnalysisRepository;
pub use postgres_ledger::PostgresCreditLedger;

struct StoredAnalysis {
    analysis: Analysis,
    /// Rows appended while the fan-out is still running; superseded by the
    /// breakdown inside the terminal result.
    partial: Vec<ProviderResult>,
}

/// Development/test record store. All state behind one lock; clones out.
#[derive(Clone, Default)]
pub struct InMemoryAnalysisRepository {
    records: Arc<RwLock<HashMap<AnalysisId, StoredAnalysis>>>,
}

impl InMemoryAnalysisRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AnalysisRepository for InMemoryAnalysisRepository {
    async fn create(&self, analysis: &Analysis) -> Result<(), RepositoryError> {
        let mut records = self.records.write().unwrap();
        if records.contains_key(&analysis.id) {
            return Err(RepositoryError::Conflict(format!(
                "analysis {} already exists",
                analysis.id
            )));
        }
        records.insert(
            analysis.id,
            StoredAnalysis { analysis: analysis.clone(), partial: Vec::new() },
        );
        Ok(())
    }

    async fn mark_running(&self, id: AnalysisId) -> Result<(), RepositoryError> {
        let mut records = self.records.write().unwrap();
        let stored = records
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        stored.analysis.start();
        Ok(())
    }

    async fn append_provider_result(
        &self,
        id: AnalysisId,
        result: &ProviderResult,
    ) -> Result<(), RepositoryError> {
        let mut records = self.records.write().unwrap();
        let stored = records
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        stored.partial.push(result.clone());
        Ok(())
    }

    async fn finalize(&self, id: AnalysisId, result: &AnalysisResult) -> Result<(), RepositoryError> {
        let mut records = self.records.write().unwrap();
        let stored = records
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        stored.analysis.finalize(result.clone()).map_err(|e| match e {
            DomainError::AlreadyFinalized(id) => {
                RepositoryError::Conflict(format!("analysis {} already finalized", id))
            }
            other => RepositoryError::Conflict(other.to_string()),
        })
    }

    async fn find_by_id(&self, id: AnalysisId) -> Result<Option<Analysis>, RepositoryError> {
        let records = self.records.read().unwrap();
        Ok(records.get(&id).map(|s| s.analysis.clone()))
    }

    async fn history(
        &self,
        user: UserId,
        cursor: Option<HistoryCursor>,
        limit: usize,
    ) -> Result<Vec<Analysis>, RepositoryError> {
        let records = self.records.read().unwrap();
        let mut items: Vec<Analysis> = records
            .values()
            .filter(|s| s.analysis.user_id == user)
            .map(|s| s.analysis.clone())
            .collect();
        // Newest first, id as tie-break so pagination is total
        items.sort_by(|a, b| {
            b.submitted_at
                .cmp(&a.submitted_at)
                .then_with(|| b.id.0.cmp(&a.id.0))
        });
        if let Some(cursor) = cursor {
            items.retain(|a| {
                (a.submitted_at, a.id.0) < (cursor.submitted_at, cursor.id.0)
            });
        }
        items.truncate(limit);
        Ok(items)
    }
}

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<UserId, CreditAccount>,
    log: Vec<CreditTransaction>,
}

impl LedgerState {
    fn committed(&self, analysis_id: AnalysisId, kind: TransactionKind) -> bool {
        self.log
            .iter()
            .any(|t| t.analysis_id == Some(analysis_id) && t.kind == kind)
    }

    fn append(
        &mut self,
        user: UserId,
        kind: TransactionKind,
        amount: i64,
        analysis_id: Option<AnalysisId>,
        description: &str,
    ) -> i64 {
        self.log.push(CreditTransaction {
            id: Uuid::new_v4(),
            user_id: user,
            kind,
            amount,
            analysis_id,
            description: description.to_string(),
            created_at: Utc::now(),
        });
        let account = self.accounts.get_mut(&user).unwrap();
        account.balance += amount;
        account.version += 1;
        account.balance
    }
}

/// Development/test ledger. One mutex makes (uniqueness check, balance
/// check, append) atomic, mirroring the single transaction the PostgreSQL
/// backend runs.
#[derive(Clone, Default)]
pub struct InMemoryCreditLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl InMemoryCreditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: desynchronize the stored balance from the log so
    /// `reconcile` has something to detect.
    pub fn corrupt_balance(&self, user: UserId, delta: i64) {
        let mut state = self.state.lock().unwrap();
        if let Some(account) = state.accounts.get_mut(&user) {
            account.balance += delta;
        }
    }
}

#[async_trait]
impl CreditLedger for InMemoryCreditLedger {
    async fn open_account(&self, user: UserId, initial_balance: i64) -> Result<(), LedgerError> {
        let mut state = self.state.lock().unwrap();
        if state.accounts.contains_key(&user) {
            return Ok(());
        }
        state
            .accounts
            .insert(user, CreditAccount { user_id: user, balance: 0, version: 0 });
        if initial_balance > 0 {
            // The welcome grant is a logged purchase so the balance always
            // equals the log sum.
            state.append(
                user,
                TransactionKind::Purchase,
                initial_balance,
                None,
                "Welcome credit grant",
            );
        }
        Ok(())
    }

    async fn balance(&self, user: UserId) -> Result<i64, LedgerError> {
        let state = self.state.lock().unwrap();
        state
            .accounts
            .get(&user)
            .map(|a| a.balance)
            .ok_or(LedgerError::AccountNotFound(user))
    }

    async fn reserve_and_check(&self, user: UserId, cost: i64) -> Result<Authorization, LedgerError> {
        if cost <= 0 {
            return Err(LedgerError::InvalidAmount(cost));
        }
        let state = self.state.lock().unwrap();
        let account = state
            .accounts
            .get(&user)
            .ok_or(LedgerError::AccountNotFound(user))?;
        if account.balance >= cost {
            Ok(Authorization::Authorized)
        } else {
            Ok(Authorization::InsufficientBalance { balance: account.balance, required: cost })
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
        let mut state = self.state.lock().unwrap();
        if state.committed(analysis_id, TransactionKind::Debit) {
            return Ok(CommitOutcome::AlreadyCommitted);
        }
        let balance = state
            .accounts
            .get(&user)
            .ok_or(LedgerError::AccountNotFound(user))?
            .balance;
        if balance < cost {
            return Err(LedgerError::InsufficientBalance { balance, required: cost });
        }
        let new_balance = state.append(
            user,
            TransactionKind::Debit,
            -cost,
            Some(analysis_id),
            description,
        );
        Ok(CommitOutcome::Committed { new_balance })
    }

    async fn commit_refund(
        &self,
        user: UserId,
        analysis_id: AnalysisId,
        description: &str,
    ) -> Result<CommitOutcome, LedgerError> {
        let mut state = self.state.lock().unwrap();
        let debited = state
            .log
            .iter()
            .find(|t| t.analysis_id == Some(analysis_id) && t.kind == TransactionKind::Debit)
            .map(|t| -t.amount)
            .ok_or(LedgerError::NothingToRefund(analysis_id))?;
        if state.committed(analysis_id, TransactionKind::Refund) {
            return Ok(CommitOutcome::AlreadyCommitted);
        }
        if !state.accounts.contains_key(&user) {
            return Err(LedgerError::AccountNotFound(user));
        }
        let new_balance = state.append(
            user,
            TransactionKind::Refund,
            debited,
            Some(analysis_id),
            description,
        );
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
        let mut state = self.state.lock().unwrap();
        if !state.accounts.contains_key(&user) {
            return Err(LedgerError::AccountNotFound(user));
        }
        Ok(state.append(user, TransactionKind::Purchase, amount, None, description))
    }

    async fn transactions(
        &self,
        user: UserId,
        cursor: Option<TransactionCursor>,
        limit: usize,
    ) -> Result<TransactionPage, LedgerError> {
        let state = self.state.lock().unwrap();
        if !state.accounts.contains_key(&user) {
            return Err(LedgerError::AccountNotFound(user));
        }
        let mut items: Vec<CreditTransaction> = state
            .log
            .iter()
            .filter(|t| t.user_id == user)
            .cloned()
            .collect();
        items.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        if let Some(cursor) = cursor {
            items.retain(|t| (t.created_at, t.id) < (cursor.created_at, cursor.id));
        }
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
        let state = self.state.lock().unwrap();
        let stored = state
            .accounts
            .get(&user)
            .ok_or(LedgerError::AccountNotFound(user))?
            .balance;
        let derived: i64 = state
            .log
            .iter()
            .filter(|t| t.user_id == user)
            .map(|t| t.amount)
            .sum();
        if stored != derived {
            return Err(LedgerError::Inconsistency { user, stored, derived });
        }
        Ok(())
    }
}
