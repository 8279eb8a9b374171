// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contract for the `Analysis` aggregate, following the DDD
//! Repository pattern: interface defined in the domain layer, implemented in
//! `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `AnalysisRepository` | `Analysis` | `InMemoryAnalysisRepository`, `PostgresAnalysisRepository` |
//! | `CreditLedger` (in `domain::credit`) | `CreditAccount` + log | `InMemoryCreditLedger`, `PostgresCreditLedger` |
//!
//! In-memory implementations are used for development and testing;
//! PostgreSQL implementations for production.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::analysis::{Analysis, AnalysisId, AnalysisResult, ProviderResult, UserId};

/// Restartable position in a user's reverse-chronological analysis history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryCursor {
    pub submitted_at: DateTime<Utc>,
    pub id: AnalysisId,
}

/// Record store for analyses. `finalize` is callable once per analysis;
/// a second call is rejected with `RepositoryError::Conflict`.
#[async_trait]
pub trait AnalysisRepository: Send + Sync {
    /// Persist a freshly created analysis (status `Pending`).
    async fn create(&self, analysis: &Analysis) -> Result<(), RepositoryError>;

    /// Transition `Pending -> Running` when the fan-out starts.
    async fn mark_running(&self, id: AnalysisId) -> Result<(), RepositoryError>;

    /// Append one provider-level result to the breakdown as it arrives.
    async fn append_provider_result(
        &self,
        id: AnalysisId,
        result: &ProviderResult,
    ) -> Result<(), RepositoryError>;

    /// Write the terminal result. Exactly once; second calls are rejected.
    async fn finalize(&self, id: AnalysisId, result: &AnalysisResult) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: AnalysisId) -> Result<Option<Analysis>, RepositoryError>;

    /// A user's analyses, newest first, restartable via cursor.
    async fn history(
        &self,
        user: UserId,
        cursor: Option<HistoryCursor>,
        limit: usize,
    ) -> Result<Vec<Analysis>, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
