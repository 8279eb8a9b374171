// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// PostgreSQL Analysis Record Store
//
// One row per analysis. The artifact, provider list, in-flight breakdown
// and terminal result are JSONB columns; the terminal write is guarded by a
// status predicate so a second finalize affects zero rows and surfaces as a
// conflict instead of overwriting the first result.

use async_trait::async_trait;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::analysis::{
    Analysis, AnalysisId, AnalysisResult, AnalysisStatus, ProviderResult, UserId,
};
use crate::domain::repository::{AnalysisRepository, HistoryCursor, RepositoryError};
use crate::infrastructure::db::Database;

pub struct PostgresAnalysisRepository {
    db: Database,
}

impl PostgresAnalysisRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn row_to_analysis(row: &sqlx::postgres::PgRow) -> Result<Analysis, RepositoryError> {
        let result: Option<serde_json::Value> = row.try_get("result")?;
        Ok(Analysis {
            id: AnalysisId(row.try_get::<Uuid, _>("id")?),
            user_id: UserId(row.try_get::<Uuid, _>("user_id")?),
            artifact: serde_json::from_value(row.try_get("artifact")?)?,
            providers: serde_json::from_value(row.try_get("providers")?)?,
            cost: row.try_get("cost")?,
            status: status_from_str(row.try_get("status")?)?,
            result: result.map(serde_json::from_value).transpose()?,
            submitted_at: row.try_get("submitted_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

fn status_from_str(s: &str) -> Result<AnalysisStatus, RepositoryError> {
    match s {
        "pending" => Ok(AnalysisStatus::Pending),
        "running" => Ok(AnalysisStatus::Running),
        "partial_success" => Ok(AnalysisStatus::PartialSuccess),
        "full_success" => Ok(AnalysisStatus::FullSuccess),
        "failed" => Ok(AnalysisStatus::Failed),
        other => Err(RepositoryError::Serialization(format!("unknown status '{}'", other))),
    }
}

#[async_trait]
impl AnalysisRepository for PostgresAnalysisRepository {
    async fn create(&self, analysis: &Analysis) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO analyses (id, user_id, artifact, providers, cost, status, submitted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(analysis.id.0)
        .bind(analysis.user_id.0)
        .bind(serde_json::to_value(&analysis.artifact)?)
        .bind(serde_json::to_value(&analysis.providers)?)
        .bind(analysis.cost)
        .bind(analysis.status.as_str())
        .bind(analysis.submitted_at)
        .execute(self.db.get_pool())
        .await?;
        Ok(())
    }

    async fn mark_running(&self, id: AnalysisId) -> Result<(), RepositoryError> {
        let updated = sqlx::query(
            "UPDATE analyses SET status = 'running' WHERE id = $1 AND status = 'pending'",
        )
        .bind(id.0)
        .execute(self.db.get_pool())
        .await?;
        if updated.rows_affected() == 0 {
            // Either unknown or already past pending; the latter is benign
            let exists = sqlx::query("SELECT 1 FROM analyses WHERE id = $1")
                .bind(id.0)
                .fetch_optional(self.db.get_pool())
                .await?;
            if exists.is_none() {
                return Err(RepositoryError::NotFound(id.to_string()));
            }
        }
        Ok(())
    }

    async fn append_provider_result(
        &self,
        id: AnalysisId,
        result: &ProviderResult,
    ) -> Result<(), RepositoryError> {
        let updated = sqlx::query(
            "UPDATE analyses SET breakdown = breakdown || $2::jsonb WHERE id = $1",
        )
        .bind(id.0)
        .bind(serde_json::to_value(result)?)
        .execute(self.db.get_pool())
        .await?;
        if updated.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn finalize(&self, id: AnalysisId, result: &AnalysisResult) -> Result<(), RepositoryError> {
        let updated = sqlx::query(
            r#"
            UPDATE analyses
            SET status = $2, result = $3, breakdown = $4, completed_at = now()
            WHERE id = $1 AND status IN ('pending', 'running')
            "#,
        )
        .bind(id.0)
        .bind(result.status.as_str())
        .bind(serde_json::to_value(result)?)
        .bind(serde_json::to_value(&result.breakdown)?)
        .execute(self.db.get_pool())
        .await?;

        if updated.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM analyses WHERE id = $1")
                .bind(id.0)
                .fetch_optional(self.db.get_pool())
                .await?;
            return if exists.is_some() {
                Err(RepositoryError::Conflict(format!("analysis {} already finalized", id)))
            } else {
                Err(RepositoryError::NotFound(id.to_string()))
            };
        }
        Ok(())
    }

    async fn find_by_id(&self, id: AnalysisId) -> Result<Option<Analysis>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, artifact, providers, cost, status, result,
                   submitted_at, completed_at
            FROM analyses WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(self.db.get_pool())
        .await?;
        row.as_ref().map(Self::row_to_analysis).transpose()
    }

    async fn history(
        &self,
        user: UserId,
        cursor: Option<HistoryCursor>,
        limit: usize,
    ) -> Result<Vec<Analysis>, RepositoryError> {
        let rows = match cursor {
            Some(cursor) => {
                sqlx::query(
                    r#"
                    SELECT id, user_id, artifact, providers, cost, status, result,
                           submitted_at, completed_at
                    FROM analyses
                    WHERE user_id = $1 AND (submitted_at, id) < ($2, $3)
                    ORDER BY submitted_at DESC, id DESC
                    LIMIT $4
                    "#,
                )
                .bind(user.0)
                .bind(cursor.submitted_at)
                .bind(cursor.id.0)
                .bind(limit as i64)
                .fetch_all(self.db.get_pool())
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT id, user_id, artifact, providers, cost, status, result,
                           submitted_at, completed_at
                    FROM analyses
                    WHERE user_id = $1
                    ORDER BY submitted_at DESC, id DESC
                    LIMIT $2
                    "#,
                )
                .bind(user.0)
                .bind(limit as i64)
                .fetch_all(self.db.get_pool())
                .await?
            }
        };
        rows.iter().map(Self::row_to_analysis).collect()
    }
}
