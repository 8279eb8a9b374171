// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Analysis Service - Orchestration Use-Cases
//
// Ties the affordability pre-check, the provider fan-out, aggregation, the
// terminal record write and the credit debit into one pipeline. Billing
// discipline: the pre-check runs before any provider is invoked; the debit
// is committed only after a billable terminal status has been written, keyed
// to the analysis id so retries and races can never double-charge.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::application::aggregator::{aggregate, AggregationPolicy};
use crate::application::coordinator::FanOutCoordinator;
use crate::domain::analysis::{
    Analysis, AnalysisId, AnalysisRequest, AnalysisResult, AnalysisStatus, Artifact, UserId,
};
use crate::domain::config::OrchestratorConfig;
use crate::domain::credit::{
    Authorization, CommitOutcome, CreditLedger, LedgerError, TransactionCursor, TransactionPage,
};
use crate::domain::provider::ProviderAdapter;
use crate::domain::repository::{AnalysisRepository, HistoryCursor, RepositoryError};

/// User-visible failure taxonomy of the orchestrator core. Nothing
/// unclassified escapes this boundary.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("insufficient balance: have {balance}, need {required}")]
    InsufficientBalance { balance: i64, required: i64 },

    #[error("analysis not found")]
    NotFound,

    #[error("analysis {0} already reached a terminal status")]
    AlreadyCompleted(AnalysisId),

    #[error("analysis {0} is not billable; nothing to refund")]
    NotBillable(AnalysisId),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// Pre-check affordability, persist the request and start the fan-out in
    /// the background. Returns immediately with the analysis id.
    async fn submit(&self, user: UserId, artifact: Artifact) -> Result<AnalysisId, AnalysisError>;

    async fn get(&self, user: UserId, id: AnalysisId) -> Result<Analysis, AnalysisError>;

    /// Cancel an in-flight analysis. Captured provider results are
    /// discarded, the analysis finalizes as `Failed`, and no debit is ever
    /// committed for it.
    async fn cancel(&self, user: UserId, id: AnalysisId) -> Result<(), AnalysisError>;

    async fn history(
        &self,
        user: UserId,
        cursor: Option<HistoryCursor>,
        limit: usize,
    ) -> Result<Vec<Analysis>, AnalysisError>;

    /// Refund the debit of a billable analysis that was later invalidated.
    /// Idempotent; at most one refund per original debit.
    async fn refund(&self, user: UserId, id: AnalysisId) -> Result<(), AnalysisError>;

    async fn balance(&self, user: UserId) -> Result<i64, AnalysisError>;

    async fn purchase(&self, user: UserId, amount: i64) -> Result<i64, AnalysisError>;

    async fn transactions(
        &self,
        user: UserId,
        cursor: Option<TransactionCursor>,
        limit: usize,
    ) -> Result<TransactionPage, AnalysisError>;
}

pub struct StandardAnalysisService {
    repository: Arc<dyn AnalysisRepository>,
    ledger: Arc<dyn CreditLedger>,
    adapters: Vec<Arc<dyn ProviderAdapter>>,
    coordinator: FanOutCoordinator,
    policy: OrchestratorConfig,
    inflight: Arc<RwLock<HashMap<AnalysisId, CancellationToken>>>,
}

impl StandardAnalysisService {
    pub fn new(
        repository: Arc<dyn AnalysisRepository>,
        ledger: Arc<dyn CreditLedger>,
        mut adapters: Vec<Arc<dyn ProviderAdapter>>,
        policy: OrchestratorConfig,
    ) -> Self {
        // Stable adapter order; breakdowns are sorted by provider id anyway,
        // but this keeps the advertised provider set deterministic too.
        adapters.sort_by(|a, b| a.id().cmp(b.id()));
        let coordinator = FanOutCoordinator::from_config(&policy);
        Self {
            repository,
            ledger,
            adapters,
            coordinator,
            policy,
            inflight: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn aggregation_policy(&self) -> AggregationPolicy {
        AggregationPolicy {
            disagreement_threshold: self.policy.disagreement_threshold,
            min_quorum: self.policy.min_quorum,
        }
    }

    /// Fetch an analysis and enforce per-user visibility. Unknown ids and
    /// foreign analyses are indistinguishable to the caller.
    async fn owned(&self, user: UserId, id: AnalysisId) -> Result<Analysis, AnalysisError> {
        match self.repository.find_by_id(id).await? {
            Some(analysis) if analysis.user_id == user => Ok(analysis),
            _ => Err(AnalysisError::NotFound),
        }
    }
}

#[async_trait]
impl AnalysisService for StandardAnalysisService {
    async fn submit(&self, user: UserId, artifact: Artifact) -> Result<AnalysisId, AnalysisError> {
        let cost = self.policy.cost_per_analysis;
        self.ledger.open_account(user, self.policy.initial_balance).await?;

        // Affordability pre-check before any provider work is started.
        match self.ledger.reserve_and_check(user, cost).await? {
            Authorization::Authorized => {}
            Authorization::InsufficientBalance { balance, required } => {
                return Err(AnalysisError::InsufficientBalance { balance, required });
            }
        }

        let providers = self.adapters.iter().map(|a| a.id().clone()).collect();
        let request = AnalysisRequest::new(user, artifact, providers);
        let analysis = Analysis::from_request(request, cost);
        let id = analysis.id;
        self.repository.create(&analysis).await?;

        let cancel = CancellationToken::new();
        self.inflight.write().unwrap().insert(id, cancel.clone());

        metrics::counter!("veracity_analyses_started_total").increment(1);
        info!(analysis = %id, user = %user, cost, "analysis submitted");

        let pipeline = Pipeline {
            repository: Arc::clone(&self.repository),
            ledger: Arc::clone(&self.ledger),
            adapters: self.adapters.clone(),
            coordinator: self.coordinator.clone(),
            policy: self.aggregation_policy(),
            inflight: Arc::clone(&self.inflight),
        };
        tokio::spawn(async move {
            pipeline.run(analysis, cancel).await;
        });

        Ok(id)
    }

    async fn get(&self, user: UserId, id: AnalysisId) -> Result<Analysis, AnalysisError> {
        self.owned(user, id).await
    }

    async fn cancel(&self, user: UserId, id: AnalysisId) -> Result<(), AnalysisError> {
        let analysis = self.owned(user, id).await?;
        if analysis.status.is_terminal() {
            return Err(AnalysisError::AlreadyCompleted(id));
        }

        // Finalize first so the racing pipeline loses the terminal write and
        // skips its debit, then signal the provider tasks.
        let result = AnalysisResult {
            composite_score: None,
            consensus: None,
            breakdown: vec![],
            status: AnalysisStatus::Failed,
        };
        match self.repository.finalize(id, &result).await {
            Ok(()) => {}
            Err(RepositoryError::Conflict(_)) => return Err(AnalysisError::AlreadyCompleted(id)),
            Err(e) => return Err(e.into()),
        }

        if let Some(token) = self.inflight.write().unwrap().remove(&id) {
            token.cancel();
        }
        info!(analysis = %id, "analysis cancelled");
        Ok(())
    }

    async fn history(
        &self,
        user: UserId,
        cursor: Option<HistoryCursor>,
        limit: usize,
    ) -> Result<Vec<Analysis>, AnalysisError> {
        Ok(self.repository.history(user, cursor, limit).await?)
    }

    async fn refund(&self, user: UserId, id: AnalysisId) -> Result<(), AnalysisError> {
        let analysis = self.owned(user, id).await?;
        if !analysis.status.is_billable() {
            return Err(AnalysisError::NotBillable(id));
        }
        match self
            .ledger
            .commit_refund(user, id, &format!("Refund for analysis {}", id))
            .await?
        {
            CommitOutcome::Committed { new_balance } => {
                info!(analysis = %id, new_balance, "refund committed");
            }
            CommitOutcome::AlreadyCommitted => {
                warn!(analysis = %id, "refund already committed; earlier refund stands");
            }
        }
        Ok(())
    }

    async fn balance(&self, user: UserId) -> Result<i64, AnalysisError> {
        self.ledger.open_account(user, self.policy.initial_balance).await?;
        Ok(self.ledger.balance(user).await?)
    }

    async fn purchase(&self, user: UserId, amount: i64) -> Result<i64, AnalysisError> {
        self.ledger.open_account(user, self.policy.initial_balance).await?;
        let new_balance = self
            .ledger
            .credit_purchase(user, amount, &format!("Purchased {} credits", amount))
            .await?;
        Ok(new_balance)
    }

    async fn transactions(
        &self,
        user: UserId,
        cursor: Option<TransactionCursor>,
        limit: usize,
    ) -> Result<TransactionPage, AnalysisError> {
        self.ledger.open_account(user, self.policy.initial_balance).await?;
        Ok(self.ledger.transactions(user, cursor, limit).await?)
    }
}

/// Everything the background run needs, detached from the service lifetime.
struct Pipeline {
    repository: Arc<dyn AnalysisRepository>,
    ledger: Arc<dyn CreditLedger>,
    adapters: Vec<Arc<dyn ProviderAdapter>>,
    coordinator: FanOutCoordinator,
    policy: AggregationPolicy,
    inflight: Arc<RwLock<HashMap<AnalysisId, CancellationToken>>>,
}

impl Pipeline {
    async fn run(self, analysis: Analysis, cancel: CancellationToken) {
        let id = analysis.id;
        let user = analysis.user_id;
        let cost = analysis.cost;

        if let Err(e) = self.repository.mark_running(id).await {
            warn!(analysis = %id, "failed to mark analysis running: {}", e);
        }

        let results = self
            .coordinator
            .evaluate_all(&analysis.artifact, &self.adapters, &cancel)
            .await;

        if cancel.is_cancelled() {
            // Cancellation already finalized the record as Failed; captured
            // results are discarded and nothing is charged.
            self.inflight.write().unwrap().remove(&id);
            return;
        }

        for result in &results {
            if let Err(e) = self.repository.append_provider_result(id, result).await {
                warn!(analysis = %id, provider = %result.provider, "failed to append provider result: {}", e);
            }
        }

        let providers: String = analysis
            .providers
            .iter()
            .map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let result = aggregate(results, &self.policy);
        let billable = result.status.is_billable();

        match self.repository.finalize(id, &result).await {
            Ok(()) => {
                metrics::counter!("veracity_analyses_completed_total").increment(1);
                info!(analysis = %id, status = result.status.as_str(), "analysis finalized");
            }
            Err(RepositoryError::Conflict(_)) => {
                // Lost the terminal write to a cancellation; never charge.
                info!(analysis = %id, "analysis was finalized elsewhere; skipping debit");
                self.inflight.write().unwrap().remove(&id);
                return;
            }
            Err(e) => {
                error!(analysis = %id, "failed to finalize analysis: {}", e);
                self.inflight.write().unwrap().remove(&id);
                return;
            }
        }

        if billable {
            let description = format!("Analysis using {}", providers);
            match self.ledger.commit_debit(user, id, cost, &description).await {
                Ok(CommitOutcome::Committed { new_balance }) => {
                    metrics::counter!("veracity_debits_committed_total").increment(1);
                    info!(analysis = %id, cost, new_balance, "debit committed");
                }
                Ok(CommitOutcome::AlreadyCommitted) => {
                    // Idempotency guard fired; the earlier commit stands.
                    metrics::counter!("veracity_debits_duplicate_total").increment(1);
                    warn!(analysis = %id, "duplicate debit suppressed");
                }
                Err(e) => {
                    // Atomicity violations are surfaced, never retried here.
                    error!(analysis = %id, "debit rejected: {}", e);
                }
            }
        } else {
            info!(analysis = %id, "analysis below quorum; not billable");
        }

        self.inflight.write().unwrap().remove(&id);
    }
}
