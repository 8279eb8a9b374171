// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Shared fixtures for the end-to-end orchestration tests. Each test target
// uses a different subset.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use veracity_core::application::{AnalysisService, StandardAnalysisService};
use veracity_core::domain::analysis::{
    Analysis, AnalysisId, Artifact, UserId, Verdict,
};
use veracity_core::domain::config::OrchestratorConfig;
use veracity_core::domain::provider::{ProviderAdapter, ProviderError, ProviderId};
use veracity_core::infrastructure::repositories::{
    InMemoryAnalysisRepository, InMemoryCreditLedger,
};

pub struct ScriptedAdapter {
    id: ProviderId,
    delay: Duration,
    result: Result<Verdict, ProviderError>,
    pub calls: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn ok(id: &str, delay_ms: u64, score: f64, confidence: f64) -> Arc<Self> {
        Arc::new(Self {
            id: ProviderId::new(id),
            delay: Duration::from_millis(delay_ms),
            result: Ok(Verdict::new(score, format!("{} scripted verdict", id), confidence).unwrap()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn err(id: &str, delay_ms: u64, error: ProviderError) -> Arc<Self> {
        Arc::new(Self {
            id: ProviderId::new(id),
            delay: Duration::from_millis(delay_ms),
            result: Err(error),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    async fn evaluate(
        &self,
        _artifact: &Artifact,
        _deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Verdict, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            _ = tokio::time::sleep(self.delay) => {}
        }
        self.result.clone()
    }
}

/// Policy tuned for fast tests: 300ms deadline, 50ms grace.
pub fn test_policy() -> OrchestratorConfig {
    OrchestratorConfig {
        max_analysis_latency: Duration::from_millis(300),
        grace_period: Duration::from_millis(50),
        ..OrchestratorConfig::default()
    }
}

pub struct Harness {
    pub service: Arc<StandardAnalysisService>,
    pub repository: InMemoryAnalysisRepository,
    pub ledger: InMemoryCreditLedger,
}

pub fn harness(adapters: Vec<Arc<dyn ProviderAdapter>>, policy: OrchestratorConfig) -> Harness {
    let repository = InMemoryAnalysisRepository::new();
    let ledger = InMemoryCreditLedger::new();
    let service = Arc::new(StandardAnalysisService::new(
        Arc::new(repository.clone()),
        Arc::new(ledger.clone()),
        adapters,
        policy,
    ));
    Harness { service, repository, ledger }
}

pub fn user() -> UserId {
    UserId(Uuid::new_v4())
}

pub fn artifact() -> Artifact {
    Artifact {
        text: "We will reach profitability in six weeks with zero marketing spend".to_string(),
        context: Some("Review my business plan".to_string()),
    }
}

/// Poll until the background pipeline writes a terminal status.
pub async fn wait_terminal(
    service: &Arc<StandardAnalysisService>,
    user: UserId,
    id: AnalysisId,
) -> Analysis {
    for _ in 0..200 {
        let analysis = service.get(user, id).await.expect("analysis should exist");
        if analysis.status.is_terminal() {
            return analysis;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("analysis {} did not reach a terminal status", id);
}
