// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Fan-Out Coordinator - Concurrent Provider Dispatch
//
// Issues one task per configured adapter under a single absolute deadline,
// collects a ProviderResult per adapter, and orders the batch by provider id
// so aggregation is deterministic regardless of completion order. Provider
// failures of any shape (error, timeout, panic) are absorbed into the
// breakdown; nothing propagates out of `evaluate_all` as an error.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::domain::analysis::{Artifact, ProviderOutcome, ProviderResult};
use crate::domain::config::OrchestratorConfig;
use crate::domain::provider::{ProviderAdapter, ProviderError, ProviderId};

#[derive(Debug, Clone)]
pub struct FanOutCoordinator {
    max_latency: Duration,
    grace_period: Duration,
}

impl FanOutCoordinator {
    pub fn new(max_latency: Duration, grace_period: Duration) -> Self {
        Self { max_latency, grace_period }
    }

    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self::new(config.max_analysis_latency, config.grace_period)
    }

    /// Evaluate the artifact on every adapter concurrently.
    ///
    /// Each adapter gets the same absolute deadline. A slow adapter never
    /// blocks the others: overruns are cancelled cooperatively, waited for
    /// only `grace_period`, and recorded as `Timeout`. The returned batch
    /// always contains exactly one entry per adapter, sorted by provider id.
    pub async fn evaluate_all(
        &self,
        artifact: &Artifact,
        adapters: &[Arc<dyn ProviderAdapter>],
        cancel: &CancellationToken,
    ) -> Vec<ProviderResult> {
        let deadline = Instant::now() + self.max_latency;
        let join_deadline = deadline + self.grace_period;

        let mut handles = Vec::with_capacity(adapters.len());
        for adapter in adapters {
            let adapter = Arc::clone(adapter);
            let artifact = artifact.clone();
            let token = cancel.child_token();
            let provider = adapter.id().clone();
            handles.push((
                provider,
                tokio::spawn(async move {
                    evaluate_one(adapter, artifact, deadline, token).await
                }),
            ));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (provider, mut handle) in handles {
            let result = match tokio::time::timeout_at(join_deadline, &mut handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(join_err)) => {
                    // An adapter implementation fault (panic) is a provider
                    // error, never a system fault.
                    error!(provider = %provider, "adapter task failed: {}", join_err);
                    self.synthesize(provider, ProviderOutcome::Error {
                        reason: ProviderError::Provider(join_err.to_string())
                            .reason_code()
                            .to_string(),
                    })
                }
                Err(_) => {
                    // Grace period elapsed; stop waiting for cleanup.
                    handle.abort();
                    warn!(provider = %provider, "adapter did not wind down within grace period");
                    self.synthesize(provider, ProviderOutcome::Timeout)
                }
            };
            results.push(result);
        }

        results.sort_by(|a, b| a.provider.cmp(&b.provider));
        results
    }

    fn synthesize(&self, provider: ProviderId, outcome: ProviderOutcome) -> ProviderResult {
        ProviderResult {
            provider,
            outcome,
            latency_ms: self.max_latency.as_millis() as u64,
            recorded_at: Utc::now(),
        }
    }
}

async fn evaluate_one(
    adapter: Arc<dyn ProviderAdapter>,
    artifact: Artifact,
    deadline: Instant,
    token: CancellationToken,
) -> ProviderResult {
    let started = Instant::now();
    let outcome = tokio::select! {
        biased;
        _ = token.cancelled() => ProviderOutcome::Error {
            reason: ProviderError::Cancelled.reason_code().to_string(),
        },
        evaluated = tokio::time::timeout_at(deadline, adapter.evaluate(&artifact, deadline, &token)) => {
            match evaluated {
                Ok(Ok(verdict)) => ProviderOutcome::Success { verdict },
                Ok(Err(e)) => {
                    warn!(provider = %adapter.id(), reason = e.reason_code(), "provider evaluation failed: {}", e);
                    ProviderOutcome::Error { reason: e.reason_code().to_string() }
                }
                Err(_) => {
                    token.cancel();
                    ProviderOutcome::Timeout
                }
            }
        }
    };

    ProviderResult {
        provider: adapter.id().clone(),
        outcome,
        latency_ms: started.elapsed().as_millis() as u64,
        recorded_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::analysis::Verdict;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedAdapter {
        id: ProviderId,
        delay: Duration,
        result: Result<Verdict, ProviderError>,
        calls: AtomicUsize,
    }

    impl ScriptedAdapter {
        fn ok(id: &str, delay_ms: u64, score: f64) -> Arc<Self> {
            Arc::new(Self {
                id: ProviderId::new(id),
                delay: Duration::from_millis(delay_ms),
                result: Ok(Verdict::new(score, "scripted".to_string(), 0.5).unwrap()),
                calls: AtomicUsize::new(0),
            })
        }

        fn err(id: &str, delay_ms: u64, error: ProviderError) -> Arc<Self> {
            Arc::new(Self {
                id: ProviderId::new(id),
                delay: Duration::from_millis(delay_ms),
                result: Err(error),
                calls: AtomicUsize::new(0),
            })
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

    fn artifact() -> Artifact {
        Artifact { text: "we will reach 10M users in month two".to_string(), context: None }
    }

    fn coordinator() -> FanOutCoordinator {
        FanOutCoordinator::new(Duration::from_millis(500), Duration::from_millis(50))
    }

    #[tokio::test(start_paused = true)]
    async fn breakdown_is_ordered_by_provider_id_not_arrival() {
        // p3 completes first, then p1, then p2
        let adapters: Vec<Arc<dyn ProviderAdapter>> = vec![
            ScriptedAdapter::ok("p1", 200, 70.0),
            ScriptedAdapter::ok("p2", 300, 75.0),
            ScriptedAdapter::ok("p3", 100, 80.0),
        ];
        let results = coordinator()
            .evaluate_all(&artifact(), &adapters, &CancellationToken::new())
            .await;

        let order: Vec<&str> = results.iter().map(|r| r.provider.as_str()).collect();
        assert_eq!(order, vec!["p1", "p2", "p3"]);
        assert!(results.iter().all(|r| r.outcome.is_success()));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_overrun_is_recorded_as_timeout() {
        let adapters: Vec<Arc<dyn ProviderAdapter>> = vec![
            ScriptedAdapter::ok("fast", 50, 65.0),
            ScriptedAdapter::ok("slow", 10_000, 65.0),
        ];
        let results = coordinator()
            .evaluate_all(&artifact(), &adapters, &CancellationToken::new())
            .await;

        assert_eq!(results.len(), 2);
        assert!(results[0].outcome.is_success());
        assert_eq!(results[1].outcome, ProviderOutcome::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn provider_errors_are_absorbed_not_propagated() {
        let adapters: Vec<Arc<dyn ProviderAdapter>> = vec![
            ScriptedAdapter::ok("good", 50, 90.0),
            ScriptedAdapter::err("bad", 50, ProviderError::RateLimit),
            ScriptedAdapter::err(
                "worse",
                50,
                ProviderError::InvalidResponse("not json".to_string()),
            ),
        ];
        let results = coordinator()
            .evaluate_all(&artifact(), &adapters, &CancellationToken::new())
            .await;

        // Sorted by provider id: bad, good, worse
        assert_eq!(
            results[0].outcome,
            ProviderOutcome::Error { reason: "rate_limited".to_string() }
        );
        assert!(results[1].outcome.is_success());
        assert_eq!(
            results[2].outcome,
            ProviderOutcome::Error { reason: "invalid_response".to_string() }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_outstanding_calls() {
        let slow = ScriptedAdapter::ok("slow", 10_000, 65.0);
        let adapters: Vec<Arc<dyn ProviderAdapter>> = vec![slow.clone()];
        let cancel = CancellationToken::new();

        let coordinator = coordinator();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel_clone.cancel();
        });

        let started = Instant::now();
        let results = coordinator.evaluate_all(&artifact(), &adapters, &cancel).await;
        // Cancelled well before the 500ms deadline
        assert!(started.elapsed() < Duration::from_millis(400));
        assert_eq!(
            results[0].outcome,
            ProviderOutcome::Error { reason: "cancelled".to_string() }
        );
        assert_eq!(slow.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn every_adapter_yields_exactly_one_entry() {
        let adapters: Vec<Arc<dyn ProviderAdapter>> = vec![
            ScriptedAdapter::ok("a", 10, 50.0),
            ScriptedAdapter::err("b", 10, ProviderError::Network("refused".to_string())),
            ScriptedAdapter::ok("c", 10_000, 50.0),
        ];
        let results = coordinator()
            .evaluate_all(&artifact(), &adapters, &CancellationToken::new())
            .await;
        assert_eq!(results.len(), 3);
    }
}
