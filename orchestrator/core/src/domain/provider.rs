// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Provider Adapter Domain Interface (Anti-Corruption Layer)
//
// One uniform capability per LLM backend: evaluate an artifact against a
// deadline and return a verdict. Vendor APIs, wire formats and exception
// shapes stay behind this boundary; implementations live in
// infrastructure/providers/.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domain::analysis::{Artifact, Verdict};

/// Stable provider identifier ("openai", "anthropic", "gemini"). Result
/// ordering in every breakdown is by this id, never by arrival time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProviderId(pub String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Domain interface for evaluation providers.
///
/// Contract:
/// - honor `deadline` and `cancel` promptly (cooperative cancellation);
/// - never panic or propagate vendor-specific errors; everything failure-
///   shaped becomes a `ProviderError`;
/// - safely callable concurrently; no shared mutable state between calls.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn id(&self) -> &ProviderId;

    async fn evaluate(
        &self,
        artifact: &Artifact,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Verdict, ProviderError>;
}

/// Normalized provider failure. `reason_code` is the stable wire-level code
/// recorded in `ProviderOutcome::Error`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("rate limit exceeded")]
    RateLimit,

    #[error("invalid verdict payload: {0}")]
    InvalidResponse(String),

    #[error("call cancelled")]
    Cancelled,

    #[error("provider error: {0}")]
    Provider(String),
}

impl ProviderError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            ProviderError::Network(_) => "network",
            ProviderError::Authentication(_) => "auth",
            ProviderError::RateLimit => "rate_limited",
            ProviderError::InvalidResponse(_) => "invalid_response",
            ProviderError::Cancelled => "cancelled",
            ProviderError::Provider(_) => "provider",
        }
    }
}
