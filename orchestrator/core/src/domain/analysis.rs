// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Analysis Aggregate - Reality-Check Request Lifecycle
//
// An Analysis is the aggregate root for one reality-check request: the
// submitted artifact, the per-provider breakdown collected by the fan-out
// coordinator, and the composite result produced by the aggregator.
//
// Status transitions: Pending -> Running -> PartialSuccess | FullSuccess | Failed.
// A terminal status is set exactly once; `finalize` enforces it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::error::DomainError;
use crate::domain::provider::ProviderId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnalysisId(pub Uuid);

impl AnalysisId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for AnalysisId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The user-submitted text under scrutiny, plus the optional question that
/// produced it. Opaque to the coordinator; adapters embed it in their prompts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// The AI response being reality-checked
    pub text: String,

    /// Original question/context, if the caller supplied one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Immutable submission record. Created once at intake, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub id: AnalysisId,
    pub user_id: UserId,
    pub artifact: Artifact,
    /// Providers selected for this run (stable ids, e.g. "openai")
    pub providers: Vec<ProviderId>,
    pub submitted_at: DateTime<Utc>,
}

impl AnalysisRequest {
    pub fn new(user_id: UserId, artifact: Artifact, providers: Vec<ProviderId>) -> Self {
        Self {
            id: AnalysisId::generate(),
            user_id,
            artifact,
            providers,
            submitted_at: Utc::now(),
        }
    }
}

/// One provider's evaluation of an artifact: a bounded score, the reasoning
/// behind it, and how much weight the provider puts on its own judgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// 0 = completely unrealistic, 100 = fully credible
    pub score: f64,
    pub rationale: String,
    /// Weight in [0, 1] used by the aggregator; 0 means "no stated confidence"
    pub confidence: f64,
}

impl Verdict {
    /// Validate bounds. Adapters call this when parsing provider payloads so
    /// an out-of-range score surfaces as a normalized provider error.
    pub fn new(score: f64, rationale: String, confidence: f64) -> Result<Self, DomainError> {
        if !(0.0..=100.0).contains(&score) || !score.is_finite() {
            return Err(DomainError::OutOfRange(format!("verdict score {}", score)));
        }
        if !(0.0..=1.0).contains(&confidence) || !confidence.is_finite() {
            return Err(DomainError::OutOfRange(format!("verdict confidence {}", confidence)));
        }
        Ok(Self { score, rationale, confidence })
    }
}

/// Normalized outcome of a single adapter call. Provider-specific failures
/// never cross this boundary; they are collapsed into `Error` with a stable
/// reason code (see `ProviderError::reason_code`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderOutcome {
    Success { verdict: Verdict },
    Timeout,
    Error { reason: String },
}

impl ProviderOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProviderOutcome::Success { .. })
    }

    pub fn verdict(&self) -> Option<&Verdict> {
        match self {
            ProviderOutcome::Success { verdict } => Some(verdict),
            _ => None,
        }
    }
}

/// One row of the breakdown: created only by the fan-out coordinator, one per
/// (analysis, provider), never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResult {
    pub provider: ProviderId,
    pub outcome: ProviderOutcome,
    pub latency_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Pending,
    Running,
    PartialSuccess,
    FullSuccess,
    Failed,
}

impl AnalysisStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AnalysisStatus::PartialSuccess | AnalysisStatus::FullSuccess | AnalysisStatus::Failed
        )
    }

    /// Only analyses that reached quorum are ever charged.
    pub fn is_billable(&self) -> bool {
        matches!(self, AnalysisStatus::PartialSuccess | AnalysisStatus::FullSuccess)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "pending",
            AnalysisStatus::Running => "running",
            AnalysisStatus::PartialSuccess => "partial_success",
            AnalysisStatus::FullSuccess => "full_success",
            AnalysisStatus::Failed => "failed",
        }
    }
}

/// Coarse agreement classification among successful provider scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusLabel {
    Agreement,
    Disputed,
}

/// Composite output of the aggregator. Written exactly once at completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Confidence-weighted mean of successful scores; `None` when no
    /// provider succeeded
    pub composite_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consensus: Option<ConsensusLabel>,
    /// Ordered by provider id, independent of completion order
    pub breakdown: Vec<ProviderResult>,
    pub status: AnalysisStatus,
}

/// Aggregate root persisted by the analysis record store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub id: AnalysisId,
    pub user_id: UserId,
    pub artifact: Artifact,
    pub providers: Vec<ProviderId>,
    /// Credits reserved for this run, committed on billable completion
    pub cost: i64,
    pub status: AnalysisStatus,
    pub result: Option<AnalysisResult>,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Analysis {
    pub fn from_request(request: AnalysisRequest, cost: i64) -> Self {
        Self {
            id: request.id,
            user_id: request.user_id,
            artifact: request.artifact,
            providers: request.providers,
            cost,
            status: AnalysisStatus::Pending,
            result: None,
            submitted_at: request.submitted_at,
            completed_at: None,
        }
    }

    pub fn start(&mut self) {
        if self.status == AnalysisStatus::Pending {
            self.status = AnalysisStatus::Running;
        }
    }

    /// Set the terminal result. Rejects a second finalize so a completed
    /// analysis is never overwritten (e.g. by a racing cancellation).
    pub fn finalize(&mut self, result: AnalysisResult) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            return Err(DomainError::AlreadyFinalized(self.id));
        }
        if !result.status.is_terminal() {
            return Err(DomainError::NotTerminal(result.status));
        }
        self.status = result.status;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(score: f64) -> Verdict {
        Verdict::new(score, "because".to_string(), 0.8).unwrap()
    }

    fn failed_result() -> AnalysisResult {
        AnalysisResult {
            composite_score: None,
            consensus: None,
            breakdown: vec![],
            status: AnalysisStatus::Failed,
        }
    }

    #[test]
    fn verdict_bounds_are_enforced() {
        assert!(Verdict::new(0.0, String::new(), 0.0).is_ok());
        assert!(Verdict::new(100.0, String::new(), 1.0).is_ok());
        assert!(Verdict::new(101.0, String::new(), 0.5).is_err());
        assert!(Verdict::new(-1.0, String::new(), 0.5).is_err());
        assert!(Verdict::new(50.0, String::new(), 1.5).is_err());
        assert!(Verdict::new(f64::NAN, String::new(), 0.5).is_err());
    }

    #[test]
    fn status_billability() {
        assert!(AnalysisStatus::FullSuccess.is_billable());
        assert!(AnalysisStatus::PartialSuccess.is_billable());
        assert!(!AnalysisStatus::Failed.is_billable());
        assert!(!AnalysisStatus::Pending.is_billable());
        assert!(!AnalysisStatus::Running.is_billable());
    }

    #[test]
    fn finalize_is_terminal_once() {
        let request = AnalysisRequest::new(
            UserId(Uuid::new_v4()),
            Artifact { text: "claim".to_string(), context: None },
            vec![ProviderId::new("openai")],
        );
        let mut analysis = Analysis::from_request(request, 10);
        analysis.start();
        assert_eq!(analysis.status, AnalysisStatus::Running);

        let result = AnalysisResult {
            composite_score: Some(72.0),
            consensus: Some(ConsensusLabel::Agreement),
            breakdown: vec![ProviderResult {
                provider: ProviderId::new("openai"),
                outcome: ProviderOutcome::Success { verdict: verdict(72.0) },
                latency_ms: 1200,
                recorded_at: Utc::now(),
            }],
            status: AnalysisStatus::FullSuccess,
        };

        analysis.finalize(result).unwrap();
        assert_eq!(analysis.status, AnalysisStatus::FullSuccess);
        assert!(analysis.completed_at.is_some());

        let err = analysis.finalize(failed_result()).unwrap_err();
        assert!(matches!(err, DomainError::AlreadyFinalized(_)));
        // First result stands
        assert_eq!(analysis.status, AnalysisStatus::FullSuccess);
    }

    #[test]
    fn finalize_rejects_non_terminal_status() {
        let request = AnalysisRequest::new(
            UserId(Uuid::new_v4()),
            Artifact { text: "claim".to_string(), context: None },
            vec![],
        );
        let mut analysis = Analysis::from_request(request, 10);
        let result = AnalysisResult {
            composite_score: None,
            consensus: None,
            breakdown: vec![],
            status: AnalysisStatus::Running,
        };
        assert!(matches!(analysis.finalize(result), Err(DomainError::NotTerminal(_))));
    }
}
