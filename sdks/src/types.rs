// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Wire types for the Veracity HTTP API. Self-contained on purpose: SDK
// consumers never depend on the server crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct SubmitAnalysisRequest {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitAnalysisResponse {
    pub id: Uuid,
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Verdict {
    pub score: f64,
    pub rationale: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderOutcome {
    Success { verdict: Verdict },
    Timeout,
    Error { reason: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderResult {
    pub provider: String,
    pub outcome: ProviderOutcome,
    pub latency_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisResult {
    pub composite_score: Option<f64>,
    #[serde(default)]
    pub consensus: Option<String>,
    pub breakdown: Vec<ProviderResult>,
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Analysis {
    pub id: Uuid,
    pub status: String,
    pub cost: i64,
    #[serde(default)]
    pub result: Option<AnalysisResult>,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisPage {
    pub items: Vec<Analysis>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Balance {
    pub balance: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreditTransaction {
    pub id: Uuid,
    pub kind: String,
    pub amount: i64,
    #[serde(default)]
    pub analysis_id: Option<Uuid>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionPage {
    pub items: Vec<CreditTransaction>,
}
