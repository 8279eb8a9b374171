// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! LLM Provider Adapters (Anti-Corruption Layer)
//!
//! One adapter per vendor API, each implementing `ProviderAdapter`. Vendor
//! wire formats stay inside this module; what crosses the boundary is a
//! validated `Verdict` or a normalized `ProviderError`.

pub mod anthropic;
pub mod gemini;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;

use crate::domain::analysis::{Artifact, Verdict};
use crate::domain::config::ProviderConfig;
use crate::domain::provider::{ProviderAdapter, ProviderError};

pub use anthropic::AnthropicAdapter;
pub use gemini::GeminiAdapter;
pub use openai::OpenAiAdapter;

/// Build the adapter set from configuration. Disabled entries are skipped;
/// an unknown adapter type is a configuration error, not a runtime fallback.
pub fn build_adapters(configs: &[ProviderConfig]) -> anyhow::Result<Vec<Arc<dyn ProviderAdapter>>> {
    let mut adapters: Vec<Arc<dyn ProviderAdapter>> = Vec::new();
    for config in configs.iter().filter(|c| c.enabled) {
        let api_key = resolve_api_key(config)?;
        match config.provider_type.as_str() {
            "openai" => adapters.push(Arc::new(OpenAiAdapter::from_config(config, api_key))),
            "anthropic" => adapters.push(Arc::new(AnthropicAdapter::from_config(config, api_key))),
            "gemini" => adapters.push(Arc::new(GeminiAdapter::from_config(config, api_key))),
            other => anyhow::bail!("unknown provider type '{}' for provider '{}'", other, config.name),
        }
    }
    Ok(adapters)
}

/// Resolve the configured API key, following "env:VAR_NAME" indirection so
/// secrets never need to live in the manifest itself.
fn resolve_api_key(config: &ProviderConfig) -> anyhow::Result<String> {
    let raw = config
        .api_key
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("provider '{}' has no api_key configured", config.name))?;
    if let Some(var) = raw.strip_prefix("env:") {
        std::env::var(var)
            .map_err(|_| anyhow::anyhow!("environment variable {} not set for provider '{}'", var, config.name))
    } else {
        Ok(raw.to_string())
    }
}

/// Build the evaluation prompt shared by all adapters. Each vendor gets its
/// own critic persona so the panel disagrees for interesting reasons.
pub(crate) fn analysis_prompt(persona: &str, artifact: &Artifact) -> String {
    let mut prompt = format!(
        "You are {persona}. You are reviewing an AI-generated response for \
         realism. Judge whether its claims, numbers and plans would hold up \
         in the real world.\n\n"
    );
    if let Some(context) = &artifact.context {
        prompt.push_str(&format!("Original question:\n{}\n\n", context));
    }
    prompt.push_str(&format!("Response under review:\n{}\n\n", artifact.text));
    prompt.push_str(
        "Reply with ONLY a JSON object, no prose around it:\n\
         {\"score\": <0-100, 0 = completely unrealistic, 100 = fully credible>, \
         \"rationale\": \"<2-3 sentence justification>\", \
         \"confidence\": <0.0-1.0, how certain you are of this judgement>}",
    );
    prompt
}

#[derive(Deserialize)]
struct RawVerdict {
    score: f64,
    rationale: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
}

fn default_confidence() -> f64 {
    0.5
}

/// Parse a model completion into a validated `Verdict`.
///
/// Models wrap JSON in markdown fences or lead-in prose more often than not,
/// so this scans for the outermost object before deserializing. Anything
/// that does not yield an in-bounds verdict is an `InvalidResponse`.
pub(crate) fn parse_verdict(completion: &str) -> Result<Verdict, ProviderError> {
    let trimmed = completion.trim();
    let start = trimmed
        .find('{')
        .ok_or_else(|| ProviderError::InvalidResponse("no JSON object in completion".to_string()))?;
    let end = trimmed
        .rfind('}')
        .ok_or_else(|| ProviderError::InvalidResponse("unterminated JSON object".to_string()))?;
    if end < start {
        return Err(ProviderError::InvalidResponse("malformed completion".to_string()));
    }

    let raw: RawVerdict = serde_json::from_str(&trimmed[start..=end])
        .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
    Verdict::new(raw.score, raw.rationale, raw.confidence)
        .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
}

/// Budget left until the shared deadline, used as the per-request HTTP
/// timeout. Zero means the deadline already passed.
pub(crate) fn remaining_budget(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}
