// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Gemini Provider Adapter
//
// Anti-Corruption Layer for the Google Generative Language API. Persona: the
// market skeptic, testing claims against operational and commercial reality.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domain::analysis::{Artifact, Verdict};
use crate::domain::config::ProviderConfig;
use crate::domain::provider::{ProviderAdapter, ProviderError, ProviderId};
use crate::infrastructure::providers::{analysis_prompt, parse_verdict, remaining_budget};

const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
const PERSONA: &str = "a pragmatic operator testing claims against market and operational reality";

pub struct GeminiAdapter {
    id: ProviderId,
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: String,
}

impl GeminiAdapter {
    pub fn new(id: ProviderId, endpoint: Option<String>, api_key: String, model: String) -> Self {
        Self {
            id,
            client: reqwest::Client::new(),
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            api_key,
            model,
        }
    }

    pub fn from_config(config: &ProviderConfig, api_key: String) -> Self {
        Self::new(
            ProviderId::new(config.name.clone()),
            config.endpoint.clone(),
            api_key,
            config.model.clone(),
        )
    }

    async fn complete(&self, prompt: &str, deadline: Instant) -> Result<String, ProviderError> {
        let request = GenerateRequest {
            contents: vec![Content { parts: vec![Part { text: prompt.to_string() }] }],
        };
        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .timeout(remaining_budget(deadline))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Network("request timed out".to_string())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();

            return Err(if status == 401 || status == 403 {
                ProviderError::Authentication(error_text)
            } else if status == 429 {
                ProviderError::RateLimit
            } else {
                ProviderError::Provider(format!("HTTP {}: {}", status, error_text))
            });
        }

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        generated
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| ProviderError::InvalidResponse("empty candidates".to_string()))
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    async fn evaluate(
        &self,
        artifact: &Artifact,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Verdict, ProviderError> {
        let prompt = analysis_prompt(PERSONA, artifact);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProviderError::Cancelled),
            completion = self.complete(&prompt, deadline) => parse_verdict(&completion?),
        }
    }
}
