// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// OpenAI Provider Adapter
//
// Anti-Corruption Layer for the OpenAI Chat Completions API. Persona: the
// technical realist, probing feasibility claims and numbers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domain::analysis::{Artifact, Verdict};
use crate::domain::config::ProviderConfig;
use crate::domain::provider::{ProviderAdapter, ProviderError, ProviderId};
use crate::infrastructure::providers::{analysis_prompt, parse_verdict, remaining_budget};

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const PERSONA: &str = "a senior engineer assessing technical feasibility";

pub struct OpenAiAdapter {
    id: ProviderId,
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

impl OpenAiAdapter {
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
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage { role: "user".to_string(), content: prompt.to_string() }],
            temperature: 0.2,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
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

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        chat.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ProviderError::InvalidResponse("empty choices".to_string()))
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
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
