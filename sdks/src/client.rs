// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::{bail, Result};
use reqwest::Client;
use uuid::Uuid;

use crate::types::{
    Analysis, AnalysisPage, Balance, SubmitAnalysisRequest, SubmitAnalysisResponse,
    TransactionPage,
};

/// Client for the Veracity reality-check service.
pub struct VeracityClient {
    base_url: String,
    client: Client,
    user_id: Uuid,
}

impl VeracityClient {
    /// Create a client acting on behalf of `user_id`.
    pub fn new(base_url: impl Into<String>, user_id: Uuid) -> Self {
        Self {
            base_url: base_url.into(),
            client: Client::new(),
            user_id,
        }
    }

    /// Submit an AI response for analysis. Returns immediately; poll
    /// `get_analysis` for the verdicts.
    pub async fn submit_analysis(
        &self,
        request: &SubmitAnalysisRequest,
    ) -> Result<SubmitAnalysisResponse> {
        let url = format!("{}/api/v1/analyses", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-user-id", self.user_id.to_string())
            .json(request)
            .send()
            .await?;
        Self::parse(response).await
    }

    pub async fn get_analysis(&self, id: Uuid) -> Result<Analysis> {
        let url = format!("{}/api/v1/analyses/{}", self.base_url, id);
        let response = self
            .client
            .get(&url)
            .header("x-user-id", self.user_id.to_string())
            .send()
            .await?;
        Self::parse(response).await
    }

    pub async fn cancel_analysis(&self, id: Uuid) -> Result<()> {
        let url = format!("{}/api/v1/analyses/{}/cancel", self.base_url, id);
        let response = self
            .client
            .post(&url)
            .header("x-user-id", self.user_id.to_string())
            .send()
            .await?;
        if !response.status().is_success() {
            bail!("cancel failed with HTTP {}", response.status());
        }
        Ok(())
    }

    pub async fn history(&self) -> Result<AnalysisPage> {
        let url = format!("{}/api/v1/analyses", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("x-user-id", self.user_id.to_string())
            .send()
            .await?;
        Self::parse(response).await
    }

    pub async fn balance(&self) -> Result<Balance> {
        let url = format!("{}/api/v1/credits/balance", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("x-user-id", self.user_id.to_string())
            .send()
            .await?;
        Self::parse(response).await
    }

    pub async fn purchase_credits(&self, amount: i64) -> Result<Balance> {
        let url = format!("{}/api/v1/credits/purchase", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-user-id", self.user_id.to_string())
            .json(&serde_json::json!({ "amount": amount }))
            .send()
            .await?;
        Self::parse(response).await
    }

    pub async fn transactions(&self) -> Result<TransactionPage> {
        let url = format!("{}/api/v1/credits/transactions", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("x-user-id", self.user_id.to_string())
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn parse<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("HTTP {}: {}", status, body);
        }
        Ok(response.json().await?)
    }
}
