// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Service Configuration Types
//
// Defines the YAML configuration schema for a Veracity node:
// - provider adapter configuration (endpoint, model, api key indirection)
// - orchestration policy knobs (deadline, quorum, consensus threshold, price)
// - storage backend selection
// - HTTP server binding
//
// Policy values (quorum, disagreement threshold, price) are knobs, not
// constants; defaults follow the documented service policy.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Provider adapter configurations; at least one enabled provider is
    /// required to serve analyses
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl ServiceConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", path.display(), e))?;
        let config: ServiceConfig = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.orchestrator.min_quorum == 0 {
            anyhow::bail!("orchestrator.min_quorum must be at least 1");
        }
        if self.orchestrator.cost_per_analysis <= 0 {
            anyhow::bail!("orchestrator.cost_per_analysis must be positive");
        }
        if self.orchestrator.disagreement_threshold < 0.0 {
            anyhow::bail!("orchestrator.disagreement_threshold must be non-negative");
        }
        let enabled = self.providers.iter().filter(|p| p.enabled).count();
        if enabled == 0 {
            anyhow::bail!("at least one enabled provider is required");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "kebab-case")]
pub enum StorageConfig {
    InMemory,
    Postgres { connection_string: String },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::InMemory
    }
}

/// Orchestration policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Shared absolute deadline for one analysis; adapters exceeding it are
    /// recorded as timeouts
    #[serde(default = "default_max_latency", with = "humantime_serde")]
    pub max_analysis_latency: Duration,

    /// How long the coordinator waits for cancelled tasks to wind down
    #[serde(default = "default_grace_period", with = "humantime_serde")]
    pub grace_period: Duration,

    /// Minimum successful providers for a billable analysis
    #[serde(default = "default_min_quorum")]
    pub min_quorum: usize,

    /// Max-minus-min score spread above which consensus is `Disputed`
    #[serde(default = "default_disagreement_threshold")]
    pub disagreement_threshold: f64,

    /// Flat credit price per analysis
    #[serde(default = "default_cost_per_analysis")]
    pub cost_per_analysis: i64,

    /// Balance granted when an account is first seen
    #[serde(default = "default_initial_balance")]
    pub initial_balance: i64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_analysis_latency: default_max_latency(),
            grace_period: default_grace_period(),
            min_quorum: default_min_quorum(),
            disagreement_threshold: default_disagreement_threshold(),
            cost_per_analysis: default_cost_per_analysis(),
            initial_balance: default_initial_balance(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Stable provider id ("openai", "anthropic", "gemini")
    pub name: String,

    /// Adapter type
    #[serde(rename = "type")]
    pub provider_type: String,

    /// API endpoint URL; adapters supply their vendor default when omitted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Model identifier passed to the vendor API
    pub model: String,

    /// API key (supports "env:VAR_NAME" indirection)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_max_latency() -> Duration {
    Duration::from_secs(60)
}

fn default_grace_period() -> Duration {
    Duration::from_millis(250)
}

fn default_min_quorum() -> usize {
    1
}

fn default_disagreement_threshold() -> f64 {
    20.0
}

fn default_cost_per_analysis() -> i64 {
    10
}

fn default_initial_balance() -> i64 {
    100
}

fn default_true() -> bool {
    true
}
