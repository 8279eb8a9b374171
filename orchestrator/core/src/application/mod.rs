// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application Layer
//!
//! Orchestration use-cases built on the domain contracts: concurrent
//! provider fan-out, verdict aggregation, and the analysis service that ties
//! both to the credit ledger.

pub mod coordinator;
pub mod aggregator;
pub mod analysis_service;

pub use analysis_service::{AnalysisError, AnalysisService, StandardAnalysisService};
pub use coordinator::FanOutCoordinator;
