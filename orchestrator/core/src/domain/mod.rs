// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain Layer
//!
//! Entities, value objects and contracts for the analysis orchestrator and
//! the credit ledger. No I/O happens in this layer; persistence and provider
//! transports implement the traits defined here from `crate::infrastructure`.

pub mod analysis;
pub mod provider;
pub mod credit;
pub mod repository;
pub mod config;
pub mod error;
