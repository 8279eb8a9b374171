// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Veracity Core
//!
//! Multi-provider analysis orchestration with a transactional credit ledger.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Domain model, fan-out coordination, verdict aggregation,
//!   credit ledger, persistence and HTTP presentation

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
