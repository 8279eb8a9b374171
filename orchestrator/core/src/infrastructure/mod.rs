// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Infrastructure Layer
//!
//! Concrete implementations of the domain contracts: vendor LLM adapters,
//! the PostgreSQL connection pool, and the repository / ledger backends.

pub mod db;
pub mod providers;
pub mod repositories;
