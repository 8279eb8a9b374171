// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Presentation Layer
//!
//! HTTP surface of the orchestrator. Thin by design: handlers translate
//! between wire DTOs and the analysis service, nothing more.

pub mod api;
