// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

/// Veracity Rust SDK
///
/// Submit AI responses for multi-provider reality checks and manage the
/// prepaid credit balance.

pub mod client;
pub mod types;

pub use client::VeracityClient;
pub use types::*;
