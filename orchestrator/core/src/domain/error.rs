// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::analysis::{AnalysisId, AnalysisStatus};

/// Invariant violations raised by the aggregates themselves.
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("value out of range: {0}")]
    OutOfRange(String),

    #[error("analysis {0} already finalized")]
    AlreadyFinalized(AnalysisId),

    #[error("cannot finalize with non-terminal status {0:?}")]
    NotTerminal(AnalysisStatus),
}
