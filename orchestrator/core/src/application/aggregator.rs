// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Verdict Aggregator - Consensus over Provider Breakdowns
//
// Pure functions from an ordered breakdown to one composite result. No
// hidden state: the same breakdown and policy always produce a bit-identical
// `AnalysisResult`, which keeps re-aggregation and test replay deterministic.

use crate::domain::analysis::{AnalysisResult, AnalysisStatus, ConsensusLabel, ProviderResult};

/// Aggregation policy knobs, copied out of `OrchestratorConfig` so the
/// aggregator has no dependency on the configuration layer.
#[derive(Debug, Clone, Copy)]
pub struct AggregationPolicy {
    pub disagreement_threshold: f64,
    pub min_quorum: usize,
}

/// Classify a completed batch.
///
/// Quorum gates billability first: fewer than `min_quorum` successes is
/// `Failed` even when every configured adapter succeeded. At or above
/// quorum, `FullSuccess` when every adapter succeeded, `PartialSuccess`
/// otherwise.
pub fn classify(breakdown: &[ProviderResult], min_quorum: usize) -> AnalysisStatus {
    let successes = breakdown.iter().filter(|r| r.outcome.is_success()).count();
    if successes < min_quorum.max(1) {
        AnalysisStatus::Failed
    } else if successes == breakdown.len() {
        AnalysisStatus::FullSuccess
    } else {
        AnalysisStatus::PartialSuccess
    }
}

/// Reduce an ordered breakdown into the composite result.
///
/// Composite score is the confidence-weighted mean of successful verdicts;
/// when every confidence is zero or absent the unweighted mean is used.
/// Consensus compares the max-min spread of successful scores against the
/// disagreement threshold. With zero successes the composite is undefined
/// and the result is `Failed`.
pub fn aggregate(breakdown: Vec<ProviderResult>, policy: &AggregationPolicy) -> AnalysisResult {
    let status = classify(&breakdown, policy.min_quorum);

    let scored: Vec<(f64, f64)> = breakdown
        .iter()
        .filter_map(|r| r.outcome.verdict())
        .map(|v| (v.score, v.confidence))
        .collect();

    if scored.is_empty() || status == AnalysisStatus::Failed {
        return AnalysisResult {
            composite_score: None,
            consensus: None,
            breakdown,
            status: AnalysisStatus::Failed,
        };
    }

    let total_weight: f64 = scored.iter().map(|(_, w)| w).sum();
    let composite = if total_weight > 0.0 {
        scored.iter().map(|(s, w)| s * w).sum::<f64>() / total_weight
    } else {
        scored.iter().map(|(s, _)| s).sum::<f64>() / scored.len() as f64
    };

    let max = scored.iter().map(|(s, _)| *s).fold(f64::MIN, f64::max);
    let min = scored.iter().map(|(s, _)| *s).fold(f64::MAX, f64::min);
    let consensus = if max - min <= policy.disagreement_threshold {
        ConsensusLabel::Agreement
    } else {
        ConsensusLabel::Disputed
    };

    AnalysisResult {
        composite_score: Some(composite),
        consensus: Some(consensus),
        breakdown,
        status,
    }
}
