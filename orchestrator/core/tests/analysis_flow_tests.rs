// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// End-to-end orchestration tests over the in-memory backends: submission,
// fan-out, aggregation, billing and cancellation as one pipeline.

mod common;

use std::sync::Arc;

use common::{artifact, harness, test_policy, user, wait_terminal, ScriptedAdapter};
use veracity_core::application::{AnalysisError, AnalysisService};
use veracity_core::domain::analysis::{AnalysisStatus, ConsensusLabel, ProviderOutcome};
use veracity_core::domain::credit::{CommitOutcome, CreditLedger, TransactionKind};
use veracity_core::domain::provider::{ProviderAdapter, ProviderError};

#[tokio::test]
async fn successful_analysis_is_charged_exactly_once() {
    let h = harness(
        vec![
            ScriptedAdapter::ok("anthropic", 10, 80.0, 0.8),
            ScriptedAdapter::ok("openai", 10, 70.0, 0.8),
        ],
        test_policy(),
    );
    let u = user();

    let id = h.service.submit(u, artifact()).await.unwrap();
    let analysis = wait_terminal(&h.service, u, id).await;

    assert_eq!(analysis.status, AnalysisStatus::FullSuccess);
    let result = analysis.result.expect("terminal result");
    assert_eq!(result.composite_score, Some(75.0));
    assert_eq!(result.consensus, Some(ConsensusLabel::Agreement));
    assert_eq!(result.breakdown.len(), 2);

    // 100 welcome credits minus the flat price of 10
    assert_eq!(h.service.balance(u).await.unwrap(), 90);
    let page = h.service.transactions(u, None, 10).await.unwrap();
    let debits: Vec<_> = page
        .items
        .iter()
        .filter(|t| t.kind == TransactionKind::Debit)
        .collect();
    assert_eq!(debits.len(), 1);
    assert_eq!(debits[0].analysis_id, Some(id));
    assert_eq!(debits[0].amount, -10);
    h.ledger.reconcile(u).await.unwrap();
}

#[tokio::test]
async fn zero_successes_fail_without_charge() {
    let h = harness(
        vec![
            ScriptedAdapter::err("anthropic", 10, ProviderError::RateLimit),
            ScriptedAdapter::err("openai", 10, ProviderError::Network("refused".to_string())),
        ],
        test_policy(),
    );
    let u = user();

    let id = h.service.submit(u, artifact()).await.unwrap();
    let analysis = wait_terminal(&h.service, u, id).await;

    assert_eq!(analysis.status, AnalysisStatus::Failed);
    let result = analysis.result.unwrap();
    assert_eq!(result.composite_score, None);
    // Failed providers remain visible in the breakdown
    assert_eq!(result.breakdown.len(), 2);

    assert_eq!(h.service.balance(u).await.unwrap(), 100);
    let page = h.service.transactions(u, None, 10).await.unwrap();
    assert!(page.items.iter().all(|t| t.kind != TransactionKind::Debit));
}

#[tokio::test]
async fn insufficient_balance_rejects_before_any_provider_call() {
    let fast = ScriptedAdapter::ok("openai", 10, 80.0, 0.8);
    let mut policy = test_policy();
    policy.initial_balance = 5;
    policy.cost_per_analysis = 10;
    let h = harness(vec![fast.clone()], policy);
    let u = user();

    let err = h.service.submit(u, artifact()).await.unwrap_err();
    assert!(matches!(
        err,
        AnalysisError::InsufficientBalance { balance: 5, required: 10 }
    ));

    // No provider was invoked, no record created, nothing debited
    assert_eq!(fast.call_count(), 0);
    assert!(h.service.history(u, None, 10).await.unwrap().is_empty());
    let page = h.service.transactions(u, None, 10).await.unwrap();
    assert!(page.items.iter().all(|t| t.kind != TransactionKind::Debit));
}

#[tokio::test]
async fn timeout_yields_partial_success_and_one_debit() {
    let h = harness(
        vec![
            ScriptedAdapter::ok("fast", 10, 60.0, 0.9),
            ScriptedAdapter::ok("slow", 10_000, 60.0, 0.9),
        ],
        test_policy(),
    );
    let u = user();

    let id = h.service.submit(u, artifact()).await.unwrap();
    let analysis = wait_terminal(&h.service, u, id).await;

    assert_eq!(analysis.status, AnalysisStatus::PartialSuccess);
    let result = analysis.result.unwrap();
    assert_eq!(result.composite_score, Some(60.0));
    let slow = result
        .breakdown
        .iter()
        .find(|r| r.provider.as_str() == "slow")
        .unwrap();
    assert_eq!(slow.outcome, ProviderOutcome::Timeout);

    assert_eq!(h.service.balance(u).await.unwrap(), 90);
}

#[tokio::test]
async fn successes_below_quorum_fail_and_are_free() {
    let mut policy = test_policy();
    policy.min_quorum = 2;
    let h = harness(
        vec![
            ScriptedAdapter::ok("anthropic", 10, 80.0, 0.8),
            ScriptedAdapter::err("openai", 10, ProviderError::RateLimit),
        ],
        policy,
    );
    let u = user();

    let id = h.service.submit(u, artifact()).await.unwrap();
    let analysis = wait_terminal(&h.service, u, id).await;

    assert_eq!(analysis.status, AnalysisStatus::Failed);
    assert_eq!(h.service.balance(u).await.unwrap(), 100);
}

#[tokio::test]
async fn concurrent_debits_for_one_analysis_commit_once() {
    let h = harness(vec![ScriptedAdapter::ok("openai", 10, 80.0, 0.8)], test_policy());
    let u = user();
    h.ledger.open_account(u, 100).await.unwrap();
    let id = veracity_core::domain::analysis::AnalysisId::generate();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let ledger = h.ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger.commit_debit(u, id, 10, "race").await.unwrap()
        }));
    }

    let mut committed = 0;
    for handle in handles {
        if matches!(handle.await.unwrap(), CommitOutcome::Committed { .. }) {
            committed += 1;
        }
    }
    assert_eq!(committed, 1);
    assert_eq!(h.ledger.balance(u).await.unwrap(), 90);
    h.ledger.reconcile(u).await.unwrap();
}

#[tokio::test]
async fn cancellation_fails_the_analysis_and_never_bills() {
    let slow = ScriptedAdapter::ok("slow", 10_000, 80.0, 0.8);
    let h = harness(vec![slow.clone()], test_policy());
    let u = user();

    let id = h.service.submit(u, artifact()).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    h.service.cancel(u, id).await.unwrap();

    let analysis = h.service.get(u, id).await.unwrap();
    assert_eq!(analysis.status, AnalysisStatus::Failed);

    // Give the pipeline time to lose the finalize race and unwind
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    assert_eq!(h.service.balance(u).await.unwrap(), 100);

    let err = h.service.cancel(u, id).await.unwrap_err();
    assert!(matches!(err, AnalysisError::AlreadyCompleted(_)));
}

#[tokio::test]
async fn refund_restores_the_debit_once() {
    let h = harness(vec![ScriptedAdapter::ok("openai", 10, 80.0, 0.8)], test_policy());
    let u = user();

    let id = h.service.submit(u, artifact()).await.unwrap();
    wait_terminal(&h.service, u, id).await;
    assert_eq!(h.service.balance(u).await.unwrap(), 90);

    h.service.refund(u, id).await.unwrap();
    assert_eq!(h.service.balance(u).await.unwrap(), 100);

    // Idempotent; a second refund does not mint credits
    h.service.refund(u, id).await.unwrap();
    assert_eq!(h.service.balance(u).await.unwrap(), 100);
    h.ledger.reconcile(u).await.unwrap();
}

#[tokio::test]
async fn refund_of_a_failed_analysis_is_rejected() {
    let h = harness(
        vec![ScriptedAdapter::err("openai", 10, ProviderError::RateLimit)],
        test_policy(),
    );
    let u = user();

    let id = h.service.submit(u, artifact()).await.unwrap();
    wait_terminal(&h.service, u, id).await;

    let err = h.service.refund(u, id).await.unwrap_err();
    assert!(matches!(err, AnalysisError::NotBillable(_)));
}

#[tokio::test]
async fn users_cannot_see_each_others_analyses() {
    let h = harness(vec![ScriptedAdapter::ok("openai", 10, 80.0, 0.8)], test_policy());
    let alice = user();
    let bob = user();

    let id = h.service.submit(alice, artifact()).await.unwrap();
    wait_terminal(&h.service, alice, id).await;

    let err = h.service.get(bob, id).await.unwrap_err();
    assert!(matches!(err, AnalysisError::NotFound));
    assert!(h.service.history(bob, None, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn breakdown_order_is_stable_across_runs() {
    let adapters: Vec<Arc<dyn ProviderAdapter>> = vec![
        ScriptedAdapter::ok("gemini", 30, 50.0, 0.5),
        ScriptedAdapter::ok("anthropic", 5, 60.0, 0.5),
        ScriptedAdapter::ok("openai", 15, 70.0, 0.5),
    ];
    let h = harness(adapters, test_policy());
    let u = user();

    let id = h.service.submit(u, artifact()).await.unwrap();
    let analysis = wait_terminal(&h.service, u, id).await;

    let result = analysis.result.unwrap();
    let order: Vec<&str> = result
        .breakdown
        .iter()
        .map(|r| r.provider.as_str())
        .collect();
    assert_eq!(order, vec!["anthropic", "gemini", "openai"]);
}
