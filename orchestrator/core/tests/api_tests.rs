// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// HTTP surface tests: routing, caller identification, status codes and the
// JSON shapes the SDK depends on.

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use common::{harness, test_policy, ScriptedAdapter};
use veracity_core::domain::provider::ProviderError;
use veracity_core::presentation::api::app;

fn default_app() -> Router {
    let h = harness(
        vec![
            ScriptedAdapter::ok("anthropic", 10, 80.0, 0.8),
            ScriptedAdapter::ok("openai", 10, 70.0, 0.8),
        ],
        test_policy(),
    );
    app(h.service)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, user: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-user-id", user)
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str, user: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("x-user-id", user)
        .body(Body::empty())
        .unwrap()
}

async fn submit_and_complete(app: &Router, user: &str) -> String {
    let (status, body) = send(
        app,
        post_json("/api/v1/analyses", user, json!({"text": "we cannot lose"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let id = body["id"].as_str().unwrap().to_string();

    for _ in 0..200 {
        let (status, body) = send(app, get(&format!("/api/v1/analyses/{}", id), user)).await;
        assert_eq!(status, StatusCode::OK);
        match body["status"].as_str().unwrap() {
            "pending" | "running" => {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await
            }
            _ => return id,
        }
    }
    panic!("analysis {} never completed", id);
}

#[tokio::test]
async fn missing_caller_header_is_a_bad_request() {
    let app = default_app();
    let request = Request::builder()
        .method("GET")
        .uri("/api/v1/credits/balance")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("x-user-id"));
}

#[tokio::test]
async fn empty_text_is_rejected() {
    let app = default_app();
    let user = Uuid::new_v4().to_string();
    let (status, _) = send(
        &app,
        post_json("/api/v1/analyses", &user, json!({"text": "   "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn submit_then_fetch_shows_composite_and_breakdown() {
    let app = default_app();
    let user = Uuid::new_v4().to_string();
    let id = submit_and_complete(&app, &user).await;

    let (status, body) = send(&app, get(&format!("/api/v1/analyses/{}", id), &user)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "full_success");
    assert_eq!(body["result"]["composite_score"], json!(75.0));
    assert_eq!(body["result"]["breakdown"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn completed_analysis_debits_the_balance() {
    let app = default_app();
    let user = Uuid::new_v4().to_string();

    let (_, body) = send(&app, get("/api/v1/credits/balance", &user)).await;
    assert_eq!(body["balance"], json!(100));

    submit_and_complete(&app, &user).await;

    let (_, body) = send(&app, get("/api/v1/credits/balance", &user)).await;
    assert_eq!(body["balance"], json!(90));
}

#[tokio::test]
async fn insufficient_balance_is_payment_required() {
    let mut policy = test_policy();
    policy.initial_balance = 3;
    let h = harness(vec![ScriptedAdapter::ok("openai", 10, 80.0, 0.8)], policy);
    let app = app(h.service);
    let user = Uuid::new_v4().to_string();

    let (status, body) = send(
        &app,
        post_json("/api/v1/analyses", &user, json!({"text": "claim"})),
    )
    .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["balance"], json!(3));
    assert_eq!(body["required"], json!(10));
}

#[tokio::test]
async fn purchase_tops_up_and_appears_in_the_feed() {
    let app = default_app();
    let user = Uuid::new_v4().to_string();

    let (status, body) = send(
        &app,
        post_json("/api/v1/credits/purchase", &user, json!({"amount": 40})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["balance"], json!(140));

    let (_, body) = send(&app, get("/api/v1/credits/transactions", &user)).await;
    let kinds: Vec<&str> = body["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["kind"].as_str().unwrap())
        .collect();
    // Newest first: the purchase precedes the welcome grant
    assert_eq!(kinds, vec!["purchase", "purchase"]);
}

#[tokio::test]
async fn non_positive_purchase_is_rejected() {
    let app = default_app();
    let user = Uuid::new_v4().to_string();
    let (status, _) = send(
        &app,
        post_json("/api/v1/credits/purchase", &user, json!({"amount": 0})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_analysis_is_not_found() {
    let app = default_app();
    let user = Uuid::new_v4().to_string();
    let (status, _) = send(
        &app,
        get(&format!("/api/v1/analyses/{}", Uuid::new_v4()), &user),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cancel_of_a_finished_analysis_conflicts() {
    let app = default_app();
    let user = Uuid::new_v4().to_string();
    let id = submit_and_complete(&app, &user).await;

    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/v1/analyses/{}/cancel", id))
        .header("x-user-id", &user)
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn cancel_of_a_slow_analysis_fails_it_without_charge() {
    let h = harness(
        vec![ScriptedAdapter::ok("slow", 10_000, 80.0, 0.8)],
        test_policy(),
    );
    let app = app(h.service);
    let user = Uuid::new_v4().to_string();

    let (_, body) = send(
        &app,
        post_json("/api/v1/analyses", &user, json!({"text": "claim"})),
    )
    .await;
    let id = body["id"].as_str().unwrap().to_string();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/v1/analyses/{}/cancel", id))
        .header("x-user-id", &user)
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = send(&app, get(&format!("/api/v1/analyses/{}", id), &user)).await;
    assert_eq!(body["status"], "failed");

    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    let (_, body) = send(&app, get("/api/v1/credits/balance", &user)).await;
    assert_eq!(body["balance"], json!(100));
}

#[tokio::test]
async fn history_lists_only_the_callers_analyses() {
    let app = default_app();
    let alice = Uuid::new_v4().to_string();
    let bob = Uuid::new_v4().to_string();
    submit_and_complete(&app, &alice).await;

    let (_, body) = send(&app, get("/api/v1/analyses", &alice)).await;
    assert_eq!(body["items"].as_array().unwrap().len(), 1);

    let (_, body) = send(&app, get("/api/v1/analyses", &bob)).await;
    assert!(body["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn history_pages_with_a_restartable_cursor() {
    let app = default_app();
    let user = Uuid::new_v4().to_string();
    for _ in 0..3 {
        submit_and_complete(&app, &user).await;
    }

    let (status, body) = send(&app, get("/api/v1/analyses?limit=2", &user)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"].as_array().unwrap().len(), 2);
    let next = &body["next"];
    assert!(!next.is_null(), "a further page should be announced");

    let uri = format!(
        "/api/v1/analyses?limit=2&before_submitted_at={}&before_id={}",
        urlencode(next["before_submitted_at"].as_str().unwrap()),
        next["before_id"].as_str().unwrap(),
    );
    let (status, body) = send(&app, get(&uri, &user)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
    assert!(body["next"].is_null());
}

// Minimal percent-encoding for the RFC 3339 cursor timestamp
fn urlencode(raw: &str) -> String {
    raw.replace('+', "%2B").replace(':', "%3A")
}

#[tokio::test]
async fn provider_failures_stay_provider_scoped() {
    let h = harness(
        vec![
            ScriptedAdapter::ok("good", 10, 64.0, 0.9),
            ScriptedAdapter::err("flaky", 10, ProviderError::RateLimit),
        ],
        test_policy(),
    );
    let app = app(h.service);
    let user = Uuid::new_v4().to_string();
    let id = submit_and_complete(&app, &user).await;

    let (_, body) = send(&app, get(&format!("/api/v1/analyses/{}", id), &user)).await;
    assert_eq!(body["status"], "partial_success");
    let breakdown = body["result"]["breakdown"].as_array().unwrap();
    let flaky = breakdown
        .iter()
        .find(|r| r["provider"] == "flaky")
        .unwrap();
    assert_eq!(flaky["outcome"]["kind"], "error");
    assert_eq!(flaky["outcome"]["reason"], "rate_limited");
}
