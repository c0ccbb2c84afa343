//! Integration tests for the local HTTP API
//!
//! Requests go through the router with `tower::ServiceExt::oneshot`.

mod helpers;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use helpers::{MockUpstream, TestEngine};
use serde_json::Value;
use std::time::Duration;
use tower::ServiceExt;

async fn request(engine: &TestEngine, method: Method, path: &str) -> (StatusCode, Value) {
    let response = engine
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(path)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn test_health() {
    let engine = TestEngine::start(&MockUpstream::scenario()).await;
    let (status, body) = request(&engine, Method::GET, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "dss-fulfill");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_buckets_snapshot() {
    let engine = TestEngine::start(&MockUpstream::scenario()).await;
    engine.loaded().await;

    let (status, body) = request(&engine, Method::GET, "/buckets").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["counts"]["tier1"], 1);
    assert_eq!(body["counts"]["needs_review"], 1);
    assert_eq!(body["actor"], "u1");
    assert_eq!(body["views"]["tier1"][0]["_id"], "a");
    assert_eq!(body["views"]["tier1"][0]["productIdentifier"], "P-1");
    assert_eq!(body["views"]["needs_review"][0]["docType"], "revTree");
}

#[tokio::test]
async fn test_single_bucket_and_unknown_name() {
    let engine = TestEngine::start(&MockUpstream::scenario()).await;
    engine.loaded().await;

    let (status, body) = request(&engine, Method::GET, "/buckets/tier3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["bucket"], "tier3");
    assert_eq!(body["records"].as_array().unwrap().len(), 1);
    assert_eq!(body["records"][0]["_id"], "c");

    let (status, _) = request(&engine, Method::GET, "/buckets/tier4").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_status() {
    let mut engine = TestEngine::start(&MockUpstream::scenario()).await;
    let _peer = engine.listener.accept().await.unwrap();
    engine.loaded().await;

    let mut status_rx = engine.session.subscribe_status();
    tokio::time::timeout(
        Duration::from_secs(5),
        status_rx.wait_for(|s| s.connection == dss_common::ConnectionState::Open),
    )
    .await
    .unwrap()
    .unwrap();

    let (status, body) = request(&engine, Method::GET, "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["actor_id"], "u1");
    assert_eq!(body["connection"], "open");
    assert_eq!(body["records_loaded"], 4);
    assert_eq!(body["pending"], 3);
    assert!(body["last_fetch_error"].is_null());
}

#[tokio::test]
async fn test_queue_forwards_without_touching_views() {
    let upstream = MockUpstream::scenario();
    let engine = TestEngine::start(&upstream).await;
    let before = engine.loaded().await;

    let (status, _) = request(&engine, Method::POST, "/records/record/a/queue").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let (status, _) = request(&engine, Method::POST, "/records/revTree/r1/dequeue").await;
    assert_eq!(status, StatusCode::ACCEPTED);

    assert_eq!(
        upstream.actions(),
        vec!["queue record a".to_string(), "dequeue revTree r1".to_string()]
    );
    // Views change only via the live feed
    let after = engine.session.latest();
    assert_eq!(after.revision, before.revision);
    assert_eq!(after.views.bucket_of("a"), before.views.bucket_of("a"));
}

#[tokio::test]
async fn test_queue_rejects_unknown_doc_type() {
    let upstream = MockUpstream::scenario();
    let engine = TestEngine::start(&upstream).await;

    let (status, _) = request(&engine, Method::POST, "/records/invoice/a/queue").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(upstream.actions().is_empty());
}

#[tokio::test]
async fn test_record_detail() {
    let engine = TestEngine::start(&MockUpstream::scenario()).await;

    let (status, body) = request(&engine, Method::GET, "/records/revTree/r1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["_id"], "r1");

    let (status, _) = request(&engine, Method::GET, "/records/record/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reload_accepted() {
    let upstream = MockUpstream::scenario();
    let engine = TestEngine::start(&upstream).await;
    engine.loaded().await;

    let (status, _) = request(&engine, Method::POST, "/reload").await;
    assert_eq!(status, StatusCode::ACCEPTED);

    tokio::time::timeout(Duration::from_secs(5), async {
        while upstream.state.lock().unwrap().pending_fetches < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_encoded_slash_stays_inside_record_id() {
    let upstream = MockUpstream::scenario();
    let engine = TestEngine::start(&upstream).await;

    let (status, _) = request(
        &engine,
        Method::POST,
        "/records/record/a%2F..%2F..%2F..%2Fdequeue%2FrevTree%2Fvictim/queue",
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(
        upstream.actions(),
        vec!["queue record a/../../../dequeue/revTree/victim".to_string()]
    );
}

#[tokio::test]
async fn test_dot_segment_record_id_rejected() {
    let upstream = MockUpstream::scenario();
    let engine = TestEngine::start(&upstream).await;

    let (status, _) = request(&engine, Method::POST, "/records/record/%2E%2E/dequeue").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(upstream.actions().is_empty());
}

#[tokio::test]
async fn test_reference_data_proxied() {
    let engine = TestEngine::start(&MockUpstream::scenario()).await;

    let (status, body) = request(&engine, Method::GET, "/manufacturers").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["manufacturers"][0]["name"], "Acme");

    let (status, body) = request(
        &engine,
        Method::GET,
        "/datasheets/search?productIdentifier=P-1&aka=X1,%20X2",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["matches"][0], "productIdentifier=P-1&aka=X1%2CX2");

    // Nothing to match on: answered locally
    let (status, body) = request(&engine, Method::GET, "/datasheets/search").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["matches"], serde_json::json!([]));
}

#[tokio::test]
async fn test_reference_data_upstream_missing_route() {
    let engine = TestEngine::start(&MockUpstream::scenario()).await;

    // The mock backend has no clients listing
    let (status, _) = request(&engine, Method::GET, "/clients").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
