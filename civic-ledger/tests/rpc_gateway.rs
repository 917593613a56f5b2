//! JsonRpcLedger against a mocked ledger gateway.

use std::time::Duration;

use civic_ledger::{JsonRpcLedger, JsonRpcLedgerConfig, LedgerAdapter, LedgerError};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn ledger(server: &MockServer) -> JsonRpcLedger {
    JsonRpcLedger::new(JsonRpcLedgerConfig {
        url: server.uri(),
        api_token: Some("secret".to_string()),
        timeout: Duration::from_secs(2),
        max_attempts: 3,
        backoff: Duration::from_millis(5),
    })
    .unwrap()
}

fn ok(result: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": result }))
}

fn rpc_error(code: i64, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "error": { "code": code, "message": message }
    }))
}

#[tokio::test]
async fn test_anchor_sends_prefixed_digest() {
    let server = MockServer::start().await;
    let digest = "ab".repeat(32);

    Mock::given(method("POST"))
        .and(header("authorization", "Bearer secret"))
        .and(body_partial_json(json!({
            "method": "anchor_manifest",
            "params": [12, format!("0x{}", digest)]
        })))
        .respond_with(ok(json!("0xfeed")))
        .expect(1)
        .mount(&server)
        .await;

    let tx = ledger(&server).anchor(12, &digest).await.unwrap();
    assert_eq!(tx, "0xfeed");
}

#[tokio::test]
async fn test_verify_normalizes_digest() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "verify_manifest", "params": [3] })))
        .respond_with(ok(json!(format!("0x{}", "CD".repeat(32)))))
        .mount(&server)
        .await;

    let digest = ledger(&server).verify(3).await.unwrap();
    assert_eq!(digest, "cd".repeat(32));
}

#[tokio::test]
async fn test_verify_zero_digest_is_not_anchored() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ok(json!(format!("0x{}", "0".repeat(64)))))
        .mount(&server)
        .await;

    let result = ledger(&server).verify(8).await;
    assert!(matches!(result, Err(LedgerError::NotAnchored(8))));
}

#[tokio::test]
async fn test_enumerate_collects_event_ids() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "get_anchor_events" })))
        .respond_with(ok(json!([
            { "complaintId": 1, "manifestHash": "0x01", "transactionHash": "0xa" },
            { "complaintId": 3, "manifestHash": "0x03", "transactionHash": "0xb" },
            { "complaintId": 1, "manifestHash": "0x11", "transactionHash": "0xc" }
        ])))
        .mount(&server)
        .await;

    let ids: Vec<i64> = ledger(&server)
        .enumerate_anchored_ids()
        .await
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(ids, vec![1, 3]);
}

#[tokio::test]
async fn test_nonce_conflict_retried_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(rpc_error(-32000, "nonce too low"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ok(json!("0xbeef")))
        .expect(1)
        .mount(&server)
        .await;

    let tx = ledger(&server).anchor(1, &"11".repeat(32)).await.unwrap();
    assert_eq!(tx, "0xbeef");
}

#[tokio::test]
async fn test_persistent_overload_surfaces_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let result = ledger(&server).anchor(1, &"11".repeat(32)).await;
    match result {
        Err(e) => assert!(e.is_transient()),
        Ok(tx) => panic!("expected transient failure, got {}", tx),
    }
}

#[tokio::test]
async fn test_revert_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(rpc_error(3, "execution reverted: not authorized"))
        .expect(1)
        .mount(&server)
        .await;

    let result = ledger(&server).anchor(1, &"11".repeat(32)).await;
    assert!(matches!(result, Err(LedgerError::Rpc { code: 3, .. })));
}

#[tokio::test]
async fn test_compare_detects_mismatch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ok(json!("aa".repeat(32))))
        .mount(&server)
        .await;

    let comparison = ledger(&server).compare(4, &"bb".repeat(32)).await.unwrap();
    assert!(!comparison.matches);
    assert_eq!(comparison.anchored_digest, "aa".repeat(32));
}
