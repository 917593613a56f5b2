//! Oracles against a mocked OpenAI-compatible server.

use std::sync::Arc;
use std::time::Duration;

use civic_oracle::backend::OpenAiBackend;
use civic_oracle::{
    Embedder, ImageInput, LlmBackend, LlmError, LlmTextTriage, LlmVisionOracle, OpenAiEmbedder,
    OpenAiTranscriber, OracleError, RetryPolicy, TextTriageOracle, Transcriber, VisionOracle,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        timeout: Duration::from_secs(2),
        backoff: Duration::from_millis(5),
    }
}

fn chat_reply(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{ "message": { "content": content }, "finish_reason": "stop" }],
        "usage": { "prompt_tokens": 10, "completion_tokens": 5 }
    }))
}

fn backend(server: &MockServer) -> Arc<OpenAiBackend> {
    Arc::new(OpenAiBackend::new(format!("{}/v1", server.uri()), "test-model", Some("key".into())).unwrap())
}

#[tokio::test]
async fn test_chat_completion_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer key"))
        .and(body_partial_json(json!({ "model": "test-model", "stream": false })))
        .respond_with(chat_reply("hello"))
        .expect(1)
        .mount(&server)
        .await;

    let response = backend(&server)
        .complete(civic_oracle::CompletionRequest::user("hi"))
        .await
        .unwrap();
    assert_eq!(response.content, "hello");
    assert_eq!(response.usage.total(), 15);
}

#[tokio::test]
async fn test_rate_limit_maps_to_transient_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "2"))
        .mount(&server)
        .await;

    let result = backend(&server)
        .complete(civic_oracle::CompletionRequest::user("hi"))
        .await;
    match result {
        Err(LlmError::RateLimited { retry_after_ms }) => assert_eq!(retry_after_ms, Some(2000)),
        other => panic!("expected rate limit, got {:?}", other.map(|r| r.content)),
    }
}

#[tokio::test]
async fn test_triage_recovers_from_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "response_format": { "type": "json_object" } })))
        .respond_with(chat_reply(
            r#"{"category":"Sanitation","severity":5,"translated_title_en":"Garbage","summary_en":"Garbage pile","detected_language":"en","is_urgent":false}"#,
        ))
        .mount(&server)
        .await;

    let oracle = LlmTextTriage::new(backend(&server), retry());
    let triage = oracle.triage("Garbage", "Garbage pile near market").await.unwrap();
    assert_eq!(triage.category, "Sanitation");
    assert_eq!(triage.severity, 5.0);
}

#[tokio::test]
async fn test_triage_bad_request_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad model"))
        .expect(1)
        .mount(&server)
        .await;

    let oracle = LlmTextTriage::new(backend(&server), retry());
    let err = oracle.triage("t", "d").await.unwrap_err();
    assert!(matches!(err, OracleError::Unavailable(LlmError::RequestFailed(_))));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_vision_sends_data_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(chat_reply(r#"{"is_relevant": true, "confidence_score": 7, "remarks": "drain visible"}"#))
        .expect(1)
        .mount(&server)
        .await;

    let oracle = LlmVisionOracle::new(backend(&server), retry());
    let verdict = oracle
        .assess(&ImageInput::new("image/jpeg", vec![0xff, 0xd8, 0xff]), "Blocked drain")
        .await
        .unwrap();
    assert_eq!(verdict.confidence_score, 7);

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let url = body["messages"][0]["content"][1]["image_url"]["url"].as_str().unwrap();
    assert!(url.starts_with("data:image/jpeg;base64,"));
}

#[tokio::test]
async fn test_transcription_multipart() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/transcriptions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "text": " Paani nahi aa raha " })))
        .expect(1)
        .mount(&server)
        .await;

    let transcriber =
        OpenAiTranscriber::new(format!("{}/v1", server.uri()), "whisper-large-v3", None, retry()).unwrap();
    let text = transcriber.transcribe(b"RIFF....WAVE", "note.wav").await.unwrap();
    assert_eq!(text, "Paani nahi aa raha");

    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains("whisper-large-v3"));
    assert!(body.contains("note.wav"));
}

#[tokio::test]
async fn test_embeddings_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(body_partial_json(json!({ "model": "embed-small", "input": "pothole" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "embedding": [0.1, 0.2, 0.3], "index": 0 }]
        })))
        .mount(&server)
        .await;

    let embedder = OpenAiEmbedder::new(format!("{}/v1", server.uri()), "embed-small", None, retry()).unwrap();
    assert_eq!(embedder.embed("pothole").await.unwrap(), vec![0.1, 0.2, 0.3]);
    assert_eq!(embedder.id(), "embed-small");
}

#[test]
fn test_hashing_embedder_on_blocking_runtime() {
    let embedder = civic_oracle::HashingEmbedder::default();
    let vector = tokio_test::block_on(embedder.embed("Open manhole on Station Road")).unwrap();
    assert_eq!(vector.len(), 256);
}
