//! End-to-end HTTP tests over scripted pages.
//!
//! Tests cover:
//! 1. Chat and legacy completions, JSON and SSE, and client disconnects
//! 2. Error mapping for bad requests, credentials and pool limits
//! 3. Session administration and health

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use webbridge_browser::testing::{FakeProbeFactory, ScriptedSurface};
use webbridge_browser::SurfaceRegistry;
use webbridge_config::WebbridgeConfig;
use webbridge_protocol::Backend;
use webbridge_server::{build_bridge_with, WebbridgeServer};

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

const AUTH: &str = "Bearer sessionKey=abc";

fn fast_config() -> WebbridgeConfig {
    let mut config = WebbridgeConfig::default();
    config.claude.poll_interval_ms = 10;
    config.claude.settle_delay_ms = 20;
    config.claude.start_grace_ms = 100;
    config.claude.timeout_secs = 5;
    config.copilot.poll_interval_ms = 10;
    config.copilot.settle_delay_ms = 20;
    config.copilot.start_grace_ms = 100;
    config.copilot.timeout_secs = 5;
    config
}

struct TestServer {
    base_url: String,
    factory: Arc<FakeProbeFactory>,
}

async fn start_server(config: WebbridgeConfig, surfaces: Vec<ScriptedSurface>) -> TestServer {
    let surfaces = surfaces.into_iter().map(Arc::new).collect();
    start_server_with(config, FakeProbeFactory::new(), surfaces).await
}

async fn start_server_with(
    config: WebbridgeConfig,
    factory: FakeProbeFactory,
    surfaces: Vec<Arc<ScriptedSurface>>,
) -> TestServer {
    let factory = Arc::new(factory);
    let registry = surfaces
        .into_iter()
        .fold(SurfaceRegistry::new(), |registry, surface| {
            registry.with(surface)
        });
    let bridge = Arc::new(build_bridge_with(&config, factory.clone(), registry));

    let app = WebbridgeServer::new(bridge).router();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum_serve(listener, app).await;
    });

    TestServer {
        base_url: format!("http://127.0.0.1:{}", addr.port()),
        factory,
    }
}

async fn axum_serve(listener: TcpListener, app: axum::Router) {
    axum::serve(listener, app).await.unwrap();
}

fn claude(frames: &[(&str, bool)]) -> ScriptedSurface {
    ScriptedSurface::new(Backend::ClaudeChat, frames)
}

fn copilot(frames: &[(&str, bool)]) -> ScriptedSurface {
    ScriptedSurface::new(Backend::CopilotCode, frames)
}

fn hello_surfaces() -> Vec<ScriptedSurface> {
    vec![
        claude(&[("Hello", true), ("Hello, wor", true), ("Hello, world", false)]),
        copilot(&[("x = ", true), ("x = 1", false)]),
    ]
}

fn chat_body(model: &str, stream: bool) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "messages": [{"role": "user", "content": "hi"}],
        "stream": stream
    })
}

/// `data:` payloads of an SSE body, in order.
fn sse_data(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.trim_start().to_string())
        .collect()
}

async fn post(server: &TestServer, path: &str, body: &serde_json::Value) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("{}{}", server.base_url, path))
        .header("authorization", AUTH)
        .json(body)
        .send()
        .await
        .unwrap()
}

// ---------------------------------------------------------------------------
// Completions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_chat_completion_json() {
    let server = start_server(fast_config(), hello_surfaces()).await;

    let resp = post(&server, "/v1/chat/completions", &chat_body("web_claude", false)).await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["model"], "web_claude");
    assert_eq!(body["choices"][0]["message"]["role"], "assistant");
    assert_eq!(body["choices"][0]["message"]["content"], "Hello, world");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
}

#[tokio::test]
async fn test_chat_completion_stream() {
    let server = start_server(fast_config(), hello_surfaces()).await;

    let resp = post(&server, "/v1/chat/completions", &chat_body("web_claude/chat", true)).await;
    assert_eq!(resp.status(), 200);
    assert!(resp.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let data = sse_data(&resp.text().await.unwrap());
    assert_eq!(data.last().map(String::as_str), Some("[DONE]"));

    let chunks: Vec<serde_json::Value> = data[..data.len() - 1]
        .iter()
        .map(|d| serde_json::from_str(d).unwrap())
        .collect();
    assert!(chunks.iter().all(|c| c["object"] == "chat.completion.chunk"));
    assert_eq!(chunks[0]["choices"][0]["delta"]["role"], "assistant");
    assert!(chunks[0]["choices"][0]["delta"].get("content").is_none());

    let last = chunks.last().unwrap();
    assert_eq!(last["choices"][0]["finish_reason"], "stop");

    let content: String = chunks
        .iter()
        .filter_map(|c| c["choices"][0]["delta"]["content"].as_str())
        .collect();
    assert_eq!(content, "Hello, world");
}

#[tokio::test]
async fn test_legacy_completion_stream() {
    let server = start_server(fast_config(), hello_surfaces()).await;

    let body = serde_json::json!({
        "model": "web_copilot",
        "prompt": "language: python\nx = ",
        "stream": true
    });
    let resp = post(&server, "/v1/completions", &body).await;
    assert_eq!(resp.status(), 200);

    let data = sse_data(&resp.text().await.unwrap());
    assert_eq!(data.last().map(String::as_str), Some("[DONE]"));
    let chunks: Vec<serde_json::Value> = data[..data.len() - 1]
        .iter()
        .map(|d| serde_json::from_str(d).unwrap())
        .collect();

    assert!(chunks.iter().all(|c| c["object"] == "text_completion"));
    assert_eq!(chunks[0]["choices"][0]["text"], "");
    let text: String = chunks
        .iter()
        .filter_map(|c| c["choices"][0]["text"].as_str())
        .collect();
    assert_eq!(text, "x = 1");
    assert_eq!(chunks.last().unwrap()["choices"][0]["finish_reason"], "stop");
}

#[tokio::test]
async fn test_legacy_completion_json() {
    let server = start_server(fast_config(), hello_surfaces()).await;

    let body = serde_json::json!({"model": "web_copilot/github", "prompt": ["x", " = "]});
    let resp = post(&server, "/v1/completions", &body).await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["object"], "text_completion");
    assert_eq!(body["choices"][0]["text"], "x = 1");
    assert_eq!(body["usage"]["total_tokens"], 0);
}

#[tokio::test]
async fn test_timeout_is_not_an_http_error() {
    let mut config = fast_config();
    config.claude.timeout_secs = 1;
    let server = start_server(config, vec![claude(&[("still going", true)])]).await;

    let resp = post(&server, "/v1/chat/completions", &chat_body("web_claude", false)).await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["choices"][0]["message"]["content"], "still going");
    assert_eq!(body["choices"][0]["finish_reason"], "timeout");
}

#[tokio::test]
async fn test_stream_timeout_finish_reason() {
    let mut config = fast_config();
    config.claude.timeout_secs = 1;
    let server = start_server(config, vec![claude(&[("partial", true)])]).await;

    let resp = post(&server, "/v1/chat/completions", &chat_body("web_claude", true)).await;
    let data = sse_data(&resp.text().await.unwrap());

    let finish: serde_json::Value = serde_json::from_str(&data[data.len() - 2]).unwrap();
    assert_eq!(finish["choices"][0]["finish_reason"], "timeout");
    assert_eq!(data.last().map(String::as_str), Some("[DONE]"));
}

#[tokio::test]
async fn test_client_disconnect_stops_polling() {
    let mut config = fast_config();
    config.claude.timeout_secs = 30;
    let surface = Arc::new(claude(&[("partial", true)]));
    let server = start_server_with(config, FakeProbeFactory::new(), vec![surface.clone()]).await;

    let mut resp = post(&server, "/v1/chat/completions", &chat_body("web_claude", true)).await;
    assert_eq!(resp.status(), 200);
    let first = resp.chunk().await.unwrap().unwrap();
    assert!(String::from_utf8_lossy(&first).contains("chat.completion.chunk"));
    drop(resp);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let polled = surface.events().len();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(surface.events().len(), polled);

    let sessions: serde_json::Value = reqwest::get(format!("{}/v1/sessions", server.base_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(sessions["data"][0]["busy"], false);
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_unsupported_model() {
    let server = start_server(fast_config(), hello_surfaces()).await;

    let resp = post(&server, "/v1/chat/completions", &chat_body("gpt-4o", false)).await;
    assert_eq!(resp.status(), 400);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "invalid_request_error");
    assert_eq!(body["error"]["code"], "model_not_found");
}

#[tokio::test]
async fn test_malformed_body() {
    let server = start_server(fast_config(), hello_surfaces()).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", server.base_url))
        .header("authorization", AUTH)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "invalid_request");
}

#[tokio::test]
async fn test_empty_messages_rejected() {
    let server = start_server(fast_config(), hello_surfaces()).await;

    let body = serde_json::json!({"model": "web_claude", "messages": []});
    let resp = post(&server, "/v1/chat/completions", &body).await;
    assert_eq!(resp.status(), 400);
    assert_eq!(server.factory.open_count(), 0);
}

#[tokio::test]
async fn test_missing_credentials_without_login() {
    let server = start_server(fast_config(), hello_surfaces()).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", server.base_url))
        .json(&chat_body("web_claude", false))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "login_required");
}

#[tokio::test]
async fn test_non_bearer_authorization() {
    let server = start_server(fast_config(), hello_surfaces()).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", server.base_url))
        .header("authorization", "Basic dXNlcjpwYXNz")
        .json(&chat_body("web_claude", false))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_failed_bootstrap_is_service_unavailable() {
    let server = start_server(
        fast_config(),
        vec![claude(&[("never", false)]).with_bootstrap_failures(1)],
    )
    .await;

    let resp = post(&server, "/v1/chat/completions", &chat_body("web_claude", false)).await;
    assert_eq!(resp.status(), 503);

    let resp = post(&server, "/v1/chat/completions", &chat_body("web_claude", false)).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(server.factory.open_count(), 2);
}

#[tokio::test]
async fn test_session_cap() {
    let mut config = fast_config();
    config.server.max_sessions = 1;
    let server = start_server(config, hello_surfaces()).await;

    let resp = post(&server, "/v1/chat/completions", &chat_body("web_claude", false)).await;
    assert_eq!(resp.status(), 200);

    let resp = reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", server.base_url))
        .header("authorization", "Bearer sessionKey=other")
        .json(&chat_body("web_claude", false))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 429);
}

#[tokio::test]
async fn test_submit_failure_is_bad_gateway() {
    let server = start_server(
        fast_config(),
        vec![claude(&[("ok", false)]).with_submit_failures(1)],
    )
    .await;

    let resp = post(&server, "/v1/chat/completions", &chat_body("web_claude", false)).await;
    assert_eq!(resp.status(), 502);
}

// ---------------------------------------------------------------------------
// Administration
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_health() {
    let server = start_server(fast_config(), hello_surfaces()).await;

    let resp = reqwest::get(format!("{}/health", server.base_url)).await.unwrap();
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["uptime_secs"].is_u64());
    assert_eq!(body["active_sessions"], 0);
    assert!(chrono_like(body["time"].as_str().unwrap()));
    assert!(!body["version"].as_str().unwrap().is_empty());
}

fn chrono_like(value: &str) -> bool {
    value.len() >= 20 && value.as_bytes()[4] == b'-' && value.contains('T')
}

#[tokio::test]
async fn test_models() {
    let server = start_server(fast_config(), hello_surfaces()).await;

    let body: serde_json::Value = reqwest::get(format!("{}/v1/models", server.base_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["object"], "list");
    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap())
        .collect();
    assert_eq!(
        ids,
        vec!["web_claude", "web_claude/chat", "web_copilot", "web_copilot/github"]
    );
}

#[tokio::test]
async fn test_list_and_close_sessions() {
    let server = start_server(fast_config(), hello_surfaces()).await;
    let client = reqwest::Client::new();

    post(&server, "/v1/chat/completions", &chat_body("web_claude", false)).await;

    let list: serde_json::Value = client
        .get(format!("{}/v1/sessions", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let sessions = list["data"].as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["backend"], "claude_chat");
    assert_eq!(sessions[0]["busy"], false);
    let fingerprint = sessions[0]["fingerprint"].as_str().unwrap().to_string();
    assert_eq!(fingerprint.len(), 12);

    let health: serde_json::Value = reqwest::get(format!("{}/health", server.base_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["active_sessions"], 1);

    let resp = client
        .delete(format!("{}/v1/sessions/{}", server.base_url, fingerprint))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let closed: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(closed["closed"].as_array().unwrap().len(), 1);
    assert!(server.factory.probes()[0].is_closed());

    let resp = client
        .delete(format!("{}/v1/sessions/{}", server.base_url, fingerprint))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_concurrent_requests_share_one_session() {
    let server = Arc::new(start_server(fast_config(), hello_surfaces()).await);

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let server = server.clone();
            tokio::spawn(async move {
                let resp =
                    post(&server, "/v1/chat/completions", &chat_body("web_claude", false)).await;
                assert_eq!(resp.status(), 200);
                let body: serde_json::Value = resp.json().await.unwrap();
                body["choices"][0]["message"]["content"]
                    .as_str()
                    .unwrap()
                    .to_string()
            })
        })
        .collect();

    for handle in handles {
        let content = tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(content, "Hello, world");
    }
    assert_eq!(server.factory.open_count(), 1);
}
