use axum::extract::{Path, RawQuery, State};
use axum::http::{header, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use llm_gateway::config::{AzureConfig, ClaudeConfig, GatewayConfig, OpenAiConfig};
use llm_gateway::providers::Provider;
use llm_gateway::types::{ChatMessage, ChatRequest, EmbeddingInput, EmbeddingRequest, Role};
use llm_gateway::{build_router, AppState, ModelRouter, ProviderRegistry};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

// ────────────────────────────────────────────────────────────────
// Mock upstreams
// ────────────────────────────────────────────────────────────────

async fn spawn(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

type CapturedBody = Arc<Mutex<Option<Value>>>;

fn chat_completion_json(content: &str) -> Value {
    json!({
        "id": "chatcmpl-mock1",
        "object": "chat.completion",
        "created": 1_700_000_000,
        "model": "gpt-4o",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop",
        }],
        "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4},
    })
}

/// OpenAI-compatible upstream: chat, embeddings (echoing one vector per
/// input), and a models endpoint.
async fn spawn_mock_openai() -> SocketAddr {
    let app = Router::new()
        .route(
            "/v1/chat/completions",
            post(|| async { Json(chat_completion_json("pong")) }),
        )
        .route(
            "/v1/embeddings",
            post(|Json(body): Json<Value>| async move {
                let count = body["input"].as_array().map_or(1, Vec::len);
                let data: Vec<Value> = (0..count)
                    .map(|i| {
                        json!({"object": "embedding", "index": i, "embedding": [0.1, 0.2, 0.3]})
                    })
                    .collect();
                Json(json!({
                    "object": "list",
                    "data": data,
                    "model": body["model"],
                    "usage": {"prompt_tokens": 6, "total_tokens": 6},
                }))
            }),
        )
        .route(
            "/v1/models",
            get(|| async {
                Json(json!({
                    "object": "list",
                    "data": [
                        {"id": "gpt-4o", "created": 1, "owned_by": "openai"},
                        {"id": "gpt-4o-mini", "created": 2, "owned_by": "openai"},
                    ],
                }))
            }),
        );
    spawn(app).await
}

/// OpenAI-compatible upstream whose every endpoint returns HTTP 500.
async fn spawn_broken_upstream() -> SocketAddr {
    async fn boom() -> (StatusCode, Json<Value>) {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": {"message": "upstream exploded", "type": "server_error"}})),
        )
    }
    let app = Router::new()
        .route("/v1/chat/completions", post(boom))
        .route("/v1/models", get(boom))
        .route("/openai/models", get(boom));
    spawn(app).await
}

/// OpenAI-compatible streaming upstream that ends the SSE stream without a
/// finish_reason chunk and without a `[DONE]` marker.
async fn spawn_truncating_stream_upstream() -> SocketAddr {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            let chunk = |text: &str| {
                json!({
                    "id": "chatcmpl-s1",
                    "object": "chat.completion.chunk",
                    "created": 1,
                    "model": "gpt-4o",
                    "choices": [{"index": 0, "delta": {"content": text}, "finish_reason": null}],
                })
            };
            let body = format!("data: {}\n\ndata: {}\n\n", chunk("He"), chunk("llo"));
            ([(header::CONTENT_TYPE, "text/event-stream")], body)
        }),
    );
    spawn(app).await
}

/// Anthropic-compatible upstream capturing the last request body.
async fn spawn_mock_anthropic(captured: CapturedBody) -> SocketAddr {
    let app = Router::new()
        .route(
            "/v1/messages",
            post(
                |State(captured): State<CapturedBody>, Json(body): Json<Value>| async move {
                    *captured.lock().unwrap() = Some(body);
                    Json(json!({
                        "id": "msg_mock1",
                        "type": "message",
                        "role": "assistant",
                        "content": [{"type": "text", "text": "Bonjour"}],
                        "model": "claude-3-5-sonnet",
                        "stop_reason": "end_turn",
                        "stop_sequence": null,
                        "usage": {"input_tokens": 11, "output_tokens": 2},
                    }))
                },
            ),
        )
        .route(
            "/v1/models",
            get(|| async { Json(json!({"data": [{"id": "claude-3-5-sonnet"}]})) }),
        )
        .with_state(captured);
    spawn(app).await
}

/// Anthropic-compatible streaming upstream emitting the native event
/// protocol.
async fn spawn_streaming_anthropic() -> SocketAddr {
    let app = Router::new().route(
        "/v1/messages",
        post(|| async {
            let body = concat!(
                "event: message_start\n",
                "data: {\"message\":{\"id\":\"msg_s1\",\"type\":\"message\",\"role\":\"assistant\",\"content\":[],\"model\":\"claude-3-5-sonnet\",\"stop_reason\":null,\"usage\":{\"input_tokens\":7,\"output_tokens\":0}}}\n\n",
                "event: content_block_start\n",
                "data: {\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
                "event: content_block_delta\n",
                "data: {\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Salut\"}}\n\n",
                "event: message_delta\n",
                "data: {\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":2}}\n\n",
                "event: message_stop\n",
                "data: {}\n\n",
            );
            ([(header::CONTENT_TYPE, "text/event-stream")], body)
        }),
    );
    spawn(app).await
}

/// Azure-compatible upstream: deployment-scoped chat URL, broken discovery.
async fn spawn_mock_azure() -> SocketAddr {
    let app = Router::new()
        .route(
            "/openai/deployments/:deployment/chat/completions",
            post(
                |Path(deployment): Path<String>, RawQuery(query): RawQuery| async move {
                    assert_eq!(query.as_deref(), Some("api-version=2024-10-21"));
                    Json(chat_completion_json(&format!("served by {deployment}")))
                },
            ),
        )
        .route(
            "/openai/models",
            get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        );
    spawn(app).await
}

// ────────────────────────────────────────────────────────────────
// Gateway wiring helpers
// ────────────────────────────────────────────────────────────────

fn openai_config(addr: SocketAddr) -> OpenAiConfig {
    OpenAiConfig {
        enabled: true,
        api_key: "sk-test".to_string(),
        base_url: format!("http://{addr}"),
        organization: None,
    }
}

fn claude_config(addr: SocketAddr) -> ClaudeConfig {
    ClaudeConfig {
        enabled: true,
        api_key: "sk-ant-test".to_string(),
        base_url: format!("http://{addr}"),
        api_version: "2023-06-01".to_string(),
    }
}

fn azure_config(addr: SocketAddr) -> AzureConfig {
    AzureConfig {
        enabled: true,
        api_key: "az-test".to_string(),
        endpoint: format!("http://{addr}"),
        api_version: "2024-10-21".to_string(),
    }
}

fn gateway(config: GatewayConfig) -> (Arc<ProviderRegistry>, Arc<ModelRouter>) {
    let mapping = config.model_mapping.clone();
    let registry = Arc::new(ProviderRegistry::new(config, reqwest::Client::new()));
    let router = Arc::new(ModelRouter::new(registry.clone(), mapping));
    (registry, router)
}

async fn spawn_gateway(config: GatewayConfig) -> SocketAddr {
    let (registry, router) = gateway(config);
    spawn(build_router(AppState { registry, router })).await
}

fn chat_request(model: &str, stream: bool) -> ChatRequest {
    ChatRequest {
        model: model.to_string(),
        messages: vec![
            ChatMessage::new(Role::System, "Be terse"),
            ChatMessage::new(Role::User, "Hi"),
        ],
        max_tokens: None,
        temperature: None,
        top_p: None,
        frequency_penalty: None,
        presence_penalty: None,
        stream,
    }
}

// ────────────────────────────────────────────────────────────────
// Routing
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_mapped_gpt4_routes_to_azure_deployment_url() {
    let azure_addr = spawn_mock_azure().await;
    let openai_addr = spawn_mock_openai().await;

    let mut config = GatewayConfig::default();
    config.providers.openai = Some(openai_config(openai_addr));
    config.providers.azure = Some(azure_config(azure_addr));
    config
        .model_mapping
        .insert("gpt-4".to_string(), "azure".to_string());

    let (_, router) = gateway(config);

    // The heuristic alone would send gpt-4 to openai; the mapping repoints
    // it at the Azure deployment URL.
    let adapter = router.resolve("gpt-4").unwrap();
    assert_eq!(adapter.name(), "azure");

    let response = adapter.chat(&chat_request("gpt-4", false)).await.unwrap();
    assert_eq!(
        response.choices[0].message.content.as_deref(),
        Some("served by gpt-4")
    );
}

#[tokio::test]
async fn test_unmapped_unmatched_model_is_rejected() {
    let config = GatewayConfig::default();
    let (_, router) = gateway(config);

    let Err(err) = router.resolve("mystery-7b") else {
        panic!("expected resolve to reject unmapped model");
    };
    assert!(err.to_string().contains("mystery-7b"));
}

// ────────────────────────────────────────────────────────────────
// Anthropic translation
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_anthropic_request_splits_system_and_defaults_max_tokens() {
    let captured: CapturedBody = Arc::new(Mutex::new(None));
    let addr = spawn_mock_anthropic(captured.clone()).await;

    let mut config = GatewayConfig::default();
    config.providers.claude = Some(claude_config(addr));
    let (registry, _) = gateway(config);

    let adapter = registry.get_adapter("claude").unwrap();
    let response = adapter
        .chat(&chat_request("claude-3-5-sonnet", false))
        .await
        .unwrap();

    let body = captured.lock().unwrap().clone().unwrap();
    assert_eq!(body["system"], "Be terse");
    assert_eq!(body["max_tokens"], 4096);
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[0]["content"], "Hi");

    // And the native response came back in canonical shape.
    assert_eq!(response.object, "chat.completion");
    assert_eq!(
        response.choices[0].message.content.as_deref(),
        Some("Bonjour")
    );
    assert_eq!(response.choices[0].finish_reason.as_deref(), Some("stop"));
    assert_eq!(response.usage.total_tokens, 13);
}

#[tokio::test]
async fn test_anthropic_stream_decodes_to_canonical_chunks() {
    let addr = spawn_streaming_anthropic().await;

    let mut config = GatewayConfig::default();
    config.providers.claude = Some(claude_config(addr));
    let (registry, _) = gateway(config);

    let adapter = registry.get_adapter("claude").unwrap();
    let stream = adapter
        .chat_stream(&chat_request("claude-3-5-sonnet", true))
        .await
        .unwrap();

    let chunks: Vec<_> = stream
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    // Role arrives before any content.
    assert_eq!(
        chunks[0].choices[0].delta.role.as_deref(),
        Some("assistant")
    );

    let content: String = chunks
        .iter()
        .filter_map(|c| c.choices.first())
        .filter_map(|c| c.delta.content.clone())
        .collect();
    assert_eq!(content, "Salut");

    let terminals: Vec<_> = chunks.iter().filter(|c| c.is_terminal()).collect();
    assert_eq!(terminals.len(), 1);
    assert_eq!(
        terminals[0].choices[0].finish_reason.as_deref(),
        Some("stop")
    );

    // One stream id across all chunks.
    assert!(chunks.windows(2).all(|w| w[0].id == w[1].id));
}

// ────────────────────────────────────────────────────────────────
// Streaming termination
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_truncated_upstream_stream_still_terminates() {
    let addr = spawn_truncating_stream_upstream().await;

    let mut config = GatewayConfig::default();
    config.providers.openai = Some(openai_config(addr));
    let (registry, _) = gateway(config);

    let adapter = registry.get_adapter("openai").unwrap();
    let stream = adapter
        .chat_stream(&chat_request("gpt-4o", true))
        .await
        .unwrap();

    let chunks: Vec<_> = stream
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    let terminals: Vec<_> = chunks.iter().filter(|c| c.is_terminal()).collect();
    assert_eq!(terminals.len(), 1, "exactly one terminal chunk expected");
    assert_eq!(
        terminals[0].choices[0].finish_reason.as_deref(),
        Some("stop")
    );
    assert_eq!(chunks.last().unwrap().id, "chatcmpl-s1");
}

// ────────────────────────────────────────────────────────────────
// Embeddings
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_embedding_batch_yields_indexed_entries() {
    let addr = spawn_mock_openai().await;

    let mut config = GatewayConfig::default();
    config.providers.openai = Some(openai_config(addr));
    let (registry, _) = gateway(config);

    let adapter = registry.get_adapter("openai").unwrap();
    let request = EmbeddingRequest {
        model: "text-embedding-3-small".to_string(),
        input: EmbeddingInput::Batch(vec![
            "one".to_string(),
            "two".to_string(),
            "three".to_string(),
        ]),
    };

    let response = adapter.embeddings(&request).await.unwrap();
    assert_eq!(response.data.len(), 3);
    for (i, entry) in response.data.iter().enumerate() {
        assert_eq!(entry.index as usize, i);
        assert!(!entry.embedding.is_empty());
    }
}

// ────────────────────────────────────────────────────────────────
// Health and discovery
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_check_absorbs_upstream_500() {
    let addr = spawn_broken_upstream().await;

    let mut config = GatewayConfig::default();
    config.providers.openai = Some(openai_config(addr));
    let (registry, _) = gateway(config);

    let adapter = registry.get_adapter("openai").unwrap();
    assert!(!adapter.health_check().await);

    let health = registry.health_check_all().await;
    assert_eq!(health.get("openai"), Some(&false));
}

#[tokio::test]
async fn test_azure_discovery_failure_falls_back_to_known_deployments() {
    let addr = spawn_mock_azure().await;

    let mut config = GatewayConfig::default();
    config.providers.azure = Some(azure_config(addr));
    let (registry, _) = gateway(config);

    let adapter = registry.get_adapter("azure").unwrap();
    let models = adapter.list_models().await.unwrap();

    let ids: Vec<&str> = models.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["gpt-4o", "gpt-4", "gpt-35-turbo"]);
}

#[tokio::test]
async fn test_model_listing_swallows_failing_provider() {
    let broken = spawn_broken_upstream().await;
    let azure = spawn_mock_azure().await;

    let mut config = GatewayConfig::default();
    // OpenAI discovery errors and contributes zero models; Azure discovery
    // errors too but substitutes its fallback deployments.
    config.providers.openai = Some(openai_config(broken));
    config.providers.azure = Some(azure_config(azure));

    let gateway_addr = spawn_gateway(config).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("http://{gateway_addr}/v1/models"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 3);
    assert!(data.iter().all(|m| m["provider"] == "azure"));
}

// ────────────────────────────────────────────────────────────────
// Full gateway roundtrips
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_full_server_chat_roundtrip() {
    let upstream = spawn_mock_openai().await;

    let mut config = GatewayConfig::default();
    config.providers.openai = Some(openai_config(upstream));
    let gateway_addr = spawn_gateway(config).await;

    let client = reqwest::Client::new();

    let health = client
        .get(format!("http://{gateway_addr}/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(health.status(), 200);

    let response = client
        .post(format!("http://{gateway_addr}/v1/chat/completions"))
        .json(&json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "Say 'pong'"}],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["choices"][0]["message"]["content"], "pong");
    assert_eq!(body["usage"]["total_tokens"], 4);
}

#[tokio::test]
async fn test_full_server_streaming_emits_done_marker() {
    let upstream = spawn_truncating_stream_upstream().await;

    let mut config = GatewayConfig::default();
    config.providers.openai = Some(openai_config(upstream));
    let gateway_addr = spawn_gateway(config).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{gateway_addr}/v1/chat/completions"))
        .json(&json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "Hi"}],
            "stream": true,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body = response.text().await.unwrap();
    assert!(body.contains("\"finish_reason\":\"stop\""));
    assert!(body.trim_end().ends_with("data: [DONE]"));
}

#[tokio::test]
async fn test_native_messages_endpoint_shape_and_model_gate() {
    let captured: CapturedBody = Arc::new(Mutex::new(None));
    let upstream = spawn_mock_anthropic(captured).await;

    let mut config = GatewayConfig::default();
    config.providers.claude = Some(claude_config(upstream));
    let gateway_addr = spawn_gateway(config).await;

    let client = reqwest::Client::new();

    // Non-claude model names are rejected outright.
    let response = client
        .post(format!("http://{gateway_addr}/v1/messages"))
        .json(&json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "Hi"}],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // Claude models come back in the native Messages shape.
    let response = client
        .post(format!("http://{gateway_addr}/v1/messages"))
        .json(&json!({
            "model": "claude-3-5-sonnet",
            "messages": [{"role": "user", "content": "Hi"}],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["type"], "message");
    assert_eq!(body["role"], "assistant");
    assert_eq!(body["content"][0]["text"], "Bonjour");
    assert_eq!(body["stop_reason"], "end_turn");
    assert_eq!(body["usage"]["input_tokens"], 11);
}

#[tokio::test]
async fn test_validation_errors_are_client_errors() {
    let upstream = spawn_mock_openai().await;

    let mut config = GatewayConfig::default();
    config.providers.openai = Some(openai_config(upstream));
    let gateway_addr = spawn_gateway(config).await;

    let client = reqwest::Client::new();

    // Empty message list
    let response = client
        .post(format!("http://{gateway_addr}/v1/chat/completions"))
        .json(&json!({"model": "gpt-4o", "messages": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "invalid_request_error");

    // Embeddings against a provider that does not offer them
    let mut config = GatewayConfig::default();
    let captured: CapturedBody = Arc::new(Mutex::new(None));
    config.providers.claude = Some(claude_config(spawn_mock_anthropic(captured).await));
    let gateway_addr = spawn_gateway(config).await;

    let response = client
        .post(format!("http://{gateway_addr}/v1/embeddings"))
        .json(&json!({"model": "claude-3-5-sonnet", "input": "hello"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 501);
}

#[tokio::test]
async fn test_detailed_health_overall_status() {
    let healthy = spawn_mock_openai().await;
    let broken = spawn_broken_upstream().await;

    let mut config = GatewayConfig::default();
    config.providers.openai = Some(openai_config(healthy));
    config.providers.claude = Some(claude_config(broken));
    let gateway_addr = spawn_gateway(config).await;

    let client = reqwest::Client::new();
    let body: Value = client
        .get(format!("http://{gateway_addr}/health/detailed"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    // One healthy provider is enough for the gateway to count as healthy.
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["providers"]["openai"], true);
    assert_eq!(body["providers"]["claude"], false);
}

// ────────────────────────────────────────────────────────────────
// Upstream error propagation
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_upstream_error_carries_status_and_message() {
    let broken = spawn_broken_upstream().await;

    let mut config = GatewayConfig::default();
    config.providers.openai = Some(openai_config(broken));
    let (registry, _) = gateway(config);

    let adapter = registry.get_adapter("openai").unwrap();
    let err = adapter
        .chat(&chat_request("gpt-4o", false))
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), 500);
    assert!(err.to_string().contains("upstream exploded"));
}
