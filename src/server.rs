use crate::error::GatewayError;
use crate::registry::ProviderRegistry;
use crate::router::ModelRouter;
use crate::translate::response::chat_to_messages_response;
use crate::translate::streaming::MessagesEncoder;
use crate::types::{ChatRequest, EmbeddingRequest, ModelInfo};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ProviderRegistry>,
    pub router: Arc<ModelRouter>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route("/v1/messages", post(handle_messages))
        .route("/v1/embeddings", post(handle_embeddings))
        .route("/v1/models", get(handle_list_models))
        .route("/health", get(handle_health))
        .route("/health/detailed", get(handle_health_detailed))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_chat_completions(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Response {
    if let Err(e) = request.validate() {
        return error_response(&e);
    }

    let adapter = match state.router.resolve(&request.model) {
        Ok(a) => a,
        Err(e) => return error_response(&e),
    };

    tracing::info!(
        model = %request.model,
        provider = adapter.name(),
        streaming = request.stream,
        messages = request.messages.len(),
        "chat request"
    );

    if request.stream {
        let stream = match adapter.chat_stream(&request).await {
            Ok(s) => s,
            Err(e) => return error_response(&e),
        };

        let events = async_stream::stream! {
            let mut stream = stream;
            while let Some(item) = stream.next().await {
                match item {
                    Ok(chunk) => {
                        if let Ok(json) = serde_json::to_string(&chunk) {
                            yield Ok::<_, Infallible>(Event::default().data(json));
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "stream error, terminating");
                        break;
                    }
                }
            }
            yield Ok(Event::default().data("[DONE]"));
        };

        Sse::new(events).keep_alive(KeepAlive::default()).into_response()
    } else {
        match adapter.chat(&request).await {
            Ok(response) => Json(response).into_response(),
            Err(e) => error_response(&e),
        }
    }
}

/// Anthropic-compatible endpoint: same adapters, same routing, but the
/// response is re-encoded into the native Messages shape. Only serves
/// models under that provider's naming convention.
async fn handle_messages(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Response {
    if !request.model.starts_with("claude") {
        return error_response(&GatewayError::validation(
            "This endpoint only serves Claude models",
        ));
    }
    if let Err(e) = request.validate() {
        return error_response(&e);
    }

    let adapter = match state.router.resolve(&request.model) {
        Ok(a) => a,
        Err(e) => return error_response(&e),
    };

    if request.stream {
        let stream = match adapter.chat_stream(&request).await {
            Ok(s) => s,
            Err(e) => return error_response(&e),
        };

        let model = request.model.clone();
        let events = async_stream::stream! {
            let mut encoder = MessagesEncoder::new(&model);
            let mut stream = stream;

            while let Some(item) = stream.next().await {
                match item {
                    Ok(chunk) => {
                        for event in encoder.process_chunk(&chunk) {
                            if let Ok(json) = serde_json::to_string(&event) {
                                yield Ok::<_, Infallible>(
                                    Event::default().event(event.event_name()).data(json),
                                );
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "stream error, terminating");
                        break;
                    }
                }
            }

            for event in encoder.finish() {
                if let Ok(json) = serde_json::to_string(&event) {
                    yield Ok(Event::default().event(event.event_name()).data(json));
                }
            }
        };

        Sse::new(events).keep_alive(KeepAlive::default()).into_response()
    } else {
        match adapter.chat(&request).await {
            Ok(response) => Json(chat_to_messages_response(&response)).into_response(),
            Err(e) => error_response(&e),
        }
    }
}

async fn handle_embeddings(
    State(state): State<AppState>,
    Json(request): Json<EmbeddingRequest>,
) -> Response {
    let adapter = match state.router.resolve(&request.model) {
        Ok(a) => a,
        Err(e) => return error_response(&e),
    };

    tracing::info!(
        model = %request.model,
        provider = adapter.name(),
        inputs = request.input.len(),
        "embedding request"
    );

    match adapter.embeddings(&request).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Aggregate model listing across all enabled providers. A provider that
/// fails to list contributes zero models instead of failing the endpoint.
async fn handle_list_models(State(state): State<AppState>) -> Json<serde_json::Value> {
    let mut models: Vec<ModelInfo> = Vec::new();

    for (name, enabled) in state.registry.list_enabled() {
        if !enabled {
            continue;
        }
        let adapter = match state.registry.get_adapter(&name) {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(provider = %name, error = %e, "skipping provider in model listing");
                continue;
            }
        };
        match adapter.list_models().await {
            Ok(mut listed) => models.append(&mut listed),
            Err(e) => {
                tracing::warn!(provider = %name, error = %e, "model listing failed, skipping");
            }
        }
    }

    Json(serde_json::json!({ "object": "list", "data": models }))
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Per-provider health, overall healthy iff at least one provider is.
async fn handle_health_detailed(State(state): State<AppState>) -> Json<serde_json::Value> {
    let providers = state.registry.health_check_all().await;
    let healthy = providers.values().any(|&up| up);

    Json(serde_json::json!({
        "status": if healthy { "healthy" } else { "unhealthy" },
        "providers": providers,
    }))
}

fn error_response(err: &GatewayError) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let body = serde_json::json!({
        "error": {
            "message": err.to_string(),
            "type": err.error_type(),
        }
    });

    (status, Json(body)).into_response()
}
