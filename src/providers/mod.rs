//! Provider adapters translating the canonical format to upstream APIs.
//!
//! Each adapter owns the full round trip for one upstream kind: map the
//! canonical request to the native JSON body, issue the call, and map the
//! response (or stream) back. Adapters never swallow chat/embedding errors;
//! discovery and health probes are the deliberate exception.

pub mod anthropic;
pub mod azure;
pub mod openai;

use crate::error::{GatewayError, Result};
use crate::types::{
    ChatRequest, ChatResponse, ChatStreamChunk, EmbeddingRequest, EmbeddingResponse, ModelInfo,
};
use async_trait::async_trait;
use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::stream::Stream;
use futures::StreamExt;
use serde::Deserialize;
use std::pin::Pin;
use std::time::Duration;

/// Lazy, finite, non-restartable stream of canonical chat chunks. Dropping
/// the stream cancels the upstream transfer and releases its connection.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatStreamChunk>> + Send>>;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);
pub const MODELS_CACHE_TTL: Duration = Duration::from_secs(300);

/// Capability set every upstream adapter implements.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable name used in configuration and the model mapping table.
    fn name(&self) -> &'static str;

    /// Membership test against the provider's static model allowlist
    /// (exact string match, no wildcards).
    fn supports(&self, model: &str) -> bool;

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse>;

    async fn chat_stream(&self, request: &ChatRequest) -> Result<ChatStream>;

    async fn embeddings(&self, request: &EmbeddingRequest) -> Result<EmbeddingResponse>;

    /// List models from upstream. Adapters without a reliable discovery
    /// endpoint substitute a static fallback instead of failing; adapters
    /// with one propagate the error and let the caller decide.
    async fn list_models(&self) -> Result<Vec<ModelInfo>>;

    /// Lightweight upstream probe. Absorbs every failure into `false`;
    /// never errors.
    async fn health_check(&self) -> bool;

    /// Release per-adapter resources. Idempotent.
    async fn close(&self) {}
}

// ---------------------------------------------------------------------------
// Shared upstream plumbing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct UpstreamErrorBody {
    error: UpstreamErrorDetail,
}

#[derive(Debug, Deserialize)]
struct UpstreamErrorDetail {
    message: String,
}

/// Drain a failed upstream response into an `Upstream` error, preferring the
/// provider's own error message when the body parses.
pub(crate) async fn upstream_error(provider: &str, response: reqwest::Response) -> GatewayError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();

    let message = serde_json::from_str::<UpstreamErrorBody>(&body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| truncate(&body, 300).to_string());

    GatewayError::upstream(provider, status, message)
}

/// Decode an `OpenAI`-style SSE byte stream into canonical chunks.
///
/// Chunks are emitted in the order received. If the upstream stream ends
/// without a finish_reason-bearing chunk (abrupt close, transport error, or
/// a missing `[DONE]`), a synthetic terminal stop chunk is appended so
/// consumers never hang waiting for completion.
pub(crate) fn decode_chunk_stream<S, E>(
    byte_stream: S,
    provider: &'static str,
    request_model: String,
) -> ChatStream
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut events = Box::pin(byte_stream.eventsource());
        let mut finished = false;
        let mut stream_id: Option<(String, i64)> = None;

        while let Some(event) = events.next().await {
            let event = match event {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(provider, error = %e, "stream transport error");
                    break;
                }
            };

            if event.data.trim() == "[DONE]" {
                break;
            }

            let chunk: ChatStreamChunk = match serde_json::from_str(&event.data) {
                Ok(c) => c,
                Err(e) => {
                    tracing::debug!(provider, error = %e, "skipping unparseable chunk");
                    continue;
                }
            };

            if chunk.is_terminal() {
                finished = true;
            }
            stream_id = Some((chunk.id.clone(), chunk.created));
            yield Ok(chunk);
        }

        if !finished {
            let (id, created) = stream_id.unwrap_or_else(|| {
                (
                    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
                    chrono::Utc::now().timestamp(),
                )
            });
            yield Ok(ChatStreamChunk::finish(&id, created, &request_model, "stop"));
        }
    })
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        s
    } else {
        &s[..max]
    }
}
