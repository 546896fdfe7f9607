//! Anthropic adapter.
//!
//! The canonical message list is split into a top-level `system` string plus
//! the conversation, `max_tokens` is defaulted (upstream requires it), and
//! the native event stream is re-assembled into canonical chunks with
//! `OpenAI`-style role-first ordering. Embeddings are not offered upstream.

use super::{upstream_error, ChatStream, Provider, HEALTH_TIMEOUT, MODELS_CACHE_TTL, REQUEST_TIMEOUT};
use crate::cache::TtlCache;
use crate::config::ClaudeConfig;
use crate::error::{GatewayError, Result};
use crate::translate::anthropic_types::MessagesResponse;
use crate::translate::request::chat_to_messages;
use crate::translate::response::messages_to_chat;
use crate::translate::streaming::MessagesDecoder;
use crate::types::{ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, ModelInfo};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::Deserialize;

const PROVIDER_NAME: &str = "claude";

/// Models this adapter will forward requests for. Short aliases are listed
/// alongside the dated snapshots because the mapping table commonly uses
/// them.
const CLAUDE_MODELS: &[&str] = &[
    "claude-3-5-sonnet",
    "claude-3-5-sonnet-20241022",
    "claude-3-5-haiku",
    "claude-3-5-haiku-20241022",
    "claude-3-opus",
    "claude-3-opus-20240229",
    "claude-3-haiku",
    "claude-3-haiku-20240307",
];

#[derive(Debug)]
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    api_version: String,
    models_cache: TtlCache<Vec<ModelInfo>>,
}

#[derive(Debug, Deserialize)]
struct ModelsPage {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
    #[serde(default)]
    created_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl AnthropicProvider {
    pub fn new(config: &ClaudeConfig, client: reqwest::Client) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(GatewayError::configuration(
                "Claude provider requires an api_key",
            ));
        }

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
            models_cache: TtlCache::new(MODELS_CACHE_TTL),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.api_version)
    }

    fn check_supported(&self, model: &str) -> Result<()> {
        if self.supports(model) {
            Ok(())
        } else {
            Err(GatewayError::unsupported_model(model, PROVIDER_NAME))
        }
    }

    async fn fetch_models(&self) -> Result<Vec<ModelInfo>> {
        let response = self
            .authed(self.client.get(self.url("models")))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(upstream_error(PROVIDER_NAME, response).await);
        }

        let page: ModelsPage = response.json().await?;
        Ok(page
            .data
            .into_iter()
            .map(|m| ModelInfo {
                id: m.id,
                object: "model".to_string(),
                created: m
                    .created_at
                    .map_or_else(|| chrono::Utc::now().timestamp(), |t| t.timestamp()),
                owned_by: "anthropic".to_string(),
                provider: PROVIDER_NAME.to_string(),
            })
            .collect())
    }

    fn fallback_models() -> Vec<ModelInfo> {
        CLAUDE_MODELS
            .iter()
            .map(|id| ModelInfo::new(*id, "anthropic", PROVIDER_NAME))
            .collect()
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn supports(&self, model: &str) -> bool {
        CLAUDE_MODELS.contains(&model)
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        self.check_supported(&request.model)?;

        let mut wire = chat_to_messages(request);
        wire.stream = None;

        let response = self
            .authed(self.client.post(self.url("messages")))
            .timeout(REQUEST_TIMEOUT)
            .json(&wire)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(upstream_error(PROVIDER_NAME, response).await);
        }

        let native: MessagesResponse = response.json().await?;
        Ok(messages_to_chat(&native, &request.model))
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<ChatStream> {
        self.check_supported(&request.model)?;

        let mut wire = chat_to_messages(request);
        wire.stream = Some(true);

        // No per-request timeout: the connection stays open for the stream.
        let response = self
            .authed(self.client.post(self.url("messages")))
            .json(&wire)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(upstream_error(PROVIDER_NAME, response).await);
        }

        let mut decoder = MessagesDecoder::new(&request.model);
        let byte_stream = response.bytes_stream();

        Ok(Box::pin(async_stream::stream! {
            let mut events = byte_stream.eventsource();

            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(e) => e,
                    Err(e) => {
                        tracing::warn!(provider = PROVIDER_NAME, error = %e, "stream transport error");
                        break;
                    }
                };

                for chunk in decoder.handle_event(&event.event, &event.data) {
                    yield Ok(chunk);
                }

                if decoder.is_finished() {
                    break;
                }
            }

            // Synthetic stop if the upstream ended without one.
            if let Some(chunk) = decoder.finish() {
                yield Ok(chunk);
            }
        }))
    }

    async fn embeddings(&self, _request: &EmbeddingRequest) -> Result<EmbeddingResponse> {
        Err(GatewayError::unsupported_operation(
            "embeddings",
            PROVIDER_NAME,
        ))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        if let Some(models) = self.models_cache.get() {
            return Ok(models);
        }

        // Discovery failure substitutes the static list rather than erroring:
        // a flaky models endpoint must not make the gateway look down.
        let models = match self.fetch_models().await {
            Ok(models) => models,
            Err(e) => {
                tracing::warn!(provider = PROVIDER_NAME, error = %e, "model discovery failed, using fallback list");
                Self::fallback_models()
            }
        };

        self.models_cache.put(models.clone());
        Ok(models)
    }

    async fn health_check(&self) -> bool {
        let result = self
            .authed(self.client.get(self.url("models")))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await;

        matches!(result, Ok(resp) if resp.status().is_success())
    }
}
