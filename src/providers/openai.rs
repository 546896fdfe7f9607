//! `OpenAI` adapter.
//!
//! Near-identity mapping: the canonical format is modeled on the `OpenAI`
//! chat completions shape, so request and response bodies map 1:1 and only
//! sampling clamps and base-URL normalization happen here.

use super::{
    decode_chunk_stream, upstream_error, ChatStream, Provider, HEALTH_TIMEOUT, MODELS_CACHE_TTL,
    REQUEST_TIMEOUT,
};
use crate::cache::TtlCache;
use crate::config::OpenAiConfig;
use crate::error::{GatewayError, Result};
use crate::types::{
    ChatMessage, ChatRequest, ChatResponse, EmbeddingInput, EmbeddingRequest, EmbeddingResponse,
    ModelInfo,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const PROVIDER_NAME: &str = "openai";

/// Models this adapter will forward requests for.
const OPENAI_MODELS: &[&str] = &[
    // GPT-4 family
    "gpt-4",
    "gpt-4-turbo",
    "gpt-4-turbo-preview",
    "gpt-4o",
    "gpt-4o-2024-08-06",
    "gpt-4o-mini",
    "gpt-4o-mini-2024-07-18",
    // GPT-3.5 family
    "gpt-3.5-turbo",
    "gpt-3.5-turbo-0125",
    "gpt-3.5-turbo-16k",
    // o1 family
    "o1-preview",
    "o1-mini",
    // Embedding models
    "text-embedding-ada-002",
    "text-embedding-3-small",
    "text-embedding-3-large",
];

#[derive(Debug)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    organization: Option<String>,
    models_cache: TtlCache<Vec<ModelInfo>>,
}

#[derive(Debug, Serialize)]
struct UpstreamChatBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct UpstreamEmbeddingBody<'a> {
    model: &'a str,
    input: &'a EmbeddingInput,
}

#[derive(Debug, Deserialize)]
struct ModelsPage {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
    #[serde(default)]
    created: i64,
    #[serde(default)]
    owned_by: Option<String>,
}

impl OpenAiProvider {
    pub fn new(config: &OpenAiConfig, client: reqwest::Client) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(GatewayError::configuration(
                "OpenAI provider requires an api_key",
            ));
        }

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: normalize_base_url(&config.base_url),
            organization: config.organization.clone(),
            models_cache: TtlCache::new(MODELS_CACHE_TTL),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder.header("Authorization", format!("Bearer {}", self.api_key));
        match &self.organization {
            Some(org) => builder.header("OpenAI-Organization", org),
            None => builder,
        }
    }

    fn chat_body<'a>(request: &'a ChatRequest, stream: bool) -> UpstreamChatBody<'a> {
        let params = request.sampling();
        UpstreamChatBody {
            model: &request.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            frequency_penalty: params.frequency_penalty,
            presence_penalty: params.presence_penalty,
            stream: stream.then_some(true),
        }
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
                created: m.created,
                owned_by: m.owned_by.unwrap_or_else(|| "openai".to_string()),
                provider: PROVIDER_NAME.to_string(),
            })
            .collect())
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn supports(&self, model: &str) -> bool {
        OPENAI_MODELS.contains(&model)
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        self.check_supported(&request.model)?;

        let response = self
            .authed(self.client.post(self.url("chat/completions")))
            .timeout(REQUEST_TIMEOUT)
            .json(&Self::chat_body(request, false))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(upstream_error(PROVIDER_NAME, response).await);
        }

        Ok(response.json().await?)
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<ChatStream> {
        self.check_supported(&request.model)?;

        // No per-request timeout here: the connection stays open for the
        // lifetime of the stream.
        let response = self
            .authed(self.client.post(self.url("chat/completions")))
            .json(&Self::chat_body(request, true))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(upstream_error(PROVIDER_NAME, response).await);
        }

        Ok(decode_chunk_stream(
            response.bytes_stream(),
            PROVIDER_NAME,
            request.model.clone(),
        ))
    }

    async fn embeddings(&self, request: &EmbeddingRequest) -> Result<EmbeddingResponse> {
        self.check_supported(&request.model)?;

        let body = UpstreamEmbeddingBody {
            model: &request.model,
            input: &request.input,
        };

        let response = self
            .authed(self.client.post(self.url("embeddings")))
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(upstream_error(PROVIDER_NAME, response).await);
        }

        Ok(response.json().await?)
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        if let Some(models) = self.models_cache.get() {
            return Ok(models);
        }

        let models = self.fetch_models().await?;
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

/// Normalize the configured base URL so request paths always sit under a
/// single `/v1` segment, whether or not the config already includes it.
fn normalize_base_url(base_url: &str) -> String {
    let trimmed = base_url.trim_end_matches('/');
    if trimmed.ends_with("/v1") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/v1")
    }
}
