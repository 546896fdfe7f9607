//! Azure `OpenAI` adapter.
//!
//! Azure speaks the `OpenAI` wire format but addresses models as
//! "deployments": the model identifier becomes a URL path segment and the
//! API version a query parameter, with the key in an `api-key` header. Both
//! an api_key and an endpoint are required at construction time.

use super::{
    decode_chunk_stream, upstream_error, ChatStream, Provider, HEALTH_TIMEOUT, MODELS_CACHE_TTL,
    REQUEST_TIMEOUT,
};
use crate::cache::TtlCache;
use crate::config::AzureConfig;
use crate::error::{GatewayError, Result};
use crate::types::{
    ChatMessage, ChatRequest, ChatResponse, EmbeddingInput, EmbeddingRequest, EmbeddingResponse,
    ModelInfo,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const PROVIDER_NAME: &str = "azure";

/// Deployments this adapter will forward requests for. Azure uses its own
/// naming for the 3.5 family (no dot).
const AZURE_MODELS: &[&str] = &[
    "gpt-4o",
    "gpt-4",
    "gpt-4-32k",
    "gpt-4-turbo",
    "gpt-35-turbo",
    "gpt-35-turbo-16k",
    "text-embedding-ada-002",
    "text-embedding-3-small",
    "text-embedding-3-large",
];

/// Returned when the discovery endpoint is unavailable; most Azure resources
/// deploy one of these.
const FALLBACK_DEPLOYMENTS: &[&str] = &["gpt-4o", "gpt-4", "gpt-35-turbo"];

#[derive(Debug)]
pub struct AzureProvider {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    api_version: String,
    models_cache: TtlCache<Vec<ModelInfo>>,
}

/// Azure request bodies omit the model: the deployment name in the URL
/// selects it.
#[derive(Debug, Serialize)]
struct UpstreamChatBody<'a> {
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
    input: &'a EmbeddingInput,
}

#[derive(Debug, Deserialize)]
struct ModelsPage {
    #[serde(default)]
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

impl AzureProvider {
    pub fn new(config: &AzureConfig, client: reqwest::Client) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(GatewayError::configuration(
                "Azure OpenAI provider requires an api_key",
            ));
        }
        if config.endpoint.is_empty() {
            return Err(GatewayError::configuration(
                "Azure OpenAI provider requires an endpoint",
            ));
        }

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
            models_cache: TtlCache::new(MODELS_CACHE_TTL),
        })
    }

    /// URL for a deployment-scoped operation, e.g.
    /// `{endpoint}/openai/deployments/gpt-4/chat/completions?api-version=...`
    fn deployment_url(&self, deployment: &str, operation: &str) -> String {
        format!(
            "{}/openai/deployments/{}/{}?api-version={}",
            self.endpoint, deployment, operation, self.api_version
        )
    }

    fn models_url(&self) -> String {
        format!(
            "{}/openai/models?api-version={}",
            self.endpoint, self.api_version
        )
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.header("api-key", &self.api_key)
    }

    fn chat_body<'a>(request: &'a ChatRequest, stream: bool) -> UpstreamChatBody<'a> {
        let params = request.sampling();
        UpstreamChatBody {
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
            .authed(self.client.get(self.models_url()))
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
                owned_by: m.owned_by.unwrap_or_else(|| "azure".to_string()),
                provider: PROVIDER_NAME.to_string(),
            })
            .collect())
    }

    fn fallback_models() -> Vec<ModelInfo> {
        FALLBACK_DEPLOYMENTS
            .iter()
            .map(|id| ModelInfo::new(*id, "azure", PROVIDER_NAME))
            .collect()
    }
}

#[async_trait]
impl Provider for AzureProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn supports(&self, model: &str) -> bool {
        AZURE_MODELS.contains(&model)
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        self.check_supported(&request.model)?;

        let response = self
            .authed(
                self.client
                    .post(self.deployment_url(&request.model, "chat/completions")),
            )
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

        // No per-request timeout: the connection stays open for the stream.
        let response = self
            .authed(
                self.client
                    .post(self.deployment_url(&request.model, "chat/completions")),
            )
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
            input: &request.input,
        };

        let response = self
            .authed(
                self.client
                    .post(self.deployment_url(&request.model, "embeddings")),
            )
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

        // Many Azure resources don't expose the models endpoint; substitute
        // the well-known deployment names instead of failing.
        let models = match self.fetch_models().await {
            Ok(models) => models,
            Err(e) => {
                tracing::warn!(provider = PROVIDER_NAME, error = %e, "model discovery failed, using fallback deployments");
                Self::fallback_models()
            }
        };

        self.models_cache.put(models.clone());
        Ok(models)
    }

    async fn health_check(&self) -> bool {
        let result = self
            .authed(self.client.get(self.models_url()))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await;

        matches!(result, Ok(resp) if resp.status().is_success())
    }
}
