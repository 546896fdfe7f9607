//! Model routing: explicit mapping table first, then name heuristics.
//!
//! The explicit table always wins so an operator can intentionally repoint a
//! model name at a non-default provider (e.g. serving "gpt-4" through Azure)
//! without a heuristic silently misrouting it.

use crate::error::{GatewayError, Result};
use crate::providers::Provider;
use crate::registry::ProviderRegistry;
use std::collections::HashMap;
use std::sync::Arc;

/// Embedding models served through Azure deployments when no other rule
/// claims them.
const AZURE_EMBEDDING_MODELS: &[&str] = &[
    "text-embedding-ada-002",
    "text-embedding-3-small",
    "text-embedding-3-large",
];

pub struct ModelRouter {
    registry: Arc<ProviderRegistry>,
    mapping: HashMap<String, String>,
}

impl ModelRouter {
    #[must_use]
    pub fn new(registry: Arc<ProviderRegistry>, mapping: HashMap<String, String>) -> Self {
        Self { registry, mapping }
    }

    /// Resolve the adapter serving `model`: exact mapping-table match, then
    /// auto-detection, else `ModelNotConfigured` naming the model.
    pub fn resolve(&self, model: &str) -> Result<Arc<dyn Provider>> {
        if let Some(provider_name) = self.mapping.get(model) {
            return self.registry.get_adapter(provider_name);
        }

        if let Some(provider_name) = auto_detect(model) {
            return self.registry.get_adapter(provider_name);
        }

        Err(GatewayError::model_not_configured(model))
    }
}

/// Heuristic provider detection from the model name, evaluated in precedence
/// order. Runs only when no explicit mapping entry exists.
#[must_use]
pub fn auto_detect(model: &str) -> Option<&'static str> {
    let model = model.to_ascii_lowercase();

    if model.starts_with("claude") {
        return Some("claude");
    }
    if model.starts_with("gpt") || model.starts_with("o1") {
        return Some("openai");
    }
    if model.contains("embedding") && (model.contains("ada") || model.starts_with("text-embedding"))
    {
        return Some("openai");
    }
    if AZURE_EMBEDDING_MODELS.contains(&model.as_str()) {
        return Some("azure");
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AzureConfig, GatewayConfig, OpenAiConfig};

    fn router(mapping: HashMap<String, String>) -> ModelRouter {
        let mut config = GatewayConfig::default();
        config.providers.openai = Some(OpenAiConfig {
            enabled: true,
            api_key: "sk-test".to_string(),
            base_url: "https://api.openai.com".to_string(),
            organization: None,
        });
        config.providers.azure = Some(AzureConfig {
            enabled: true,
            api_key: "az-test".to_string(),
            endpoint: "https://example.openai.azure.com".to_string(),
            api_version: "2024-10-21".to_string(),
        });

        let registry = Arc::new(ProviderRegistry::new(config, reqwest::Client::new()));
        ModelRouter::new(registry, mapping)
    }

    #[test]
    fn test_auto_detect_precedence() {
        assert_eq!(auto_detect("claude-3-5-sonnet"), Some("claude"));
        assert_eq!(auto_detect("gpt-4o"), Some("openai"));
        assert_eq!(auto_detect("o1-preview"), Some("openai"));
        assert_eq!(auto_detect("text-embedding-3-small"), Some("openai"));
        assert_eq!(auto_detect("ada-embedding-v2"), Some("openai"));
        assert_eq!(auto_detect("llama-70b"), None);
    }

    #[test]
    fn test_auto_detect_is_case_insensitive() {
        assert_eq!(auto_detect("Claude-3-Opus"), Some("claude"));
        assert_eq!(auto_detect("GPT-4"), Some("openai"));
    }

    #[test]
    fn test_explicit_mapping_overrides_heuristic() {
        let mut mapping = HashMap::new();
        mapping.insert("gpt-4".to_string(), "azure".to_string());
        let router = router(mapping);

        // The heuristic would pick openai; the mapping must win.
        let adapter = router.resolve("gpt-4").unwrap();
        assert_eq!(adapter.name(), "azure");
    }

    #[test]
    fn test_heuristic_used_without_mapping() {
        let router = router(HashMap::new());
        let adapter = router.resolve("gpt-4o").unwrap();
        assert_eq!(adapter.name(), "openai");
    }

    #[test]
    fn test_unresolvable_model_names_the_model() {
        let router = router(HashMap::new());
        let Err(err) = router.resolve("mystery-model-7b") else {
            panic!("expected unresolvable model to be rejected");
        };
        match err {
            GatewayError::ModelNotConfigured { model } => {
                assert_eq!(model, "mystery-model-7b");
            }
            other => panic!("expected ModelNotConfigured, got {other:?}"),
        }
    }
}
