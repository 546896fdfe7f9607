//! Adapter registry and factory.
//!
//! The registry is the single owner of every adapter instance and of the
//! shared outbound HTTP client. It is constructed once at startup by the
//! composition root and handed out by reference; adapters are built lazily
//! on first use and cached for the life of the process.

use crate::config::{GatewayConfig, BUILTIN_PROVIDERS};
use crate::error::{GatewayError, Result};
use crate::providers::anthropic::AnthropicProvider;
use crate::providers::azure::AzureProvider;
use crate::providers::openai::OpenAiProvider;
use crate::providers::Provider;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

/// Constructor for a runtime-registered adapter type. The trait bound on the
/// returned adapter enforces the full capability set statically.
pub type ProviderCtor =
    Box<dyn Fn(&GatewayConfig, reqwest::Client) -> Result<Arc<dyn Provider>> + Send + Sync>;

pub struct ProviderRegistry {
    config: GatewayConfig,
    client: reqwest::Client,
    instances: Mutex<HashMap<String, Arc<dyn Provider>>>,
    custom: Mutex<HashMap<String, ProviderCtor>>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new(config: GatewayConfig, client: reqwest::Client) -> Self {
        Self {
            config,
            client,
            instances: Mutex::new(HashMap::new()),
            custom: Mutex::new(HashMap::new()),
        }
    }

    /// Get the cached adapter for `name`, constructing it on first use.
    ///
    /// Construction happens under the cache lock (it is cheap and does no
    /// I/O), so concurrent first-access for the same name cannot build
    /// duplicate adapters.
    pub fn get_adapter(&self, name: &str) -> Result<Arc<dyn Provider>> {
        let mut instances = self
            .instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(provider) = instances.get(name) {
            return Ok(provider.clone());
        }

        let provider = self.construct(name)?;
        instances.insert(name.to_string(), provider.clone());
        Ok(provider)
    }

    fn construct(&self, name: &str) -> Result<Arc<dyn Provider>> {
        match name {
            "openai" => {
                let config = self.config.providers.openai.as_ref().ok_or_else(|| {
                    GatewayError::configuration("Provider openai is not configured")
                })?;
                if !config.enabled {
                    return Err(GatewayError::configuration("Provider openai is disabled"));
                }
                Ok(Arc::new(OpenAiProvider::new(config, self.client.clone())?))
            }
            "claude" => {
                let config = self.config.providers.claude.as_ref().ok_or_else(|| {
                    GatewayError::configuration("Provider claude is not configured")
                })?;
                if !config.enabled {
                    return Err(GatewayError::configuration("Provider claude is disabled"));
                }
                Ok(Arc::new(AnthropicProvider::new(
                    config,
                    self.client.clone(),
                )?))
            }
            "azure" => {
                let config = self.config.providers.azure.as_ref().ok_or_else(|| {
                    GatewayError::configuration("Provider azure is not configured")
                })?;
                if !config.enabled {
                    return Err(GatewayError::configuration("Provider azure is disabled"));
                }
                Ok(Arc::new(AzureProvider::new(config, self.client.clone())?))
            }
            other => {
                let custom = self.custom.lock().unwrap_or_else(PoisonError::into_inner);
                match custom.get(other) {
                    Some(ctor) => ctor(&self.config, self.client.clone()),
                    None => Err(GatewayError::configuration(format!(
                        "Unknown provider: {other}"
                    ))),
                }
            }
        }
    }

    /// Register an additional adapter type under `name`.
    ///
    /// Shadowing a built-in adapter is rejected; re-registering a custom
    /// name replaces the previous constructor.
    pub fn register(&self, name: &str, ctor: ProviderCtor) -> Result<()> {
        if name.is_empty() {
            return Err(GatewayError::configuration(
                "Provider name must not be empty",
            ));
        }
        if BUILTIN_PROVIDERS.contains(&name) {
            return Err(GatewayError::configuration(format!(
                "Cannot register provider '{name}': the name is reserved for a built-in adapter"
            )));
        }

        let mut custom = self.custom.lock().unwrap_or_else(PoisonError::into_inner);
        custom.insert(name.to_string(), ctor);
        Ok(())
    }

    /// Per-provider enablement: a provider is enabled iff its config marks
    /// it enabled AND an api_key is present. Recomputed from configuration
    /// on every call, never cached.
    #[must_use]
    pub fn list_enabled(&self) -> BTreeMap<String, bool> {
        let providers = &self.config.providers;
        let mut enabled = BTreeMap::new();

        enabled.insert(
            "openai".to_string(),
            providers
                .openai
                .as_ref()
                .is_some_and(|c| c.enabled && !c.api_key.is_empty()),
        );
        enabled.insert(
            "claude".to_string(),
            providers
                .claude
                .as_ref()
                .is_some_and(|c| c.enabled && !c.api_key.is_empty()),
        );
        enabled.insert(
            "azure".to_string(),
            providers
                .azure
                .as_ref()
                .is_some_and(|c| c.enabled && !c.api_key.is_empty()),
        );

        enabled
    }

    /// Probe every enabled adapter concurrently. A provider whose probe
    /// fails, or that cannot be constructed, is reported unhealthy; this
    /// never errors. Cached custom adapters are probed too.
    pub async fn health_check_all(&self) -> BTreeMap<String, bool> {
        let mut targets: Vec<(String, Option<Arc<dyn Provider>>)> = Vec::new();

        for (name, enabled) in self.list_enabled() {
            let adapter = if enabled {
                self.get_adapter(&name).ok()
            } else {
                None
            };
            targets.push((name, adapter));
        }

        {
            let instances = self
                .instances
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            for (name, provider) in instances.iter() {
                if !BUILTIN_PROVIDERS.contains(&name.as_str()) {
                    targets.push((name.clone(), Some(provider.clone())));
                }
            }
        }

        let probes = targets.into_iter().map(|(name, adapter)| async move {
            let healthy = match adapter {
                Some(adapter) => adapter.health_check().await,
                None => false,
            };
            (name, healthy)
        });

        futures::future::join_all(probes).await.into_iter().collect()
    }

    /// Release all adapter instances. Idempotent; safe to call even if no
    /// adapter was ever constructed.
    pub async fn close(&self) {
        let drained: Vec<Arc<dyn Provider>> = {
            let mut instances = self
                .instances
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            instances.drain().map(|(_, provider)| provider).collect()
        };

        for provider in drained {
            provider.close().await;
        }
    }

    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}
