//! Error types for the gateway.

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("Invalid request: {message}")]
    Validation { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("No provider configured for model: {model}")]
    ModelNotConfigured { model: String },

    #[error("Model {model} is not supported by provider {provider}")]
    UnsupportedModel { model: String, provider: String },

    #[error("Provider {provider} does not support {operation}")]
    UnsupportedOperation {
        operation: String,
        provider: String,
    },

    #[error("Upstream error from {provider} (status {status_code}): {message}")]
    Upstream {
        provider: String,
        status_code: u16,
        message: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl GatewayError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    pub fn model_not_configured(model: impl Into<String>) -> Self {
        Self::ModelNotConfigured {
            model: model.into(),
        }
    }

    pub fn unsupported_model(model: impl Into<String>, provider: impl Into<String>) -> Self {
        Self::UnsupportedModel {
            model: model.into(),
            provider: provider.into(),
        }
    }

    pub fn unsupported_operation(
        operation: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self::UnsupportedOperation {
            operation: operation.into(),
            provider: provider.into(),
        }
    }

    pub fn upstream(
        provider: impl Into<String>,
        status_code: u16,
        message: impl Into<String>,
    ) -> Self {
        Self::Upstream {
            provider: provider.into(),
            status_code,
            message: message.into(),
        }
    }

    /// HTTP status the gateway surfaces for this error kind.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation { .. }
            | Self::ModelNotConfigured { .. }
            | Self::UnsupportedModel { .. } => 400,
            Self::UnsupportedOperation { .. } => 501,
            Self::Upstream { status_code, .. } => *status_code,
            _ => 500,
        }
    }

    /// Machine-readable error kind used in HTTP error bodies.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Validation { .. } | Self::UnsupportedModel { .. } => "invalid_request_error",
            Self::Configuration { .. } => "configuration_error",
            Self::ModelNotConfigured { .. } => "model_not_found",
            Self::UnsupportedOperation { .. } => "not_implemented",
            Self::Upstream { .. } => "upstream_error",
            _ => "api_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
