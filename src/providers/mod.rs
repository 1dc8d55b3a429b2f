//! AI reply providers

mod gemini;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::GeminiConfig;

pub use gemini::{FetchError, GeminiProvider, NO_REPLY, NO_RESPONSE};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Produces the assistant's reply to a single user utterance.
///
/// Implementations never fail: every error is rendered as a placeholder
/// string so the conversation always gets an assistant entry.
#[async_trait]
pub trait ReplyFetcher: Send + Sync {
    async fn fetch_reply(&self, user_text: &str) -> String;
}

/// Build the configured reply provider
pub fn from_config(config: &GeminiConfig) -> Result<Arc<dyn ReplyFetcher>, ProviderError> {
    let api_key = config
        .api_key
        .clone()
        .filter(|key| !key.is_empty())
        .ok_or_else(|| ProviderError::NotConfigured("GEMINI_API_KEY is not set".into()))?;

    let provider = GeminiProvider::new(
        &config.base_url,
        &config.model,
        api_key,
        Duration::from_secs(config.request_timeout_secs),
    )?;

    tracing::info!(model = %config.model, "Using Gemini reply provider");
    Ok(Arc::new(provider))
}
