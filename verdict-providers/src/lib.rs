// Copyright 2025 Verdict Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! # Verdict Providers
//!
//! One `generate(prompt, options) -> text` operation over ~9 LLM
//! providers: OpenAI-compatible chat, Anthropic messages, Google Gemini,
//! xAI, Mistral, local Ollama, OpenRouter, HuggingFace inference, and a
//! custom OpenAI-compatible endpoint.
//!
//! Transient rate limits (HTTP 429 or a "rate limit" message) are retried
//! with exponential backoff; all other errors propagate after the first
//! attempt. Generation never returns null: empty provider content comes
//! back as an empty string and callers decide retry policy.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod client;
pub mod credentials;
pub mod ollama;
pub mod retry;

pub use client::ModelClient;
pub use credentials::CredentialBag;
pub use retry::RetryPolicy;

/// Tagged provider variants. No inheritance chains; provider-specific
/// behavior keys off this tag inside [`ModelClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Google,
    Xai,
    Mistral,
    Ollama,
    OpenRouter,
    HuggingFace,
    /// OpenAI-compatible endpoint at a caller-supplied base URL.
    CustomApi,
}

impl ProviderKind {
    /// Parse a normalized lowercase provider tag. `local` is an alias for
    /// HuggingFace (locally-hosted weights behind the inference API).
    /// Unknown tags fail fast with a configuration error.
    pub fn parse(tag: &str) -> Result<Self, ProviderError> {
        match tag.trim().to_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "anthropic" => Ok(ProviderKind::Anthropic),
            "google" | "gemini" => Ok(ProviderKind::Google),
            "xai" => Ok(ProviderKind::Xai),
            "mistral" => Ok(ProviderKind::Mistral),
            "ollama" => Ok(ProviderKind::Ollama),
            "openrouter" => Ok(ProviderKind::OpenRouter),
            "huggingface" | "local" => Ok(ProviderKind::HuggingFace),
            "custom_api" => Ok(ProviderKind::CustomApi),
            other => Err(ProviderError::Configuration(format!(
                "unsupported provider: {other}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Google => "google",
            ProviderKind::Xai => "xai",
            ProviderKind::Mistral => "mistral",
            ProviderKind::Ollama => "ollama",
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::HuggingFace => "huggingface",
            ProviderKind::CustomApi => "custom_api",
        }
    }

    /// Providers that do not require an API key.
    pub fn key_optional(&self) -> bool {
        matches!(self, ProviderKind::Ollama)
    }

    /// Environment variables consulted for this provider's key, in order.
    pub fn key_env_vars(&self) -> &'static [&'static str] {
        match self {
            ProviderKind::OpenAi | ProviderKind::CustomApi => &["OPENAI_API_KEY"],
            ProviderKind::Anthropic => &["ANTHROPIC_API_KEY"],
            ProviderKind::Google => &["GOOGLE_API_KEY", "GEMINI_API_KEY"],
            ProviderKind::Xai => &["XAI_API_KEY"],
            ProviderKind::Mistral => &["MISTRAL_API_KEY"],
            ProviderKind::Ollama => &[],
            ProviderKind::OpenRouter => &["OPENROUTER_API_KEY"],
            ProviderKind::HuggingFace => &["HF_API_KEY"],
        }
    }
}

/// Sampling options for one generation call.
///
/// `temperature` and `top_p` are both in `(0, 1]`. Providers that disallow
/// the pair simultaneously (Anthropic) send `top_p` when it is explicitly
/// provided and `temperature` otherwise, never both.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: Option<f64>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_tokens: 500,
            temperature: 0.7,
            top_p: None,
        }
    }
}

impl GenerationOptions {
    pub fn new(max_tokens: u32, temperature: f64) -> Self {
        Self {
            max_tokens,
            temperature,
            top_p: None,
        }
    }

    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = Some(top_p);
        self
    }
}

/// Errors from provider calls.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Unknown provider, missing API key, invalid model name. Never
    /// retried; surfaces before any generation attempt.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Provider returned a non-success status.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Provider response did not contain the expected fields.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProviderError {
    /// The retry rule: an error is a rate limit iff the status is 429 or
    /// its message contains "rate limit".
    pub fn is_rate_limit(&self) -> bool {
        match self {
            ProviderError::Api { status, message } => {
                *status == 429 || message.to_lowercase().contains("rate limit")
            }
            ProviderError::Http(e) => {
                e.status().map(|s| s.as_u16() == 429).unwrap_or(false)
                    || e.to_string().to_lowercase().contains("rate limit")
            }
            _ => false,
        }
    }
}

/// The one capability the rest of the engine needs from a model.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a whitespace-trimmed completion. Empty content is an empty
    /// string, never an error.
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, ProviderError>;

    fn model_name(&self) -> &str;
}

/// Builds a generator for a `(provider tag, model)` pair. The engine and
/// arena take one of these so tests can swap in scripted models.
pub type ModelFactory = std::sync::Arc<
    dyn Fn(&str, &str, &CredentialBag) -> Result<std::sync::Arc<dyn TextGenerator>, ProviderError>
        + Send
        + Sync,
>;

/// The production factory: parse the tag, build a [`ModelClient`].
pub fn default_model_factory() -> ModelFactory {
    std::sync::Arc::new(|provider, model, creds| {
        let kind = ProviderKind::parse(provider)?;
        Ok(std::sync::Arc::new(ModelClient::new(kind, model, creds)?)
            as std::sync::Arc<dyn TextGenerator>)
    })
}
