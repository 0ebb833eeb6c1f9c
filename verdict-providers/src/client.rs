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

//! The provider-abstracted model client.

use crate::credentials::CredentialBag;
use crate::ollama;
use crate::retry::{with_backoff, RetryPolicy};
use crate::{GenerationOptions, ProviderError, ProviderKind, TextGenerator};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

const OPENAI_BASE: &str = "https://api.openai.com/v1";
const OPENROUTER_BASE: &str = "https://openrouter.ai/api/v1";
const XAI_BASE: &str = "https://api.x.ai/v1";
const MISTRAL_BASE: &str = "https://api.mistral.ai/v1";
const ANTHROPIC_BASE: &str = "https://api.anthropic.com/v1";
const GOOGLE_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const HUGGINGFACE_BASE: &str = "https://api-inference.huggingface.co/models";

/// OpenAI chat families that take `max_completion_tokens` instead of
/// `max_tokens`. Matched by name prefix; update when OpenAI ships a new
/// family.
pub const MAX_COMPLETION_TOKENS_PREFIXES: &[&str] = &["o1", "o3", "gpt-4o", "gpt-4.5", "gpt-5"];

/// Whether an OpenAI model name selects the `max_completion_tokens` field.
pub fn uses_max_completion_tokens(model: &str) -> bool {
    let lower = model.to_lowercase();
    MAX_COMPLETION_TOKENS_PREFIXES
        .iter()
        .any(|p| lower.starts_with(p))
}

/// "o-series" reasoning models accept only `temperature`; `top_p` is
/// silently omitted.
pub fn is_o_series(model: &str) -> bool {
    model.to_lowercase().starts_with('o')
}

/// One model behind one provider. Stateless across calls apart from the
/// lazily-reused HTTP client; treat as immutable after construction.
#[derive(Debug)]
pub struct ModelClient {
    provider: ProviderKind,
    model: String,
    api_key: Option<String>,
    base_url: String,
    retry: RetryPolicy,
    http: reqwest::Client,
}

impl ModelClient {
    /// Build a client, resolving credentials from the bag. Missing keys
    /// for providers that require one are a configuration error; no
    /// generation is attempted.
    pub fn new(
        provider: ProviderKind,
        model: impl Into<String>,
        credentials: &CredentialBag,
    ) -> Result<Self, ProviderError> {
        let model = model.into();
        let api_key = credentials.resolve(provider);
        if api_key.is_none() && !provider.key_optional() {
            return Err(ProviderError::Configuration(format!(
                "missing API key for provider {}",
                provider.as_str()
            )));
        }

        let base_url = match provider {
            ProviderKind::OpenAi => credentials
                .openai_base()
                .unwrap_or_else(|| OPENAI_BASE.to_string()),
            ProviderKind::CustomApi => credentials.openai_base().ok_or_else(|| {
                ProviderError::Configuration(
                    "custom_api provider requires an endpoint URL".to_string(),
                )
            })?,
            ProviderKind::OpenRouter => OPENROUTER_BASE.to_string(),
            ProviderKind::Xai => XAI_BASE.to_string(),
            ProviderKind::Mistral => MISTRAL_BASE.to_string(),
            ProviderKind::Anthropic => ANTHROPIC_BASE.to_string(),
            ProviderKind::Google => GOOGLE_BASE.to_string(),
            ProviderKind::HuggingFace => HUGGINGFACE_BASE.to_string(),
            ProviderKind::Ollama => credentials.ollama_host(),
        };

        Ok(Self {
            provider,
            model,
            api_key,
            base_url,
            retry: RetryPolicy::default(),
            http: reqwest::Client::new(),
        })
    }

    /// Point the client at a different endpoint (tests, gateways).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    fn key(&self) -> &str {
        self.api_key.as_deref().unwrap_or_default()
    }

    /// Turn a non-success response into an API error carrying the status
    /// and body text, so rate-limit classification sees both.
    async fn api_error(response: reqwest::Response) -> ProviderError {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        ProviderError::Api { status, message }
    }

    async fn post_json(&self, url: String, body: Value) -> Result<Value, ProviderError> {
        let mut request = self.http.post(url).json(&body);
        request = match self.provider {
            ProviderKind::Anthropic => request
                .header("x-api-key", self.key())
                .header("anthropic-version", "2023-06-01"),
            ProviderKind::Google | ProviderKind::Ollama => request,
            _ => request.header("Authorization", format!("Bearer {}", self.key())),
        };

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        Ok(response.json().await?)
    }

    fn openai_style_body(&self, prompt: &str, options: &GenerationOptions) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": options.temperature,
        });

        let openai_family = matches!(self.provider, ProviderKind::OpenAi | ProviderKind::CustomApi);
        let token_field = if openai_family && uses_max_completion_tokens(&self.model) {
            "max_completion_tokens"
        } else {
            "max_tokens"
        };
        body[token_field] = json!(options.max_tokens);

        if let Some(top_p) = options.top_p {
            // o-series models accept only temperature.
            if !(openai_family && is_o_series(&self.model)) {
                body["top_p"] = json!(top_p);
            }
        }
        body
    }

    fn extract_chat_content(data: &Value) -> Result<String, ProviderError> {
        let content = &data["choices"][0]["message"]["content"];
        match content {
            Value::String(s) => Ok(s.clone()),
            // Mistral may return a list of content blocks; concatenate the
            // text fields in order.
            Value::Array(blocks) => Ok(blocks
                .iter()
                .map(|b| b["text"].as_str().unwrap_or_default())
                .collect::<Vec<_>>()
                .concat()),
            Value::Null => Err(ProviderError::InvalidResponse(
                "missing message content".to_string(),
            )),
            other => Ok(other.to_string()),
        }
    }

    async fn generate_openai_style(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, ProviderError> {
        let body = self.openai_style_body(prompt, options);
        let data = self
            .post_json(format!("{}/chat/completions", self.base_url), body)
            .await?;
        Self::extract_chat_content(&data)
    }

    async fn generate_xai(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, ProviderError> {
        // xAI is OpenAI-compatible but takes only max_tokens/temperature.
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
        });
        let data = self
            .post_json(format!("{}/chat/completions", self.base_url), body)
            .await?;
        Self::extract_chat_content(&data)
    }

    async fn generate_anthropic(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, ProviderError> {
        // Anthropic rejects temperature and top_p together: top_p wins
        // when explicitly provided, else temperature, never both.
        let mut body = json!({
            "model": self.model,
            "max_tokens": options.max_tokens,
            "messages": [{ "role": "user", "content": prompt }],
        });
        match options.top_p {
            Some(top_p) => body["top_p"] = json!(top_p),
            None => body["temperature"] = json!(options.temperature),
        }

        let data = self
            .post_json(format!("{}/messages", self.base_url), body)
            .await?;
        data["content"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ProviderError::InvalidResponse("missing content text".to_string()))
    }

    async fn generate_google(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, ProviderError> {
        let mut generation_config = json!({
            "maxOutputTokens": options.max_tokens,
            "temperature": options.temperature,
        });
        if let Some(top_p) = options.top_p {
            generation_config["topP"] = json!(top_p);
        }
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": generation_config,
        });

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url,
            self.model,
            self.key()
        );
        let data = self.post_json(url, body).await?;

        let parts = data["candidates"][0]["content"]["parts"]
            .as_array()
            .ok_or_else(|| ProviderError::InvalidResponse("missing candidates".to_string()))?;
        Ok(parts
            .iter()
            .map(|p| p["text"].as_str().unwrap_or_default())
            .collect::<Vec<_>>()
            .concat())
    }

    async fn generate_huggingface(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, ProviderError> {
        let mut parameters = json!({
            "max_new_tokens": options.max_tokens,
            "temperature": options.temperature,
            "return_full_text": false,
        });
        if let Some(top_p) = options.top_p {
            parameters["top_p"] = json!(top_p);
        }
        let body = json!({ "inputs": prompt, "parameters": parameters });

        let data = self
            .post_json(format!("{}/{}", self.base_url, self.model), body)
            .await?;
        let text = data[0]["generated_text"]
            .as_str()
            .or_else(|| data["generated_text"].as_str())
            .ok_or_else(|| ProviderError::InvalidResponse("missing generated_text".to_string()))?;
        Ok(text.to_string())
    }

    async fn generate_ollama(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, ProviderError> {
        let mut opts = json!({
            "num_predict": options.max_tokens,
            "temperature": options.temperature,
        });
        if let Some(top_p) = options.top_p {
            opts["top_p"] = json!(top_p);
        }
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": opts,
        });

        let data = self
            .post_json(format!("{}/api/generate", self.base_url), body)
            .await?;
        data["response"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ProviderError::InvalidResponse("missing response field".to_string()))
    }

    async fn generate_once(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, ProviderError> {
        let text = match self.provider {
            ProviderKind::OpenAi
            | ProviderKind::OpenRouter
            | ProviderKind::Mistral
            | ProviderKind::CustomApi => self.generate_openai_style(prompt, options).await?,
            ProviderKind::Xai => self.generate_xai(prompt, options).await?,
            ProviderKind::Anthropic => self.generate_anthropic(prompt, options).await?,
            ProviderKind::Google => self.generate_google(prompt, options).await?,
            ProviderKind::HuggingFace => self.generate_huggingface(prompt, options).await?,
            ProviderKind::Ollama => self.generate_ollama(prompt, options).await?,
        };
        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl TextGenerator for ModelClient {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, ProviderError> {
        if self.provider == ProviderKind::Ollama {
            ollama::ensure_model(&self.http, &self.base_url, &self.model).await;
        }
        debug!(provider = self.provider.as_str(), model = %self.model, "generating");
        with_backoff(self.retry, || self.generate_once(prompt, options)).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use std::time::Duration;

    fn bag_with(provider: ProviderKind, key: &str) -> CredentialBag {
        let mut bag = CredentialBag::new();
        bag.insert(provider, key);
        bag
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_retries: 3,
        }
    }

    #[test]
    fn test_max_completion_tokens_prefixes() {
        assert!(uses_max_completion_tokens("o1-preview"));
        assert!(uses_max_completion_tokens("o3-mini"));
        assert!(uses_max_completion_tokens("gpt-4o"));
        assert!(uses_max_completion_tokens("gpt-4o-mini"));
        assert!(uses_max_completion_tokens("gpt-4.5-turbo"));
        assert!(uses_max_completion_tokens("gpt-5"));
        assert!(!uses_max_completion_tokens("gpt-4-turbo"));
        assert!(!uses_max_completion_tokens("gpt-3.5-turbo"));
    }

    #[test]
    fn test_o_series_detection() {
        assert!(is_o_series("o1-mini"));
        assert!(is_o_series("o3"));
        assert!(!is_o_series("gpt-4o"));
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        let bag = CredentialBag::new();
        if std::env::var("MISTRAL_API_KEY").is_ok() {
            return; // can't exercise the missing-key path in this env
        }
        let err = ModelClient::new(ProviderKind::Mistral, "mistral-small", &bag).unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let bag = CredentialBag::new();
        assert!(ModelClient::new(ProviderKind::Ollama, "llama3.2", &bag).is_ok());
    }

    #[test]
    fn test_custom_api_requires_endpoint() {
        let mut bag = CredentialBag::new();
        bag.insert(ProviderKind::CustomApi, "sk-key");
        let err = ModelClient::new(ProviderKind::CustomApi, "m", &bag);
        if std::env::var("OPENAI_API_BASE").is_err() {
            assert!(matches!(err, Err(ProviderError::Configuration(_))));
        }
        bag.set_openai_base("http://localhost:9999/v1");
        assert!(ModelClient::new(ProviderKind::CustomApi, "m", &bag).is_ok());
    }

    #[test]
    fn test_openai_body_token_field_by_prefix() {
        let bag = bag_with(ProviderKind::OpenAi, "sk-test");
        let options = GenerationOptions::new(128, 0.7);

        let newer = ModelClient::new(ProviderKind::OpenAi, "gpt-4o-mini", &bag).unwrap();
        let body = newer.openai_style_body("hi", &options);
        assert_eq!(body["max_completion_tokens"], 128);
        assert!(body.get("max_tokens").is_none());

        let older = ModelClient::new(ProviderKind::OpenAi, "gpt-3.5-turbo", &bag).unwrap();
        let body = older.openai_style_body("hi", &options);
        assert_eq!(body["max_tokens"], 128);
        assert!(body.get("max_completion_tokens").is_none());
    }

    #[test]
    fn test_openai_o_series_omits_top_p() {
        let bag = bag_with(ProviderKind::OpenAi, "sk-test");
        let options = GenerationOptions::new(128, 0.7).with_top_p(0.9);

        let o_series = ModelClient::new(ProviderKind::OpenAi, "o3-mini", &bag).unwrap();
        let body = o_series.openai_style_body("hi", &options);
        assert!(body.get("top_p").is_none());

        let chat = ModelClient::new(ProviderKind::OpenAi, "gpt-4o", &bag).unwrap();
        let body = chat.openai_style_body("hi", &options);
        assert_eq!(body["top_p"], 0.9);
    }

    #[tokio::test]
    async fn test_openai_generate_trims_content() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(
                r#"{"choices":[{"message":{"content":"  Paris \n"}}],"usage":{"total_tokens":3}}"#,
            )
            .create_async()
            .await;

        let bag = bag_with(ProviderKind::OpenAi, "sk-test");
        let client = ModelClient::new(ProviderKind::OpenAi, "gpt-4o-mini", &bag)
            .unwrap()
            .with_base_url(server.url());

        let out = client
            .generate("Capital of France?", &GenerationOptions::default())
            .await
            .unwrap();
        assert_eq!(out, "Paris");
    }

    #[tokio::test]
    async fn test_anthropic_sends_exactly_one_of_temperature_top_p() {
        let mut server = mockito::Server::new_async().await;
        let with_top_p = server
            .mock("POST", "/messages")
            .match_request(|req| {
                let body: Value = serde_json::from_slice(req.body().unwrap()).unwrap();
                body.get("top_p").is_some() && body.get("temperature").is_none()
            })
            .with_status(200)
            .with_body(r#"{"content":[{"text":"ok"}],"usage":{"input_tokens":1,"output_tokens":1}}"#)
            .expect(1)
            .create_async()
            .await;

        let bag = bag_with(ProviderKind::Anthropic, "sk-ant");
        let client = ModelClient::new(ProviderKind::Anthropic, "claude-3-5-haiku-20241022", &bag)
            .unwrap()
            .with_base_url(server.url());

        let options = GenerationOptions::new(64, 0.7).with_top_p(0.95);
        assert_eq!(client.generate("hi", &options).await.unwrap(), "ok");
        with_top_p.assert_async().await;

        let with_temperature = server
            .mock("POST", "/messages")
            .match_request(|req| {
                let body: Value = serde_json::from_slice(req.body().unwrap()).unwrap();
                body.get("temperature").is_some() && body.get("top_p").is_none()
            })
            .with_status(200)
            .with_body(r#"{"content":[{"text":"ok"}],"usage":{"input_tokens":1,"output_tokens":1}}"#)
            .expect(1)
            .create_async()
            .await;

        let options = GenerationOptions::new(64, 0.7);
        assert_eq!(client.generate("hi", &options).await.unwrap(), "ok");
        with_temperature.assert_async().await;
    }

    #[tokio::test]
    async fn test_mistral_concatenates_content_blocks() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(
                r#"{"choices":[{"message":{"content":[{"type":"text","text":"Hello "},{"type":"text","text":"world"}]}}]}"#,
            )
            .create_async()
            .await;

        let bag = bag_with(ProviderKind::Mistral, "sk-mis");
        let client = ModelClient::new(ProviderKind::Mistral, "mistral-small-latest", &bag)
            .unwrap()
            .with_base_url(server.url());

        let out = client
            .generate("hi", &GenerationOptions::default())
            .await
            .unwrap();
        assert_eq!(out, "Hello world");
    }

    #[tokio::test]
    async fn test_rate_limited_calls_are_retried_then_propagate() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body("rate limit exceeded")
            .expect(4) // initial attempt + 3 retries
            .create_async()
            .await;

        let bag = bag_with(ProviderKind::OpenAi, "sk-test");
        let client = ModelClient::new(ProviderKind::OpenAi, "gpt-4o-mini", &bag)
            .unwrap()
            .with_base_url(server.url())
            .with_retry_policy(fast_retry());

        let err = client
            .generate("hi", &GenerationOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_rate_limit());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_errors_are_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(500)
            .with_body("boom")
            .expect(1)
            .create_async()
            .await;

        let bag = bag_with(ProviderKind::OpenAi, "sk-test");
        let client = ModelClient::new(ProviderKind::OpenAi, "gpt-4o-mini", &bag)
            .unwrap()
            .with_base_url(server.url())
            .with_retry_policy(fast_retry());

        let err = client
            .generate("hi", &GenerationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Api { status: 500, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_google_concatenates_parts() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", Matcher::Regex(r"^/models/gemini.*:generateContent".to_string()))
            .with_status(200)
            .with_body(
                r#"{"candidates":[{"content":{"parts":[{"text":"A"},{"text":"B"}]}}]}"#,
            )
            .create_async()
            .await;

        let bag = bag_with(ProviderKind::Google, "g-key");
        let client = ModelClient::new(ProviderKind::Google, "gemini-1.5-flash", &bag)
            .unwrap()
            .with_base_url(server.url());

        let out = client
            .generate("hi", &GenerationOptions::default())
            .await
            .unwrap();
        assert_eq!(out, "AB");
    }

    #[tokio::test]
    async fn test_empty_content_returns_empty_string() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"content":""}}]}"#)
            .create_async()
            .await;

        let bag = bag_with(ProviderKind::OpenAi, "sk-test");
        let client = ModelClient::new(ProviderKind::OpenAi, "gpt-4o-mini", &bag)
            .unwrap()
            .with_base_url(server.url());

        let out = client
            .generate("hi", &GenerationOptions::default())
            .await
            .unwrap();
        assert_eq!(out, "");
    }
}
