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

//! Per-run credential scope.
//!
//! Credentials are threaded through call structures instead of process
//! env, so concurrent runs with different keys cannot race. Process env is
//! read as a fallback at resolution time but never written.

use crate::ProviderKind;
use std::collections::HashMap;

/// API keys for one run, keyed by provider tag.
#[derive(Debug, Clone, Default)]
pub struct CredentialBag {
    keys: HashMap<ProviderKind, String>,
    ollama_host: Option<String>,
    openai_base: Option<String>,
}

impl CredentialBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, provider: ProviderKind, key: impl Into<String>) {
        let key = key.into();
        if !key.trim().is_empty() {
            self.keys.insert(provider, key);
        }
    }

    /// Insert by raw tag, ignoring tags that do not parse.
    pub fn insert_tag(&mut self, tag: &str, key: impl Into<String>) {
        if let Ok(provider) = ProviderKind::parse(tag) {
            self.insert(provider, key);
        }
    }

    pub fn set_ollama_host(&mut self, host: impl Into<String>) {
        self.ollama_host = Some(host.into());
    }

    pub fn set_openai_base(&mut self, base: impl Into<String>) {
        self.openai_base = Some(base.into());
    }

    /// Resolve the key for a provider: explicit entry first, then the
    /// provider's environment variables in order.
    pub fn resolve(&self, provider: ProviderKind) -> Option<String> {
        if let Some(key) = self.keys.get(&provider) {
            return Some(key.clone());
        }
        provider
            .key_env_vars()
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()))
    }

    /// Ollama server base URL: explicit, then `OLLAMA_HOST`, then the
    /// local default.
    pub fn ollama_host(&self) -> String {
        self.ollama_host
            .clone()
            .or_else(|| std::env::var("OLLAMA_HOST").ok().filter(|v| !v.is_empty()))
            .unwrap_or_else(|| "http://localhost:11434".to_string())
    }

    /// OpenAI-compatible base override: explicit, then `OPENAI_API_BASE`.
    pub fn openai_base(&self) -> Option<String> {
        self.openai_base
            .clone()
            .or_else(|| std::env::var("OPENAI_API_BASE").ok().filter(|v| !v.is_empty()))
    }
}
