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

//! Local Ollama helpers: model-name validation and one-shot auto-pull.

use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, warn};

const MAX_MODEL_NAME_LEN: usize = 128;

fn model_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._:/-]*$").expect("static regex"))
}

/// Whether a model name is safe to hand to the Ollama API. Non-matching
/// names skip the auto-pull step.
pub fn valid_model_name(name: &str) -> bool {
    name.len() <= MAX_MODEL_NAME_LEN && model_name_re().is_match(name)
}

/// Ensure `model` exists locally, pulling it once if absent. Pull failure
/// is logged and generation proceeds (and will likely error there).
pub async fn ensure_model(http: &reqwest::Client, host: &str, model: &str) {
    if !valid_model_name(model) {
        warn!(model, "invalid ollama model name, skipping auto-pull");
        return;
    }

    let present = match http.get(format!("{host}/api/tags")).send().await {
        Ok(resp) => resp
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|tags| {
                tags["models"].as_array().map(|models| {
                    models.iter().any(|m| {
                        m["name"]
                            .as_str()
                            .map(|n| n == model || n.strip_suffix(":latest") == Some(model))
                            .unwrap_or(false)
                    })
                })
            })
            .unwrap_or(false),
        Err(e) => {
            warn!(error = %e, "could not list ollama models");
            false
        }
    };

    if present {
        debug!(model, "ollama model already present");
        return;
    }

    let body = serde_json::json!({ "name": model, "stream": false });
    match http.post(format!("{host}/api/pull")).json(&body).send().await {
        Ok(resp) if resp.status().is_success() => debug!(model, "pulled ollama model"),
        Ok(resp) => warn!(model, status = %resp.status(), "ollama pull failed"),
        Err(e) => warn!(model, error = %e, "ollama pull failed"),
    }
}
