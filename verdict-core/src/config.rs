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

//! Experiment request payload and dataset sample shapes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which family of built-in metrics applies to an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Chatbot,
    Rag,
    #[serde(alias = "agents")]
    Agent,
    Safety,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Chatbot => "chatbot",
            TaskType::Rag => "rag",
            TaskType::Agent => "agent",
            TaskType::Safety => "safety",
        }
    }
}

/// Which evaluation paths run for an experiment.
///
/// `Scorer` runs only custom LLM-judge scorers, `Standard` only built-in
/// metrics, `Both` runs both. `Both` is the default when the config omits
/// the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationMode {
    Scorer,
    Standard,
    #[default]
    Both,
}

impl EvaluationMode {
    pub fn runs_builtin(&self) -> bool {
        matches!(self, EvaluationMode::Standard | EvaluationMode::Both)
    }

    pub fn runs_scorers(&self) -> bool {
        matches!(self, EvaluationMode::Scorer | EvaluationMode::Both)
    }
}

/// Target model selection.
///
/// `provider` and `access_method` are aliases in the wire payload; the
/// first one present wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    pub name: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub access_method: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

impl ModelConfig {
    /// Normalized lowercase provider tag, from `provider` or `accessMethod`.
    pub fn provider_tag(&self) -> Option<String> {
        self.provider
            .as_deref()
            .or(self.access_method.as_deref())
            .map(|p| p.trim().to_lowercase())
    }
}

/// Judge model used for built-in LLM-as-judge metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeLlmConfig {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

/// One speaker turn in a conversation sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// Single-turn dataset sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptSample {
    #[serde(default)]
    pub id: Option<String>,
    pub prompt: String,
    #[serde(default)]
    pub expected_output: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub difficulty: Option<String>,
    /// Retrieved passages for RAG datasets.
    #[serde(default, alias = "retrieval_context")]
    pub context: Option<Vec<String>>,
}

/// Multi-turn dataset sample: a recorded conversation to replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSample {
    #[serde(default)]
    pub scenario: Option<String>,
    #[serde(default)]
    pub expected_outcome: Option<String>,
    pub turns: Vec<Turn>,
}

/// Scenario for simulated-conversation mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedScenario {
    pub scenario: String,
    #[serde(default)]
    pub expected_outcome: Option<String>,
    #[serde(default)]
    pub user_description: Option<String>,
}

/// Dataset reference. The loader resolves inline samples first, then a
/// built-in preset, then a custom path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetConfig {
    #[serde(default)]
    pub use_builtin: Option<TaskType>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub prompts: Option<Vec<PromptSample>>,
    #[serde(default)]
    pub conversations: Option<Vec<ConversationSample>>,
    #[serde(default)]
    pub simulated_mode: Option<bool>,
    #[serde(default)]
    pub scenarios: Option<Vec<SimulatedScenario>>,
    #[serde(default)]
    pub max_turns: Option<usize>,
}

/// Full experiment request payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentConfig {
    #[serde(rename = "project_id")]
    pub project_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub task_type: Option<TaskType>,
    #[serde(default)]
    pub evaluation_mode: Option<EvaluationMode>,
    pub model: ModelConfig,
    #[serde(default)]
    pub judge_llm: Option<JudgeLlmConfig>,
    #[serde(default)]
    pub dataset: DatasetConfig,
    /// camelCase metric key -> enabled.
    #[serde(default)]
    pub metrics: Option<HashMap<String, bool>>,
    /// snake_case metric key -> pass threshold override.
    #[serde(default)]
    pub thresholds: Option<HashMap<String, f64>>,
    #[serde(default)]
    pub selected_scorers: Option<Vec<String>>,
    /// provider tag -> API key, for custom scorer judge models.
    #[serde(default)]
    pub scorer_api_keys: Option<HashMap<String, String>>,
}

impl ExperimentConfig {
    pub fn evaluation_mode(&self) -> EvaluationMode {
        self.evaluation_mode.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluation_mode_default_is_both() {
        let mode = EvaluationMode::default();
        assert!(mode.runs_builtin());
        assert!(mode.runs_scorers());
    }

    #[test]
    fn test_task_type_accepts_agents_alias() {
        let t: TaskType = serde_json::from_str("\"agents\"").unwrap();
        assert_eq!(t, TaskType::Agent);
    }

    #[test]
    fn test_experiment_config_minimal_payload() {
        let raw = serde_json::json!({
            "project_id": "proj-1",
            "name": "smoke",
            "model": { "name": "gpt-4o-mini", "provider": "openai" }
        });
        let config: ExperimentConfig = serde_json::from_value(raw).unwrap();
        assert_eq!(config.evaluation_mode(), EvaluationMode::Both);
        assert_eq!(config.model.provider_tag().as_deref(), Some("openai"));
        assert!(config.dataset.prompts.is_none());
    }

    #[test]
    fn test_model_config_access_method_fallback() {
        let raw = serde_json::json!({ "name": "m", "accessMethod": "Ollama" });
        let model: ModelConfig = serde_json::from_value(raw).unwrap();
        assert_eq!(model.provider_tag().as_deref(), Some("ollama"));
    }

    #[test]
    fn test_prompt_sample_retrieval_context_alias() {
        let raw = serde_json::json!({
            "prompt": "q",
            "retrieval_context": ["passage"]
        });
        let sample: PromptSample = serde_json::from_value(raw).unwrap();
        assert_eq!(sample.context.unwrap().len(), 1);
    }
}
