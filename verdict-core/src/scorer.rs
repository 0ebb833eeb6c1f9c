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

//! Custom LLM-as-judge scorer definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScorerType {
    Llm,
    Builtin,
    Custom,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeModelParams {
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeModelConfig {
    pub provider: String,
    pub name: String,
    #[serde(default)]
    pub params: JudgeModelParams,
}

/// One message of the judge prompt. The template may contain `{{input}}`,
/// `{{output}}`, and `{{expected}}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub role: String,
    pub template: String,
}

/// Mapping from judge label to numeric score, typically
/// `{PASS: 1.0, FAIL: 0.0}`.
pub type ChoiceScores = HashMap<String, f64>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScorerConfig {
    pub judge_model: JudgeModelConfig,
    pub messages: Vec<MessageTemplate>,
    pub choice_scores: ChoiceScores,
    #[serde(default)]
    pub pass_threshold: Option<f64>,
}

/// Stored scorer definition. `metric_key` is unique within
/// `(tenant, project_id)`; disabling hides the scorer from dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScorerDefinition {
    pub id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    pub tenant: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub scorer_type: ScorerType,
    pub metric_key: String,
    pub enabled: bool,
    pub default_threshold: f64,
    pub weight: f64,
    pub config: ScorerConfig,
    pub created_at: DateTime<Utc>,
}

impl ScorerDefinition {
    pub fn pass_threshold(&self) -> f64 {
        self.config.pass_threshold.unwrap_or(self.default_threshold)
    }
}
