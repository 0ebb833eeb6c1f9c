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

//! Multi-contestant arena comparison records.

use crate::experiment::ExperimentStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `(provider, model)` plus any extra sampling parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hyperparameters {
    pub provider: String,
    pub model: String,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contestant {
    pub name: String,
    pub hyperparameters: Hyperparameters,
}

/// `name` is a comma-separated list of individual criteria; `criteria` is
/// the free-form rubric handed to the judge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArenaMetricConfig {
    pub name: String,
    pub criteria: String,
    #[serde(default)]
    pub dataset_path: Option<String>,
}

impl ArenaMetricConfig {
    /// The individual criterion names, split on commas.
    pub fn criterion_names(&self) -> Vec<String> {
        self.name
            .split(',')
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect()
    }
}

/// Arena request payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArenaConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub org_id: Option<String>,
    pub contestants: Vec<Contestant>,
    pub metric: ArenaMetricConfig,
    pub judge_model: String,
    #[serde(default)]
    pub api_keys: HashMap<String, String>,
}

/// Per-contestant output and scores for one prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArenaContestantResult {
    pub name: String,
    pub response: String,
    #[serde(default)]
    pub scores: Option<HashMap<String, f64>>,
}

/// One judged prompt in `detailed_results`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArenaPromptResult {
    pub test_case_index: usize,
    pub input: String,
    #[serde(default)]
    pub winner: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    pub contestants: Vec<ArenaContestantResult>,
    pub criteria: Vec<String>,
}

/// Durable arena comparison.
///
/// `winner` is a contestant name, `None`, or the literal `"Tie: A, B"` form
/// when multiple contestants share the max win count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArenaComparison {
    pub id: String,
    pub tenant: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub org_id: Option<String>,
    pub contestants: Vec<Contestant>,
    pub contestant_names: Vec<String>,
    pub metric_config: ArenaMetricConfig,
    pub judge_model: String,
    pub status: ExperimentStatus,
    #[serde(default)]
    pub progress: Option<String>,
    #[serde(default)]
    pub winner: Option<String>,
    #[serde(default)]
    pub win_counts: Option<HashMap<String, u32>>,
    #[serde(default)]
    pub detailed_results: Option<Vec<ArenaPromptResult>>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ArenaComparison {
    pub fn new(tenant: impl Into<String>, config: ArenaConfig) -> Self {
        let contestant_names = config.contestants.iter().map(|c| c.name.clone()).collect();
        Self {
            id: crate::new_id("arena"),
            tenant: tenant.into(),
            name: config.name,
            description: config.description,
            org_id: config.org_id,
            contestants: config.contestants,
            contestant_names,
            metric_config: config.metric,
            judge_model: config.judge_model,
            status: ExperimentStatus::Pending,
            progress: None,
            winner: None,
            win_counts: None,
            detailed_results: None,
            error_message: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}
