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

//! Durable experiment record and lifecycle.

use crate::config::ExperimentConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Experiment lifecycle. `Completed` and `Failed` are terminal; the store
/// rejects transitions out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExperimentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExperimentStatus::Completed | ExperimentStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentStatus::Pending => "pending",
            ExperimentStatus::Running => "running",
            ExperimentStatus::Completed => "completed",
            ExperimentStatus::Failed => "failed",
        }
    }
}

/// Quality-gate outcome attached to the results payload when a gate file
/// exists for the project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatekeeperReport {
    pub passed: bool,
    pub checked_metrics: Vec<String>,
    pub fail_reasons: Vec<String>,
}

/// Aggregated results written once on successful completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentResults {
    pub total_prompts: usize,
    /// camelCase metric key (built-in) or scorer metric_key -> average.
    pub avg_scores: HashMap<String, f64>,
    /// First 10 per-sample results in dataset order.
    pub detailed_results: Vec<serde_json::Value>,
    pub completed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gatekeeper: Option<GatekeeperReport>,
}

/// A durable evaluation job.
///
/// `results` is only written on `completed`, `error_message` only on
/// `failed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub id: String,
    pub tenant: String,
    pub project_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub config: ExperimentConfig,
    pub status: ExperimentStatus,
    #[serde(default)]
    pub results: Option<ExperimentResults>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Experiment {
    /// New pending experiment from a validated config.
    pub fn new(tenant: impl Into<String>, config: ExperimentConfig) -> Self {
        Self {
            id: crate::new_id("exp"),
            tenant: tenant.into(),
            project_id: config.project_id.clone(),
            name: config.name.clone(),
            description: config.description.clone(),
            config,
            status: ExperimentStatus::Pending,
            results: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}
