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

//! Per-sample evaluation log records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Success,
    Error,
}

/// One record per sample attempt. Append-mostly: the only later write is a
/// single shallow merge into `metadata` that attaches `metric_scores`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationLog {
    pub id: String,
    pub experiment_id: String,
    pub tenant: String,
    pub project_id: String,
    /// Groups spans originating from the same sample.
    pub trace_id: String,
    #[serde(default)]
    pub parent_trace_id: Option<String>,
    #[serde(default)]
    pub span_name: Option<String>,
    pub input_text: String,
    #[serde(default)]
    pub output_text: Option<String>,
    pub model_name: String,
    pub latency_ms: u64,
    pub token_count: u64,
    #[serde(default)]
    pub cost: Option<f64>,
    pub status: LogStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl EvaluationLog {
    pub fn new(
        experiment_id: impl Into<String>,
        tenant: impl Into<String>,
        project_id: impl Into<String>,
        input_text: impl Into<String>,
        model_name: impl Into<String>,
    ) -> Self {
        Self {
            id: crate::new_id("log"),
            experiment_id: experiment_id.into(),
            tenant: tenant.into(),
            project_id: project_id.into(),
            trace_id: crate::new_id("trace"),
            parent_trace_id: None,
            span_name: None,
            input_text: input_text.into(),
            output_text: None,
            model_name: model_name.into(),
            latency_ms: 0,
            token_count: 0,
            cost: None,
            status: LogStatus::Success,
            error_message: None,
            metadata: Map::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_success(mut self, output: impl Into<String>, latency_ms: u64) -> Self {
        let output = output.into();
        self.token_count = output.split_whitespace().count() as u64;
        self.output_text = Some(output);
        self.latency_ms = latency_ms;
        self.status = LogStatus::Success;
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.status = LogStatus::Error;
        self.error_message = Some(message.into());
        self
    }
}
