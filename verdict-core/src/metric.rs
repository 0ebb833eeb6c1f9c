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

//! Aggregated per-experiment metric rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `Performance` rows are written per sample (latency); `Quality` rows are
/// written once per experiment as averages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Performance,
    Quality,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationMetric {
    pub id: String,
    pub experiment_id: String,
    pub tenant: String,
    pub metric_name: String,
    pub metric_type: MetricType,
    pub value: f64,
    #[serde(default)]
    pub dimensions: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl EvaluationMetric {
    pub fn new(
        experiment_id: impl Into<String>,
        tenant: impl Into<String>,
        metric_name: impl Into<String>,
        metric_type: MetricType,
        value: f64,
    ) -> Self {
        Self {
            id: crate::new_id("met"),
            experiment_id: experiment_id.into(),
            tenant: tenant.into(),
            metric_name: metric_name.into(),
            metric_type,
            value,
            dimensions: None,
            created_at: Utc::now(),
        }
    }
}
