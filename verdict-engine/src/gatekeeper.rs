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

//! Quality gate.
//!
//! A project may carry a gate file (`artifacts/gates/<project_id>.json`)
//! listing per-metric minimum averages. The gate is evaluated against the
//! run's `avg_scores` after aggregation; a missing or unreadable gate
//! file is non-fatal and simply omits the report.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;
use verdict_core::GatekeeperReport;

#[derive(Debug, Deserialize)]
struct GateFile {
    /// camelCase metric key -> minimum acceptable average.
    minimums: HashMap<String, f64>,
}

/// Evaluate a gate file against the aggregated averages. Returns `None`
/// when no gate applies (missing file, unreadable, or empty minimums).
pub fn evaluate_gate(
    gates_dir: &Path,
    project_id: &str,
    avg_scores: &HashMap<String, f64>,
) -> Option<GatekeeperReport> {
    let path = gates_dir.join(format!("{project_id}.json"));
    if !path.is_file() {
        return None;
    }

    let gate: GateFile = match std::fs::read_to_string(&path)
        .map_err(|e| e.to_string())
        .and_then(|raw| serde_json::from_str(&raw).map_err(|e| e.to_string()))
    {
        Ok(gate) => gate,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "skipping unreadable gate file");
            return None;
        }
    };
    if gate.minimums.is_empty() {
        return None;
    }

    let mut checked_metrics = Vec::new();
    let mut fail_reasons = Vec::new();
    for (metric, minimum) in &gate.minimums {
        checked_metrics.push(metric.clone());
        match avg_scores.get(metric) {
            Some(avg) if avg >= minimum => {}
            Some(avg) => fail_reasons.push(format!(
                "{metric}: average {avg:.3} below minimum {minimum:.3}"
            )),
            None => fail_reasons.push(format!("{metric}: no average recorded")),
        }
    }
    checked_metrics.sort_unstable();
    fail_reasons.sort_unstable();

    Some(GatekeeperReport {
        passed: fail_reasons.is_empty(),
        checked_metrics,
        fail_reasons,
    })
}
