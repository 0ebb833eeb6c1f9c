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

//! Durable evaluation store.
//!
//! One append-only JSON-lines log per tenant, replayed into an in-memory
//! index on open and compacted back to a snapshot. Updates append a full
//! record (last write wins by id); deletes append a tombstone. Log insert
//! order is preserved, so per-experiment log streams read back in the
//! order samples were evaluated.

use crate::StoreError;
use chrono::Utc;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use verdict_core::{
    scrub_secrets, ArenaComparison, EvaluationLog, EvaluationMetric, Experiment, ExperimentResults,
    ExperimentStatus, ScorerDefinition,
};

const STORE_FILE: &str = "records.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RecordKind {
    Experiment,
    Log,
    Metric,
    Scorer,
    Arena,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum LogEntry {
    Put {
        tenant: String,
        kind: RecordKind,
        record: Value,
    },
    Delete {
        tenant: String,
        kind: RecordKind,
        id: String,
    },
}

#[derive(Debug, Default)]
struct TenantState {
    experiments: Vec<Experiment>,
    logs: Vec<EvaluationLog>,
    metrics: Vec<EvaluationMetric>,
    scorers: Vec<ScorerDefinition>,
    arenas: Vec<ArenaComparison>,
}

/// Mean of the non-null per-sample values written for one metric name.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricAggregate {
    pub count: usize,
    pub avg: f64,
}

/// Tenant-scoped durable store for the evaluation engine.
pub struct EvalStore {
    data_dir: PathBuf,
    tenants: RwLock<HashMap<String, TenantState>>,
}

fn tenant_dir_name(tenant: &str) -> String {
    tenant
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn check_tenant(tenant: &str) -> Result<(), StoreError> {
    if tenant.trim().is_empty() {
        return Err(StoreError::MissingTenant);
    }
    Ok(())
}

/// Serialize, scrub credential-shaped keys, and rebuild the record. API
/// keys never survive into memory or onto disk.
fn scrubbed<T: Serialize + DeserializeOwned>(record: &T) -> Result<T, StoreError> {
    let mut value = serde_json::to_value(record)?;
    scrub_secrets(&mut value);
    Ok(serde_json::from_value(value)?)
}

impl EvalStore {
    /// Open or create a store rooted at `data_dir`, replaying and
    /// compacting every tenant log found under it.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;

        let store = Self {
            data_dir,
            tenants: RwLock::new(HashMap::new()),
        };
        store.load_all()?;
        store.compact_all()?;
        Ok(store)
    }

    fn tenant_file(&self, tenant: &str) -> PathBuf {
        self.data_dir.join(tenant_dir_name(tenant)).join(STORE_FILE)
    }

    fn load_all(&self) -> Result<(), StoreError> {
        for entry in std::fs::read_dir(&self.data_dir)? {
            let path = entry?.path().join(STORE_FILE);
            if !path.is_file() {
                continue;
            }
            let reader = BufReader::new(File::open(&path)?);
            let mut tenants = self.tenants.write();
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<LogEntry>(&line) {
                    Ok(entry) => Self::apply(&mut tenants, entry),
                    Err(e) => warn!(error = %e, path = %path.display(), "skipping corrupt store line"),
                }
            }
        }
        Ok(())
    }

    fn apply(tenants: &mut HashMap<String, TenantState>, entry: LogEntry) {
        match entry {
            LogEntry::Put { tenant, kind, record } => {
                let state = tenants.entry(tenant).or_default();
                let applied = match kind {
                    RecordKind::Experiment => serde_json::from_value::<Experiment>(record)
                        .map(|r| upsert(&mut state.experiments, r, |e| e.id.clone()))
                        .is_ok(),
                    RecordKind::Log => serde_json::from_value::<EvaluationLog>(record)
                        .map(|r| upsert(&mut state.logs, r, |l| l.id.clone()))
                        .is_ok(),
                    RecordKind::Metric => serde_json::from_value::<EvaluationMetric>(record)
                        .map(|r| upsert(&mut state.metrics, r, |m| m.id.clone()))
                        .is_ok(),
                    RecordKind::Scorer => serde_json::from_value::<ScorerDefinition>(record)
                        .map(|r| upsert(&mut state.scorers, r, |s| s.id.clone()))
                        .is_ok(),
                    RecordKind::Arena => serde_json::from_value::<ArenaComparison>(record)
                        .map(|r| upsert(&mut state.arenas, r, |a| a.id.clone()))
                        .is_ok(),
                };
                if !applied {
                    warn!("skipping undecodable {:?} record", kind);
                }
            }
            LogEntry::Delete { tenant, kind, id } => {
                let state = tenants.entry(tenant).or_default();
                match kind {
                    RecordKind::Experiment => {
                        state.experiments.retain(|e| e.id != id);
                        // Cascade: an experiment delete removes its logs.
                        state.logs.retain(|l| l.experiment_id != id);
                    }
                    RecordKind::Log => state.logs.retain(|l| l.id != id),
                    RecordKind::Metric => state.metrics.retain(|m| m.id != id),
                    RecordKind::Scorer => state.scorers.retain(|s| s.id != id),
                    RecordKind::Arena => state.arenas.retain(|a| a.id != id),
                }
            }
        }
    }

    fn compact_all(&self) -> Result<(), StoreError> {
        let tenants = self.tenants.read();
        for (tenant, state) in tenants.iter() {
            let path = self.tenant_file(tenant);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut writer = BufWriter::new(File::create(&path)?);
            let mut write_put = |kind: RecordKind, record: Value| -> Result<(), StoreError> {
                let entry = LogEntry::Put {
                    tenant: tenant.clone(),
                    kind,
                    record,
                };
                serde_json::to_writer(&mut writer, &entry)?;
                writer.write_all(b"\n")?;
                Ok(())
            };
            for e in &state.experiments {
                write_put(RecordKind::Experiment, serde_json::to_value(e)?)?;
            }
            for l in &state.logs {
                write_put(RecordKind::Log, serde_json::to_value(l)?)?;
            }
            for m in &state.metrics {
                write_put(RecordKind::Metric, serde_json::to_value(m)?)?;
            }
            for s in &state.scorers {
                write_put(RecordKind::Scorer, serde_json::to_value(s)?)?;
            }
            for a in &state.arenas {
                write_put(RecordKind::Arena, serde_json::to_value(a)?)?;
            }
            writer.flush()?;
            debug!(tenant = tenant.as_str(), "compacted tenant store");
        }
        Ok(())
    }

    fn append(&self, tenant: &str, entry: &LogEntry) -> Result<(), StoreError> {
        let path = self.tenant_file(tenant);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        file.write_all(&line)?;
        Ok(())
    }

    fn append_put<T: Serialize>(
        &self,
        tenant: &str,
        kind: RecordKind,
        record: &T,
    ) -> Result<(), StoreError> {
        self.append(
            tenant,
            &LogEntry::Put {
                tenant: tenant.to_string(),
                kind,
                record: serde_json::to_value(record)?,
            },
        )
    }

    fn append_delete(&self, tenant: &str, kind: RecordKind, id: &str) -> Result<(), StoreError> {
        self.append(
            tenant,
            &LogEntry::Delete {
                tenant: tenant.to_string(),
                kind,
                id: id.to_string(),
            },
        )
    }

    // ------------------------------------------------------------------
    // Experiments
    // ------------------------------------------------------------------

    pub fn create_experiment(&self, experiment: &Experiment) -> Result<Experiment, StoreError> {
        check_tenant(&experiment.tenant)?;
        let clean: Experiment = scrubbed(experiment)?;
        self.append_put(&clean.tenant, RecordKind::Experiment, &clean)?;
        let mut tenants = self.tenants.write();
        let state = tenants.entry(clean.tenant.clone()).or_default();
        upsert(&mut state.experiments, clean.clone(), |e| e.id.clone());
        Ok(clean)
    }

    /// Status transition. Sets `started_at` only when entering `running`
    /// and `completed_at` when entering a terminal status; rejects any
    /// write once the record is terminal.
    pub fn update_experiment_status(
        &self,
        tenant: &str,
        experiment_id: &str,
        status: ExperimentStatus,
        error_message: Option<String>,
    ) -> Result<(), StoreError> {
        check_tenant(tenant)?;
        let updated = {
            let mut tenants = self.tenants.write();
            let state = tenants
                .get_mut(tenant)
                .ok_or_else(|| StoreError::NotFound(experiment_id.to_string()))?;
            let exp = state
                .experiments
                .iter_mut()
                .find(|e| e.id == experiment_id)
                .ok_or_else(|| StoreError::NotFound(experiment_id.to_string()))?;

            if exp.status.is_terminal() {
                return Err(StoreError::TerminalStatus(experiment_id.to_string()));
            }

            exp.status = status;
            if status == ExperimentStatus::Running && exp.started_at.is_none() {
                exp.started_at = Some(Utc::now());
            }
            if status.is_terminal() {
                exp.completed_at = Some(Utc::now());
            }
            if status == ExperimentStatus::Failed {
                exp.error_message = error_message;
            }
            exp.clone()
        };
        self.append_put(tenant, RecordKind::Experiment, &updated)
    }

    /// Finalize a successful run: results and terminal `completed` are
    /// written together so results never appear on a non-completed record.
    pub fn complete_experiment(
        &self,
        tenant: &str,
        experiment_id: &str,
        results: ExperimentResults,
    ) -> Result<(), StoreError> {
        check_tenant(tenant)?;
        let updated = {
            let mut tenants = self.tenants.write();
            let state = tenants
                .get_mut(tenant)
                .ok_or_else(|| StoreError::NotFound(experiment_id.to_string()))?;
            let exp = state
                .experiments
                .iter_mut()
                .find(|e| e.id == experiment_id)
                .ok_or_else(|| StoreError::NotFound(experiment_id.to_string()))?;

            if exp.status.is_terminal() {
                return Err(StoreError::TerminalStatus(experiment_id.to_string()));
            }
            exp.status = ExperimentStatus::Completed;
            exp.results = Some(results);
            exp.completed_at = Some(Utc::now());
            exp.clone()
        };
        self.append_put(tenant, RecordKind::Experiment, &updated)
    }

    pub fn fail_experiment(
        &self,
        tenant: &str,
        experiment_id: &str,
        error_message: impl Into<String>,
    ) -> Result<(), StoreError> {
        self.update_experiment_status(
            tenant,
            experiment_id,
            ExperimentStatus::Failed,
            Some(error_message.into()),
        )
    }

    /// Delete cascades to the experiment's logs; metrics remain readable
    /// but orphaned.
    pub fn delete_experiment(&self, tenant: &str, experiment_id: &str) -> Result<(), StoreError> {
        check_tenant(tenant)?;
        {
            let mut tenants = self.tenants.write();
            let state = tenants
                .get_mut(tenant)
                .ok_or_else(|| StoreError::NotFound(experiment_id.to_string()))?;
            let before = state.experiments.len();
            state.experiments.retain(|e| e.id != experiment_id);
            if state.experiments.len() == before {
                return Err(StoreError::NotFound(experiment_id.to_string()));
            }
            state.logs.retain(|l| l.experiment_id != experiment_id);
        }
        self.append_delete(tenant, RecordKind::Experiment, experiment_id)
    }

    pub fn get_experiment_by_id(
        &self,
        tenant: &str,
        experiment_id: &str,
    ) -> Result<Option<Experiment>, StoreError> {
        check_tenant(tenant)?;
        Ok(self.tenants.read().get(tenant).and_then(|state| {
            state
                .experiments
                .iter()
                .find(|e| e.id == experiment_id)
                .cloned()
        }))
    }

    pub fn get_experiments(&self, tenant: &str) -> Result<Vec<Experiment>, StoreError> {
        check_tenant(tenant)?;
        Ok(self
            .tenants
            .read()
            .get(tenant)
            .map(|state| state.experiments.clone())
            .unwrap_or_default())
    }

    pub fn get_experiment_count(&self, tenant: &str) -> Result<usize, StoreError> {
        Ok(self.get_experiments(tenant)?.len())
    }

    // ------------------------------------------------------------------
    // Logs
    // ------------------------------------------------------------------

    pub fn create_log(&self, log: &EvaluationLog) -> Result<EvaluationLog, StoreError> {
        check_tenant(&log.tenant)?;
        let clean: EvaluationLog = scrubbed(log)?;
        self.append_put(&clean.tenant, RecordKind::Log, &clean)?;
        let mut tenants = self.tenants.write();
        let state = tenants.entry(clean.tenant.clone()).or_default();
        upsert(&mut state.logs, clean.clone(), |l| l.id.clone());
        Ok(clean)
    }

    /// Shallow merge on top-level metadata keys; existing keys are
    /// overwritten when present in the patch.
    pub fn update_log_metadata(
        &self,
        tenant: &str,
        log_id: &str,
        patch: Map<String, Value>,
    ) -> Result<(), StoreError> {
        check_tenant(tenant)?;
        let updated = {
            let mut tenants = self.tenants.write();
            let state = tenants
                .get_mut(tenant)
                .ok_or_else(|| StoreError::NotFound(log_id.to_string()))?;
            let log = state
                .logs
                .iter_mut()
                .find(|l| l.id == log_id)
                .ok_or_else(|| StoreError::NotFound(log_id.to_string()))?;
            for (key, value) in patch {
                log.metadata.insert(key, value);
            }
            log.clone()
        };
        let clean: EvaluationLog = scrubbed(&updated)?;
        self.append_put(tenant, RecordKind::Log, &clean)
    }

    /// Logs for an experiment in insert order (dataset order).
    pub fn get_logs(
        &self,
        tenant: &str,
        experiment_id: &str,
    ) -> Result<Vec<EvaluationLog>, StoreError> {
        check_tenant(tenant)?;
        Ok(self
            .tenants
            .read()
            .get(tenant)
            .map(|state| {
                state
                    .logs
                    .iter()
                    .filter(|l| l.experiment_id == experiment_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    pub fn get_log_count(&self, tenant: &str, experiment_id: &str) -> Result<usize, StoreError> {
        Ok(self.get_logs(tenant, experiment_id)?.len())
    }

    // ------------------------------------------------------------------
    // Metrics
    // ------------------------------------------------------------------

    pub fn create_metric(&self, metric: &EvaluationMetric) -> Result<(), StoreError> {
        check_tenant(&metric.tenant)?;
        self.append_put(&metric.tenant, RecordKind::Metric, metric)?;
        let mut tenants = self.tenants.write();
        let state = tenants.entry(metric.tenant.clone()).or_default();
        upsert(&mut state.metrics, metric.clone(), |m| m.id.clone());
        Ok(())
    }

    /// Per-metric-name mean over all rows written for an experiment.
    pub fn get_metric_aggregates(
        &self,
        tenant: &str,
        experiment_id: &str,
    ) -> Result<HashMap<String, MetricAggregate>, StoreError> {
        check_tenant(tenant)?;
        let tenants = self.tenants.read();
        let mut sums: HashMap<String, (usize, f64)> = HashMap::new();
        if let Some(state) = tenants.get(tenant) {
            for metric in state.metrics.iter().filter(|m| m.experiment_id == experiment_id) {
                let entry = sums.entry(metric.metric_name.clone()).or_insert((0, 0.0));
                entry.0 += 1;
                entry.1 += metric.value;
            }
        }
        Ok(sums
            .into_iter()
            .map(|(name, (count, sum))| {
                (
                    name,
                    MetricAggregate {
                        count,
                        avg: sum / count as f64,
                    },
                )
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Scorers
    // ------------------------------------------------------------------

    pub fn list_scorers(&self, tenant: &str) -> Result<Vec<ScorerDefinition>, StoreError> {
        check_tenant(tenant)?;
        Ok(self
            .tenants
            .read()
            .get(tenant)
            .map(|state| state.scorers.clone())
            .unwrap_or_default())
    }

    /// `metric_key` must be unique within `(tenant, project_id)`.
    pub fn create_scorer(&self, scorer: &ScorerDefinition) -> Result<(), StoreError> {
        check_tenant(&scorer.tenant)?;
        {
            let tenants = self.tenants.read();
            if let Some(state) = tenants.get(&scorer.tenant) {
                let clash = state.scorers.iter().any(|s| {
                    s.id != scorer.id
                        && s.metric_key == scorer.metric_key
                        && s.project_id == scorer.project_id
                });
                if clash {
                    return Err(StoreError::Conflict(format!(
                        "metric_key {} already exists",
                        scorer.metric_key
                    )));
                }
            }
        }
        self.append_put(&scorer.tenant, RecordKind::Scorer, scorer)?;
        let mut tenants = self.tenants.write();
        let state = tenants.entry(scorer.tenant.clone()).or_default();
        upsert(&mut state.scorers, scorer.clone(), |s| s.id.clone());
        Ok(())
    }

    pub fn update_scorer(&self, scorer: &ScorerDefinition) -> Result<(), StoreError> {
        check_tenant(&scorer.tenant)?;
        {
            let tenants = self.tenants.read();
            let state = tenants
                .get(&scorer.tenant)
                .ok_or_else(|| StoreError::NotFound(scorer.id.clone()))?;
            if !state.scorers.iter().any(|s| s.id == scorer.id) {
                return Err(StoreError::NotFound(scorer.id.clone()));
            }
        }
        self.create_scorer(scorer)
    }

    pub fn delete_scorer(&self, tenant: &str, scorer_id: &str) -> Result<(), StoreError> {
        check_tenant(tenant)?;
        {
            let mut tenants = self.tenants.write();
            let state = tenants
                .get_mut(tenant)
                .ok_or_else(|| StoreError::NotFound(scorer_id.to_string()))?;
            let before = state.scorers.len();
            state.scorers.retain(|s| s.id != scorer_id);
            if state.scorers.len() == before {
                return Err(StoreError::NotFound(scorer_id.to_string()));
            }
        }
        self.append_delete(tenant, RecordKind::Scorer, scorer_id)
    }

    pub fn get_scorer_by_id(
        &self,
        tenant: &str,
        scorer_id: &str,
    ) -> Result<Option<ScorerDefinition>, StoreError> {
        check_tenant(tenant)?;
        Ok(self
            .tenants
            .read()
            .get(tenant)
            .and_then(|state| state.scorers.iter().find(|s| s.id == scorer_id).cloned()))
    }

    // ------------------------------------------------------------------
    // Arena comparisons
    // ------------------------------------------------------------------

    pub fn create_arena_comparison(
        &self,
        arena: &ArenaComparison,
    ) -> Result<ArenaComparison, StoreError> {
        check_tenant(&arena.tenant)?;
        let clean: ArenaComparison = scrubbed(arena)?;
        self.append_put(&clean.tenant, RecordKind::Arena, &clean)?;
        let mut tenants = self.tenants.write();
        let state = tenants.entry(clean.tenant.clone()).or_default();
        upsert(&mut state.arenas, clean.clone(), |a| a.id.clone());
        Ok(clean)
    }

    /// Full-record update. Rejects writes that move a terminal comparison
    /// back to a non-terminal status.
    pub fn update_arena_comparison(&self, arena: &ArenaComparison) -> Result<(), StoreError> {
        check_tenant(&arena.tenant)?;
        {
            let tenants = self.tenants.read();
            let state = tenants
                .get(&arena.tenant)
                .ok_or_else(|| StoreError::NotFound(arena.id.clone()))?;
            let existing = state
                .arenas
                .iter()
                .find(|a| a.id == arena.id)
                .ok_or_else(|| StoreError::NotFound(arena.id.clone()))?;
            if existing.status.is_terminal() && !arena.status.is_terminal() {
                return Err(StoreError::TerminalStatus(arena.id.clone()));
            }
        }
        let clean: ArenaComparison = scrubbed(arena)?;
        self.append_put(&clean.tenant, RecordKind::Arena, &clean)?;
        let mut tenants = self.tenants.write();
        let state = tenants.entry(clean.tenant.clone()).or_default();
        upsert(&mut state.arenas, clean, |a| a.id.clone());
        Ok(())
    }

    pub fn get_arena_comparison(
        &self,
        tenant: &str,
        arena_id: &str,
    ) -> Result<Option<ArenaComparison>, StoreError> {
        check_tenant(tenant)?;
        Ok(self
            .tenants
            .read()
            .get(tenant)
            .and_then(|state| state.arenas.iter().find(|a| a.id == arena_id).cloned()))
    }

    pub fn list_arena_comparisons(&self, tenant: &str) -> Result<Vec<ArenaComparison>, StoreError> {
        check_tenant(tenant)?;
        Ok(self
            .tenants
            .read()
            .get(tenant)
            .map(|state| state.arenas.clone())
            .unwrap_or_default())
    }

    pub fn delete_arena_comparison(&self, tenant: &str, arena_id: &str) -> Result<(), StoreError> {
        check_tenant(tenant)?;
        {
            let mut tenants = self.tenants.write();
            let state = tenants
                .get_mut(tenant)
                .ok_or_else(|| StoreError::NotFound(arena_id.to_string()))?;
            let before = state.arenas.len();
            state.arenas.retain(|a| a.id != arena_id);
            if state.arenas.len() == before {
                return Err(StoreError::NotFound(arena_id.to_string()));
            }
        }
        self.append_delete(tenant, RecordKind::Arena, arena_id)
    }
}

fn upsert<T, K: Fn(&T) -> String>(items: &mut Vec<T>, item: T, key: K) {
    let id = key(&item);
    if let Some(existing) = items.iter_mut().find(|i| key(i) == id) {
        *existing = item;
    } else {
        items.push(item);
    }
}
