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

//! # Verdict Core
//!
//! Shared domain records and request payloads for the Verdict evaluation
//! engine: experiments, per-sample logs, aggregated metrics, custom scorer
//! definitions, arena comparisons, and the ephemeral job-status mirror.
//!
//! Every durable record carries a `tenant`; the storage layer filters all
//! reads and writes by it.

pub mod arena;
pub mod config;
pub mod experiment;
pub mod job;
pub mod log;
pub mod metric;
pub mod names;
pub mod scorer;
pub mod scrub;

pub use arena::{
    ArenaComparison, ArenaConfig, ArenaContestantResult, ArenaMetricConfig, ArenaPromptResult,
    Contestant, Hyperparameters,
};
pub use config::{
    ConversationSample, DatasetConfig, EvaluationMode, ExperimentConfig, JudgeLlmConfig,
    ModelConfig, PromptSample, Role, SimulatedScenario, TaskType, Turn,
};
pub use experiment::{Experiment, ExperimentResults, ExperimentStatus, GatekeeperReport};
pub use job::JobStatus;
pub use log::{EvaluationLog, LogStatus};
pub use metric::{EvaluationMetric, MetricType};
pub use names::{conversational_metric_names, display_to_camel, metric_names, MetricName};
pub use scorer::{
    ChoiceScores, JudgeModelConfig, JudgeModelParams, MessageTemplate, ScorerConfig,
    ScorerDefinition, ScorerType,
};
pub use scrub::scrub_secrets;

/// Generate a fresh opaque record id.
pub fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
}
