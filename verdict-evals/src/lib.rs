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

//! # Verdict Evals
//!
//! The evaluation middle layer: dataset resolution, test-case
//! construction (single-turn, multi-turn replay, simulated
//! conversations), the judge-based metric dispatcher, and the custom
//! LLM-as-judge scorer runner.
//!
//! Everything here is provider-agnostic: model access goes through
//! [`verdict_providers::TextGenerator`] and judge access through the
//! [`judge::LlmJudge`] seam, so tests run against scripted fakes.

use thiserror::Error;

pub mod builder;
pub mod dataset;
pub mod judge;
pub mod metrics;
pub mod scorer;
pub mod test_case;

pub use builder::{BuildContext, SampleOutcome};
pub use dataset::Dataset;
pub use judge::{GEvalJudge, JudgeSettings, JudgeVerdict, LlmJudge};
pub use metrics::{aggregate_scores, MetricDispatcher, MetricScore, MetricSelection};
pub use scorer::{run_scorer, select_scorers, ScorerOutcome};
pub use test_case::TestCase;

/// Errors from the evaluation layer.
#[derive(Debug, Error)]
pub enum EvalError {
    /// Missing file, malformed JSON, empty or shapeless dataset.
    #[error("{0}")]
    Dataset(String),

    #[error("provider error: {0}")]
    Provider(#[from] verdict_providers::ProviderError),

    #[error("judge error: {0}")]
    Judge(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
