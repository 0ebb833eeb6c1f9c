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

//! Custom LLM-as-judge scorer runner.
//!
//! A stored scorer definition renders its message templates against
//! `{input, output, expected}`, sends the result to its judge model,
//! extracts a label from the first token of the reply, and maps the label
//! to a score through `choiceScores`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::warn;
use verdict_core::{ScorerDefinition, ScorerType};
use verdict_providers::{GenerationOptions, TextGenerator};

const DEFAULT_SCORER_MAX_TOKENS: u32 = 256;
const ERROR_LABEL: &str = "ERROR";

/// Result of one scorer against one test case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerOutcome {
    pub scorer_id: String,
    pub scorer_name: String,
    pub label: String,
    pub score: f64,
    pub passed: bool,
    pub raw_response: String,
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*(\w+)\s*\}\}").expect("static regex"))
}

/// Substitute `{{input}}`, `{{output}}`, `{{expected}}` in a template.
/// Unknown placeholders warn and render as empty; templates are trimmed.
pub fn render_template(template: &str, input: &str, output: &str, expected: &str) -> String {
    placeholder_re()
        .replace_all(template.trim(), |caps: &regex::Captures<'_>| {
            match &caps[1] {
                "input" => input.to_string(),
                "output" => output.to_string(),
                "expected" => expected.to_string(),
                other => {
                    warn!(placeholder = other, "unknown template placeholder");
                    String::new()
                }
            }
        })
        .into_owned()
}

/// Flatten the rendered message list into one judge prompt, in order.
fn render_messages(
    scorer: &ScorerDefinition,
    input: &str,
    output: &str,
    expected: &str,
) -> String {
    scorer
        .config
        .messages
        .iter()
        .map(|m| render_template(&m.template, input, output, expected))
        .filter(|m| !m.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Label extraction: first non-empty line, first whitespace-separated
/// token, uppercased, letters only.
pub fn extract_label(raw: &str) -> String {
    raw.lines()
        .find(|line| !line.trim().is_empty())
        .and_then(|line| line.split_whitespace().next())
        .map(|token| {
            token
                .to_uppercase()
                .chars()
                .filter(|c| c.is_ascii_uppercase())
                .collect()
        })
        .unwrap_or_default()
}

/// Evaluate one scorer against one `{input, output, expected}` triple.
/// Judge failures produce a single `ERROR`-labeled record rather than an
/// error; unknown labels map to 0.0.
pub async fn run_scorer(
    scorer: &ScorerDefinition,
    judge: &dyn TextGenerator,
    input: &str,
    output: &str,
    expected: &str,
) -> ScorerOutcome {
    let prompt = render_messages(scorer, input, output, expected);
    let params = &scorer.config.judge_model.params;
    let options = GenerationOptions::new(
        params.max_tokens.unwrap_or(DEFAULT_SCORER_MAX_TOKENS),
        params.temperature.unwrap_or(0.0),
    );

    match judge.generate(&prompt, &options).await {
        Ok(raw) => {
            let label = extract_label(&raw);
            let score = scorer
                .config
                .choice_scores
                .get(&label)
                .copied()
                .unwrap_or(0.0);
            ScorerOutcome {
                scorer_id: scorer.id.clone(),
                scorer_name: scorer.name.clone(),
                passed: score >= scorer.pass_threshold(),
                label,
                score,
                raw_response: raw,
            }
        }
        Err(e) => ScorerOutcome {
            scorer_id: scorer.id.clone(),
            scorer_name: scorer.name.clone(),
            label: ERROR_LABEL.to_string(),
            score: 0.0,
            passed: false,
            raw_response: e.to_string(),
        },
    }
}

/// Filter the scorers that run for an experiment: enabled LLM scorers,
/// intersected with `selectedScorers` when present. Requested ids that do
/// not resolve are logged and skipped.
pub fn select_scorers(
    all: Vec<ScorerDefinition>,
    selected: Option<&[String]>,
) -> Vec<ScorerDefinition> {
    let enabled: Vec<ScorerDefinition> = all
        .into_iter()
        .filter(|s| s.enabled && s.scorer_type == ScorerType::Llm)
        .collect();

    match selected {
        Some(ids) => {
            let chosen: Vec<ScorerDefinition> = enabled
                .into_iter()
                .filter(|s| ids.contains(&s.id))
                .collect();
            let found: Vec<&str> = chosen.iter().map(|s| s.id.as_str()).collect();
            for id in ids {
                if !found.contains(&id.as_str()) {
                    warn!(scorer_id = id.as_str(), "requested scorer not found or disabled");
                }
            }
            chosen
        }
        None => enabled,
    }
}
