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

//! LLM-as-judge.
//!
//! The [`LlmJudge`] trait is the seam a native judge-metric library would
//! plug into; [`GEvalJudge`] is the always-available provider-agnostic
//! implementation: a rubric-bearing prompt, a strict-JSON response, a
//! regex fallback for sloppy judges, and a `[0, 1]` clamp.

use crate::test_case::TestCase;
use crate::EvalError;
use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use std::sync::OnceLock;
use verdict_core::JudgeLlmConfig;
use verdict_providers::{GenerationOptions, TextGenerator};

const DEFAULT_JUDGE_PROVIDER: &str = "openai";
const DEFAULT_JUDGE_MODEL: &str = "gpt-4o-mini";
const DEFAULT_JUDGE_MAX_TOKENS: u32 = 2048;
const UNPARSEABLE_REASON: &str = "Unable to parse judge response";

/// Score and reasoning from one judge call. `score` is `None` when the
/// judge response could not be parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeVerdict {
    pub score: Option<f64>,
    pub reason: Option<String>,
}

/// Contract required of any judge implementation.
#[async_trait]
pub trait LlmJudge: Send + Sync {
    async fn measure(&self, rubric: &str, case: &TestCase) -> Result<JudgeVerdict, EvalError>;
}

/// Judge-model selection, resolved from the experiment config with
/// `G_EVAL_*` environment variables as fallback.
#[derive(Debug, Clone)]
pub struct JudgeSettings {
    pub provider: String,
    pub model: String,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl JudgeSettings {
    pub fn resolve(config: Option<&JudgeLlmConfig>) -> Self {
        let provider = config
            .map(|c| c.provider.clone())
            .filter(|p| !p.trim().is_empty())
            .or_else(|| std::env::var("G_EVAL_PROVIDER").ok())
            .unwrap_or_else(|| DEFAULT_JUDGE_PROVIDER.to_string())
            .to_lowercase();
        let model = config
            .map(|c| c.model.clone())
            .filter(|m| !m.trim().is_empty())
            .or_else(|| std::env::var("G_EVAL_MODEL").ok())
            .unwrap_or_else(|| DEFAULT_JUDGE_MODEL.to_string());
        let max_tokens = config
            .and_then(|c| c.max_tokens)
            .or_else(|| {
                std::env::var("G_EVAL_MAX_TOKENS")
                    .ok()
                    .and_then(|v| v.parse().ok())
            })
            .unwrap_or(DEFAULT_JUDGE_MAX_TOKENS);
        let temperature = std::env::var("G_EVAL_TEMPERATURE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0);

        Self {
            provider,
            model,
            api_key: config.and_then(|c| c.api_key.clone()),
            max_tokens,
            temperature,
        }
    }
}

fn score_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"0?\.\d+|1(?:\.0+)?").expect("static regex"))
}

/// Parse a judge response: strict JSON first, then the first number in
/// `[0, 1]` anywhere in the text. Scores are clamped to `[0, 1]`.
pub fn parse_judge_response(raw: &str) -> JudgeVerdict {
    if let Ok(data) = serde_json::from_str::<serde_json::Value>(raw.trim()) {
        if let Some(score) = data["score"].as_f64() {
            let reason = data["reason"].as_str().map(str::to_string);
            return JudgeVerdict {
                score: Some(score.clamp(0.0, 1.0)),
                reason,
            };
        }
    }

    if let Some(m) = score_re().find(raw) {
        if let Ok(score) = m.as_str().parse::<f64>() {
            if (0.0..=1.0).contains(&score) {
                return JudgeVerdict {
                    score: Some(score),
                    reason: Some(raw.chars().take(300).collect()),
                };
            }
        }
    }

    JudgeVerdict {
        score: None,
        reason: Some(UNPARSEABLE_REASON.to_string()),
    }
}

/// Build the judge prompt for a test case.
pub fn build_judge_prompt(rubric: &str, case: &TestCase) -> String {
    match case {
        TestCase::SingleTurn {
            input,
            actual_output,
            expected_output,
            retrieval_context,
        } => {
            let expected_clause = match expected_output.as_deref().filter(|e| !e.is_empty()) {
                Some(expected) => format!("\nExpected (reference):\n{expected}\n"),
                None => "\n(Reference expected output not provided)\n".to_string(),
            };
            let context_clause = retrieval_context
                .as_ref()
                .filter(|c| !c.is_empty())
                .map(|c| format!("\nRetrieved Context:\n{}\n", c.join("\n---\n")))
                .unwrap_or_default();
            format!(
                "You are an impartial judge. {rubric}\n\n\
                 Input:\n{input}\n\n\
                 Model Answer:\n{actual_output}\n\
                 {expected_clause}{context_clause}\n\
                 Respond with ONLY a raw JSON object (no markdown, no code fences, no extra text).\n\
                 Format: {{\"score\": <0.0-1.0>, \"reason\": \"<your explanation>\"}}\n\
                 Example: {{\"score\": 0.85, \"reason\": \"The answer is accurate and well-structured.\"}}"
            )
        }
        TestCase::Conversational { .. } => {
            let transcript = case.transcript();
            let outcome_clause = match case.expected_text().filter(|e| !e.is_empty()) {
                Some(outcome) => format!("\nExpected outcome:\n{outcome}\n"),
                None => String::new(),
            };
            format!(
                "You are an impartial judge. {rubric}\n\n\
                 Conversation:\n{transcript}\n\
                 {outcome_clause}\n\
                 Respond with ONLY a raw JSON object (no markdown, no code fences, no extra text).\n\
                 Format: {{\"score\": <0.0-1.0>, \"reason\": \"<your explanation>\"}}"
            )
        }
    }
}

/// Provider-agnostic judge over any [`TextGenerator`].
pub struct GEvalJudge {
    client: Arc<dyn TextGenerator>,
    max_tokens: u32,
    temperature: f64,
}

impl GEvalJudge {
    pub fn new(client: Arc<dyn TextGenerator>) -> Self {
        Self {
            client,
            max_tokens: DEFAULT_JUDGE_MAX_TOKENS,
            temperature: 0.0,
        }
    }

    pub fn with_settings(client: Arc<dyn TextGenerator>, settings: &JudgeSettings) -> Self {
        Self {
            client,
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        }
    }
}

#[async_trait]
impl LlmJudge for GEvalJudge {
    async fn measure(&self, rubric: &str, case: &TestCase) -> Result<JudgeVerdict, EvalError> {
        let prompt = build_judge_prompt(rubric, case);
        let options = GenerationOptions::new(self.max_tokens, self.temperature);
        let raw = self
            .client
            .generate(&prompt, &options)
            .await
            .map_err(|e| EvalError::Judge(e.to_string()))?;
        Ok(parse_judge_response(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use verdict_providers::ProviderError;

    struct FixedJudgeModel(&'static str);

    #[async_trait]
    impl TextGenerator for FixedJudgeModel {
        async fn generate(
            &self,
            _prompt: &str,
            _options: &GenerationOptions,
        ) -> Result<String, ProviderError> {
            Ok(self.0.to_string())
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    fn single_turn() -> TestCase {
        TestCase::SingleTurn {
            input: "What is 2+2?".into(),
            actual_output: "4".into(),
            expected_output: Some("4".into()),
            retrieval_context: None,
        }
    }

    #[test]
    fn test_parse_strict_json() {
        let verdict = parse_judge_response(r#"{"score": 0.85, "reason": "solid"}"#);
        assert_eq!(verdict.score, Some(0.85));
        assert_eq!(verdict.reason.as_deref(), Some("solid"));
    }

    #[test]
    fn test_parse_clamps_out_of_range_json_scores() {
        let verdict = parse_judge_response(r#"{"score": 1.7, "reason": "overeager"}"#);
        assert_eq!(verdict.score, Some(1.0));

        let verdict = parse_judge_response(r#"{"score": -0.3}"#);
        assert_eq!(verdict.score, Some(0.0));
    }

    #[test]
    fn test_parse_falls_back_to_first_number() {
        let verdict = parse_judge_response("I'd rate this 0.75 overall, good work.");
        assert_eq!(verdict.score, Some(0.75));
        assert!(verdict.reason.is_some());
    }

    #[test]
    fn test_parse_unparseable_returns_null_score() {
        let verdict = parse_judge_response("no numbers here at all");
        assert_eq!(verdict.score, None);
        assert_eq!(verdict.reason.as_deref(), Some(UNPARSEABLE_REASON));
    }

    #[test]
    fn test_prompt_contains_rubric_and_fields() {
        let prompt = build_judge_prompt("Judge correctness.", &single_turn());
        assert!(prompt.starts_with("You are an impartial judge. Judge correctness."));
        assert!(prompt.contains("Input:\nWhat is 2+2?"));
        assert!(prompt.contains("Model Answer:\n4"));
        assert!(prompt.contains("Expected (reference):\n4"));
        assert!(prompt.contains("ONLY a raw JSON object"));
    }

    #[test]
    fn test_conversational_prompt_renders_transcript() {
        let case = TestCase::Conversational {
            turns: vec![
                verdict_core::Turn {
                    role: verdict_core::Role::User,
                    content: "Hi".into(),
                },
                verdict_core::Turn {
                    role: verdict_core::Role::Assistant,
                    content: "Hello".into(),
                },
            ],
            scenario: None,
            expected_outcome: Some("greeting handled".into()),
        };
        let prompt = build_judge_prompt("Judge coherence.", &case);
        assert!(prompt.contains("Conversation:\nUser: Hi\nAssistant: Hello"));
        assert!(prompt.contains("Expected outcome:\ngreeting handled"));
    }

    #[tokio::test]
    async fn test_geval_judge_end_to_end() {
        let judge = GEvalJudge::new(Arc::new(FixedJudgeModel(
            r#"{"score": 0.9, "reason": "accurate"}"#,
        )));
        let verdict = judge.measure("Judge correctness.", &single_turn()).await.unwrap();
        assert_eq!(verdict.score, Some(0.9));
    }

    #[test]
    fn test_judge_settings_defaults() {
        // Only exercise pure defaults when the env is clean.
        if std::env::var("G_EVAL_PROVIDER").is_err() && std::env::var("G_EVAL_MODEL").is_err() {
            let settings = JudgeSettings::resolve(None);
            assert_eq!(settings.provider, DEFAULT_JUDGE_PROVIDER);
            assert_eq!(settings.model, DEFAULT_JUDGE_MODEL);
        }
    }

    #[test]
    fn test_judge_settings_prefer_config() {
        let config: JudgeLlmConfig = serde_json::from_value(serde_json::json!({
            "provider": "Anthropic",
            "model": "claude-3-5-haiku-20241022",
            "maxTokens": 512
        }))
        .unwrap();
        let settings = JudgeSettings::resolve(Some(&config));
        assert_eq!(settings.provider, "anthropic");
        assert_eq!(settings.model, "claude-3-5-haiku-20241022");
        assert_eq!(settings.max_tokens, 512);
    }
}
