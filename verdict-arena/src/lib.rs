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

//! # Verdict Arena
//!
//! Multi-contestant comparisons: fan each prompt out to every contestant,
//! hand all responses to a judge model with a structured scoring prompt,
//! and aggregate per-prompt winners into win counts and an overall
//! winner (or a `"Tie: A, B"` result).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use verdict_core::{
    ArenaComparison, ArenaPromptResult, ExperimentStatus, JobStatus,
};
use verdict_providers::{
    default_model_factory, CredentialBag, GenerationOptions, ModelFactory, ProviderError,
    TextGenerator,
};
use verdict_storage::{EvalStore, JobStatusStore, StoreError};

mod judging;

pub use judging::{
    build_scoring_prompt, extract_json_object, infer_judge_provider, overall_winner,
    validate_winner,
};

/// Prompts are capped per comparison to bound judge spend.
pub const MAX_PROMPTS_PER_COMPARISON: usize = 10;

const CONTESTANT_MAX_TOKENS: u32 = 1024;

#[derive(Debug, Error)]
pub enum ArenaError {
    #[error("{0}")]
    Dataset(String),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("comparison not found: {0}")]
    NotFound(String),
}

/// Runs arena comparisons end to end against the durable store.
pub struct ArenaEngine {
    store: Arc<EvalStore>,
    jobs: Arc<JobStatusStore>,
    data_root: PathBuf,
    factory: ModelFactory,
}

impl ArenaEngine {
    pub fn new(store: Arc<EvalStore>, jobs: Arc<JobStatusStore>, data_root: PathBuf) -> Self {
        Self {
            store,
            jobs,
            data_root,
            factory: default_model_factory(),
        }
    }

    /// Swap the model factory (tests, gateways).
    pub fn with_factory(mut self, factory: ModelFactory) -> Self {
        self.factory = factory;
        self
    }

    /// Run one comparison to a terminal status. Errors finalize the
    /// record as `failed`; nothing propagates to the caller.
    pub async fn run(&self, tenant: &str, arena_id: &str, api_keys: &HashMap<String, String>) {
        if let Err(e) = self.run_inner(tenant, arena_id, api_keys).await {
            error!(arena_id, error = %e, "arena comparison failed");
            let _ = self.finalize_failed(tenant, arena_id, &e.to_string());
        }
        self.jobs.delete_job_status(arena_id);
    }

    async fn run_inner(
        &self,
        tenant: &str,
        arena_id: &str,
        api_keys: &HashMap<String, String>,
    ) -> Result<(), ArenaError> {
        let mut arena = self
            .store
            .get_arena_comparison(tenant, arena_id)?
            .ok_or_else(|| ArenaError::NotFound(arena_id.to_string()))?;

        arena.status = ExperimentStatus::Running;
        self.store.update_arena_comparison(&arena)?;
        self.jobs
            .set_job_status(arena_id, JobStatus::new(ExperimentStatus::Running));

        let mut creds = CredentialBag::new();
        for (tag, key) in api_keys {
            creds.insert_tag(tag, key.clone());
        }

        let dataset_path = arena
            .metric_config
            .dataset_path
            .clone()
            .ok_or_else(|| ArenaError::Dataset("No dataset path configured".to_string()))?;
        let mut prompts = verdict_evals::dataset::load_arena_prompts(&dataset_path, &self.data_root)
            .map_err(|e| ArenaError::Dataset(e.to_string()))?;
        if prompts.len() > MAX_PROMPTS_PER_COMPARISON {
            info!(
                total = prompts.len(),
                cap = MAX_PROMPTS_PER_COMPARISON,
                "capping arena prompts"
            );
            prompts.truncate(MAX_PROMPTS_PER_COMPARISON);
        }

        let criteria = arena.metric_config.criterion_names();
        let criteria = if criteria.is_empty() {
            vec!["Overall".to_string()]
        } else {
            criteria
        };

        let judge_provider = infer_judge_provider(&arena.judge_model);
        let mut win_counts: HashMap<String, u32> =
            arena.contestant_names.iter().map(|n| (n.clone(), 0)).collect();
        let mut detailed_results: Vec<ArenaPromptResult> = Vec::with_capacity(prompts.len());
        let total = prompts.len();

        for (idx, prompt) in prompts.iter().enumerate() {
            let progress = format!("Processing prompt {}/{}", idx + 1, total);
            arena.progress = Some(progress.clone());
            self.store.update_arena_comparison(&arena)?;
            self.jobs.set_job_status(
                arena_id,
                JobStatus::new(ExperimentStatus::Running).with_progress(progress),
            );

            let responses = self.collect_responses(&arena, prompt, &creds).await;
            let result = self
                .judge_prompt(&arena, judge_provider, idx, prompt, responses, &criteria, &creds)
                .await;

            if let Some(winner) = &result.winner {
                *win_counts.entry(winner.clone()).or_insert(0) += 1;
            }
            detailed_results.push(result);
        }

        arena.status = ExperimentStatus::Completed;
        arena.progress = Some(format!("Completed {total}/{total} prompts"));
        arena.winner = overall_winner(&arena.contestant_names, &win_counts);
        arena.win_counts = Some(win_counts);
        arena.detailed_results = Some(detailed_results);
        arena.completed_at = Some(chrono::Utc::now());
        self.store.update_arena_comparison(&arena)?;

        info!(arena_id, winner = ?arena.winner, "arena comparison completed");
        Ok(())
    }

    async fn collect_responses(
        &self,
        arena: &ArenaComparison,
        prompt: &str,
        creds: &CredentialBag,
    ) -> Vec<(String, String)> {
        let mut responses = Vec::with_capacity(arena.contestants.len());
        for contestant in &arena.contestants {
            let provider = contestant.hyperparameters.provider.as_str();
            let model = contestant.hyperparameters.model.as_str();
            let output = if model.is_empty() {
                "Error: No model specified".to_string()
            } else {
                match (self.factory)(provider, model, creds) {
                    Ok(client) => match client
                        .generate(prompt, &GenerationOptions::new(CONTESTANT_MAX_TOKENS, 0.7))
                        .await
                    {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(contestant = %contestant.name, error = %e, "contestant failed");
                            format!("Error: {e}")
                        }
                    },
                    Err(e) => format!("Error: {e}"),
                }
            };
            responses.push((contestant.name.clone(), output));
        }
        responses
    }

    #[allow(clippy::too_many_arguments)]
    async fn judge_prompt(
        &self,
        arena: &ArenaComparison,
        judge_provider: &str,
        idx: usize,
        prompt: &str,
        responses: Vec<(String, String)>,
        criteria: &[String],
        creds: &CredentialBag,
    ) -> ArenaPromptResult {
        let scoring_prompt = build_scoring_prompt(prompt, &responses, criteria);

        let judge_response = match (self.factory)(judge_provider, &arena.judge_model, creds) {
            Ok(client) => {
                client
                    .generate(
                        &scoring_prompt,
                        &GenerationOptions::new(CONTESTANT_MAX_TOKENS, 0.7),
                    )
                    .await
            }
            Err(e) => Err(e),
        };

        let raw = match judge_response {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "arena judge call failed");
                return judging::prompt_result(idx, prompt, None, Some(format!("Error: {e}")), responses, criteria, &HashMap::new());
            }
        };

        let (scores, winner, reasoning) =
            judging::parse_judge_response(&raw, &arena.contestant_names);
        let winner = validate_winner(winner.as_deref(), &arena.contestant_names);
        let reason = reasoning.or_else(|| winner.as_ref().map(|w| format!("Judge selected: {w}")));

        judging::prompt_result(idx, prompt, winner, reason, responses, criteria, &scores)
    }

    fn finalize_failed(&self, tenant: &str, arena_id: &str, message: &str) -> Result<(), StoreError> {
        if let Some(mut arena) = self.store.get_arena_comparison(tenant, arena_id)? {
            if !arena.status.is_terminal() {
                arena.status = ExperimentStatus::Failed;
                arena.error_message = Some(message.to_string());
                arena.completed_at = Some(chrono::Utc::now());
                self.store.update_arena_comparison(&arena)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use verdict_core::ArenaConfig;

    /// Factory whose judge always answers with a fixed JSON script per
    /// call, and whose contestants echo their model name.
    struct ScriptedJudge {
        answers: Mutex<Vec<String>>,
    }

    struct EchoModel(String);

    #[async_trait]
    impl TextGenerator for EchoModel {
        async fn generate(
            &self,
            _prompt: &str,
            _options: &GenerationOptions,
        ) -> Result<String, ProviderError> {
            Ok(format!("answer from {}", self.0))
        }

        fn model_name(&self) -> &str {
            &self.0
        }
    }

    struct PoppingModel {
        answers: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl TextGenerator for PoppingModel {
        async fn generate(
            &self,
            _prompt: &str,
            _options: &GenerationOptions,
        ) -> Result<String, ProviderError> {
            Ok(self.answers.lock().unwrap().pop().unwrap_or_default())
        }

        fn model_name(&self) -> &str {
            "scripted-judge"
        }
    }

    fn scripted_factory(judge_answers: Vec<&str>) -> ModelFactory {
        let judge = Arc::new(ScriptedJudge {
            answers: Mutex::new(judge_answers.into_iter().rev().map(str::to_string).collect()),
        });
        Arc::new(move |_provider, model, _creds| {
            if model.starts_with("judge") {
                let answers: Vec<String> = {
                    let mut guard = judge.answers.lock().unwrap();
                    vec![guard.pop().unwrap_or_default()]
                };
                Ok(Arc::new(PoppingModel {
                    answers: Arc::new(Mutex::new(answers)),
                }) as Arc<dyn TextGenerator>)
            } else {
                Ok(Arc::new(EchoModel(model.to_string())) as Arc<dyn TextGenerator>)
            }
        })
    }

    fn arena_config(names: &[&str], dataset: &str) -> ArenaConfig {
        let contestants: Vec<serde_json::Value> = names
            .iter()
            .map(|n| {
                serde_json::json!({
                    "name": n,
                    "hyperparameters": { "provider": "openai", "model": format!("model-{n}") }
                })
            })
            .collect();
        serde_json::from_value(serde_json::json!({
            "name": "head-to-head",
            "contestants": contestants,
            "metric": {
                "name": "accuracy, clarity",
                "criteria": "Judge accuracy and clarity.",
                "datasetPath": dataset
            },
            "judgeModel": "judge-model"
        }))
        .unwrap()
    }

    async fn run_arena(
        names: &[&str],
        judge_answers: Vec<&str>,
        prompt_count: usize,
    ) -> ArenaComparison {
        let dir = tempfile::tempdir().unwrap();
        let prompts: Vec<serde_json::Value> = (0..prompt_count)
            .map(|i| serde_json::json!({ "prompt": format!("question {i}") }))
            .collect();
        std::fs::write(
            dir.path().join("arena.json"),
            serde_json::to_string(&prompts).unwrap(),
        )
        .unwrap();

        let store = Arc::new(EvalStore::open(dir.path().join("store")).unwrap());
        let jobs = Arc::new(JobStatusStore::new());
        let arena = ArenaComparison::new("t1", arena_config(names, "arena.json"));
        let arena = store.create_arena_comparison(&arena).unwrap();

        let engine = ArenaEngine::new(store.clone(), jobs, dir.path().to_path_buf())
            .with_factory(scripted_factory(judge_answers));
        engine.run("t1", &arena.id, &HashMap::new()).await;

        store.get_arena_comparison("t1", &arena.id).unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_three_way_clear_winner() {
        let judge = r#"{"scores":{"A":{"accuracy":5,"clarity":6},"B":{"accuracy":9,"clarity":8},"C":{"accuracy":4,"clarity":5}},"winner":"B","reasoning":"B was best"}"#;
        let arena = run_arena(&["A", "B", "C"], vec![judge, judge], 2).await;

        assert_eq!(arena.status, ExperimentStatus::Completed);
        let win_counts = arena.win_counts.unwrap();
        assert_eq!(win_counts["A"], 0);
        assert_eq!(win_counts["B"], 2);
        assert_eq!(win_counts["C"], 0);
        assert_eq!(arena.winner.as_deref(), Some("B"));

        let details = arena.detailed_results.unwrap();
        assert_eq!(details.len(), 2);
        assert_eq!(details[0].winner.as_deref(), Some("B"));
        assert_eq!(details[0].contestants.len(), 3);
        assert_eq!(
            details[0].contestants[1].scores.as_ref().unwrap()["accuracy"],
            9.0
        );
    }

    #[tokio::test]
    async fn test_two_way_tie() {
        let judge_a = r#"{"scores":{},"winner":"A","reasoning":"A"}"#;
        let judge_b = r#"{"scores":{},"winner":"B","reasoning":"B"}"#;
        let arena = run_arena(&["A", "B"], vec![judge_a, judge_b], 2).await;

        assert_eq!(arena.winner.as_deref(), Some("Tie: A, B"));
    }

    #[tokio::test]
    async fn test_unparseable_judge_falls_back_to_name_match() {
        let judge = "I think Bravo gave the strongest answer overall.";
        let arena = run_arena(&["Alpha", "Bravo"], vec![judge], 1).await;
        assert_eq!(arena.win_counts.unwrap()["Bravo"], 1);
        assert_eq!(arena.winner.as_deref(), Some("Bravo"));
    }

    #[tokio::test]
    async fn test_prompt_cap() {
        let judge = r#"{"scores":{},"winner":"A","reasoning":"A"}"#;
        let answers = vec![judge; MAX_PROMPTS_PER_COMPARISON];
        let arena = run_arena(&["A", "B"], answers, 25).await;
        assert_eq!(
            arena.detailed_results.unwrap().len(),
            MAX_PROMPTS_PER_COMPARISON
        );
    }

    #[tokio::test]
    async fn test_missing_dataset_finalizes_failed() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(EvalStore::open(dir.path().join("store")).unwrap());
        let jobs = Arc::new(JobStatusStore::new());
        let arena = ArenaComparison::new("t1", arena_config(&["A"], "missing.json"));
        let arena = store.create_arena_comparison(&arena).unwrap();

        let engine = ArenaEngine::new(store.clone(), jobs, dir.path().to_path_buf())
            .with_factory(scripted_factory(vec![]));
        engine.run("t1", &arena.id, &HashMap::new()).await;

        let arena = store.get_arena_comparison("t1", &arena.id).unwrap().unwrap();
        assert_eq!(arena.status, ExperimentStatus::Failed);
        assert!(arena.error_message.unwrap().contains("not found"));
    }
}
