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

//! End-to-end lifecycle of one experiment.

use crate::{gatekeeper, CancellationFlag, EngineError};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use verdict_core::{
    EvaluationMetric, ExperimentConfig, ExperimentResults, ExperimentStatus, JobStatus,
    MetricType, ScorerDefinition,
};
use verdict_evals::builder::{self, BuildContext, SampleOutcome};
use verdict_evals::dataset::{self, Dataset};
use verdict_evals::judge::{GEvalJudge, JudgeSettings};
use verdict_evals::metrics::{aggregate_scores, MetricDispatcher, MetricScore, MetricSelection};
use verdict_evals::scorer::{run_scorer, select_scorers, ScorerOutcome};
use verdict_evals::test_case::TestCase;
use verdict_providers::{
    default_model_factory, CredentialBag, ModelFactory, TextGenerator,
};
use verdict_storage::{EvalStore, JobStatusStore};

const DETAILED_RESULTS_PREVIEW: usize = 10;
const DEFAULT_PROVIDER_TAG: &str = "ollama";

/// One built test case plus the log it will merge scores into.
struct CaseRecord {
    test_case: TestCase,
    log_id: String,
}

/// Drives experiments from pick-up to a terminal status.
pub struct Orchestrator {
    store: Arc<EvalStore>,
    jobs: Arc<JobStatusStore>,
    data_root: PathBuf,
    artifacts_root: PathBuf,
    factory: ModelFactory,
}

impl Orchestrator {
    pub fn new(
        store: Arc<EvalStore>,
        jobs: Arc<JobStatusStore>,
        data_root: PathBuf,
        artifacts_root: PathBuf,
    ) -> Self {
        Self {
            store,
            jobs,
            data_root,
            artifacts_root,
            factory: default_model_factory(),
        }
    }

    /// Swap the model factory (tests, gateways).
    pub fn with_factory(mut self, factory: ModelFactory) -> Self {
        self.factory = factory;
        self
    }

    /// Run one experiment to a terminal status. Every failure path
    /// finalizes the record as `failed`; nothing propagates.
    pub async fn run_experiment(
        &self,
        tenant: &str,
        experiment_id: &str,
        config: &ExperimentConfig,
        cancel: CancellationFlag,
    ) {
        if let Err(e) = self.run_inner(tenant, experiment_id, config, cancel).await {
            error!(experiment_id, error = %e, "experiment failed");
            if let Err(store_err) = self.store.fail_experiment(tenant, experiment_id, e.to_string())
            {
                error!(experiment_id, error = %store_err, "could not finalize failed experiment");
            }
        }
        self.jobs.delete_job_status(experiment_id);
    }

    async fn run_inner(
        &self,
        tenant: &str,
        experiment_id: &str,
        config: &ExperimentConfig,
        cancel: CancellationFlag,
    ) -> Result<(), EngineError> {
        self.store
            .update_experiment_status(tenant, experiment_id, ExperimentStatus::Running, None)?;
        self.jobs
            .set_job_status(experiment_id, JobStatus::new(ExperimentStatus::Running));

        // Per-run credential scope; process env is read as fallback but
        // never written.
        let creds = build_credentials(config);

        let provider_tag = config
            .model
            .provider_tag()
            .unwrap_or_else(|| DEFAULT_PROVIDER_TAG.to_string());
        let model = (self.factory)(&provider_tag, &config.model.name, &creds)
            .map_err(|e| EngineError::Config(format!("Failed to initialize model: {e}")))?;

        let dataset = dataset::load_dataset(&config.dataset, &self.data_root)
            .map_err(|e| EngineError::Dataset(e.to_string()))?;
        info!(experiment_id, samples = dataset.len(), "dataset loaded");

        let judge_settings = JudgeSettings::resolve(config.judge_llm.as_ref());
        let conversational = dataset.is_conversational();

        let ctx = BuildContext {
            experiment_id: experiment_id.to_string(),
            tenant: tenant.to_string(),
            project_id: config.project_id.clone(),
            model_name: config.model.name.clone(),
        };

        let cases = self
            .build_cases(&ctx, model.as_ref(), &dataset, &judge_settings, &creds, &cancel)
            .await?;

        let mode = config.evaluation_mode();
        let selection = MetricSelection::resolve(config.metrics.as_ref(), config.task_type);

        // Built-in judge metrics, or empty score maps per test case.
        let mut per_case_scores: Vec<HashMap<String, MetricScore>> = if mode.runs_builtin()
            && !cases.is_empty()
            && !selection.is_empty()
        {
            let judge_client = (self.factory)(
                &judge_settings.provider,
                &judge_settings.model,
                &creds,
            )
            .map_err(|e| EngineError::Config(format!("Failed to initialize judge: {e}")))?;
            let dispatcher = MetricDispatcher::new(
                Arc::new(GEvalJudge::with_settings(judge_client, &judge_settings)),
                config.thresholds.as_ref(),
            );
            let mut all = Vec::with_capacity(cases.len());
            for record in &cases {
                all.push(dispatcher.score_test_case(&record.test_case, &selection).await);
            }
            all
        } else {
            vec![HashMap::new(); cases.len()]
        };

        // Custom LLM-judge scorers merge into the same per-case maps,
        // keyed by scorer name.
        let mut scorer_outcomes: Vec<(String, Vec<ScorerOutcome>)> = Vec::new();
        let mut scorer_names: std::collections::HashSet<String> = std::collections::HashSet::new();
        if mode.runs_scorers() && !cases.is_empty() {
            let scorers = self.load_scorers(tenant, config)?;
            for scorer in &scorers {
                let outcomes = self.run_one_scorer(scorer, &cases, &creds).await;
                for (idx, outcome) in outcomes.iter().enumerate() {
                    per_case_scores[idx].insert(
                        scorer.name.clone(),
                        scorer_score_cell(outcome),
                    );
                }
                scorer_names.insert(scorer.name.clone());
                scorer_outcomes.push((scorer.metric_key.clone(), outcomes));
            }
        }

        // One metadata-merge per log with camelCase-normalized keys.
        for (record, scores) in cases.iter().zip(&per_case_scores) {
            let normalized = normalize_scores(scores, conversational);
            let mut patch = Map::new();
            patch.insert("metric_scores".to_string(), Value::Object(normalized));
            if let Err(e) = self
                .store
                .update_log_metadata(tenant, &record.log_id, patch)
            {
                warn!(log_id = record.log_id.as_str(), error = %e, "metric score merge failed");
            }
        }

        // Aggregate averages and write quality metric rows. Scorer cells
        // aggregate under their own metric_key, not the display tables.
        let builtin_scores: Vec<HashMap<String, MetricScore>> = per_case_scores
            .iter()
            .map(|scores| {
                scores
                    .iter()
                    .filter(|(name, _)| !scorer_names.contains(*name))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .collect();
        let mut avg_scores = aggregate_scores(&builtin_scores, conversational);
        for (camel, avg) in &avg_scores {
            self.store.create_metric(&EvaluationMetric::new(
                experiment_id,
                tenant,
                camel,
                MetricType::Quality,
                *avg,
            ))?;
        }
        for (metric_key, outcomes) in &scorer_outcomes {
            if outcomes.is_empty() {
                continue;
            }
            let avg = outcomes.iter().map(|o| o.score).sum::<f64>() / outcomes.len() as f64;
            avg_scores.insert(metric_key.clone(), avg);
            self.store.create_metric(&EvaluationMetric::new(
                experiment_id,
                tenant,
                metric_key,
                MetricType::Quality,
                avg,
            ))?;
        }

        let detailed_results: Vec<Value> = cases
            .iter()
            .zip(&per_case_scores)
            .take(DETAILED_RESULTS_PREVIEW)
            .map(|(record, scores)| detailed_result_row(&record.test_case, scores, conversational))
            .collect();

        let gatekeeper = gatekeeper::evaluate_gate(
            &self.artifacts_root.join("gates"),
            &config.project_id,
            &avg_scores,
        );

        let results = ExperimentResults {
            total_prompts: cases.len(),
            avg_scores,
            detailed_results,
            completed_at: chrono::Utc::now(),
            gatekeeper,
        };

        self.write_results_artifact(tenant, experiment_id, &results);
        self.store
            .complete_experiment(tenant, experiment_id, results)?;
        info!(experiment_id, "experiment completed");
        Ok(())
    }

    async fn build_cases(
        &self,
        ctx: &BuildContext,
        model: &dyn TextGenerator,
        dataset: &Dataset,
        judge_settings: &JudgeSettings,
        creds: &CredentialBag,
        cancel: &CancellationFlag,
    ) -> Result<Vec<CaseRecord>, EngineError> {
        let mut cases = Vec::new();

        match dataset {
            Dataset::SingleTurn(samples) => {
                for sample in samples {
                    if cancel.is_cancelled() {
                        return Err(EngineError::Cancelled);
                    }
                    let outcome = builder::run_single_turn_sample(model, ctx, sample).await;
                    self.persist_outcome(outcome, true, &mut cases)?;
                }
            }
            Dataset::Conversations(samples) => {
                for sample in samples {
                    if cancel.is_cancelled() {
                        return Err(EngineError::Cancelled);
                    }
                    if let Some(outcome) = builder::replay_conversation(model, ctx, sample).await {
                        self.persist_outcome(outcome, false, &mut cases)?;
                    }
                }
            }
            Dataset::Simulated {
                scenarios,
                max_turns,
            } => {
                // The judge model plays the user; the target model stays
                // the assistant under test.
                let simulator = (self.factory)(
                    &judge_settings.provider,
                    &judge_settings.model,
                    creds,
                )
                .map_err(|e| {
                    EngineError::Config(format!("Failed to initialize simulator: {e}"))
                })?;
                for scenario in scenarios {
                    if cancel.is_cancelled() {
                        return Err(EngineError::Cancelled);
                    }
                    let outcome = builder::simulate_scenario(
                        model,
                        simulator.as_ref(),
                        ctx,
                        scenario,
                        *max_turns,
                    )
                    .await;
                    self.persist_outcome(outcome, false, &mut cases)?;
                }
            }
        }
        Ok(cases)
    }

    /// Persist a sample's log (and latency metric for single-turn) in
    /// dataset order; keep the test case when the sample succeeded.
    fn persist_outcome(
        &self,
        outcome: SampleOutcome,
        record_latency: bool,
        cases: &mut Vec<CaseRecord>,
    ) -> Result<(), EngineError> {
        let log = self.store.create_log(&outcome.log)?;
        if record_latency {
            if let Some(latency_ms) = outcome.latency_ms {
                self.store.create_metric(&EvaluationMetric::new(
                    &log.experiment_id,
                    &log.tenant,
                    "latency",
                    MetricType::Performance,
                    latency_ms as f64,
                ))?;
            }
        }
        if let Some(test_case) = outcome.test_case {
            cases.push(CaseRecord {
                test_case,
                log_id: log.id,
            });
        }
        Ok(())
    }

    fn load_scorers(
        &self,
        tenant: &str,
        config: &ExperimentConfig,
    ) -> Result<Vec<ScorerDefinition>, EngineError> {
        let all = self.store.list_scorers(tenant)?;
        let in_project: Vec<ScorerDefinition> = all
            .into_iter()
            .filter(|s| {
                s.project_id.is_none() || s.project_id.as_deref() == Some(&config.project_id)
            })
            .collect();
        Ok(select_scorers(
            in_project,
            config.selected_scorers.as_deref(),
        ))
    }

    async fn run_one_scorer(
        &self,
        scorer: &ScorerDefinition,
        cases: &[CaseRecord],
        creds: &CredentialBag,
    ) -> Vec<ScorerOutcome> {
        let judge = (self.factory)(
            &scorer.config.judge_model.provider,
            &scorer.config.judge_model.name,
            creds,
        );
        let mut outcomes = Vec::with_capacity(cases.len());
        for record in cases {
            let case = &record.test_case;
            let outcome = match &judge {
                Ok(client) => {
                    run_scorer(
                        scorer,
                        client.as_ref(),
                        &case.input_text(),
                        &case.output_text(),
                        case.expected_text().as_deref().unwrap_or_default(),
                    )
                    .await
                }
                Err(e) => ScorerOutcome {
                    scorer_id: scorer.id.clone(),
                    scorer_name: scorer.name.clone(),
                    label: "ERROR".to_string(),
                    score: 0.0,
                    passed: false,
                    raw_response: e.to_string(),
                },
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    fn write_results_artifact(
        &self,
        tenant: &str,
        experiment_id: &str,
        results: &ExperimentResults,
    ) {
        let dir = self
            .artifacts_root
            .join("results")
            .join(tenant)
            .join(experiment_id);
        let write = || -> std::io::Result<()> {
            std::fs::create_dir_all(&dir)?;
            let file = std::fs::File::create(dir.join("results.json"))?;
            serde_json::to_writer_pretty(file, results)?;
            Ok(())
        };
        if let Err(e) = write() {
            warn!(experiment_id, error = %e, "could not write results artifact");
        }
    }
}

/// Collect the run's credentials from the config, keyed by provider.
fn build_credentials(config: &ExperimentConfig) -> CredentialBag {
    let mut creds = CredentialBag::new();
    if let (Some(tag), Some(key)) = (config.model.provider_tag(), config.model.api_key.as_ref()) {
        creds.insert_tag(&tag, key.clone());
    }
    if let Some(judge) = &config.judge_llm {
        if let Some(key) = &judge.api_key {
            creds.insert_tag(&judge.provider, key.clone());
        }
    }
    if let Some(scorer_keys) = &config.scorer_api_keys {
        for (tag, key) in scorer_keys {
            creds.insert_tag(tag, key.clone());
        }
    }
    if let Some(endpoint) = &config.model.endpoint_url {
        match config.model.provider_tag().as_deref() {
            Some("ollama") => creds.set_ollama_host(endpoint.clone()),
            _ => creds.set_openai_base(endpoint.clone()),
        }
    }
    creds
}

/// Per-case scorer cell, mirroring the shape built-in metrics use.
fn scorer_score_cell(outcome: &ScorerOutcome) -> MetricScore {
    let reason: String = outcome.raw_response.chars().take(200).collect();
    MetricScore {
        score: Some(outcome.score),
        passed: outcome.passed,
        reason: Some(reason),
        skipped: false,
        error: None,
    }
}

/// Map display names to stable camelCase keys; scorer names pass through.
fn normalize_scores(
    scores: &HashMap<String, MetricScore>,
    conversational: bool,
) -> Map<String, Value> {
    let mut normalized = Map::new();
    for (display, cell) in scores {
        let key = verdict_core::names::display_to_camel(display, conversational);
        normalized.insert(key, serde_json::to_value(cell).unwrap_or(Value::Null));
    }
    normalized
}

fn detailed_result_row(
    case: &TestCase,
    scores: &HashMap<String, MetricScore>,
    conversational: bool,
) -> Value {
    let mut row = json!({
        "input": case.input_text(),
        "output": case.output_text(),
        "expected": case.expected_text(),
        "metric_scores": Value::Object(normalize_scores(scores, conversational)),
    });
    if let TestCase::SingleTurn {
        retrieval_context, ..
    } = case
    {
        row["context"] = serde_json::to_value(retrieval_context).unwrap_or(Value::Null);
    }
    if case.is_conversational() {
        row["is_conversational"] = json!(true);
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use verdict_core::Experiment;
    use verdict_providers::{GenerationOptions, ProviderError};

    /// Per-model scripted responses, popped in call order.
    struct ScriptedModel {
        name: String,
        responses: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl TextGenerator for ScriptedModel {
        async fn generate(
            &self,
            _prompt: &str,
            _options: &GenerationOptions,
        ) -> Result<String, ProviderError> {
            Ok(self.responses.lock().unwrap().pop().unwrap_or_default())
        }

        fn model_name(&self) -> &str {
            &self.name
        }
    }

    /// Factory serving scripted responses per model name.
    fn scripted_factory(scripts: Vec<(&str, Vec<&str>)>) -> ModelFactory {
        let scripts: HashMap<String, Arc<Mutex<Vec<String>>>> = scripts
            .into_iter()
            .map(|(model, responses)| {
                (
                    model.to_string(),
                    Arc::new(Mutex::new(
                        responses.into_iter().rev().map(str::to_string).collect(),
                    )),
                )
            })
            .collect();
        Arc::new(move |_provider, model, _creds| {
            let responses = scripts
                .get(model)
                .cloned()
                .unwrap_or_else(|| Arc::new(Mutex::new(Vec::new())));
            Ok(Arc::new(ScriptedModel {
                name: model.to_string(),
                responses,
            }) as Arc<dyn TextGenerator>)
        })
    }

    struct Harness {
        _dir: tempfile::TempDir,
        store: Arc<EvalStore>,
        orchestrator: Orchestrator,
    }

    fn harness(factory: ModelFactory) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(EvalStore::open(dir.path().join("store")).unwrap());
        let jobs = Arc::new(JobStatusStore::new());
        let orchestrator = Orchestrator::new(
            store.clone(),
            jobs,
            dir.path().to_path_buf(),
            dir.path().join("artifacts"),
        )
        .with_factory(factory);
        Harness {
            _dir: dir,
            store,
            orchestrator,
        }
    }

    fn config(json: serde_json::Value) -> ExperimentConfig {
        serde_json::from_value(json).unwrap()
    }

    async fn run(h: &Harness, config: &ExperimentConfig) -> Experiment {
        let experiment = Experiment::new("t1", config.clone());
        let experiment = h.store.create_experiment(&experiment).unwrap();
        h.orchestrator
            .run_experiment("t1", &experiment.id, config, CancellationFlag::new())
            .await;
        h.store
            .get_experiment_by_id("t1", &experiment.id)
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_single_turn_builtin_metrics_end_to_end() {
        let judge = r#"{"score": 0.8, "reason": "fine"}"#;
        let h = harness(scripted_factory(vec![
            ("target-model", vec!["4", "Paris"]),
            ("judge-model", vec![judge, judge, judge, judge]),
        ]));
        let cfg = config(serde_json::json!({
            "project_id": "p1",
            "name": "math",
            "model": { "name": "target-model", "provider": "openai", "apiKey": "sk-x" },
            "judgeLlm": { "provider": "openai", "model": "judge-model" },
            "dataset": { "prompts": [
                { "prompt": "What is 2+2?", "expected_output": "4" },
                { "prompt": "Capital of France?", "expected_output": "Paris" }
            ]},
            "metrics": { "answerRelevancy": true, "correctness": true }
        }));

        let exp = run(&h, &cfg).await;
        assert_eq!(exp.status, ExperimentStatus::Completed);

        let results = exp.results.unwrap();
        assert_eq!(results.total_prompts, 2);
        let relevancy = results.avg_scores["answerRelevancy"];
        let correctness = results.avg_scores["correctness"];
        assert!((0.5..=1.0).contains(&relevancy));
        assert!((0.5..=1.0).contains(&correctness));
        assert_eq!(results.detailed_results.len(), 2);

        let logs = h.store.get_logs("t1", &exp.id).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].output_text.as_deref(), Some("4"));
        assert_eq!(logs[1].output_text.as_deref(), Some("Paris"));
        // Each log carries its merged metric scores.
        assert!(logs[0].metadata["metric_scores"]
            .get("answerRelevancy")
            .is_some());

        let aggregates = h.store.get_metric_aggregates("t1", &exp.id).unwrap();
        assert!((aggregates["answerRelevancy"].avg - 0.8).abs() < 1e-9);
        assert_eq!(aggregates["latency"].count, 2);
    }

    #[tokio::test]
    async fn test_empty_retry_path_completes_with_zero_prompts() {
        let h = harness(scripted_factory(vec![("target-model", vec!["", ""])]));
        let cfg = config(serde_json::json!({
            "project_id": "p1",
            "name": "empty",
            "model": { "name": "target-model", "provider": "openai", "apiKey": "sk-x" },
            "dataset": { "prompts": [{ "prompt": "q" }] },
            "metrics": { "correctness": true }
        }));

        let exp = run(&h, &cfg).await;
        assert_eq!(exp.status, ExperimentStatus::Completed);
        assert_eq!(exp.results.unwrap().total_prompts, 0);

        let logs = h.store.get_logs("t1", &exp.id).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].error_message.as_deref(), Some("empty_output"));

        let aggregates = h.store.get_metric_aggregates("t1", &exp.id).unwrap();
        assert!(aggregates.is_empty());
    }

    #[tokio::test]
    async fn test_multi_turn_replay_end_to_end() {
        let judge = r#"{"score": 0.9, "reason": "coherent"}"#;
        let h = harness(scripted_factory(vec![
            (
                "target-model",
                vec!["Hello", "Why did the chicken cross the road?", "You're welcome"],
            ),
            ("judge-model", vec![judge; 8]),
        ]));
        let cfg = config(serde_json::json!({
            "project_id": "p1",
            "name": "conversation",
            "model": { "name": "target-model", "provider": "openai", "apiKey": "sk-x" },
            "judgeLlm": { "provider": "openai", "model": "judge-model" },
            "dataset": { "conversations": [{
                "scenario": "small talk",
                "turns": [
                    { "role": "user", "content": "Hi" },
                    { "role": "user", "content": "Tell me a joke" },
                    { "role": "user", "content": "Thanks" }
                ]
            }]}
        }));

        let exp = run(&h, &cfg).await;
        assert_eq!(exp.status, ExperimentStatus::Completed);

        let logs = h.store.get_logs("t1", &exp.id).unwrap();
        assert_eq!(logs.len(), 1);
        let log = &logs[0];
        assert_eq!(log.metadata["is_conversational"], json!(true));
        assert_eq!(log.metadata["turn_count"], json!(6));
        let turns = log.metadata["turns"].as_array().unwrap();
        let contents: Vec<&str> = turns
            .iter()
            .map(|t| t["content"].as_str().unwrap())
            .collect();
        assert_eq!(
            contents,
            vec![
                "Hi",
                "Hello",
                "Tell me a joke",
                "Why did the chicken cross the road?",
                "Thanks",
                "You're welcome"
            ]
        );

        // Conversational runs aggregate under conversational keys.
        let results = exp.results.unwrap();
        assert!(results.avg_scores.contains_key("turnRelevancy"));
        assert!(results.avg_scores.contains_key("conversationSafety"));
    }

    fn pass_fail_scorer(h: &Harness) -> ScorerDefinition {
        let scorer: ScorerDefinition = serde_json::from_value(serde_json::json!({
            "id": "scorer_abc",
            "tenant": "t1",
            "name": "correctness-judge",
            "type": "llm",
            "metricKey": "correctnessJudge",
            "enabled": true,
            "defaultThreshold": 0.5,
            "weight": 1.0,
            "config": {
                "judgeModel": { "provider": "openai", "name": "scorer-judge", "params": {} },
                "messages": [
                    { "role": "system", "template": "Judge correctness." },
                    { "role": "user", "template": "Q: {{input}}\nA: {{output}}\nReply PASS or FAIL." }
                ],
                "choiceScores": { "PASS": 1.0, "FAIL": 0.0 }
            },
            "createdAt": chrono::Utc::now().to_rfc3339()
        }))
        .unwrap();
        h.store.create_scorer(&scorer).unwrap();
        scorer
    }

    #[tokio::test]
    async fn test_scorer_mode_runs_only_custom_scorers() {
        let h = harness(scripted_factory(vec![
            ("target-model", vec!["4"]),
            ("scorer-judge", vec!["PASS: looks right."]),
        ]));
        pass_fail_scorer(&h);

        let cfg = config(serde_json::json!({
            "project_id": "p1",
            "name": "scored",
            "evaluationMode": "scorer",
            "model": { "name": "target-model", "provider": "openai", "apiKey": "sk-x" },
            "dataset": { "prompts": [{ "prompt": "What is 2+2?", "expected_output": "4" }] },
            "scorerApiKeys": { "openai": "sk-scorer" }
        }));

        let exp = run(&h, &cfg).await;
        assert_eq!(exp.status, ExperimentStatus::Completed);

        let results = exp.results.unwrap();
        assert_eq!(results.avg_scores.len(), 1);
        assert!((results.avg_scores["correctnessJudge"] - 1.0).abs() < 1e-9);

        let logs = h.store.get_logs("t1", &exp.id).unwrap();
        let cell = &logs[0].metadata["metric_scores"]["correctness-judge"];
        assert_eq!(cell["score"], json!(1.0));
        assert_eq!(cell["passed"], json!(true));

        let aggregates = h.store.get_metric_aggregates("t1", &exp.id).unwrap();
        assert!((aggregates["correctnessJudge"].avg - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_selected_scorers_filter() {
        let h = harness(scripted_factory(vec![
            ("target-model", vec!["4"]),
            ("scorer-judge", vec!["PASS"]),
        ]));
        pass_fail_scorer(&h);

        let cfg = config(serde_json::json!({
            "project_id": "p1",
            "name": "filtered",
            "evaluationMode": "scorer",
            "model": { "name": "target-model", "provider": "openai", "apiKey": "sk-x" },
            "dataset": { "prompts": [{ "prompt": "q" }] },
            "selectedScorers": ["some_other_scorer"]
        }));

        let exp = run(&h, &cfg).await;
        let results = exp.results.unwrap();
        assert!(results.avg_scores.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_provider_finalizes_failed() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(EvalStore::open(dir.path().join("store")).unwrap());
        let jobs = Arc::new(JobStatusStore::new());
        // Real factory so provider parsing applies.
        let orchestrator = Orchestrator::new(
            store.clone(),
            jobs,
            dir.path().to_path_buf(),
            dir.path().join("artifacts"),
        );

        let cfg = config(serde_json::json!({
            "project_id": "p1",
            "name": "bad-provider",
            "model": { "name": "m", "provider": "unknown-cloud" },
            "dataset": { "prompts": [{ "prompt": "q" }] }
        }));
        let experiment = store.create_experiment(&Experiment::new("t1", cfg.clone())).unwrap();
        orchestrator
            .run_experiment("t1", &experiment.id, &cfg, CancellationFlag::new())
            .await;

        let exp = store.get_experiment_by_id("t1", &experiment.id).unwrap().unwrap();
        assert_eq!(exp.status, ExperimentStatus::Failed);
        assert!(exp.error_message.unwrap().contains("unsupported provider"));
        assert_eq!(store.get_log_count("t1", &exp.id).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_dataset_finalizes_failed() {
        let h = harness(scripted_factory(vec![("target-model", vec![])]));
        let cfg = config(serde_json::json!({
            "project_id": "p1",
            "name": "no-data",
            "model": { "name": "target-model", "provider": "openai", "apiKey": "sk-x" },
            "dataset": {}
        }));
        let exp = run(&h, &cfg).await;
        assert_eq!(exp.status, ExperimentStatus::Failed);
        assert_eq!(
            exp.error_message.as_deref(),
            Some("No prompts or conversations in dataset")
        );
    }

    #[tokio::test]
    async fn test_cancellation_finalizes_failed() {
        let h = harness(scripted_factory(vec![("target-model", vec!["4"])]));
        let cfg = config(serde_json::json!({
            "project_id": "p1",
            "name": "cancelled",
            "model": { "name": "target-model", "provider": "openai", "apiKey": "sk-x" },
            "dataset": { "prompts": [{ "prompt": "q" }] }
        }));

        let experiment = h.store.create_experiment(&Experiment::new("t1", cfg.clone())).unwrap();
        let cancel = CancellationFlag::new();
        cancel.cancel();
        h.orchestrator
            .run_experiment("t1", &experiment.id, &cfg, cancel)
            .await;

        let exp = h
            .store
            .get_experiment_by_id("t1", &experiment.id)
            .unwrap()
            .unwrap();
        assert_eq!(exp.status, ExperimentStatus::Failed);
        assert_eq!(exp.error_message.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn test_results_artifact_written() {
        let judge = r#"{"score": 1.0, "reason": "exact"}"#;
        let h = harness(scripted_factory(vec![
            ("target-model", vec!["4"]),
            ("judge-model", vec![judge]),
        ]));
        let cfg = config(serde_json::json!({
            "project_id": "p1",
            "name": "artifact",
            "model": { "name": "target-model", "provider": "openai", "apiKey": "sk-x" },
            "judgeLlm": { "provider": "openai", "model": "judge-model" },
            "dataset": { "prompts": [{ "prompt": "q", "expected_output": "4" }] },
            "metrics": { "correctness": true }
        }));

        let exp = run(&h, &cfg).await;
        let artifact = h
            ._dir
            .path()
            .join("artifacts")
            .join("results")
            .join("t1")
            .join(&exp.id)
            .join("results.json");
        assert!(artifact.is_file());
        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(artifact).unwrap()).unwrap();
        assert_eq!(parsed["total_prompts"], json!(1));
    }

    #[tokio::test]
    async fn test_gatekeeper_report_attached() {
        let judge = r#"{"score": 0.4, "reason": "weak"}"#;
        let h = harness(scripted_factory(vec![
            ("target-model", vec!["4"]),
            ("judge-model", vec![judge]),
        ]));
        let gates = h._dir.path().join("artifacts").join("gates");
        std::fs::create_dir_all(&gates).unwrap();
        std::fs::write(
            gates.join("p1.json"),
            r#"{"minimums": {"correctness": 0.7}}"#,
        )
        .unwrap();

        let cfg = config(serde_json::json!({
            "project_id": "p1",
            "name": "gated",
            "model": { "name": "target-model", "provider": "openai", "apiKey": "sk-x" },
            "judgeLlm": { "provider": "openai", "model": "judge-model" },
            "dataset": { "prompts": [{ "prompt": "q" }] },
            "metrics": { "correctness": true }
        }));

        let exp = run(&h, &cfg).await;
        let gate = exp.results.unwrap().gatekeeper.unwrap();
        assert!(!gate.passed);
        assert_eq!(gate.checked_metrics, vec!["correctness"]);
    }
}
