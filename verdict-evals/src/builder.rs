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

//! Test-case construction.
//!
//! Samples become test cases one at a time so the orchestrator can
//! persist logs in dataset order and honor cancellation between samples.
//! Single-turn samples get one generation plus one low-temperature retry
//! on empty output; conversation samples are replayed turn by turn with
//! the model generating every assistant response.

use crate::test_case::TestCase;
use std::time::Instant;
use tracing::{debug, warn};
use verdict_core::{
    ConversationSample, EvaluationLog, PromptSample, Role, SimulatedScenario, Turn,
};
use verdict_providers::{GenerationOptions, TextGenerator};

const SINGLE_TURN_MAX_TOKENS: u32 = 2048;
const CONVERSATION_MAX_TOKENS: u32 = 1024;
const GENERATION_TEMPERATURE: f64 = 0.7;
const RETRY_TEMPERATURE: f64 = 0.2;
/// Turns of history handed back to the model while simulating.
const SIMULATOR_CONTEXT_TURNS: usize = 6;

/// Identifiers every log produced by a run carries.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub experiment_id: String,
    pub tenant: String,
    pub project_id: String,
    pub model_name: String,
}

impl BuildContext {
    fn new_log(&self, input: impl Into<String>) -> EvaluationLog {
        EvaluationLog::new(
            &self.experiment_id,
            &self.tenant,
            &self.project_id,
            input,
            &self.model_name,
        )
    }
}

/// What one sample produced: the log to persist, the latency metric when
/// generation succeeded, and the test case unless the sample errored out.
#[derive(Debug)]
pub struct SampleOutcome {
    pub test_case: Option<TestCase>,
    pub log: EvaluationLog,
    pub latency_ms: Option<u64>,
}

/// Single-turn path: generate, retry once at low temperature on empty
/// output, and log the attempt either way.
pub async fn run_single_turn_sample(
    model: &dyn TextGenerator,
    ctx: &BuildContext,
    sample: &PromptSample,
) -> SampleOutcome {
    let started = Instant::now();

    let first = model
        .generate(
            &sample.prompt,
            &GenerationOptions::new(SINGLE_TURN_MAX_TOKENS, GENERATION_TEMPERATURE),
        )
        .await;

    let response = match first {
        Ok(text) if text.trim().is_empty() => {
            debug!("empty response, retrying at low temperature");
            match model
                .generate(
                    &sample.prompt,
                    &GenerationOptions::new(SINGLE_TURN_MAX_TOKENS, RETRY_TEMPERATURE),
                )
                .await
            {
                Ok(text) => Ok(text),
                Err(retry_err) => {
                    warn!(error = %retry_err, "retry failed");
                    Ok(String::new())
                }
            }
        }
        other => other,
    };

    let latency_ms = started.elapsed().as_millis() as u64;

    match response {
        Ok(text) if text.trim().is_empty() => {
            let mut log = ctx.new_log(&sample.prompt).with_error("empty_output");
            log.output_text = Some(String::new());
            log.latency_ms = latency_ms;
            SampleOutcome {
                test_case: None,
                log,
                latency_ms: None,
            }
        }
        Ok(text) => {
            let log = ctx.new_log(&sample.prompt).with_success(&text, latency_ms);
            let test_case = TestCase::SingleTurn {
                input: sample.prompt.clone(),
                actual_output: text,
                expected_output: sample.expected_output.clone(),
                retrieval_context: sample.context.clone(),
            };
            SampleOutcome {
                test_case: Some(test_case),
                log,
                latency_ms: Some(latency_ms),
            }
        }
        Err(e) => {
            let log = ctx.new_log(&sample.prompt).with_error(e.to_string());
            SampleOutcome {
                test_case: None,
                log,
                latency_ms: None,
            }
        }
    }
}

fn continuation_prompt(history: &[Turn], user_msg: &str) -> String {
    if history.is_empty() {
        return format!(
            "You are a helpful assistant. Respond to the user.\n\nUser: {user_msg}\n\nAssistant:"
        );
    }
    let mut rendered = String::new();
    for turn in history {
        let label = match turn.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        rendered.push_str(&format!("{label}: {}\n", turn.content));
    }
    format!(
        "You are a helpful assistant. Continue this conversation.\n\n{rendered}User: {user_msg}\n\nAssistant:"
    )
}

fn clean_assistant_response(raw: &str) -> String {
    let trimmed = raw.trim();
    // Strip an echoed "Assistant:" prefix.
    if trimmed.to_lowercase().starts_with("assistant:") {
        trimmed["assistant:".len()..].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

async fn generate_assistant_turn(model: &dyn TextGenerator, prompt: &str) -> String {
    match model
        .generate(
            prompt,
            &GenerationOptions::new(CONVERSATION_MAX_TOKENS, GENERATION_TEMPERATURE),
        )
        .await
    {
        Ok(raw) => {
            let cleaned = clean_assistant_response(&raw);
            if cleaned.is_empty() {
                "[Model returned empty response]".to_string()
            } else {
                cleaned
            }
        }
        Err(e) => {
            warn!(error = %e, "generation error during conversation turn");
            let message: String = e.to_string().chars().take(100).collect();
            format!("[Generation error: {message}]")
        }
    }
}

fn conversation_outcome(
    ctx: &BuildContext,
    turns: Vec<Turn>,
    scenario: Option<String>,
    expected_outcome: Option<String>,
    expected_assistant_turns: Vec<String>,
    latency_ms: u64,
    token_count: u64,
) -> SampleOutcome {
    let user_msgs: Vec<&str> = turns
        .iter()
        .filter(|t| t.role == Role::User)
        .map(|t| t.content.as_str())
        .collect();
    let assistant_msgs: Vec<&str> = turns
        .iter()
        .filter(|t| t.role == Role::Assistant)
        .map(|t| t.content.as_str())
        .collect();

    let combined_input = user_msgs
        .iter()
        .map(|m| format!("User: {m}"))
        .collect::<Vec<_>>()
        .join("\n");
    let combined_output = assistant_msgs
        .iter()
        .map(|m| format!("Assistant: {m}"))
        .collect::<Vec<_>>()
        .join("\n");

    let input_text = if combined_input.is_empty() {
        scenario.clone().unwrap_or_default()
    } else {
        combined_input
    };

    let mut log = ctx.new_log(input_text).with_success(&combined_output, latency_ms);
    log.token_count = token_count;
    log.metadata
        .insert("is_conversational".into(), serde_json::json!(true));
    if let Some(s) = &scenario {
        log.metadata.insert("scenario".into(), serde_json::json!(s));
    }
    if let Some(e) = &expected_outcome {
        log.metadata
            .insert("expected_outcome".into(), serde_json::json!(e));
    }
    log.metadata
        .insert("turn_count".into(), serde_json::json!(turns.len()));
    log.metadata
        .insert("turns".into(), serde_json::to_value(&turns).unwrap_or_default());
    log.metadata.insert(
        "expected_assistant_turns".into(),
        serde_json::json!(expected_assistant_turns),
    );

    let test_case = TestCase::Conversational {
        turns,
        scenario,
        expected_outcome,
    };

    SampleOutcome {
        test_case: Some(test_case),
        log,
        latency_ms: Some(latency_ms),
    }
}

/// Multi-turn replay: iterate the sample's user turns in order, generate
/// every assistant turn with full prior history, and produce one log for
/// the whole conversation. Returns `None` when the sample has no user
/// turns.
pub async fn replay_conversation(
    model: &dyn TextGenerator,
    ctx: &BuildContext,
    sample: &ConversationSample,
) -> Option<SampleOutcome> {
    let user_turns: Vec<&str> = sample
        .turns
        .iter()
        .filter(|t| t.role == Role::User)
        .map(|t| t.content.as_str())
        .collect();
    let expected_assistant_turns: Vec<String> = sample
        .turns
        .iter()
        .filter(|t| t.role == Role::Assistant)
        .map(|t| t.content.clone())
        .collect();

    if user_turns.is_empty() {
        warn!("conversation sample has no user turns, skipping");
        return None;
    }

    let started = Instant::now();
    let mut turns: Vec<Turn> = Vec::with_capacity(user_turns.len() * 2);
    let mut token_count = 0u64;

    for user_msg in &user_turns {
        let prompt = continuation_prompt(&turns, user_msg);
        turns.push(Turn {
            role: Role::User,
            content: user_msg.to_string(),
        });

        let assistant_msg = generate_assistant_turn(model, &prompt).await;
        token_count += user_msg.split_whitespace().count() as u64
            + assistant_msg.split_whitespace().count() as u64;
        turns.push(Turn {
            role: Role::Assistant,
            content: assistant_msg,
        });
    }

    let latency_ms = started.elapsed().as_millis() as u64;
    Some(conversation_outcome(
        ctx,
        turns,
        sample.scenario.clone(),
        sample.expected_outcome.clone(),
        expected_assistant_turns,
        latency_ms,
        token_count,
    ))
}

/// Simulated conversations: a user-simulator model invents the user side
/// from the scenario while the target model answers, up to `max_turns`
/// total turns.
pub async fn simulate_scenario(
    model: &dyn TextGenerator,
    simulator: &dyn TextGenerator,
    ctx: &BuildContext,
    scenario: &SimulatedScenario,
    max_turns: usize,
) -> SampleOutcome {
    let started = Instant::now();
    let mut turns: Vec<Turn> = Vec::new();
    let mut token_count = 0u64;

    while turns.len() + 2 <= max_turns.max(2) {
        let user_msg = match next_user_message(simulator, scenario, &turns).await {
            Some(msg) => msg,
            None => break,
        };

        // Assistant callback: last turns as context, then the new input.
        let window = turns
            .len()
            .saturating_sub(SIMULATOR_CONTEXT_TURNS);
        let context = turns[window..]
            .iter()
            .map(|t| match t.role {
                Role::User => format!("User: {}", t.content),
                Role::Assistant => format!("Assistant: {}", t.content),
            })
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = if context.is_empty() {
            format!("User: {user_msg}\n\nAssistant:")
        } else {
            format!("{context}\n\nUser: {user_msg}\n\nAssistant:")
        };

        turns.push(Turn {
            role: Role::User,
            content: user_msg.clone(),
        });
        let assistant_msg = generate_assistant_turn(model, &prompt).await;
        token_count += user_msg.split_whitespace().count() as u64
            + assistant_msg.split_whitespace().count() as u64;
        turns.push(Turn {
            role: Role::Assistant,
            content: assistant_msg,
        });
    }

    let latency_ms = started.elapsed().as_millis() as u64;
    conversation_outcome(
        ctx,
        turns,
        Some(scenario.scenario.clone()),
        scenario.expected_outcome.clone(),
        Vec::new(),
        latency_ms,
        token_count,
    )
}

async fn next_user_message(
    simulator: &dyn TextGenerator,
    scenario: &SimulatedScenario,
    turns: &[Turn],
) -> Option<String> {
    let user_description = scenario
        .user_description
        .as_deref()
        .unwrap_or("A typical user");
    let prompt = if turns.is_empty() {
        format!(
            "You are simulating a user talking to an AI assistant.\n\
             Scenario: {}\nUser description: {}\n\n\
             Write the user's opening message. Respond with the message only.",
            scenario.scenario, user_description
        )
    } else {
        let transcript = turns
            .iter()
            .map(|t| match t.role {
                Role::User => format!("User: {}", t.content),
                Role::Assistant => format!("Assistant: {}", t.content),
            })
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "You are simulating a user talking to an AI assistant.\n\
             Scenario: {}\nUser description: {}\n\nConversation so far:\n{}\n\n\
             Write the user's next message. Respond with the message only.",
            scenario.scenario, user_description, transcript
        )
    };

    match simulator
        .generate(
            &prompt,
            &GenerationOptions::new(CONVERSATION_MAX_TOKENS, GENERATION_TEMPERATURE),
        )
        .await
    {
        Ok(msg) if !msg.trim().is_empty() => Some(msg.trim().to_string()),
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, "user simulator failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use verdict_providers::ProviderError;

    /// Scripted generator: pops responses in order and records prompts
    /// and options.
    struct ScriptedModel {
        responses: Mutex<Vec<Result<String, String>>>,
        calls: Mutex<Vec<(String, GenerationOptions)>>,
    }

    impl ScriptedModel {
        fn new(responses: Vec<Result<&str, &str>>) -> Self {
            Self {
                responses: Mutex::new(
                    responses
                        .into_iter()
                        .rev()
                        .map(|r| r.map(str::to_string).map_err(str::to_string))
                        .collect(),
                ),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(String, GenerationOptions)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedModel {
        async fn generate(
            &self,
            prompt: &str,
            options: &GenerationOptions,
        ) -> Result<String, ProviderError> {
            self.calls
                .lock()
                .unwrap()
                .push((prompt.to_string(), options.clone()));
            match self.responses.lock().unwrap().pop() {
                Some(Ok(text)) => Ok(text),
                Some(Err(msg)) => Err(ProviderError::Api {
                    status: 500,
                    message: msg,
                }),
                None => Ok(String::new()),
            }
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn ctx() -> BuildContext {
        BuildContext {
            experiment_id: "exp_1".into(),
            tenant: "t1".into(),
            project_id: "p1".into(),
            model_name: "scripted".into(),
        }
    }

    fn prompt_sample(prompt: &str) -> PromptSample {
        serde_json::from_value(serde_json::json!({ "prompt": prompt })).unwrap()
    }

    #[tokio::test]
    async fn test_single_turn_success() {
        let model = ScriptedModel::new(vec![Ok("4")]);
        let outcome = run_single_turn_sample(&model, &ctx(), &prompt_sample("What is 2+2?")).await;

        assert!(outcome.test_case.is_some());
        assert_eq!(outcome.log.output_text.as_deref(), Some("4"));
        assert!(outcome.latency_ms.is_some());
        assert_eq!(model.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_single_turn_empty_retries_once_at_low_temperature() {
        let model = ScriptedModel::new(vec![Ok(""), Ok("")]);
        let outcome = run_single_turn_sample(&model, &ctx(), &prompt_sample("q")).await;

        let calls = model.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1.temperature, GENERATION_TEMPERATURE);
        assert_eq!(calls[0].1.max_tokens, SINGLE_TURN_MAX_TOKENS);
        assert_eq!(calls[1].1.temperature, RETRY_TEMPERATURE);
        assert_eq!(calls[1].1.max_tokens, SINGLE_TURN_MAX_TOKENS);

        assert!(outcome.test_case.is_none());
        assert_eq!(outcome.log.error_message.as_deref(), Some("empty_output"));
        assert!(outcome.latency_ms.is_none());
    }

    #[tokio::test]
    async fn test_single_turn_retry_recovers() {
        let model = ScriptedModel::new(vec![Ok(""), Ok("recovered")]);
        let outcome = run_single_turn_sample(&model, &ctx(), &prompt_sample("q")).await;
        assert!(outcome.test_case.is_some());
        assert_eq!(outcome.log.output_text.as_deref(), Some("recovered"));
    }

    #[tokio::test]
    async fn test_single_turn_generation_error_logged() {
        let model = ScriptedModel::new(vec![Err("boom")]);
        let outcome = run_single_turn_sample(&model, &ctx(), &prompt_sample("q")).await;
        assert!(outcome.test_case.is_none());
        assert!(outcome
            .log
            .error_message
            .as_deref()
            .unwrap()
            .contains("boom"));
    }

    fn conversation_sample() -> ConversationSample {
        serde_json::from_value(serde_json::json!({
            "scenario": "small talk",
            "turns": [
                { "role": "user", "content": "Hi" },
                { "role": "assistant", "content": "expected hello" },
                { "role": "user", "content": "Tell me a joke" },
                { "role": "assistant", "content": "expected joke" },
                { "role": "user", "content": "Thanks" }
            ]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_replay_materializes_two_turns_per_user_message() {
        let model = ScriptedModel::new(vec![
            Ok("Hello"),
            Ok("Why did the chicken cross the road?"),
            Ok("You're welcome"),
        ]);
        let outcome = replay_conversation(&model, &ctx(), &conversation_sample())
            .await
            .unwrap();

        let Some(TestCase::Conversational { turns, .. }) = &outcome.test_case else {
            panic!("expected conversational test case");
        };
        assert_eq!(turns.len(), 6);
        let contents: Vec<&str> = turns.iter().map(|t| t.content.as_str()).collect();
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

        assert_eq!(outcome.log.metadata["turn_count"], serde_json::json!(6));
        assert_eq!(
            outcome.log.metadata["is_conversational"],
            serde_json::json!(true)
        );
        assert_eq!(
            outcome.log.metadata["expected_assistant_turns"],
            serde_json::json!(["expected hello", "expected joke"])
        );
    }

    #[tokio::test]
    async fn test_replay_prompt_shapes() {
        let model = ScriptedModel::new(vec![Ok("A1"), Ok("A2")]);
        let sample: ConversationSample = serde_json::from_value(serde_json::json!({
            "turns": [
                { "role": "user", "content": "first" },
                { "role": "user", "content": "second" }
            ]
        }))
        .unwrap();
        replay_conversation(&model, &ctx(), &sample).await.unwrap();

        let calls = model.calls();
        assert_eq!(
            calls[0].0,
            "You are a helpful assistant. Respond to the user.\n\nUser: first\n\nAssistant:"
        );
        assert_eq!(
            calls[1].0,
            "You are a helpful assistant. Continue this conversation.\n\nUser: first\nAssistant: A1\nUser: second\n\nAssistant:"
        );
        assert_eq!(calls[0].1.max_tokens, CONVERSATION_MAX_TOKENS);
        assert_eq!(calls[0].1.temperature, GENERATION_TEMPERATURE);
    }

    #[tokio::test]
    async fn test_replay_placeholders_for_empty_and_error() {
        let model = ScriptedModel::new(vec![Ok(""), Err("socket reset")]);
        let sample: ConversationSample = serde_json::from_value(serde_json::json!({
            "turns": [
                { "role": "user", "content": "one" },
                { "role": "user", "content": "two" }
            ]
        }))
        .unwrap();
        let outcome = replay_conversation(&model, &ctx(), &sample).await.unwrap();
        let Some(TestCase::Conversational { turns, .. }) = &outcome.test_case else {
            panic!("expected conversational test case");
        };
        assert_eq!(turns[1].content, "[Model returned empty response]");
        assert!(turns[3].content.starts_with("[Generation error: "));
    }

    #[tokio::test]
    async fn test_replay_strips_echoed_assistant_prefix() {
        let model = ScriptedModel::new(vec![Ok("Assistant: Hello there")]);
        let sample: ConversationSample = serde_json::from_value(serde_json::json!({
            "turns": [{ "role": "user", "content": "Hi" }]
        }))
        .unwrap();
        let outcome = replay_conversation(&model, &ctx(), &sample).await.unwrap();
        let Some(TestCase::Conversational { turns, .. }) = &outcome.test_case else {
            panic!("expected conversational test case");
        };
        assert_eq!(turns[1].content, "Hello there");
    }

    #[tokio::test]
    async fn test_replay_skips_conversations_without_user_turns() {
        let model = ScriptedModel::new(vec![]);
        let sample: ConversationSample = serde_json::from_value(serde_json::json!({
            "turns": [{ "role": "assistant", "content": "orphan" }]
        }))
        .unwrap();
        assert!(replay_conversation(&model, &ctx(), &sample).await.is_none());
    }

    #[tokio::test]
    async fn test_simulation_respects_max_turns() {
        let model = ScriptedModel::new(vec![Ok("a1"), Ok("a2"), Ok("a3")]);
        let simulator = ScriptedModel::new(vec![Ok("u1"), Ok("u2"), Ok("u3")]);
        let scenario: SimulatedScenario = serde_json::from_value(serde_json::json!({
            "scenario": "billing question",
            "expected_outcome": "issue resolved"
        }))
        .unwrap();

        let outcome = simulate_scenario(&model, &simulator, &ctx(), &scenario, 4).await;
        let Some(TestCase::Conversational { turns, expected_outcome, .. }) = &outcome.test_case
        else {
            panic!("expected conversational test case");
        };
        assert_eq!(turns.len(), 4);
        assert_eq!(expected_outcome.as_deref(), Some("issue resolved"));
    }
}
