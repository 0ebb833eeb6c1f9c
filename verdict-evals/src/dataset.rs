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

//! Dataset resolution.
//!
//! A dataset reference resolves, in priority order, from inline samples in
//! the config, a built-in preset name, or a custom file path. Files are
//! JSON lists; the first element decides the shape: a `turns` key means
//! conversational, a `prompt` key means single-turn.

use crate::EvalError;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::info;
use verdict_core::{ConversationSample, DatasetConfig, PromptSample, SimulatedScenario, TaskType};

pub const DEFAULT_MAX_TURNS: usize = 6;

/// A resolved dataset: a uniform iterable of samples.
#[derive(Debug, Clone)]
pub enum Dataset {
    SingleTurn(Vec<PromptSample>),
    Conversations(Vec<ConversationSample>),
    Simulated {
        scenarios: Vec<SimulatedScenario>,
        max_turns: usize,
    },
}

impl Dataset {
    pub fn len(&self) -> usize {
        match self {
            Dataset::SingleTurn(samples) => samples.len(),
            Dataset::Conversations(samples) => samples.len(),
            Dataset::Simulated { scenarios, .. } => scenarios.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_conversational(&self) -> bool {
        !matches!(self, Dataset::SingleTurn(_))
    }
}

fn builtin_path(data_root: &Path, task: TaskType) -> PathBuf {
    let datasets_dir = data_root.join("datasets");
    match task {
        TaskType::Chatbot => datasets_dir.join("chatbot").join("chatbot_basic.json"),
        TaskType::Rag => datasets_dir.join("rag").join("rag_product_docs.json"),
        TaskType::Agent => datasets_dir
            .join("agent")
            .join("agent_task_execution_multiturn.json"),
        TaskType::Safety => datasets_dir.join("safety").join("safety_probes.json"),
    }
}

enum FileSamples {
    Prompts(Vec<PromptSample>),
    Conversations(Vec<ConversationSample>),
}

fn load_file(path: &Path) -> Result<FileSamples, EvalError> {
    if !path.is_file() {
        return Err(EvalError::Dataset(format!(
            "Dataset file not found: {}",
            path.display()
        )));
    }
    let raw = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&raw)
        .map_err(|e| EvalError::Dataset(format!("Malformed dataset JSON: {e}")))?;

    let items = value
        .as_array()
        .ok_or_else(|| EvalError::Dataset("Dataset file is not a JSON list".to_string()))?;
    let Some(first) = items.first() else {
        return Err(EvalError::Dataset(
            "No prompts or conversations in dataset".to_string(),
        ));
    };

    if first.get("turns").is_some() {
        let conversations: Vec<ConversationSample> = serde_json::from_value(value.clone())
            .map_err(|e| EvalError::Dataset(format!("Malformed conversation dataset: {e}")))?;
        Ok(FileSamples::Conversations(conversations))
    } else if first.get("prompt").is_some() {
        let prompts: Vec<PromptSample> = serde_json::from_value(value.clone())
            .map_err(|e| EvalError::Dataset(format!("Malformed prompt dataset: {e}")))?;
        Ok(FileSamples::Prompts(prompts))
    } else {
        Err(EvalError::Dataset(
            "No prompts or conversations in dataset".to_string(),
        ))
    }
}

fn resolve_path(data_root: &Path, raw: &str) -> PathBuf {
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        data_root.join(path)
    }
}

/// Resolve a dataset reference to samples. `data_root` anchors built-in
/// presets and relative custom paths.
pub fn load_dataset(config: &DatasetConfig, data_root: &Path) -> Result<Dataset, EvalError> {
    // Simulated mode carries its own sample shape.
    if config.simulated_mode.unwrap_or(false) {
        if let Some(scenarios) = config.scenarios.as_ref().filter(|s| !s.is_empty()) {
            return Ok(Dataset::Simulated {
                scenarios: scenarios.clone(),
                max_turns: config.max_turns.unwrap_or(DEFAULT_MAX_TURNS),
            });
        }
    }

    if let Some(conversations) = config.conversations.as_ref().filter(|c| !c.is_empty()) {
        return Ok(Dataset::Conversations(conversations.clone()));
    }
    if let Some(prompts) = config.prompts.as_ref().filter(|p| !p.is_empty()) {
        return Ok(Dataset::SingleTurn(prompts.clone()));
    }

    if let Some(task) = config.use_builtin {
        let path = builtin_path(data_root, task);
        if !path.is_file() {
            return Err(EvalError::Dataset(format!(
                "Built-in dataset file not found: {}",
                path.display()
            )));
        }
        info!(preset = task.as_str(), path = %path.display(), "using built-in dataset");
        return match load_file(&path)? {
            FileSamples::Prompts(p) => Ok(Dataset::SingleTurn(p)),
            FileSamples::Conversations(c) => Ok(Dataset::Conversations(c)),
        };
    }

    if let Some(raw) = config.path.as_deref().filter(|p| !p.trim().is_empty()) {
        let path = resolve_path(data_root, raw);
        return match load_file(&path)? {
            FileSamples::Prompts(p) => Ok(Dataset::SingleTurn(p)),
            FileSamples::Conversations(c) => Ok(Dataset::Conversations(c)),
        };
    }

    Err(EvalError::Dataset(
        "No prompts or conversations in dataset".to_string(),
    ))
}

/// Arena prompt loading: pull plain input strings out of a dataset file,
/// accepting `prompt`, `input`, or `question` keys, or raw strings.
pub fn load_arena_prompts(path: &str, data_root: &Path) -> Result<Vec<String>, EvalError> {
    let path = resolve_path(data_root, path);
    if !path.is_file() {
        return Err(EvalError::Dataset(format!(
            "Dataset file not found: {}",
            path.display()
        )));
    }
    let raw = std::fs::read_to_string(&path)?;
    let value: Value = serde_json::from_str(&raw)
        .map_err(|e| EvalError::Dataset(format!("Malformed dataset JSON: {e}")))?;
    let items = value
        .as_array()
        .ok_or_else(|| EvalError::Dataset("Dataset file is not a JSON list".to_string()))?;

    let prompts: Vec<String> = items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => map
                .get("input")
                .or_else(|| map.get("prompt"))
                .or_else(|| map.get("question"))
                .and_then(|v| v.as_str())
                .map(str::to_string),
            _ => None,
        })
        .filter(|p| !p.trim().is_empty())
        .collect();

    if prompts.is_empty() {
        return Err(EvalError::Dataset(
            "No prompts or conversations in dataset".to_string(),
        ));
    }
    Ok(prompts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn config(json: serde_json::Value) -> DatasetConfig {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_inline_prompts_win() {
        let cfg = config(serde_json::json!({
            "prompts": [{ "prompt": "What is 2+2?", "expected_output": "4" }],
            "path": "ignored.json"
        }));
        let dataset = load_dataset(&cfg, Path::new(".")).unwrap();
        assert!(matches!(dataset, Dataset::SingleTurn(ref p) if p.len() == 1));
    }

    #[test]
    fn test_inline_conversations_detected() {
        let cfg = config(serde_json::json!({
            "conversations": [{ "turns": [{ "role": "user", "content": "Hi" }] }]
        }));
        let dataset = load_dataset(&cfg, Path::new(".")).unwrap();
        assert!(dataset.is_conversational());
    }

    #[test]
    fn test_simulated_mode_takes_priority() {
        let cfg = config(serde_json::json!({
            "simulatedMode": true,
            "scenarios": [{ "scenario": "refund request" }],
            "prompts": [{ "prompt": "unused" }]
        }));
        match load_dataset(&cfg, Path::new(".")).unwrap() {
            Dataset::Simulated { scenarios, max_turns } => {
                assert_eq!(scenarios.len(), 1);
                assert_eq!(max_turns, DEFAULT_MAX_TURNS);
            }
            other => panic!("expected simulated dataset, got {other:?}"),
        }
    }

    #[test]
    fn test_file_detection_by_first_element() {
        let dir = tempfile::tempdir().unwrap();
        let single = dir.path().join("single.json");
        fs::write(&single, r#"[{"prompt": "q1"}, {"prompt": "q2"}]"#).unwrap();
        let convo = dir.path().join("convo.json");
        fs::write(
            &convo,
            r#"[{"turns": [{"role": "user", "content": "Hi"}]}]"#,
        )
        .unwrap();

        let cfg = config(serde_json::json!({ "path": "single.json" }));
        assert!(!load_dataset(&cfg, dir.path()).unwrap().is_conversational());

        let cfg = config(serde_json::json!({ "path": "convo.json" }));
        assert!(load_dataset(&cfg, dir.path()).unwrap().is_conversational());
    }

    #[test]
    fn test_shapeless_file_fails_with_exact_message() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("odd.json"), r#"[{"text": "nope"}]"#).unwrap();
        let cfg = config(serde_json::json!({ "path": "odd.json" }));
        let err = load_dataset(&cfg, dir.path()).unwrap_err();
        assert_eq!(err.to_string(), "No prompts or conversations in dataset");
    }

    #[test]
    fn test_non_list_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("obj.json"), r#"{"prompt": "q"}"#).unwrap();
        let cfg = config(serde_json::json!({ "path": "obj.json" }));
        let err = load_dataset(&cfg, dir.path()).unwrap_err();
        assert!(err.to_string().contains("not a JSON list"));
    }

    #[test]
    fn test_missing_file_and_empty_config_fail() {
        let cfg = config(serde_json::json!({ "path": "missing.json" }));
        let err = load_dataset(&cfg, Path::new("/nonexistent-root")).unwrap_err();
        assert!(err.to_string().contains("not found"));

        let cfg = config(serde_json::json!({}));
        let err = load_dataset(&cfg, Path::new(".")).unwrap_err();
        assert_eq!(err.to_string(), "No prompts or conversations in dataset");
    }

    #[test]
    fn test_arena_prompts_accept_multiple_key_shapes() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("arena.json"),
            r#"[{"prompt": "a"}, {"input": "b"}, {"question": "c"}, "d", {"other": 1}]"#,
        )
        .unwrap();
        let prompts = load_arena_prompts("arena.json", dir.path()).unwrap();
        assert_eq!(prompts, vec!["a", "b", "c", "d"]);
    }
}
