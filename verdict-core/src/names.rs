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

//! Metric name tables.
//!
//! Built-in metrics have three names: a snake_case config key, a
//! human-readable display name emitted by the dispatcher, and a stable
//! camelCase key under which averages and per-sample scores are stored.
//! These tables are the single source of truth for the mapping; unmapped
//! display names pass through unchanged.

/// One built-in metric's naming triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricName {
    pub key: &'static str,
    pub display: &'static str,
    pub camel: &'static str,
}

/// Single-turn metric names: universal core, then RAG-only, then agent-only.
pub const METRIC_NAMES: &[MetricName] = &[
    MetricName { key: "answer_relevancy", display: "Relevance", camel: "answerRelevancy" },
    MetricName { key: "correctness", display: "Correctness", camel: "correctness" },
    MetricName { key: "completeness", display: "Completeness", camel: "completeness" },
    MetricName { key: "hallucination", display: "Hallucination", camel: "hallucination" },
    MetricName { key: "instruction_following", display: "Instruction Following", camel: "instructionFollowing" },
    MetricName { key: "toxicity", display: "Toxicity", camel: "toxicity" },
    MetricName { key: "bias", display: "Bias", camel: "bias" },
    MetricName { key: "context_relevancy", display: "Context Relevancy", camel: "contextRelevancy" },
    MetricName { key: "context_precision", display: "Context Precision", camel: "contextPrecision" },
    MetricName { key: "context_recall", display: "Context Recall", camel: "contextRecall" },
    MetricName { key: "faithfulness", display: "Faithfulness", camel: "faithfulness" },
    MetricName { key: "tool_selection", display: "Tool Selection", camel: "toolSelection" },
    MetricName { key: "tool_correctness", display: "Tool Correctness", camel: "toolCorrectness" },
    MetricName { key: "action_relevance", display: "Action Relevance", camel: "actionRelevance" },
    MetricName { key: "planning_quality", display: "Planning Quality", camel: "planningQuality" },
];

/// Conversational runs reuse the universal config keys under
/// conversation-specific names. `toxicity` and `bias` are combined into a
/// single safety metric.
pub const CONVERSATIONAL_METRIC_NAMES: &[MetricName] = &[
    MetricName { key: "answer_relevancy", display: "Turn Relevancy", camel: "turnRelevancy" },
    MetricName { key: "correctness", display: "Conversation Coherence", camel: "conversationCoherence" },
    MetricName { key: "instruction_following", display: "Conversation Helpfulness", camel: "conversationHelpfulness" },
    MetricName { key: "toxicity", display: "Conversation Safety", camel: "conversationSafety" },
    MetricName { key: "bias", display: "Conversation Safety", camel: "conversationSafety" },
    MetricName { key: "task_completion", display: "Task Completion", camel: "taskCompletion" },
];

/// Universal core metric keys, enabled for every task type.
pub const UNIVERSAL_KEYS: &[&str] = &[
    "answer_relevancy",
    "correctness",
    "completeness",
    "hallucination",
    "instruction_following",
    "toxicity",
    "bias",
];

/// RAG-only metric keys; skipped when no retrieval context is present.
pub const RAG_KEYS: &[&str] = &[
    "context_relevancy",
    "context_precision",
    "context_recall",
    "faithfulness",
];

/// Agent-only metric keys.
pub const AGENT_KEYS: &[&str] = &[
    "tool_selection",
    "tool_correctness",
    "action_relevance",
    "planning_quality",
];

/// Look up a single-turn metric by its snake_case config key.
pub fn metric_names(key: &str) -> Option<&'static MetricName> {
    METRIC_NAMES.iter().find(|m| m.key == key)
}

/// Look up the conversational naming for a config key, if any.
pub fn conversational_metric_names(key: &str) -> Option<&'static MetricName> {
    CONVERSATIONAL_METRIC_NAMES.iter().find(|m| m.key == key)
}

/// Map a display name to its stable camelCase key. Conversational runs use
/// the conversational table first. Unmapped names pass through unchanged.
pub fn display_to_camel(display: &str, conversational: bool) -> String {
    if conversational {
        if let Some(m) = CONVERSATIONAL_METRIC_NAMES.iter().find(|m| m.display == display) {
            return m.camel.to_string();
        }
    }
    METRIC_NAMES
        .iter()
        .find(|m| m.display == display)
        .map(|m| m.camel.to_string())
        .unwrap_or_else(|| display.to_string())
}
