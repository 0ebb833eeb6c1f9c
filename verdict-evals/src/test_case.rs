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

//! Materialized test cases consumed by the metric dispatcher.

use serde::{Deserialize, Serialize};
use verdict_core::{Role, Turn};

/// One scored unit: a generated input/output pair, or a materialized
/// conversation transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TestCase {
    SingleTurn {
        input: String,
        actual_output: String,
        #[serde(default)]
        expected_output: Option<String>,
        #[serde(default)]
        retrieval_context: Option<Vec<String>>,
    },
    Conversational {
        turns: Vec<Turn>,
        #[serde(default)]
        scenario: Option<String>,
        #[serde(default)]
        expected_outcome: Option<String>,
    },
}

impl TestCase {
    pub fn is_conversational(&self) -> bool {
        matches!(self, TestCase::Conversational { .. })
    }

    /// Whether any retrieval context is attached (single-turn only).
    pub fn has_retrieval_context(&self) -> bool {
        match self {
            TestCase::SingleTurn {
                retrieval_context, ..
            } => retrieval_context
                .as_ref()
                .map(|c| c.iter().any(|p| !p.trim().is_empty()))
                .unwrap_or(false),
            TestCase::Conversational { .. } => false,
        }
    }

    /// Input view for scorers and result previews: the prompt, or the
    /// user side of the transcript.
    pub fn input_text(&self) -> String {
        match self {
            TestCase::SingleTurn { input, .. } => input.clone(),
            TestCase::Conversational { turns, .. } => turns
                .iter()
                .filter(|t| t.role == Role::User)
                .map(|t| format!("User: {}", t.content))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Output view: the generation, or the assistant side of the
    /// transcript.
    pub fn output_text(&self) -> String {
        match self {
            TestCase::SingleTurn { actual_output, .. } => actual_output.clone(),
            TestCase::Conversational { turns, .. } => turns
                .iter()
                .filter(|t| t.role == Role::Assistant)
                .map(|t| format!("Assistant: {}", t.content))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn expected_text(&self) -> Option<String> {
        match self {
            TestCase::SingleTurn {
                expected_output, ..
            } => expected_output.clone(),
            TestCase::Conversational {
                expected_outcome, ..
            } => expected_outcome.clone(),
        }
    }

    /// Full transcript rendering for conversational judge prompts.
    pub fn transcript(&self) -> String {
        match self {
            TestCase::SingleTurn {
                input,
                actual_output,
                ..
            } => format!("User: {input}\nAssistant: {actual_output}"),
            TestCase::Conversational { turns, .. } => turns
                .iter()
                .map(|t| match t.role {
                    Role::User => format!("User: {}", t.content),
                    Role::Assistant => format!("Assistant: {}", t.content),
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}
