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

//! Judge prompt construction and response parsing for arena comparisons.

use std::collections::HashMap;
use verdict_core::{ArenaContestantResult, ArenaPromptResult};

/// Judge provider inferred from the judge model's name; unknown names
/// default to OpenAI.
pub fn infer_judge_provider(judge_model: &str) -> &'static str {
    let lower = judge_model.to_lowercase();
    if lower.contains("claude") {
        "anthropic"
    } else if lower.contains("gemini") {
        "google"
    } else if lower.contains("mistral") || lower.contains("magistral") {
        "mistral"
    } else if lower.contains("grok") {
        "xai"
    } else {
        "openai"
    }
}

/// The structured scoring prompt: the question, every contestant's
/// labeled response, the criteria list, and a strict JSON skeleton the
/// judge must fill in.
pub fn build_scoring_prompt(
    input: &str,
    responses: &[(String, String)],
    criteria: &[String],
) -> String {
    let mut prompt = format!(
        "You are an expert judge evaluating AI assistant responses.\n\n\
         **User Question/Prompt:**\n{input}\n\n\
         **Responses to evaluate:**\n"
    );
    for (name, output) in responses {
        prompt.push_str(&format!("\n--- {name} ---\n{output}\n"));
    }

    prompt.push_str(&format!(
        "\n**Evaluation Criteria:** {}\n\n\
         **Task:**\nScore each response on each criterion from 1-10 (10 being best).\n\
         Then determine the overall winner.\n\n\
         Respond in EXACTLY this JSON format:\n{{\n  \"scores\": {{\n",
        criteria.join(", ")
    ));
    for (i, (name, _)) in responses.iter().enumerate() {
        let fields = criteria
            .iter()
            .map(|c| format!("\"{c}\": 0"))
            .collect::<Vec<_>>()
            .join(", ");
        prompt.push_str(&format!("    \"{name}\": {{{fields}}}"));
        if i < responses.len() - 1 {
            prompt.push(',');
        }
        prompt.push('\n');
    }
    prompt.push_str(
        "  },\n  \"winner\": \"<name of best response or TIE>\",\n  \"reasoning\": \"<brief explanation>\"\n}\n\nIMPORTANT: Respond with ONLY the JSON, no other text.",
    );
    prompt
}

/// Extract the first top-level JSON object from `raw` using balanced
/// brace matching (string- and escape-aware).
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let bytes = raw.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse the judge reply into `(scores, winner, reasoning)`. On JSON
/// failure, fall back to matching any contestant name in the raw text.
pub fn parse_judge_response(
    raw: &str,
    contestant_names: &[String],
) -> (
    HashMap<String, HashMap<String, f64>>,
    Option<String>,
    Option<String>,
) {
    if let Some(json_text) = extract_json_object(raw) {
        if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(json_text) {
            let mut scores = HashMap::new();
            if let Some(score_map) = parsed["scores"].as_object() {
                for (name, criteria) in score_map {
                    if let Some(criteria) = criteria.as_object() {
                        let per_criterion: HashMap<String, f64> = criteria
                            .iter()
                            .filter_map(|(k, v)| v.as_f64().map(|s| (k.clone(), s)))
                            .collect();
                        scores.insert(name.clone(), per_criterion);
                    }
                }
            }
            let winner = parsed["winner"]
                .as_str()
                .map(|w| w.trim().to_string())
                .filter(|w| !w.is_empty());
            let reasoning = parsed["reasoning"]
                .as_str()
                .map(str::to_string)
                .filter(|r| !r.is_empty());
            return (scores, winner, reasoning);
        }
    }

    // Fallback: infer a winner by naming.
    let lower = raw.to_lowercase();
    let winner = contestant_names
        .iter()
        .find(|name| lower.contains(&name.to_lowercase()))
        .cloned();
    (HashMap::new(), winner, None)
}

/// Validate a claimed winner against the known contestant names
/// (case-insensitive substring match); `TIE` and unknown names produce
/// `None`.
pub fn validate_winner(winner: Option<&str>, contestant_names: &[String]) -> Option<String> {
    let winner = winner?.trim();
    if winner.is_empty() || winner.eq_ignore_ascii_case("tie") {
        return None;
    }
    if contestant_names.iter().any(|n| n == winner) {
        return Some(winner.to_string());
    }
    let lower = winner.to_lowercase();
    contestant_names
        .iter()
        .find(|n| lower.contains(&n.to_lowercase()))
        .cloned()
}

/// Overall winner: the contestant with the max wins, or `"Tie: A, B"`
/// when several share the max. Iterates in contestant order so the tie
/// listing is deterministic.
pub fn overall_winner(
    contestant_names: &[String],
    win_counts: &HashMap<String, u32>,
) -> Option<String> {
    let max_wins = contestant_names
        .iter()
        .filter_map(|n| win_counts.get(n))
        .max()
        .copied()?;
    let leaders: Vec<&str> = contestant_names
        .iter()
        .filter(|n| win_counts.get(*n).copied() == Some(max_wins))
        .map(|n| n.as_str())
        .collect();
    match leaders.as_slice() {
        [] => None,
        [single] => Some(single.to_string()),
        many => Some(format!("Tie: {}", many.join(", "))),
    }
}

/// Assemble one prompt's detailed result row.
pub fn prompt_result(
    idx: usize,
    input: &str,
    winner: Option<String>,
    reason: Option<String>,
    responses: Vec<(String, String)>,
    criteria: &[String],
    scores: &HashMap<String, HashMap<String, f64>>,
) -> ArenaPromptResult {
    let contestants = responses
        .into_iter()
        .map(|(name, response)| {
            let scores = scores.get(&name).cloned();
            ArenaContestantResult {
                name,
                response,
                scores,
            }
        })
        .collect();
    ArenaPromptResult {
        test_case_index: idx,
        input: input.to_string(),
        winner,
        reason,
        contestants,
        criteria: criteria.to_vec(),
    }
}
