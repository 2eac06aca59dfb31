/*
Copyright 2024, Zep Software, Inc.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! Prompt template rendering with `{{column}}` placeholders, plus the
//! judge prompt envelope and its `<score>` marker parser.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::errors::{PromptOptError, PromptOptResult};

const JUDGE_PROMPT_PREFIX: &str =
    "You are an expert evaluator. Please evaluate the following and provide a score.\n\n";
const JUDGE_PROMPT_SUFFIX: &str = "\n\nPlease provide your evaluation score in the following format:\n<score>NUMBER</score>\nWhere NUMBER is a numeric score (e.g., 0.5, 1.0, 2.5, etc.)";

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([^}]+)\}\}").expect("invalid placeholder regex"))
}

fn score_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)<score>\s*([+-]?\d*\.?\d+)\s*</score>").expect("invalid score regex")
    })
}

/// Render a prompt template by replacing `{{variable}}` placeholders with
/// row values. Referenced columns must exist in `available_columns`;
/// values missing from the row render as empty strings.
pub fn render_template(
    template: &str,
    row_data: &HashMap<String, String>,
    available_columns: &[String],
) -> PromptOptResult<String> {
    let referenced: Vec<String> = placeholder_re()
        .captures_iter(template)
        .map(|c| c[1].trim().to_string())
        .collect();

    let missing: Vec<String> = referenced
        .iter()
        .filter(|name| !available_columns.iter().any(|c| c == *name))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(PromptOptError::Validation {
            message: format!(
                "Prompt template references columns that don't exist: {}. Available columns: {}",
                missing.join(", "),
                available_columns.join(", ")
            ),
        });
    }

    let rendered = placeholder_re().replace_all(template, |caps: &regex::Captures| {
        let name = caps[1].trim();
        row_data.get(name).cloned().unwrap_or_default()
    });
    Ok(rendered.into_owned())
}

/// Build a complete judge prompt: render the user-authored core prompt,
/// then wrap it with the scoring instructions.
pub fn build_judge_prompt(
    core_prompt: &str,
    row_data: &HashMap<String, String>,
    available_columns: &[String],
) -> PromptOptResult<String> {
    let rendered_core = render_template(core_prompt, row_data, available_columns)?;
    Ok(format!(
        "{}{}{}",
        JUDGE_PROMPT_PREFIX, rendered_core, JUDGE_PROMPT_SUFFIX
    ))
}

/// Parse a numeric score from judge output containing `<score>NUMBER</score>`.
pub fn parse_judge_score(output: &str) -> PromptOptResult<f64> {
    let caps = score_marker_re()
        .captures(output)
        .ok_or_else(|| PromptOptError::Validation {
            message: format!(
                "No valid score found in LLM output. Expected format: <score>NUMBER</score>. Output received: {}",
                truncate(output, 200)
            ),
        })?;

    caps[1]
        .parse::<f64>()
        .map_err(|_| PromptOptError::Validation {
            message: format!("Could not parse score value: {}", &caps[1]),
        })
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_render_substitutes_placeholders() {
        let rendered = render_template(
            "Answer: {{question}} / {{ answer }}",
            &row(&[("question", "2+2?"), ("answer", "4")]),
            &cols(&["question", "answer"]),
        )
        .unwrap();
        assert_eq!(rendered, "Answer: 2+2? / 4");
    }

    #[test]
    fn test_render_missing_row_value_is_empty() {
        let rendered = render_template(
            "Q: {{question}}",
            &row(&[]),
            &cols(&["question"]),
        )
        .unwrap();
        assert_eq!(rendered, "Q: ");
    }

    #[test]
    fn test_render_unknown_column_fails() {
        let err = render_template(
            "Q: {{nope}}",
            &row(&[("question", "x")]),
            &cols(&["question"]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_judge_prompt_wraps_rendered_core() {
        let prompt = build_judge_prompt(
            "Rate {{Output}}",
            &row(&[("Output", "hello")]),
            &cols(&["Output"]),
        )
        .unwrap();
        assert!(prompt.starts_with(JUDGE_PROMPT_PREFIX));
        assert!(prompt.contains("Rate hello"));
        assert!(prompt.contains("<score>NUMBER</score>"));
    }

    #[test]
    fn test_parse_judge_score() {
        assert_eq!(parse_judge_score("ok <score>0.75</score>").unwrap(), 0.75);
        assert_eq!(parse_judge_score("<SCORE> -1.5 </SCORE>").unwrap(), -1.5);
        assert!(parse_judge_score("no marker here").is_err());
    }
}
