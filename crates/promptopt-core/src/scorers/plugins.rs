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

//! Built-in function scorers.

use serde_json::json;

use super::registry::{EvalContext, EvalFunction, EvalResult};
use crate::errors::PromptOptResult;

/// Exact string match between the output and an answer column.
/// Returns 1 on match, 0 otherwise. The column defaults to `answer` and
/// can be overridden with the `answer_column` config key.
pub struct ExactMatch;

impl EvalFunction for ExactMatch {
    fn name(&self) -> &'static str {
        "exact_match"
    }

    fn description(&self) -> &'static str {
        "Compares output to the answer column. Returns 1 if exact match, 0 otherwise."
    }

    fn run(&self, context: &EvalContext) -> PromptOptResult<EvalResult> {
        let answer_column = context
            .config
            .get("answer_column")
            .and_then(|v| v.as_str())
            .unwrap_or("answer");

        let Some(expected) = context.row.get(answer_column) else {
            return Ok(EvalResult {
                score: 0.0,
                details: json!({
                    "reason": format!("Answer column '{}' not found in row data", answer_column),
                    "available_columns": context.row.keys().collect::<Vec<_>>(),
                }),
            });
        };

        let output = context.output.trim();
        let expected = expected.trim();
        let is_match = output == expected;

        Ok(EvalResult {
            score: if is_match { 1.0 } else { 0.0 },
            details: json!({
                "expected": expected,
                "output": output,
                "match": is_match,
                "answer_column": answer_column,
            }),
        })
    }
}

/// Scores outputs by character length, normalized to 0-1 against a cap.
/// The cap defaults to 1000 characters (`max_length` config key).
pub struct OutputLength;

impl EvalFunction for OutputLength {
    fn name(&self) -> &'static str {
        "output_length"
    }

    fn description(&self) -> &'static str {
        "Scores outputs based on their character length (0-1 scale)"
    }

    fn run(&self, context: &EvalContext) -> PromptOptResult<EvalResult> {
        if context.output.trim().is_empty() {
            return Ok(EvalResult {
                score: 0.0,
                details: json!({"reason": "Output is empty"}),
            });
        }

        let max_length = context
            .config
            .get("max_length")
            .and_then(|v| v.as_u64())
            .unwrap_or(1000)
            .max(1) as f64;

        let length = context.output.chars().count() as f64;
        let score = (length / max_length).min(1.0);

        Ok(EvalResult {
            score,
            details: json!({
                "length": length,
                "max_length": max_length,
                "normalized_score": score,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::collections::HashMap;

    fn row(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_exact_match_scores() {
        let data = row(&[("answer", "42")]);
        let ctx = EvalContext {
            row: &data,
            output: " 42 ",
            config: &Value::Null,
        };
        assert_eq!(ExactMatch.run(&ctx).unwrap().score, 1.0);

        let ctx = EvalContext {
            row: &data,
            output: "43",
            config: &Value::Null,
        };
        assert_eq!(ExactMatch.run(&ctx).unwrap().score, 0.0);
    }

    #[test]
    fn test_exact_match_custom_column() {
        let data = row(&[("expected", "yes")]);
        let config = json!({"answer_column": "expected"});
        let ctx = EvalContext {
            row: &data,
            output: "yes",
            config: &config,
        };
        assert_eq!(ExactMatch.run(&ctx).unwrap().score, 1.0);
    }

    #[test]
    fn test_exact_match_missing_column_scores_zero() {
        let data = row(&[("question", "?")]);
        let ctx = EvalContext {
            row: &data,
            output: "anything",
            config: &Value::Null,
        };
        let result = ExactMatch.run(&ctx).unwrap();
        assert_eq!(result.score, 0.0);
        assert!(result.details["reason"]
            .as_str()
            .unwrap()
            .contains("not found"));
    }

    #[test]
    fn test_output_length_normalizes() {
        let data = row(&[]);
        let config = json!({"max_length": 10});
        let ctx = EvalContext {
            row: &data,
            output: "12345",
            config: &config,
        };
        assert_eq!(OutputLength.run(&ctx).unwrap().score, 0.5);

        let ctx = EvalContext {
            row: &data,
            output: "12345678901234",
            config: &config,
        };
        assert_eq!(OutputLength.run(&ctx).unwrap().score, 1.0);

        let ctx = EvalContext {
            row: &data,
            output: "   ",
            config: &config,
        };
        assert_eq!(OutputLength.run(&ctx).unwrap().score, 0.0);
    }
}
