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

use std::collections::HashMap;

use crate::errors::{PromptOptError, PromptOptResult};
use crate::llm_client::{CompletionParams, LlmClient};
use crate::store::JudgeConfig;
use crate::template::{build_judge_prompt, parse_judge_score};

/// Column name under which the generated output is exposed to judge
/// prompt templates.
pub const OUTPUT_COLUMN: &str = "Output";

/// Run one LLM-judge evaluation against a generated output.
///
/// The judge template sees the row columns plus the `Output` column. The
/// model response must carry a `<score>NUMBER</score>` marker; a missing
/// marker is an error the caller absorbs into that scorer's contribution.
pub async fn run_judge_scorer(
    config: &JudgeConfig,
    row_data: &HashMap<String, String>,
    output: &str,
    available_columns: &[String],
    llm: &dyn LlmClient,
) -> PromptOptResult<(f64, String)> {
    let mut row_with_output = row_data.clone();
    row_with_output.insert(OUTPUT_COLUMN.to_string(), output.to_string());

    let mut columns_with_output = available_columns.to_vec();
    if !columns_with_output.iter().any(|c| c == OUTPUT_COLUMN) {
        columns_with_output.push(OUTPUT_COLUMN.to_string());
    }

    let complete_prompt =
        build_judge_prompt(&config.prompt, &row_with_output, &columns_with_output)?;

    let params = CompletionParams::new(config.model.clone())
        .with_temperature(config.temperature)
        .with_max_tokens(config.max_tokens);

    let raw_output = llm.completion(&complete_prompt, &params).await?;
    if raw_output.trim().is_empty() {
        return Err(PromptOptError::Validation {
            message: "LLM returned empty output".to_string(),
        });
    }

    let score = parse_judge_score(&raw_output)?;
    Ok((score, raw_output))
}
