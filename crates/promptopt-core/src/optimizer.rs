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

//! Reflective candidate search. Coded strictly against [`GepaAdapter`]:
//! the loop proposes component rewrites from evaluation feedback, checks
//! them on a training minibatch, and promotes a proposal only after it
//! also holds up on the validation set.

use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, info};

use crate::adapter::{Candidate, GepaAdapter, ReflectiveExample};
use crate::errors::{PromptOptError, PromptOptResult};
use crate::llm_client::{CompletionParams, LlmClient};
use crate::store::Row;

pub const DEFAULT_MINIBATCH_SIZE: usize = 3;

/// Options for one search run.
#[derive(Debug, Clone)]
pub struct OptimizeOptions {
    /// Reflection model parameters used for text proposal.
    pub reflection: CompletionParams,
    /// Budget: total per-row metric evaluations across the run.
    pub max_metric_calls: u32,
    pub minibatch_size: usize,
}

impl OptimizeOptions {
    pub fn new(reflection: CompletionParams, max_metric_calls: u32) -> Self {
        Self {
            reflection,
            max_metric_calls,
            minibatch_size: DEFAULT_MINIBATCH_SIZE,
        }
    }
}

/// Outcome of a search run.
#[derive(Debug, Clone)]
pub struct OptimizeResult {
    pub best_candidate: Candidate,
    pub best_score: f64,
    pub metric_calls: u32,
    pub iterations: u32,
}

fn fenced_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:[a-zA-Z]*\n)?(.*?)```").expect("invalid fence regex"))
}

/// Extract the proposed instruction from a reflection response: the first
/// fenced block if present, otherwise the whole response.
fn extract_proposed_text(response: &str) -> String {
    match fenced_block_re().captures(response) {
        Some(caps) => caps[1].trim().to_string(),
        None => response.trim().to_string(),
    }
}

async fn propose_new_text(
    llm: &dyn LlmClient,
    reflection: &CompletionParams,
    current_text: &str,
    examples: &[ReflectiveExample],
) -> PromptOptResult<String> {
    let examples_json = serde_json::to_string_pretty(examples)?;
    let meta_prompt = format!(
        "I provided an assistant with the following instructions to perform a task:\n\
```\n{current_text}\n```\n\n\
The following are examples of task inputs, the assistant's generated outputs, \
and feedback on how the outputs could be better:\n{examples_json}\n\n\
Write a new, improved instruction for the assistant. Keep every {{{{column}}}} \
placeholder that appears in the current instruction. Respond with only the new \
instruction, inside a ``` block."
    );

    let response = llm.completion(&meta_prompt, reflection).await?;
    let proposed = extract_proposed_text(&response);
    if proposed.is_empty() {
        return Err(PromptOptError::Optimization {
            message: "Reflection model returned an empty instruction proposal".to_string(),
        });
    }
    Ok(proposed)
}

/// Run the reflective search.
///
/// Per-row evaluations are counted against `max_metric_calls`; the loop
/// stops once the budget is spent (the iteration in flight may finish).
/// Reflection-call failures abort the search.
pub async fn optimize(
    adapter: &dyn GepaAdapter,
    seed_candidate: Candidate,
    trainset: &[Row],
    valset: &[Row],
    reflection_llm: &dyn LlmClient,
    options: &OptimizeOptions,
) -> PromptOptResult<OptimizeResult> {
    let mut metric_calls: u32 = 0;
    let mut iterations: u32 = 0;

    let seed_batch = adapter.evaluate(valset, &seed_candidate, false).await?;
    metric_calls += valset.len() as u32;
    let mut best_candidate = seed_candidate;
    let mut best_score = seed_batch.mean_score();
    info!(best_score, "seed candidate scored on validation set");

    let minibatch_size = options.minibatch_size.max(1);
    let mut offset = 0usize;

    while metric_calls < options.max_metric_calls && !trainset.is_empty() {
        iterations += 1;

        let batch: Vec<Row> = trainset
            .iter()
            .cycle()
            .skip(offset)
            .take(minibatch_size.min(trainset.len()))
            .cloned()
            .collect();
        offset = (offset + batch.len()) % trainset.len();

        let incumbent_eval = adapter.evaluate(&batch, &best_candidate, true).await?;
        metric_calls += batch.len() as u32;

        let components = adapter.components_to_update(&best_candidate);
        let reflective =
            adapter.make_reflective_dataset(&best_candidate, &incumbent_eval, &components);

        let mut proposal = best_candidate.clone();
        for component in &components {
            let current_text = proposal.get(component).cloned().unwrap_or_default();
            let examples = reflective.get(component).map(Vec::as_slice).unwrap_or(&[]);
            let new_text = propose_new_text(
                reflection_llm,
                &options.reflection,
                &current_text,
                examples,
            )
            .await?;
            proposal.insert(component.clone(), new_text);
        }

        let proposal_eval = adapter.evaluate(&batch, &proposal, false).await?;
        metric_calls += batch.len() as u32;

        debug!(
            iteration = iterations,
            incumbent = incumbent_eval.mean_score(),
            proposal = proposal_eval.mean_score(),
            metric_calls,
            "compared proposal on minibatch"
        );

        if proposal_eval.mean_score() > incumbent_eval.mean_score() {
            let proposal_val = adapter.evaluate(valset, &proposal, false).await?;
            metric_calls += valset.len() as u32;
            if proposal_val.mean_score() >= best_score {
                info!(
                    iteration = iterations,
                    val_score = proposal_val.mean_score(),
                    "promoted proposed candidate"
                );
                best_candidate = proposal;
                best_score = proposal_val.mean_score();
            }
        }
    }

    Ok(OptimizeResult {
        best_candidate,
        best_score,
        metric_calls,
        iterations,
    })
}
