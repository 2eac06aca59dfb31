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

//! The optimization driver: validate config and data, split rows, run
//! the reflective search through the adapter, re-score the winner on the
//! validation set, and persist it as a new prompt version.

use rand::seq::SliceRandom;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::adapter::{
    seed_candidate, EvalsBackedAdapter, GenerationSettings, GepaAdapter, SYSTEM_PROMPT_COMPONENT,
};
use crate::errors::{PromptOptError, PromptOptResult};
use crate::llm_client::{CompletionParams, LlmClient};
use crate::optimizer::{optimize, OptimizeOptions};
use crate::progress::{ProgressTracker, ProgressUpdate, RunStatus};
use crate::scorers::{FunctionRegistry, Scorer, ScorerEnv};
use crate::store::{
    next_prompt_version, require_prompt, root_prompt_id, EvalStore, NewPrompt, OptimizationConfig,
};

/// Share of rows held out for validation. Rounded down, but at least one
/// row is always held out.
pub const VALIDATION_FRACTION: f64 = 0.2;

/// Synchronous result of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct GepaRunOutcome {
    pub best_prompt: String,
    pub new_prompt_id: i64,
    pub score: f64,
    pub logs: String,
}

/// Run the full optimization for one config.
///
/// Any failure is written to the progress tracker as an `error` status
/// before being returned, so background callers observe it through the
/// progress channel.
#[instrument(skip_all, fields(config_id = config.id))]
pub async fn run_gepa(
    store: &dyn EvalStore,
    llm: Arc<dyn LlmClient>,
    registry: Arc<FunctionRegistry>,
    progress: &ProgressTracker,
    config: &OptimizationConfig,
) -> PromptOptResult<GepaRunOutcome> {
    let config_id = config.id;

    // Initialize progress before doing any work. A single reset keeps
    // the record visible to concurrent readers throughout.
    progress.reset(
        config_id,
        ProgressUpdate::new()
            .status(RunStatus::Running)
            .current_iteration(0)
            .max_iterations(config.max_metric_calls)
            .message("Starting GEPA optimization..."),
    );

    match run_gepa_inner(store, llm, registry, progress, config).await {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            progress.set_error(config_id, format!("Optimization failed: {}", e));
            Err(e)
        }
    }
}

async fn run_gepa_inner(
    store: &dyn EvalStore,
    llm: Arc<dyn LlmClient>,
    registry: Arc<FunctionRegistry>,
    progress: &ProgressTracker,
    config: &OptimizationConfig,
) -> PromptOptResult<GepaRunOutcome> {
    let config_id = config.id;

    // -- validating --------------------------------------------------------
    let dataset = store
        .get_dataset(config.dataset_id)
        .await?
        .ok_or(PromptOptError::DatasetNotFound {
            id: config.dataset_id,
        })?;

    let base_prompt = require_prompt(store, config.base_prompt_id).await?;
    if base_prompt.system_prompt.trim().is_empty() {
        return Err(PromptOptError::Config {
            message: format!("Base prompt {} has no system prompt", base_prompt.id),
        });
    }

    let judge_configs = store.get_judge_configs(&config.judge_config_ids).await?;
    let function_configs = store
        .get_function_eval_configs(&config.function_eval_config_ids)
        .await?;
    // Re-checked at run time: configs are mutable after creation.
    if judge_configs.is_empty() && function_configs.is_empty() {
        return Err(PromptOptError::Config {
            message: "At least one judge config or function eval config must be provided"
                .to_string(),
        });
    }

    let mut all_rows = store.get_rows(config.dataset_id).await?;
    if all_rows.is_empty() {
        return Err(PromptOptError::EmptyDataset {
            id: config.dataset_id,
        });
    }

    // -- running -----------------------------------------------------------
    all_rows.shuffle(&mut rand::thread_rng());
    let val_cut = ((VALIDATION_FRACTION * all_rows.len() as f64) as usize).max(1);
    let valset = all_rows[..val_cut].to_vec();
    let trainset = all_rows[val_cut..].to_vec();
    info!(
        train = trainset.len(),
        validation = valset.len(),
        "split dataset rows"
    );

    let mut scorers: Vec<Scorer> = judge_configs.into_iter().map(Scorer::Judge).collect();
    scorers.extend(function_configs.into_iter().map(Scorer::Function));

    let adapter = EvalsBackedAdapter::new(
        config_id,
        GenerationSettings {
            model: config.generator_model.clone(),
            temperature: config.generator_temperature,
            max_tokens: config.generator_max_tokens,
        },
        base_prompt.user_message_column.clone(),
        scorers,
        ScorerEnv {
            llm: llm.clone(),
            registry,
            available_columns: dataset.columns.clone(),
        },
        progress.clone(),
    );

    progress.update(
        config_id,
        ProgressUpdate::new().message(format!(
            "Running optimization (max {} metric calls)...",
            config.max_metric_calls
        )),
    );

    let options = OptimizeOptions::new(
        CompletionParams::new(config.reflection_model.clone())
            .with_temperature(config.reflection_temperature)
            .with_max_tokens(config.reflection_max_tokens),
        config.max_metric_calls,
    );
    let result = optimize(
        &adapter,
        seed_candidate(base_prompt.system_prompt.clone()),
        &trainset,
        &valset,
        llm.as_ref(),
        &options,
    )
    .await?;

    // -- scoring_final -----------------------------------------------------
    let best_prompt = result
        .best_candidate
        .get(SYSTEM_PROMPT_COMPONENT)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .ok_or_else(|| PromptOptError::Optimization {
            message: "Optimization did not produce a valid prompt".to_string(),
        })?;

    progress.update(
        config_id,
        ProgressUpdate::new().message("Calculating final validation score..."),
    );

    // The score reported by the search may come from a training batch;
    // report the validation-set score instead.
    let val_batch = adapter
        .evaluate(&valset, &result.best_candidate, false)
        .await?;
    let best_score = val_batch.mean_score();

    progress.update(
        config_id,
        ProgressUpdate::new()
            .best_score(best_score)
            .message(format!("Final validation score: {:.3}", best_score)),
    );

    // -- persisting --------------------------------------------------------
    let root_id = root_prompt_id(store, config.base_prompt_id).await?;
    let root_prompt = require_prompt(store, root_id).await?;
    let version = next_prompt_version(store, root_id).await?;

    let new_prompt = store
        .create_prompt(NewPrompt {
            name: root_prompt.name.clone(),
            system_prompt: best_prompt.clone(),
            user_message_column: base_prompt.user_message_column.clone(),
            dataset_id: config.dataset_id,
            parent_prompt_id: Some(root_id),
            version,
            commit_message: Some(format!(
                "GEPA optimized via {} (eval score: {:.3})",
                config.name, best_score
            )),
        })
        .await
        .map_err(|e| PromptOptError::Persistence {
            message: format!("Failed to save optimized prompt: {}", e),
        })?;

    // Verify the write before declaring success.
    let saved = require_prompt(store, new_prompt.id).await?;
    if saved.system_prompt != best_prompt {
        return Err(PromptOptError::Persistence {
            message: "Failed to save optimized prompt content correctly - content mismatch detected"
                .to_string(),
        });
    }

    // -- completed ---------------------------------------------------------
    progress.set_complete(
        config_id,
        best_score,
        format!(
            "Optimization completed. Best score: {:.3}. Created prompt version {}.",
            best_score, version
        ),
        Some(new_prompt.id),
    );

    Ok(GepaRunOutcome {
        best_prompt,
        new_prompt_id: new_prompt.id,
        score: best_score,
        logs: format!("Optimization completed. Best score: {:.3}", best_score),
    })
}
