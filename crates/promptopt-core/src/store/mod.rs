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

//! Collaborator storage interfaces. Dataset/prompt/scorer-config CRUD
//! lives outside this crate; the optimizer consumes it through the
//! [`EvalStore`] trait and the record types below.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::errors::{PromptOptError, PromptOptResult};

pub use memory::MemoryStore;

/// A dataset: a named table of flat string rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id: i64,
    pub name: String,
    pub columns: Vec<String>,
}

/// One dataset row. Immutable during optimization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row {
    pub id: i64,
    pub data: HashMap<String, String>,
}

/// A versioned prompt. Versions form a linear chain under a root prompt:
/// the root has no parent, every later version points back at the root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    pub id: i64,
    pub name: String,
    pub system_prompt: String,
    pub user_message_column: Option<String>,
    pub dataset_id: i64,
    pub parent_prompt_id: Option<i64>,
    pub version: i32,
    pub commit_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields for creating a new prompt version.
#[derive(Debug, Clone)]
pub struct NewPrompt {
    pub name: String,
    pub system_prompt: String,
    pub user_message_column: Option<String>,
    pub dataset_id: i64,
    pub parent_prompt_id: Option<i64>,
    pub version: i32,
    pub commit_message: Option<String>,
}

/// LLM-judge scorer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeConfig {
    pub id: i64,
    pub name: String,
    pub prompt: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Deterministic function scorer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionEvalConfig {
    pub id: i64,
    pub name: String,
    pub function_name: String,
    pub config: Value,
}

/// Configuration for one optimization run. Created and updated by the
/// external CRUD layer; consumed read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationConfig {
    pub id: i64,
    pub dataset_id: i64,
    pub name: String,
    pub base_prompt_id: i64,
    pub judge_config_ids: Vec<i64>,
    pub function_eval_config_ids: Vec<i64>,
    pub generator_model: String,
    pub generator_temperature: f32,
    pub generator_max_tokens: u32,
    pub reflection_model: String,
    pub reflection_temperature: f32,
    pub reflection_max_tokens: u32,
    pub max_metric_calls: u32,
    pub created_at: DateTime<Utc>,
}

/// Storage operations the optimizer depends on.
#[async_trait]
pub trait EvalStore: Send + Sync {
    async fn get_dataset(&self, id: i64) -> PromptOptResult<Option<Dataset>>;

    async fn get_rows(&self, dataset_id: i64) -> PromptOptResult<Vec<Row>>;

    async fn get_prompt(&self, id: i64) -> PromptOptResult<Option<Prompt>>;

    /// All prompts in one version chain: the root plus every version
    /// parented to it.
    async fn list_prompt_chain(&self, root_id: i64) -> PromptOptResult<Vec<Prompt>>;

    async fn create_prompt(&self, prompt: NewPrompt) -> PromptOptResult<Prompt>;

    async fn get_judge_configs(&self, ids: &[i64]) -> PromptOptResult<Vec<JudgeConfig>>;

    async fn get_function_eval_configs(
        &self,
        ids: &[i64],
    ) -> PromptOptResult<Vec<FunctionEvalConfig>>;

    async fn get_optimization_config(
        &self,
        id: i64,
    ) -> PromptOptResult<Option<OptimizationConfig>>;
}

/// Find the root of a prompt's version chain by walking parent links.
pub async fn root_prompt_id(store: &dyn EvalStore, prompt_id: i64) -> PromptOptResult<i64> {
    let mut current_id = prompt_id;
    let mut current = store.get_prompt(current_id).await?;
    while let Some(prompt) = current {
        match prompt.parent_prompt_id {
            Some(parent_id) => {
                current_id = parent_id;
                current = store.get_prompt(parent_id).await?;
            }
            None => break,
        }
    }
    Ok(current_id)
}

/// Next version number in a chain: max existing version + 1, starting at 1.
pub async fn next_prompt_version(store: &dyn EvalStore, root_id: i64) -> PromptOptResult<i32> {
    let chain = store.list_prompt_chain(root_id).await?;
    let max_version = chain.iter().map(|p| p.version).max().unwrap_or(0);
    Ok(max_version + 1)
}

/// Load a prompt or fail with a typed not-found error.
pub async fn require_prompt(store: &dyn EvalStore, id: i64) -> PromptOptResult<Prompt> {
    store
        .get_prompt(id)
        .await?
        .ok_or(PromptOptError::PromptNotFound { id })
}
