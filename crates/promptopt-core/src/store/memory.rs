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

//! In-memory [`EvalStore`] implementation. Backs the server process and
//! the test suite; a SQL-backed store can replace it behind the same trait.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{
    Dataset, EvalStore, FunctionEvalConfig, JudgeConfig, NewPrompt, OptimizationConfig, Prompt,
    Row,
};
use crate::errors::{PromptOptError, PromptOptResult};

#[derive(Default)]
struct Inner {
    next_id: i64,
    datasets: HashMap<i64, Dataset>,
    rows: HashMap<i64, Vec<Row>>,
    prompts: HashMap<i64, Prompt>,
    judge_configs: HashMap<i64, JudgeConfig>,
    function_eval_configs: HashMap<i64, FunctionEvalConfig>,
    optimization_configs: HashMap<i64, OptimizationConfig>,
}

impl Inner {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Process-local store guarded by a single RwLock.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> PromptOptResult<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(|_| PromptOptError::Store {
            message: "store lock poisoned".to_string(),
        })
    }

    fn read(&self) -> PromptOptResult<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(|_| PromptOptError::Store {
            message: "store lock poisoned".to_string(),
        })
    }

    pub fn add_dataset(
        &self,
        name: impl Into<String>,
        columns: Vec<String>,
    ) -> PromptOptResult<Dataset> {
        let mut inner = self.write()?;
        let id = inner.allocate_id();
        let dataset = Dataset {
            id,
            name: name.into(),
            columns,
        };
        inner.datasets.insert(id, dataset.clone());
        inner.rows.insert(id, Vec::new());
        Ok(dataset)
    }

    pub fn add_row(
        &self,
        dataset_id: i64,
        data: HashMap<String, String>,
    ) -> PromptOptResult<Row> {
        let mut inner = self.write()?;
        let id = inner.allocate_id();
        let row = Row { id, data };
        inner
            .rows
            .entry(dataset_id)
            .or_default()
            .push(row.clone());
        Ok(row)
    }

    pub fn add_judge_config(
        &self,
        name: impl Into<String>,
        prompt: impl Into<String>,
        model: impl Into<String>,
        temperature: f32,
        max_tokens: u32,
    ) -> PromptOptResult<JudgeConfig> {
        let mut inner = self.write()?;
        let id = inner.allocate_id();
        let config = JudgeConfig {
            id,
            name: name.into(),
            prompt: prompt.into(),
            model: model.into(),
            temperature,
            max_tokens,
        };
        inner.judge_configs.insert(id, config.clone());
        Ok(config)
    }

    pub fn add_function_eval_config(
        &self,
        name: impl Into<String>,
        function_name: impl Into<String>,
        config: Value,
    ) -> PromptOptResult<FunctionEvalConfig> {
        let mut inner = self.write()?;
        let id = inner.allocate_id();
        let record = FunctionEvalConfig {
            id,
            name: name.into(),
            function_name: function_name.into(),
            config,
        };
        inner.function_eval_configs.insert(id, record.clone());
        Ok(record)
    }

    pub fn add_optimization_config(
        &self,
        mut config: OptimizationConfig,
    ) -> PromptOptResult<OptimizationConfig> {
        let mut inner = self.write()?;
        config.id = inner.allocate_id();
        inner.optimization_configs.insert(config.id, config.clone());
        Ok(config)
    }
}

#[async_trait]
impl EvalStore for MemoryStore {
    async fn get_dataset(&self, id: i64) -> PromptOptResult<Option<Dataset>> {
        Ok(self.read()?.datasets.get(&id).cloned())
    }

    async fn get_rows(&self, dataset_id: i64) -> PromptOptResult<Vec<Row>> {
        Ok(self.read()?.rows.get(&dataset_id).cloned().unwrap_or_default())
    }

    async fn get_prompt(&self, id: i64) -> PromptOptResult<Option<Prompt>> {
        Ok(self.read()?.prompts.get(&id).cloned())
    }

    async fn list_prompt_chain(&self, root_id: i64) -> PromptOptResult<Vec<Prompt>> {
        let inner = self.read()?;
        let mut chain: Vec<Prompt> = inner
            .prompts
            .values()
            .filter(|p| p.id == root_id || p.parent_prompt_id == Some(root_id))
            .cloned()
            .collect();
        chain.sort_by_key(|p| p.version);
        Ok(chain)
    }

    async fn create_prompt(&self, prompt: NewPrompt) -> PromptOptResult<Prompt> {
        let mut inner = self.write()?;
        let id = inner.allocate_id();
        let record = Prompt {
            id,
            name: prompt.name,
            system_prompt: prompt.system_prompt,
            user_message_column: prompt.user_message_column,
            dataset_id: prompt.dataset_id,
            parent_prompt_id: prompt.parent_prompt_id,
            version: prompt.version,
            commit_message: prompt.commit_message,
            created_at: Utc::now(),
        };
        inner.prompts.insert(id, record.clone());
        Ok(record)
    }

    async fn get_judge_configs(&self, ids: &[i64]) -> PromptOptResult<Vec<JudgeConfig>> {
        let inner = self.read()?;
        Ok(ids
            .iter()
            .filter_map(|id| inner.judge_configs.get(id).cloned())
            .collect())
    }

    async fn get_function_eval_configs(
        &self,
        ids: &[i64],
    ) -> PromptOptResult<Vec<FunctionEvalConfig>> {
        let inner = self.read()?;
        Ok(ids
            .iter()
            .filter_map(|id| inner.function_eval_configs.get(id).cloned())
            .collect())
    }

    async fn get_optimization_config(
        &self,
        id: i64,
    ) -> PromptOptResult<Option<OptimizationConfig>> {
        Ok(self.read()?.optimization_configs.get(&id).cloned())
    }
}
