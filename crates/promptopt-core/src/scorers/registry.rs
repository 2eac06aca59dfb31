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

//! Explicit registration table for function scorers: name -> scoring
//! function, populated at startup. No filesystem discovery.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::{PromptOptError, PromptOptResult};

/// Input handed to a function scorer for one (row, output) pair.
pub struct EvalContext<'a> {
    pub row: &'a HashMap<String, String>,
    pub output: &'a str,
    pub config: &'a Value,
}

/// Score plus structured diagnostics from a function scorer.
#[derive(Debug, Clone)]
pub struct EvalResult {
    pub score: f64,
    pub details: Value,
}

/// A deterministic, synchronous scoring function.
pub trait EvalFunction: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn run(&self, context: &EvalContext) -> PromptOptResult<EvalResult>;
}

/// Description of a registered function, for listing endpoints.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FunctionInfo {
    pub name: String,
    pub description: String,
}

/// Name-keyed table of function scorers.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn EvalFunction>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in scoring functions.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(super::plugins::ExactMatch));
        registry.register(Arc::new(super::plugins::OutputLength));
        registry
    }

    pub fn register(&mut self, function: Arc<dyn EvalFunction>) {
        self.functions.insert(function.name().to_string(), function);
    }

    pub fn get(&self, name: &str) -> PromptOptResult<Arc<dyn EvalFunction>> {
        self.functions
            .get(name)
            .cloned()
            .ok_or_else(|| PromptOptError::FunctionNotFound {
                name: name.to_string(),
            })
    }

    pub fn list(&self) -> Vec<FunctionInfo> {
        let mut infos: Vec<FunctionInfo> = self
            .functions
            .values()
            .map(|f| FunctionInfo {
                name: f.name().to_string(),
                description: f.description().to_string(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Look up and run a function scorer for one row.
    pub fn run_function(
        &self,
        name: &str,
        row: &HashMap<String, String>,
        output: &str,
        config: &Value,
    ) -> PromptOptResult<EvalResult> {
        let function = self.get(name)?;
        function.run(&EvalContext {
            row,
            output,
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = FunctionRegistry::with_builtins();
        let names: Vec<String> = registry.list().into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["exact_match", "output_length"]);
    }

    #[test]
    fn test_unknown_function_is_lookup_error() {
        let registry = FunctionRegistry::with_builtins();
        let err = registry
            .run_function("nope", &HashMap::new(), "x", &Value::Null)
            .unwrap_err();
        assert!(matches!(
            err,
            PromptOptError::FunctionNotFound { ref name } if name == "nope"
        ));
    }
}
