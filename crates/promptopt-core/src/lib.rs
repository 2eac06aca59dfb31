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

//! # PromptOpt Core
//!
//! Reflective prompt optimization for LLM evaluation pipelines: score a
//! base prompt against a dataset with judge and function scorers, let a
//! reflection model propose improved variants, and persist the winner as
//! a new prompt version.

pub mod adapter;
pub mod errors;
pub mod llm_client;
pub mod optimizer;
pub mod progress;
pub mod runner;
pub mod scorers;
pub mod store;
pub mod template;

// Re-export commonly used types
pub use errors::{LlmError, PromptOptError, PromptOptResult};

// Re-export traits
pub use adapter::GepaAdapter;
pub use llm_client::LlmClient;
pub use scorers::EvalFunction;
pub use store::EvalStore;

// Re-export concrete types
pub use adapter::{
    seed_candidate, Candidate, EvalsBackedAdapter, EvaluationBatch, GenerationSettings,
    ReflectiveExample, Trajectory, SYSTEM_PROMPT_COMPONENT,
};
pub use llm_client::{CompletionParams, LlmConfig, Message, OpenAiClient};
pub use optimizer::{optimize, OptimizeOptions, OptimizeResult};
pub use progress::{ProgressRecord, ProgressTracker, ProgressUpdate, RunStatus};
pub use runner::{run_gepa, GepaRunOutcome, VALIDATION_FRACTION};
pub use scorers::{FunctionRegistry, Scorer, ScorerEnv};
pub use store::{MemoryStore, OptimizationConfig};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exports() {
        // This test ensures that all the main exports are available
        // and can be used together
        let _config = LlmConfig::default();
        let _tracker = ProgressTracker::new();
        let _registry = FunctionRegistry::with_builtins();
    }
}
