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

//! Heterogeneous scorer set: LLM judges and deterministic function
//! scorers behind one `score` operation. Faults are absorbed into the
//! outcome, never raised past it.

pub mod judge;
pub mod plugins;
pub mod registry;

use std::collections::HashMap;
use std::sync::Arc;

use crate::llm_client::LlmClient;
use crate::store::{FunctionEvalConfig, JudgeConfig};

pub use judge::run_judge_scorer;
pub use registry::{EvalContext, EvalFunction, EvalResult, FunctionInfo, FunctionRegistry};

/// The result of applying one scorer to one (row, output) pair.
#[derive(Debug, Clone)]
pub struct ScoreOutcome {
    pub name: String,
    /// Kind-prefixed name, unique even when a judge and a function
    /// scorer share a display name.
    pub score_key: String,
    pub score: f64,
    pub feedback: String,
    pub failed: bool,
}

/// Shared dependencies scorers draw on.
pub struct ScorerEnv {
    pub llm: Arc<dyn LlmClient>,
    pub registry: Arc<FunctionRegistry>,
    pub available_columns: Vec<String>,
}

/// A single scoring backend.
pub enum Scorer {
    Judge(JudgeConfig),
    Function(FunctionEvalConfig),
}

impl Scorer {
    pub fn name(&self) -> &str {
        match self {
            Scorer::Judge(config) => &config.name,
            Scorer::Function(config) => &config.name,
        }
    }

    pub fn is_judge(&self) -> bool {
        matches!(self, Scorer::Judge(_))
    }

    /// Key used for per-scorer scores in trajectories. Prefixed by kind
    /// so same-named judge and function scorers stay distinguishable.
    pub fn score_key(&self) -> String {
        match self {
            Scorer::Judge(config) => format!("judge_{}", config.name),
            Scorer::Function(config) => format!("function_{}", config.name),
        }
    }

    /// Score one (row, output) pair. Any failure becomes a zero score
    /// with a `failed (...)` feedback fragment for this scorer only.
    pub async fn score(
        &self,
        row_data: &HashMap<String, String>,
        output: &str,
        env: &ScorerEnv,
    ) -> ScoreOutcome {
        let result = match self {
            Scorer::Judge(config) => run_judge_scorer(
                config,
                row_data,
                output,
                &env.available_columns,
                env.llm.as_ref(),
            )
            .await
            .map(|(score, _raw)| score),
            Scorer::Function(config) => env
                .registry
                .run_function(&config.function_name, row_data, output, &config.config)
                .map(|result| result.score),
        };

        match result {
            Ok(score) => ScoreOutcome {
                name: self.name().to_string(),
                score_key: self.score_key(),
                score,
                feedback: format!("{}: {:.3}", self.name(), score),
                failed: false,
            },
            Err(e) => ScoreOutcome {
                name: self.name().to_string(),
                score_key: self.score_key(),
                score: 0.0,
                feedback: format!("{}: failed ({})", self.name(), e),
                failed: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    use crate::errors::{LlmError, LlmResult};
    use crate::llm_client::{CompletionParams, Message};

    struct FixedJudge(&'static str);

    #[async_trait]
    impl LlmClient for FixedJudge {
        async fn complete(
            &self,
            _messages: &[Message],
            _params: &CompletionParams,
        ) -> LlmResult<String> {
            Ok(self.0.to_string())
        }
    }

    struct FailingLlm;

    #[async_trait]
    impl LlmClient for FailingLlm {
        async fn complete(
            &self,
            _messages: &[Message],
            _params: &CompletionParams,
        ) -> LlmResult<String> {
            Err(LlmError::NetworkError {
                message: "connection reset".to_string(),
            })
        }
    }

    fn env(llm: Arc<dyn LlmClient>) -> ScorerEnv {
        ScorerEnv {
            llm,
            registry: Arc::new(FunctionRegistry::with_builtins()),
            available_columns: vec!["question".to_string(), "answer".to_string()],
        }
    }

    fn judge_config() -> JudgeConfig {
        JudgeConfig {
            id: 1,
            name: "accuracy".to_string(),
            prompt: "Rate {{Output}} against {{answer}}".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            max_tokens: 500,
        }
    }

    fn row() -> HashMap<String, String> {
        [("question", "2+2?"), ("answer", "4")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_judge_scorer_parses_marker() {
        let scorer = Scorer::Judge(judge_config());
        let outcome = scorer
            .score(&row(), "4", &env(Arc::new(FixedJudge("<score>0.9</score>"))))
            .await;
        assert!(!outcome.failed);
        assert_eq!(outcome.score, 0.9);
        assert_eq!(outcome.feedback, "accuracy: 0.900");
    }

    #[tokio::test]
    async fn test_judge_scorer_absorbs_llm_failure() {
        let scorer = Scorer::Judge(judge_config());
        let outcome = scorer.score(&row(), "4", &env(Arc::new(FailingLlm))).await;
        assert!(outcome.failed);
        assert_eq!(outcome.score, 0.0);
        assert!(outcome.feedback.starts_with("accuracy: failed ("));
        assert!(outcome.feedback.contains("connection reset"));
    }

    #[tokio::test]
    async fn test_judge_scorer_missing_marker_fails() {
        let scorer = Scorer::Judge(judge_config());
        let outcome = scorer
            .score(&row(), "4", &env(Arc::new(FixedJudge("looks fine to me"))))
            .await;
        assert!(outcome.failed);
        assert_eq!(outcome.score, 0.0);
    }

    #[tokio::test]
    async fn test_function_scorer_runs_registered_function() {
        let scorer = Scorer::Function(FunctionEvalConfig {
            id: 2,
            name: "match".to_string(),
            function_name: "exact_match".to_string(),
            config: json!({}),
        });
        let outcome = scorer
            .score(&row(), "4", &env(Arc::new(FixedJudge(""))))
            .await;
        assert!(!outcome.failed);
        assert_eq!(outcome.score, 1.0);
    }

    #[tokio::test]
    async fn test_function_scorer_unknown_name_fails_in_isolation() {
        let scorer = Scorer::Function(FunctionEvalConfig {
            id: 3,
            name: "mystery".to_string(),
            function_name: "does_not_exist".to_string(),
            config: json!({}),
        });
        let outcome = scorer
            .score(&row(), "4", &env(Arc::new(FixedJudge(""))))
            .await;
        assert!(outcome.failed);
        assert_eq!(outcome.score, 0.0);
        assert!(outcome.feedback.contains("mystery: failed ("));
    }
}
