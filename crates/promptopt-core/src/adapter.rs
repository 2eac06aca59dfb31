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

//! The evaluation adapter: the contract boundary the reflective search
//! loop is coded against. Generation and scoring faults for a single row
//! or scorer are absorbed into scores and feedback; `evaluate` only
//! fails for batch-level setup errors.

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;

use crate::errors::{PromptOptError, PromptOptResult};
use crate::llm_client::CompletionParams;
use crate::progress::{ProgressTracker, ProgressUpdate};
use crate::scorers::{Scorer, ScorerEnv};
use crate::store::Row;
use crate::template::render_template;

/// The single mutable component of a candidate.
pub const SYSTEM_PROMPT_COMPONENT: &str = "system_prompt";

/// A proposed prompt variant: component name -> component text.
pub type Candidate = HashMap<String, String>;

/// Build a candidate holding only the system-prompt component.
pub fn seed_candidate(system_prompt: impl Into<String>) -> Candidate {
    HashMap::from([(SYSTEM_PROMPT_COMPONENT.to_string(), system_prompt.into())])
}

/// Per-row record of what happened during one evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct Trajectory {
    pub inputs: Value,
    pub generated_output: String,
    pub grader_scores: BTreeMap<String, f64>,
    pub combined: f64,
    pub feedback: String,
}

/// One candidate scored against one batch of rows. Scores and outputs
/// are positionally aligned with the input rows.
#[derive(Debug, Clone, Default)]
pub struct EvaluationBatch {
    pub scores: Vec<f64>,
    pub outputs: Vec<String>,
    pub trajectories: Option<Vec<Trajectory>>,
}

impl EvaluationBatch {
    pub fn mean_score(&self) -> f64 {
        if self.scores.is_empty() {
            0.0
        } else {
            self.scores.iter().sum::<f64>() / self.scores.len() as f64
        }
    }
}

/// One example in the reflection dataset.
#[derive(Debug, Clone, Serialize)]
pub struct ReflectiveExample {
    #[serde(rename = "Inputs")]
    pub inputs: Value,
    #[serde(rename = "Generated Outputs")]
    pub generated_output: String,
    #[serde(rename = "Feedback")]
    pub feedback: String,
}

/// Contract between the reflective search loop and the evaluation
/// pipeline.
#[async_trait]
pub trait GepaAdapter: Send + Sync {
    /// Score a candidate on a batch of rows. Never fails for per-row or
    /// per-scorer faults.
    async fn evaluate(
        &self,
        rows: &[Row],
        candidate: &Candidate,
        capture_traces: bool,
    ) -> PromptOptResult<EvaluationBatch>;

    /// Component names the search may rewrite.
    fn components_to_update(&self, candidate: &Candidate) -> Vec<String>;

    /// Package captured trajectories for the reflection step, keyed by
    /// component, preserving trajectory order.
    fn make_reflective_dataset(
        &self,
        candidate: &Candidate,
        eval_batch: &EvaluationBatch,
        components: &[String],
    ) -> HashMap<String, Vec<ReflectiveExample>>;
}

/// Generation-side model settings for one run.
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GenerationSettings {
    fn params(&self) -> CompletionParams {
        CompletionParams::new(self.model.clone())
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
    }
}

/// Adapter wiring the generation client and the scorer set into the
/// [`GepaAdapter`] contract for one optimization config.
pub struct EvalsBackedAdapter {
    config_id: i64,
    generation: GenerationSettings,
    user_message_column: Option<String>,
    scorers: Vec<Scorer>,
    env: ScorerEnv,
    progress: ProgressTracker,
    evaluation_count: AtomicU32,
}

impl EvalsBackedAdapter {
    /// `scorers` must carry judges first, then function scorers; feedback
    /// fragments follow this declaration order.
    pub fn new(
        config_id: i64,
        generation: GenerationSettings,
        user_message_column: Option<String>,
        scorers: Vec<Scorer>,
        env: ScorerEnv,
        progress: ProgressTracker,
    ) -> Self {
        Self {
            config_id,
            generation,
            user_message_column,
            scorers,
            env,
            progress,
            evaluation_count: AtomicU32::new(0),
        }
    }

    async fn generate_output(
        &self,
        system_prompt: &str,
        row_data: &HashMap<String, String>,
    ) -> PromptOptResult<String> {
        let rendered =
            render_template(system_prompt, row_data, &self.env.available_columns)?;
        if rendered.trim().is_empty() {
            return Err(PromptOptError::Validation {
                message: "Rendered system prompt is empty".to_string(),
            });
        }

        let user_message = match &self.user_message_column {
            Some(column) => {
                if !self.env.available_columns.iter().any(|c| c == column) {
                    return Err(PromptOptError::Validation {
                        message: format!(
                            "User message column '{}' not found in available columns",
                            column
                        ),
                    });
                }
                let value = row_data.get(column).cloned().unwrap_or_default();
                if value.trim().is_empty() {
                    return Err(PromptOptError::Validation {
                        message: format!(
                            "User message column '{}' is empty for this row",
                            column
                        ),
                    });
                }
                value
            }
            None => String::new(),
        };

        let output = self
            .env
            .llm
            .chat_completion(&rendered, &user_message, &self.generation.params())
            .await?;
        if output.trim().is_empty() {
            return Err(PromptOptError::Validation {
                message: "LLM returned empty output".to_string(),
            });
        }
        Ok(output.trim().to_string())
    }

    /// Evaluate one row: generate, then run every scorer. Returns
    /// (output, combined score, trajectory, feedback).
    async fn evaluate_row(
        &self,
        row: &Row,
        system_prompt: &str,
        capture_traces: bool,
    ) -> (String, f64, Option<Trajectory>, String) {
        let inputs = json!({"row_data": row.data, "row_id": row.id});

        let output = match self.generate_output(system_prompt, &row.data).await {
            Ok(output) => output,
            Err(e) => {
                let feedback = format!("Generation failed: {}", e);
                let trajectory = capture_traces.then(|| Trajectory {
                    inputs,
                    generated_output: String::new(),
                    grader_scores: BTreeMap::new(),
                    combined: 0.0,
                    feedback: feedback.clone(),
                });
                return (String::new(), 0.0, trajectory, feedback);
            }
        };

        // Judges are I/O-bound LLM calls and run concurrently; function
        // scorers are fast and run in declaration order after them.
        let judge_futures: Vec<_> = self
            .scorers
            .iter()
            .filter(|s| s.is_judge())
            .map(|s| s.score(&row.data, &output, &self.env))
            .collect();
        let mut outcomes = join_all(judge_futures).await;
        for scorer in self.scorers.iter().filter(|s| !s.is_judge()) {
            outcomes.push(scorer.score(&row.data, &output, &self.env).await);
        }

        let mut grader_scores = BTreeMap::new();
        let mut all_scores = Vec::with_capacity(outcomes.len());
        let mut feedback_parts = Vec::with_capacity(outcomes.len());
        for outcome in &outcomes {
            grader_scores.insert(outcome.score_key.clone(), outcome.score);
            all_scores.push(outcome.score);
            feedback_parts.push(outcome.feedback.clone());
        }

        let combined = if all_scores.is_empty() {
            0.0
        } else {
            all_scores.iter().sum::<f64>() / all_scores.len() as f64
        };
        let feedback = if feedback_parts.is_empty() {
            "All graders passed; keep precision and coverage.".to_string()
        } else {
            feedback_parts.join("; ")
        };

        let trajectory = capture_traces.then(|| Trajectory {
            inputs,
            generated_output: output.clone(),
            grader_scores,
            combined,
            feedback: feedback.clone(),
        });

        (output, combined, trajectory, feedback)
    }
}

#[async_trait]
impl GepaAdapter for EvalsBackedAdapter {
    async fn evaluate(
        &self,
        rows: &[Row],
        candidate: &Candidate,
        capture_traces: bool,
    ) -> PromptOptResult<EvaluationBatch> {
        let system_prompt = candidate.get(SYSTEM_PROMPT_COMPONENT).ok_or_else(|| {
            PromptOptError::Validation {
                message: format!(
                    "Candidate is missing the '{}' component",
                    SYSTEM_PROMPT_COMPONENT
                ),
            }
        })?;

        let evaluation = self.evaluation_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.progress.update(
            self.config_id,
            ProgressUpdate::new()
                .current_iteration(evaluation)
                .message(format!(
                    "Evaluating candidate {} on {} examples...",
                    evaluation,
                    rows.len()
                )),
        );

        let mut batch = EvaluationBatch {
            trajectories: capture_traces.then(Vec::new),
            ..Default::default()
        };
        let mut all_feedback = Vec::new();

        // Row by row; judge concurrency lives inside each row's scoring.
        for row in rows {
            let (output, score, trajectory, feedback) =
                self.evaluate_row(row, system_prompt, capture_traces).await;
            batch.outputs.push(output);
            batch.scores.push(score);
            if !feedback.is_empty() {
                all_feedback.push(feedback);
            }
            if let (Some(trajectories), Some(trajectory)) =
                (batch.trajectories.as_mut(), trajectory)
            {
                trajectories.push(trajectory);
            }
        }

        let avg_score = batch.mean_score();
        debug!(
            config_id = self.config_id,
            evaluation,
            rows = rows.len(),
            avg_score,
            "evaluated candidate"
        );

        let message = if avg_score == 0.0 && !all_feedback.is_empty() {
            let issues: String = all_feedback
                .iter()
                .take(3)
                .cloned()
                .collect::<Vec<_>>()
                .join("; ")
                .chars()
                .take(200)
                .collect();
            format!(
                "Completed evaluation of {} examples (avg score: {:.3}). Issues: {}...",
                rows.len(),
                avg_score,
                issues
            )
        } else {
            format!(
                "Completed evaluation of {} examples (avg score: {:.3})",
                rows.len(),
                avg_score
            )
        };
        self.progress.update(
            self.config_id,
            ProgressUpdate::new().current_score(avg_score).message(message),
        );

        Ok(batch)
    }

    fn components_to_update(&self, _candidate: &Candidate) -> Vec<String> {
        vec![SYSTEM_PROMPT_COMPONENT.to_string()]
    }

    fn make_reflective_dataset(
        &self,
        _candidate: &Candidate,
        eval_batch: &EvaluationBatch,
        _components: &[String],
    ) -> HashMap<String, Vec<ReflectiveExample>> {
        let examples: Vec<ReflectiveExample> = eval_batch
            .trajectories
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|trajectory| ReflectiveExample {
                inputs: trajectory.inputs.clone(),
                generated_output: trajectory.generated_output.clone(),
                feedback: trajectory.feedback.clone(),
            })
            .collect();
        HashMap::from([(SYSTEM_PROMPT_COMPONENT.to_string(), examples)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    use crate::errors::{LlmError, LlmResult};
    use crate::llm_client::{LlmClient, Message};
    use crate::scorers::FunctionRegistry;
    use crate::store::{FunctionEvalConfig, JudgeConfig};

    /// Echoes the system prompt back as the generated output and answers
    /// judge prompts with a fixed marker.
    struct EchoLlm {
        judge_reply: &'static str,
    }

    #[async_trait]
    impl LlmClient for EchoLlm {
        async fn complete(
            &self,
            messages: &[Message],
            _params: &CompletionParams,
        ) -> LlmResult<String> {
            if messages.len() == 1 {
                // Judge path: single user message.
                Ok(self.judge_reply.to_string())
            } else {
                Ok(messages[0].content.clone())
            }
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
                message: "down".to_string(),
            })
        }
    }

    fn rows(values: &[(&str, &str)]) -> Vec<Row> {
        values
            .iter()
            .enumerate()
            .map(|(i, (question, answer))| Row {
                id: i as i64 + 1,
                data: [("question", *question), ("answer", *answer)]
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            })
            .collect()
    }

    fn exact_match_scorer() -> Scorer {
        Scorer::Function(FunctionEvalConfig {
            id: 1,
            name: "exact".to_string(),
            function_name: "exact_match".to_string(),
            config: json!({}),
        })
    }

    fn adapter(llm: Arc<dyn LlmClient>, scorers: Vec<Scorer>) -> EvalsBackedAdapter {
        adapter_with_progress(llm, scorers, ProgressTracker::new())
    }

    fn adapter_with_progress(
        llm: Arc<dyn LlmClient>,
        scorers: Vec<Scorer>,
        progress: ProgressTracker,
    ) -> EvalsBackedAdapter {
        EvalsBackedAdapter::new(
            99,
            GenerationSettings {
                model: "gpt-4o-mini".to_string(),
                temperature: 1.0,
                max_tokens: 256,
            },
            None,
            scorers,
            ScorerEnv {
                llm,
                registry: Arc::new(FunctionRegistry::with_builtins()),
                available_columns: vec!["question".to_string(), "answer".to_string()],
            },
            progress,
        )
    }

    #[tokio::test]
    async fn test_order_and_length_preserved() {
        let adapter = adapter(
            Arc::new(EchoLlm { judge_reply: "" }),
            vec![exact_match_scorer()],
        );
        let rows = rows(&[("a?", "alpha"), ("b?", "beta"), ("c?", "gamma")]);
        let candidate = seed_candidate("{{answer}}");

        let batch = adapter.evaluate(&rows, &candidate, true).await.unwrap();
        assert_eq!(batch.scores.len(), 3);
        assert_eq!(batch.outputs.len(), 3);
        assert_eq!(batch.outputs, vec!["alpha", "beta", "gamma"]);
        assert_eq!(batch.scores, vec![1.0, 1.0, 1.0]);
        assert_eq!(batch.trajectories.as_ref().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_generation_failure_scores_zero_without_aborting() {
        let adapter = adapter(Arc::new(FailingLlm), vec![exact_match_scorer()]);
        let rows = rows(&[("a?", "alpha"), ("b?", "beta")]);
        let candidate = seed_candidate("Answer: {{question}}");

        let batch = adapter.evaluate(&rows, &candidate, true).await.unwrap();
        assert_eq!(batch.scores, vec![0.0, 0.0]);
        assert_eq!(batch.outputs, vec!["", ""]);
        let trajectories = batch.trajectories.unwrap();
        assert!(trajectories[0].feedback.starts_with("Generation failed:"));
    }

    #[tokio::test]
    async fn test_all_scorers_failing_never_raises() {
        let unknown = Scorer::Function(FunctionEvalConfig {
            id: 5,
            name: "mystery".to_string(),
            function_name: "not_registered".to_string(),
            config: json!({}),
        });
        let adapter = adapter(Arc::new(EchoLlm { judge_reply: "" }), vec![unknown]);
        let rows = rows(&[("a?", "alpha"), ("b?", "beta")]);

        let batch = adapter
            .evaluate(&rows, &seed_candidate("{{answer}}"), true)
            .await
            .unwrap();
        assert_eq!(batch.scores, vec![0.0, 0.0]);
        let trajectories = batch.trajectories.unwrap();
        assert!(trajectories[0].feedback.contains("mystery: failed ("));
    }

    #[tokio::test]
    async fn test_feedback_order_judges_first() {
        let judge = Scorer::Judge(JudgeConfig {
            id: 10,
            name: "quality".to_string(),
            prompt: "Rate {{Output}}".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            max_tokens: 100,
        });
        let adapter = adapter(
            Arc::new(EchoLlm {
                judge_reply: "<score>0.5</score>",
            }),
            vec![judge, exact_match_scorer()],
        );
        let rows = rows(&[("a?", "alpha")]);

        let batch = adapter
            .evaluate(&rows, &seed_candidate("{{answer}}"), true)
            .await
            .unwrap();
        let trajectory = &batch.trajectories.unwrap()[0];
        assert_eq!(trajectory.feedback, "quality: 0.500; exact: 1.000");
        assert_eq!(trajectory.combined, 0.75);
    }

    #[tokio::test]
    async fn test_grader_scores_keep_same_named_scorers_apart() {
        let judge = Scorer::Judge(JudgeConfig {
            id: 10,
            name: "exact".to_string(),
            prompt: "Rate {{Output}}".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            max_tokens: 100,
        });
        let adapter = adapter(
            Arc::new(EchoLlm {
                judge_reply: "<score>0.5</score>",
            }),
            vec![judge, exact_match_scorer()],
        );
        let rows = rows(&[("a?", "alpha")]);

        let batch = adapter
            .evaluate(&rows, &seed_candidate("{{answer}}"), true)
            .await
            .unwrap();
        let trajectory = &batch.trajectories.unwrap()[0];
        assert_eq!(trajectory.grader_scores.len(), 2);
        assert_eq!(trajectory.grader_scores["judge_exact"], 0.5);
        assert_eq!(trajectory.grader_scores["function_exact"], 1.0);
    }

    #[tokio::test]
    async fn test_malformed_candidate_is_batch_error() {
        let adapter = adapter(
            Arc::new(EchoLlm { judge_reply: "" }),
            vec![exact_match_scorer()],
        );
        let err = adapter
            .evaluate(&rows(&[("a?", "alpha")]), &HashMap::new(), false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains(SYSTEM_PROMPT_COMPONENT));
    }

    #[tokio::test]
    async fn test_progress_side_effect() {
        let progress = ProgressTracker::new();
        let adapter = adapter_with_progress(
            Arc::new(EchoLlm { judge_reply: "" }),
            vec![exact_match_scorer()],
            progress.clone(),
        );
        adapter
            .evaluate(&rows(&[("a?", "alpha")]), &seed_candidate("{{answer}}"), false)
            .await
            .unwrap();

        let record = progress.get(99).unwrap();
        assert_eq!(record.current_iteration, 1);
        assert_eq!(record.current_score, Some(1.0));
        assert!(record.message.contains("Completed evaluation of 1 examples"));
    }

    #[tokio::test]
    async fn test_no_trajectories_without_trace_capture() {
        let adapter = adapter(
            Arc::new(EchoLlm { judge_reply: "" }),
            vec![exact_match_scorer()],
        );
        let batch = adapter
            .evaluate(&rows(&[("a?", "alpha")]), &seed_candidate("{{answer}}"), false)
            .await
            .unwrap();
        assert!(batch.trajectories.is_none());
    }

    #[tokio::test]
    async fn test_reflective_dataset_preserves_order() {
        let adapter = adapter(
            Arc::new(EchoLlm { judge_reply: "" }),
            vec![exact_match_scorer()],
        );
        let rows = rows(&[("a?", "alpha"), ("b?", "beta")]);
        let candidate = seed_candidate("{{answer}}");
        let batch = adapter.evaluate(&rows, &candidate, true).await.unwrap();

        let dataset = adapter.make_reflective_dataset(
            &candidate,
            &batch,
            &adapter.components_to_update(&candidate),
        );
        let examples = &dataset[SYSTEM_PROMPT_COMPONENT];
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[0].generated_output, "alpha");
        assert_eq!(examples[1].generated_output, "beta");
    }
}
