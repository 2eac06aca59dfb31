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

use async_trait::async_trait;
use std::time::Duration;
use tokio_retry::{strategy::ExponentialBackoff, RetryIf};
use tracing::warn;

use super::config::{CompletionParams, LlmConfig};
use super::models::Message;
use crate::errors::{LlmError, LlmResult};

/// Trait for LLM clients that can generate text completions
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Run a completion over an explicit message list
    async fn complete(
        &self,
        messages: &[Message],
        params: &CompletionParams,
    ) -> LlmResult<String>;

    /// Single-turn completion from a bare prompt (judges, reflection)
    async fn completion(&self, prompt: &str, params: &CompletionParams) -> LlmResult<String> {
        self.complete(&[Message::user(prompt)], params).await
    }

    /// Chat-style completion with a system prompt and a user message
    async fn chat_completion(
        &self,
        system_prompt: &str,
        user_message: &str,
        params: &CompletionParams,
    ) -> LlmResult<String> {
        self.complete(
            &[Message::system(system_prompt), Message::user(user_message)],
            params,
        )
        .await
    }
}

/// Base implementation for LLM clients with input cleaning and retry logic
pub struct BaseLlmClient {
    pub config: LlmConfig,
}

impl BaseLlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self { config }
    }

    /// Clean input string of invalid unicode and control characters
    pub fn clean_input(&self, input: &str) -> String {
        // Remove zero-width characters and other invisible unicode
        let zero_width_chars = ['\u{200b}', '\u{200c}', '\u{200d}', '\u{feff}', '\u{2060}'];
        let mut cleaned = input.to_string();
        for char in zero_width_chars {
            cleaned = cleaned.replace(char, "");
        }

        // Remove control characters except newlines, returns, and tabs
        cleaned
            .chars()
            .filter(|&c| (c as u32) >= 32 || c == '\n' || c == '\r' || c == '\t')
            .collect()
    }

    /// Execute with retry logic for transient failures
    pub async fn execute_with_retry<F, Fut, T>(&self, operation: F) -> LlmResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = LlmResult<T>>,
    {
        let retry_strategy = ExponentialBackoff::from_millis(5000)
            .max_delay(Duration::from_secs(120))
            .take(4);

        let retry_condition = |error: &LlmError| {
            matches!(
                error,
                LlmError::RateLimit | LlmError::Http(_) | LlmError::Timeout { .. }
            )
        };

        RetryIf::spawn(retry_strategy, operation, retry_condition)
            .await
            .map_err(|e| {
                warn!("All retry attempts exhausted: {:?}", e);
                e
            })
    }
}
