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
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::client::{BaseLlmClient, LlmClient};
use super::config::{CompletionParams, LlmConfig};
use super::models::Message;
use crate::errors::{LlmError, LlmResult};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
    refusal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    error: Option<OpenAiError>,
}

#[derive(Debug, Deserialize)]
struct OpenAiError {
    message: String,
}

/// Client for OpenAI-compatible chat completion endpoints
pub struct OpenAiClient {
    base_client: BaseLlmClient,
    http_client: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(config: LlmConfig) -> LlmResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| LlmError::Authentication {
                message: "OpenAI API key is required".to_string(),
            })?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let http_client = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| LlmError::InvalidConfig {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            base_client: BaseLlmClient::new(config),
            http_client,
            base_url,
            api_key,
        })
    }

    async fn complete_internal(
        &self,
        messages: &[Message],
        params: &CompletionParams,
    ) -> LlmResult<String> {
        let openai_messages: Vec<OpenAiMessage> = messages
            .iter()
            .map(|m| OpenAiMessage {
                role: m.role.clone(),
                content: self.base_client.clean_input(&m.content),
            })
            .collect();

        let request = OpenAiChatRequest {
            model: params.model.clone(),
            messages: openai_messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        };

        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(LlmError::Http)?;

        if response.status() == 429 {
            return Err(LlmError::RateLimit);
        }

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::Authentication {
                message: format!("HTTP {} - {}", status, error_text),
            });
        }

        let chat_response: OpenAiChatResponse =
            response.json().await.map_err(|e| LlmError::NetworkError {
                message: format!("Failed to parse JSON response: {}", e),
            })?;

        if let Some(error) = chat_response.error {
            return Err(LlmError::Authentication {
                message: error.message,
            });
        }

        let choice = chat_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::EmptyResponse {
                message: "No choices in response".to_string(),
            })?;

        if let Some(refusal) = choice.message.refusal {
            return Err(LlmError::Refusal { message: refusal });
        }

        choice
            .message
            .content
            .ok_or_else(|| LlmError::EmptyResponse {
                message: "No content in response".to_string(),
            })
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(
        &self,
        messages: &[Message],
        params: &CompletionParams,
    ) -> LlmResult<String> {
        self.base_client
            .execute_with_retry(|| self.complete_internal(messages, params))
            .await
    }
}
