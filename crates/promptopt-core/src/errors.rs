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

use thiserror::Error;

/// Base error type for promptopt operations
#[derive(Debug, Error)]
pub enum PromptOptError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store error: {message}")]
    Store { message: String },

    #[error("Dataset {id} not found")]
    DatasetNotFound { id: i64 },

    #[error("No rows found for dataset {id}")]
    EmptyDataset { id: i64 },

    #[error("Prompt {id} not found")]
    PromptNotFound { id: i64 },

    #[error("Optimization config {id} not found")]
    ConfigNotFound { id: i64 },

    #[error("Function evaluation '{name}' not found")]
    FunctionNotFound { name: String },

    #[error("Optimization error: {message}")]
    Optimization { message: String },

    #[error("Persistence error: {message}")]
    Persistence { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// LLM-specific error types
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Rate limit exceeded. Please try again later.")]
    RateLimit,

    #[error("LLM refused to generate a response: {message}")]
    Refusal { message: String },

    #[error("LLM returned an empty response: {message}")]
    EmptyResponse { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Authentication error: {message}")]
    Authentication { message: String },

    #[error("Invalid model configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Timeout error: {message}")]
    Timeout { message: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },
}

/// Result type alias for promptopt operations
pub type PromptOptResult<T> = Result<T, PromptOptError>;

/// Result type alias for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;
