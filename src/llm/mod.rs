//! LLM response generation.
//!
//! The model is a single capability behind the [`Generator`] trait:
//! `generate(messages, temperature) -> text`. Concrete providers live in
//! [`provider`] and are selected by name; whether a provider honors the
//! system role is a property of the registry, not the capability.
//!
//! Every model output is cleaned (markdown fences stripped) and validated
//! against the `{"headers": {...}, "body": "..."}` shape before it is
//! cached or served.

pub mod prompt;
pub mod provider;

pub use provider::{new_generator, Generator};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Provider and model settings, carried into each logged event.
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub server_url: Option<String>,
    pub api_key: Option<String>,
    pub temperature: f64,
    pub cloud_project: Option<String>,
    pub cloud_location: Option<String>,
}

/// The validated response shape every cached or served response
/// deserializes to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonResponse {
    pub headers: HashMap<String, String>,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Generation failure, tagged with the error kind persisted in the event
/// log's `error.type`.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("contentGenerationError: {0}")]
    ContentGeneration(String),
    #[error("emptyLLMResponse: {0}")]
    EmptyResponse(String),
    #[error("invalidJSONResponse: {0}")]
    InvalidJson(String),
}

impl LlmError {
    /// The tag persisted as `error.type`.
    pub fn kind(&self) -> &'static str {
        match self {
            LlmError::ContentGeneration(_) => "contentGenerationError",
            LlmError::EmptyResponse(_) => "emptyLLMResponse",
            LlmError::InvalidJson(_) => "invalidJSONResponse",
        }
    }

    /// The message without the tag prefix.
    pub fn detail(&self) -> &str {
        match self {
            LlmError::ContentGeneration(msg)
            | LlmError::EmptyResponse(msg)
            | LlmError::InvalidJson(msg) => msg,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::ContentGeneration(err.to_string())
    }
}

/// A failed generation together with whatever raw output the model
/// produced, for the `error.invalidResponse` event field.
#[derive(Debug, Clone)]
pub struct LlmFailure {
    pub error: LlmError,
    pub raw: String,
}

/// Providers that honor a system-role message. Others get the system
/// prompt appended to the user prompt.
pub fn supports_system_role(provider: &str) -> bool {
    matches!(provider, "openai")
}

/// Invoke the model and return a cleaned, validated JSON string.
pub async fn generate_response(
    generator: &dyn Generator,
    temperature: f64,
    messages: &[Message],
) -> Result<String, LlmFailure> {
    let content = generator
        .generate(messages, temperature)
        .await
        .map_err(|error| LlmFailure {
            error,
            raw: String::new(),
        })?;

    let cleaned = clean_response(&content);
    match validate_json(&cleaned) {
        Ok(_) => Ok(cleaned),
        Err(msg) => Err(LlmFailure {
            error: LlmError::InvalidJson(msg),
            raw: cleaned,
        }),
    }
}

/// Strip an opening ```/```json fence and a trailing ``` fence, then trim.
pub fn clean_response(input: &str) -> String {
    let mut s = input.trim();
    if let Some(rest) = s.strip_prefix("```json") {
        s = rest;
    } else if let Some(rest) = s.strip_prefix("```") {
        s = rest;
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest;
    }
    s.trim().to_string()
}

/// Validate that the text parses as JSON and binds to a [`JsonResponse`]
/// with both fields present and non-empty.
pub fn validate_json(json_str: &str) -> Result<JsonResponse, String> {
    let resp: JsonResponse =
        serde_json::from_str(json_str).map_err(|e| format!("error unmarshalling JSON: {}", e))?;
    if resp.headers.is_empty() {
        return Err("validation error: field 'headers' is required".to_string());
    }
    if resp.body.is_empty() {
        return Err("validation error: field 'body' is required".to_string());
    }
    Ok(resp)
}
