//! Prompt assembly for response generation.

use crate::config::Config;
use crate::server::http::HttpRequest;

use super::{supports_system_role, Message};

/// Fallback instruction when no system prompt is configured: the model
/// must emit the `{"headers": ..., "body": ...}` shape.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"Return JSON output and format your output as follows: {"headers": {"headerName1": "headerValue1", "headerName2": "headerValue2"}, "body": "httpBody"}"#;

/// Build the message sequence for one request.
///
/// The request dump replaces the single `%s` placeholder in the
/// configured user prompt. Providers that honor the system role get the
/// system prompt as a separate message; for everyone else it is appended
/// to the user prompt.
pub fn build_messages(req: &HttpRequest, config: &Config, provider: &str) -> Vec<Message> {
    let dump = req.dump();

    let user_prompt = if config.user_prompt.contains("%s") {
        config.user_prompt.replacen("%s", &dump, 1)
    } else if config.user_prompt.is_empty() {
        dump
    } else {
        format!("{}\n{}", config.user_prompt, dump)
    };

    let system_prompt = if config.system_prompt.is_empty() {
        DEFAULT_SYSTEM_PROMPT
    } else {
        config.system_prompt.as_str()
    };

    if supports_system_role(provider) {
        vec![Message::system(system_prompt), Message::user(user_prompt)]
    } else {
        vec![Message::user(format!("{}\n{}", user_prompt, system_prompt))]
    }
}
