//! LLM provider abstraction.
//!
//! Each backend implements [`Generator`]; [`new_generator`] builds the
//! configured one by provider name.

pub mod anthropic;
pub mod ollama;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

use async_trait::async_trait;

use super::{LlmConfig, LlmError, Message};

/// The single capability the pipeline needs from a model.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, messages: &[Message], temperature: f64)
        -> Result<String, LlmError>;
}

#[async_trait]
impl<T: Generator + ?Sized> Generator for std::sync::Arc<T> {
    async fn generate(
        &self,
        messages: &[Message],
        temperature: f64,
    ) -> Result<String, LlmError> {
        (**self).generate(messages, temperature).await
    }
}

/// Build the configured provider's client.
pub fn new_generator(config: &LlmConfig) -> anyhow::Result<Box<dyn Generator>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiProvider::new(config)?)),
        "ollama" => Ok(Box::new(OllamaProvider::new(config)?)),
        "anthropic" => Ok(Box::new(AnthropicProvider::new(config)?)),
        other => anyhow::bail!("unsupported llm provider '{}'", other),
    }
}
