//! The seam between the engine and the chat-completion service.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use openai::{Message, OpenAi, Request};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Enumerated model options carried by the runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            temperature: 0.8,
            max_tokens: 2000,
        }
    }
}

/// A stateless narrator backend. Production uses [`OpenAiModel`]; tests
/// use scripted fakes.
#[async_trait]
pub trait NarrativeModel: Send + Sync {
    /// One-shot completion returning the full reply text.
    async fn complete(&self, messages: Vec<Message>) -> Result<String>;

    /// Streamed completion. The stream is finite and not restartable.
    async fn stream(&self, messages: Vec<Message>) -> Result<BoxStream<'static, Result<String>>>;
}

/// The production narrator backed by the OpenAI-compatible client.
pub struct OpenAiModel {
    client: OpenAi,
    options: ModelOptions,
}

impl OpenAiModel {
    pub fn new(client: OpenAi, options: ModelOptions) -> Self {
        Self { client, options }
    }

    fn request(&self, messages: Vec<Message>) -> Request {
        Request::new(messages)
            .with_model(&self.options.model)
            .with_temperature(self.options.temperature)
            .with_max_tokens(self.options.max_tokens)
    }
}

#[async_trait]
impl NarrativeModel for OpenAiModel {
    async fn complete(&self, messages: Vec<Message>) -> Result<String> {
        let response = self.client.complete(self.request(messages)).await?;
        Ok(response.text())
    }

    async fn stream(&self, messages: Vec<Message>) -> Result<BoxStream<'static, Result<String>>> {
        let stream = self.client.stream(self.request(messages)).await?;
        Ok(stream.map(|chunk| chunk.map_err(EngineError::from)).boxed())
    }
}
