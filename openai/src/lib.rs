//! Minimal OpenAI-compatible API client.
//!
//! Supports the three operations the game engine needs:
//! - [`OpenAi::complete`] — one-shot chat completion
//! - [`OpenAi::stream`] — streamed chat completion (SSE chunks)
//! - [`OpenAi::generate_image`] — image synthesis with bounded retries
//!
//! The client is stateless; all conversation state lives with the caller.

mod error;
mod images;
mod stream;
mod types;

pub use error::Error;
pub use images::{ImageQuality, ImageRequest, ImageSize};
pub use stream::ChatStream;
pub use types::{Message, Request, Response, Role, Usage};

use std::time::Duration;

/// Default request timeout for non-streaming calls.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of attempts for image generation.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default API endpoint.
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// A client for an OpenAI-compatible API.
#[derive(Debug, Clone)]
pub struct OpenAi {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
    max_retries: u32,
}

impl OpenAi {
    /// Create a client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Create a client from the `OPENAI_API_KEY` environment variable.
    ///
    /// `OPENAI_BASE_URL` overrides the endpoint when set, which is how
    /// self-hosted compatible servers are reached.
    pub fn from_env() -> Result<Self, Error> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| Error::MissingApiKey)?;
        let mut client = Self::new(api_key);
        if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
            client.base_url = base_url;
        }
        Ok(client)
    }

    /// Override the API base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Override the per-call timeout for non-streaming requests.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the number of attempts for image generation.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub(crate) fn api_key(&self) -> &str {
        &self.api_key
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn request_timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Run a chat completion and return the full response.
    pub async fn complete(&self, request: Request) -> Result<Response, Error> {
        let body = request.into_body(false);
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }

    /// Run a chat completion and return a stream of text chunks.
    ///
    /// The stream is finite and not restartable: once chunks have been
    /// delivered, a failure surfaces as a stream error and the call must
    /// not be retried by this client.
    pub async fn stream(&self, request: Request) -> Result<ChatStream, Error> {
        let body = request.into_body(true);
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(ChatStream::from_response(response))
    }
}
