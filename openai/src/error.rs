//! Client error type.

use thiserror::Error;

/// Errors returned by the API client.
#[derive(Debug, Error)]
pub enum Error {
    /// The `OPENAI_API_KEY` environment variable is not set.
    #[error("OPENAI_API_KEY environment variable not set")]
    MissingApiKey,

    /// Transport-level failure (connection, TLS, timeout).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API returned a non-success status.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// A streamed chunk could not be decoded.
    #[error("stream decode error: {0}")]
    Stream(String),

    /// The response body did not contain the expected content.
    #[error("empty response from API")]
    EmptyResponse,

    /// Image generation failed after all retries.
    #[error("image generation failed after {attempts} attempts: {last_error}")]
    ImageRetriesExhausted { attempts: u32, last_error: String },
}
