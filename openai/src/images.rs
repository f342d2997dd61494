//! Image generation.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Error;
use crate::OpenAi;

/// Delay between image generation attempts.
const RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// Supported output sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImageSize {
    #[serde(rename = "1024x1024")]
    Square1024,
    #[serde(rename = "1792x1024")]
    Wide1792,
    #[serde(rename = "1024x1792")]
    Tall1792,
}

/// Rendering quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageQuality {
    Standard,
    Hd,
}

/// An image generation request.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    prompt: String,
    model: String,
    size: ImageSize,
    quality: ImageQuality,
}

const DEFAULT_IMAGE_MODEL: &str = "dall-e-3";

impl ImageRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: DEFAULT_IMAGE_MODEL.to_string(),
            size: ImageSize::Square1024,
            quality: ImageQuality::Standard,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_size(mut self, size: ImageSize) -> Self {
        self.size = size;
        self
    }

    pub fn with_quality(mut self, quality: ImageQuality) -> Self {
        self.quality = quality;
        self
    }
}

#[derive(Debug, Serialize)]
struct ImageBody<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    size: ImageSize,
    quality: ImageQuality,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    url: Option<String>,
}

impl OpenAi {
    /// Generate one image and return its URL.
    ///
    /// Retries transient failures up to the configured `max_retries`,
    /// sleeping briefly between attempts. Each attempt is bounded by the
    /// client timeout.
    pub async fn generate_image(&self, request: ImageRequest) -> Result<String, Error> {
        let attempts = self.max_retries().max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.try_generate_image(&request).await {
                Ok(url) => return Ok(url),
                Err(Error::Api { status, message }) if status < 500 && status != 429 => {
                    // Client errors other than rate limits will not succeed on retry.
                    return Err(Error::Api { status, message });
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(RETRY_BACKOFF).await;
                    }
                }
            }
        }

        Err(Error::ImageRetriesExhausted {
            attempts,
            last_error,
        })
    }

    async fn try_generate_image(&self, request: &ImageRequest) -> Result<String, Error> {
        let body = ImageBody {
            model: &request.model,
            prompt: &request.prompt,
            n: 1,
            size: request.size,
            quality: request.quality,
        };

        let response = self
            .http()
            .post(format!("{}/images/generations", self.base_url()))
            .bearer_auth(self.api_key())
            .timeout(self.request_timeout())
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

        let parsed: ImageResponse = response.json().await?;
        parsed
            .data
            .into_iter()
            .next()
            .and_then(|d| d.url)
            .ok_or(Error::EmptyResponse)
    }
}
