use std::time::Duration;
use tracing::{debug, error};

use crate::config::SynthesisConfig;
use crate::error::{guard_text, CallError, CallResult};

/// Client for the speech synthesis endpoint (`POST` raw text → audio/mpeg)
#[derive(Clone)]
pub struct SynthesisClient {
    client: reqwest::Client,
    url: String,
}

impl SynthesisClient {
    pub fn new(config: &SynthesisConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            url: config.url.clone(),
        }
    }

    /// Start a synthesis request. The body has not been read yet, so callers
    /// can stream it or collect it.
    pub async fn request(&self, text: &str) -> CallResult<reqwest::Response> {
        guard_text(text)?;

        debug!("Requesting synthesis of {} characters", text.chars().count());
        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "text/plain")
            .body(text.to_string())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            error!("Synthesis endpoint returned {}", status);
            return Err(CallError::BackendStatus(status.as_u16()));
        }

        Ok(response)
    }
}
