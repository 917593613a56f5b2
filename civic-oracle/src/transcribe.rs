//! Speech-to-text oracle for audio evidence.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{header, Client};
use serde::Deserialize;
use tracing::debug;

use crate::backend::LlmError;
use crate::error::OracleError;
use crate::retry::RetryPolicy;

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe an audio file to text.
    async fn transcribe(&self, audio: &[u8], file_name: &str) -> Result<String, OracleError>;
}

/// Client for OpenAI-compatible `/audio/transcriptions` (Whisper).
pub struct OpenAiTranscriber {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

impl OpenAiTranscriber {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        retry: RetryPolicy,
    ) -> Result<Self, LlmError> {
        let client = Client::builder()
            .build()
            .map_err(|e| LlmError::Unavailable(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            retry,
        })
    }

    async fn send(&self, audio: &[u8], file_name: &str) -> Result<String, LlmError> {
        let part = Part::bytes(audio.to_vec()).file_name(file_name.to_string());
        let form = Form::new()
            .text("model", self.model.clone())
            .text("response_format", "json")
            .part("file", part);

        let mut request = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .multipart(form);
        if let Some(key) = &self.api_key {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(LlmError::RateLimited { retry_after_ms: None });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(if status.is_server_error() {
                LlmError::Unavailable(format!("HTTP {}: {}", status, body))
            } else {
                LlmError::RequestFailed(format!("HTTP {}: {}", status, body))
            });
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;
        Ok(parsed.text)
    }
}

#[async_trait]
impl Transcriber for OpenAiTranscriber {
    async fn transcribe(&self, audio: &[u8], file_name: &str) -> Result<String, OracleError> {
        if audio.is_empty() {
            return Err(OracleError::InvalidInput("empty audio".to_string()));
        }

        let text = self
            .retry
            .run("transcription", || self.send(audio, file_name))
            .await?;

        debug!(file_name, chars = text.len(), "Audio transcribed");
        Ok(text.trim().to_string())
    }
}
