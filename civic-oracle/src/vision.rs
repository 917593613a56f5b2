//! Vision oracle for evidence relevance.
//!
//! Given an image and the complaint description, judge whether the image
//! actually shows the reported problem and how confident that judgment is.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::{CompletionRequest, ImageInput, LlmBackend, Message};
use crate::error::{extract_json_object, OracleError};
use crate::retry::RetryPolicy;

const VISION_PROMPT: &str = "You verify photo evidence for a civic complaint. \
Complaint: \"{description}\". Does the image show this problem? Reply with a single JSON object: \
{\"is_relevant\": boolean, \"confidence_score\": integer 1-10, \"detected_text\": string, \
\"remarks\": string}. Put any readable text in the image (signs, plates, documents) in detected_text.";

/// Vision oracle judgment for one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionVerdict {
    pub is_relevant: bool,
    /// Always within 1..=10
    pub confidence_score: u8,
    pub detected_text: Option<String>,
    pub remarks: String,
}

#[async_trait]
pub trait VisionOracle: Send + Sync {
    async fn assess(&self, image: &ImageInput, description: &str) -> Result<VisionVerdict, OracleError>;
}

/// Vision oracle over a multimodal LLM backend.
pub struct LlmVisionOracle {
    backend: Arc<dyn LlmBackend>,
    retry: RetryPolicy,
}

impl LlmVisionOracle {
    pub fn new(backend: Arc<dyn LlmBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }
}

#[async_trait]
impl VisionOracle for LlmVisionOracle {
    async fn assess(&self, image: &ImageInput, description: &str) -> Result<VisionVerdict, OracleError> {
        if image.data.is_empty() {
            return Err(OracleError::InvalidInput("empty image".to_string()));
        }

        let prompt = VISION_PROMPT.replace("{description}", description);
        let request = CompletionRequest::default()
            .with_message(Message::user(prompt).with_image(image.clone()))
            .with_temperature(0.0)
            .with_json_output();

        let response = self
            .retry
            .run("vision", || self.backend.complete(request.clone()))
            .await?;

        parse_verdict(&response.content)
    }
}

/// Parse a vision reply. `is_relevant` and `confidence_score` are required.
pub fn parse_verdict(content: &str) -> Result<VisionVerdict, OracleError> {
    let value: Value = serde_json::from_str(extract_json_object(content)?)
        .map_err(|e| OracleError::Malformed(format!("invalid JSON: {}", e)))?;

    let is_relevant = value
        .get("is_relevant")
        .and_then(Value::as_bool)
        .ok_or_else(|| OracleError::Malformed("missing is_relevant".to_string()))?;

    let confidence = value
        .get("confidence_score")
        .and_then(Value::as_f64)
        .filter(|c| c.is_finite())
        .ok_or_else(|| OracleError::Malformed("missing confidence_score".to_string()))?;

    let detected_text = value
        .get("detected_text")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    Ok(VisionVerdict {
        is_relevant,
        confidence_score: confidence.round().clamp(1.0, 10.0) as u8,
        detected_text,
        remarks: value
            .get("remarks")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;

    #[test]
    fn test_parse_verdict() {
        let verdict = parse_verdict(
            r#"{"is_relevant": true, "confidence_score": 8, "detected_text": " NH-48 ", "remarks": "Pothole visible"}"#,
        )
        .unwrap();
        assert!(verdict.is_relevant);
        assert_eq!(verdict.confidence_score, 8);
        assert_eq!(verdict.detected_text.as_deref(), Some("NH-48"));
    }

    #[test]
    fn test_parse_verdict_clamps_and_drops_blank_text() {
        let verdict = parse_verdict(r#"{"is_relevant": false, "confidence_score": 0, "detected_text": ""}"#).unwrap();
        assert_eq!(verdict.confidence_score, 1);
        assert!(verdict.detected_text.is_none());
        assert_eq!(verdict.remarks, "");
    }

    #[test]
    fn test_parse_verdict_requires_relevance() {
        assert!(parse_verdict(r#"{"confidence_score": 5}"#).is_err());
    }

    #[tokio::test]
    async fn test_assess_sends_image_and_description() {
        let backend = Arc::new(
            MockBackend::default().with_response(r#"{"is_relevant": true, "confidence_score": 9, "remarks": "ok"}"#),
        );
        let oracle = LlmVisionOracle::new(backend.clone(), RetryPolicy::default());
        let image = ImageInput::new("image/jpeg", vec![1, 2, 3]);

        let verdict = oracle.assess(&image, "Overflowing drain").await.unwrap();
        assert_eq!(verdict.confidence_score, 9);

        let sent = &backend.requests()[0].messages[0];
        assert_eq!(sent.images.len(), 1);
        assert!(sent.content.contains("Overflowing drain"));
    }

    #[tokio::test]
    async fn test_assess_rejects_empty_image() {
        let oracle = LlmVisionOracle::new(Arc::new(MockBackend::default()), RetryPolicy::default());
        let result = oracle.assess(&ImageInput::new("image/png", Vec::new()), "x").await;
        assert!(matches!(result, Err(OracleError::InvalidInput(_))));
    }
}
