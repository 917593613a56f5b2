//! Oracle error types.

use crate::backend::LlmError;

/// Failure of an oracle call, after retries.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// The backend could not be reached or kept failing
    #[error("Oracle unavailable: {0}")]
    Unavailable(#[from] LlmError),

    /// The backend answered, but not in the agreed shape
    #[error("Malformed oracle output: {0}")]
    Malformed(String),

    /// The request could not be built from the given input
    #[error("Invalid oracle input: {0}")]
    InvalidInput(String),
}

impl OracleError {
    /// Whether a retry of the whole call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            OracleError::Unavailable(e) => e.is_transient(),
            OracleError::Malformed(_) | OracleError::InvalidInput(_) => false,
        }
    }
}

/// Pull the JSON object out of a model reply.
///
/// Models wrap JSON in markdown fences or add a sentence around it; take the
/// span from the first `{` to the last `}`.
pub(crate) fn extract_json_object(content: &str) -> Result<&str, OracleError> {
    let start = content.find('{');
    let end = content.rfind('}');
    match (start, end) {
        (Some(start), Some(end)) if start < end => Ok(&content[start..=end]),
        _ => Err(OracleError::Malformed(format!(
            "no JSON object in reply: {}",
            truncate(content, 120)
        ))),
    }
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_from_fenced_block() {
        let reply = "```json\n{\"a\": 1}\n```";
        assert_eq!(extract_json_object(reply).unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_rejects_prose() {
        assert!(matches!(
            extract_json_object("I cannot help with that."),
            Err(OracleError::Malformed(_))
        ));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("नमस्ते दुनिया", 3), "नमस...");
        assert_eq!(truncate("short", 10), "short");
    }
}
