//! One-shot AI supervisor contract.
//!
//! A supervisor turns a prompt into structured text in a single call: no
//! history, no tool use. The engine crate ships an HTTP implementation;
//! tests script the trait directly.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Failures of a supervisor call.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Request never produced a usable reply (network, backend, cancel).
    #[error("transport failure: {0}")]
    Transport(String),
    /// Reply arrived but did not match the expected schema.
    #[error("parse failure: {0}")]
    Parse(String),
}

/// A block of reply content. Only text is modeled; structured payloads are
/// text blocks validated by [`parse_json`].
#[derive(Debug, Clone)]
pub enum ContentBlock {
    Text { text: String },
}

/// Reply from a single supervisor call.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub blocks: Vec<ContentBlock>,
}

impl Completion {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            blocks: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// Concatenated text across all blocks.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .map(|b| match b {
                ContentBlock::Text { text } => text.as_str(),
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// One-shot structured LLM call.
#[async_trait]
pub trait Supervisor: Send + Sync {
    async fn call(
        &self,
        cancel: &CancellationToken,
        prompt: &str,
        model: &str,
        max_tokens: u32,
    ) -> Result<Completion, SupervisorError>;
}

/// Validate a supervisor reply against a serde schema.
///
/// Models wrap JSON in markdown fences or prose despite instructions, so
/// the payload is located between the first `{` and the last `}` before
/// deserializing.
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, SupervisorError> {
    let start = text
        .find('{')
        .ok_or_else(|| SupervisorError::Parse("no JSON object in reply".into()))?;
    let end = text
        .rfind('}')
        .ok_or_else(|| SupervisorError::Parse("unterminated JSON object in reply".into()))?;
    if end < start {
        return Err(SupervisorError::Parse("malformed JSON object in reply".into()));
    }
    serde_json::from_str(&text[start..=end]).map_err(|e| SupervisorError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, Debug)]
    struct Verdict {
        converged: bool,
        confidence: f64,
    }

    #[test]
    fn parses_bare_json() {
        let v: Verdict = parse_json(r#"{"converged": true, "confidence": 0.9}"#).unwrap();
        assert!(v.converged);
        assert!((v.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn parses_fenced_json() {
        let reply = "Here is my verdict:\n```json\n{\"converged\": false, \"confidence\": 0.4}\n```\n";
        let v: Verdict = parse_json(reply).unwrap();
        assert!(!v.converged);
    }

    #[test]
    fn rejects_missing_object() {
        let err = parse_json::<Verdict>("no json here").unwrap_err();
        assert!(matches!(err, SupervisorError::Parse(_)));
    }

    #[test]
    fn rejects_schema_mismatch() {
        let err = parse_json::<Verdict>(r#"{"converged": "yes"}"#).unwrap_err();
        assert!(matches!(err, SupervisorError::Parse(_)));
    }
}
