//! Submission requests and their validation.

use serde::{Deserialize, Deserializer, Serialize};

use crate::artifact::source_stem;
use crate::error::ValidationError;
use crate::job::FrameRange;

/// A render submission as received from a client.
///
/// Frames arrive as strings; JSON numbers are accepted and stringified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    #[serde(deserialize_with = "stringly")]
    pub file: String,
    #[serde(deserialize_with = "stringly")]
    pub start: String,
    #[serde(deserialize_with = "stringly")]
    pub end: String,
}

/// A submission that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub file: String,
    pub range: FrameRange,
}

impl SubmitRequest {
    pub fn new(file: impl Into<String>, start: impl ToString, end: impl ToString) -> Self {
        Self {
            file: file.into(),
            start: start.to_string(),
            end: end.to_string(),
        }
    }

    /// Check the file name and frame bounds, in that order.
    pub fn validate(&self) -> Result<Submission, ValidationError> {
        if source_stem(&self.file).is_none() {
            return Err(ValidationError::NotBlendFile);
        }
        let start = parse_frame(&self.start)?;
        let end = parse_frame(&self.end)?;
        Ok(Submission {
            file: self.file.clone(),
            range: FrameRange::new(start, end)?,
        })
    }
}

fn parse_frame(raw: &str) -> Result<u32, ValidationError> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::NotInteger);
    }
    raw.parse().map_err(|_| ValidationError::NotInteger)
}

fn stringly<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or number, got {other}"
        ))),
    }
}
