//! Work items carried on the work queue.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::job::FrameRange;

/// Kind of work a worker performs for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkKind {
    /// Render one batch of frames.
    Render,
    /// Sequence every frame of a job into the composite.
    Sequence,
}

impl WorkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkKind::Render => "render",
            WorkKind::Sequence => "sequence",
        }
    }
}

impl std::fmt::Display for WorkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of dispatchable work.
///
/// Wire format: `{"kind": "render" | "sequence", "file", "start", "end"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub kind: WorkKind,
    pub file: String,
    pub start: u32,
    pub end: u32,
}

impl WorkItem {
    pub fn render(file: impl Into<String>, batch: FrameRange) -> Self {
        Self {
            kind: WorkKind::Render,
            file: file.into(),
            start: batch.start,
            end: batch.end,
        }
    }

    pub fn sequence(file: impl Into<String>, range: FrameRange) -> Self {
        Self {
            kind: WorkKind::Sequence,
            file: file.into(),
            start: range.start,
            end: range.end,
        }
    }

    /// Frame range carried by the item; a reversed range is malformed.
    pub fn range(&self) -> Result<FrameRange, ValidationError> {
        FrameRange::new(self.start, self.end)
    }

    /// Key used to collapse duplicate enqueues of the same logical item.
    ///
    /// Render items are unique per batch, sequence items per job.
    pub fn dedup_key(&self) -> String {
        match self.kind {
            WorkKind::Render => format!("render:{}:{}-{}", self.file, self.start, self.end),
            WorkKind::Sequence => format!("sequence:{}", self.file),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }
}

impl std::fmt::Display for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} [{}-{}]", self.kind, self.file, self.start, self.end)
    }
}
