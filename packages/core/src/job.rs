//! Render job domain types: frame ranges, batches and the job lifecycle.

use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{TransitionError, ValidationError};

/// Default number of frames rendered per batch.
pub const DEFAULT_BATCH_SIZE: NonZeroU32 = match NonZeroU32::new(3) {
    Some(size) => size,
    None => unreachable!(),
};

/// An inclusive range of frame indices, written `"<start>-<end>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameRange {
    pub start: u32,
    pub end: u32,
}

/// Key of a batch inside a job: the batch's own frame range.
pub type BatchKey = FrameRange;

impl FrameRange {
    /// Create a range, rejecting `start > end`.
    pub fn new(start: u32, end: u32) -> Result<Self, ValidationError> {
        if start > end {
            return Err(ValidationError::StartAfterEnd);
        }
        Ok(Self { start, end })
    }

    /// Number of frames in the range.
    pub fn len(&self) -> u64 {
        u64::from(self.end) - u64::from(self.start) + 1
    }

    /// A range always holds at least one frame.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, frame: u32) -> bool {
        self.start <= frame && frame <= self.end
    }

    /// Iterate over every frame index in the range.
    pub fn frames(&self) -> impl Iterator<Item = u32> {
        self.start..=self.end
    }

    /// Split the range into consecutive batches of at most `batch_size` frames.
    ///
    /// The batches cover the range exactly once, in ascending order; only the
    /// last batch may be shorter than `batch_size`.
    pub fn split(&self, batch_size: NonZeroU32) -> Vec<BatchKey> {
        let step = batch_size.get() - 1;
        let mut batches = Vec::new();
        let mut start = self.start;
        loop {
            let end = start.saturating_add(step).min(self.end);
            batches.push(FrameRange { start, end });
            if end == self.end {
                break;
            }
            start = end + 1;
        }
        batches
    }
}

impl std::fmt::Display for FrameRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl FromStr for FrameRange {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once('-')
            .ok_or_else(|| ValidationError::MalformedRange(s.to_string()))?;
        let start = start
            .trim()
            .parse()
            .map_err(|_| ValidationError::MalformedRange(s.to_string()))?;
        let end = end
            .trim()
            .parse()
            .map_err(|_| ValidationError::MalformedRange(s.to_string()))?;
        Self::new(start, end)
    }
}

impl Serialize for FrameRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FrameRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Lifecycle of a render job.
///
/// Legal transitions are `Waiting -> Processing -> Complete`; the job is
/// `Processing` while its frames are being sequenced into the composite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    /// Batches are still rendering.
    #[default]
    Waiting,
    /// Every batch rendered; the composite is being sequenced.
    Processing,
    /// The composite exists and intermediate frames were collected.
    Complete,
}

impl JobStatus {
    /// The status a job must be in to move to `self`.
    pub fn predecessor(self) -> Option<JobStatus> {
        match self {
            JobStatus::Waiting => None,
            JobStatus::Processing => Some(JobStatus::Waiting),
            JobStatus::Complete => Some(JobStatus::Processing),
        }
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        next.predecessor() == Some(self)
    }

    /// Validate a transition against the legal-transition table.
    pub fn check_transition(self, next: JobStatus) -> Result<(), TransitionError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(TransitionError::Job {
                from: self,
                to: next,
            })
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "Waiting",
            JobStatus::Processing => "Processing",
            JobStatus::Complete => "Complete",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of a single batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BatchStatus {
    #[default]
    Processing,
    Complete,
}

impl BatchStatus {
    /// Statuses a batch may currently hold for a write of `self` to be legal.
    ///
    /// Re-applying the current status is allowed so redelivered work stays idempotent.
    pub fn allowed_from(self) -> &'static [BatchStatus] {
        match self {
            BatchStatus::Processing => &[BatchStatus::Processing],
            BatchStatus::Complete => &[BatchStatus::Processing, BatchStatus::Complete],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Processing => "Processing",
            BatchStatus::Complete => "Complete",
        }
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Batch map of a job, ordered by start frame.
pub type BatchMap = BTreeMap<BatchKey, BatchStatus>;

/// Count batches still rendering.
pub fn outstanding_batches(batches: &BatchMap) -> usize {
    batches
        .values()
        .filter(|status| **status == BatchStatus::Processing)
        .count()
}

/// A render job for one source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderJob {
    /// Source file name, unique per job.
    pub file: String,
    /// Full frame range requested at submission.
    pub range: FrameRange,
    pub job_status: JobStatus,
    /// Per-batch progress; partitions `range`.
    pub batches: BatchMap,
}

impl RenderJob {
    /// Create a waiting job with every batch still processing.
    pub fn new(file: impl Into<String>, range: FrameRange, batch_size: NonZeroU32) -> Self {
        let batches = range
            .split(batch_size)
            .into_iter()
            .map(|key| (key, BatchStatus::Processing))
            .collect();
        Self {
            file: file.into(),
            range,
            job_status: JobStatus::Waiting,
            batches,
        }
    }

    pub fn progress(&self) -> JobProgress {
        JobProgress::of(self.job_status, &self.batches)
    }

    /// Check if every batch has been rendered.
    pub fn all_batches_complete(&self) -> bool {
        outstanding_batches(&self.batches) == 0
    }
}

/// Aggregate view of a job's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub job_status: JobStatus,
    pub completed: usize,
    pub total: usize,
}

impl JobProgress {
    pub fn of(job_status: JobStatus, batches: &BatchMap) -> Self {
        let total = batches.len();
        Self {
            job_status,
            completed: total - outstanding_batches(batches),
            total,
        }
    }

    /// Rendered batches as a percentage.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            (self.completed as f64 / self.total as f64) * 100.0
        }
    }
}

impl std::fmt::Display for JobProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.job_status == JobStatus::Complete {
            return f.write_str("sequencing complete");
        }
        write!(
            f,
            "{}/{} batches rendered ({:.2}%)",
            self.completed,
            self.total,
            self.percent()
        )
    }
}

/// Registry answer for a status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobView {
    Unknown,
    Known(JobProgress),
}

impl std::fmt::Display for JobView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobView::Unknown => f.write_str("unknown"),
            JobView::Known(progress) => progress.fmt(f),
        }
    }
}
