//! Render job registry with atomic per-field updates.

use render_core::{
    BatchKey, BatchMap, BatchStatus, JobStatus, JobView, RenderJob, TransitionError,
};
use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;

use crate::repositories::with_retry;
use crate::{Database, DbError};

/// Repository for render job records, keyed by source file name.
#[derive(Clone)]
pub struct JobRepository {
    db: Database,
}

/// Internal record type for SurrealDB.
#[derive(Debug, Serialize, Deserialize)]
struct JobRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Thing>,
    #[serde(flatten)]
    job: RenderJob,
}

/// Outcome of [`JobRepository::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The job was stored by this call.
    Created(RenderJob),
    /// A job for the same file already existed and was left untouched.
    Existing(RenderJob),
}

impl Admission {
    pub fn job(&self) -> &RenderJob {
        match self {
            Admission::Created(job) | Admission::Existing(job) => job,
        }
    }
}

/// Outcome of [`JobRepository::transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// This call moved the job to the requested status.
    Applied,
    /// The job was already at or past the requested status.
    Stale { current: JobStatus },
}

impl JobRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Store a new job unless one already exists for the same file.
    ///
    /// Creation is a single create-if-absent on the record id, so concurrent
    /// submitters of the same file end up with exactly one record.
    pub async fn create(&self, job: &RenderJob) -> Result<Admission, DbError> {
        let created = with_retry(|| async {
            let record: Option<JobRecord> = self
                .db
                .create(("render_job", job.file.clone()))
                .content(job.clone())
                .await?;
            Ok(record)
        })
        .await;

        match created {
            Ok(Some(record)) => Ok(Admission::Created(record.job)),
            Ok(None) => Err(DbError::Query("Failed to create render job".into())),
            Err(e) if e.is_record_exists() => {
                let existing = self.require(&job.file).await?;
                Ok(Admission::Existing(existing))
            }
            Err(e) => Err(e),
        }
    }

    /// Get a job by source file name.
    pub async fn get(&self, file: &str) -> Result<Option<RenderJob>, DbError> {
        let record: Option<JobRecord> = self.db.select(("render_job", file.to_string())).await?;
        Ok(record.map(|r| r.job))
    }

    async fn require(&self, file: &str) -> Result<RenderJob, DbError> {
        self.get(file)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("Render job not found: {}", file)))
    }

    /// Aggregate status of a job, or `Unknown` if no job exists.
    pub async fn status(&self, file: &str) -> Result<JobView, DbError> {
        Ok(match self.get(file).await? {
            Some(job) => JobView::Known(job.progress()),
            None => JobView::Unknown,
        })
    }

    /// All jobs currently in `status`, ordered by file name.
    pub async fn list_by_status(&self, status: JobStatus) -> Result<Vec<RenderJob>, DbError> {
        let mut result = self
            .db
            .query("SELECT * FROM render_job WHERE job_status = $status ORDER BY file ASC")
            .bind(("status", status))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;
        Ok(records.into_iter().map(|r| r.job).collect())
    }

    /// Set exactly one batch field and return the batch map after the write.
    ///
    /// The write and the read of the resulting map happen in one statement,
    /// so workers updating disjoint batches of the same job never lose each
    /// other's updates.
    pub async fn update_batch(
        &self,
        file: &str,
        key: BatchKey,
        status: BatchStatus,
    ) -> Result<BatchMap, DbError> {
        let updated = with_retry(|| self.update_batch_once(file, key, status)).await?;
        if let Some(record) = updated {
            return Ok(record.job.batches);
        }

        // Nothing matched: tell a missing job or batch apart from an illegal write.
        let job = self.require(file).await?;
        match job.batches.get(&key) {
            None => Err(DbError::NotFound(format!("Batch {} not found in {}", key, file))),
            Some(current) => Err(TransitionError::Batch {
                from: *current,
                to: status,
            }
            .into()),
        }
    }

    async fn update_batch_once(
        &self,
        file: &str,
        key: BatchKey,
        status: BatchStatus,
    ) -> Result<Option<JobRecord>, DbError> {
        // Batch keys render as `<start>-<end>`, digits and a dash only.
        let field = format!("batches.`{}`", key);
        let query = format!(
            "UPDATE type::thing('render_job', $file) SET {field} = $status WHERE {field} IN $allowed RETURN AFTER"
        );

        let mut result = self
            .db
            .query(query)
            .bind(("file", file.to_string()))
            .bind(("status", status))
            .bind(("allowed", status.allowed_from().to_vec()))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;
        Ok(records.into_iter().next())
    }

    /// Compare-and-swap the job status from `from` to `to`.
    ///
    /// Only legal transitions are attempted. When the job already reached `to`
    /// (or a later status) the call reports `Stale` instead of failing, which
    /// lets racing observers of the same event agree on one winner.
    pub async fn transition(
        &self,
        file: &str,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<Transition, DbError> {
        from.check_transition(to)?;

        let updated = with_retry(|| self.transition_once(file, from, to)).await?;
        if updated {
            tracing::debug!("Render job {} -> {}", file, to);
            return Ok(Transition::Applied);
        }

        let current = self.require(file).await?.job_status;
        if current >= to {
            Ok(Transition::Stale { current })
        } else {
            Err(TransitionError::Job { from: current, to }.into())
        }
    }

    async fn transition_once(
        &self,
        file: &str,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<bool, DbError> {
        let mut result = self
            .db
            .query(
                "UPDATE type::thing('render_job', $file) SET job_status = $to WHERE job_status = $from RETURN AFTER",
            )
            .bind(("file", file.to_string()))
            .bind(("from", from))
            .bind(("to", to))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;
        Ok(!records.is_empty())
    }

    /// Set the job status through its legal predecessor.
    pub async fn set_job_status(&self, file: &str, status: JobStatus) -> Result<Transition, DbError> {
        let from = status
            .predecessor()
            .ok_or(TransitionError::Initial(status))?;
        self.transition(file, from, status).await
    }
}
