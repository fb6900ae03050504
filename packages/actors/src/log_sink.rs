//! Durable destination for worker log entries.

use std::fmt::{Display, Write as _};

use bytes::Bytes;
use chrono::Utc;
use db::ErrorLogRepository;
use render_core::artifact::worker_log_name;
use render_core::{LogEntry, LogKind};
use storage::Storage;

use crate::error::LogSinkError;

/// Transcript of one handler run, one `<unix seconds>,<message>` line per step.
#[derive(Debug, Default, Clone)]
pub struct JobLog {
    lines: String,
}

impl JobLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, message: impl Display) {
        let secs = Utc::now().timestamp_millis() as f64 / 1000.0;
        let _ = writeln!(self.lines, "{secs:.3},{message}");
    }

    pub fn as_str(&self) -> &str {
        &self.lines
    }

    pub fn into_string(self) -> String {
        self.lines
    }
}

/// Routes log entries: errors to the audit table, transcripts to the logs bucket.
#[derive(Clone)]
pub struct LogSink {
    logs: Storage,
    errors: ErrorLogRepository,
}

impl LogSink {
    pub fn new(logs: Storage, errors: ErrorLogRepository) -> Self {
        Self { logs, errors }
    }

    /// Persist an entry.
    ///
    /// Transcripts are appended to `<worker id>.csv` by rewriting the object,
    /// which is safe because each worker id has a single writer.
    pub async fn record(&self, entry: &LogEntry) -> Result<(), LogSinkError> {
        match entry.kind {
            LogKind::Error => {
                tracing::warn!(worker = %entry.id, "{}", entry.message);
                self.errors.append(entry).await?;
            }
            LogKind::Log => {
                tracing::info!(
                    worker = %entry.id,
                    success = entry.success,
                    "{}",
                    entry.message.trim_end()
                );
                if entry.message.is_empty() {
                    return Ok(());
                }

                let key = worker_log_name(&entry.id);
                let mut content = self
                    .logs
                    .get_optional(&key)
                    .await?
                    .map(|existing| existing.to_vec())
                    .unwrap_or_default();
                content.extend_from_slice(entry.message.as_bytes());
                if !entry.message.ends_with('\n') {
                    content.push(b'\n');
                }
                self.logs.put_bytes(&key, Bytes::from(content)).await?;
            }
        }
        Ok(())
    }

    /// Full transcript of a worker, if it has written one.
    pub async fn transcript(&self, worker_id: &str) -> Result<Option<String>, LogSinkError> {
        let bytes = self.logs.get_optional(&worker_log_name(worker_id)).await?;
        Ok(bytes.map(|b| String::from_utf8_lossy(&b).into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_log_lines_are_timestamped_csv() {
        let mut log = JobLog::new();
        log.record("Downloaded file scene.blend for render");
        log.record(format_args!("Rendered frames {} to {}", 1, 3));

        let lines: Vec<&str> = log.as_str().lines().collect();
        assert_eq!(lines.len(), 2);
        let (stamp, message) = lines[1].split_once(',').unwrap_or_default();
        assert!(stamp.parse::<f64>().is_ok());
        assert_eq!(message, "Rendered frames 1 to 3");
    }
}
