//! Durable work queue with at-least-once delivery.
//!
//! Messages are rows in `work_item`. Receiving a message hides it for a
//! visibility window instead of removing it; only an acknowledgement with the
//! matching receipt deletes it. A receiver that dies before acknowledging
//! simply lets the window lapse and the message is delivered again.

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;
use ulid::Ulid;

use crate::repositories::with_retry;
use crate::{Database, DbError};

/// How many visible candidates a single receive tries to claim.
const CLAIM_CANDIDATES: i64 = 8;

/// Shared handle to the work queue.
#[derive(Clone)]
pub struct WorkQueue {
    db: Database,
}

/// Internal record type for SurrealDB.
#[derive(Debug, Serialize, Deserialize)]
struct WorkRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Thing>,
    body: String,
    enqueued_at: i64,
    visible_at: i64,
    #[serde(default)]
    receive_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    receipt: Option<String>,
}

impl WorkRecord {
    fn new(body: String) -> Self {
        let now = now_millis();
        Self {
            id: None,
            body,
            enqueued_at: now,
            visible_at: now,
            receive_count: 0,
            receipt: None,
        }
    }

    fn message_id(&self) -> Option<String> {
        self.id.as_ref().map(|t| t.id.to_raw())
    }
}

/// Proof of a particular delivery, required to acknowledge it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    message_id: String,
    token: String,
}

impl Receipt {
    pub fn message_id(&self) -> &str {
        &self.message_id
    }
}

/// A received message, hidden from other receivers until its window lapses.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub receipt: Receipt,
    pub body: String,
    /// 1 on first delivery, incremented on every redelivery.
    pub receive_count: u32,
}

/// Snapshot of a queued message for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    pub id: String,
    pub body: String,
    pub receive_count: u32,
    pub in_flight: bool,
}

impl WorkQueue {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Enqueue a message under a fresh id.
    pub async fn send(&self, body: impl Into<String>) -> Result<String, DbError> {
        let id = Ulid::new().to_string();
        let record = WorkRecord::new(body.into());

        let created: Option<WorkRecord> =
            self.db.create(("work_item", id.clone())).content(record).await?;

        created
            .and_then(|r| r.message_id())
            .ok_or_else(|| DbError::Query("Failed to enqueue work item".into()))
    }

    /// Enqueue a message unless one with the same key is still queued.
    ///
    /// Returns `false` when the key is taken. The key frees up once the
    /// earlier message is acknowledged.
    pub async fn send_unique(
        &self,
        dedup_key: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<bool, DbError> {
        let key = dedup_key.into();
        let body = body.into();

        let created = with_retry(|| async {
            let created: Option<WorkRecord> = self
                .db
                .create(("work_item", key.clone()))
                .content(WorkRecord::new(body.clone()))
                .await?;
            Ok(created)
        })
        .await;

        match created {
            Ok(Some(_)) => Ok(true),
            Ok(None) => Err(DbError::Query("Failed to enqueue work item".into())),
            Err(e) if e.is_record_exists() => {
                tracing::debug!("Work item {} already queued", key);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Receive the oldest visible message, hiding it for `visibility`.
    ///
    /// Returns `None` when nothing is visible right now.
    pub async fn receive(&self, visibility: Duration) -> Result<Option<Delivery>, DbError> {
        let now = now_millis();
        let window = i64::try_from(visibility.as_millis()).unwrap_or(i64::MAX);
        let deadline = now.saturating_add(window);

        let mut result = self
            .db
            .query(
                "SELECT * FROM work_item WHERE visible_at <= $now ORDER BY visible_at ASC, enqueued_at ASC LIMIT $limit",
            )
            .bind(("now", now))
            .bind(("limit", CLAIM_CANDIDATES))
            .await?;

        let candidates: Vec<WorkRecord> = result.take(0)?;

        for candidate in candidates {
            let Some(message_id) = candidate.message_id() else {
                continue;
            };
            let token = Ulid::new().to_string();

            // Another receiver may claim the same candidate first.
            let claimed =
                with_retry(|| self.claim(&message_id, &token, now, deadline)).await?;
            if let Some(record) = claimed {
                return Ok(Some(Delivery {
                    receipt: Receipt { message_id, token },
                    body: record.body,
                    receive_count: record.receive_count,
                }));
            }
        }

        Ok(None)
    }

    async fn claim(
        &self,
        message_id: &str,
        token: &str,
        now: i64,
        deadline: i64,
    ) -> Result<Option<WorkRecord>, DbError> {
        let mut result = self
            .db
            .query(
                "UPDATE type::thing('work_item', $id) SET visible_at = $deadline, receipt = $receipt, receive_count += 1 WHERE visible_at <= $now RETURN AFTER",
            )
            .bind(("id", message_id.to_string()))
            .bind(("deadline", deadline))
            .bind(("receipt", token.to_string()))
            .bind(("now", now))
            .await?;

        let records: Vec<WorkRecord> = result.take(0)?;
        Ok(records.into_iter().next())
    }

    /// Permanently remove a delivered message.
    ///
    /// Returns `false` when the receipt is stale: the message was redelivered
    /// to someone else after this window lapsed, or was already acknowledged.
    pub async fn ack(&self, receipt: &Receipt) -> Result<bool, DbError> {
        let removed = with_retry(|| self.ack_once(receipt)).await?;
        if !removed {
            tracing::warn!("Stale receipt for work item {}", receipt.message_id);
        }
        Ok(removed)
    }

    async fn ack_once(&self, receipt: &Receipt) -> Result<bool, DbError> {
        let mut result = self
            .db
            .query("DELETE type::thing('work_item', $id) WHERE receipt = $receipt RETURN BEFORE")
            .bind(("id", receipt.message_id.clone()))
            .bind(("receipt", receipt.token.clone()))
            .await?;

        let records: Vec<WorkRecord> = result.take(0)?;
        Ok(!records.is_empty())
    }

    /// Number of messages in the queue, in flight or not.
    pub async fn depth(&self) -> Result<u64, DbError> {
        let mut result = self
            .db
            .query("SELECT count() AS count FROM work_item GROUP ALL")
            .await?;
        count_from(result.take(0)?)
    }

    /// Number of messages a receiver could claim right now.
    pub async fn visible_depth(&self) -> Result<u64, DbError> {
        let mut result = self
            .db
            .query("SELECT count() AS count FROM work_item WHERE visible_at <= $now GROUP ALL")
            .bind(("now", now_millis()))
            .await?;
        count_from(result.take(0)?)
    }

    /// List queued messages in arrival order.
    pub async fn list(&self) -> Result<Vec<QueuedMessage>, DbError> {
        let now = now_millis();
        let mut result = self
            .db
            .query("SELECT * FROM work_item ORDER BY enqueued_at ASC")
            .await?;

        let records: Vec<WorkRecord> = result.take(0)?;

        Ok(records
            .into_iter()
            .map(|r| QueuedMessage {
                id: r.message_id().unwrap_or_default(),
                in_flight: r.visible_at > now,
                receive_count: r.receive_count,
                body: r.body,
            })
            .collect())
    }
}

#[derive(Deserialize)]
struct CountResult {
    count: i64,
}

fn count_from(counts: Vec<CountResult>) -> Result<u64, DbError> {
    let count = counts.first().map_or(0, |c| c.count);
    u64::try_from(count).map_err(|e| DbError::Serialization(e.to_string()))
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
