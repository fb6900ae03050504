#![allow(clippy::disallowed_methods)]

mod common;

use std::collections::HashSet;
use std::error::Error;
use std::num::NonZeroU32;
use std::time::Duration;

use futures_util::future::join_all;
use render_core::{
    BatchStatus, DEFAULT_BATCH_SIZE, FrameRange, JobStatus, JobView, LogEntry, RenderJob,
    TransitionError,
};

use db::{Admission, DbError, ErrorLogRepository, JobRepository, Transition, WorkQueue};

fn job(file: &str, start: u32, end: u32) -> RenderJob {
    RenderJob::new(file, FrameRange { start, end }, DEFAULT_BATCH_SIZE)
}

fn key(start: u32, end: u32) -> FrameRange {
    FrameRange { start, end }
}

#[tokio::test]
async fn test_job_create_is_idempotent() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let jobs = JobRepository::new(db);

    let first = jobs.create(&job("scene.blend", 1, 7)).await?;
    assert!(matches!(first, Admission::Created(_)));
    assert_eq!(first.job().batches.len(), 3);

    // A second submission with a different range keeps the original job.
    let second = jobs.create(&job("scene.blend", 1, 100)).await?;
    match second {
        Admission::Existing(existing) => assert_eq!(existing.range, key(1, 7)),
        other => panic!("expected existing job, got {other:?}"),
    }

    assert_eq!(jobs.status("missing.blend").await?, JobView::Unknown);
    match jobs.status("scene.blend").await? {
        JobView::Known(progress) => {
            assert_eq!(progress.completed, 0);
            assert_eq!(progress.total, 3);
            assert_eq!(progress.to_string(), "0/3 batches rendered (0.00%)");
        }
        JobView::Unknown => panic!("job should be known"),
    }

    Ok(())
}

#[tokio::test]
async fn test_concurrent_creates_admit_one_job() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let jobs = JobRepository::new(db);

    let attempts = (0..8).map(|_| {
        let jobs = jobs.clone();
        tokio::spawn(async move { jobs.create(&job("race.blend", 1, 9)).await })
    });

    let mut created = 0;
    for outcome in join_all(attempts).await {
        if let Admission::Created(_) = outcome?? {
            created += 1;
        }
    }
    assert_eq!(created, 1);

    Ok(())
}

#[tokio::test]
async fn test_update_batch_returns_map_after_write() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let jobs = JobRepository::new(db);
    jobs.create(&job("scene.blend", 1, 7)).await?;

    let after = jobs
        .update_batch("scene.blend", key(4, 6), BatchStatus::Complete)
        .await?;
    assert_eq!(after.get(&key(4, 6)), Some(&BatchStatus::Complete));
    assert_eq!(after.get(&key(1, 3)), Some(&BatchStatus::Processing));
    assert_eq!(after.get(&key(7, 7)), Some(&BatchStatus::Processing));

    // Completing twice is allowed; redelivered work repeats the write.
    let again = jobs
        .update_batch("scene.blend", key(4, 6), BatchStatus::Complete)
        .await?;
    assert_eq!(again, after);

    // A finished batch never goes back to processing.
    let err = jobs
        .update_batch("scene.blend", key(4, 6), BatchStatus::Processing)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DbError::Transition(TransitionError::Batch {
            from: BatchStatus::Complete,
            to: BatchStatus::Processing
        })
    ));

    let missing_batch = jobs
        .update_batch("scene.blend", key(2, 4), BatchStatus::Complete)
        .await;
    assert!(matches!(missing_batch, Err(DbError::NotFound(_))));

    let missing_job = jobs
        .update_batch("missing.blend", key(1, 3), BatchStatus::Complete)
        .await;
    assert!(matches!(missing_job, Err(DbError::NotFound(_))));

    Ok(())
}

#[tokio::test]
async fn test_concurrent_disjoint_batch_updates_all_land() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let jobs = JobRepository::new(db);

    let batch_size = NonZeroU32::new(1).unwrap();
    let created = jobs
        .create(&RenderJob::new("wide.blend", key(1, 16), batch_size))
        .await?;
    let keys: Vec<FrameRange> = created.job().batches.keys().copied().collect();
    assert_eq!(keys.len(), 16);

    let updates = keys.iter().map(|k| {
        let jobs = jobs.clone();
        let k = *k;
        tokio::spawn(async move {
            jobs.update_batch("wide.blend", k, BatchStatus::Complete)
                .await
        })
    });

    let mut observed_all_complete = 0;
    for outcome in join_all(updates).await {
        let after = outcome??;
        if after.values().all(|s| *s == BatchStatus::Complete) {
            observed_all_complete += 1;
        }
    }

    // The last writer sees the finished map.
    assert!(observed_all_complete >= 1);

    let stored = jobs.get("wide.blend").await?.unwrap();
    assert!(stored.all_batches_complete());

    Ok(())
}

#[tokio::test]
async fn test_job_status_transitions() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let jobs = JobRepository::new(db);
    jobs.create(&job("scene.blend", 1, 3)).await?;

    // Skipping a status is rejected before touching the store.
    let skip = jobs
        .transition("scene.blend", JobStatus::Waiting, JobStatus::Complete)
        .await;
    assert!(matches!(skip, Err(DbError::Transition(_))));

    let first = jobs
        .transition("scene.blend", JobStatus::Waiting, JobStatus::Processing)
        .await?;
    assert_eq!(first, Transition::Applied);

    let second = jobs
        .transition("scene.blend", JobStatus::Waiting, JobStatus::Processing)
        .await?;
    assert_eq!(
        second,
        Transition::Stale {
            current: JobStatus::Processing
        }
    );

    let done = jobs.set_job_status("scene.blend", JobStatus::Complete).await?;
    assert_eq!(done, Transition::Applied);

    let repeat = jobs.set_job_status("scene.blend", JobStatus::Complete).await?;
    assert_eq!(
        repeat,
        Transition::Stale {
            current: JobStatus::Complete
        }
    );

    // Waiting has no predecessor.
    let initial = jobs.set_job_status("scene.blend", JobStatus::Waiting).await;
    assert!(matches!(
        initial,
        Err(DbError::Transition(TransitionError::Initial(JobStatus::Waiting)))
    ));

    let stored = jobs.get("scene.blend").await?.unwrap();
    assert_eq!(stored.job_status, JobStatus::Complete);
    assert_eq!(stored.progress().to_string(), "sequencing complete");

    Ok(())
}

#[tokio::test]
async fn test_list_jobs_by_status() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let jobs = JobRepository::new(db);

    jobs.create(&job("b.blend", 1, 3)).await?;
    jobs.create(&job("a.blend", 1, 3)).await?;
    jobs.create(&job("c.blend", 1, 3)).await?;
    jobs.transition("b.blend", JobStatus::Waiting, JobStatus::Processing)
        .await?;
    jobs.transition("a.blend", JobStatus::Waiting, JobStatus::Processing)
        .await?;

    let processing: Vec<String> = jobs
        .list_by_status(JobStatus::Processing)
        .await?
        .into_iter()
        .map(|j| j.file)
        .collect();
    assert_eq!(processing, vec!["a.blend", "b.blend"]);
    assert!(jobs.list_by_status(JobStatus::Complete).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_concurrent_transitions_have_one_winner() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let jobs = JobRepository::new(db);
    jobs.create(&job("scene.blend", 1, 3)).await?;

    let racers = (0..6).map(|_| {
        let jobs = jobs.clone();
        tokio::spawn(async move {
            jobs.transition("scene.blend", JobStatus::Waiting, JobStatus::Processing)
                .await
        })
    });

    let mut applied = 0;
    for outcome in join_all(racers).await {
        match outcome?? {
            Transition::Applied => applied += 1,
            Transition::Stale { current } => assert_eq!(current, JobStatus::Processing),
        }
    }
    assert_eq!(applied, 1);

    Ok(())
}

#[tokio::test]
async fn test_queue_delivery_and_ack() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let queue = WorkQueue::new(db);

    assert!(queue.receive(Duration::from_secs(30)).await?.is_none());

    queue.send("first").await?;
    tokio::time::sleep(Duration::from_millis(5)).await;
    queue.send("second").await?;
    assert_eq!(queue.depth().await?, 2);
    assert_eq!(queue.visible_depth().await?, 2);

    let first = queue.receive(Duration::from_secs(30)).await?.unwrap();
    assert_eq!(first.body, "first");
    assert_eq!(first.receive_count, 1);

    // The claimed message is hidden but still queued.
    assert_eq!(queue.depth().await?, 2);
    assert_eq!(queue.visible_depth().await?, 1);

    let second = queue.receive(Duration::from_secs(30)).await?.unwrap();
    assert_eq!(second.body, "second");
    assert!(queue.receive(Duration::from_secs(30)).await?.is_none());

    assert!(queue.ack(&first.receipt).await?);
    assert!(!queue.ack(&first.receipt).await?);
    assert_eq!(queue.depth().await?, 1);

    let listed = queue.list().await?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].body, "second");
    assert!(listed[0].in_flight);

    Ok(())
}

#[tokio::test]
async fn test_queue_redelivers_after_visibility_window() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let queue = WorkQueue::new(db);
    queue.send("render").await?;

    let lost = queue.receive(Duration::from_millis(50)).await?.unwrap();
    assert!(queue.receive(Duration::from_millis(50)).await?.is_none());

    tokio::time::sleep(Duration::from_millis(120)).await;

    let again = queue.receive(Duration::from_secs(30)).await?.unwrap();
    assert_eq!(again.body, "render");
    assert_eq!(again.receive_count, 2);
    assert_eq!(again.receipt.message_id(), lost.receipt.message_id());

    // The first receiver's receipt no longer removes the message.
    assert!(!queue.ack(&lost.receipt).await?);
    assert_eq!(queue.depth().await?, 1);

    assert!(queue.ack(&again.receipt).await?);
    assert_eq!(queue.depth().await?, 0);

    Ok(())
}

#[tokio::test]
async fn test_concurrent_receivers_never_share_a_message() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let queue = WorkQueue::new(db);
    for i in 0..5 {
        queue.send(format!("item-{i}")).await?;
    }

    let receivers = (0..10).map(|_| {
        let queue = queue.clone();
        tokio::spawn(async move { queue.receive(Duration::from_secs(30)).await })
    });

    let mut bodies = Vec::new();
    for outcome in join_all(receivers).await {
        if let Some(delivery) = outcome?? {
            bodies.push(delivery.body);
        }
    }
    let unique: HashSet<&String> = bodies.iter().collect();
    assert!(bodies.len() <= 5);
    assert_eq!(unique.len(), bodies.len());

    Ok(())
}

#[tokio::test]
async fn test_send_unique_deduplicates_until_acked() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let queue = WorkQueue::new(db);

    assert!(queue.send_unique("sequence:scene.blend", "seq").await?);
    assert!(!queue.send_unique("sequence:scene.blend", "seq").await?);
    assert_eq!(queue.depth().await?, 1);

    let delivery = queue.receive(Duration::from_secs(30)).await?.unwrap();
    assert_eq!(delivery.receipt.message_id(), "sequence:scene.blend");

    // Still taken while in flight.
    assert!(!queue.send_unique("sequence:scene.blend", "seq").await?);

    assert!(queue.ack(&delivery.receipt).await?);
    assert!(queue.send_unique("sequence:scene.blend", "seq").await?);

    Ok(())
}

#[tokio::test]
async fn test_error_log_is_append_only() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let errors = ErrorLogRepository::new(db);

    errors
        .append(&LogEntry::error("worker-1", "render", "blender exited with 1"))
        .await?;
    errors
        .append(&LogEntry::error("worker-1", "upload", "bucket unavailable"))
        .await?;
    errors
        .append(&LogEntry::error("worker-2", "encode", "ffmpeg missing"))
        .await?;

    let first = errors.list_for_worker("worker-1").await?;
    assert_eq!(first.len(), 2);
    assert!(first.iter().all(|r| !r.success));
    assert!(first.iter().any(|r| r.message == "render: blender exited with 1"));

    assert_eq!(errors.list().await?.len(), 3);
    assert!(errors.list_for_worker("worker-3").await?.is_empty());

    Ok(())
}
