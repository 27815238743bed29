//! In-process [`JobQueue`] implementation.
//!
//! Backed by a single `tokio::sync::Mutex`, which serializes claims so a
//! job is owned by exactly one worker slot at a time. Used by the test
//! suites and for embedding the engine without a database.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::queue::{
    backoff_delay, clean_cutoff, run_at_after, to_chrono, EnqueueOptions, JobFailure, JobQueue,
    JobState, QueueCounts, QueueError, QueuedJob, SweepLease, SweepLock,
};
use crate::types::JobId;

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, Entry>,
    /// Monotonic insertion counter; breaks ties between equal timestamps.
    next_seq: u64,
    paused: bool,
}

struct Entry {
    seq: u64,
    keep_completed: usize,
    keep_failed: usize,
    job: QueuedJob,
}

/// Mutex-guarded queue living entirely in memory.
#[derive(Default)]
pub struct MemoryJobQueue {
    inner: Mutex<Inner>,
    sweep: Arc<Mutex<()>>,
}

struct MemorySweepLease {
    _guard: tokio::sync::OwnedMutexGuard<()>,
}

#[async_trait]
impl SweepLease for MemorySweepLease {
    async fn release(self: Box<Self>) {}
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in any state.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Override the creation time of an entry. Test support for age-based
    /// policies.
    pub async fn set_created_at(&self, id: &str, created_at: crate::types::Timestamp) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.jobs.get_mut(id) {
            Some(entry) => {
                entry.job.created_at = created_at;
                true
            }
            None => false,
        }
    }
}

impl Inner {
    fn entry_mut(&mut self, id: &str) -> Result<&mut Entry, QueueError> {
        self.jobs
            .get_mut(id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))
    }

    /// Drop the oldest finished entries in `state` beyond `keep`.
    fn trim(&mut self, state: JobState, keep: usize) {
        let mut finished: Vec<(chrono::DateTime<Utc>, u64, JobId)> = self
            .jobs
            .values()
            .filter(|e| e.job.state == state)
            .map(|e| (e.job.finished_at.unwrap_or(e.job.created_at), e.seq, e.job.id.clone()))
            .collect();
        if finished.len() <= keep {
            return;
        }
        finished.sort();
        let excess = finished.len() - keep;
        for (_, _, id) in finished.into_iter().take(excess) {
            self.jobs.remove(&id);
        }
    }
}

fn expect_active(entry: &Entry) -> Result<(), QueueError> {
    if entry.job.state != JobState::Active {
        return Err(QueueError::InvalidState {
            id: entry.job.id.clone(),
            state: entry.job.state,
            expected: JobState::Active,
        });
    }
    Ok(())
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(
        &self,
        data: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<QueuedJob, QueueError> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.jobs.get(&options.job_id) {
            return Ok(existing.job.clone());
        }

        let now = Utc::now();
        let run_at = run_at_after(now, options.delay)?;
        let state = if options.delay.is_zero() {
            JobState::Waiting
        } else {
            JobState::Delayed
        };
        let job = QueuedJob {
            id: options.job_id.clone(),
            state,
            priority: options.priority,
            data,
            result: None,
            progress: 0,
            attempts_made: 0,
            max_attempts: options.attempts.max(1),
            backoff_base_ms: options.backoff_base.as_millis() as u64,
            failure: None,
            created_at: now,
            run_at,
            processed_at: None,
            finished_at: None,
        };

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.jobs.insert(
            options.job_id,
            Entry {
                seq,
                keep_completed: options.keep_completed,
                keep_failed: options.keep_failed,
                job: job.clone(),
            },
        );
        Ok(job)
    }

    async fn claim_next(&self) -> Result<Option<QueuedJob>, QueueError> {
        let mut inner = self.inner.lock().await;
        if inner.paused {
            return Ok(None);
        }

        let now = Utc::now();
        let next = inner
            .jobs
            .values()
            .filter(|e| matches!(e.job.state, JobState::Waiting | JobState::Delayed))
            .filter(|e| e.job.run_at <= now)
            // Highest priority first, then oldest insertion.
            .max_by(|a, b| {
                a.job
                    .priority
                    .cmp(&b.job.priority)
                    .then_with(|| b.seq.cmp(&a.seq))
            })
            .map(|e| e.job.id.clone());

        let Some(id) = next else {
            return Ok(None);
        };
        let entry = inner.entry_mut(&id)?;
        entry.job.state = JobState::Active;
        entry.job.progress = 0;
        entry.job.processed_at = Some(now);
        Ok(Some(entry.job.clone()))
    }

    async fn update_progress(&self, id: &str, percent: u8) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let entry = inner.entry_mut(id)?;
        expect_active(entry)?;
        entry.job.progress = percent.min(100);
        Ok(())
    }

    async fn complete(&self, id: &str, result: serde_json::Value) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let entry = inner.entry_mut(id)?;
        expect_active(entry)?;
        entry.job.state = JobState::Completed;
        entry.job.progress = 100;
        entry.job.result = Some(result);
        entry.job.finished_at = Some(Utc::now());
        let keep = entry.keep_completed;
        inner.trim(JobState::Completed, keep);
        Ok(())
    }

    async fn fail(&self, id: &str, failure: JobFailure) -> Result<JobState, QueueError> {
        let mut inner = self.inner.lock().await;
        let entry = inner.entry_mut(id)?;
        expect_active(entry)?;

        let now = Utc::now();
        entry.job.attempts_made += 1;
        entry.job.failure = Some(failure);

        if entry.job.attempts_made < entry.job.max_attempts {
            let delay = backoff_delay(
                Duration::from_millis(entry.job.backoff_base_ms),
                entry.job.attempts_made,
            );
            entry.job.state = JobState::Delayed;
            entry.job.run_at = now + to_chrono(delay);
            return Ok(JobState::Delayed);
        }

        entry.job.state = JobState::Failed;
        entry.job.finished_at = Some(now);
        let keep = entry.keep_failed;
        inner.trim(JobState::Failed, keep);
        Ok(JobState::Failed)
    }

    async fn get(&self, id: &str) -> Result<Option<QueuedJob>, QueueError> {
        let inner = self.inner.lock().await;
        Ok(inner.jobs.get(id).map(|e| e.job.clone()))
    }

    async fn counts(&self) -> Result<QueueCounts, QueueError> {
        let inner = self.inner.lock().await;
        let now = Utc::now();
        let mut counts = QueueCounts {
            paused: inner.paused,
            ..Default::default()
        };
        for entry in inner.jobs.values() {
            match entry.job.state {
                JobState::Waiting | JobState::Delayed if entry.job.run_at > now => {
                    counts.delayed += 1
                }
                JobState::Waiting | JobState::Delayed => counts.waiting += 1,
                JobState::Active => counts.active += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn failed_jobs(&self) -> Result<Vec<QueuedJob>, QueueError> {
        let inner = self.inner.lock().await;
        let mut failed: Vec<&Entry> = inner
            .jobs
            .values()
            .filter(|e| e.job.state == JobState::Failed)
            .collect();
        failed.sort_by_key(|e| e.seq);
        Ok(failed.into_iter().map(|e| e.job.clone()).collect())
    }

    async fn remove(&self, id: &str) -> Result<bool, QueueError> {
        Ok(self.inner.lock().await.jobs.remove(id).is_some())
    }

    async fn pause(&self) -> Result<(), QueueError> {
        self.inner.lock().await.paused = true;
        Ok(())
    }

    async fn resume(&self) -> Result<(), QueueError> {
        self.inner.lock().await.paused = false;
        Ok(())
    }

    async fn is_paused(&self) -> Result<bool, QueueError> {
        Ok(self.inner.lock().await.paused)
    }

    async fn clean(&self, grace: Duration, state: JobState) -> Result<Vec<JobId>, QueueError> {
        let cutoff = clean_cutoff(Utc::now(), grace)?;
        let mut inner = self.inner.lock().await;
        let stale: Vec<JobId> = inner
            .jobs
            .values()
            .filter(|e| e.job.state == state)
            .filter(|e| e.job.finished_at.unwrap_or(e.job.created_at) <= cutoff)
            .map(|e| e.job.id.clone())
            .collect();
        for id in &stale {
            inner.jobs.remove(id);
        }
        Ok(stale)
    }

    async fn try_lock_sweep(&self) -> Result<Option<SweepLock>, QueueError> {
        Ok(self
            .sweep
            .clone()
            .try_lock_owned()
            .ok()
            .map(|guard| Box::new(MemorySweepLease { _guard: guard }) as SweepLock))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn options(id: &str) -> EnqueueOptions {
        EnqueueOptions::new(id)
    }

    #[tokio::test]
    async fn claims_by_priority_then_insertion_order() {
        let queue = MemoryJobQueue::new();
        queue.enqueue(json!({}), options("a")).await.unwrap();
        queue.enqueue(json!({}), options("b")).await.unwrap();
        queue
            .enqueue(
                json!({}),
                EnqueueOptions {
                    priority: 10,
                    ..options("c")
                },
            )
            .await
            .unwrap();

        let order: Vec<String> = [
            queue.claim_next().await.unwrap(),
            queue.claim_next().await.unwrap(),
            queue.claim_next().await.unwrap(),
        ]
        .into_iter()
        .map(|j| j.unwrap().id)
        .collect();
        assert_eq!(order, ["c", "a", "b"]);
        assert!(queue.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_id_returns_existing_entry() {
        let queue = MemoryJobQueue::new();
        queue.enqueue(json!({"n": 1}), options("dup")).await.unwrap();
        let second = queue.enqueue(json!({"n": 2}), options("dup")).await.unwrap();
        assert_eq!(second.data["n"], 1);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn delayed_job_is_not_claimable_yet() {
        let queue = MemoryJobQueue::new();
        queue
            .enqueue(
                json!({}),
                EnqueueOptions {
                    delay: Duration::from_secs(60),
                    ..options("later")
                },
            )
            .await
            .unwrap();
        assert!(queue.claim_next().await.unwrap().is_none());
        assert_eq!(queue.counts().await.unwrap().delayed, 1);
    }

    #[tokio::test]
    async fn paused_queue_claims_nothing() {
        let queue = MemoryJobQueue::new();
        queue.enqueue(json!({}), options("a")).await.unwrap();
        queue.pause().await.unwrap();
        assert!(queue.claim_next().await.unwrap().is_none());
        assert!(queue.counts().await.unwrap().paused);
        queue.resume().await.unwrap();
        assert!(queue.claim_next().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failure_backs_off_until_attempts_exhausted() {
        let queue = MemoryJobQueue::new();
        queue
            .enqueue(
                json!({}),
                EnqueueOptions {
                    attempts: 2,
                    backoff_base: Duration::ZERO,
                    ..options("f")
                },
            )
            .await
            .unwrap();

        queue.claim_next().await.unwrap().unwrap();
        let state = queue
            .fail("f", JobFailure::new("boom", None))
            .await
            .unwrap();
        assert_eq!(state, JobState::Delayed);

        queue.claim_next().await.unwrap().unwrap();
        let state = queue
            .fail("f", JobFailure::new("boom again", Some(503)))
            .await
            .unwrap();
        assert_eq!(state, JobState::Failed);

        let failed = queue.failed_jobs().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].attempts_made, 2);
        assert_eq!(failed[0].failed_reason(), Some("boom again"));
        assert_eq!(failed[0].failure.as_ref().unwrap().status_code, Some(503));
    }

    #[tokio::test]
    async fn complete_requires_active_state() {
        let queue = MemoryJobQueue::new();
        queue.enqueue(json!({}), options("a")).await.unwrap();
        let err = queue.complete("a", json!({})).await.unwrap_err();
        assert_matches!(err, QueueError::InvalidState { .. });
    }

    #[tokio::test]
    async fn completed_retention_keeps_newest() {
        let queue = MemoryJobQueue::new();
        for i in 0..4 {
            let id = format!("j{i}");
            queue
                .enqueue(
                    json!({}),
                    EnqueueOptions {
                        keep_completed: 2,
                        ..options(&id)
                    },
                )
                .await
                .unwrap();
            queue.claim_next().await.unwrap().unwrap();
            queue.complete(&id, json!({"i": i})).await.unwrap();
        }
        assert_eq!(queue.counts().await.unwrap().completed, 2);
        assert!(queue.get("j0").await.unwrap().is_none());
        assert!(queue.get("j3").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn clean_removes_only_matching_state() {
        let queue = MemoryJobQueue::new();
        queue.enqueue(json!({}), options("done")).await.unwrap();
        queue.claim_next().await.unwrap();
        queue.complete("done", json!({})).await.unwrap();
        queue.enqueue(json!({}), options("pending")).await.unwrap();

        let removed = queue
            .clean(Duration::ZERO, JobState::Completed)
            .await
            .unwrap();
        assert_eq!(removed, vec!["done".to_string()]);
        assert!(queue.get("pending").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn oversized_delay_and_grace_are_rejected() {
        let queue = MemoryJobQueue::new();
        let result = queue
            .enqueue(
                json!({}),
                EnqueueOptions {
                    delay: Duration::from_millis(u64::MAX),
                    ..options("far")
                },
            )
            .await;
        assert_matches!(result, Err(QueueError::OutOfRange { what: "delay", .. }));
        assert!(queue.is_empty().await);

        assert_matches!(
            queue
                .clean(Duration::from_secs(10_000_000_000_000), JobState::Completed)
                .await,
            Err(QueueError::OutOfRange { what: "grace period", .. })
        );
    }

    #[tokio::test]
    async fn sweep_lock_is_exclusive_until_released() {
        let queue = MemoryJobQueue::new();
        let lock = queue.try_lock_sweep().await.unwrap().unwrap();
        assert!(queue.try_lock_sweep().await.unwrap().is_none());

        lock.release().await;
        let again = queue.try_lock_sweep().await.unwrap();
        assert!(again.is_some());
        drop(again);
        assert!(queue.try_lock_sweep().await.unwrap().is_some());
    }
}
