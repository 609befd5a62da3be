//! JobRunStore port - Job Run の正本（source of truth）
//!
//! # 設計原則
//! - 失敗の記録と retry の enqueue は同一トランザクション
//!   （`fail` に `RetryRequest` を渡す。実装はキューと同じ datastore を使う）
//! - `success` 済みの run への書き込みは no-op（`Transition::Ignored`）
//! - claim は lease（期限付き）。期限切れの claim は他の配送が取り直せる

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::app::status::RunCounts;
use crate::domain::{JobMessage, JobRun, JobRunId, NewJobRun};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job run {0} not found")]
    RunNotFound(JobRunId),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result of trying to claim a run for execution.
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// The caller now holds the lease and may execute the run.
    Acquired(JobRun),
    /// The run already succeeded; nothing to do.
    Succeeded(JobRun),
    /// Another invocation holds an unexpired lease.
    Held { until: DateTime<Utc> },
}

/// Whether a terminal write changed the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// The run had already succeeded; the write was dropped.
    Ignored,
}

/// Retry to enqueue in the same unit of work as a failure.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryRequest {
    pub message: JobMessage,
    pub delay: Duration,
}

#[async_trait]
pub trait JobRunStore: Send + Sync {
    /// Insert a new run, already claimed until `claim_until`.
    async fn create(&self, new: NewJobRun, claim_until: DateTime<Utc>) -> Result<JobRun, StoreError>;

    async fn get(&self, id: JobRunId) -> Result<Option<JobRun>, StoreError>;

    /// Fails with `StoreError::RunNotFound` if the run does not exist.
    async fn claim(&self, id: JobRunId, until: DateTime<Utc>) -> Result<Claim, StoreError>;

    /// Extend a held lease.
    async fn heartbeat(&self, id: JobRunId, until: DateTime<Utc>) -> Result<(), StoreError>;

    /// Drop a lease without recording an outcome.
    async fn release(&self, id: JobRunId) -> Result<(), StoreError>;

    async fn complete(&self, id: JobRunId, result: serde_json::Value) -> Result<Transition, StoreError>;

    /// Record a failed attempt (`attempts += 1`) and, if given, enqueue the
    /// retry atomically with it.
    async fn fail(
        &self,
        id: JobRunId,
        error: String,
        retry: Option<RetryRequest>,
    ) -> Result<Transition, StoreError>;

    /// Mark the run `error` without counting an attempt or retrying.
    async fn reject(&self, id: JobRunId, error: String) -> Result<Transition, StoreError>;

    async fn counts(&self) -> Result<RunCounts, StoreError>;
}
