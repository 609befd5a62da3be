//! In-memory backend: queue + run store over one lock.
//!
//! キューと Job Run Store が同じ datastore にある構成（pgmq + job_runs テーブル）を
//! 1 つの `Mutex` で再現する。`fail` の「失敗記録 + retry enqueue」は同じロック内で
//! 行うので、どちらか片方だけが残ることはない。

use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::app::status::RunCounts;
use crate::domain::{JobMessage, JobRun, JobRunId, MessageId, NewJobRun, QueuedMessage, RunStatus};
use crate::ports::{
    Claim, Clock, JobQueue, JobRunStore, QueueError, RetryRequest, StoreError, SystemClock,
    Transition,
};

/// Delayed message entry for the visibility heap.
///
/// Reverse ordering so `BinaryHeap` acts as a min-heap (earliest first,
/// then lowest id).
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduledMessage {
    visible_at: DateTime<Utc>,
    id: MessageId,
}

impl PartialOrd for ScheduledMessage {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledMessage {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .visible_at
            .cmp(&self.visible_at)
            .then_with(|| other.id.cmp(&self.id))
    }
}

#[derive(Default)]
struct BackendState {
    /// All run rows (source of truth for runs).
    runs: HashMap<JobRunId, JobRun>,

    /// Messages still in the queue, visible or not.
    messages: HashMap<MessageId, QueuedMessage>,

    /// Visible messages in FIFO order.
    ready: VecDeque<MessageId>,

    /// Delayed messages.
    scheduled: BinaryHeap<ScheduledMessage>,

    /// Every message ever sent, in send order.
    history: Vec<QueuedMessage>,

    next_run_id: u64,
    next_message_id: u64,
}

impl BackendState {
    fn allocate_run_id(&mut self) -> JobRunId {
        self.next_run_id += 1;
        JobRunId::new(self.next_run_id)
    }

    fn allocate_message_id(&mut self) -> MessageId {
        self.next_message_id += 1;
        MessageId::new(self.next_message_id)
    }

    fn enqueue(&mut self, message: JobMessage, delay: Duration, now: DateTime<Utc>) -> MessageId {
        let id = self.allocate_message_id();
        let visible_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let queued = QueuedMessage {
            id,
            message,
            enqueued_at: now,
            visible_at,
        };
        if visible_at <= now {
            self.ready.push_back(id);
        } else {
            self.scheduled.push(ScheduledMessage { visible_at, id });
        }
        self.history.push(queued.clone());
        self.messages.insert(id, queued);
        id
    }

    /// Move delayed messages whose time has come to the ready queue.
    fn promote_scheduled(&mut self, now: DateTime<Utc>) {
        while let Some(entry) = self.scheduled.peek() {
            if entry.visible_at > now {
                break;
            }
            if let Some(entry) = self.scheduled.pop() {
                self.ready.push_back(entry.id);
            }
        }
    }

    fn run_mut(&mut self, id: JobRunId) -> Result<&mut JobRun, StoreError> {
        self.runs.get_mut(&id).ok_or(StoreError::RunNotFound(id))
    }

    fn counts(&self) -> RunCounts {
        let mut counts = RunCounts::default();
        for run in self.runs.values() {
            match run.status {
                None => counts.in_flight += 1,
                Some(RunStatus::Success) => counts.succeeded += 1,
                Some(RunStatus::Error) => counts.errored += 1,
            }
        }
        counts
    }
}

/// Queue and run store sharing one in-process state.
///
/// Clones share the same state, so one backend can be handed out as both
/// `Arc<dyn JobQueue>` and `Arc<dyn JobRunStore>`.
#[derive(Clone)]
pub struct InMemoryBackend {
    state: Arc<Mutex<BackendState>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(BackendState::default())),
            clock,
        }
    }

    /// Every message sent so far, including ones already popped.
    pub async fn sent_messages(&self) -> Vec<QueuedMessage> {
        self.state.lock().await.history.clone()
    }

    /// All runs, ordered by id.
    pub async fn runs(&self) -> Vec<JobRun> {
        let state = self.state.lock().await;
        let mut runs: Vec<JobRun> = state.runs.values().cloned().collect();
        runs.sort_by_key(|run| run.id);
        runs
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for InMemoryBackend {
    async fn send_batch(
        &self,
        messages: Vec<JobMessage>,
        delay: Duration,
    ) -> Result<Vec<MessageId>, QueueError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        Ok(messages
            .into_iter()
            .map(|message| state.enqueue(message, delay, now))
            .collect())
    }

    async fn pop(&self, limit: usize) -> Result<Vec<QueuedMessage>, QueueError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.promote_scheduled(now);

        let mut popped = Vec::new();
        while popped.len() < limit {
            let Some(id) = state.ready.pop_front() else {
                break;
            };
            if let Some(message) = state.messages.remove(&id) {
                popped.push(message);
            }
        }
        Ok(popped)
    }

    async fn depth(&self) -> Result<usize, QueueError> {
        Ok(self.state.lock().await.messages.len())
    }
}

#[async_trait]
impl JobRunStore for InMemoryBackend {
    async fn create(&self, new: NewJobRun, claim_until: DateTime<Utc>) -> Result<JobRun, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let id = state.allocate_run_id();
        let mut run = JobRun::new(id, new, now);
        run.claim(claim_until, now);
        state.runs.insert(id, run.clone());
        Ok(run)
    }

    async fn get(&self, id: JobRunId) -> Result<Option<JobRun>, StoreError> {
        Ok(self.state.lock().await.runs.get(&id).cloned())
    }

    async fn claim(&self, id: JobRunId, until: DateTime<Utc>) -> Result<Claim, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let run = state.run_mut(id)?;
        if run.is_succeeded() {
            return Ok(Claim::Succeeded(run.clone()));
        }
        if run.is_claimed_at(now)
            && let Some(until) = run.claimed_until
        {
            return Ok(Claim::Held { until });
        }
        run.claim(until, now);
        Ok(Claim::Acquired(run.clone()))
    }

    async fn heartbeat(&self, id: JobRunId, until: DateTime<Utc>) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let run = state.run_mut(id)?;
        if run.claimed_until.is_some() {
            run.claim(until, now);
        }
        Ok(())
    }

    async fn release(&self, id: JobRunId) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.run_mut(id)?.release(now);
        Ok(())
    }

    async fn complete(&self, id: JobRunId, result: serde_json::Value) -> Result<Transition, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let applied = state.run_mut(id)?.mark_succeeded(result, now);
        Ok(transition(applied))
    }

    async fn fail(
        &self,
        id: JobRunId,
        error: String,
        retry: Option<RetryRequest>,
    ) -> Result<Transition, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        if !state.run_mut(id)?.record_failure(error, now) {
            return Ok(Transition::Ignored);
        }
        if let Some(retry) = retry {
            state.enqueue(retry.message, retry.delay, now);
        }
        Ok(Transition::Applied)
    }

    async fn reject(&self, id: JobRunId, error: String) -> Result<Transition, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let applied = state.run_mut(id)?.reject(error, now);
        Ok(transition(applied))
    }

    async fn counts(&self) -> Result<RunCounts, StoreError> {
        Ok(self.state.lock().await.counts())
    }
}

fn transition(applied: bool) -> Transition {
    if applied {
        Transition::Applied
    } else {
        Transition::Ignored
    }
}
