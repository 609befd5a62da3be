//! Dispatcher - claim 済みの run を Handler で実行し、結果を記録する
//!
//! # 実行モデル
//! - Endpoint は dispatch した時点で 200 を返す（結果を待たない）
//! - Handler は内側の `tokio::spawn` で実行する。panic はそこで止まり、
//!   通常の失敗として記録される
//! - 実行中は lease の 1/3 ごとに claim を延長する（heartbeat）
//! - 失敗時は backoff 表から遅延を決め、失敗の記録と retry の enqueue を
//!   `JobRunStore::fail` 1 回で行う

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::retry::BackoffSchedule;
use crate::domain::{JobError, JobMessage, JobRun};
use crate::ports::{Clock, JobRunStore, RetryRequest, Transition};
use crate::typed::DynHandler;

/// What happened to a dispatched run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Succeeded,
    RetryScheduled { delay: Duration },
    /// Failed with no retries left; the run stays `error`.
    Exhausted,
    /// The run had already succeeded elsewhere; the result was dropped.
    Ignored,
    /// The outcome could not be written to the store.
    StoreFailed(String),
}

/// Handle to one in-flight run.
pub struct DispatchHandle {
    join: JoinHandle<DispatchOutcome>,
}

impl DispatchHandle {
    /// Wait for the run to settle.
    pub async fn join(self) -> DispatchOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(err) => DispatchOutcome::StoreFailed(format!("dispatch task aborted: {err}")),
        }
    }
}

#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

/// Decrements the in-flight count when the dispatch task ends, however it ends.
struct InFlightGuard {
    in_flight: Arc<InFlight>,
}

impl InFlightGuard {
    fn enter(in_flight: &Arc<InFlight>) -> Self {
        in_flight.count.fetch_add(1, Ordering::SeqCst);
        Self {
            in_flight: Arc::clone(in_flight),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.in_flight.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.in_flight.idle.notify_waiters();
        }
    }
}

pub struct Dispatcher {
    store: Arc<dyn JobRunStore>,
    clock: Arc<dyn Clock>,
    backoff: BackoffSchedule,
    lease: Duration,
    in_flight: Arc<InFlight>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn JobRunStore>,
        clock: Arc<dyn Clock>,
        backoff: BackoffSchedule,
        lease: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            backoff,
            lease,
            in_flight: Arc::new(InFlight::default()),
        }
    }

    pub fn backoff(&self) -> &BackoffSchedule {
        &self.backoff
    }

    /// Deadline for a claim taken now.
    pub fn claim_deadline(&self) -> DateTime<Utc> {
        lease_deadline(self.clock.now(), self.lease)
    }

    /// Number of runs currently executing.
    pub fn in_flight(&self) -> usize {
        self.in_flight.count.load(Ordering::SeqCst)
    }

    /// Resolve once no run is executing.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.in_flight.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Start executing a claimed run in the background.
    pub fn dispatch(&self, run: JobRun, handler: Arc<dyn DynHandler>) -> DispatchHandle {
        let guard = InFlightGuard::enter(&self.in_flight);
        let span = tracing::info_span!(
            "job_run",
            run_id = %run.id,
            job = %run.job,
            attempts = run.attempts,
        );
        let execution = Execution {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            backoff: self.backoff.clone(),
            lease: self.lease,
        };

        let join = tokio::spawn(
            async move {
                let _guard = guard;
                execution.run(run, handler).await
            }
            .instrument(span),
        );
        DispatchHandle { join }
    }
}

struct Execution {
    store: Arc<dyn JobRunStore>,
    clock: Arc<dyn Clock>,
    backoff: BackoffSchedule,
    lease: Duration,
}

impl Execution {
    async fn run(self, run: JobRun, handler: Arc<dyn DynHandler>) -> DispatchOutcome {
        let data = run.data.clone();
        let mut task = tokio::spawn(async move { handler.handle_dyn(data).await });

        let period = (self.lease / 3).max(Duration::from_millis(1));
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        let joined = loop {
            tokio::select! {
                joined = &mut task => break joined,
                _ = heartbeat.tick() => {
                    let until = lease_deadline(self.clock.now(), self.lease);
                    if let Err(err) = self.store.heartbeat(run.id, until).await {
                        tracing::warn!(error = %err, "claim heartbeat failed");
                    }
                }
            }
        };

        let result = joined.unwrap_or_else(|err| {
            if err.is_panic() {
                Err(JobError::new(format!(
                    "handler panicked: {}",
                    panic_message(err.into_panic().as_ref())
                )))
            } else {
                Err(JobError::new("handler task was cancelled"))
            }
        });

        match result {
            Ok(value) => self.succeed(&run, value).await,
            Err(err) => self.fail(&run, err).await,
        }
    }

    async fn succeed(&self, run: &JobRun, value: serde_json::Value) -> DispatchOutcome {
        match self.store.complete(run.id, value).await {
            Ok(Transition::Applied) => {
                tracing::info!("job succeeded");
                DispatchOutcome::Succeeded
            }
            Ok(Transition::Ignored) => {
                tracing::debug!("run already succeeded, result dropped");
                DispatchOutcome::Ignored
            }
            Err(err) => {
                tracing::error!(error = %err, "could not record success");
                DispatchOutcome::StoreFailed(err.to_string())
            }
        }
    }

    async fn fail(&self, run: &JobRun, err: JobError) -> DispatchOutcome {
        let delay = self.backoff.delay_for(run.attempts);
        let retry = delay.map(|delay| RetryRequest {
            message: JobMessage::retry_of(run),
            delay,
        });

        match self.store.fail(run.id, err.message().to_string(), retry).await {
            Ok(Transition::Ignored) => {
                tracing::debug!("run already succeeded, failure dropped");
                DispatchOutcome::Ignored
            }
            Ok(Transition::Applied) => match delay {
                Some(delay) => {
                    tracing::warn!(error = %err, delay_secs = delay.as_secs(), "job failed, retry scheduled");
                    DispatchOutcome::RetryScheduled { delay }
                }
                None => {
                    tracing::error!(
                        error = %err,
                        attempts = run.attempts + 1,
                        "job failed, retries exhausted"
                    );
                    DispatchOutcome::Exhausted
                }
            },
            Err(store_err) => {
                tracing::error!(error = %err, store_error = %store_err, "could not record failure");
                DispatchOutcome::StoreFailed(store_err.to_string())
            }
        }
    }
}

fn lease_deadline(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(lease)
        .ok()
        .and_then(|lease| now.checked_add_signed(lease))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventName, JobName, NewJobRun, RunStatus};
    use crate::impls::InMemoryBackend;
    use crate::ports::{JobQueue, ManualClock};
    use crate::typed::{CronAdapter, cron_fn};

    struct Harness {
        backend: InMemoryBackend,
        clock: ManualClock,
        dispatcher: Dispatcher,
    }

    fn harness() -> Harness {
        let clock = ManualClock::new(Utc::now());
        let backend = InMemoryBackend::with_clock(Arc::new(clock.clone()));
        let dispatcher = Dispatcher::new(
            Arc::new(backend.clone()),
            Arc::new(clock.clone()),
            BackoffSchedule::default(),
            Duration::from_secs(30),
        );
        Harness {
            backend,
            clock,
            dispatcher,
        }
    }

    async fn claimed_run(h: &Harness) -> JobRun {
        h.backend
            .create(
                NewJobRun {
                    job: JobName::new("nightly"),
                    event: None,
                    data: serde_json::Value::Null,
                },
                h.dispatcher.claim_deadline(),
            )
            .await
            .unwrap()
    }

    fn handler<F, Fut>(f: F) -> Arc<dyn DynHandler>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<serde_json::Value, JobError>> + Send + 'static,
    {
        Arc::new(CronAdapter::new(cron_fn(f)))
    }

    #[tokio::test]
    async fn success_is_recorded_with_result() {
        let h = harness();
        let run = claimed_run(&h).await;

        let outcome = h
            .dispatcher
            .dispatch(run.clone(), handler(|| async { Ok(serde_json::json!({"sent": 3})) }))
            .join()
            .await;
        assert_eq!(outcome, DispatchOutcome::Succeeded);

        let stored = h.backend.get(run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, Some(RunStatus::Success));
        assert_eq!(stored.result, Some(serde_json::json!({"sent": 3})));
        assert_eq!(stored.claimed_until, None);
    }

    #[tokio::test]
    async fn failure_schedules_first_retry_after_five_seconds() {
        let h = harness();
        let run = claimed_run(&h).await;

        let outcome = h
            .dispatcher
            .dispatch(run.clone(), handler(|| async { Err(JobError::new("smtp down")) }))
            .join()
            .await;
        assert_eq!(
            outcome,
            DispatchOutcome::RetryScheduled {
                delay: Duration::from_secs(5)
            }
        );

        let stored = h.backend.get(run.id).await.unwrap().unwrap();
        assert_eq!(stored.attempts, 1);
        assert_eq!(stored.error.as_deref(), Some("smtp down"));

        let sent = h.backend.sent_messages().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].message.job_run_id, Some(run.id));
        assert_eq!(
            sent[0].visible_at,
            h.clock.now() + chrono::Duration::seconds(5)
        );
    }

    #[tokio::test]
    async fn panic_is_recorded_as_failure() {
        let h = harness();
        let run = claimed_run(&h).await;

        let outcome = h
            .dispatcher
            .dispatch(
                run.clone(),
                handler(|| async {
                    if true {
                        panic!("index out of bounds");
                    }
                    Ok(serde_json::Value::Null)
                }),
            )
            .join()
            .await;
        assert!(matches!(outcome, DispatchOutcome::RetryScheduled { .. }));

        let stored = h.backend.get(run.id).await.unwrap().unwrap();
        assert_eq!(stored.attempts, 1);
        assert_eq!(stored.error.as_deref(), Some("handler panicked: index out of bounds"));
    }

    #[tokio::test]
    async fn last_failure_exhausts_without_retry() {
        let h = harness();
        let mut run = claimed_run(&h).await;
        for _ in 0..4 {
            h.backend.fail(run.id, "earlier".to_string(), None).await.unwrap();
        }
        run = h.backend.get(run.id).await.unwrap().unwrap();
        assert_eq!(run.attempts, 4);

        let outcome = h
            .dispatcher
            .dispatch(run.clone(), handler(|| async { Err(JobError::new("still down")) }))
            .join()
            .await;
        assert_eq!(outcome, DispatchOutcome::Exhausted);
        assert_eq!(h.backend.get(run.id).await.unwrap().unwrap().attempts, 5);
        assert_eq!(h.backend.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn wait_idle_returns_after_runs_settle() {
        let h = harness();
        let run = claimed_run(&h).await;
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let rx = Arc::new(tokio::sync::Mutex::new(Some(rx)));

        let handle = h.dispatcher.dispatch(
            run,
            handler(move || {
                let rx = Arc::clone(&rx);
                async move {
                    if let Some(rx) = rx.lock().await.take() {
                        let _ = rx.await;
                    }
                    Ok(serde_json::Value::Null)
                }
            }),
        );
        assert_eq!(h.dispatcher.in_flight(), 1);

        tx.send(()).unwrap();
        h.dispatcher.wait_idle().await;
        assert_eq!(h.dispatcher.in_flight(), 0);
        assert_eq!(handle.join().await, DispatchOutcome::Succeeded);
    }

    #[tokio::test]
    async fn event_run_retry_carries_event_and_data() {
        let h = harness();
        let run = h
            .backend
            .create(
                NewJobRun {
                    job: JobName::new("send_email"),
                    event: Some(EventName::new("order.created")),
                    data: serde_json::json!({"orderId": 4}),
                },
                h.dispatcher.claim_deadline(),
            )
            .await
            .unwrap();

        h.dispatcher
            .dispatch(run, handler(|| async { Err(JobError::new("nope")) }))
            .join()
            .await;

        let sent = h.backend.sent_messages().await;
        assert_eq!(sent[0].message.event, Some(EventName::new("order.created")));
        assert_eq!(sent[0].message.data, Some(serde_json::json!({"orderId": 4})));
    }
}
