//! QueueDrainer - キューを空になるまで読み出し、署名して Endpoint に転送する
//!
//! # 設計原則
//! - pop は破壊的。転送に失敗してもキューには戻さない
//!   （失敗の記録と retry は Endpoint / Dispatcher 側の責務）
//! - 1 tick で「見えているメッセージ」を全部転送してから次の tick を待つ

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::auth::Signer;
use crate::domain::QueuedMessage;
use crate::ports::{Invoker, JobQueue, QueueError};

/// Result of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Messages popped and forwarded, whatever the endpoint answered.
    pub processed: usize,
    /// Of those, how many got a non-2xx answer or no answer at all.
    pub failed: usize,
}

pub struct QueueDrainer {
    queue: Arc<dyn JobQueue>,
    invoker: Arc<dyn Invoker>,
    signer: Signer,
    batch_size: usize,
}

impl QueueDrainer {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        invoker: Arc<dyn Invoker>,
        signer: Signer,
        batch_size: usize,
    ) -> Self {
        Self {
            queue,
            invoker,
            signer,
            batch_size: batch_size.max(1),
        }
    }

    /// Pop and forward until no visible message is left.
    pub async fn drain_once(&self) -> Result<DrainReport, QueueError> {
        let mut report = DrainReport::default();
        loop {
            let batch = self.queue.pop(self.batch_size).await?;
            if batch.is_empty() {
                break;
            }
            for queued in batch {
                report.processed += 1;
                if !self.forward(queued).await {
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn forward(&self, queued: QueuedMessage) -> bool {
        let body = match queued.message.to_json() {
            Ok(body) => body,
            Err(err) => {
                tracing::error!(msg_id = %queued.id, error = %err, "could not encode message, dropped");
                return false;
            }
        };
        let signature = self.signer.sign(body.as_bytes());

        match self.invoker.invoke(body, signature).await {
            Ok(reply) => {
                tracing::info!(
                    msg_id = %queued.id,
                    job = %queued.message.job,
                    status = reply.status,
                    response = %reply.body,
                    "message forwarded"
                );
                reply.is_success()
            }
            Err(err) => {
                tracing::error!(msg_id = %queued.id, job = %queued.message.job, error = %err, "endpoint call failed");
                false
            }
        }
    }

    /// Drain every `interval` until shutdown is signalled.
    pub async fn run(&self, interval: Duration, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    // sender dropped
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            self.tick().await;
        }
        tracing::debug!("drainer stopped");
    }

    /// One scheduled pass. Every pass reports its count, idle ones at debug.
    pub async fn tick(&self) -> Option<DrainReport> {
        match self.drain_once().await {
            Ok(report) => {
                if report.processed > 0 {
                    tracing::info!(failed = report.failed, "Processed {} jobs", report.processed);
                } else {
                    tracing::debug!("Processed {} jobs", report.processed);
                }
                Some(report)
            }
            Err(err) => {
                tracing::error!(error = %err, "drain pass failed");
                None
            }
        }
    }
}

/// Drainer running in the background.
///
/// - `shutdown_and_join()` で停止要求を出して終了を待つ
/// - 実行中の転送は中断しない（tick の途中なら最後まで転送する）
pub struct DrainerHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl DrainerHandle {
    pub fn spawn(drainer: Arc<QueueDrainer>, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move { drainer.run(interval, shutdown_rx).await });
        Self { shutdown_tx, join }
    }

    pub fn request_shutdown(&self) {
        // receiver may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        let _ = self.join.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventName, JobMessage, JobName};
    use crate::impls::InMemoryBackend;
    use crate::ports::{InvocationReply, InvokeError};
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    /// Records every call and answers with a fixed status.
    struct RecordingInvoker {
        status: u16,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl RecordingInvoker {
        fn answering(status: u16) -> Arc<Self> {
            Arc::new(Self {
                status,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Invoker for RecordingInvoker {
        async fn invoke(&self, body: String, signature: String) -> Result<InvocationReply, InvokeError> {
            self.calls.lock().await.push((body, signature));
            Ok(InvocationReply {
                status: self.status,
                body: "OK".to_string(),
            })
        }
    }

    struct DownInvoker;

    #[async_trait]
    impl Invoker for DownInvoker {
        async fn invoke(&self, _body: String, _signature: String) -> Result<InvocationReply, InvokeError> {
            Err(InvokeError::Transport("connection refused".to_string()))
        }
    }

    fn message(job: &str) -> JobMessage {
        JobMessage::for_event(EventName::new("order.created"), JobName::new(job), serde_json::json!({"orderId": 1}))
    }

    #[tokio::test]
    async fn drains_everything_visible_one_at_a_time() {
        let backend = InMemoryBackend::new();
        backend
            .send_batch(vec![message("a"), message("b"), message("c")], Duration::ZERO)
            .await
            .unwrap();
        let invoker = RecordingInvoker::answering(200);
        let signer = Signer::new("s3cret").unwrap();
        let drainer = QueueDrainer::new(Arc::new(backend.clone()), invoker.clone(), signer.clone(), 1);

        let report = drainer.drain_once().await.unwrap();
        assert_eq!(report, DrainReport { processed: 3, failed: 0 });
        assert_eq!(backend.depth().await.unwrap(), 0);

        let calls = invoker.calls.lock().await;
        assert_eq!(calls.len(), 3);
        for (body, signature) in calls.iter() {
            assert_eq!(signature, &signer.sign(body.as_bytes()));
        }
    }

    #[tokio::test]
    async fn delayed_messages_are_left_for_later() {
        let backend = InMemoryBackend::new();
        backend.send_batch(vec![message("now")], Duration::ZERO).await.unwrap();
        backend.send_batch(vec![message("later")], Duration::from_secs(60)).await.unwrap();
        let drainer = QueueDrainer::new(
            Arc::new(backend.clone()),
            RecordingInvoker::answering(200),
            Signer::new("s3cret").unwrap(),
            10,
        );

        assert_eq!(drainer.drain_once().await.unwrap().processed, 1);
        assert_eq!(backend.depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_calls_are_counted_and_not_requeued() {
        let backend = InMemoryBackend::new();
        backend.send_batch(vec![message("a"), message("b")], Duration::ZERO).await.unwrap();
        let drainer = QueueDrainer::new(
            Arc::new(backend.clone()),
            Arc::new(DownInvoker),
            Signer::new("s3cret").unwrap(),
            1,
        );

        let report = drainer.drain_once().await.unwrap();
        assert_eq!(report, DrainReport { processed: 2, failed: 2 });
        assert_eq!(backend.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn non_success_status_counts_as_failed() {
        let backend = InMemoryBackend::new();
        backend.send_batch(vec![message("a")], Duration::ZERO).await.unwrap();
        let drainer = QueueDrainer::new(
            Arc::new(backend.clone()),
            RecordingInvoker::answering(404),
            Signer::new("s3cret").unwrap(),
            1,
        );

        assert_eq!(
            drainer.drain_once().await.unwrap(),
            DrainReport { processed: 1, failed: 1 }
        );
    }

    /// Collects formatted log output.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn every_tick_reports_its_count() {
        let logs = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer({
                let logs = logs.clone();
                move || logs.clone()
            })
            .finish();
        let _default = tracing::subscriber::set_default(subscriber);

        let backend = InMemoryBackend::new();
        let drainer = QueueDrainer::new(
            Arc::new(backend.clone()),
            RecordingInvoker::answering(200),
            Signer::new("s3cret").unwrap(),
            1,
        );

        assert_eq!(drainer.tick().await, Some(DrainReport::default()));

        backend.send_batch(vec![message("a"), message("b")], Duration::ZERO).await.unwrap();
        assert_eq!(drainer.tick().await, Some(DrainReport { processed: 2, failed: 0 }));

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("Processed 0 jobs"), "{output}");
        assert!(output.contains("Processed 2 jobs"), "{output}");
    }

    #[tokio::test]
    async fn loop_stops_on_shutdown() {
        let backend = InMemoryBackend::new();
        let drainer = Arc::new(QueueDrainer::new(
            Arc::new(backend),
            RecordingInvoker::answering(200),
            Signer::new("s3cret").unwrap(),
            1,
        ));
        let handle = DrainerHandle::spawn(drainer, Duration::from_millis(10));
        tokio::time::timeout(Duration::from_secs(1), handle.shutdown_and_join())
            .await
            .unwrap();
    }
}
