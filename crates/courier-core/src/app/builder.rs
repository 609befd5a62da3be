//! CourierBuilder - ジョブ登録とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 開発体験の改善（明確なエラーメッセージ）

use std::sync::Arc;

use super::auth::Signer;
use super::dispatch::Dispatcher;
use super::drainer::QueueDrainer;
use super::endpoint::InvocationEndpoint;
use super::publisher::EventPublisher;
use crate::config::{ConfigError, CourierConfig};
use crate::ports::{Clock, Invoker, JobQueue, JobRunStore};
use crate::typed::{CronHandler, Event, EventJobs, JobRegistry, RegistryError};

/// CourierBuilder はジョブを登録し、Courier を組み立てる
///
/// # 使用例
/// ```ignore
/// let courier = CourierBuilder::new()
///     .register_event(EventJobs::<MessageCreated>::new().job("notify_assignee", notify))?
///     .register_cron_job("generate_daily_reports", "0 9 * * *", daily_reports)?
///     .expect_jobs(&["notify_assignee", "generate_daily_reports"])
///     .build(&config, backend)?;
/// ```
///
/// # Fail-fast 設計
/// - 登録時: 重複・スキーマ不一致・不正な cron 式は即エラー
/// - build() 時: 「期待集合 ⊆ 登録済み集合」と設定値をチェック
pub struct CourierBuilder {
    registry: JobRegistry,
    expected_jobs: Option<Vec<String>>,
}

/// BuildError は組み立て時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing jobs: {0:?}. These jobs were expected but not registered.")]
    MissingJobs(Vec<String>),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Storage and time the runtime runs on.
#[derive(Clone)]
pub struct Backend {
    pub queue: Arc<dyn JobQueue>,
    pub store: Arc<dyn JobRunStore>,
    pub clock: Arc<dyn Clock>,
}

impl CourierBuilder {
    pub fn new() -> Self {
        Self {
            registry: JobRegistry::new(),
            expected_jobs: None,
        }
    }

    pub fn register_event<E: Event>(mut self, jobs: EventJobs<E>) -> Result<Self, RegistryError> {
        self.registry.register_event(jobs)?;
        Ok(self)
    }

    pub fn register_cron_job<H>(
        mut self,
        name: &str,
        schedule: &str,
        handler: H,
    ) -> Result<Self, RegistryError>
    where
        H: CronHandler + 'static,
    {
        self.registry.register_cron_job(name, schedule, handler)?;
        Ok(self)
    }

    /// 期待されるジョブ名のリストを設定
    pub fn expect_jobs(mut self, jobs: &[&str]) -> Self {
        self.expected_jobs = Some(jobs.iter().map(|job| job.to_string()).collect());
        self
    }

    /// 検証してから Courier を生成
    pub fn build(self, config: &CourierConfig, backend: Backend) -> Result<Courier, BuildError> {
        if let Some(expected_jobs) = &self.expected_jobs {
            let registered: Vec<String> = self
                .registry
                .registered_jobs()
                .iter()
                .map(|job| job.to_string())
                .collect();
            let missing_jobs: Vec<String> = expected_jobs
                .iter()
                .filter(|job| !registered.contains(job))
                .cloned()
                .collect();
            if !missing_jobs.is_empty() {
                return Err(BuildError::MissingJobs(missing_jobs));
            }
        }

        config.validate()?;
        let signer = Signer::new(&config.hmac_secret).map_err(|_| ConfigError::EmptySecret)?;

        let registry = Arc::new(self.registry);
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&backend.store),
            Arc::clone(&backend.clock),
            config.backoff.clone(),
            config.visibility_timeout,
        ));
        let endpoint = Arc::new(InvocationEndpoint::new(
            Arc::clone(&registry),
            Arc::clone(&backend.store),
            signer.clone(),
            Arc::clone(&dispatcher),
        ));
        let publisher = Arc::new(EventPublisher::new(
            Arc::clone(&registry),
            Arc::clone(&backend.queue),
        ));

        Ok(Courier {
            registry,
            publisher,
            endpoint,
            dispatcher,
            signer,
            backend,
            drain_batch_size: config.drain_batch_size,
        })
    }
}

impl Default for CourierBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Courier は組み立て済みのランタイム
pub struct Courier {
    pub registry: Arc<JobRegistry>,
    pub publisher: Arc<EventPublisher>,
    pub endpoint: Arc<InvocationEndpoint>,
    pub dispatcher: Arc<Dispatcher>,
    pub signer: Signer,
    pub backend: Backend,
    drain_batch_size: usize,
}

impl Courier {
    /// Drainer that forwards through `invoker`.
    pub fn drainer(&self, invoker: Arc<dyn Invoker>) -> QueueDrainer {
        QueueDrainer::new(
            Arc::clone(&self.backend.queue),
            invoker,
            self.signer.clone(),
            self.drain_batch_size,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobError;
    use crate::impls::InMemoryBackend;
    use crate::ports::SystemClock;
    use crate::typed::event::fixtures::OrderCreated;
    use crate::typed::{cron_fn, handler_fn};

    fn backend() -> Backend {
        let memory = InMemoryBackend::new();
        Backend {
            queue: Arc::new(memory.clone()),
            store: Arc::new(memory),
            clock: Arc::new(SystemClock),
        }
    }

    fn builder() -> CourierBuilder {
        CourierBuilder::new()
            .register_event(
                EventJobs::<OrderCreated>::new()
                    .job("send_email", handler_fn(|_: OrderCreated| async { Ok::<_, JobError>(()) })),
            )
            .unwrap()
            .register_cron_job("nightly", "0 3 * * *", cron_fn(|| async { Ok::<_, JobError>(()) }))
            .unwrap()
    }

    #[test]
    fn build_success() {
        let courier = builder()
            .expect_jobs(&["send_email", "nightly"])
            .build(&CourierConfig::new("s3cret"), backend());
        assert!(courier.is_ok());
    }

    #[test]
    fn build_missing_jobs() {
        let courier = builder()
            .expect_jobs(&["send_email", "send_sms"])
            .build(&CourierConfig::new("s3cret"), backend());
        assert!(matches!(
            courier,
            Err(BuildError::MissingJobs(missing)) if missing == vec!["send_sms".to_string()]
        ));
    }

    #[test]
    fn build_rejects_invalid_config() {
        let courier = builder().build(&CourierConfig::new(""), backend());
        assert!(matches!(courier, Err(BuildError::Config(ConfigError::EmptySecret))));
    }

    #[test]
    fn invalid_cron_expression_fails_registration() {
        let result = CourierBuilder::new().register_cron_job(
            "broken",
            "every day",
            cron_fn(|| async { Ok::<_, JobError>(()) }),
        );
        assert!(matches!(result, Err(RegistryError::InvalidSchedule(_))));
    }
}
