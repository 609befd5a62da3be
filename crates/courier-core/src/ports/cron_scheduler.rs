//! CronScheduler port - 外部スケジューラ（pg_cron など）
//!
//! 登録された cron ジョブごとに `{"job": name}` を定期的に
//! Invocation Endpoint へ送る。

use async_trait::async_trait;

use crate::domain::JobName;
use crate::typed::CronSchedule;

#[derive(Debug, thiserror::Error)]
pub enum CronError {
    #[error("cron scheduler failed: {0}")]
    Scheduler(String),

    #[error("could not encode cron body: {0}")]
    Body(#[from] serde_json::Error),
}

#[async_trait]
pub trait CronScheduler: Send + Sync {
    /// Create or replace the entry called `name`.
    async fn schedule(&self, name: &JobName, schedule: &CronSchedule, body: String) -> Result<(), CronError>;

    async fn unschedule(&self, name: &str) -> Result<(), CronError>;

    /// Names of every entry currently scheduled.
    async fn scheduled(&self) -> Result<Vec<String>, CronError>;
}
