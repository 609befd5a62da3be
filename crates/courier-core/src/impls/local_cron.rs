//! In-process cron scheduler.
//!
//! 外部スケジューラ（pg_cron）の代わりに、登録された各エントリの次回時刻を
//! croner で計算し、時刻が来たら drainer と同じ署名付き Invoker で body を送る。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, watch};

use crate::app::auth::Signer;
use crate::domain::JobName;
use crate::ports::{Clock, CronError, CronScheduler, Invoker};
use crate::typed::CronSchedule;

struct LocalEntry {
    schedule: CronSchedule,
    body: String,
    next: Option<DateTime<Utc>>,
}

pub struct LocalCronScheduler {
    entries: Mutex<BTreeMap<String, LocalEntry>>,
    invoker: Arc<dyn Invoker>,
    signer: Signer,
    clock: Arc<dyn Clock>,
}

impl LocalCronScheduler {
    pub fn new(invoker: Arc<dyn Invoker>, signer: Signer, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            invoker,
            signer,
            clock,
        }
    }

    /// Fire every entry due at `now`. Returns the names that fired.
    pub async fn fire_due(&self, now: DateTime<Utc>) -> Vec<String> {
        let due: Vec<(String, String)> = {
            let mut entries = self.entries.lock().await;
            entries
                .iter_mut()
                .filter(|(_, entry)| entry.next.is_some_and(|next| next <= now))
                .map(|(name, entry)| {
                    entry.next = entry.schedule.next_after(now);
                    (name.clone(), entry.body.clone())
                })
                .collect()
        };

        let mut fired = Vec::with_capacity(due.len());
        for (name, body) in due {
            let signature = self.signer.sign(body.as_bytes());
            match self.invoker.invoke(body, signature).await {
                Ok(reply) => {
                    tracing::info!(job = %name, status = reply.status, response = %reply.body, "cron job fired");
                }
                Err(err) => {
                    tracing::error!(job = %name, error = %err, "cron invocation failed");
                }
            }
            fired.push(name);
        }
        fired
    }

    /// Next fire time of `name`, if scheduled.
    pub async fn next_fire(&self, name: &str) -> Option<DateTime<Utc>> {
        self.entries.lock().await.get(name).and_then(|entry| entry.next)
    }

    /// Check for due entries every `tick` until shutdown is signalled.
    pub async fn run(&self, tick: Duration, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(tick.max(Duration::from_millis(1)));
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
            self.fire_due(self.clock.now()).await;
        }
        tracing::debug!("cron scheduler stopped");
    }
}

#[async_trait]
impl CronScheduler for LocalCronScheduler {
    async fn schedule(&self, name: &JobName, schedule: &CronSchedule, body: String) -> Result<(), CronError> {
        let next = schedule.next_after(self.clock.now());
        self.entries.lock().await.insert(
            name.to_string(),
            LocalEntry {
                schedule: schedule.clone(),
                body,
                next,
            },
        );
        Ok(())
    }

    async fn unschedule(&self, name: &str) -> Result<(), CronError> {
        self.entries.lock().await.remove(name);
        Ok(())
    }

    async fn scheduled(&self) -> Result<Vec<String>, CronError> {
        Ok(self.entries.lock().await.keys().cloned().collect())
    }
}
