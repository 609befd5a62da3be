//! Cron sync - registry の cron ジョブを外部スケジューラに反映する
//!
//! 登録済みのジョブはすべて（再）登録し、登録されていない名前は外す。
//! drainer 用の `process-jobs` だけは registry の外で管理されるので残す。

use crate::domain::JobMessage;
use crate::ports::{CronError, CronScheduler};
use crate::typed::JobRegistry;

/// Scheduler entry that drives the drainer itself.
pub const DRAINER_ENTRY: &str = "process-jobs";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CronSyncReport {
    pub scheduled: Vec<String>,
    pub unscheduled: Vec<String>,
}

pub async fn sync_cron_jobs(
    registry: &JobRegistry,
    scheduler: &dyn CronScheduler,
) -> Result<CronSyncReport, CronError> {
    let mut report = CronSyncReport::default();

    let entries = registry.cron_jobs();
    for entry in &entries {
        let body = JobMessage::for_cron(entry.name.clone()).to_json()?;
        scheduler.schedule(&entry.name, &entry.schedule, body).await?;
        tracing::info!(job = %entry.name, schedule = %entry.schedule, "cron job scheduled");
        report.scheduled.push(entry.name.to_string());
    }

    for name in scheduler.scheduled().await? {
        if name == DRAINER_ENTRY || entries.iter().any(|entry| entry.name.as_str() == name) {
            continue;
        }
        scheduler.unschedule(&name).await?;
        tracing::info!(job = %name, "stale cron job unscheduled");
        report.unscheduled.push(name);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use crate::domain::{JobError, JobName};
    use crate::typed::{CronSchedule, cron_fn};

    #[derive(Default)]
    struct TableScheduler {
        entries: Mutex<BTreeMap<String, (String, String)>>,
    }

    #[async_trait]
    impl CronScheduler for TableScheduler {
        async fn schedule(&self, name: &JobName, schedule: &CronSchedule, body: String) -> Result<(), CronError> {
            self.entries
                .lock()
                .await
                .insert(name.to_string(), (schedule.to_string(), body));
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

    #[tokio::test]
    async fn schedules_registered_and_removes_stale_but_keeps_drainer() {
        let mut registry = JobRegistry::new();
        registry
            .register_cron_job("generate_daily_reports", "0 9 * * *", cron_fn(|| async { Ok::<_, JobError>(()) }))
            .unwrap();

        let scheduler = TableScheduler::default();
        for stale in [DRAINER_ENTRY, "old_cleanup"] {
            scheduler.entries.lock().await.insert(
                stale.to_string(),
                ("*/5 * * * *".to_string(), String::new()),
            );
        }

        let report = sync_cron_jobs(&registry, &scheduler).await.unwrap();
        assert_eq!(report.scheduled, vec!["generate_daily_reports".to_string()]);
        assert_eq!(report.unscheduled, vec!["old_cleanup".to_string()]);

        let entries = scheduler.entries.lock().await;
        assert!(entries.contains_key(DRAINER_ENTRY));
        assert!(!entries.contains_key("old_cleanup"));
        let (schedule, body) = &entries["generate_daily_reports"];
        assert_eq!(schedule, "0 9 * * *");
        assert_eq!(body, r#"{"job":"generate_daily_reports"}"#);
    }
}
