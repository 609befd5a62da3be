//! Support-inbox jobs wired into the `courier` binary.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use courier_core::app::CourierBuilder;
use courier_core::domain::JobError;
use courier_core::typed::{CronHandler, Event, EventJobs, Handler, RegistryError, cron_fn, handler_fn};

/// Jobs the binary refuses to start without.
pub const EXPECTED_JOBS: &[&str] = &[
    "index_conversation_message",
    "notify_vip_message",
    "generate_file_preview",
    "generate_daily_reports",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageCreated {
    pub message_id: i64,
}

impl Event for MessageCreated {
    const NAME: &'static str = "conversations/message.created";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePreviewRequested {
    pub file_id: i64,
}

impl Event for FilePreviewRequested {
    const NAME: &'static str = "files/preview.generate";
}

/// Renders a preview; the storage backend times out on the first
/// `flaky_calls` attempts so the retry path is visible in `courier demo`.
pub struct GenerateFilePreview {
    calls: AtomicU32,
    flaky_calls: u32,
}

impl GenerateFilePreview {
    pub fn new(flaky_calls: u32) -> Self {
        Self {
            calls: AtomicU32::new(0),
            flaky_calls,
        }
    }
}

#[async_trait]
impl Handler<FilePreviewRequested> for GenerateFilePreview {
    type Output = serde_json::Value;

    async fn handle(&self, payload: FilePreviewRequested) -> Result<serde_json::Value, JobError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.flaky_calls {
            return Err(JobError::new(format!(
                "storage timeout while rendering file {}",
                payload.file_id
            )));
        }
        tracing::info!(file_id = payload.file_id, "preview generated");
        Ok(serde_json::json!({ "fileId": payload.file_id, "preview": "thumbnail.png" }))
    }
}

/// Returns how many report runs this process has made.
#[derive(Default)]
pub struct GenerateDailyReports {
    runs: Arc<AtomicU32>,
}

#[async_trait]
impl CronHandler for GenerateDailyReports {
    type Output = u32;

    async fn run(&self) -> Result<u32, JobError> {
        let sent = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(sent, "daily reports generated");
        Ok(sent)
    }
}

pub fn register(builder: CourierBuilder, flaky_preview_calls: u32) -> Result<CourierBuilder, RegistryError> {
    builder
        .register_event(
            EventJobs::<MessageCreated>::new()
                .job(
                    "index_conversation_message",
                    handler_fn(|event: MessageCreated| async move {
                        tracing::info!(message_id = event.message_id, "message indexed");
                        Ok::<_, JobError>(serde_json::json!({ "indexed": event.message_id }))
                    }),
                )
                .job(
                    "notify_vip_message",
                    handler_fn(|event: MessageCreated| async move {
                        // only every other message is from a VIP in the demo data
                        let vip = event.message_id % 2 == 0;
                        Ok::<_, JobError>(serde_json::json!({ "notified": vip }))
                    }),
                ),
        )?
        .register_event(
            EventJobs::<FilePreviewRequested>::new()
                .job("generate_file_preview", GenerateFilePreview::new(flaky_preview_calls)),
        )?
        .register_cron_job("generate_daily_reports", "0 16 * * 0,2-6", GenerateDailyReports::default())?
        .register_cron_job(
            "renew_mailbox_watches",
            "0 0 * * *",
            cron_fn(|| async {
                tracing::info!("mailbox watches renewed");
                Ok::<_, JobError>(())
            }),
        )?
        .register_cron_job(
            "close_inactive_conversations",
            "0 * * * *",
            cron_fn(|| async { Ok::<_, JobError>(0u32) }),
        )
}
