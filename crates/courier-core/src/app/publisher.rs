//! EventPublisher - イベントを検証し、購読ジョブごとにメッセージを enqueue する
//!
//! # 設計原則
//! - 検証は enqueue の前。失敗したら何も enqueue しない
//! - fan-out は 1 回の `send_batch`（全件 or 0 件）
//! - 戻り値はキュー側で採番されたメッセージ ID

use std::sync::Arc;
use std::time::Duration;

use crate::domain::{EventName, JobMessage, MessageId};
use crate::ports::{JobQueue, QueueError};
use crate::typed::{Event, JobRegistry, RegistryError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Hide the messages for this long before they can be drained.
    pub delay: Duration,
}

impl PublishOptions {
    pub fn delayed(delay: Duration) -> Self {
        Self { delay }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("unknown event '{0}'")]
    UnknownEvent(EventName),

    #[error("invalid payload for event '{event}': {reason}")]
    InvalidPayload { event: EventName, reason: String },

    #[error("could not serialize payload for event '{event}': {source}")]
    Serialize {
        event: EventName,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Queue(#[from] QueueError),
}

pub struct EventPublisher {
    registry: Arc<JobRegistry>,
    queue: Arc<dyn JobQueue>,
}

impl EventPublisher {
    pub fn new(registry: Arc<JobRegistry>, queue: Arc<dyn JobQueue>) -> Self {
        Self { registry, queue }
    }

    /// Publish a typed event.
    pub async fn publish<E: Event>(
        &self,
        payload: &E,
        options: PublishOptions,
    ) -> Result<Vec<MessageId>, PublishError> {
        let event = EventName::new(E::NAME);
        let data = serde_json::to_value(payload).map_err(|source| PublishError::Serialize {
            event: event.clone(),
            source,
        })?;
        self.publish_json(event, data, options).await
    }

    /// Publish an event given by name with a raw JSON payload.
    ///
    /// An event with no subscribed jobs returns an empty id list and sends
    /// nothing.
    #[tracing::instrument(skip(self, data), fields(event = %event))]
    pub async fn publish_json(
        &self,
        event: EventName,
        data: serde_json::Value,
        options: PublishOptions,
    ) -> Result<Vec<MessageId>, PublishError> {
        self.registry
            .validate_payload(&event, &data)
            .map_err(|err| match err {
                RegistryError::InvalidPayload { event, source } => PublishError::InvalidPayload {
                    event,
                    reason: source.to_string(),
                },
                _ => PublishError::UnknownEvent(event.clone()),
            })?;

        let jobs = self
            .registry
            .jobs_for(&event)
            .map_err(|_| PublishError::UnknownEvent(event.clone()))?;
        if jobs.is_empty() {
            tracing::debug!("no jobs subscribed, nothing to enqueue");
            return Ok(Vec::new());
        }

        let messages: Vec<JobMessage> = jobs
            .into_iter()
            .map(|job| JobMessage::for_event(event.clone(), job, data.clone()))
            .collect();
        let count = messages.len();

        let ids = self.queue.send_batch(messages, options.delay).await?;
        tracing::info!(jobs = count, delay_secs = options.delay.as_secs(), "event published");
        Ok(ids)
    }
}
