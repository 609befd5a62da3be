//! JobQueue port - 永続キュー（pgmq など）
//!
//! # 設計原則
//! - at-least-once 配送
//! - `send_batch` は全件成功か全件失敗（部分的な fan-out はしない）
//! - `pop` は破壊的読み出し（ack ステップなし）

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{JobMessage, MessageId, QueuedMessage};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue every message atomically, all hidden for `delay`.
    async fn send_batch(
        &self,
        messages: Vec<JobMessage>,
        delay: Duration,
    ) -> Result<Vec<MessageId>, QueueError>;

    /// Remove and return up to `limit` messages that are visible now.
    async fn pop(&self, limit: usize) -> Result<Vec<QueuedMessage>, QueueError>;

    /// Number of messages still in the queue, visible or delayed.
    async fn depth(&self) -> Result<usize, QueueError>;
}
