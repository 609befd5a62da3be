//! Invoker port - drainer/cron から Invocation Endpoint への呼び出し
//!
//! 本番では HTTP（`HttpInvoker`）、単一プロセス構成とテストでは
//! in-process 呼び出し（`LocalInvoker`）を使う。

use async_trait::async_trait;

/// Raw endpoint response, as the caller sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationReply {
    pub status: u16,
    pub body: String,
}

impl InvocationReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("endpoint request failed: {0}")]
    Transport(String),
}

#[async_trait]
pub trait Invoker: Send + Sync {
    /// POST `body` with `Authorization: Bearer <signature>`.
    async fn invoke(&self, body: String, signature: String) -> Result<InvocationReply, InvokeError>;
}
