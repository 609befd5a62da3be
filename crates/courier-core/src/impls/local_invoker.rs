//! In-process invoker: calls the endpoint directly, no network hop.
//!
//! 単一プロセス構成（`courier demo`）とシナリオテストで使う。
//! 署名は HTTP と同じく `Bearer <hex>` ヘッダとして渡すので、
//! 認証の経路は本番と変わらない。

use std::sync::Arc;

use async_trait::async_trait;

use crate::app::auth::bearer;
use crate::app::endpoint::InvocationEndpoint;
use crate::ports::{InvocationReply, InvokeError, Invoker};

pub struct LocalInvoker {
    endpoint: Arc<InvocationEndpoint>,
}

impl LocalInvoker {
    pub fn new(endpoint: Arc<InvocationEndpoint>) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl Invoker for LocalInvoker {
    async fn invoke(&self, body: String, signature: String) -> Result<InvocationReply, InvokeError> {
        let header = bearer(&signature);
        let outcome = self.endpoint.invoke(body.as_bytes(), Some(&header)).await;
        Ok(InvocationReply {
            status: outcome.response.status(),
            body: outcome.response.body().to_string(),
        })
    }
}
