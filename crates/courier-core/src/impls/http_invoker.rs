//! Invoker over HTTP (`POST <endpoint_url>`).

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;

use crate::ports::{InvocationReply, InvokeError, Invoker};

pub struct HttpInvoker {
    client: reqwest::Client,
    url: String,
}

impl HttpInvoker {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Invoker for HttpInvoker {
    async fn invoke(&self, body: String, signature: String) -> Result<InvocationReply, InvokeError> {
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .bearer_auth(signature)
            .body(body)
            .send()
            .await
            .map_err(|e| InvokeError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| InvokeError::Transport(e.to_string()))?;
        Ok(InvocationReply { status, body })
    }
}
