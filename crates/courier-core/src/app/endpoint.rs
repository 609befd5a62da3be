//! InvocationEndpoint - 署名付きリクエストを受けて run を確定し、Handler を dispatch する
//!
//! # 処理順
//! 1. 署名検証（失敗したら何もしない）
//! 2. body のパース
//! 3. run の確定: `jobRunId` があれば claim、なければ claim 付きで作成
//! 4. Handler 解決: 見つからなければ run を "Job not found" で error にして 404
//! 5. dispatch して即 200（Handler の完了は待たない）

use std::fmt;
use std::sync::Arc;

use super::auth::Signer;
use super::dispatch::{DispatchHandle, Dispatcher};
use crate::domain::{InvocationId, JobMessage, JobRun, NewJobRun, Trigger};
use crate::ports::{Claim, JobRunStore, StoreError};
use crate::typed::{DynHandler, JobRegistry, RegistryError};

pub const JOB_NOT_FOUND: &str = "Job not found";

/// Response returned to the caller, before any handler has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationResponse {
    Ok,
    Unauthorized,
    NotFound,
    ServerError,
}

impl InvocationResponse {
    pub fn status(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::Unauthorized => 401,
            Self::NotFound => 404,
            Self::ServerError => 500,
        }
    }

    pub fn body(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Unauthorized => "Unauthorized",
            Self::NotFound => "Not found",
            Self::ServerError => "Internal Server Error",
        }
    }
}

impl fmt::Display for InvocationResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status(), self.body())
    }
}

pub struct InvocationOutcome {
    pub response: InvocationResponse,
    /// Present when a handler was started.
    pub dispatch: Option<DispatchHandle>,
}

impl InvocationOutcome {
    fn respond(response: InvocationResponse) -> Self {
        Self {
            response,
            dispatch: None,
        }
    }
}

pub struct InvocationEndpoint {
    registry: Arc<JobRegistry>,
    store: Arc<dyn JobRunStore>,
    signer: Signer,
    dispatcher: Arc<Dispatcher>,
}

impl InvocationEndpoint {
    pub fn new(
        registry: Arc<JobRegistry>,
        store: Arc<dyn JobRunStore>,
        signer: Signer,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            registry,
            store,
            signer,
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    #[tracing::instrument(
        name = "invocation",
        skip_all,
        fields(
            invocation_id = %InvocationId::generate(),
            job = tracing::field::Empty,
            event = tracing::field::Empty,
            job_run_id = tracing::field::Empty,
        )
    )]
    pub async fn invoke(&self, body: &[u8], authorization: Option<&str>) -> InvocationOutcome {
        if let Err(err) = self.signer.verify(body, authorization) {
            tracing::warn!(error = %err, "rejected unauthenticated invocation");
            return InvocationOutcome::respond(InvocationResponse::Unauthorized);
        }

        let message = match JobMessage::parse(body) {
            Ok(message) => message,
            Err(err) => {
                tracing::error!(error = %err, "malformed invocation body");
                return InvocationOutcome::respond(InvocationResponse::ServerError);
            }
        };

        let span = tracing::Span::current();
        span.record("job", tracing::field::display(&message.job));
        if let Some(event) = &message.event {
            span.record("event", tracing::field::display(event));
        }

        match self.accept(message).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(error = %err, "invocation failed");
                InvocationOutcome::respond(InvocationResponse::ServerError)
            }
        }
    }

    async fn accept(&self, message: JobMessage) -> Result<InvocationOutcome, StoreError> {
        let Some(run) = self.resolve_run(&message).await? else {
            return Ok(InvocationOutcome::respond(InvocationResponse::Ok));
        };
        tracing::Span::current().record("job_run_id", tracing::field::display(run.id));

        let handler = match self.resolve_handler(&run) {
            Ok(handler) => handler,
            Err(err) => {
                tracing::error!(error = %err, "no handler registered, run rejected");
                self.store.reject(run.id, JOB_NOT_FOUND.to_string()).await?;
                return Ok(InvocationOutcome::respond(InvocationResponse::NotFound));
            }
        };

        let handle = self.dispatcher.dispatch(run, handler);
        Ok(InvocationOutcome {
            response: InvocationResponse::Ok,
            dispatch: Some(handle),
        })
    }

    /// The run this delivery should execute, claimed, or `None` when the
    /// delivery has nothing left to do.
    async fn resolve_run(&self, message: &JobMessage) -> Result<Option<JobRun>, StoreError> {
        let until = self.dispatcher.claim_deadline();

        let Some(id) = message.job_run_id else {
            let data = match message.trigger() {
                Ok(Trigger::Event { data, .. }) => data,
                _ => serde_json::Value::Null,
            };
            let run = self
                .store
                .create(
                    NewJobRun {
                        job: message.job.clone(),
                        event: message.event.clone(),
                        data,
                    },
                    until,
                )
                .await?;
            tracing::debug!(run_id = %run.id, "job run created");
            return Ok(Some(run));
        };

        match self.store.claim(id, until).await? {
            Claim::Acquired(run) => {
                if self.dispatcher.backoff().is_exhausted(run.attempts) {
                    tracing::warn!(run_id = %run.id, attempts = run.attempts, "run exhausted, delivery dropped");
                    self.store.release(run.id).await?;
                    return Ok(None);
                }
                Ok(Some(run))
            }
            Claim::Succeeded(run) => {
                tracing::debug!(run_id = %run.id, "run already succeeded, delivery dropped");
                Ok(None)
            }
            Claim::Held { until } => {
                tracing::debug!(run_id = %id, claimed_until = %until, "run is executing elsewhere, delivery dropped");
                Ok(None)
            }
        }
    }

    fn resolve_handler(&self, run: &JobRun) -> Result<Arc<dyn DynHandler>, RegistryError> {
        match &run.event {
            Some(event) => self.registry.resolve(event, &run.job),
            None => self.registry.resolve_cron(&run.job),
        }
    }
}
