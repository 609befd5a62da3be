//! Handler traits - イベント/cron ジョブを実行する Handler の定義
//!
//! # 学習ポイント
//! - ジェネリック trait (`Handler<E>`)
//! - Object-safe trait (`DynHandler`)
//! - Type erasure パターン (`TypedHandler<E, H>` → `DynHandler`)

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::Serialize;

use super::event::Event;
use crate::domain::JobError;

/// Handler for one event type.
///
/// `Handler<OrderCreated>` can only be registered under `OrderCreated::NAME`,
/// so the handler's input type and the event's payload schema cannot drift
/// apart.
#[async_trait]
pub trait Handler<E: Event>: Send + Sync {
    type Output: Serialize + Send;

    async fn handle(&self, payload: E) -> Result<Self::Output, JobError>;
}

/// Handler for a cron job. Cron jobs take no payload.
#[async_trait]
pub trait CronHandler: Send + Sync {
    type Output: Serialize + Send;

    async fn run(&self) -> Result<Self::Output, JobError>;
}

/// Object-safe handler stored in the registry.
///
/// The payload arrives as raw JSON (the run's `data`); the result leaves as
/// JSON (the run's `result`).
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(&self, payload: serde_json::Value) -> Result<serde_json::Value, JobError>;
}

pub struct TypedHandler<E: Event, H: Handler<E>> {
    handler: H,
    _marker: PhantomData<fn(E)>,
}

impl<E: Event, H: Handler<E>> TypedHandler<E, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<E: Event, H: Handler<E>> DynHandler for TypedHandler<E, H> {
    async fn handle_dyn(&self, payload: serde_json::Value) -> Result<serde_json::Value, JobError> {
        let payload: E = serde_json::from_value(payload)
            .map_err(|e| JobError::new(format!("payload decode for {}: {e}", E::NAME)))?;
        let output = self.handler.handle(payload).await?;
        Ok(serde_json::to_value(output)?)
    }
}

pub struct CronAdapter<H: CronHandler> {
    handler: H,
}

impl<H: CronHandler> CronAdapter<H> {
    pub fn new(handler: H) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<H: CronHandler> DynHandler for CronAdapter<H> {
    async fn handle_dyn(&self, _payload: serde_json::Value) -> Result<serde_json::Value, JobError> {
        let output = self.handler.run().await?;
        Ok(serde_json::to_value(output)?)
    }
}

/// Wraps an async closure as a handler.
///
/// A blanket impl over `Fn` would collide with handler structs, hence the
/// wrapper (same trick as `tower::service_fn`).
pub struct HandlerFn<F> {
    f: F,
}

pub fn handler_fn<F>(f: F) -> HandlerFn<F> {
    HandlerFn { f }
}

#[async_trait]
impl<E, F, Fut, O> Handler<E> for HandlerFn<F>
where
    E: Event,
    F: Fn(E) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, JobError>> + Send + 'static,
    O: Serialize + Send + 'static,
{
    type Output = O;

    async fn handle(&self, payload: E) -> Result<O, JobError> {
        (self.f)(payload).await
    }
}

/// Wraps an async closure as a cron handler.
pub struct CronFn<F> {
    f: F,
}

pub fn cron_fn<F>(f: F) -> CronFn<F> {
    CronFn { f }
}

#[async_trait]
impl<F, Fut, O> CronHandler for CronFn<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, JobError>> + Send + 'static,
    O: Serialize + Send + 'static,
{
    type Output = O;

    async fn run(&self) -> Result<O, JobError> {
        (self.f)().await
    }
}
