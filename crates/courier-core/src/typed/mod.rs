//! Typed - 型付きイベント/ジョブ API
//!
//! イベント名の typo とペイロード型の不一致を型で排除し、
//! Handler との対応付けを静的に保証します。
//!
//! # 二層構造
//! - **表層（Typed）**: `Event` trait, `Handler<E>` / `CronHandler` trait - 型安全
//! - **内部（Dyn）**: `DynHandler` trait - object-safe, type erasure

pub mod event;
pub mod handler;
pub mod registry;
pub mod schedule;

pub use self::event::Event;
pub use self::handler::{
    CronAdapter, CronFn, CronHandler, DynHandler, Handler, HandlerFn, TypedHandler, cron_fn,
    handler_fn,
};
pub use self::registry::{CronEntry, EventJobs, JobRegistry, RegistryError};
pub use self::schedule::{CronSchedule, InvalidSchedule};
