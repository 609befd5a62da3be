//! courier-core
//!
//! Durable job dispatch and retry engine.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, names, run, message, errors）
//! - **typed**: 型付きイベント/ジョブ API（Event trait, Handler trait, JobRegistry, CronSchedule）
//! - **ports**: 抽象化レイヤー（JobQueue, JobRunStore, Invoker, CronScheduler, Clock）
//! - **app**: アプリケーションロジック（publisher, endpoint, dispatch, drainer, retry, cron, builder）
//! - **impls**: 実装（InMemoryBackend, HttpInvoker, LocalInvoker, LocalCronScheduler）
//! - **http**: axum ルーター（`POST /api/job`）
//! - **config**: 実行時設定

pub mod app;
pub mod config;
pub mod domain;
pub mod http;
pub mod impls;
pub mod ports;
pub mod typed;
