//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryBackend**: キュー + Job Run Store（開発用・テスト用）
//! - **HttpInvoker**: Endpoint への HTTP 呼び出し
//! - **LocalInvoker**: Endpoint の in-process 呼び出し
//! - **LocalCronScheduler**: in-process の cron スケジューラ
//!
//! # 本番用実装
//! Postgres（pgmq + job_runs + pg_cron）向けの実装は別クレートに置く想定です。

pub mod http_invoker;
pub mod local_cron;
pub mod local_invoker;
pub mod memory;

pub use self::http_invoker::HttpInvoker;
pub use self::local_cron::LocalCronScheduler;
pub use self::local_invoker::LocalInvoker;
pub use self::memory::InMemoryBackend;
