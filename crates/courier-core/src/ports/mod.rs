//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（キュー付き datastore、外部 cron、HTTP 呼び出し）への
//! インターフェースを提供し、実装の詳細を隠蔽します。

pub mod clock;
pub mod cron_scheduler;
pub mod invoker;
pub mod queue;
pub mod run_store;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::cron_scheduler::{CronError, CronScheduler};
pub use self::invoker::{InvocationReply, InvokeError, Invoker};
pub use self::queue::{JobQueue, QueueError};
pub use self::run_store::{Claim, JobRunStore, RetryRequest, StoreError, Transition};
