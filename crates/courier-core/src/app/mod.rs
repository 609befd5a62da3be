//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **CourierBuilder**: ジョブ登録とワイヤリング
//! - **EventPublisher**: イベント検証 → fan-out enqueue
//! - **QueueDrainer**: pop → 署名 → Endpoint 呼び出し
//! - **InvocationEndpoint**: 認証 → run 確定 → Handler 解決 → dispatch
//! - **Dispatcher**: Handler 実行と結果の記録（success / retry / exhausted）
//! - **BackoffSchedule**: attempts → 遅延の表

pub mod auth;
pub mod builder;
pub mod cron;
pub mod dispatch;
pub mod drainer;
pub mod endpoint;
pub mod publisher;
pub mod retry;
pub mod status;

// 主要な型を再エクスポート
pub use self::auth::{AuthError, Signer};
pub use self::builder::{Backend, BuildError, Courier, CourierBuilder};
pub use self::cron::{CronSyncReport, DRAINER_ENTRY, sync_cron_jobs};
pub use self::dispatch::{DispatchHandle, DispatchOutcome, Dispatcher};
pub use self::drainer::{DrainReport, DrainerHandle, QueueDrainer};
pub use self::endpoint::{InvocationEndpoint, InvocationOutcome, InvocationResponse};
pub use self::publisher::{EventPublisher, PublishError, PublishOptions};
pub use self::retry::BackoffSchedule;
pub use self::status::RunCounts;
