//! Event trait - イベント名とペイロード型の対応付け
//!
//! # 学習ポイント
//! - Associated Constants (`const NAME`)
//! - ペイロード型そのものがスキーマ（serde で検証）

use serde::Serialize;
use serde::de::DeserializeOwned;

/// An event binds a name to its payload type.
///
/// The payload type *is* the schema: a JSON payload is valid for the event
/// exactly when it deserializes into `Self`.
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// #[serde(rename_all = "camelCase")]
/// struct MessageCreated {
///     message_id: i64,
/// }
///
/// impl Event for MessageCreated {
///     const NAME: &'static str = "conversations/message.created";
/// }
/// ```
pub trait Event: Serialize + DeserializeOwned + Send + Sync + 'static {
    const NAME: &'static str;
}

/// Validate a raw payload against `E`'s schema.
pub(crate) fn validate_payload<E: Event>(payload: &serde_json::Value) -> Result<(), serde_json::Error> {
    E::deserialize(payload).map(|_| ())
}
