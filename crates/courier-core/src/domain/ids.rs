//! Domain identifiers (strongly-typed IDs).
//!
//! Run と Message の ID はどちらも datastore の連番（bigint）ですが、
//! Phantom type パターンで型を分けて混同できないようにしています。
//!
//! ## Phantom Type パターン
//! `Id<T>` というジェネリック型で共通実装を提供しつつ、
//! `T` は実行時には使わない（PhantomData）マーカー型として、
//! コンパイル時の型安全性を提供します。
//!
//! Wire format は素の数値です（`"jobRunId": 42`）。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"run-", "msg-"）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    value: u64,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub const fn new(value: u64) -> Self {
        Self {
            value,
            _marker: PhantomData,
        }
    }

    pub fn get(&self) -> u64 {
        self.value
    }
}

impl<T: IdMarker> From<u64> for Id<T> {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.value)
    }
}

/// Job Run のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Run {}

impl IdMarker for Run {
    fn prefix() -> &'static str {
        "run-"
    }
}

/// Queue message のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Message {}

impl IdMarker for Message {
    fn prefix() -> &'static str {
        "msg-"
    }
}

/// Identifier of a Job Run (one logical job across all of its attempts).
pub type JobRunId = Id<Run>;

/// Identifier of a queued message.
pub type MessageId = Id<Message>;

/// Correlation id for a single endpoint invocation.
///
/// Not persisted. It ties the accept/reject log lines to the detached
/// dispatch task that runs afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvocationId(Ulid);

impl InvocationId {
    pub fn generate() -> Self {
        Self(Ulid::new())
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "inv-{}", self.0)
    }
}
