//! Clock port - 時刻の抽象化
//!
//! # テスト容易性
//! - trait により時刻を差し替え可能
//! - テストでは `ManualClock` を進めて遅延配送を再現する（sleep 不要）

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: std::time::Duration) {
        let Ok(by) = Duration::from_std(by) else {
            return;
        };
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(next) = now.checked_add_signed(by) {
            *now = next;
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn manual_clock_advances_and_is_shared_by_clones() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let other = clock.clone();

        clock.advance(std::time::Duration::from_secs(60));
        assert_eq!(other.now(), start + Duration::seconds(60));
    }
}
