//! Status - Job Run の集計
//!
//! `courier serve` の起動ログとテストで使う。

use serde::Serialize;

/// Runs per status. A run with no status yet is counted as in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub in_flight: usize,
    pub succeeded: usize,
    pub errored: usize,
}

impl RunCounts {
    pub fn total(&self) -> usize {
        self.in_flight + self.succeeded + self.errored
    }
}
