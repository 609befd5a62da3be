//! Retry scheduler: backoff table for failed runs.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Fixed backoff table indexed by the run's attempt count *before* the
/// failure being handled.
///
/// Default table: 5s, 60s, 300s, 3600s.
///
/// - attempts 0 (first failure): 5s
/// - attempts 1: 60s
/// - attempts 2: 300s
/// - attempts 3: 3600s
/// - attempts 4: none, the run stays `error`
///
/// So a run executes at most `len() + 1` times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffSchedule {
    delays: Vec<Duration>,
}

#[derive(Debug, thiserror::Error)]
pub enum InvalidBackoff {
    #[error("backoff table is empty")]
    Empty,

    #[error("invalid backoff entry '{0}': expected whole seconds")]
    Entry(String),
}

impl BackoffSchedule {
    pub fn new(delays: Vec<Duration>) -> Result<Self, InvalidBackoff> {
        if delays.is_empty() {
            return Err(InvalidBackoff::Empty);
        }
        Ok(Self { delays })
    }

    /// Delay before the retry that follows a failure at `attempts`, or
    /// `None` when no retry is left.
    pub fn delay_for(&self, attempts: u32) -> Option<Duration> {
        usize::try_from(attempts)
            .ok()
            .and_then(|index| self.delays.get(index))
            .copied()
    }

    /// A run whose failures outnumber the table will never be retried.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        usize::try_from(attempts).map_or(true, |attempts| attempts > self.delays.len())
    }

    pub fn len(&self) -> usize {
        self.delays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delays.is_empty()
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self {
            delays: [5, 60, 300, 3600].into_iter().map(Duration::from_secs).collect(),
        }
    }
}

/// Parses comma-separated seconds, e.g. `"5,60,300,3600"`.
impl FromStr for BackoffSchedule {
    type Err = InvalidBackoff;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let delays = s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| InvalidBackoff::Entry(part.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(delays)
    }
}

impl fmt::Display for BackoffSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.delays.iter().map(|d| d.as_secs().to_string()).collect();
        f.write_str(&parts.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, Some(5))]
    #[case(1, Some(60))]
    #[case(2, Some(300))]
    #[case(3, Some(3600))]
    #[case(4, None)]
    #[case(17, None)]
    fn default_table(#[case] attempts: u32, #[case] expected_secs: Option<u64>) {
        let schedule = BackoffSchedule::default();
        assert_eq!(schedule.delay_for(attempts), expected_secs.map(Duration::from_secs));
    }

    #[rstest]
    #[case(3, false)]
    #[case(4, false)]
    #[case(5, true)]
    fn exhaustion_means_more_failures_than_entries(#[case] attempts: u32, #[case] exhausted: bool) {
        assert_eq!(BackoffSchedule::default().is_exhausted(attempts), exhausted);
    }

    #[test]
    fn parses_comma_separated_seconds() {
        let schedule: BackoffSchedule = "1, 2,3".parse().unwrap();
        assert_eq!(
            schedule.delays(),
            &[Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(3)]
        );
        assert_eq!(schedule.to_string(), "1,2,3");
    }

    #[rstest]
    #[case("")]
    #[case("5,abc")]
    #[case("-1")]
    fn rejects_bad_tables(#[case] input: &str) {
        assert!(input.parse::<BackoffSchedule>().is_err());
    }

    #[test]
    fn default_round_trips_through_display() {
        let schedule = BackoffSchedule::default();
        assert_eq!(schedule.to_string(), "5,60,300,3600");
        assert_eq!(schedule.to_string().parse::<BackoffSchedule>().unwrap(), schedule);
    }
}
