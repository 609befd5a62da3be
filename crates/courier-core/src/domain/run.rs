//! Job Run record: the durable state of one logical job across its attempts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::JobRunId;
use super::names::{EventName, JobName};

/// Terminal-per-transition status of a run.
///
/// A run with no status is in flight: it has been created but no attempt has
/// finished yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Error,
}

/// Fields supplied when a run is first created.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJobRun {
    pub job: JobName,
    pub event: Option<EventName>,
    pub data: serde_json::Value,
}

/// Persisted run row.
///
/// Design:
/// - `data` is fixed at creation; retries replay it verbatim.
/// - `attempts` only ever increases, once per failed execution.
/// - All transitions go through the methods below, so every store
///   implementation applies the same rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRun {
    pub id: JobRunId,
    pub job: JobName,
    pub event: Option<EventName>,
    pub data: serde_json::Value,
    pub status: Option<RunStatus>,
    pub attempts: u32,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,

    /// Lease held by the invocation currently executing this run.
    pub claimed_until: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRun {
    pub fn new(id: JobRunId, new: NewJobRun, now: DateTime<Utc>) -> Self {
        Self {
            id,
            job: new.job,
            event: new.event,
            data: new.data,
            status: None,
            attempts: 0,
            result: None,
            error: None,
            claimed_until: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == Some(RunStatus::Success)
    }

    pub fn is_claimed_at(&self, now: DateTime<Utc>) -> bool {
        self.claimed_until.is_some_and(|until| until > now)
    }

    pub fn claim(&mut self, until: DateTime<Utc>, now: DateTime<Utc>) {
        self.claimed_until = Some(until);
        self.updated_at = now;
    }

    pub fn release(&mut self, now: DateTime<Utc>) {
        self.claimed_until = None;
        self.updated_at = now;
    }

    /// Record a successful attempt. Returns `false` if the run had already
    /// succeeded, in which case nothing changes.
    pub fn mark_succeeded(&mut self, result: serde_json::Value, now: DateTime<Utc>) -> bool {
        if self.is_succeeded() {
            return false;
        }
        self.status = Some(RunStatus::Success);
        self.result = Some(result);
        self.claimed_until = None;
        self.updated_at = now;
        true
    }

    /// Record a failed attempt and bump `attempts`. Returns `false` if the run
    /// had already succeeded.
    pub fn record_failure(&mut self, error: String, now: DateTime<Utc>) -> bool {
        if self.is_succeeded() {
            return false;
        }
        self.status = Some(RunStatus::Error);
        self.error = Some(error);
        self.attempts += 1;
        self.claimed_until = None;
        self.updated_at = now;
        true
    }

    /// Mark the run as errored without counting an attempt. Used when the
    /// run can never execute (its handler is not registered).
    pub fn reject(&mut self, error: String, now: DateTime<Utc>) -> bool {
        if self.is_succeeded() {
            return false;
        }
        self.status = Some(RunStatus::Error);
        self.error = Some(error);
        self.claimed_until = None;
        self.updated_at = now;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample(now: DateTime<Utc>) -> JobRun {
        JobRun::new(
            JobRunId::new(1),
            NewJobRun {
                job: JobName::new("send_email"),
                event: Some(EventName::new("order.created")),
                data: serde_json::json!({"orderId": 1}),
            },
            now,
        )
    }

    #[test]
    fn new_run_is_in_flight_with_zero_attempts() {
        let run = sample(Utc::now());
        assert_eq!(run.status, None);
        assert_eq!(run.attempts, 0);
        assert!(!run.is_succeeded());
    }

    #[test]
    fn failure_increments_attempts_and_keeps_data() {
        let now = Utc::now();
        let mut run = sample(now);

        assert!(run.record_failure("boom".to_string(), now));
        assert!(run.record_failure("boom again".to_string(), now));

        assert_eq!(run.attempts, 2);
        assert_eq!(run.status, Some(RunStatus::Error));
        assert_eq!(run.error.as_deref(), Some("boom again"));
        assert_eq!(run.data, serde_json::json!({"orderId": 1}));
    }

    #[test]
    fn writes_after_success_are_ignored() {
        let now = Utc::now();
        let mut run = sample(now);
        assert!(run.mark_succeeded(serde_json::json!("done"), now));

        assert!(!run.record_failure("late".to_string(), now));
        assert!(!run.mark_succeeded(serde_json::json!("again"), now));
        assert!(!run.reject("Job not found".to_string(), now));

        assert_eq!(run.attempts, 0);
        assert_eq!(run.result, Some(serde_json::json!("done")));
    }

    #[test]
    fn reject_does_not_count_an_attempt() {
        let now = Utc::now();
        let mut run = sample(now);
        run.reject("Job not found".to_string(), now);
        assert_eq!(run.status, Some(RunStatus::Error));
        assert_eq!(run.attempts, 0);
    }

    #[test]
    fn claim_expires() {
        let now = Utc::now();
        let mut run = sample(now);
        run.claim(now + Duration::seconds(30), now);

        assert!(run.is_claimed_at(now));
        assert!(!run.is_claimed_at(now + Duration::seconds(31)));

        run.release(now);
        assert!(!run.is_claimed_at(now));
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&RunStatus::Success).unwrap(), "\"success\"");
        assert_eq!(serde_json::to_string(&RunStatus::Error).unwrap(), "\"error\"");
    }
}
