//! Queue message / invocation body.
//!
//! The same JSON shape travels through the queue and arrives at the
//! invocation endpoint:
//! - event-triggered: `{ "event", "job", "jobRunId"?, "data" }`
//! - cron-triggered: `{ "job", "jobRunId"? }`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{JobRunId, MessageId};
use super::names::{EventName, JobName};
use super::run::JobRun;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<EventName>,

    pub job: JobName,

    /// Absent for a new logical job; present on every retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_run_id: Option<JobRunId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// How a message was triggered, after shape validation.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    Event {
        event: EventName,
        data: serde_json::Value,
    },
    Cron,
}

#[derive(Debug, thiserror::Error)]
pub enum MalformedMessage {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cron invocation for job '{0}' must not carry data")]
    CronWithData(JobName),
}

impl JobMessage {
    /// First delivery of an event-triggered job.
    pub fn for_event(event: EventName, job: JobName, data: serde_json::Value) -> Self {
        Self {
            event: Some(event),
            job,
            job_run_id: None,
            data: Some(data),
        }
    }

    /// Cron trigger body (`{"job": name}`).
    pub fn for_cron(job: JobName) -> Self {
        Self {
            event: None,
            job,
            job_run_id: None,
            data: None,
        }
    }

    /// Retry of an existing run: same job, event and payload, carrying the id.
    pub fn retry_of(run: &JobRun) -> Self {
        Self {
            event: run.event.clone(),
            job: run.job.clone(),
            job_run_id: Some(run.id),
            data: run.event.as_ref().map(|_| run.data.clone()),
        }
    }

    pub fn parse(body: &[u8]) -> Result<Self, MalformedMessage> {
        let message: JobMessage = serde_json::from_slice(body)?;
        message.trigger()?;
        Ok(message)
    }

    pub fn trigger(&self) -> Result<Trigger, MalformedMessage> {
        match (&self.event, &self.data) {
            (Some(event), data) => Ok(Trigger::Event {
                event: event.clone(),
                // `"data": null` and a missing `data` are the same thing on the wire
                data: data.clone().unwrap_or(serde_json::Value::Null),
            }),
            (None, None) => Ok(Trigger::Cron),
            (None, Some(_)) => Err(MalformedMessage::CronWithData(self.job.clone())),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A message as stored in the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub id: MessageId,
    pub message: JobMessage,
    pub enqueued_at: DateTime<Utc>,
    pub visible_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case::event(
        r#"{"event":"order.created","job":"send_email","data":{"orderId":1}}"#,
        Trigger::Event { event: EventName::new("order.created"), data: json!({"orderId": 1}) }
    )]
    #[case::event_retry(
        r#"{"event":"order.created","job":"send_email","jobRunId":9,"data":{"orderId":1}}"#,
        Trigger::Event { event: EventName::new("order.created"), data: json!({"orderId": 1}) }
    )]
    #[case::event_null_data(
        r#"{"event":"ping","job":"pong","data":null}"#,
        Trigger::Event { event: EventName::new("ping"), data: serde_json::Value::Null }
    )]
    #[case::cron(r#"{"job":"generate_daily_reports"}"#, Trigger::Cron)]
    #[case::cron_retry(r#"{"job":"generate_daily_reports","jobRunId":3}"#, Trigger::Cron)]
    fn parses_body_shapes(#[case] body: &str, #[case] expected: Trigger) {
        let message = JobMessage::parse(body.as_bytes()).unwrap();
        assert_eq!(message.trigger().unwrap(), expected);
    }

    #[rstest]
    #[case::not_json("not json")]
    #[case::missing_job(r#"{"event":"order.created","data":{}}"#)]
    #[case::cron_with_data(r#"{"job":"nightly","data":{"x":1}}"#)]
    #[case::bad_run_id(r#"{"job":"nightly","jobRunId":"abc"}"#)]
    fn rejects_malformed_bodies(#[case] body: &str) {
        assert!(JobMessage::parse(body.as_bytes()).is_err());
    }

    #[test]
    fn cron_body_serializes_to_job_only() {
        let body = JobMessage::for_cron(JobName::new("nightly")).to_json().unwrap();
        assert_eq!(body, r#"{"job":"nightly"}"#);
    }

    #[test]
    fn retry_carries_run_id_and_original_payload() {
        let now = Utc::now();
        let run = JobRun::new(
            JobRunId::new(5),
            crate::domain::NewJobRun {
                job: JobName::new("send_email"),
                event: Some(EventName::new("order.created")),
                data: json!({"orderId": 1}),
            },
            now,
        );

        let retry = JobMessage::retry_of(&run);
        let value: serde_json::Value = serde_json::from_str(&retry.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"event": "order.created", "job": "send_email", "jobRunId": 5, "data": {"orderId": 1}})
        );
    }

    #[test]
    fn cron_retry_has_no_data() {
        let run = JobRun::new(
            JobRunId::new(8),
            crate::domain::NewJobRun {
                job: JobName::new("nightly"),
                event: None,
                data: serde_json::Value::Null,
            },
            Utc::now(),
        );
        let retry = JobMessage::retry_of(&run);
        assert_eq!(retry.trigger().unwrap(), Trigger::Cron);
        assert_eq!(retry.job_run_id, Some(JobRunId::new(8)));
    }
}
