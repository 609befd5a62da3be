//! JobRegistry - イベント/cron ジョブと Handler の対応表
//!
//! # 設計原則
//! - 起動時に構築し、以後は不変（`Arc<JobRegistry>` で共有）
//! - グローバル変数ではなく明示的な値として Publisher / Endpoint に注入する
//! - 登録時に検証する（Fail-fast）: 重複・スキーマ不一致・不正な cron 式は起動エラー
//!
//! # 内部実装
//! - `HashMap<EventName, EventEntry>` と `HashMap<JobName, CronEntry>`
//! - Handler は `Arc<dyn DynHandler>` に型消去して保持

use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::sync::Arc;

use super::event::{Event, validate_payload};
use super::handler::{CronAdapter, CronHandler, DynHandler, Handler, TypedHandler};
use super::schedule::{CronSchedule, InvalidSchedule};
use crate::domain::{EventName, JobName};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("event '{0}' is already registered")]
    DuplicateEvent(EventName),

    #[error("event '{event}' was registered with a different payload type ({existing}, now {attempted})")]
    SchemaMismatch {
        event: EventName,
        existing: &'static str,
        attempted: &'static str,
    },

    #[error("job '{job}' is registered twice under event '{event}'")]
    DuplicateJob { event: EventName, job: JobName },

    #[error("cron job '{0}' is already registered")]
    DuplicateCronJob(JobName),

    #[error(transparent)]
    InvalidSchedule(#[from] InvalidSchedule),

    #[error("unknown event '{0}'")]
    UnknownEvent(EventName),

    #[error("payload for event '{event}' does not match its schema: {source}")]
    InvalidPayload {
        event: EventName,
        #[source]
        source: serde_json::Error,
    },

    #[error("no job '{job}' registered for event '{event}'")]
    JobNotFound { event: EventName, job: JobName },

    #[error("no cron job '{0}' registered")]
    CronJobNotFound(JobName),
}

/// Jobs that run when an event of type `E` is published.
///
/// Only `Handler<E>` implementations can be added, so every job under an
/// event accepts exactly that event's payload type.
pub struct EventJobs<E: Event> {
    jobs: Vec<(JobName, Arc<dyn DynHandler>)>,
    _marker: PhantomData<fn(E)>,
}

impl<E: Event> EventJobs<E> {
    pub fn new() -> Self {
        Self {
            jobs: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub fn job<H>(mut self, name: impl Into<JobName>, handler: H) -> Self
    where
        H: Handler<E> + 'static,
    {
        self.jobs
            .push((name.into(), Arc::new(TypedHandler::<E, H>::new(handler))));
        self
    }
}

impl<E: Event> Default for EventJobs<E> {
    fn default() -> Self {
        Self::new()
    }
}

struct EventEntry {
    payload_type: TypeId,
    payload_type_name: &'static str,
    validate: fn(&serde_json::Value) -> Result<(), serde_json::Error>,
    jobs: BTreeMap<JobName, Arc<dyn DynHandler>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronEntry {
    pub name: JobName,
    pub schedule: CronSchedule,
}

struct CronSlot {
    schedule: CronSchedule,
    handler: Arc<dyn DynHandler>,
}

/// Immutable lookup table built at startup.
#[derive(Default)]
pub struct JobRegistry {
    events: HashMap<EventName, EventEntry>,
    cron: HashMap<JobName, CronSlot>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an event and the jobs it fans out to.
    ///
    /// Registering the same event name a second time fails: with the same
    /// payload type it is a duplicate, with a different one a schema mismatch.
    pub fn register_event<E: Event>(&mut self, jobs: EventJobs<E>) -> Result<(), RegistryError> {
        let event = EventName::new(E::NAME);
        if let Some(existing) = self.events.get(&event) {
            if existing.payload_type != TypeId::of::<E>() {
                return Err(RegistryError::SchemaMismatch {
                    event,
                    existing: existing.payload_type_name,
                    attempted: std::any::type_name::<E>(),
                });
            }
            return Err(RegistryError::DuplicateEvent(event));
        }

        let mut table = BTreeMap::new();
        for (job, handler) in jobs.jobs {
            if table.contains_key(&job) {
                return Err(RegistryError::DuplicateJob { event, job });
            }
            table.insert(job, handler);
        }

        self.events.insert(
            event,
            EventEntry {
                payload_type: TypeId::of::<E>(),
                payload_type_name: std::any::type_name::<E>(),
                validate: validate_payload::<E>,
                jobs: table,
            },
        );
        Ok(())
    }

    pub fn register_cron_job<H>(
        &mut self,
        name: impl Into<JobName>,
        schedule: &str,
        handler: H,
    ) -> Result<(), RegistryError>
    where
        H: CronHandler + 'static,
    {
        let name = name.into();
        let schedule = CronSchedule::parse(schedule)?;
        if self.cron.contains_key(&name) {
            return Err(RegistryError::DuplicateCronJob(name));
        }
        self.cron.insert(
            name,
            CronSlot {
                schedule,
                handler: Arc::new(CronAdapter::new(handler)),
            },
        );
        Ok(())
    }

    pub fn resolve(&self, event: &EventName, job: &JobName) -> Result<Arc<dyn DynHandler>, RegistryError> {
        self.events
            .get(event)
            .and_then(|entry| entry.jobs.get(job))
            .cloned()
            .ok_or_else(|| RegistryError::JobNotFound {
                event: event.clone(),
                job: job.clone(),
            })
    }

    pub fn resolve_cron(&self, job: &JobName) -> Result<Arc<dyn DynHandler>, RegistryError> {
        self.cron
            .get(job)
            .map(|slot| Arc::clone(&slot.handler))
            .ok_or_else(|| RegistryError::CronJobNotFound(job.clone()))
    }

    /// Jobs registered under `event`, in name order.
    pub fn jobs_for(&self, event: &EventName) -> Result<Vec<JobName>, RegistryError> {
        self.events
            .get(event)
            .map(|entry| entry.jobs.keys().cloned().collect())
            .ok_or_else(|| RegistryError::UnknownEvent(event.clone()))
    }

    pub fn validate_payload(&self, event: &EventName, payload: &serde_json::Value) -> Result<(), RegistryError> {
        let entry = self
            .events
            .get(event)
            .ok_or_else(|| RegistryError::UnknownEvent(event.clone()))?;
        (entry.validate)(payload).map_err(|source| RegistryError::InvalidPayload {
            event: event.clone(),
            source,
        })
    }

    pub fn cron_jobs(&self) -> Vec<CronEntry> {
        let mut entries: Vec<CronEntry> = self
            .cron
            .iter()
            .map(|(name, slot)| CronEntry {
                name: name.clone(),
                schedule: slot.schedule.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    /// Every job name the registry can dispatch, event jobs and cron jobs.
    pub fn registered_jobs(&self) -> Vec<JobName> {
        let mut jobs: Vec<JobName> = self
            .events
            .values()
            .flat_map(|entry| entry.jobs.keys().cloned())
            .chain(self.cron.keys().cloned())
            .collect();
        jobs.sort();
        jobs.dedup();
        jobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobError;
    use crate::typed::event::fixtures::{OrderCreated, OrderCreatedV2, ReportDue};
    use crate::typed::handler::{cron_fn, handler_fn};
    use serde_json::json;

    fn ok_order() -> impl Handler<OrderCreated> + 'static {
        handler_fn(|_: OrderCreated| async { Ok::<_, JobError>(()) })
    }

    fn registry() -> JobRegistry {
        let mut registry = JobRegistry::new();
        registry
            .register_event(
                EventJobs::<OrderCreated>::new()
                    .job("send_email", ok_order())
                    .job("update_inventory", ok_order()),
            )
            .unwrap();
        registry
            .register_cron_job(
                "generate_daily_reports",
                "0 16 * * 0,2-6",
                cron_fn(|| async { Ok::<_, JobError>(()) }),
            )
            .unwrap();
        registry
    }

    #[test]
    fn resolves_event_jobs_and_cron_jobs() {
        let registry = registry();
        let event = EventName::new("order.created");

        assert!(registry.resolve(&event, &JobName::new("send_email")).is_ok());
        assert!(registry.resolve(&event, &JobName::new("update_inventory")).is_ok());
        assert!(registry
            .resolve_cron(&JobName::new("generate_daily_reports"))
            .is_ok());
    }

    #[test]
    fn unknown_pairs_are_not_found() {
        let registry = registry();
        let event = EventName::new("order.created");

        assert!(matches!(
            registry.resolve(&event, &JobName::new("nope")),
            Err(RegistryError::JobNotFound { .. })
        ));
        assert!(matches!(
            registry.resolve(&EventName::new("other"), &JobName::new("send_email")),
            Err(RegistryError::JobNotFound { .. })
        ));
        // cron and event namespaces are separate
        assert!(matches!(
            registry.resolve_cron(&JobName::new("send_email")),
            Err(RegistryError::CronJobNotFound(_))
        ));
    }

    #[test]
    fn jobs_for_lists_fan_out_targets() {
        let registry = registry();
        let jobs = registry.jobs_for(&EventName::new("order.created")).unwrap();
        assert_eq!(jobs, vec![JobName::new("send_email"), JobName::new("update_inventory")]);
    }

    #[test]
    fn same_event_twice_is_a_duplicate() {
        let mut registry = registry();
        let result = registry.register_event(EventJobs::<OrderCreated>::new().job("x", ok_order()));
        assert!(matches!(result, Err(RegistryError::DuplicateEvent(_))));
    }

    #[test]
    fn same_name_with_other_payload_is_a_schema_mismatch() {
        let mut registry = registry();
        let result = registry.register_event(
            EventJobs::<OrderCreatedV2>::new()
                .job("x", handler_fn(|_: OrderCreatedV2| async { Ok::<_, JobError>(()) })),
        );
        assert!(matches!(result, Err(RegistryError::SchemaMismatch { .. })));
    }

    #[test]
    fn duplicate_job_under_one_event_is_rejected() {
        let mut registry = JobRegistry::new();
        let result = registry.register_event(
            EventJobs::<ReportDue>::new()
                .job("generate", handler_fn(|_: ReportDue| async { Ok::<_, JobError>(()) }))
                .job("generate", handler_fn(|_: ReportDue| async { Ok::<_, JobError>(()) })),
        );
        assert!(matches!(result, Err(RegistryError::DuplicateJob { .. })));
    }

    #[test]
    fn invalid_cron_schedule_fails_registration() {
        let mut registry = JobRegistry::new();
        let result = registry.register_cron_job("bad", "every day", cron_fn(|| async { Ok::<_, JobError>(()) }));
        assert!(matches!(result, Err(RegistryError::InvalidSchedule(_))));
        assert!(registry.cron_jobs().is_empty());
    }

    #[test]
    fn duplicate_cron_job_is_rejected() {
        let mut registry = registry();
        let result = registry.register_cron_job(
            "generate_daily_reports",
            "0 * * * *",
            cron_fn(|| async { Ok::<_, JobError>(()) }),
        );
        assert!(matches!(result, Err(RegistryError::DuplicateCronJob(_))));
    }

    #[test]
    fn validates_payload_against_event_schema() {
        let registry = registry();
        let event = EventName::new("order.created");

        assert!(registry.validate_payload(&event, &json!({"orderId": 3})).is_ok());
        assert!(matches!(
            registry.validate_payload(&event, &json!({"orderId": "3"})),
            Err(RegistryError::InvalidPayload { .. })
        ));
        assert!(matches!(
            registry.validate_payload(&EventName::new("missing"), &json!({})),
            Err(RegistryError::UnknownEvent(_))
        ));
    }

    #[test]
    fn registered_jobs_covers_both_tables() {
        let registry = registry();
        assert_eq!(
            registry.registered_jobs(),
            vec![
                JobName::new("generate_daily_reports"),
                JobName::new("send_email"),
                JobName::new("update_inventory"),
            ]
        );
    }
}
