//! Cron schedule expressions (standard 5-field syntax).

use std::fmt;

use chrono::{DateTime, Utc};
use croner::Cron;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CronSchedule {
    expr: String,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid cron expression '{expr}': {reason}")]
pub struct InvalidSchedule {
    pub expr: String,
    pub reason: String,
}

impl CronSchedule {
    pub fn parse(expr: impl Into<String>) -> Result<Self, InvalidSchedule> {
        let expr = expr.into();
        let fields = expr.split_whitespace().count();
        if fields != 5 {
            return Err(InvalidSchedule {
                reason: format!("expected 5 fields, found {fields}"),
                expr,
            });
        }
        Cron::new(&expr).parse().map_err(|e| InvalidSchedule {
            reason: e.to_string(),
            expr: expr.clone(),
        })?;
        Ok(Self { expr })
    }

    pub fn as_str(&self) -> &str {
        &self.expr
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let cron = Cron::new(&self.expr).parse().ok()?;
        cron.find_next_occurrence(&after, false).ok()
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.expr.fmt(f)
    }
}
