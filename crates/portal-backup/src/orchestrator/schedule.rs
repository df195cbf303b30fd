//! Cron expressions of recurring backups.

use std::str::FromStr;

use ::cron::Schedule;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;

const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Period {
    Day,
    Week,
    Month,
}

/// Friendly form of a backup schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronParams {
    pub period: Period,
    /// Hour of day, 0 to 23.
    pub hour: u32,
    /// Day of week (1 = Sunday) for weekly runs, day of month for monthly
    /// runs. Ignored for daily runs.
    pub day: u32,
}

impl CronParams {
    pub fn to_cron(&self) -> Result<String, OrchestratorError> {
        if self.hour > 23 {
            return Err(OrchestratorError::Validation(format!(
                "hour {} is out of range",
                self.hour
            )));
        }
        match self.period {
            Period::Day => Ok(format!("0 0 {} * * *", self.hour)),
            Period::Week => {
                let day = self
                    .day
                    .checked_sub(1)
                    .and_then(|i| WEEKDAYS.get(i as usize))
                    .ok_or_else(|| {
                        OrchestratorError::Validation(format!(
                            "day of week {} is out of range",
                            self.day
                        ))
                    })?;
                Ok(format!("0 0 {} * * {}", self.hour, day))
            }
            Period::Month => {
                if !(1..=31).contains(&self.day) {
                    return Err(OrchestratorError::Validation(format!(
                        "day of month {} is out of range",
                        self.day
                    )));
                }
                Ok(format!("0 0 {} {} * *", self.hour, self.day))
            }
        }
    }
}

/// Either friendly parameters or a raw cron expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CronSpec {
    Params(CronParams),
    Expression(String),
}

impl CronSpec {
    /// Validated cron expression with a seconds field.
    pub fn to_expression(&self) -> Result<String, OrchestratorError> {
        let expression = match self {
            CronSpec::Params(params) => params.to_cron()?,
            CronSpec::Expression(raw) => normalize(raw),
        };
        parse(&expression)?;
        Ok(expression)
    }
}

/// Prefixes five-field expressions with a seconds field.
pub fn normalize(expression: &str) -> String {
    let trimmed = expression.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    }
}

pub fn parse(expression: &str) -> Result<Schedule, OrchestratorError> {
    Schedule::from_str(&normalize(expression)).map_err(|e| OrchestratorError::InvalidCron {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// First occurrence strictly after `after`.
pub fn next_after(schedule: &Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&after).next()
}
