use crate::error::{Error, Result};
use crate::policy::{ObservanceCategory, Policy};
use chrono::{DateTime, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Where a daily observance takes its start time from.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum DailyAnchor {
    Fixed { time: NaiveTime },
    /// Named slot in the prayer-time table (e.g. `dhuhr`), looked up per day.
    Provider { slot: String },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Recurrence {
    Daily {
        anchor: DailyAnchor,
        duration_mins: u32,
        zone: Tz,
        #[serde(default)]
        only_on: Vec<Weekday>,
        /// Prayer-table location for provider anchors; the zone when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        location: Option<String>,
        /// Restricts the rule to days inside this Hijri month (9 for Ramadan).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hijri_month: Option<u32>,
    },
    YearlyFixed {
        month: u32,
        day: u32,
        #[serde(default = "one_day")]
        days: u32,
        zone: Tz,
    },
    YearlyLunar {
        month: u32,
        day: u32,
        #[serde(default = "one_day")]
        days: u32,
        zone: Tz,
    },
    RangeOverride {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        /// Zone the observance is kept in, so its local hours read the same
        /// whichever zone a query uses.
        zone: Tz,
    },
}

fn one_day() -> u32 {
    1
}

fn generated_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RecurrenceRule {
    #[serde(default = "generated_id")]
    pub id: String,
    #[serde(default)]
    pub label: String,
    pub category: ObservanceCategory,
    /// Nationality tag; only meaningful for nationality holidays.
    #[serde(default)]
    pub nationality: Option<String>,
    #[serde(default)]
    pub policy: Option<Policy>,
    pub recurrence: Recurrence,
}

impl RecurrenceRule {
    pub fn new(id: impl Into<String>, category: ObservanceCategory, recurrence: Recurrence) -> Self {
        Self {
            id: id.into(),
            label: String::new(),
            category,
            nationality: None,
            policy: None,
            recurrence,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_nationality(mut self, tag: impl Into<String>) -> Self {
        self.nationality = Some(tag.into());
        self
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// The rule's own policy, or its category default.
    pub fn effective_policy(&self) -> Policy {
        self.policy
            .clone()
            .unwrap_or_else(|| self.category.default_policy())
    }

    /// Nationality holidays apply only when their tag is among `tags`
    /// (case-insensitive); every other category always applies.
    pub fn applies_to(&self, tags: &BTreeSet<String>) -> bool {
        if self.category != ObservanceCategory::NationalityHoliday {
            return true;
        }
        match &self.nationality {
            Some(tag) => tags.iter().any(|t| t.eq_ignore_ascii_case(tag)),
            None => false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidRule("rule id must not be empty".into()));
        }
        if self.category == ObservanceCategory::NationalityHoliday && self.nationality.is_none() {
            return Err(Error::InvalidRule(format!(
                "rule '{}' is a nationality holiday without a nationality tag",
                self.id
            )));
        }
        match &self.recurrence {
            Recurrence::Daily { duration_mins, .. } if *duration_mins == 0 => Err(Error::InvalidRule(
                format!("rule '{}' has a zero-length daily duration", self.id),
            )),
            Recurrence::Daily {
                hijri_month: Some(month),
                ..
            } if !(1..=12).contains(month) => Err(Error::InvalidRule(format!(
                "rule '{}' is scoped to invalid hijri month {}",
                self.id, month
            ))),
            Recurrence::YearlyFixed { month, day, days, .. } => {
                check_month_day(&self.id, *month, *day, 31, *days)
            }
            Recurrence::YearlyLunar { month, day, days, .. } => {
                check_month_day(&self.id, *month, *day, 30, *days)
            }
            Recurrence::RangeOverride { start, end, .. } if start >= end => Err(Error::InvalidRule(
                format!("rule '{}' range starts after it ends", self.id),
            )),
            _ => Ok(()),
        }
    }
}

fn check_month_day(id: &str, month: u32, day: u32, max_day: u32, days: u32) -> Result<()> {
    if !(1..=12).contains(&month) || !(1..=max_day).contains(&day) {
        return Err(Error::InvalidRule(format!(
            "rule '{}' has an invalid month/day {}/{}",
            id, month, day
        )));
    }
    if days == 0 {
        return Err(Error::InvalidRule(format!("rule '{}' spans zero days", id)));
    }
    Ok(())
}
