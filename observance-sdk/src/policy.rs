use chrono::{Duration, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ObservanceCategory {
    PrayerWindow,
    NationalHoliday,
    NationalityHoliday,
    RamadanPeriod,
}

impl ObservanceCategory {
    pub const ALL: [ObservanceCategory; 4] = [
        ObservanceCategory::PrayerWindow,
        ObservanceCategory::NationalHoliday,
        ObservanceCategory::NationalityHoliday,
        ObservanceCategory::RamadanPeriod,
    ];

    pub fn default_policy(self) -> Policy {
        match self {
            ObservanceCategory::PrayerWindow => Policy::new(Severity::Block).with_buffers(15, 15),
            ObservanceCategory::NationalHoliday => Policy::new(Severity::Block),
            ObservanceCategory::NationalityHoliday => Policy::new(Severity::Warn),
            ObservanceCategory::RamadanPeriod => Policy {
                max_duration_mins: Some(45),
                preferred_hours: NaiveTime::from_hms_opt(9, 0, 0)
                    .zip(NaiveTime::from_hms_opt(15, 0, 0))
                    .map(|(start, end)| PreferredHours { start, end }),
                ..Policy::new(Severity::AdjustDuration)
            },
        }
    }
}

impl fmt::Display for ObservanceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObservanceCategory::PrayerWindow => "prayer_window",
            ObservanceCategory::NationalHoliday => "national_holiday",
            ObservanceCategory::NationalityHoliday => "nationality_holiday",
            ObservanceCategory::RamadanPeriod => "ramadan_period",
        };
        f.write_str(name)
    }
}

impl FromStr for ObservanceCategory {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ObservanceCategory::ALL
            .into_iter()
            .find(|c| c.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| crate::error::Error::Config(format!("unknown observance category '{}'", s)))
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Block,
    Warn,
    AdjustDuration,
}

impl Severity {
    /// Higher wins when instances start at the same instant.
    pub fn priority(self) -> u8 {
        match self {
            Severity::Block => 3,
            Severity::Warn => 2,
            Severity::AdjustDuration => 1,
        }
    }
}

/// Local time-of-day range in which meetings are preferred (e.g. Ramadan
/// working hours).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreferredHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl PreferredHours {
    pub fn contains_range(&self, from: NaiveTime, to: NaiveTime) -> bool {
        from >= self.start && to <= self.end && from <= to
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Policy {
    pub severity: Severity,
    #[serde(default)]
    pub buffer_before_mins: u32,
    #[serde(default)]
    pub buffer_after_mins: u32,
    #[serde(default)]
    pub max_duration_mins: Option<u32>,
    #[serde(default)]
    pub preferred_hours: Option<PreferredHours>,
}

impl Policy {
    pub fn new(severity: Severity) -> Self {
        Self {
            severity,
            buffer_before_mins: 0,
            buffer_after_mins: 0,
            max_duration_mins: None,
            preferred_hours: None,
        }
    }

    pub fn with_buffers(mut self, before_mins: u32, after_mins: u32) -> Self {
        self.buffer_before_mins = before_mins;
        self.buffer_after_mins = after_mins;
        self
    }

    pub fn with_max_duration(mut self, mins: u32) -> Self {
        self.max_duration_mins = Some(mins);
        self
    }

    pub fn buffer_before(&self) -> Duration {
        Duration::minutes(self.buffer_before_mins as i64)
    }

    pub fn buffer_after(&self) -> Duration {
        Duration::minutes(self.buffer_after_mins as i64)
    }

    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_mins.map(|m| Duration::minutes(m as i64))
    }
}

/// Organization-level replacements for category policies.
pub type PolicyOverrides = std::collections::BTreeMap<ObservanceCategory, Policy>;
