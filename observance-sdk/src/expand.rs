//! Turns recurrence rules into concrete observance instances for a query
//! window. Output never extends past what the window needs, however far in
//! the past or future it lies.

use crate::error::Result;
use crate::policy::{ObservanceCategory, Policy, PolicyOverrides};
use crate::provider::{
    HijriDate, Location, LunarCalendarConverter, LunarError, PrayerTimeProvider, ProviderError,
    TabularIslamicCalendar,
};
use crate::rule::{DailyAnchor, Recurrence, RecurrenceRule};
use crate::window::{resolve_local, TimeWindow};
use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ObservanceInstance {
    pub window: TimeWindow,
    pub category: ObservanceCategory,
    pub policy: Policy,
    pub source_rule_id: String,
}

impl ObservanceInstance {
    /// The instance window padded by its policy buffers.
    pub fn buffered_window(&self) -> TimeWindow {
        self.window
            .expand_with_buffer(self.policy.buffer_before(), self.policy.buffer_after())
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    UnresolvableRecurrence,
    ProviderTimeout,
    OutsidePreferredHours,
}

/// A non-fatal issue met while producing a decision.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Warning {
    pub kind: WarningKind,
    #[serde(default)]
    pub rule_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct Expansion {
    pub instances: Vec<ObservanceInstance>,
    pub warnings: Vec<Warning>,
}

impl Expansion {
    pub fn extend(&mut self, other: Expansion) {
        self.instances.extend(other.instances);
        self.warnings.extend(other.warnings);
    }
}

/// (date, location key, slot)
type PrayerKey = (NaiveDate, String, String);

/// Per-query expander. Provider answers are memoized for the expander's
/// lifetime, so build one per evaluation.
pub struct Expander<'a> {
    prayer: &'a dyn PrayerTimeProvider,
    lunar: &'a dyn LunarCalendarConverter,
    overrides: Option<&'a PolicyOverrides>,
    prayer_memo: RefCell<HashMap<PrayerKey, std::result::Result<Option<NaiveTime>, ProviderError>>>,
    lunar_memo: RefCell<HashMap<HijriDate, std::result::Result<NaiveDate, LunarError>>>,
}

impl<'a> Expander<'a> {
    pub fn new(prayer: &'a dyn PrayerTimeProvider, lunar: &'a dyn LunarCalendarConverter) -> Self {
        Self {
            prayer,
            lunar,
            overrides: None,
            prayer_memo: RefCell::new(HashMap::new()),
            lunar_memo: RefCell::new(HashMap::new()),
        }
    }

    pub fn with_overrides(mut self, overrides: &'a PolicyOverrides) -> Self {
        self.overrides = Some(overrides);
        self
    }

    pub fn policy_for(&self, rule: &RecurrenceRule) -> Policy {
        self.overrides
            .and_then(|o| o.get(&rule.category))
            .cloned()
            .unwrap_or_else(|| rule.effective_policy())
    }

    pub fn expand(&self, rule: &RecurrenceRule, window: &TimeWindow) -> Result<Expansion> {
        let policy = self.policy_for(rule);
        let mut out = Expansion::default();
        let push = |w: TimeWindow, out: &mut Expansion| {
            out.instances.push(ObservanceInstance {
                window: w,
                category: rule.category,
                policy: policy.clone(),
                source_rule_id: rule.id.clone(),
            })
        };

        match &rule.recurrence {
            Recurrence::Daily {
                anchor,
                duration_mins,
                zone,
                only_on,
                location,
                hijri_month,
            } => {
                let (first, last) = window.civil_dates_in(*zone);
                // An occurrence anchored late the previous day can still reach into the window.
                let mut day = first.pred_opt().unwrap_or(first);
                let season = match hijri_month {
                    Some(month) => Some(self.hijri_month_spans(rule, *month, day, last, &mut out)?),
                    None => None,
                };
                let location = Location::new(*zone, location.as_deref());
                while day <= last {
                    let in_season = season
                        .as_ref()
                        .map_or(true, |spans| spans.iter().any(|(from, to)| *from <= day && day < *to));
                    if in_season && runs_on(only_on, day.weekday()) {
                        if let Some(time) = self.anchor_time(rule, anchor, day, &location, &mut out)? {
                            if let Some(start) = resolve_local(*zone, day.and_time(time)) {
                                let start = start.with_timezone(&Utc);
                                let candidate = TimeWindow::new(
                                    start,
                                    start + Duration::minutes(*duration_mins as i64),
                                    *zone,
                                )?;
                                if candidate.overlaps(window) {
                                    push(candidate, &mut out);
                                }
                            }
                        }
                    }
                    day = match day.succ_opt() {
                        Some(next) => next,
                        None => break,
                    };
                }
            }
            Recurrence::YearlyFixed {
                month,
                day,
                days,
                zone,
            } => {
                let (first, last) = window.civil_dates_in(*zone);
                for year in (first.year() - 1)..=last.year() {
                    let Some(date) = NaiveDate::from_ymd_opt(year, *month, *day) else {
                        continue;
                    };
                    if let Some(candidate) = all_day(date, *days, *zone) {
                        if candidate.overlaps(window) {
                            push(candidate, &mut out);
                        }
                    }
                }
            }
            Recurrence::YearlyLunar {
                month,
                day,
                days,
                zone,
            } => {
                let (first, last) = window.civil_dates_in(*zone);
                let from = approx_hijri_year(first.year() - 1);
                let to = approx_hijri_year(last.year()) + 1;
                for hijri_year in from..=to {
                    let hijri = HijriDate::new(hijri_year, *month, *day);
                    if !may_touch(hijri, *days, first, last) {
                        continue;
                    }
                    let Some(date) = self.lunar_date(rule, hijri, &mut out)? else {
                        continue;
                    };
                    if let Some(candidate) = all_day(date, *days, *zone) {
                        if candidate.overlaps(window) {
                            push(candidate, &mut out);
                        }
                    }
                }
            }
            Recurrence::RangeOverride { start, end, zone } => {
                let bounds = TimeWindow::new(*start, *end, *zone)?;
                if let Some(clipped) = bounds.intersection(window) {
                    push(clipped, &mut out);
                }
            }
        }

        debug!(
            rule = %rule.id,
            instances = out.instances.len(),
            warnings = out.warnings.len(),
            "expanded rule"
        );
        Ok(out)
    }

    fn anchor_time(
        &self,
        rule: &RecurrenceRule,
        anchor: &DailyAnchor,
        day: NaiveDate,
        location: &Location,
        out: &mut Expansion,
    ) -> Result<Option<NaiveTime>> {
        let slot = match anchor {
            DailyAnchor::Fixed { time } => return Ok(Some(*time)),
            DailyAnchor::Provider { slot } => slot,
        };
        match self.prayer_time(day, location, slot) {
            Ok(time) => Ok(time),
            Err(ProviderError::Timeout) => {
                warn!(rule = %rule.id, %day, slot = %slot, "prayer-time lookup timed out, skipping day");
                out.warnings.push(Warning {
                    kind: WarningKind::ProviderTimeout,
                    rule_id: Some(rule.id.clone()),
                    message: format!("prayer time '{}' for {} unavailable (timeout); occurrence skipped", slot, day),
                });
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn prayer_time(
        &self,
        day: NaiveDate,
        location: &Location,
        slot: &str,
    ) -> std::result::Result<Option<NaiveTime>, ProviderError> {
        let key = (day, location.key().to_string(), slot.to_string());
        if let Some(hit) = self.prayer_memo.borrow().get(&key) {
            return hit.clone();
        }
        let answer = self.prayer.slot_time(day, location, slot);
        self.prayer_memo.borrow_mut().insert(key, answer.clone());
        answer
    }

    /// Resolves `hijri`, turning an unresolvable date into a warning.
    fn lunar_date(&self, rule: &RecurrenceRule, hijri: HijriDate, out: &mut Expansion) -> Result<Option<NaiveDate>> {
        match self.gregorian(hijri) {
            Ok(date) => Ok(Some(date)),
            Err(LunarError::Unresolvable(_)) => {
                warn!(rule = %rule.id, year = hijri.year, "lunar date unresolvable, skipping year");
                out.warnings.push(Warning {
                    kind: WarningKind::UnresolvableRecurrence,
                    rule_id: Some(rule.id.clone()),
                    message: format!(
                        "could not resolve {}/{} of hijri year {}; occurrence skipped",
                        hijri.day, hijri.month, hijri.year
                    ),
                });
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Gregorian `[first day, first day of next month)` spans of Hijri
    /// `month` for the years that can touch `first..=last`.
    fn hijri_month_spans(
        &self,
        rule: &RecurrenceRule,
        month: u32,
        first: NaiveDate,
        last: NaiveDate,
        out: &mut Expansion,
    ) -> Result<Vec<(NaiveDate, NaiveDate)>> {
        let mut spans = Vec::new();
        for year in approx_hijri_year(first.year() - 1)..=approx_hijri_year(last.year()) + 1 {
            let start = HijriDate::new(year, month, 1);
            if !may_touch(start, 30, first, last) {
                continue;
            }
            let next = if month == 12 {
                HijriDate::new(year + 1, 1, 1)
            } else {
                HijriDate::new(year, month + 1, 1)
            };
            let Some(from) = self.lunar_date(rule, start, out)? else {
                continue;
            };
            let Some(to) = self.lunar_date(rule, next, out)? else {
                continue;
            };
            spans.push((from, to));
        }
        Ok(spans)
    }

    fn gregorian(&self, date: HijriDate) -> std::result::Result<NaiveDate, LunarError> {
        if let Some(hit) = self.lunar_memo.borrow().get(&date) {
            return hit.clone();
        }
        let answer = self.lunar.to_gregorian(date);
        self.lunar_memo.borrow_mut().insert(date, answer.clone());
        answer
    }
}

fn runs_on(only_on: &[Weekday], weekday: Weekday) -> bool {
    only_on.is_empty() || only_on.contains(&weekday)
}

/// Whole civil days `[date, date + days)` in `zone`.
fn all_day(date: NaiveDate, days: u32, zone: Tz) -> Option<TimeWindow> {
    let end_date = date.checked_add_signed(Duration::days(days as i64))?;
    let start = resolve_local(zone, date.and_hms_opt(0, 0, 0)?)?;
    let end = resolve_local(zone, end_date.and_hms_opt(0, 0, 0)?)?;
    TimeWindow::new(start.with_timezone(&Utc), end.with_timezone(&Utc), zone).ok()
}

/// Whether an occurrence starting on `date` and lasting `days` could touch
/// `first..=last`, judged by the arithmetic calendar with a month of slack
/// either side. Sighting-based calendars never stray that far from it.
fn may_touch(date: HijriDate, days: u32, first: NaiveDate, last: NaiveDate) -> bool {
    let Ok(estimate) = TabularIslamicCalendar.to_gregorian(date) else {
        return true;
    };
    let slack = Duration::days(30);
    estimate - slack <= last && estimate + Duration::days(days as i64) + slack >= first
}

/// Hijri year in progress at the start of Gregorian `year` (within one year).
fn approx_hijri_year(year: i32) -> i32 {
    ((year - 622) * 33).div_euclid(32)
}
