//! Injected data sources: the per-day prayer-time table and the Islamic to
//! Gregorian date converter. Both are synchronous by contract; anything that
//! talks to the network should be wrapped in [`DeadlineProvider`].

use crate::error::{Error, Result};
use chrono::{Duration, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use chrono_tz::Tz;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::mpsc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("prayer-time lookup timed out")]
    Timeout,

    #[error("prayer-time lookup failed: {0}")]
    Failed(String),
}

/// Where a prayer time is looked up. Emirates share one IANA zone, so a
/// named location can narrow the lookup further than the zone does.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Location {
    pub zone: Tz,
    pub name: Option<String>,
}

impl Location {
    pub fn new(zone: Tz, name: Option<&str>) -> Self {
        Self {
            zone,
            name: name.map(str::to_string),
        }
    }

    /// The location name when given, otherwise the zone's IANA name.
    pub fn key(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.zone.name())
    }
}

pub trait PrayerTimeProvider: Send + Sync {
    /// Local start time of `slot` on `date` at `location`; `None` when the
    /// table has no such slot that day.
    fn slot_time(
        &self,
        date: NaiveDate,
        location: &Location,
        slot: &str,
    ) -> std::result::Result<Option<NaiveTime>, ProviderError>;
}

/// One location's timetable: default times per slot plus per-date corrections.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PrayerSchedule {
    #[serde(default)]
    pub times: BTreeMap<String, NaiveTime>,
    #[serde(default)]
    pub overrides: BTreeMap<NaiveDate, BTreeMap<String, NaiveTime>>,
}

impl PrayerSchedule {
    pub fn from_times<'a>(times: impl IntoIterator<Item = (&'a str, u32, u32)>) -> Self {
        let times = times
            .into_iter()
            .filter_map(|(slot, h, m)| NaiveTime::from_hms_opt(h, m, 0).map(|t| (slot.to_string(), t)))
            .collect();
        Self {
            times,
            overrides: BTreeMap::new(),
        }
    }

    pub fn with_override(mut self, date: NaiveDate, slot: impl Into<String>, time: NaiveTime) -> Self {
        self.overrides.entry(date).or_default().insert(slot.into(), time);
        self
    }

    fn lookup(&self, date: NaiveDate, slot: &str) -> Option<NaiveTime> {
        lookup(&self.times, &self.overrides, date, slot)
    }
}

fn lookup(
    times: &BTreeMap<String, NaiveTime>,
    overrides: &BTreeMap<NaiveDate, BTreeMap<String, NaiveTime>>,
    date: NaiveDate,
    slot: &str,
) -> Option<NaiveTime> {
    let corrected = overrides.get(&date).and_then(|day| day.get(slot));
    corrected.or_else(|| times.get(slot)).copied()
}

/// Fixed prayer timetable. `locations` holds per-location schedules keyed by
/// [`Location::key`]; the top-level `times` and `overrides` serve everything
/// else.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct StaticPrayerTable {
    #[serde(default)]
    pub times: BTreeMap<String, NaiveTime>,
    #[serde(default)]
    pub overrides: BTreeMap<NaiveDate, BTreeMap<String, NaiveTime>>,
    #[serde(default)]
    pub locations: BTreeMap<String, PrayerSchedule>,
}

impl StaticPrayerTable {
    /// Reference timetable: Dubai as the fallback, Abu Dhabi a few minutes
    /// later.
    pub fn uae_default() -> Self {
        let dubai = PrayerSchedule::from_times([
            ("fajr", 5, 15),
            ("sunrise", 6, 35),
            ("dhuhr", 12, 15),
            ("asr", 15, 30),
            ("maghrib", 18, 45),
            ("isha", 20, 0),
        ]);
        let abu_dhabi = PrayerSchedule::from_times([
            ("fajr", 5, 19),
            ("sunrise", 6, 39),
            ("dhuhr", 12, 19),
            ("asr", 15, 34),
            ("maghrib", 18, 49),
            ("isha", 20, 4),
        ]);
        Self {
            times: dubai.times,
            overrides: BTreeMap::new(),
            locations: BTreeMap::new(),
        }
        .with_location("abu_dhabi", abu_dhabi)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Correction to the top-level schedule.
    pub fn with_override(mut self, date: NaiveDate, slot: impl Into<String>, time: NaiveTime) -> Self {
        self.overrides.entry(date).or_default().insert(slot.into(), time);
        self
    }

    pub fn with_location(mut self, key: impl Into<String>, schedule: PrayerSchedule) -> Self {
        self.locations.insert(key.into(), schedule);
        self
    }
}

impl PrayerTimeProvider for StaticPrayerTable {
    fn slot_time(
        &self,
        date: NaiveDate,
        location: &Location,
        slot: &str,
    ) -> std::result::Result<Option<NaiveTime>, ProviderError> {
        match self.locations.get(location.key()) {
            Some(schedule) => Ok(schedule.lookup(date, slot)),
            None => Ok(lookup(&self.times, &self.overrides, date, slot)),
        }
    }
}

struct Lookup {
    date: NaiveDate,
    location: Location,
    slot: String,
    reply: mpsc::Sender<std::result::Result<Option<NaiveTime>, ProviderError>>,
}

/// Bounds every lookup of the wrapped provider by a deadline. Lookups are
/// served one at a time by a single worker thread that lives as long as the
/// wrapper. A lookup that does not answer in time reports
/// [`ProviderError::Timeout`]; while the worker is stuck on it, queued
/// lookups time out as well.
pub struct DeadlineProvider {
    requests: Mutex<mpsc::Sender<Lookup>>,
    timeout: std::time::Duration,
}

impl DeadlineProvider {
    pub fn new<P: PrayerTimeProvider + 'static>(inner: P, timeout: std::time::Duration) -> Self {
        let (tx, rx) = mpsc::channel::<Lookup>();
        std::thread::spawn(move || {
            // Ends once the wrapper, and with it the sender, is dropped.
            for lookup in rx {
                let answer = inner.slot_time(lookup.date, &lookup.location, &lookup.slot);
                let _ = lookup.reply.send(answer);
            }
        });
        Self {
            requests: Mutex::new(tx),
            timeout,
        }
    }
}

impl PrayerTimeProvider for DeadlineProvider {
    fn slot_time(
        &self,
        date: NaiveDate,
        location: &Location,
        slot: &str,
    ) -> std::result::Result<Option<NaiveTime>, ProviderError> {
        let (reply, answer) = mpsc::channel();
        let lookup = Lookup {
            date,
            location: location.clone(),
            slot: slot.to_string(),
            reply,
        };
        if self.requests.lock().send(lookup).is_err() {
            return Err(ProviderError::Failed("provider worker is gone".into()));
        }
        match answer.recv_timeout(self.timeout) {
            Ok(answer) => answer,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(ProviderError::Timeout),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(ProviderError::Failed("provider worker exited without answering".into()))
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HijriDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl HijriDate {
    pub fn new(year: i32, month: u32, day: u32) -> Self {
        Self { year, month, day }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LunarError {
    #[error("hijri date {0:?} cannot be resolved")]
    Unresolvable(HijriDate),

    #[error("lunar conversion failed: {0}")]
    Failed(String),
}

pub trait LunarCalendarConverter: Send + Sync {
    fn to_gregorian(&self, date: HijriDate) -> std::result::Result<NaiveDate, LunarError>;
}

/// Arithmetic Islamic calendar (30-year cycle, leap years 2, 5, 7, 10, 13,
/// 16, 18, 21, 24, 26 and 29). Close to, but not the same as, sighting-based
/// calendars; use [`LunarTable`] where announced dates matter.
#[derive(Clone, Copy, Debug, Default)]
pub struct TabularIslamicCalendar;

const ISLAMIC_EPOCH_JDN: i64 = 1_948_439;
// Julian day number of 0000-12-31 in the proleptic Gregorian calendar.
const CE_OFFSET_JDN: i64 = 1_721_425;

impl TabularIslamicCalendar {
    pub fn is_leap_year(year: i32) -> bool {
        (11 * year as i64 + 14).rem_euclid(30) < 11
    }

    pub fn month_length(year: i32, month: u32) -> u32 {
        if month % 2 == 1 || (month == 12 && Self::is_leap_year(year)) {
            30
        } else {
            29
        }
    }
}

impl LunarCalendarConverter for TabularIslamicCalendar {
    fn to_gregorian(&self, date: HijriDate) -> std::result::Result<NaiveDate, LunarError> {
        if date.year < 1
            || !(1..=12).contains(&date.month)
            || date.day < 1
            || date.day > Self::month_length(date.year, date.month)
        {
            return Err(LunarError::Unresolvable(date));
        }
        let y = date.year as i64;
        let m = date.month as i64;
        let jdn = date.day as i64
            + (59 * (m - 1) + 1) / 2
            + 354 * (y - 1)
            + (3 + 11 * y) / 30
            + ISLAMIC_EPOCH_JDN;
        i32::try_from(jdn - CE_OFFSET_JDN)
            .ok()
            .and_then(NaiveDate::from_num_days_from_ce_opt)
            .ok_or(LunarError::Unresolvable(date))
    }
}

/// Announced month starts, keyed by (hijri year, month). Anything not in the
/// table is unresolvable.
#[derive(Clone, Debug, Default)]
pub struct LunarTable {
    month_starts: HashMap<(i32, u32), NaiveDate>,
}

impl LunarTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_month_start(mut self, year: i32, month: u32, first_day: NaiveDate) -> Self {
        self.month_starts.insert((year, month), first_day);
        self
    }
}

impl LunarCalendarConverter for LunarTable {
    fn to_gregorian(&self, date: HijriDate) -> std::result::Result<NaiveDate, LunarError> {
        self.month_starts
            .get(&(date.year, date.month))
            .map(|first| *first + Duration::days(date.day as i64 - 1))
            .ok_or(LunarError::Unresolvable(date))
    }
}

impl From<ProviderError> for Error {
    fn from(e: ProviderError) -> Self {
        Error::Provider(e.to_string())
    }
}

impl From<LunarError> for Error {
    fn from(e: LunarError) -> Self {
        Error::Provider(e.to_string())
    }
}
