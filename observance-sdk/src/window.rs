//! Time windows and interval arithmetic.
//!
//! Every window carries UTC instants plus the IANA zone it was expressed in.
//! Comparisons only ever look at the instants, so two windows written in
//! different zones (or on either side of a daylight-saving shift) compare
//! correctly without any conversion at the call site.

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, FixedOffset, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A half-open interval `[start, end)` anchored to a zone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawWindow", into = "RawWindow")]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    zone: Tz,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct RawWindow {
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
    zone: String,
}

impl TryFrom<RawWindow> for TimeWindow {
    type Error = Error;

    fn try_from(raw: RawWindow) -> Result<Self> {
        let zone = parse_zone(&raw.zone)?;
        TimeWindow::new(raw.start.with_timezone(&Utc), raw.end.with_timezone(&Utc), zone)
    }
}

impl From<TimeWindow> for RawWindow {
    fn from(w: TimeWindow) -> Self {
        Self {
            start: w.local_start().fixed_offset(),
            end: w.local_end().fixed_offset(),
            zone: w.zone.name().to_string(),
        }
    }
}

/// Parses an IANA zone name such as `Asia/Dubai`.
pub fn parse_zone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| Error::InvalidWindow(format!("unrecognized zone '{}'", name)))
}

/// Maps a local wall-clock time to an instant. Ambiguous times (clocks going
/// back) take the earlier instant; times inside a gap move forward an hour.
pub fn resolve_local(zone: Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    match zone.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        LocalResult::None => zone.from_local_datetime(&(naive + Duration::hours(1))).earliest(),
    }
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, zone: Tz) -> Result<Self> {
        if start >= end {
            return Err(Error::InvalidWindow(format!(
                "start {} is not before end {}",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }
        Ok(Self { start, end, zone })
    }

    /// Builds a window from wall-clock times in `zone`.
    pub fn from_local(start: NaiveDateTime, end: NaiveDateTime, zone: Tz) -> Result<Self> {
        let s = resolve_local(zone, start)
            .ok_or_else(|| Error::InvalidWindow(format!("{} does not exist in {}", start, zone.name())))?;
        let e = resolve_local(zone, end)
            .ok_or_else(|| Error::InvalidWindow(format!("{} does not exist in {}", end, zone.name())))?;
        Self::new(s.with_timezone(&Utc), e.with_timezone(&Utc), zone)
    }

    /// Builds a window from RFC 3339 timestamps and a zone name.
    pub fn parse(start: &str, end: &str, zone: &str) -> Result<Self> {
        let zone = parse_zone(zone)?;
        let s = DateTime::parse_from_rfc3339(start)
            .map_err(|e| Error::InvalidWindow(format!("start '{}': {}", start, e)))?;
        let e = DateTime::parse_from_rfc3339(end)
            .map_err(|err| Error::InvalidWindow(format!("end '{}': {}", end, err)))?;
        Self::new(s.with_timezone(&Utc), e.with_timezone(&Utc), zone)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn zone(&self) -> Tz {
        self.zone
    }

    pub fn local_start(&self) -> DateTime<Tz> {
        self.start.with_timezone(&self.zone)
    }

    pub fn local_end(&self) -> DateTime<Tz> {
        self.end.with_timezone(&self.zone)
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Same instants, expressed in another zone.
    pub fn with_zone(&self, zone: Tz) -> Self {
        Self { zone, ..self.clone() }
    }

    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        overlaps(self, other)
    }

    pub fn contains_instant(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }

    /// Widens the window. Negative paddings are treated as zero.
    pub fn expand_with_buffer(&self, before: Duration, after: Duration) -> Self {
        expand_with_buffer(self, before, after)
    }

    /// Overlapping part of two windows, in this window's zone.
    pub fn intersection(&self, other: &TimeWindow) -> Option<Self> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then(|| Self { start, end, zone: self.zone })
    }

    /// Keeps the start and shortens the window to at most `max`.
    pub fn truncate_to(&self, max: Duration) -> Result<Self> {
        if self.duration() <= max {
            return Ok(self.clone());
        }
        Self::new(self.start, self.start + max, self.zone)
    }

    /// Civil dates in `zone` touched by this window (end exclusive).
    pub fn civil_dates_in(&self, zone: Tz) -> (NaiveDate, NaiveDate) {
        let first = self.start.with_timezone(&zone).date_naive();
        let last = (self.end - Duration::nanoseconds(1)).with_timezone(&zone).date_naive();
        (first, last)
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} .. {} ({})",
            self.local_start().format("%Y-%m-%d %H:%M"),
            self.local_end().format("%Y-%m-%d %H:%M"),
            self.zone.name()
        )
    }
}

/// Half-open overlap: windows that merely touch do not overlap.
pub fn overlaps(a: &TimeWindow, b: &TimeWindow) -> bool {
    a.start < b.end && b.start < a.end
}

pub fn expand_with_buffer(w: &TimeWindow, before: Duration, after: Duration) -> TimeWindow {
    let before = before.max(Duration::zero());
    let after = after.max(Duration::zero());
    TimeWindow {
        start: w.start - before,
        end: w.end + after,
        zone: w.zone,
    }
}

/// Sorted union of the given windows. Touching windows coalesce into one
/// period; each period keeps the zone of its earliest window.
pub fn merge(windows: &[TimeWindow]) -> Vec<TimeWindow> {
    let mut sorted: Vec<&TimeWindow> = windows.iter().collect();
    sorted.sort_by(|a, b| a.start.cmp(&b.start).then(a.end.cmp(&b.end)));

    let mut merged: Vec<TimeWindow> = Vec::with_capacity(sorted.len());
    for w in sorted {
        match merged.last_mut() {
            Some(last) if w.start <= last.end => {
                if w.end > last.end {
                    last.end = w.end;
                }
            }
            _ => merged.push(w.clone()),
        }
    }
    merged
}
