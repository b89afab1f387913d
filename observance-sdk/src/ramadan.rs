use crate::catalog::{AttendeeContext, CatalogSnapshot};
use crate::error::Result;
use crate::expand::{Expander, ObservanceInstance, Warning, WarningKind};
use crate::policy::{ObservanceCategory, PreferredHours};
use crate::window::TimeWindow;
use chrono::Duration;
use chrono_tz::Tz;
use std::collections::BTreeSet;
use tracing::debug;

/// The window is longer than an active Ramadan period allows.
#[derive(Clone, Debug, PartialEq)]
pub struct PolicyViolation {
    pub max_duration: Duration,
    pub rule_id: String,
    pub preferred_hours: Option<PreferredHours>,
    /// Zone the preferred hours are expressed in.
    pub zone: Tz,
}

impl PolicyViolation {
    /// The window cut down to the allowed length, keeping its start.
    pub fn trim(&self, window: &TimeWindow) -> Result<TimeWindow> {
        window.truncate_to(self.max_duration)
    }

    /// A warning when `window` leaves the preferred hours or crosses a
    /// local midnight.
    pub fn preferred_hours_warning(&self, window: &TimeWindow) -> Option<Warning> {
        let hours = self.preferred_hours?;
        outside_hours_warning(&self.rule_id, hours, self.zone, window)
    }
}

// Hours are read in the period's own zone, never the caller's.
fn within_hours(hours: PreferredHours, zone: Tz, window: &TimeWindow) -> bool {
    let start = window.start().with_timezone(&zone);
    let end = window.end().with_timezone(&zone);
    start.date_naive() == end.date_naive() && hours.contains_range(start.time(), end.time())
}

fn outside_hours_warning(rule_id: &str, hours: PreferredHours, zone: Tz, window: &TimeWindow) -> Option<Warning> {
    if within_hours(hours, zone, window) {
        return None;
    }
    Some(Warning {
        kind: WarningKind::OutsidePreferredHours,
        rule_id: Some(rule_id.to_string()),
        message: format!(
            "window {} falls outside Ramadan preferred hours {}-{} ({})",
            window,
            hours.start.format("%H:%M"),
            hours.end.format("%H:%M"),
            zone.name()
        ),
    })
}

#[derive(Clone, Debug, PartialEq)]
pub enum Adjustment {
    Unchanged(TimeWindow),
    Violation(PolicyViolation),
}

#[derive(Debug)]
pub struct RamadanCheck {
    pub adjustment: Adjustment,
    pub warnings: Vec<Warning>,
}

/// Applies Ramadan duration limits. A window touching any Ramadan period is
/// held to that period's limit for its whole length, including windows that
/// start inside a period and end after it; with several periods in play the
/// shortest limit applies. A window that fits is still checked against the
/// period's preferred hours and picks up an `OutsidePreferredHours` warning
/// when it falls outside them; an over-long window is left for the caller to
/// check once trimmed.
pub fn adjust(window: &TimeWindow, snapshot: &CatalogSnapshot, expander: &Expander<'_>) -> Result<RamadanCheck> {
    let categories: BTreeSet<ObservanceCategory> = [ObservanceCategory::RamadanPeriod].into_iter().collect();
    let expansion = snapshot.instances_in(&categories, &AttendeeContext::default(), window, expander)?;
    let mut warnings = expansion.warnings;

    let mut active: Vec<&ObservanceInstance> = expansion
        .instances
        .iter()
        .filter(|i| i.window.overlaps(window))
        .collect();
    active.sort_by(|a, b| a.source_rule_id.cmp(&b.source_rule_id));

    let strictest = active
        .iter()
        .filter_map(|i| i.policy.max_duration().map(|max| (max, *i)))
        .min_by(|(a, ia), (b, ib)| a.cmp(b).then_with(|| ia.source_rule_id.cmp(&ib.source_rule_id)));

    let adjustment = match strictest {
        Some((max, instance)) if window.duration() > max => {
            debug!(
                rule = %instance.source_rule_id,
                max_mins = max.num_minutes(),
                requested_mins = window.duration().num_minutes(),
                "window exceeds Ramadan duration limit"
            );
            Adjustment::Violation(PolicyViolation {
                max_duration: max,
                rule_id: instance.source_rule_id.clone(),
                preferred_hours: instance.policy.preferred_hours,
                zone: instance.window.zone(),
            })
        }
        _ => {
            // The period whose limit governs also supplies the hours.
            let governing = strictest
                .map(|(_, i)| i)
                .into_iter()
                .chain(active.iter().copied())
                .find_map(|i| i.policy.preferred_hours.map(|hours| (i, hours)));
            if let Some((instance, hours)) = governing {
                warnings.extend(outside_hours_warning(
                    &instance.source_rule_id,
                    hours,
                    instance.window.zone(),
                    window,
                ));
            }
            Adjustment::Unchanged(window.clone())
        }
    };

    Ok(RamadanCheck { adjustment, warnings })
}
