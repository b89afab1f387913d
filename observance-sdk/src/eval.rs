use crate::catalog::{AttendeeContext, Catalog, CatalogSnapshot};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::expand::{Expander, ObservanceInstance, Warning};
use crate::policy::{ObservanceCategory, PolicyOverrides, Severity};
use crate::provider::{LunarCalendarConverter, PrayerTimeProvider};
use crate::ramadan::{self, Adjustment};
use crate::window::TimeWindow;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Outcome {
    Allowed,
    AllowedWithWarning,
    AdjustedWindow { window: TimeWindow },
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictDecision {
    /// The window as proposed.
    pub window: TimeWindow,
    /// The window overlaps were computed against (trimmed when adjusted).
    pub evaluated_window: TimeWindow,
    pub conflicts: Vec<ObservanceInstance>,
    pub outcome: Outcome,
    pub warnings: Vec<Warning>,
    pub catalog_version: u64,
    pub catalog_fingerprint: String,
}

impl ConflictDecision {
    pub fn is_blocked(&self) -> bool {
        self.outcome == Outcome::Blocked
    }
}

/// Result of the Ramadan step, before any observance is looked at.
enum DurationCheck {
    Within,
    Trimmed(TimeWindow),
    Rejected,
}

pub struct ConflictEvaluator {
    prayer: Arc<dyn PrayerTimeProvider>,
    lunar: Arc<dyn LunarCalendarConverter>,
    allow_trimming: bool,
    overrides: PolicyOverrides,
}

impl ConflictEvaluator {
    pub fn new(prayer: Arc<dyn PrayerTimeProvider>, lunar: Arc<dyn LunarCalendarConverter>) -> Self {
        Self {
            prayer,
            lunar,
            allow_trimming: true,
            overrides: PolicyOverrides::new(),
        }
    }

    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.allow_trimming = config.evaluation.allow_trimming;
        self.overrides = config.policies.clone();
        self
    }

    pub fn allow_trimming(mut self, allow: bool) -> Self {
        self.allow_trimming = allow;
        self
    }

    pub fn with_overrides(mut self, overrides: PolicyOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// A fresh expander carrying this evaluator's providers and overrides.
    pub fn expander(&self) -> Expander<'_> {
        Expander::new(self.prayer.as_ref(), self.lunar.as_ref()).with_overrides(&self.overrides)
    }

    pub fn overrides(&self) -> &PolicyOverrides {
        &self.overrides
    }

    /// Evaluates against whatever snapshot the catalog currently holds.
    pub fn evaluate_current(
        &self,
        window: &TimeWindow,
        attendees: &AttendeeContext,
        catalog: &Catalog,
    ) -> Result<ConflictDecision> {
        let snapshot = catalog.snapshot()?;
        self.evaluate(window, attendees, &snapshot)
    }

    pub fn evaluate(
        &self,
        window: &TimeWindow,
        attendees: &AttendeeContext,
        snapshot: &CatalogSnapshot,
    ) -> Result<ConflictDecision> {
        let all: BTreeSet<ObservanceCategory> = ObservanceCategory::ALL.into_iter().collect();
        self.evaluate_in(window, attendees, &all, snapshot)
    }

    /// Like [`evaluate`](Self::evaluate), but only observances of the given
    /// categories are considered. Leaving out `RamadanPeriod` skips the
    /// duration limit as well.
    pub fn evaluate_in(
        &self,
        window: &TimeWindow,
        attendees: &AttendeeContext,
        categories: &BTreeSet<ObservanceCategory>,
        snapshot: &CatalogSnapshot,
    ) -> Result<ConflictDecision> {
        let expander = self.expander();

        let mut warnings = Vec::new();
        let duration = if categories.contains(&ObservanceCategory::RamadanPeriod) {
            let check = ramadan::adjust(window, snapshot, &expander)?;
            warnings = check.warnings;
            match check.adjustment {
                Adjustment::Unchanged(_) => DurationCheck::Within,
                Adjustment::Violation(_) if !self.allow_trimming => DurationCheck::Rejected,
                Adjustment::Violation(violation) => match violation.trim(window) {
                    Ok(trimmed) => {
                        warnings.extend(violation.preferred_hours_warning(&trimmed));
                        DurationCheck::Trimmed(trimmed)
                    }
                    // A zero-length limit leaves nothing to schedule.
                    Err(_) => DurationCheck::Rejected,
                },
            }
        } else {
            DurationCheck::Within
        };

        let evaluated = match &duration {
            DurationCheck::Trimmed(trimmed) => trimmed.clone(),
            _ => window.clone(),
        };

        let (before, after) = snapshot.max_buffers(Some(&self.overrides));
        let query = evaluated.expand_with_buffer(before, after);
        let expansion = snapshot.instances_in(categories, attendees, &query, &expander)?;
        warnings.extend(expansion.warnings);

        let mut conflicts: Vec<ObservanceInstance> = expansion
            .instances
            .into_iter()
            .filter(|i| i.buffered_window().overlaps(&evaluated))
            .collect();
        conflicts.sort_by(conflict_order);
        dedup_warnings(&mut warnings);

        let blocked = conflicts.iter().any(|i| i.policy.severity == Severity::Block);
        let warned = conflicts.iter().any(|i| i.policy.severity == Severity::Warn);

        let outcome = match duration {
            _ if blocked => Outcome::Blocked,
            DurationCheck::Rejected => Outcome::Blocked,
            DurationCheck::Trimmed(window) => Outcome::AdjustedWindow { window },
            DurationCheck::Within if warned => Outcome::AllowedWithWarning,
            DurationCheck::Within => Outcome::Allowed,
        };

        debug!(
            window = %window,
            outcome = ?outcome,
            conflicts = conflicts.len(),
            warnings = warnings.len(),
            catalog_version = snapshot.version(),
            "evaluated window"
        );

        Ok(ConflictDecision {
            window: window.clone(),
            evaluated_window: evaluated,
            conflicts,
            outcome,
            warnings,
            catalog_version: snapshot.version(),
            catalog_fingerprint: snapshot.fingerprint().to_string(),
        })
    }
}

/// Start ascending, then the more severe first, then rule id.
fn conflict_order(a: &ObservanceInstance, b: &ObservanceInstance) -> Ordering {
    a.window
        .start()
        .cmp(&b.window.start())
        .then_with(|| b.policy.severity.priority().cmp(&a.policy.severity.priority()))
        .then_with(|| a.source_rule_id.cmp(&b.source_rule_id))
        .then_with(|| a.window.end().cmp(&b.window.end()))
}

// The Ramadan step and the main expansion can report the same issue.
fn dedup_warnings(warnings: &mut Vec<Warning>) {
    let mut seen: Vec<Warning> = Vec::with_capacity(warnings.len());
    warnings.retain(|w| {
        if seen.contains(w) {
            false
        } else {
            seen.push(w.clone());
            true
        }
    });
}
