use chrono::NaiveTime;
use observance_sdk::catalog::{AttendeeContext, Catalog};
use observance_sdk::eval::{ConflictEvaluator, Outcome};
use observance_sdk::expand::WarningKind;
use observance_sdk::policy::{ObservanceCategory, Policy, Severity};
use observance_sdk::provider::{StaticPrayerTable, TabularIslamicCalendar};
use observance_sdk::rule::{DailyAnchor, Recurrence, RecurrenceRule};
use observance_sdk::window::{parse_zone, TimeWindow};
use observance_sdk::Error;
use std::collections::BTreeSet;
use std::sync::Arc;

fn dubai() -> chrono_tz::Tz {
    parse_zone("Asia/Dubai").unwrap()
}

fn window(start: &str, end: &str) -> TimeWindow {
    TimeWindow::parse(start, end, "Asia/Dubai").unwrap()
}

fn evaluator() -> ConflictEvaluator {
    ConflictEvaluator::new(
        Arc::new(StaticPrayerTable::uae_default()),
        Arc::new(TabularIslamicCalendar),
    )
}

fn prayer_at(id: &str, h: u32, m: u32) -> RecurrenceRule {
    RecurrenceRule::new(
        id,
        ObservanceCategory::PrayerWindow,
        Recurrence::Daily {
            anchor: DailyAnchor::Fixed {
                time: NaiveTime::from_hms_opt(h, m, 0).unwrap(),
            },
            duration_mins: 10,
            zone: dubai(),
            only_on: vec![],
            location: None,
            hijri_month: None,
        },
    )
    .with_policy(Policy::new(Severity::Block).with_buffers(15, 15))
}

fn ramadan_2024() -> RecurrenceRule {
    // 1 Ramadan 1445 through the end of 29 Ramadan, Dubai time.
    RecurrenceRule::new(
        "ramadan-1445",
        ObservanceCategory::RamadanPeriod,
        Recurrence::RangeOverride {
            start: "2024-03-10T20:00:00Z".parse().unwrap(),
            end: "2024-04-09T20:00:00Z".parse().unwrap(),
            zone: dubai(),
        },
    )
}

fn holiday(id: &str, month: u32, day: u32) -> RecurrenceRule {
    RecurrenceRule::new(
        id,
        ObservanceCategory::NationalHoliday,
        Recurrence::YearlyFixed {
            month,
            day,
            days: 1,
            zone: dubai(),
        },
    )
}

fn nationality_holiday(id: &str, tag: &str, month: u32, day: u32) -> RecurrenceRule {
    RecurrenceRule::new(
        id,
        ObservanceCategory::NationalityHoliday,
        Recurrence::YearlyFixed {
            month,
            day,
            days: 1,
            zone: dubai(),
        },
    )
    .with_nationality(tag)
}

#[test]
fn test_prayer_buffer_blocks_meeting_before_prayer() {
    let catalog = Catalog::with_rules(vec![prayer_at("dhuhr", 12, 15)]).unwrap();
    let snapshot = catalog.snapshot().unwrap();

    let meeting = window("2024-06-03T12:00:00+04:00", "2024-06-03T12:10:00+04:00");
    let decision = evaluator()
        .evaluate(&meeting, &AttendeeContext::default(), &snapshot)
        .unwrap();

    assert_eq!(decision.outcome, Outcome::Blocked);
    assert_eq!(decision.conflicts.len(), 1);
    assert_eq!(decision.conflicts[0].source_rule_id, "dhuhr");
    assert!(decision.warnings.is_empty());
}

#[test]
fn test_meeting_clear_of_buffers_is_allowed() {
    let catalog = Catalog::with_rules(vec![prayer_at("dhuhr", 12, 15)]).unwrap();
    let snapshot = catalog.snapshot().unwrap();

    // Buffered prayer window is [12:00, 12:40); this meeting ends as it opens.
    let meeting = window("2024-06-03T11:00:00+04:00", "2024-06-03T12:00:00+04:00");
    let decision = evaluator()
        .evaluate(&meeting, &AttendeeContext::default(), &snapshot)
        .unwrap();

    assert_eq!(decision.outcome, Outcome::Allowed);
    assert!(decision.conflicts.is_empty());
}

#[test]
fn test_other_nationality_holiday_is_ignored() {
    let catalog = Catalog::with_rules(vec![nationality_holiday("ph-independence", "PH", 6, 12)]).unwrap();
    let snapshot = catalog.snapshot().unwrap();

    let indian = AttendeeContext::with_tags(["IN"]);
    let categories: BTreeSet<ObservanceCategory> = ObservanceCategory::ALL.into_iter().collect();
    assert!(snapshot.rules_for(&categories, &indian.nationality_tags).is_empty());

    let meeting = window("2024-06-12T10:00:00+04:00", "2024-06-12T11:00:00+04:00");
    let decision = evaluator().evaluate(&meeting, &indian, &snapshot).unwrap();
    assert_eq!(decision.outcome, Outcome::Allowed);
    assert!(decision.conflicts.is_empty());

    let filipino = AttendeeContext::with_tags(["ph"]);
    let decision = evaluator().evaluate(&meeting, &filipino, &snapshot).unwrap();
    assert_eq!(decision.outcome, Outcome::AllowedWithWarning);
    assert_eq!(decision.conflicts.len(), 1);
}

#[test]
fn test_block_dominates_warnings() {
    let catalog = Catalog::with_rules(vec![
        holiday("uae-national-day", 12, 2),
        nationality_holiday("in-observance", "IN", 12, 2),
        nationality_holiday("pk-observance", "PK", 12, 2),
    ])
    .unwrap();
    let snapshot = catalog.snapshot().unwrap();
    let attendees = AttendeeContext::with_tags(["IN", "PK"]);

    let meeting = window("2024-12-02T09:00:00+04:00", "2024-12-02T10:00:00+04:00");
    let decision = evaluator().evaluate(&meeting, &attendees, &snapshot).unwrap();

    assert_eq!(decision.outcome, Outcome::Blocked);
    assert_eq!(decision.conflicts.len(), 3);
    // Same start: the blocking holiday sorts ahead of the warnings.
    assert_eq!(decision.conflicts[0].source_rule_id, "uae-national-day");
    assert_eq!(decision.conflicts[0].policy.severity, Severity::Block);
    assert_eq!(decision.conflicts[1].source_rule_id, "in-observance");
    assert_eq!(decision.conflicts[2].source_rule_id, "pk-observance");
}

#[test]
fn test_conflicts_ordered_by_start() {
    let catalog = Catalog::with_rules(vec![
        prayer_at("asr", 15, 30),
        prayer_at("dhuhr", 12, 15),
        nationality_holiday("in-observance", "IN", 6, 3),
    ])
    .unwrap();
    let snapshot = catalog.snapshot().unwrap();
    let meeting = window("2024-06-03T11:00:00+04:00", "2024-06-03T16:00:00+04:00");
    let decision = evaluator()
        .evaluate(&meeting, &AttendeeContext::with_tags(["IN"]), &snapshot)
        .unwrap();

    let ids: Vec<&str> = decision.conflicts.iter().map(|c| c.source_rule_id.as_str()).collect();
    assert_eq!(ids, vec!["in-observance", "dhuhr", "asr"]);
}

#[test]
fn test_evaluation_is_idempotent() {
    let catalog = Catalog::with_rules(vec![
        prayer_at("dhuhr", 12, 15),
        prayer_at("asr", 15, 30),
        holiday("uae-national-day", 12, 2),
        nationality_holiday("in-observance", "IN", 6, 3),
        ramadan_2024(),
    ])
    .unwrap();
    let snapshot = catalog.snapshot().unwrap();
    let attendees = AttendeeContext::with_tags(["IN"]);
    let meeting = window("2024-06-03T11:00:00+04:00", "2024-06-03T16:00:00+04:00");

    let ev = evaluator();
    let first = ev.evaluate(&meeting, &attendees, &snapshot).unwrap();
    let second = ev.evaluate(&meeting, &attendees, &snapshot).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[test]
fn test_ramadan_trims_long_meeting() {
    let catalog = Catalog::with_rules(vec![ramadan_2024()]).unwrap();
    let snapshot = catalog.snapshot().unwrap();
    let meeting = window("2024-03-20T10:00:00+04:00", "2024-03-20T11:30:00+04:00");

    let decision = evaluator()
        .evaluate(&meeting, &AttendeeContext::default(), &snapshot)
        .unwrap();

    let expected = window("2024-03-20T10:00:00+04:00", "2024-03-20T10:45:00+04:00");
    assert_eq!(decision.outcome, Outcome::AdjustedWindow { window: expected.clone() });
    assert_eq!(decision.evaluated_window, expected);
    assert_eq!(decision.window, meeting);
    assert!(decision.warnings.is_empty());
}

#[test]
fn test_ramadan_blocks_when_trimming_disabled() {
    let catalog = Catalog::with_rules(vec![ramadan_2024()]).unwrap();
    let snapshot = catalog.snapshot().unwrap();
    let meeting = window("2024-03-20T10:00:00+04:00", "2024-03-20T11:30:00+04:00");

    let decision = evaluator()
        .allow_trimming(false)
        .evaluate(&meeting, &AttendeeContext::default(), &snapshot)
        .unwrap();
    assert_eq!(decision.outcome, Outcome::Blocked);
}

#[test]
fn test_short_ramadan_meeting_is_allowed() {
    let catalog = Catalog::with_rules(vec![ramadan_2024()]).unwrap();
    let snapshot = catalog.snapshot().unwrap();
    let meeting = window("2024-03-20T10:00:00+04:00", "2024-03-20T10:30:00+04:00");

    let decision = evaluator()
        .evaluate(&meeting, &AttendeeContext::default(), &snapshot)
        .unwrap();
    assert_eq!(decision.outcome, Outcome::Allowed);
    assert_eq!(decision.conflicts.len(), 1);
    assert_eq!(decision.conflicts[0].policy.severity, Severity::AdjustDuration);
    assert!(decision.warnings.is_empty());
}

#[test]
fn test_short_ramadan_meeting_outside_preferred_hours_warned() {
    let catalog = Catalog::with_rules(vec![ramadan_2024()]).unwrap();
    let snapshot = catalog.snapshot().unwrap();
    // Fits the limit, but sits in the pre-iftar evening.
    let meeting = window("2024-03-20T18:00:00+04:00", "2024-03-20T18:30:00+04:00");

    let decision = evaluator()
        .evaluate(&meeting, &AttendeeContext::default(), &snapshot)
        .unwrap();
    assert_eq!(decision.outcome, Outcome::Allowed);
    assert_eq!(decision.evaluated_window, meeting);
    assert_eq!(decision.warnings.len(), 1);
    assert_eq!(decision.warnings[0].kind, WarningKind::OutsidePreferredHours);
    assert_eq!(decision.warnings[0].rule_id.as_deref(), Some("ramadan-1445"));
}

#[test]
fn test_ramadan_hours_read_in_period_zone_not_query_zone() {
    let catalog = Catalog::with_rules(vec![ramadan_2024()]).unwrap();
    let snapshot = catalog.snapshot().unwrap();
    let ev = evaluator();

    let mut decisions = Vec::new();
    for zone in ["Asia/Dubai", "UTC", "America/New_York"] {
        let meeting = TimeWindow::parse("2024-03-20T10:00:00+04:00", "2024-03-20T11:30:00+04:00", zone).unwrap();
        decisions.push(ev.evaluate(&meeting, &AttendeeContext::default(), &snapshot).unwrap());
    }

    for decision in &decisions {
        match &decision.outcome {
            Outcome::AdjustedWindow { window } => {
                assert_eq!(window.start(), decisions[0].evaluated_window.start());
                assert_eq!(window.end(), decisions[0].evaluated_window.end());
            }
            other => panic!("expected an adjusted window, got {:?}", other),
        }
        assert!(decision.warnings.is_empty(), "warnings: {:?}", decision.warnings);
        assert_eq!(decision.conflicts[0].window.zone(), dubai());
    }
}

#[test]
fn test_evaluation_limited_to_categories() {
    let catalog = Catalog::with_rules(vec![ramadan_2024(), prayer_at("dhuhr", 12, 15)]).unwrap();
    let snapshot = catalog.snapshot().unwrap();
    let meeting = window("2024-03-20T11:30:00+04:00", "2024-03-20T13:00:00+04:00");
    let ev = evaluator();

    let no_prayers: BTreeSet<ObservanceCategory> = [ObservanceCategory::RamadanPeriod].into_iter().collect();
    let decision = ev
        .evaluate_in(&meeting, &AttendeeContext::default(), &no_prayers, &snapshot)
        .unwrap();
    assert!(matches!(decision.outcome, Outcome::AdjustedWindow { .. }));
    assert!(decision.conflicts.iter().all(|c| c.source_rule_id != "dhuhr"));

    let prayers_only: BTreeSet<ObservanceCategory> = [ObservanceCategory::PrayerWindow].into_iter().collect();
    let decision = ev
        .evaluate_in(&meeting, &AttendeeContext::default(), &prayers_only, &snapshot)
        .unwrap();
    assert_eq!(decision.outcome, Outcome::Blocked);
    assert_eq!(decision.evaluated_window, meeting);
    assert!(decision.conflicts.iter().all(|c| c.category == ObservanceCategory::PrayerWindow));
}

#[test]
fn test_ramadan_boundary_applies_limit_to_whole_window() {
    let catalog = Catalog::with_rules(vec![ramadan_2024()]).unwrap();
    let snapshot = catalog.snapshot().unwrap();
    // Starts on the last evening of the period and runs past midnight.
    let meeting = window("2024-04-09T23:30:00+04:00", "2024-04-10T01:00:00+04:00");

    let decision = evaluator()
        .evaluate(&meeting, &AttendeeContext::default(), &snapshot)
        .unwrap();

    let expected = window("2024-04-09T23:30:00+04:00", "2024-04-10T00:15:00+04:00");
    assert_eq!(decision.outcome, Outcome::AdjustedWindow { window: expected });
    assert!(decision
        .warnings
        .iter()
        .any(|w| w.kind == WarningKind::OutsidePreferredHours));
}

#[test]
fn test_strictest_ramadan_limit_wins() {
    let stricter = RecurrenceRule::new(
        "ramadan-last-ten",
        ObservanceCategory::RamadanPeriod,
        Recurrence::RangeOverride {
            start: "2024-03-30T20:00:00Z".parse().unwrap(),
            end: "2024-04-09T20:00:00Z".parse().unwrap(),
            zone: dubai(),
        },
    )
    .with_policy(Policy::new(Severity::AdjustDuration).with_max_duration(30));
    let catalog = Catalog::with_rules(vec![ramadan_2024(), stricter]).unwrap();
    let snapshot = catalog.snapshot().unwrap();
    let meeting = window("2024-04-02T10:00:00+04:00", "2024-04-02T11:30:00+04:00");

    let decision = evaluator()
        .evaluate(&meeting, &AttendeeContext::default(), &snapshot)
        .unwrap();
    let expected = window("2024-04-02T10:00:00+04:00", "2024-04-02T10:30:00+04:00");
    assert_eq!(decision.outcome, Outcome::AdjustedWindow { window: expected });
}

#[test]
fn test_trimmed_window_still_blocked_by_prayer() {
    let catalog = Catalog::with_rules(vec![ramadan_2024(), prayer_at("dhuhr", 12, 15)]).unwrap();
    let snapshot = catalog.snapshot().unwrap();
    let meeting = window("2024-03-20T11:30:00+04:00", "2024-03-20T13:00:00+04:00");

    let decision = evaluator()
        .evaluate(&meeting, &AttendeeContext::default(), &snapshot)
        .unwrap();
    assert_eq!(decision.outcome, Outcome::Blocked);
    assert!(decision.conflicts.iter().any(|c| c.source_rule_id == "dhuhr"));
}

#[test]
fn test_trim_avoids_prayer_after_limit() {
    let catalog = Catalog::with_rules(vec![ramadan_2024(), prayer_at("dhuhr", 12, 15)]).unwrap();
    let snapshot = catalog.snapshot().unwrap();
    // Untrimmed this would run into the dhuhr buffer; trimmed it ends at 10:45.
    let meeting = window("2024-03-20T10:00:00+04:00", "2024-03-20T12:30:00+04:00");

    let decision = evaluator()
        .evaluate(&meeting, &AttendeeContext::default(), &snapshot)
        .unwrap();
    assert!(matches!(decision.outcome, Outcome::AdjustedWindow { .. }));
    assert!(decision.conflicts.iter().all(|c| c.source_rule_id != "dhuhr"));
}

#[test]
fn test_unpublished_catalog_is_unavailable() {
    let catalog = Catalog::new();
    let meeting = window("2024-06-03T10:00:00+04:00", "2024-06-03T11:00:00+04:00");
    let res = evaluator().evaluate_current(&meeting, &AttendeeContext::default(), &catalog);
    match res {
        Err(e @ Error::CatalogUnavailable) => assert_eq!(e.status_code(), 503),
        other => panic!("expected CatalogUnavailable, got {:?}", other),
    }
}

#[test]
fn test_decision_stamped_with_snapshot() {
    let catalog = Catalog::with_rules(vec![prayer_at("dhuhr", 12, 15)]).unwrap();
    let meeting = window("2024-06-03T10:00:00+04:00", "2024-06-03T11:00:00+04:00");
    let ev = evaluator();

    let before = ev.evaluate_current(&meeting, &AttendeeContext::default(), &catalog).unwrap();
    catalog.upsert(prayer_at("asr", 15, 30)).unwrap();
    let after = ev.evaluate_current(&meeting, &AttendeeContext::default(), &catalog).unwrap();

    assert_eq!(before.catalog_version, 1);
    assert_eq!(after.catalog_version, 2);
    assert_ne!(before.catalog_fingerprint, after.catalog_fingerprint);
    assert_eq!(before.catalog_fingerprint.len(), 64);
}
