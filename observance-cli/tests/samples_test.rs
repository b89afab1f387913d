use observance_sdk::catalog::AttendeeContext;
use observance_sdk::config::EngineConfig;
use observance_sdk::eval::Outcome;
use observance_sdk::policy::ObservanceCategory;
use observance_sdk::provider::{StaticPrayerTable, TabularIslamicCalendar};
use observance_sdk::store::{CatalogStore, FileCatalogStore};
use observance_sdk::window::TimeWindow;
use observance_sdk::Engine;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

fn sample(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("..").join(name)
}

fn engine() -> Engine {
    let config = EngineConfig::load(sample("config.sample.toml")).unwrap();
    let catalog = FileCatalogStore::new(sample("catalog.sample.toml"))
        .open_catalog()
        .unwrap();
    let table = StaticPrayerTable::load(sample("prayer-table.sample.toml")).unwrap();
    Engine::new(
        Arc::new(catalog),
        Arc::new(table),
        Arc::new(TabularIslamicCalendar),
        &config,
    )
}

fn dubai(start: &str, end: &str) -> TimeWindow {
    TimeWindow::parse(start, end, "Asia/Dubai").unwrap()
}

#[test]
fn test_sample_catalog_loads() {
    let rules = FileCatalogStore::new(sample("catalog.sample.toml")).load().unwrap();
    assert!(rules.iter().any(|r| r.id == "jummah"));
    assert!(rules.iter().any(|r| r.id == "ramadan"));
    assert!(rules.iter().any(|r| r.id == "iftar"));
}

#[test]
fn test_sample_config_loads() {
    let config = EngineConfig::load(sample("config.sample.toml")).unwrap();
    assert!(config.evaluation.allow_trimming);
    assert_eq!(config.providers.timeout_ms, 2000);
}

#[test]
fn test_morning_meeting_is_clear() {
    let engine = engine();
    let decision = engine
        .check(
            &dubai("2024-06-04T10:00:00+04:00", "2024-06-04T11:00:00+04:00"),
            &AttendeeContext::default(),
        )
        .unwrap();
    assert_eq!(decision.outcome, Outcome::Allowed);
    assert!(decision.conflicts.is_empty());
}

#[test]
fn test_friday_prayer_blocks() {
    let engine = engine();
    let decision = engine
        .check(
            &dubai("2024-06-07T11:00:00+04:00", "2024-06-07T11:45:00+04:00"),
            &AttendeeContext::default(),
        )
        .unwrap();
    assert_eq!(decision.outcome, Outcome::Blocked);
    assert!(decision.conflicts.iter().any(|c| c.source_rule_id == "jummah"));
}

#[test]
fn test_national_day_blocks() {
    let engine = engine();
    let decision = engine
        .check(
            &dubai("2024-12-03T10:00:00+04:00", "2024-12-03T11:00:00+04:00"),
            &AttendeeContext::default(),
        )
        .unwrap();
    assert_eq!(decision.outcome, Outcome::Blocked);
}

#[test]
fn test_long_ramadan_meeting_is_trimmed() {
    let engine = engine();
    let decision = engine
        .check(
            &dubai("2024-03-12T10:00:00+04:00", "2024-03-12T11:30:00+04:00"),
            &AttendeeContext::default(),
        )
        .unwrap();
    let expected = dubai("2024-03-12T10:00:00+04:00", "2024-03-12T10:45:00+04:00");
    assert_eq!(decision.outcome, Outcome::AdjustedWindow { window: expected });
}

#[test]
fn test_iftar_blocks_evenings_only_during_ramadan() {
    let engine = engine();
    let ramadan = engine
        .check(
            &dubai("2024-03-20T19:30:00+04:00", "2024-03-20T20:00:00+04:00"),
            &AttendeeContext::default(),
        )
        .unwrap();
    assert_eq!(ramadan.outcome, Outcome::Blocked);
    assert!(ramadan.conflicts.iter().any(|c| c.source_rule_id == "iftar"));

    let june = engine
        .check(
            &dubai("2024-06-04T19:30:00+04:00", "2024-06-04T20:00:00+04:00"),
            &AttendeeContext::default(),
        )
        .unwrap();
    assert_eq!(june.outcome, Outcome::Allowed);
}

#[test]
fn test_check_in_skips_unselected_categories() {
    let engine = engine();
    let window = dubai("2024-03-20T19:30:00+04:00", "2024-03-20T20:00:00+04:00");
    let holidays: BTreeSet<_> = [ObservanceCategory::NationalHoliday].into_iter().collect();
    let decision = engine
        .check_in(&window, &AttendeeContext::default(), &holidays)
        .unwrap();
    assert_eq!(decision.outcome, Outcome::Allowed);
    assert!(decision.conflicts.is_empty());
}

#[test]
fn test_diwali_warns_only_indian_attendees() {
    let engine = engine();
    let window = dubai("2024-11-01T10:00:00+04:00", "2024-11-01T11:00:00+04:00");

    let indian = engine
        .check(&window, &AttendeeContext::with_tags(["indian"]))
        .unwrap();
    assert_eq!(indian.outcome, Outcome::AllowedWithWarning);

    let others = engine
        .check(&window, &AttendeeContext::with_tags(["filipino"]))
        .unwrap();
    assert_eq!(others.outcome, Outcome::Allowed);
}

#[test]
fn test_sample_bookings_rescan() {
    use observance_sdk::api::{self, RescanRequest};
    use observance_sdk::scan::CancellationFlag;

    let body = std::fs::read_to_string(sample("bookings.sample.json")).unwrap();
    let request: RescanRequest = serde_json::from_str(&body).unwrap();
    let response = api::rescan(&engine(), request, &CancellationFlag::new()).unwrap();

    let ids: Vec<&str> = response.results.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, ["standup-fri", "diwali-review", "ramadan-planning"]);

    let outcomes: Vec<&Outcome> = response
        .results
        .iter()
        .map(|e| &e.decision().unwrap().outcome)
        .collect();
    assert_eq!(outcomes[0], &Outcome::Blocked);
    assert_eq!(outcomes[1], &Outcome::AllowedWithWarning);
    assert!(matches!(outcomes[2], Outcome::AdjustedWindow { .. }));
}
