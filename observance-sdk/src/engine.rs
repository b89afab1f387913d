use crate::catalog::{AttendeeContext, Catalog};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::eval::{ConflictDecision, ConflictEvaluator};
use crate::policy::ObservanceCategory;
use crate::provider::{LunarCalendarConverter, PrayerTimeProvider};
use crate::scan::{BatchScanner, Booking, CancellationFlag, ScanEntry};
use crate::window::TimeWindow;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Everything a scheduling front end needs: the catalog, an evaluator wired
/// to the providers, and a batch scanner sharing that evaluator.
pub struct Engine {
    catalog: Arc<Catalog>,
    evaluator: Arc<ConflictEvaluator>,
    scanner: BatchScanner,
}

impl Engine {
    pub fn new(
        catalog: Arc<Catalog>,
        prayer: Arc<dyn PrayerTimeProvider>,
        lunar: Arc<dyn LunarCalendarConverter>,
        config: &EngineConfig,
    ) -> Self {
        let evaluator = Arc::new(ConflictEvaluator::new(prayer, lunar).with_config(config));
        let scanner = BatchScanner::new(Arc::clone(&evaluator), config.batch.effective_workers());
        Self {
            catalog,
            evaluator,
            scanner,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn evaluator(&self) -> &ConflictEvaluator {
        &self.evaluator
    }

    pub fn check(&self, window: &TimeWindow, attendees: &AttendeeContext) -> Result<ConflictDecision> {
        self.evaluator.evaluate_current(window, attendees, &self.catalog)
    }

    /// Checks `window` against the chosen observance categories only.
    pub fn check_in(
        &self,
        window: &TimeWindow,
        attendees: &AttendeeContext,
        categories: &BTreeSet<ObservanceCategory>,
    ) -> Result<ConflictDecision> {
        let snapshot = self.catalog.snapshot()?;
        self.evaluator.evaluate_in(window, attendees, categories, &snapshot)
    }

    pub fn rescan(&self, bookings: &[Booking], cancel: &CancellationFlag) -> Result<Vec<ScanEntry>> {
        self.scanner.rescan_current(bookings, &self.catalog, cancel)
    }
}
