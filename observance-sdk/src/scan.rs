//! Re-evaluation of stored bookings after catalog or provider data changes.
//!
//! Bookings never conflict with each other, only with observances, so every
//! booking is an independent unit of work. Results come back in input order
//! no matter which worker finished first.

use crate::catalog::{AttendeeContext, Catalog, CatalogSnapshot};
use crate::error::Result;
use crate::eval::{ConflictDecision, ConflictEvaluator, Outcome};
use crate::window::TimeWindow;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub id: String,
    pub window: TimeWindow,
    #[serde(default)]
    pub attendees: AttendeeContext,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ScanResult {
    Decided { decision: ConflictDecision },
    Failed { error: String, code: u16 },
    /// Not started because the scan was cancelled.
    Cancelled,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ScanEntry {
    pub id: String,
    pub result: ScanResult,
}

impl ScanEntry {
    pub fn decision(&self) -> Option<&ConflictDecision> {
        match &self.result {
            ScanResult::Decided { decision } => Some(decision),
            _ => None,
        }
    }
}

/// Cooperative stop signal shared between a scan and whoever wants it to end.
#[derive(Clone, Debug, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    pub allowed: usize,
    pub warned: usize,
    pub adjusted: usize,
    pub blocked: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl ScanSummary {
    pub fn of(entries: &[ScanEntry]) -> Self {
        let mut s = Self::default();
        for entry in entries {
            match &entry.result {
                ScanResult::Decided { decision } => match decision.outcome {
                    Outcome::Allowed => s.allowed += 1,
                    Outcome::AllowedWithWarning => s.warned += 1,
                    Outcome::AdjustedWindow { .. } => s.adjusted += 1,
                    Outcome::Blocked => s.blocked += 1,
                },
                ScanResult::Failed { .. } => s.failed += 1,
                ScanResult::Cancelled => s.cancelled += 1,
            }
        }
        s
    }
}

pub struct BatchScanner {
    evaluator: Arc<ConflictEvaluator>,
    workers: usize,
}

impl BatchScanner {
    pub fn new(evaluator: Arc<ConflictEvaluator>, workers: usize) -> Self {
        Self {
            evaluator,
            workers: workers.max(1),
        }
    }

    pub fn rescan_current(
        &self,
        bookings: &[Booking],
        catalog: &Catalog,
        cancel: &CancellationFlag,
    ) -> Result<Vec<ScanEntry>> {
        let snapshot = catalog.snapshot()?;
        Ok(self.rescan(bookings, &snapshot, cancel))
    }

    /// Evaluates every booking against `snapshot`. Once `cancel` is raised no
    /// new booking is started; those already running finish normally.
    pub fn rescan(
        &self,
        bookings: &[Booking],
        snapshot: &CatalogSnapshot,
        cancel: &CancellationFlag,
    ) -> Vec<ScanEntry> {
        let next = AtomicUsize::new(0);
        let slots: Vec<Mutex<Option<ScanResult>>> = bookings.iter().map(|_| Mutex::new(None)).collect();
        let workers = self.workers.min(bookings.len()).max(1);

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let i = next.fetch_add(1, Ordering::SeqCst);
                    let Some(booking) = bookings.get(i) else {
                        break;
                    };
                    let result = self.evaluate_one(booking, snapshot);
                    *slots[i].lock() = Some(result);
                });
            }
        });

        let entries: Vec<ScanEntry> = bookings
            .iter()
            .zip(slots)
            .map(|(booking, slot)| ScanEntry {
                id: booking.id.clone(),
                result: slot.into_inner().unwrap_or(ScanResult::Cancelled),
            })
            .collect();

        let summary = ScanSummary::of(&entries);
        info!(
            bookings = entries.len(),
            catalog_version = snapshot.version(),
            allowed = summary.allowed,
            warned = summary.warned,
            adjusted = summary.adjusted,
            blocked = summary.blocked,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "rescan finished"
        );
        entries
    }

    fn evaluate_one(&self, booking: &Booking, snapshot: &CatalogSnapshot) -> ScanResult {
        match self
            .evaluator
            .evaluate(&booking.window, &booking.attendees, snapshot)
        {
            Ok(decision) => ScanResult::Decided { decision },
            Err(e) => {
                warn!(booking = %booking.id, error = %e, "booking evaluation failed");
                ScanResult::Failed {
                    error: e.to_string(),
                    code: e.status_code(),
                }
            }
        }
    }
}
