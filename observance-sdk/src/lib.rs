//! Cultural scheduling conflict engine.
//!
//! Checks proposed meeting windows against prayer times, national and
//! nationality-specific holidays, and Ramadan working-hour limits, and
//! re-checks stored bookings when the underlying calendars change.

pub mod api;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod eval;
pub mod expand;
pub mod policy;
pub mod provider;
pub mod ramadan;
pub mod rule;
pub mod scan;
pub mod store;
pub mod window;

pub use catalog::{AttendeeContext, Catalog, CatalogSnapshot};
pub use engine::Engine;
pub use error::Error;
pub use eval::{ConflictDecision, ConflictEvaluator, Outcome};
pub use window::TimeWindow;
