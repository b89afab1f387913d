//! Request and response bodies for `check` and `rescan`, plus handlers that
//! map engine errors to HTTP-style status codes. Transport is left to the
//! embedding service.

use crate::catalog::AttendeeContext;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::eval::ConflictDecision;
use crate::policy::ObservanceCategory;
use crate::scan::{Booking, CancellationFlag, ScanEntry};
use crate::window::TimeWindow;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CheckRequest {
    pub window: TimeWindow,
    #[serde(default)]
    pub attendee_nationality_tags: BTreeSet<String>,
    #[serde(default)]
    pub is_organizer: bool,
    /// Observance categories to check; all of them when absent or empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<BTreeSet<ObservanceCategory>>,
}

impl CheckRequest {
    pub fn attendees(&self) -> AttendeeContext {
        AttendeeContext {
            nationality_tags: self.attendee_nationality_tags.clone(),
            is_organizer: self.is_organizer,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BookingRef {
    pub id: String,
    pub window: TimeWindow,
    #[serde(default)]
    pub attendee_nationality_tags: BTreeSet<String>,
}

impl From<BookingRef> for Booking {
    fn from(r: BookingRef) -> Self {
        Booking {
            id: r.id,
            window: r.window,
            attendees: AttendeeContext {
                nationality_tags: r.attendee_nationality_tags,
                is_organizer: false,
            },
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RescanRequest {
    pub booking_refs: Vec<BookingRef>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RescanResponse {
    pub results: Vec<ScanEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: serde_json::Value,
}

impl Response {
    fn ok<T: Serialize>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(body) => Self { status: 200, body },
            Err(e) => Self::error(&Error::Json(e)),
        }
    }

    fn error(e: &Error) -> Self {
        Self {
            status: e.status_code(),
            body: serde_json::json!({ "error": e.to_string() }),
        }
    }
}

pub fn check(engine: &Engine, request: &CheckRequest) -> Result<ConflictDecision> {
    match &request.categories {
        Some(categories) if !categories.is_empty() => {
            engine.check_in(&request.window, &request.attendees(), categories)
        }
        _ => engine.check(&request.window, &request.attendees()),
    }
}

pub fn rescan(engine: &Engine, request: RescanRequest, cancel: &CancellationFlag) -> Result<RescanResponse> {
    let bookings: Vec<Booking> = request.booking_refs.into_iter().map(Booking::from).collect();
    let results = engine.rescan(&bookings, cancel)?;
    Ok(RescanResponse { results })
}

/// `POST /schedule/check`: 200 with the decision, 400 for a bad window or
/// body, 503 before the catalog is loaded.
pub fn handle_check(engine: &Engine, body: &str) -> Response {
    let outcome = serde_json::from_str::<CheckRequest>(body)
        .map_err(Error::from)
        .and_then(|request| check(engine, &request));
    match outcome {
        Ok(decision) => Response::ok(&decision),
        Err(e) => Response::error(&e),
    }
}

/// `POST /schedule/rescan`: per-booking failures stay inside the 200 body.
pub fn handle_rescan(engine: &Engine, body: &str, cancel: &CancellationFlag) -> Response {
    let outcome = serde_json::from_str::<RescanRequest>(body)
        .map_err(Error::from)
        .and_then(|request| rescan(engine, request, cancel));
    match outcome {
        Ok(response) => Response::ok(&response),
        Err(e) => Response::error(&e),
    }
}
