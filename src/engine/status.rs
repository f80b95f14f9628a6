//! Time-derived status. Stored status lags reality between writes; the
//! effective status projects it forward from the booked instant and the
//! declared service duration.

use crate::model::{Ms, Reservation, ReservationStatus};

/// Project a reservation's status at `now`.
///
/// - before the booked instant: the stored status, unchanged
/// - from the instant until the service ends: `InProgress`
/// - at or after `slot + service_duration`: `Completed`
///
/// Terminal statuses never reach this function for archived records;
/// archive entries are frozen at archival time.
pub fn effective_status(r: &Reservation, now: Ms) -> ReservationStatus {
    let service_end = r.slot + r.service_duration_minutes * 60_000;
    if now >= service_end {
        ReservationStatus::Completed
    } else if now >= r.slot {
        ReservationStatus::InProgress
    } else {
        r.status
    }
}
