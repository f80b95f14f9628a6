//! Hard caps protecting the in-memory stores from unbounded growth
//! and from nonsense timestamps.

use crate::model::Ms;

/// Earliest accepted instant: the unix epoch.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;

/// Latest accepted instant: 2100-01-01T00:00:00Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Slot length used when a create request omits the duration.
pub const DEFAULT_SLOT_DURATION_MINUTES: i64 = 60;

/// Longest slot a single create request may open.
pub const MAX_SLOT_DURATION_MINUTES: i64 = 24 * 60;

/// Longest service a reservation may declare.
pub const MAX_SERVICE_DURATION_MINUTES: i64 = 24 * 60;

pub const MAX_SLOTS_PER_RESOURCE: usize = 10_000;
pub const MAX_RESERVATIONS_PER_RESOURCE: usize = 10_000;

pub const MAX_NOTES_LEN: usize = 2_000;
pub const MAX_SERVICE_NAME_LEN: usize = 200;
