use serde::{Deserialize, Serialize};
use serde_json::Map;
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as Ms
}

/// Lifecycle of a reservation. `Declined` and `Cancelled` are terminal:
/// setting either moves the record to the archive and frees its instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Pending,
    Approved,
    InProgress,
    Completed,
    Declined,
    Cancelled,
}

impl ReservationStatus {
    /// Statuses that move the record to the archive when written.
    pub fn archives(&self) -> bool {
        matches!(self, Self::Declined | Self::Cancelled)
    }

    /// Statuses that keep an instant unavailable for new bookings
    /// from the availability listing's point of view.
    pub fn holds_instant(&self) -> bool {
        matches!(self, Self::Pending | Self::Approved)
    }

    /// Statuses that block deleting the underlying slot.
    pub fn blocks_slot_delete(&self) -> bool {
        matches!(self, Self::Pending | Self::Approved | Self::InProgress)
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Declined => "DECLINED",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// An offered bookable window `[start, end)` on a resource's calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub start: Ms,
    pub end: Ms,
}

/// An active reservation. `slot` is the booked instant; the slot window
/// itself lives in the slot registry and may outlive the reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub client_id: Ulid,
    pub slot: Ms,
    pub status: ReservationStatus,
    pub notes: String,
    pub service_name: String,
    pub service_duration_minutes: i64,
}

/// Immutable copy of a reservation at the moment it was declined or cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveEntry {
    pub id: Ulid,
    pub reservation_id: Ulid,
    pub resource_id: Ulid,
    pub client_id: Ulid,
    pub slot: Ms,
    pub status: ReservationStatus,
    pub notes: String,
    pub service_name: String,
    pub service_duration_minutes: i64,
    pub archived_at: Ms,
}

impl ArchiveEntry {
    pub fn from_reservation(r: &Reservation, status: ReservationStatus, archived_at: Ms) -> Self {
        Self {
            id: Ulid::new(),
            reservation_id: r.id,
            resource_id: r.resource_id,
            client_id: r.client_id,
            slot: r.slot,
            status,
            notes: r.notes.clone(),
            service_name: r.service_name.clone(),
            service_duration_minutes: r.service_duration_minutes,
            archived_at,
        }
    }
}

/// Category of a published notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NoticeKind {
    SlotCreated,
    Booked,
    ReservationDecision,
    ReservationCompleted,
    UserSignup,
    RatingReview,
    ProfileUpdate,
}

/// A durable notification, also the payload pushed to live subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub id: Ulid,
    pub kind: NoticeKind,
    pub title: String,
    pub body: String,
    pub created_at: Ms,
    pub read: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<Ulid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<Ulid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, serde_json::Value>>,
}

/// The record types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogRecord {
    SlotCreated {
        slot: Slot,
    },
    SlotDeleted {
        id: Ulid,
        resource_id: Ulid,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationStatusSet {
        id: Ulid,
        resource_id: Ulid,
        status: ReservationStatus,
    },
    ReservationArchived {
        entry: ArchiveEntry,
    },
    ReservationDeleted {
        id: Ulid,
        resource_id: Ulid,
    },
    NoticePublished {
        notice: Notice,
    },
    NoticeReadSet {
        id: Ulid,
        read: bool,
    },
    NoticesAllRead,
}

/// Per-resource book: offered slots, active reservations, and the archive.
#[derive(Debug, Clone)]
pub struct ResourceBook {
    pub resource_id: Ulid,
    /// Offered slots, sorted by `start`.
    pub slots: Vec<Slot>,
    /// Active reservations, in creation order.
    pub reservations: Vec<Reservation>,
    /// Declined/cancelled reservations, in archival order.
    pub archive: Vec<ArchiveEntry>,
}

impl ResourceBook {
    pub fn new(resource_id: Ulid) -> Self {
        Self {
            resource_id,
            slots: Vec::new(),
            reservations: Vec::new(),
            archive: Vec::new(),
        }
    }

    /// Insert a slot maintaining sort order by start.
    pub fn insert_slot(&mut self, slot: Slot) {
        let pos = self
            .slots
            .binary_search_by_key(&slot.start, |s| s.start)
            .unwrap_or_else(|e| e);
        self.slots.insert(pos, slot);
    }

    pub fn remove_slot(&mut self, id: Ulid) -> Option<Slot> {
        let pos = self.slots.iter().position(|s| s.id == id)?;
        Some(self.slots.remove(pos))
    }

    pub fn slot_at(&self, start: Ms) -> Option<&Slot> {
        let idx = self.slots.partition_point(|s| s.start < start);
        self.slots.get(idx).filter(|s| s.start == start)
    }

    pub fn reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn reservation_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    /// The active reservation occupying `instant`, regardless of status.
    pub fn reservation_at(&self, instant: Ms) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.slot == instant)
    }
}
