use ulid::Ulid;

use crate::model::{Ms, ReservationStatus};

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    SlotExists { resource_id: Ulid, start: Ms },
    SlotOccupied { status: ReservationStatus },
    SlotAlreadyBooked { resource_id: Ulid, slot: Ms },
    Banned(Ulid),
    InvalidInput(&'static str),
    WalError(String),
}

impl EngineError {
    /// Stable machine-readable code, exposed to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::SlotExists { .. } => "SLOT_EXISTS",
            EngineError::SlotOccupied { .. } => "SLOT_OCCUPIED",
            EngineError::SlotAlreadyBooked { .. } => "SLOT_ALREADY_BOOKED",
            EngineError::Banned(_) => "FORBIDDEN",
            EngineError::InvalidInput(_) => "INVALID_INPUT",
            EngineError::WalError(_) => "INTERNAL",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::SlotExists { resource_id, start } => {
                write!(f, "slot already exists on resource {resource_id} at {start}")
            }
            EngineError::SlotOccupied { status } => {
                write!(f, "cannot delete slot with an active reservation (status: {status})")
            }
            EngineError::SlotAlreadyBooked { resource_id, slot } => {
                write!(f, "time slot {slot} is already booked on resource {resource_id}")
            }
            EngineError::Banned(id) => {
                write!(f, "account {id} is banned and cannot make reservations")
            }
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::WalError(e.to_string())
    }
}
