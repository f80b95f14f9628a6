use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

/// Everything needed to book an instant on a resource.
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub resource_id: Ulid,
    pub client_id: Ulid,
    pub slot: Ms,
    pub notes: String,
    pub service_name: String,
    pub service_duration_minutes: i64,
}

impl Engine {
    /// Book an instant for a client. The stored status is always `Pending`
    /// regardless of what the caller asks for; approval is the resource
    /// owner's move. Exactly one active reservation may occupy an instant,
    /// whatever its status.
    pub async fn create_reservation(
        &self,
        req: BookingRequest,
    ) -> Result<Reservation, EngineError> {
        if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&req.slot) {
            return Err(EngineError::InvalidInput("slot instant out of range"));
        }
        if req.service_duration_minutes <= 0 {
            return Err(EngineError::InvalidInput("service duration must be positive"));
        }
        if req.service_duration_minutes > MAX_SERVICE_DURATION_MINUTES {
            return Err(EngineError::InvalidInput("service duration too long"));
        }
        if req.notes.len() > MAX_NOTES_LEN {
            return Err(EngineError::InvalidInput("notes too long"));
        }
        if req.service_name.len() > MAX_SERVICE_NAME_LEN {
            return Err(EngineError::InvalidInput("service name too long"));
        }
        if self.directory().is_banned(req.client_id).await {
            return Err(EngineError::Banned(req.client_id));
        }

        let book = self.book(req.resource_id);
        let mut guard = book.write().await;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_RESOURCE {
            return Err(EngineError::InvalidInput("too many reservations on resource"));
        }
        if guard.reservation_at(req.slot).is_some() {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::SlotAlreadyBooked {
                resource_id: req.resource_id,
                slot: req.slot,
            });
        }

        let reservation = Reservation {
            id: Ulid::new(),
            resource_id: req.resource_id,
            client_id: req.client_id,
            slot: req.slot,
            status: ReservationStatus::Pending,
            notes: req.notes,
            service_name: req.service_name,
            service_duration_minutes: req.service_duration_minutes,
        };
        let record = LogRecord::ReservationCreated {
            reservation: reservation.clone(),
        };
        self.persist_and_apply(&mut guard, &record).await?;
        drop(guard);

        metrics::counter!(crate::observability::BOOKINGS_TOTAL).increment(1);

        let meta = serde_json::json!({
            "reservationId": reservation.id,
            "resourceId": reservation.resource_id,
            "clientId": reservation.client_id,
            "slot": reservation.slot,
        });
        self.notify
            .publish(
                NoticeKind::Booked,
                "New reservation booked",
                format!(
                    "Client {} booked {} with barber {}",
                    reservation.client_id, reservation.service_name, reservation.resource_id
                ),
                Some(reservation.client_id),
                Some(reservation.id),
                meta.as_object().cloned(),
            )
            .await;

        Ok(reservation)
    }

    /// Write a status. `Declined` and `Cancelled` move the record to the
    /// archive and free its instant for rebooking; every other status is
    /// written in place. Any transition between non-archiving statuses is
    /// accepted, including backwards ones.
    pub async fn update_status(
        &self,
        id: Ulid,
        status: ReservationStatus,
    ) -> Result<Reservation, EngineError> {
        let resource_id = self
            .reservation_owner
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(id))?;
        let book = self.book(resource_id);
        let mut guard = book.write().await;
        let mut reservation = guard
            .reservation(id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;

        if status.archives() {
            let entry = ArchiveEntry::from_reservation(&reservation, status, now_ms());
            let record = LogRecord::ReservationArchived { entry };
            self.persist_and_apply(&mut guard, &record).await?;
        } else {
            let record = LogRecord::ReservationStatusSet {
                id,
                resource_id,
                status,
            };
            self.persist_and_apply(&mut guard, &record).await?;
        }
        drop(guard);
        reservation.status = status;

        self.publish_decision(&reservation).await;
        Ok(reservation)
    }

    /// Hard delete without archiving. Administrative cleanup; frees the
    /// instant and leaves no trace in history.
    pub async fn delete_reservation(&self, id: Ulid) -> Result<(), EngineError> {
        let resource_id = self
            .reservation_owner
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(id))?;
        let book = self.book(resource_id);
        let mut guard = book.write().await;
        if guard.reservation(id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        let record = LogRecord::ReservationDeleted { id, resource_id };
        self.persist_and_apply(&mut guard, &record).await
    }

    /// All of a client's active reservations across every resource, with
    /// stale statuses promoted first.
    pub async fn reservations_for_client(
        &self,
        client_id: Ulid,
        now: Ms,
    ) -> Result<Vec<Reservation>, EngineError> {
        let books: Vec<_> = self.books.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for book in books {
            let mut guard = book.write().await;
            if !guard.reservations.iter().any(|r| r.client_id == client_id) {
                continue;
            }
            self.promote_stale(&mut guard, now).await?;
            out.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| r.client_id == client_id)
                    .cloned(),
            );
        }
        out.sort_by_key(|r| r.slot);
        Ok(out)
    }

    /// All active reservations on a resource, with stale statuses promoted.
    pub async fn reservations_for_resource(
        &self,
        resource_id: Ulid,
        now: Ms,
    ) -> Result<Vec<Reservation>, EngineError> {
        let Some(book) = self.existing_book(resource_id) else {
            return Ok(Vec::new());
        };
        let mut guard = book.write().await;
        self.promote_stale(&mut guard, now).await?;
        Ok(guard.reservations.clone())
    }

    /// Reservations awaiting a decision. No promotion pass: a pending
    /// record whose instant already passed still needs the owner's answer.
    pub async fn pending_for_resource(&self, resource_id: Ulid) -> Vec<Reservation> {
        let Some(book) = self.existing_book(resource_id) else {
            return Vec::new();
        };
        let guard = book.read().await;
        guard
            .reservations
            .iter()
            .filter(|r| r.status == ReservationStatus::Pending)
            .cloned()
            .collect()
    }

    /// Full history for a resource: active records (statuses promoted)
    /// followed by the archive.
    pub async fn history_for_resource(
        &self,
        resource_id: Ulid,
        now: Ms,
    ) -> Result<(Vec<Reservation>, Vec<ArchiveEntry>), EngineError> {
        let Some(book) = self.existing_book(resource_id) else {
            return Ok((Vec::new(), Vec::new()));
        };
        let mut guard = book.write().await;
        self.promote_stale(&mut guard, now).await?;
        Ok((guard.reservations.clone(), guard.archive.clone()))
    }

    async fn publish_decision(&self, reservation: &Reservation) {
        let (kind, title, verb) = match reservation.status {
            ReservationStatus::Approved => {
                (NoticeKind::ReservationDecision, "Reservation approved", "approved")
            }
            ReservationStatus::Declined => {
                (NoticeKind::ReservationDecision, "Reservation declined", "declined")
            }
            ReservationStatus::Cancelled => {
                (NoticeKind::ReservationDecision, "Reservation cancelled", "cancelled")
            }
            ReservationStatus::Completed => (
                NoticeKind::ReservationCompleted,
                "Reservation completed",
                "marked completed",
            ),
            // Pending/InProgress writes are bookkeeping, not decisions
            ReservationStatus::Pending | ReservationStatus::InProgress => return,
        };
        let meta = serde_json::json!({
            "reservationId": reservation.id,
            "resourceId": reservation.resource_id,
            "clientId": reservation.client_id,
            "status": reservation.status,
        });
        self.notify
            .publish(
                kind,
                title,
                format!("Reservation {} was {verb}.", reservation.id),
                Some(reservation.resource_id),
                Some(reservation.id),
                meta.as_object().cloned(),
            )
            .await;
    }
}
