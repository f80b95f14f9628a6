use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// Open a bookable window on a resource's calendar. The duration
    /// defaults to one hour when omitted or non-positive. At most one slot
    /// may start at any given instant per resource.
    pub async fn create_slot(
        &self,
        resource_id: Ulid,
        start: Ms,
        duration_minutes: Option<i64>,
    ) -> Result<Slot, EngineError> {
        if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&start) {
            return Err(EngineError::InvalidInput("slot start out of range"));
        }
        let duration = match duration_minutes {
            Some(d) if d > MAX_SLOT_DURATION_MINUTES => {
                return Err(EngineError::InvalidInput("slot duration too long"));
            }
            Some(d) if d > 0 => d,
            _ => DEFAULT_SLOT_DURATION_MINUTES,
        };

        let book = self.book(resource_id);
        let mut guard = book.write().await;
        if guard.slots.len() >= MAX_SLOTS_PER_RESOURCE {
            return Err(EngineError::InvalidInput("too many slots on resource"));
        }
        if guard.slot_at(start).is_some() {
            return Err(EngineError::SlotExists { resource_id, start });
        }

        let slot = Slot {
            id: Ulid::new(),
            resource_id,
            start,
            end: start + duration * 60_000,
        };
        let record = LogRecord::SlotCreated { slot: slot.clone() };
        self.persist_and_apply(&mut guard, &record).await?;
        drop(guard);

        let meta = serde_json::json!({
            "slotId": slot.id,
            "resourceId": resource_id,
            "start": start,
        });
        self.notify
            .publish(
                NoticeKind::SlotCreated,
                "New slot created",
                format!("Barber {resource_id} opened a slot at {start}"),
                Some(resource_id),
                Some(slot.id),
                meta.as_object().cloned(),
            )
            .await;

        Ok(slot)
    }

    /// Slots still open for booking: start strictly in the future and no
    /// pending or approved reservation sitting on the instant. Sorted by
    /// start time.
    pub async fn available_slots(&self, resource_id: Ulid, now: Ms) -> Vec<Slot> {
        let Some(book) = self.existing_book(resource_id) else {
            return Vec::new();
        };
        let guard = book.read().await;
        guard
            .slots
            .iter()
            .filter(|s| s.start > now)
            .filter(|s| {
                guard
                    .reservation_at(s.start)
                    .is_none_or(|r| !r.status.holds_instant())
            })
            .cloned()
            .collect()
    }

    /// Remove an offered slot. Refused while a pending, approved, or
    /// in-progress reservation sits on its instant; the conflicting status
    /// is reported so the caller can tell why.
    pub async fn delete_slot(&self, slot_id: Ulid) -> Result<Slot, EngineError> {
        let resource_id = self
            .slot_owner
            .get(&slot_id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(slot_id))?;
        let book = self.book(resource_id);
        let mut guard = book.write().await;
        let slot = guard
            .slots
            .iter()
            .find(|s| s.id == slot_id)
            .cloned()
            .ok_or(EngineError::NotFound(slot_id))?;

        if let Some(r) = guard.reservation_at(slot.start)
            && r.status.blocks_slot_delete()
        {
            return Err(EngineError::SlotOccupied { status: r.status });
        }

        let record = LogRecord::SlotDeleted {
            id: slot_id,
            resource_id,
        };
        self.persist_and_apply(&mut guard, &record).await?;
        Ok(slot)
    }
}
