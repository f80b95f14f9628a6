mod error;
mod reservations;
mod slots;
mod status;

pub use error::EngineError;
pub use reservations::BookingRequest;
pub use status::effective_status;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::directory::UserDirectory;
use crate::model::*;
use crate::notify::NoticeBoard;
use crate::wal::{Wal, WalHandle};

pub type SharedResourceBook = Arc<RwLock<ResourceBook>>;

/// The booking engine: per-resource books behind a DashMap, a shared
/// group-commit WAL writer, and the notice board for fan-out.
///
/// The per-resource write lock is the uniqueness guard: every check-then-
/// insert on a book happens under it, so two racing bookings for the same
/// instant serialize and exactly one wins.
pub struct Engine {
    pub books: DashMap<Ulid, SharedResourceBook>,
    pub(super) wal: WalHandle,
    pub notify: Arc<NoticeBoard>,
    /// Reverse lookup: slot id → resource id
    pub(super) slot_owner: DashMap<Ulid, Ulid>,
    /// Reverse lookup: reservation id → resource id
    pub(super) reservation_owner: DashMap<Ulid, Ulid>,
    directory: Arc<dyn UserDirectory>,
}

/// Apply a record directly to a ResourceBook (no locking — caller holds the lock).
fn apply_to_book(
    book: &mut ResourceBook,
    record: &LogRecord,
    slot_owner: &DashMap<Ulid, Ulid>,
    reservation_owner: &DashMap<Ulid, Ulid>,
) {
    match record {
        LogRecord::SlotCreated { slot } => {
            slot_owner.insert(slot.id, slot.resource_id);
            book.insert_slot(slot.clone());
        }
        LogRecord::SlotDeleted { id, .. } => {
            book.remove_slot(*id);
            slot_owner.remove(id);
        }
        LogRecord::ReservationCreated { reservation } => {
            reservation_owner.insert(reservation.id, reservation.resource_id);
            book.reservations.push(reservation.clone());
        }
        LogRecord::ReservationStatusSet { id, status, .. } => {
            if let Some(r) = book.reservation_mut(*id) {
                r.status = *status;
            }
        }
        LogRecord::ReservationArchived { entry } => {
            book.remove_reservation(entry.reservation_id);
            reservation_owner.remove(&entry.reservation_id);
            book.archive.push(entry.clone());
        }
        LogRecord::ReservationDeleted { id, .. } => {
            book.remove_reservation(*id);
            reservation_owner.remove(id);
        }
        // Notice records are applied by the NoticeBoard, not here
        LogRecord::NoticePublished { .. }
        | LogRecord::NoticeReadSet { .. }
        | LogRecord::NoticesAllRead => {}
    }
}

/// Extract the owning resource id from a book-level record.
fn record_resource_id(record: &LogRecord) -> Option<Ulid> {
    match record {
        LogRecord::SlotCreated { slot } => Some(slot.resource_id),
        LogRecord::SlotDeleted { resource_id, .. }
        | LogRecord::ReservationStatusSet { resource_id, .. }
        | LogRecord::ReservationDeleted { resource_id, .. } => Some(*resource_id),
        LogRecord::ReservationCreated { reservation } => Some(reservation.resource_id),
        LogRecord::ReservationArchived { entry } => Some(entry.resource_id),
        LogRecord::NoticePublished { .. }
        | LogRecord::NoticeReadSet { .. }
        | LogRecord::NoticesAllRead => None,
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, directory: Arc<dyn UserDirectory>) -> io::Result<Self> {
        let records = Wal::replay(&wal_path)?;
        let wal = WalHandle::spawn(Wal::open(&wal_path)?);
        let notify = Arc::new(NoticeBoard::new(wal.clone()));

        let engine = Self {
            books: DashMap::new(),
            wal,
            notify,
            slot_owner: DashMap::new(),
            reservation_owner: DashMap::new(),
            directory,
        };

        // Replay — we're the sole owner of these Arcs, so try_write always
        // succeeds instantly (no contention). Never use blocking_write here
        // because this runs inside an async context.
        for record in &records {
            match record {
                LogRecord::NoticePublished { notice } => {
                    engine.notify.restore(notice.clone());
                }
                LogRecord::NoticeReadSet { id, read } => {
                    engine.notify.restore_read(*id, *read);
                }
                LogRecord::NoticesAllRead => {
                    engine.notify.restore_all_read();
                }
                other => {
                    if let Some(resource_id) = record_resource_id(other) {
                        let book = engine.book(resource_id);
                        let mut guard =
                            book.try_write().expect("replay: uncontended write");
                        apply_to_book(
                            &mut guard,
                            other,
                            &engine.slot_owner,
                            &engine.reservation_owner,
                        );
                    }
                }
            }
        }

        Ok(engine)
    }

    pub fn directory(&self) -> &Arc<dyn UserDirectory> {
        &self.directory
    }

    /// Book for a resource, created lazily. Any ULID is a valid resource;
    /// resources are external identities, not rows we manage.
    pub(super) fn book(&self, resource_id: Ulid) -> SharedResourceBook {
        self.books
            .entry(resource_id)
            .or_insert_with(|| Arc::new(RwLock::new(ResourceBook::new(resource_id))))
            .clone()
    }

    /// Book for a resource if one already exists (read paths don't create).
    pub(super) fn existing_book(&self, resource_id: Ulid) -> Option<SharedResourceBook> {
        self.books.get(&resource_id).map(|e| e.value().clone())
    }

    /// WAL-append + apply in one call. The WAL write happens before the
    /// in-memory mutation so replay never sees state the log doesn't.
    pub(super) async fn persist_and_apply(
        &self,
        book: &mut ResourceBook,
        record: &LogRecord,
    ) -> Result<(), EngineError> {
        self.wal.append(record).await?;
        apply_to_book(book, record, &self.slot_owner, &self.reservation_owner);
        Ok(())
    }

    /// Promote stored statuses that time has overtaken, persisting each
    /// change. Called from read paths that list reservations, so a listing
    /// never shows a PENDING record whose instant is already in the past.
    pub(super) async fn promote_stale(
        &self,
        book: &mut ResourceBook,
        now: Ms,
    ) -> Result<(), EngineError> {
        let changed: Vec<(Ulid, ReservationStatus)> = book
            .reservations
            .iter()
            .filter_map(|r| {
                let effective = effective_status(r, now);
                (effective != r.status).then_some((r.id, effective))
            })
            .collect();
        for (id, status) in changed {
            let record = LogRecord::ReservationStatusSet {
                id,
                resource_id: book.resource_id,
                status,
            };
            self.persist_and_apply(book, &record).await?;
        }
        Ok(())
    }

    /// Compact the WAL by rewriting it with only the records needed to
    /// recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut records = Vec::new();

        let resource_ids: Vec<Ulid> = self.books.iter().map(|e| *e.key()).collect();
        for rid in resource_ids {
            let Some(book) = self.existing_book(rid) else { continue };
            let guard = book.read().await;
            for slot in &guard.slots {
                records.push(LogRecord::SlotCreated { slot: slot.clone() });
            }
            for r in &guard.reservations {
                records.push(LogRecord::ReservationCreated {
                    reservation: r.clone(),
                });
            }
            for entry in &guard.archive {
                records.push(LogRecord::ReservationArchived {
                    entry: entry.clone(),
                });
            }
        }

        // Replaying NoticePublished restores the read flag too, so the
        // snapshot needs no NoticeReadSet records.
        for notice in self.notify.snapshot().await {
            records.push(LogRecord::NoticePublished { notice });
        }

        self.wal.compact(records).await.map_err(EngineError::from)
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.wal.appends_since_compact().await
    }
}
