use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use dashmap::DashMap;
use futures::Stream;
use serde_json::Map;
use tokio::sync::{RwLock, mpsc};
use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::{LogRecord, Notice, NoticeKind, now_ms};
use crate::wal::WalHandle;

/// Frames a subscriber can't keep up with are dropped along with the
/// subscriber itself, so the buffer stays small.
const SUBSCRIBER_BUFFER: usize = 64;

/// Reconnect delay hint sent with the handshake frame.
pub const RECONNECT_HINT: Duration = Duration::from_millis(3000);

/// One wire frame of the live stream. Transport-agnostic: the HTTP layer
/// turns it into an SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub event: &'static str,
    pub id: String,
    pub data: String,
    pub retry: Option<Duration>,
}

impl Frame {
    fn hello() -> Self {
        Self {
            event: "hello",
            id: Ulid::new().to_string(),
            data: "connected".into(),
            retry: Some(RECONNECT_HINT),
        }
    }

    fn notification(notice: &Notice) -> Option<Self> {
        match serde_json::to_string(notice) {
            Ok(data) => Some(Self {
                event: "notification",
                id: notice.id.to_string(),
                data,
                retry: None,
            }),
            Err(e) => {
                tracing::warn!("notice {} not serializable: {e}", notice.id);
                None
            }
        }
    }
}

/// Durable notice log plus live fan-out to connected subscribers.
///
/// Publication is layered: the WAL append and in-memory log are the
/// operation; the broadcast is best-effort. A slow or gone subscriber is
/// dropped, never waited on, and a full buffer ends the subscription.
pub struct NoticeBoard {
    /// All notices, in publication order.
    log: RwLock<Vec<Notice>>,
    subscribers: DashMap<Ulid, mpsc::Sender<Frame>>,
    wal: WalHandle,
}

impl NoticeBoard {
    pub fn new(wal: WalHandle) -> Self {
        Self {
            log: RwLock::new(Vec::new()),
            subscribers: DashMap::new(),
            wal,
        }
    }

    // ── Replay hooks — sole-owner context, no contention ─────────

    pub(crate) fn restore(&self, notice: Notice) {
        self.log
            .try_write()
            .expect("replay: uncontended write")
            .push(notice);
    }

    pub(crate) fn restore_read(&self, id: Ulid, read: bool) {
        let mut log = self.log.try_write().expect("replay: uncontended write");
        if let Some(n) = log.iter_mut().find(|n| n.id == id) {
            n.read = read;
        }
    }

    pub(crate) fn restore_all_read(&self) {
        let mut log = self.log.try_write().expect("replay: uncontended write");
        for n in log.iter_mut() {
            n.read = true;
        }
    }

    // ── Publication ──────────────────────────────────────────────

    /// Publish a notice: persist, log, broadcast. A WAL failure is logged
    /// and swallowed — a notice that outlives a restart is worth having,
    /// but never worth failing the booking that triggered it.
    pub async fn publish(
        &self,
        kind: NoticeKind,
        title: &str,
        body: String,
        actor_id: Option<Ulid>,
        target_id: Option<Ulid>,
        meta: Option<Map<String, serde_json::Value>>,
    ) -> Notice {
        let notice = Notice {
            id: Ulid::new(),
            kind,
            title: title.into(),
            body,
            created_at: now_ms(),
            read: false,
            actor_id,
            target_id,
            meta,
        };

        let record = LogRecord::NoticePublished {
            notice: notice.clone(),
        };
        if let Err(e) = self.wal.append(&record).await {
            tracing::warn!("notice {} not persisted: {e}", notice.id);
        }
        self.log.write().await.push(notice.clone());
        metrics::counter!(crate::observability::NOTICES_PUBLISHED_TOTAL).increment(1);

        self.broadcast(&notice);
        notice
    }

    fn broadcast(&self, notice: &Notice) {
        let Some(frame) = Frame::notification(notice) else {
            return;
        };
        // Snapshot first: removal during iteration would deadlock the shard.
        let targets: Vec<(Ulid, mpsc::Sender<Frame>)> = self
            .subscribers
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        for (id, tx) in targets {
            if tx.try_send(frame.clone()).is_err() {
                tracing::debug!("dropping subscriber {id}");
                self.unsubscribe(id);
            }
        }
    }

    // ── Queries and read flags ───────────────────────────────────

    /// All notices, newest first.
    pub async fn list_all(&self) -> Vec<Notice> {
        let log = self.log.read().await;
        log.iter().rev().cloned().collect()
    }

    /// Chronological snapshot, for WAL compaction.
    pub(crate) async fn snapshot(&self) -> Vec<Notice> {
        self.log.read().await.clone()
    }

    /// Set the read flag on one notice. `None` when the id is unknown.
    pub async fn set_read(&self, id: Ulid, read: bool) -> Result<Option<Notice>, EngineError> {
        if !self.log.read().await.iter().any(|n| n.id == id) {
            return Ok(None);
        }
        self.wal.append(&LogRecord::NoticeReadSet { id, read }).await?;
        let mut log = self.log.write().await;
        let Some(n) = log.iter_mut().find(|n| n.id == id) else {
            return Ok(None);
        };
        n.read = read;
        Ok(Some(n.clone()))
    }

    /// Mark every notice read.
    pub async fn mark_all_read(&self) -> Result<(), EngineError> {
        self.wal.append(&LogRecord::NoticesAllRead).await?;
        let mut log = self.log.write().await;
        for n in log.iter_mut() {
            n.read = true;
        }
        Ok(())
    }

    // ── Live subscriptions ───────────────────────────────────────

    /// Open a live stream. The first frame is always the `hello`
    /// handshake; only notices published after this call follow it.
    pub fn subscribe(self: Arc<Self>) -> Subscription {
        let id = Ulid::new();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        // Fresh channel, cannot be full.
        let _ = tx.try_send(Frame::hello());
        self.subscribers.insert(id, tx);
        metrics::gauge!(crate::observability::STREAM_SUBSCRIBERS).increment(1.0);
        Subscription {
            id,
            rx,
            board: self,
        }
    }

    fn unsubscribe(&self, id: Ulid) {
        if self.subscribers.remove(&id).is_some() {
            metrics::gauge!(crate::observability::STREAM_SUBSCRIBERS).decrement(1.0);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// A live subscriber's end of the stream. Dropping it deregisters the
/// subscriber, so an abandoned HTTP connection cleans itself up.
pub struct Subscription {
    id: Ulid,
    rx: mpsc::Receiver<Frame>,
    board: Arc<NoticeBoard>,
}

impl Stream for Subscription {
    type Item = Frame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Frame>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.board.unsubscribe(self.id);
    }
}
