mod conflict;
mod error;
mod mutations;
mod queries;
#[cfg(test)]
mod tests;

pub use conflict::OverlapPolicy;
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};

use crate::clock::Clock;
use crate::model::*;
use crate::wal::Wal;

pub type SharedRoomBookings = Arc<RwLock<RoomBookings>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain every Append already queued behind it.
/// 3. One flush_sync for the whole batch, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
    tracing::debug!("WAL writer for {} stopped", wal.path().display());
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush of {} events failed: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even on append error so a half-buffered batch never leaks into the next one.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// Booking store: room/user catalog plus per-room booking lists, rebuilt from the WAL.
///
/// Every room has its own `RwLock`. Writers hold it across conflict check,
/// WAL append and in-memory apply, which makes check-then-insert atomic per room
/// while leaving different rooms fully parallel.
pub struct Engine {
    pub(super) rooms: DashMap<RoomId, Room>,
    pub(super) users: DashMap<UserId, User>,
    pub(super) bookings: DashMap<RoomId, SharedRoomBookings>,
    /// Reverse lookup: booking id → room id.
    pub(super) booking_to_room: DashMap<BookingId, RoomId>,
    pub(super) next_booking_id: AtomicU64,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) policy: OverlapPolicy,
    /// Mutations hold this shared, before any room lock; compaction holds it exclusively.
    pub(super) gate: RwLock<()>,
}

/// Apply a booking event to one room's list (caller holds the lock).
fn apply_to_room(rb: &mut RoomBookings, event: &Event, index: &DashMap<BookingId, RoomId>) {
    match event {
        Event::BookingCreated { booking } => {
            index.insert(booking.id, booking.room_id);
            rb.insert_booking(booking.clone());
        }
        Event::BookingStatusChanged { id, status, at, .. } => {
            if let Some(b) = rb.get_mut(*id) {
                b.status = *status;
                b.updated_at = *at;
            }
        }
        Event::RoomBookingsPurged { .. } => {
            for b in rb.bookings.drain(..) {
                index.remove(&b.id);
            }
        }
        // Catalog and sequence events are handled at the map level.
        Event::RoomRegistered { .. }
        | Event::RoomRemoved { .. }
        | Event::UserRegistered { .. }
        | Event::SequenceAdvanced { .. } => {}
    }
}

/// Room whose booking list an event touches, if any.
fn event_room_id(event: &Event) -> Option<RoomId> {
    match event {
        Event::BookingCreated { booking } => Some(booking.room_id),
        Event::BookingStatusChanged { room_id, .. } | Event::RoomBookingsPurged { room_id } => {
            Some(*room_id)
        }
        Event::RoomRegistered { .. }
        | Event::RoomRemoved { .. }
        | Event::UserRegistered { .. }
        | Event::SequenceAdvanced { .. } => None,
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, clock: Arc<dyn Clock>, policy: OverlapPolicy) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            users: DashMap::new(),
            bookings: DashMap::new(),
            booking_to_room: DashMap::new(),
            next_booking_id: AtomicU64::new(1),
            wal_tx,
            clock,
            policy,
            gate: RwLock::new(()),
        };

        // We're the sole owner of these locks during replay, so try_write always succeeds.
        // Never use blocking_write here: this may run inside an async context.
        let mut next_id: BookingId = 1;
        for event in &events {
            match event {
                Event::RoomRegistered { room } => {
                    engine.rooms.insert(room.id, room.clone());
                }
                Event::RoomRemoved { id } => {
                    engine.rooms.remove(id);
                    engine.bookings.remove(id);
                }
                Event::UserRegistered { user } => {
                    engine.users.insert(user.id, user.clone());
                }
                Event::SequenceAdvanced { next_booking_id } => {
                    next_id = next_id.max(*next_booking_id);
                }
                other => {
                    if let Event::BookingCreated { booking } = other {
                        next_id = next_id.max(booking.id + 1);
                    }
                    if let Some(room_id) = event_room_id(other) {
                        let rb = engine.room_bookings(room_id);
                        let Ok(mut guard) = rb.try_write() else {
                            return Err(io::Error::other("replay: room lock contended"));
                        };
                        apply_to_room(&mut guard, other, &engine.booking_to_room);
                    }
                }
            }
        }
        engine.next_booking_id.store(next_id, Ordering::SeqCst);

        if !events.is_empty() {
            tracing::info!(
                "replayed {} events from {}: {} rooms, {} users, {} bookings",
                events.len(),
                wal_path.display(),
                engine.rooms.len(),
                engine.users.len(),
                engine.booking_to_room.len()
            );
        }
        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Get or lazily create the booking list for a room.
    pub(super) fn room_bookings(&self, room_id: RoomId) -> SharedRoomBookings {
        self.bookings
            .entry(room_id)
            .or_insert_with(|| Arc::new(RwLock::new(RoomBookings::new(room_id))))
            .value()
            .clone()
    }

    pub(super) fn existing_room_bookings(&self, room_id: &RoomId) -> Option<SharedRoomBookings> {
        self.bookings.get(room_id).map(|e| e.value().clone())
    }

    pub fn room_for_booking(&self, id: &BookingId) -> Option<RoomId> {
        self.booking_to_room.get(id).map(|e| *e.value())
    }

    /// WAL-append then apply, under the caller's room lock.
    pub(super) async fn persist_and_apply(
        &self,
        rb: &mut RoomBookings,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_room(rb, event, &self.booking_to_room);
        Ok(())
    }

    /// Write-lock the live booking list of a registered room.
    ///
    /// `remove_room` detaches the list while holding its lock, so a waiter
    /// that wakes up on a detached list starts over with the current one.
    pub(super) async fn lock_live_room(
        &self,
        room_id: RoomId,
    ) -> Result<OwnedRwLockWriteGuard<RoomBookings>, EngineError> {
        loop {
            if !self.rooms.contains_key(&room_id) {
                return Err(EngineError::RoomNotFound(room_id));
            }
            let rb = self.room_bookings(room_id);
            let guard = rb.clone().write_owned().await;
            let live = self
                .existing_room_bookings(&room_id)
                .is_some_and(|current| Arc::ptr_eq(&current, &rb));
            if !live {
                continue;
            }
            if self.rooms.contains_key(&room_id) {
                return Ok(guard);
            }
            // The room went away before our entry was created; drop the empty list.
            self.bookings.remove_if(&room_id, |_, current| Arc::ptr_eq(current, &rb));
            return Err(EngineError::RoomNotFound(room_id));
        }
    }

    /// Lookup booking → room, acquire that room's write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        id: BookingId,
    ) -> Result<(RoomId, OwnedRwLockWriteGuard<RoomBookings>), EngineError> {
        let room_id = self
            .room_for_booking(&id)
            .ok_or(EngineError::BookingNotFound(id))?;
        let rb = self
            .existing_room_bookings(&room_id)
            .ok_or(EngineError::BookingNotFound(id))?;
        let guard = rb.write_owned().await;
        Ok((room_id, guard))
    }
}
