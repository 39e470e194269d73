use std::sync::atomic::Ordering;

use tokio::sync::oneshot;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, validate_span};
use super::{Engine, EngineError, WalCommand};

fn check_len(value: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.len() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

impl Engine {
    // ── Catalog ──────────────────────────────────────────────

    /// Insert or replace a room in the catalog.
    pub async fn register_room(&self, room: Room) -> Result<(), EngineError> {
        if room.name.trim().is_empty() {
            return Err(EngineError::InvalidInput("room name must not be empty"));
        }
        check_len(&room.name, MAX_NAME_LEN, "room name too long")?;
        check_len(&room.location, MAX_NAME_LEN, "room location too long")?;
        check_len(&room.equipment, MAX_TEXT_LEN, "room equipment too long")?;
        check_len(&room.description, MAX_TEXT_LEN, "room description too long")?;
        if !self.rooms.contains_key(&room.id) && self.rooms.len() >= MAX_ROOMS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }

        let _gate = self.gate.read().await;
        let event = Event::RoomRegistered { room: room.clone() };
        self.wal_append(&event).await?;
        self.rooms.insert(room.id, room);
        Ok(())
    }

    /// Delete a room and, first, every booking that references it.
    /// Returns the number of bookings removed.
    pub async fn remove_room(&self, id: RoomId) -> Result<usize, EngineError> {
        let _gate = self.gate.read().await;
        // Hold the room lock across purge + removal so no create can slip in between.
        let mut guard = self.lock_live_room(id).await?;
        let purged = guard.bookings.len();
        if purged > 0 {
            let event = Event::RoomBookingsPurged { room_id: id };
            self.persist_and_apply(&mut guard, &event).await?;
        }
        self.wal_append(&Event::RoomRemoved { id }).await?;
        self.rooms.remove(&id);
        self.bookings.remove(&id);
        tracing::info!("room {id} removed, {purged} bookings purged");
        Ok(purged)
    }

    /// Insert or replace a user.
    pub async fn register_user(&self, user: User) -> Result<(), EngineError> {
        if user.username.trim().is_empty() {
            return Err(EngineError::InvalidInput("username must not be empty"));
        }
        if !user.email.contains('@') {
            return Err(EngineError::InvalidInput("email must contain '@'"));
        }
        check_len(&user.username, MAX_NAME_LEN, "username too long")?;
        check_len(&user.email, MAX_EMAIL_LEN, "email too long")?;
        if !self.users.contains_key(&user.id) && self.users.len() >= MAX_USERS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many users"));
        }

        let _gate = self.gate.read().await;
        let event = Event::UserRegistered { user: user.clone() };
        self.wal_append(&event).await?;
        self.users.insert(user.id, user);
        Ok(())
    }

    // ── Bookings ─────────────────────────────────────────────

    /// Atomically check the room's active bookings and insert a new pending one.
    pub async fn create_booking(
        &self,
        room_id: RoomId,
        user_id: UserId,
        start: Ms,
        end: Ms,
    ) -> Result<Booking, EngineError> {
        let span = validate_span(start, end)?;
        let _gate = self.gate.read().await;
        let mut guard = self.lock_live_room(room_id).await?;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings on room"));
        }

        if let Err(e) = check_no_conflict(&guard, &span, self.policy) {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let now = self.clock.now_ms();
        let booking = Booking {
            id: self.next_booking_id.fetch_add(1, Ordering::SeqCst),
            room_id,
            user_id,
            span,
            status: BookingStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL).increment(1);
        Ok(booking)
    }

    /// Move a booking to `target` if the lifecycle allows it.
    pub async fn transition(
        &self,
        id: BookingId,
        target: BookingStatus,
    ) -> Result<Booking, EngineError> {
        let _gate = self.gate.read().await;
        let (room_id, mut guard) = self.resolve_booking_write(id).await?;
        let current = guard
            .get(id)
            .ok_or(EngineError::BookingNotFound(id))?
            .status;
        if !current.can_transition_to(target) {
            return Err(EngineError::IllegalTransition {
                id,
                from: current,
                to: target,
            });
        }

        let event = Event::BookingStatusChanged {
            id,
            room_id,
            status: target,
            at: self.clock.now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        guard
            .get(id)
            .cloned()
            .ok_or(EngineError::BookingNotFound(id))
    }

    pub async fn approve(&self, id: BookingId) -> Result<Booking, EngineError> {
        self.transition(id, BookingStatus::Approved).await
    }

    pub async fn reject(&self, id: BookingId) -> Result<Booking, EngineError> {
        self.transition(id, BookingStatus::Rejected).await
    }

    pub async fn release(&self, id: BookingId) -> Result<Booking, EngineError> {
        self.transition(id, BookingStatus::Released).await
    }

    /// Cascade hook for room deletion: drop every booking of the room.
    pub async fn delete_bookings_for_room(&self, room_id: RoomId) -> Result<usize, EngineError> {
        let _gate = self.gate.read().await;
        let Some(rb) = self.existing_room_bookings(&room_id) else {
            return Ok(0);
        };
        let mut guard = rb.write().await;
        let purged = guard.bookings.len();
        if purged == 0 {
            return Ok(0);
        }
        let event = Event::RoomBookingsPurged { room_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(purged)
    }

    // ── Compaction ───────────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.gate.write().await;
        let mut events = vec![Event::SequenceAdvanced {
            next_booking_id: self.next_booking_id.load(Ordering::SeqCst),
        }];

        let mut users: Vec<User> = self.users.iter().map(|e| e.value().clone()).collect();
        users.sort_by_key(|u| u.id);
        events.extend(users.into_iter().map(|user| Event::UserRegistered { user }));

        let mut rooms: Vec<Room> = self.rooms.iter().map(|e| e.value().clone()).collect();
        rooms.sort_by_key(|r| r.id);
        events.extend(rooms.into_iter().map(|room| Event::RoomRegistered { room }));

        // Bookings carry their current status, so one record per booking suffices.
        let mut bookings = self.snapshot_bookings().await;
        bookings.retain(|b| self.rooms.contains_key(&b.room_id));
        events.extend(bookings.into_iter().map(|booking| Event::BookingCreated { booking }));

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
