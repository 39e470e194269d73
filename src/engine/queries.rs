use crate::model::*;

use super::conflict::{find_conflict, validate_span};
use super::{Engine, EngineError};

impl Engine {
    /// Read-only conflict probe: would `[start, end)` on `room_id` collide with
    /// an active booking under the configured policy?
    pub async fn conflicts(&self, room_id: RoomId, start: Ms, end: Ms) -> Result<bool, EngineError> {
        let span = validate_span(start, end)?;
        let Some(rb) = self.existing_room_bookings(&room_id) else {
            return Ok(false);
        };
        let guard = rb.read().await;
        Ok(find_conflict(&guard, &span, self.policy).is_some())
    }

    pub async fn get_booking(&self, id: BookingId) -> Option<Booking> {
        let room_id = self.room_for_booking(&id)?;
        let rb = self.existing_room_bookings(&room_id)?;
        let guard = rb.read().await;
        guard.get(id).cloned()
    }

    /// Bookings of one room in start-time order.
    pub async fn bookings_for_room(&self, room_id: RoomId) -> Vec<Booking> {
        match self.existing_room_bookings(&room_id) {
            Some(rb) => rb.read().await.bookings.clone(),
            None => Vec::new(),
        }
    }

    /// Every booking across all rooms, ordered by id (which is creation order).
    pub async fn snapshot_bookings(&self) -> Vec<Booking> {
        let rooms: Vec<_> = self.bookings.iter().map(|e| e.value().clone()).collect();
        let mut all = Vec::with_capacity(self.booking_to_room.len());
        for rb in rooms {
            let guard = rb.read().await;
            all.extend(guard.bookings.iter().cloned());
        }
        all.sort_by_key(|b| b.id);
        all
    }

    pub fn booking_count(&self) -> usize {
        self.booking_to_room.len()
    }

    pub fn get_room(&self, id: RoomId) -> Option<Room> {
        self.rooms.get(&id).map(|e| e.value().clone())
    }

    pub fn get_user(&self, id: UserId) -> Option<User> {
        self.users.get(&id).map(|e| e.value().clone())
    }

    pub fn list_rooms(&self) -> Vec<Room> {
        let mut rooms: Vec<Room> = self.rooms.iter().map(|e| e.value().clone()).collect();
        rooms.sort_by_key(|r| r.id);
        rooms
    }

    pub fn list_users(&self) -> Vec<User> {
        let mut users: Vec<User> = self.users.iter().map(|e| e.value().clone()).collect();
        users.sort_by_key(|u| u.id);
        users
    }

    /// The administrator with the lowest id, if any.
    pub fn first_admin(&self) -> Option<User> {
        self.users
            .iter()
            .filter(|e| e.value().is_admin)
            .min_by_key(|e| *e.key())
            .map(|e| e.value().clone())
    }
}
