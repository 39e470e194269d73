mod error;
mod query;
mod throttle;

pub use error::ServiceError;
pub use query::{BookingFilter, BookingPage, BookingView, ListQuery, UserSummary, DEFAULT_PAGE_SIZE};
pub use throttle::{UrgeOutcome, UrgeThrottle, DEFAULT_URGE_COOLDOWN};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::directory::{RoomDirectory, UserDirectory};
use crate::engine::Engine;
use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserBookingCount {
    pub user_id: UserId,
    pub username: Option<String>,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomUsageCount {
    pub room_id: RoomId,
    pub room_name: Option<String>,
    pub count: u64,
}

/// The operations exposed to clients: create, lifecycle, urge, list, stats
/// and the room-deletion cascade.
///
/// The store owns bookings; rooms and users are only read through the
/// directory traits.
pub struct BookingService {
    store: Arc<Engine>,
    rooms: Arc<dyn RoomDirectory>,
    users: Arc<dyn UserDirectory>,
    throttle: UrgeThrottle,
}

impl BookingService {
    pub fn new(
        store: Arc<Engine>,
        rooms: Arc<dyn RoomDirectory>,
        users: Arc<dyn UserDirectory>,
        throttle: UrgeThrottle,
    ) -> Self {
        Self {
            store,
            rooms,
            users,
            throttle,
        }
    }

    pub fn store(&self) -> &Arc<Engine> {
        &self.store
    }

    // ── Create & lifecycle ───────────────────────────────────

    pub async fn create(
        &self,
        room_id: RoomId,
        user_id: UserId,
        start: Ms,
        end: Ms,
    ) -> Result<BookingId, ServiceError> {
        if self.rooms.find_room_by_id(room_id).await.is_none() {
            return Err(ServiceError::RoomNotFound(room_id));
        }
        if self.users.find_user_by_id(user_id).await.is_none() {
            return Err(ServiceError::UserNotFound(user_id));
        }
        let booking = self.store.create_booking(room_id, user_id, start, end).await?;
        tracing::info!(
            "booking {} created: room {room_id}, user {user_id}, [{start}, {end})",
            booking.id
        );
        Ok(booking.id)
    }

    /// Move a booking to `target` if the lifecycle allows it.
    pub async fn transition(
        &self,
        id: BookingId,
        target: BookingStatus,
    ) -> Result<Booking, ServiceError> {
        Ok(self.store.transition(id, target).await?)
    }

    pub async fn approve(&self, id: BookingId) -> Result<Booking, ServiceError> {
        Ok(self.store.approve(id).await?)
    }

    pub async fn reject(&self, id: BookingId) -> Result<Booking, ServiceError> {
        Ok(self.store.reject(id).await?)
    }

    pub async fn release(&self, id: BookingId) -> Result<Booking, ServiceError> {
        Ok(self.store.release(id).await?)
    }

    pub async fn urge(&self, id: BookingId) -> Result<UrgeOutcome, ServiceError> {
        let booking = self
            .store
            .get_booking(id)
            .await
            .ok_or(ServiceError::BookingNotFound(id))?;
        self.throttle.urge(&booking).await
    }

    pub fn urge_message(&self, outcome: UrgeOutcome) -> String {
        self.throttle.message(outcome)
    }

    // ── Reads ────────────────────────────────────────────────

    pub async fn get(&self, id: BookingId) -> Result<BookingView, ServiceError> {
        let booking = self
            .store
            .get_booking(id)
            .await
            .ok_or(ServiceError::BookingNotFound(id))?;
        let room = self.rooms.find_room_by_id(booking.room_id).await;
        let user = self.users.find_user_by_id(booking.user_id).await;
        Ok(BookingView::new(&booking, room, user.as_ref()))
    }

    /// One page of bookings in id order, joined with room and user.
    pub async fn list(&self, query: &ListQuery) -> Result<BookingPage, ServiceError> {
        let (offset, limit) = query.window()?;
        let mut rooms: HashMap<RoomId, Option<Room>> = HashMap::new();
        let mut users: HashMap<UserId, Option<User>> = HashMap::new();
        let mut matched = Vec::new();

        for booking in self.store.snapshot_bookings().await {
            if !rooms.contains_key(&booking.room_id) {
                let room = self.rooms.find_room_by_id(booking.room_id).await;
                rooms.insert(booking.room_id, room);
            }
            if !users.contains_key(&booking.user_id) {
                let user = self.users.find_user_by_id(booking.user_id).await;
                users.insert(booking.user_id, user);
            }
            let room = rooms.get(&booking.room_id).and_then(Option::as_ref);
            let user = users.get(&booking.user_id).and_then(Option::as_ref);
            if query.filter.matches(&booking, room, user) {
                matched.push(BookingView::new(&booking, room.cloned(), user));
            }
        }

        let total_count = matched.len();
        let bookings = matched.into_iter().skip(offset).take(limit).collect();
        Ok(BookingPage {
            bookings,
            total_count,
        })
    }

    // ── Statistics ───────────────────────────────────────────

    /// Bookings per user whose start falls in `[start, end]`.
    pub async fn user_booking_counts(
        &self,
        start: Ms,
        end: Ms,
    ) -> Result<Vec<UserBookingCount>, ServiceError> {
        let counts = self.count_by(start, end, |b| b.user_id).await?;
        let mut out = Vec::with_capacity(counts.len());
        for (user_id, count) in counts {
            let username = self.users.find_user_by_id(user_id).await.map(|u| u.username);
            out.push(UserBookingCount {
                user_id,
                username,
                count,
            });
        }
        Ok(out)
    }

    /// Bookings per room whose start falls in `[start, end]`.
    pub async fn room_usage_counts(
        &self,
        start: Ms,
        end: Ms,
    ) -> Result<Vec<RoomUsageCount>, ServiceError> {
        let counts = self.count_by(start, end, |b| b.room_id).await?;
        let mut out = Vec::with_capacity(counts.len());
        for (room_id, count) in counts {
            let room_name = self.rooms.find_room_by_id(room_id).await.map(|r| r.name);
            out.push(RoomUsageCount {
                room_id,
                room_name,
                count,
            });
        }
        Ok(out)
    }

    async fn count_by(
        &self,
        start: Ms,
        end: Ms,
        key: impl Fn(&Booking) -> u64,
    ) -> Result<BTreeMap<u64, u64>, ServiceError> {
        if start > end {
            return Err(ServiceError::InvalidInput(format!(
                "statistics window start {start} is after end {end}"
            )));
        }
        let mut counts = BTreeMap::new();
        for b in self.store.snapshot_bookings().await {
            if b.span.start >= start && b.span.start <= end {
                *counts.entry(key(&b)).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    // ── Catalog & cascade ────────────────────────────────────

    pub async fn register_room(&self, room: Room) -> Result<(), ServiceError> {
        Ok(self.store.register_room(room).await?)
    }

    pub async fn register_user(&self, user: User) -> Result<(), ServiceError> {
        Ok(self.store.register_user(user).await?)
    }

    pub fn list_rooms(&self) -> Vec<Room> {
        self.store.list_rooms()
    }

    pub fn list_users(&self) -> Vec<User> {
        self.store.list_users()
    }

    /// Delete a room after removing every booking that references it.
    pub async fn delete_room(&self, id: RoomId) -> Result<usize, ServiceError> {
        Ok(self.store.remove_room(id).await?)
    }

    /// Cascade hook for a room deleted elsewhere.
    pub async fn delete_bookings_for_room(&self, id: RoomId) -> Result<usize, ServiceError> {
        Ok(self.store.delete_bookings_for_room(id).await?)
    }
}
