use crate::limits::MAX_PAGE_SIZE;
use crate::model::*;

use super::ServiceError;

pub const DEFAULT_PAGE_SIZE: i64 = 10;

/// Optional list filters, combined with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub username_contains: Option<String>,
    pub room_name_contains: Option<String>,
    pub location_contains: Option<String>,
    pub time_range_start: Option<Ms>,
    pub time_range_end: Option<Ms>,
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

impl BookingFilter {
    /// Inclusive window on booking start. A lone `start` widens to one hour;
    /// a lone `end` is ignored.
    pub fn start_window(&self) -> Option<(Ms, Ms)> {
        match (self.time_range_start, self.time_range_end) {
            (Some(start), Some(end)) => Some((start, end)),
            (Some(start), None) => Some((start, start.saturating_add(HOUR_MS))),
            _ => None,
        }
    }

    pub fn matches(&self, booking: &Booking, room: Option<&Room>, user: Option<&User>) -> bool {
        if let Some(needle) = &self.username_contains {
            if !user.is_some_and(|u| contains_ci(&u.username, needle)) {
                return false;
            }
        }
        if let Some(needle) = &self.room_name_contains {
            if !room.is_some_and(|r| contains_ci(&r.name, needle)) {
                return false;
            }
        }
        if let Some(needle) = &self.location_contains {
            if !room.is_some_and(|r| contains_ci(&r.location, needle)) {
                return false;
            }
        }
        if let Some((lo, hi)) = self.start_window() {
            if booking.span.start < lo || booking.span.start > hi {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    /// 1-indexed.
    pub page_no: i64,
    pub page_size: i64,
    pub filter: BookingFilter,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page_no: 1,
            page_size: DEFAULT_PAGE_SIZE,
            filter: BookingFilter::default(),
        }
    }
}

impl ListQuery {
    /// `(offset, limit)` for a valid page request.
    pub fn window(&self) -> Result<(usize, usize), ServiceError> {
        if self.page_no < 1 {
            return Err(ServiceError::InvalidPage(format!(
                "page number must be at least 1, got {}",
                self.page_no
            )));
        }
        if self.page_size < 1 {
            return Err(ServiceError::InvalidPage(format!(
                "page size must be at least 1, got {}",
                self.page_size
            )));
        }
        if self.page_size > MAX_PAGE_SIZE as i64 {
            return Err(ServiceError::LimitExceeded("page size too large"));
        }
        let limit = self.page_size as usize;
        let offset = (self.page_no as usize - 1).saturating_mul(limit);
        Ok((offset, limit))
    }
}

/// User fields safe to return to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
    pub email: String,
}

impl From<&User> for UserSummary {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            username: u.username.clone(),
            email: u.email.clone(),
        }
    }
}

/// A booking joined with its room and user for listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingView {
    pub id: BookingId,
    pub start: Ms,
    pub end: Ms,
    pub status: BookingStatus,
    pub created_at: Ms,
    pub updated_at: Ms,
    pub room_id: RoomId,
    pub user_id: UserId,
    pub room: Option<Room>,
    pub user: Option<UserSummary>,
}

impl BookingView {
    pub fn new(booking: &Booking, room: Option<Room>, user: Option<&User>) -> Self {
        Self {
            id: booking.id,
            start: booking.span.start,
            end: booking.span.end,
            status: booking.status,
            created_at: booking.created_at,
            updated_at: booking.updated_at,
            room_id: booking.room_id,
            user_id: booking.user_id,
            room,
            user: user.map(UserSummary::from),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingPage {
    pub bookings: Vec<BookingView>,
    /// Matching rows across all pages.
    pub total_count: usize,
}
