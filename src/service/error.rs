use crate::cache::CacheError;
use crate::engine::EngineError;
use crate::model::{BookingId, BookingStatus, RoomId, UserId};

/// Client-facing failure taxonomy of the booking service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    RoomNotFound(RoomId),
    UserNotFound(UserId),
    BookingNotFound(BookingId),
    AdminNotFound,
    /// Requested window overlaps the given active booking.
    SlotTaken(BookingId),
    IllegalTransition {
        id: BookingId,
        from: BookingStatus,
        to: BookingStatus,
    },
    InvalidPage(String),
    InvalidInput(String),
    LimitExceeded(&'static str),
    /// Store or cache failure. Logged where it happens; retry may succeed.
    Unavailable(String),
}

impl ServiceError {
    /// PostgreSQL SQLSTATE reported to wire clients.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            ServiceError::RoomNotFound(_)
            | ServiceError::UserNotFound(_)
            | ServiceError::BookingNotFound(_)
            | ServiceError::AdminNotFound => "P0002",
            ServiceError::SlotTaken(_) => "23P01",
            ServiceError::IllegalTransition { .. } => "55000",
            ServiceError::InvalidPage(_) | ServiceError::InvalidInput(_) => "22023",
            ServiceError::LimitExceeded(_) => "54000",
            ServiceError::Unavailable(_) => "58030",
        }
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::RoomNotFound(id) => write!(f, "room not found: {id}"),
            ServiceError::UserNotFound(id) => write!(f, "user not found: {id}"),
            ServiceError::BookingNotFound(id) => write!(f, "booking not found: {id}"),
            ServiceError::AdminNotFound => write!(f, "no administrator configured"),
            ServiceError::SlotTaken(id) => {
                write!(f, "time slot already booked (conflicts with booking {id})")
            }
            ServiceError::IllegalTransition { id, from, to } => {
                write!(f, "booking {id} cannot move from {from} to {to}")
            }
            ServiceError::InvalidPage(msg) => write!(f, "invalid page: {msg}"),
            ServiceError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            ServiceError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            ServiceError::Unavailable(msg) => write!(f, "service unavailable: {msg}"),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<EngineError> for ServiceError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::BookingNotFound(id) => ServiceError::BookingNotFound(id),
            EngineError::RoomNotFound(id) => ServiceError::RoomNotFound(id),
            EngineError::Conflict(id) => ServiceError::SlotTaken(id),
            EngineError::IllegalTransition { id, from, to } => {
                ServiceError::IllegalTransition { id, from, to }
            }
            e @ EngineError::InvalidSpan { .. } => ServiceError::InvalidInput(e.to_string()),
            EngineError::InvalidInput(msg) => ServiceError::InvalidInput(msg.to_string()),
            EngineError::LimitExceeded(msg) => ServiceError::LimitExceeded(msg),
            EngineError::WalError(e) => {
                tracing::error!("store failure: {e}");
                ServiceError::Unavailable(e)
            }
        }
    }
}

impl From<CacheError> for ServiceError {
    fn from(e: CacheError) -> Self {
        tracing::error!("cache failure: {e}");
        ServiceError::Unavailable(e.to_string())
    }
}
