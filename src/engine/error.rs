use crate::model::{BookingId, BookingStatus, Ms, RoomId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    BookingNotFound(BookingId),
    RoomNotFound(RoomId),
    /// The requested window overlaps an active booking.
    Conflict(BookingId),
    IllegalTransition {
        id: BookingId,
        from: BookingStatus,
        to: BookingStatus,
    },
    InvalidSpan {
        start: Ms,
        end: Ms,
    },
    InvalidInput(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::BookingNotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::RoomNotFound(id) => write!(f, "room not found: {id}"),
            EngineError::Conflict(id) => write!(f, "time slot taken by booking {id}"),
            EngineError::IllegalTransition { id, from, to } => {
                write!(f, "booking {id} cannot move from {from} to {to}")
            }
            EngineError::InvalidSpan { start, end } => {
                write!(f, "invalid time range [{start}, {end}): start must be before end")
            }
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
