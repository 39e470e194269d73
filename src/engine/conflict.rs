use std::str::FromStr;

use crate::model::*;

use super::EngineError;

/// Which existing bookings count as colliding with a requested window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverlapPolicy {
    /// Any positive-length intersection conflicts. Touching endpoints do not.
    #[default]
    General,
    /// Legacy behavior: only reject windows fully inside an existing booking.
    Containment,
}

impl OverlapPolicy {
    pub fn collides(&self, existing: &Span, requested: &Span) -> bool {
        match self {
            OverlapPolicy::General => existing.overlaps(requested),
            OverlapPolicy::Containment => existing.contains_span(requested),
        }
    }
}

impl FromStr for OverlapPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "general" | "overlap" => Ok(OverlapPolicy::General),
            "containment" | "legacy" => Ok(OverlapPolicy::Containment),
            other => Err(format!("unknown overlap policy: {other}")),
        }
    }
}

pub(crate) fn validate_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    use crate::limits::*;
    if start >= end {
        return Err(EngineError::InvalidSpan { start, end });
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    let span = Span::new(start, end);
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("booking too long"));
    }
    Ok(span)
}

/// First active booking on the room that collides with `span`, if any.
pub(crate) fn find_conflict<'a>(
    room: &'a RoomBookings,
    span: &Span,
    policy: OverlapPolicy,
) -> Option<&'a Booking> {
    // Both policies imply positive overlap, so the overlap scan is a superset.
    room.active_overlapping(span)
        .find(|b| policy.collides(&b.span, span))
}

pub(crate) fn check_no_conflict(
    room: &RoomBookings,
    span: &Span,
    policy: OverlapPolicy,
) -> Result<(), EngineError> {
    match find_conflict(room, span, policy) {
        Some(existing) => Err(EngineError::Conflict(existing.id)),
        None => Ok(()),
    }
}
