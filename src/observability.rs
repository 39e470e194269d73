use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "roombook_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "roombook_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "roombook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "roombook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "roombook_connections_rejected_total";

/// Gauge: number of loaded organizations.
pub const TENANTS_ACTIVE: &str = "roombook_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roombook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roombook_wal_flush_batch_size";

// ── Domain ──────────────────────────────────────────────────────

pub const BOOKINGS_CREATED_TOTAL: &str = "roombook_bookings_created_total";

/// Counter: creates refused because the slot was taken.
pub const BOOKING_CONFLICTS_TOTAL: &str = "roombook_booking_conflicts_total";

pub const URGES_SENT_TOTAL: &str = "roombook_urges_sent_total";
pub const URGES_THROTTLED_TOTAL: &str = "roombook_urges_throttled_total";

/// Counter: notification deliveries that failed after an urge was accepted.
pub const NOTIFY_FAILURES_TOTAL: &str = "roombook_notify_failures_total";

/// Counter: expired cache entries dropped by the reaper.
pub const CACHE_EVICTIONS_TOTAL: &str = "roombook_cache_evictions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::CreateBooking { .. } => "create_booking",
        Command::Transition { target, .. } => match target {
            crate::model::BookingStatus::Approved => "approve_booking",
            crate::model::BookingStatus::Rejected => "reject_booking",
            crate::model::BookingStatus::Released => "release_booking",
            crate::model::BookingStatus::Pending => "transition",
        },
        Command::Urge { .. } => "urge_booking",
        Command::ListBookings { .. } => "list_bookings",
        Command::GetBooking { .. } => "get_booking",
        Command::UpsertRoom { .. } => "upsert_room",
        Command::DeleteRoom { .. } => "delete_room",
        Command::SelectRooms => "select_rooms",
        Command::UpsertUser { .. } => "upsert_user",
        Command::SelectUsers => "select_users",
        Command::UserStats { .. } => "user_booking_stats",
        Command::RoomStats { .. } => "room_usage_stats",
    }
}
