use std::net::SocketAddr;

use crate::sql::Command;

// ── Booking outcomes ────────────────────────────────────────────

/// Counter: booking attempts. Labels: outcome (confirmed | conflict).
pub const BOOKINGS_TOTAL: &str = "bookd_bookings_total";

/// Counter: reschedule attempts. Labels: outcome (confirmed | conflict).
pub const RESCHEDULES_TOTAL: &str = "bookd_reschedules_total";

/// Counter: lifecycle transitions applied. Labels: to.
pub const TRANSITIONS_TOTAL: &str = "bookd_transitions_total";

/// Counter: notification/audit deliveries that failed. Labels: sink.
pub const DISPATCH_FAILURES_TOTAL: &str = "bookd_dispatch_failures_total";

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "bookd_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "bookd_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "bookd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "bookd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "bookd_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "bookd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "bookd_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertResource { .. } => "insert_resource",
        Command::UpdateResource { .. } => "update_resource",
        Command::DeleteResource { .. } => "delete_resource",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::UpdateReservationStatus { .. } => "update_reservation_status",
        Command::RescheduleReservation { .. } => "reschedule_reservation",
        Command::DeleteReservation { .. } => "delete_reservation",
        Command::SelectResources { .. } => "select_resources",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectConflicts { .. } => "select_conflicts",
        Command::SelectAlternatives { .. } => "select_alternatives",
        Command::Listen { .. } => "listen",
        Command::Unlisten { .. } => "unlisten",
        Command::UnlistenAll => "unlisten_all",
    }
}
