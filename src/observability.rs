use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "slotd_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "slotd_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotd_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "slotd_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotd_wal_flush_batch_size";

/// Install the Prometheus metrics exporter on the given port. No-op if the
/// port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertService { .. } => "insert_service",
        Command::DeleteService { .. } => "delete_service",
        Command::InsertStaff { .. } => "insert_staff",
        Command::DeleteStaff { .. } => "delete_staff",
        Command::InsertAvailability { .. } => "insert_availability",
        Command::UpdateAvailability { .. } => "update_availability",
        Command::DeleteAvailability { .. } => "delete_availability",
        Command::RestoreAvailability { .. } => "restore_availability",
        Command::PurgeAvailability { .. } => "purge_availability",
        Command::InsertBooking { .. } => "insert_booking",
        Command::UpdateBooking { .. } => "update_booking",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::RestoreBooking { .. } => "restore_booking",
        Command::PurgeBooking { .. } => "purge_booking",
        Command::SelectServices => "select_services",
        Command::SelectStaff => "select_staff",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectAvailableStaff { .. } => "select_available_staff",
    }
}
