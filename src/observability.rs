use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "classroom_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "classroom_query_duration_seconds";

/// Counter: occupations committed, batches counted per occupation.
pub const OCCUPATIONS_SCHEDULED_TOTAL: &str = "classroom_occupations_scheduled_total";

/// Counter: schedule requests rejected for overlapping an existing occupation.
pub const SCHEDULING_CONFLICTS_TOTAL: &str = "classroom_scheduling_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "classroom_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "classroom_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "classroom_connections_rejected_total";

/// Gauge: rooms with an active occupation at the last sweep tick.
pub const ROOMS_OCCUPIED: &str = "classroom_rooms_occupied";

/// Histogram: log group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "classroom_wal_flush_duration_seconds";

/// Histogram: log group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "classroom_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short metrics label for a command.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertRoom { .. } => "insert_room",
        Command::UpdateRoom { .. } => "update_room",
        Command::DeleteRoom { .. } => "delete_room",
        Command::InsertOccupations { requests } if requests.len() > 1 => "batch_insert_occupations",
        Command::InsertOccupations { .. } => "insert_occupation",
        Command::DeleteOccupation { .. } => "delete_occupation",
        Command::VacateRoom { .. } => "vacate_room",
        Command::SelectRooms { .. } => "select_rooms",
        Command::SelectOccupations { .. } => "select_occupations",
        Command::SelectOccupied { .. } => "select_occupied",
        Command::SelectCurrent { .. } => "select_current",
        Command::SelectAvailability { .. } => "select_availability",
        Command::AssignSubject { .. } => "assign_subject",
        Command::UnassignSubject { .. } => "unassign_subject",
        Command::SelectDisciplines { .. } => "select_disciplines",
    }
}
