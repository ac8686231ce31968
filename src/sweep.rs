use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::model::OccupancyChange;
use crate::observability::ROOMS_OCCUPIED;

/// Background task that tracks which rooms are occupied right now, on the
/// local wall clock. Read-only: it logs transitions and keeps the gauge current.
pub async fn run_occupancy_sweep(engine: Arc<Engine>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let now = chrono::Local::now().naive_local();
        for change in engine.refresh_occupancy(now) {
            match change {
                OccupancyChange::Occupied { room_id, occupation } => {
                    info!("room {room_id} now occupied by {occupation}")
                }
                OccupancyChange::Vacated { room_id, occupation } => {
                    info!("room {room_id} free again after {occupation}")
                }
            }
        }
        metrics::gauge!(ROOMS_OCCUPIED).set(engine.occupied_count() as f64);
    }
}

/// Background task that compacts the log once enough records pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            debug!("compactor: {appends} records since last compaction");
            continue;
        }
        if let Err(e) = engine.compact_wal().await {
            warn!("log compaction failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::OpenDirectory;
    use crate::model::*;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("classroom_test_sweep");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn sweep_skips_room_being_written() {
        let engine = Arc::new(
            Engine::new(test_wal_path("sweep_skip.wal"), Arc::new(OpenDirectory)).unwrap(),
        );
        let room = Ulid::new();
        engine.create_room(Room::bare(room, "101", "A", 1)).await.unwrap();
        let d = parse_date("2025-06-02").unwrap();
        engine
            .schedule(ScheduleRequest {
                id: Ulid::new(),
                teacher: "ana@school.edu".into(),
                subject: "Physics".into(),
                slot: SlotRequest {
                    room_id: room,
                    start_date: d,
                    end_date: d,
                    start_time: TimeOfDay::parse("08:00").unwrap(),
                    end_time: TimeOfDay::parse("09:00").unwrap(),
                    days: vec![1],
                },
            })
            .await
            .unwrap();
        let now = d.and_hms_opt(8, 30, 0).unwrap();

        let rs = engine.room_handle(&room).unwrap();
        let guard = rs.write().await;
        assert!(engine.refresh_occupancy(now).is_empty());
        drop(guard);

        assert_eq!(engine.refresh_occupancy(now).len(), 1);
        assert_eq!(engine.occupied_count(), 1);
    }

    #[tokio::test]
    async fn compactor_below_threshold_leaves_log_alone() {
        let path = test_wal_path("compactor_idle.wal");
        let engine = Arc::new(Engine::new(path.clone(), Arc::new(OpenDirectory)).unwrap());
        engine.create_room(Room::bare(Ulid::new(), "101", "A", 1)).await.unwrap();

        let handle = tokio::spawn(run_compactor(engine.clone(), 1_000));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        assert_eq!(engine.wal_appends_since_compact().await, 1);
    }
}
