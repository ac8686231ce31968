use tracing::info;
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::model::{Room, RoomFilter};

struct DemoRoom {
    room_number: &'static str,
    floor: i32,
    building: &'static str,
    desks: u32,
    chairs: u32,
    computers: u32,
    has_projector: bool,
    max_students: u32,
}

const DEMO_ROOMS: [DemoRoom; 5] = [
    DemoRoom { room_number: "A101", floor: 1, building: "Prédio A", desks: 30, chairs: 30, computers: 15, has_projector: true, max_students: 30 },
    DemoRoom { room_number: "A201", floor: 2, building: "Prédio A", desks: 40, chairs: 40, computers: 20, has_projector: true, max_students: 40 },
    DemoRoom { room_number: "B101", floor: 1, building: "Prédio B", desks: 25, chairs: 25, computers: 12, has_projector: true, max_students: 25 },
    DemoRoom { room_number: "A301", floor: 3, building: "Prédio A", desks: 35, chairs: 35, computers: 18, has_projector: true, max_students: 35 },
    DemoRoom { room_number: "B201", floor: 2, building: "Prédio B", desks: 45, chairs: 45, computers: 22, has_projector: true, max_students: 45 },
];

/// Create the demo rooms, skipping any whose building and floor already
/// hold a room. Returns how many were created.
pub async fn seed_rooms(engine: &Engine) -> Result<usize, EngineError> {
    let at = chrono::Local::now().naive_local();
    let existing = engine.list_rooms(&RoomFilter::default(), at).await;
    let mut created = 0;

    for demo in &DEMO_ROOMS {
        if existing
            .iter()
            .any(|r| r.building == demo.building && r.floor == demo.floor)
        {
            continue;
        }
        engine
            .create_room(Room {
                id: Ulid::new(),
                room_number: demo.room_number.to_string(),
                floor: demo.floor,
                building: demo.building.to_string(),
                desks: demo.desks,
                chairs: demo.chairs,
                computers: demo.computers,
                has_projector: demo.has_projector,
                max_students: demo.max_students,
            })
            .await?;
        created += 1;
    }

    if created > 0 {
        info!("seeded {created} demo rooms");
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::OpenDirectory;
    use std::sync::Arc;

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let dir = std::env::temp_dir().join("classroom_test_seed");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("seed.wal");
        let _ = std::fs::remove_file(&path);
        let engine = Engine::new(path, Arc::new(OpenDirectory)).unwrap();

        assert_eq!(seed_rooms(&engine).await.unwrap(), 5);
        assert_eq!(seed_rooms(&engine).await.unwrap(), 0);
        assert_eq!(engine.room_count(), 5);

        let at = chrono::Local::now().naive_local();
        let big = RoomFilter {
            min_capacity: Some(40),
            ..Default::default()
        };
        assert_eq!(engine.list_rooms(&big, at).await.len(), 2);
    }

    #[tokio::test]
    async fn seeding_skips_taken_floors() {
        let dir = std::env::temp_dir().join("classroom_test_seed");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("seed_partial.wal");
        let _ = std::fs::remove_file(&path);
        let engine = Engine::new(path, Arc::new(OpenDirectory)).unwrap();

        engine
            .create_room(Room::bare(Ulid::new(), "B-1", "Prédio B", 1))
            .await
            .unwrap();
        assert_eq!(seed_rooms(&engine).await.unwrap(), 4);
        assert_eq!(engine.room_count(), 5);
    }
}
