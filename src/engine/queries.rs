use chrono::{NaiveDate, NaiveDateTime};

use crate::model::*;

use super::conflict::{check_no_conflict, find_conflict, occurrence_dates, validate_slot};
use super::{Engine, EngineError};

impl Engine {
    /// Would `req` fit into its room right now? Same validation and conflict
    /// rule as [`Engine::schedule`], without the directory checks. Never writes.
    pub async fn check_availability(&self, req: &SlotRequest) -> Result<bool, EngineError> {
        let slot = validate_slot(req)?;
        let rs = self
            .store
            .get_room(&req.room_id)
            .ok_or(EngineError::RoomNotFound(req.room_id))?;
        occurrence_dates(&slot)?;
        let guard = rs.read().await;
        match check_no_conflict(&guard, &slot) {
            Ok(()) => Ok(true),
            Err(EngineError::SchedulingConflict { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Conflict detector on a whole series, with the same per-date rule as
    /// [`Engine::check_availability`]. An unknown room has nothing to conflict with.
    pub async fn find_conflict(
        &self,
        room_id: RoomId,
        dates: DateRange,
        window: TimeWindow,
        days: WeekdaySet,
    ) -> Option<Occupation> {
        let rs = self.store.get_room(&room_id)?;
        let guard = rs.read().await;
        find_conflict(&guard, &dates, &window, &days).cloned()
    }

    /// Every room with an occupation active at `time` on `date`, sorted by room id.
    pub async fn occupied_rooms(&self, date: NaiveDate, time: TimeOfDay) -> Vec<OccupiedRoom> {
        let mut out = Vec::new();
        for rs in self.store.rooms() {
            let guard = rs.read().await;
            if let Some(occupation) = guard.active_at(date, time).next() {
                out.push(OccupiedRoom {
                    room: guard.room.clone(),
                    occupation: occupation.clone(),
                });
            }
        }
        out
    }

    pub async fn current_occupation(
        &self,
        room_id: RoomId,
        at: NaiveDateTime,
    ) -> Result<Option<Occupation>, EngineError> {
        let rs = self
            .store
            .get_room(&room_id)
            .ok_or(EngineError::RoomNotFound(room_id))?;
        let guard = rs.read().await;
        Ok(guard
            .active_at(at.date(), TimeOfDay::from_naive_time(at.time()))
            .next()
            .cloned())
    }

    pub async fn get_room(&self, room_id: RoomId) -> Result<Room, EngineError> {
        let rs = self
            .store
            .get_room(&room_id)
            .ok_or(EngineError::RoomNotFound(room_id))?;
        let guard = rs.read().await;
        Ok(guard.room.clone())
    }

    /// Rooms matching `filter`, sorted by room id. Availability is judged at `at`.
    pub async fn list_rooms(&self, filter: &RoomFilter, at: NaiveDateTime) -> Vec<Room> {
        let (day, time) = (at.date(), TimeOfDay::from_naive_time(at.time()));
        let mut out = Vec::new();
        for rs in self.store.rooms() {
            let guard = rs.read().await;
            let occupied = guard.active_at(day, time).next().is_some();
            if filter.matches(&guard.room, occupied) {
                out.push(guard.room.clone());
            }
        }
        out
    }

    /// Occupations of one room, by start date then start time.
    pub async fn occupations_for_room(&self, room_id: RoomId) -> Result<Vec<Occupation>, EngineError> {
        let rs = self
            .store
            .get_room(&room_id)
            .ok_or(EngineError::RoomNotFound(room_id))?;
        let guard = rs.read().await;
        let mut out = guard.occupations.clone();
        out.sort_by_key(|o| (o.dates.start, o.window.start));
        Ok(out)
    }

    pub async fn get_occupation(&self, id: OccupationId) -> Result<Occupation, EngineError> {
        let rs = self
            .store
            .room_for_occupation(&id)
            .and_then(|room_id| self.store.get_room(&room_id))
            .ok_or(EngineError::OccupationNotFound(id))?;
        let guard = rs.read().await;
        guard
            .get_occupation(id)
            .cloned()
            .ok_or(EngineError::OccupationNotFound(id))
    }

    /// One sweep tick: compare the occupation active in every room at `now`
    /// with the previous tick and report the differences. Rooms locked for
    /// writing are skipped and keep their previous state until the next tick.
    pub fn refresh_occupancy(&self, now: NaiveDateTime) -> Vec<OccupancyChange> {
        let (day, time) = (now.date(), TimeOfDay::from_naive_time(now.time()));
        let mut changes = Vec::new();

        for rs in self.store.rooms() {
            let Ok(guard) = rs.try_read() else { continue };
            let room_id = guard.id();
            let current = guard.active_at(day, time).next().map(|o| o.id);
            let previous = self.occupied_now.get(&room_id).map(|e| *e.value());
            if current == previous {
                continue;
            }
            if let Some(occupation) = previous {
                changes.push(OccupancyChange::Vacated { room_id, occupation });
            }
            match current {
                Some(occupation) => {
                    self.occupied_now.insert(room_id, occupation);
                    changes.push(OccupancyChange::Occupied { room_id, occupation });
                }
                None => {
                    self.occupied_now.remove(&room_id);
                }
            }
        }

        // Deleted rooms.
        self.occupied_now
            .retain(|room_id, _| self.store.contains_room(room_id));
        changes
    }

    /// Rooms occupied as of the last sweep tick.
    pub fn occupied_count(&self) -> usize {
        self.occupied_now.len()
    }
}
