use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::model::*;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

/// Rooms keyed by id, each behind its own lock, plus a reverse index from
/// occupation id to the room that holds it and the runtime subject
/// assignments of each teacher.
pub struct RoomStore {
    rooms: DashMap<RoomId, SharedRoomState>,
    occupation_to_room: DashMap<OccupationId, RoomId>,
    disciplines: DashMap<String, BTreeSet<String>>,
}

impl Default for RoomStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomStore {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            occupation_to_room: DashMap::new(),
            disciplines: DashMap::new(),
        }
    }

    // ── Rooms ────────────────────────────────────────────────

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn contains_room(&self, id: &RoomId) -> bool {
        self.rooms.contains_key(id)
    }

    pub fn get_room(&self, id: &RoomId) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn insert_room(&self, room: Room) {
        self.rooms
            .insert(room.id, Arc::new(RwLock::new(RoomState::new(room))));
    }

    pub fn remove_room(&self, id: &RoomId) -> Option<SharedRoomState> {
        self.rooms.remove(id).map(|(_, rs)| rs)
    }

    /// Snapshot of every room handle, sorted by id.
    pub fn rooms(&self) -> Vec<SharedRoomState> {
        let mut all: Vec<(RoomId, SharedRoomState)> = self
            .rooms
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        all.sort_by_key(|(id, _)| *id);
        all.into_iter().map(|(_, rs)| rs).collect()
    }

    // ── Occupation index ─────────────────────────────────────

    pub fn room_for_occupation(&self, id: &OccupationId) -> Option<RoomId> {
        self.occupation_to_room.get(id).map(|e| *e.value())
    }

    pub fn contains_occupation(&self, id: &OccupationId) -> bool {
        self.occupation_to_room.contains_key(id)
    }

    // ── Disciplines ──────────────────────────────────────────

    pub fn has_discipline(&self, teacher: &str, subject: &str) -> bool {
        self.disciplines
            .get(teacher)
            .is_some_and(|subjects| subjects.contains(subject))
    }

    pub fn discipline_count(&self) -> usize {
        self.disciplines.iter().map(|e| e.value().len()).sum()
    }

    /// Every assignment, or one teacher's, sorted by teacher then subject.
    pub fn disciplines(&self, teacher: Option<&str>) -> Vec<Discipline> {
        let mut out: Vec<Discipline> = self
            .disciplines
            .iter()
            .filter(|e| teacher.is_none_or(|t| t == e.key()))
            .flat_map(|e| {
                let teacher = e.key().clone();
                e.value()
                    .iter()
                    .map(|subject| Discipline {
                        teacher: teacher.clone(),
                        subject: subject.clone(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        out.sort();
        out
    }

    // ── Event application ────────────────────────────────────

    /// Apply a room-scoped event to a locked room. Room creation and
    /// deletion touch the map itself and go through [`RoomStore::apply_global`].
    pub fn apply_to_room(&self, rs: &mut RoomState, event: &Event) {
        match event {
            Event::RoomUpdated { room } => {
                rs.room = room.clone();
            }
            Event::OccupationsScheduled { occupations } => {
                let room_id = rs.id();
                for occupation in occupations.iter().filter(|o| o.room_id == room_id) {
                    self.occupation_to_room.insert(occupation.id, occupation.room_id);
                    rs.insert_occupation(occupation.clone());
                }
            }
            Event::OccupationCancelled { id, .. } => {
                rs.remove_occupation(*id);
                self.occupation_to_room.remove(id);
            }
            Event::RoomCreated { .. }
            | Event::RoomDeleted { .. }
            | Event::SubjectAssigned { .. }
            | Event::SubjectUnassigned { .. } => {}
        }
    }

    pub fn apply_global(&self, event: &Event) {
        match event {
            Event::RoomCreated { room } => self.insert_room(room.clone()),
            Event::RoomDeleted { id } => {
                self.remove_room(id);
                self.occupation_to_room.retain(|_, room| room != id);
            }
            Event::SubjectAssigned { discipline } => {
                self.disciplines
                    .entry(discipline.teacher.clone())
                    .or_default()
                    .insert(discipline.subject.clone());
            }
            Event::SubjectUnassigned { discipline } => {
                if let Some(mut subjects) = self.disciplines.get_mut(&discipline.teacher) {
                    subjects.remove(&discipline.subject);
                }
                self.disciplines
                    .remove_if(&discipline.teacher, |_, subjects| subjects.is_empty());
            }
            _ => {}
        }
    }
}

/// Rooms touched by an event, ascending and deduplicated.
pub(crate) fn event_rooms(event: &Event) -> Vec<RoomId> {
    match event {
        Event::RoomCreated { room } | Event::RoomUpdated { room } => vec![room.id],
        Event::RoomDeleted { id } => vec![*id],
        Event::OccupationsScheduled { occupations } => {
            let mut ids: Vec<RoomId> = occupations.iter().map(|o| o.room_id).collect();
            ids.sort();
            ids.dedup();
            ids
        }
        Event::OccupationCancelled { room_id, .. } => vec![*room_id],
        Event::SubjectAssigned { .. } | Event::SubjectUnassigned { .. } => Vec::new(),
    }
}
