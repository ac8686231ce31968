use std::collections::{HashMap, HashSet};

use chrono::{NaiveDate, NaiveDateTime};
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::directory::Role;
use crate::limits::*;
use crate::model::*;
use crate::observability::{OCCUPATIONS_SCHEDULED_TOTAL, SCHEDULING_CONFLICTS_TOTAL};

use super::conflict::{check_no_conflict, clash_date, occurrence_dates, validate_labels, validate_room, validate_slot};
use super::{Engine, EngineError, WalCommand};

/// A request that passed every check not needing a room lock.
struct Prepared {
    occupation: Occupation,
    dates: Vec<NaiveDate>,
}

impl Engine {
    // ── Rooms ────────────────────────────────────────────────

    pub async fn create_room(&self, room: Room) -> Result<(), EngineError> {
        validate_room(&room)?;
        let _gate = self.log_gate.read().await;
        if self.store.room_count() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if self.store.contains_room(&room.id) {
            return Err(EngineError::RoomAlreadyExists(room.id));
        }

        let id = room.id;
        let event = Event::RoomCreated { room };
        self.wal_append(&event).await?;
        self.store.apply_global(&event);
        info!("room {id} created");
        Ok(())
    }

    /// Apply `patch` to an existing room under its write lock, so concurrent
    /// patches of different attributes all land. Occupations are kept.
    pub async fn update_room(&self, id: RoomId, patch: RoomPatch) -> Result<Room, EngineError> {
        let _gate = self.log_gate.read().await;
        let mut guard = self.lock_room(id).await?;
        let mut room = guard.room.clone();
        patch.apply(&mut room);
        validate_room(&room)?;

        let event = Event::RoomUpdated { room: room.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        debug!("room {id} updated");
        Ok(room)
    }

    /// Only a room without occupations can be deleted.
    pub async fn delete_room(&self, id: RoomId) -> Result<(), EngineError> {
        let _gate = self.log_gate.read().await;
        let guard = self.lock_room(id).await?;
        if !guard.occupations.is_empty() {
            return Err(EngineError::RoomInUse {
                room: id,
                occupations: guard.occupations.len(),
            });
        }

        let event = Event::RoomDeleted { id };
        self.wal_append(&event).await?;
        self.store.apply_global(&event);
        drop(guard);
        info!("room {id} deleted");
        Ok(())
    }

    // ── Scheduling ───────────────────────────────────────────

    pub(super) fn require_professor(&self, teacher: &str) -> Result<(), EngineError> {
        if self.directory.role(teacher) != Some(Role::Professor) {
            return Err(EngineError::NotATeacher(teacher.to_string()));
        }
        Ok(())
    }

    /// The directory's subjects plus those assigned at runtime.
    fn authorize(&self, teacher: &str, subject: &str) -> Result<(), EngineError> {
        self.require_professor(teacher)?;
        if !self.directory.teaches(teacher, subject) && !self.store.has_discipline(teacher, subject) {
            return Err(EngineError::SubjectNotAssigned {
                teacher: teacher.to_string(),
                subject: subject.to_string(),
            });
        }
        Ok(())
    }

    /// Structural checks, then referential checks, then expansion.
    fn prepare(&self, req: ScheduleRequest) -> Result<Prepared, EngineError> {
        let slot = validate_slot(&req.slot)?;
        validate_labels(&req.teacher, &req.subject)?;

        let room_id = req.slot.room_id;
        if !self.store.contains_room(&room_id) {
            return Err(EngineError::RoomNotFound(room_id));
        }
        self.authorize(&req.teacher, &req.subject)?;
        if self.store.contains_occupation(&req.id) {
            return Err(EngineError::OccupationAlreadyExists(req.id));
        }

        let dates = occurrence_dates(&slot)?;
        Ok(Prepared {
            occupation: Occupation {
                id: req.id,
                room_id,
                teacher: req.teacher,
                subject: req.subject,
                dates: slot.dates,
                window: slot.window,
                days: slot.days,
            },
            dates,
        })
    }

    /// Book one recurring occupation. Check and write happen under the
    /// room's write lock, so concurrent requests for one room serialize.
    pub async fn schedule(&self, req: ScheduleRequest) -> Result<Occupation, EngineError> {
        let Prepared { occupation, dates } = self.prepare(req)?;

        let _gate = self.log_gate.read().await;
        // An unassignment may have committed since `prepare`.
        self.authorize(&occupation.teacher, &occupation.subject)?;
        let mut guard = self.lock_room(occupation.room_id).await?;
        if guard.occupations.len() >= MAX_OCCUPATIONS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many occupations in room"));
        }
        if self.store.contains_occupation(&occupation.id) {
            return Err(EngineError::OccupationAlreadyExists(occupation.id));
        }

        if let Err(e) = check_no_conflict(&guard, &occupation.slot()) {
            metrics::counter!(SCHEDULING_CONFLICTS_TOTAL).increment(1);
            debug!("schedule rejected for room {}: {e}", occupation.room_id);
            return Err(e);
        }

        let event = Event::OccupationsScheduled {
            occupations: vec![occupation.clone()],
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(OCCUPATIONS_SCHEDULED_TOTAL).increment(1);
        info!(
            "occupation {} scheduled in room {}: {} dates",
            occupation.id,
            occupation.room_id,
            dates.len()
        );
        Ok(occupation)
    }

    /// Book several occupations at once, possibly across rooms. Either every
    /// request is stored or none is.
    pub async fn schedule_batch(
        &self,
        requests: Vec<ScheduleRequest>,
    ) -> Result<Vec<Occupation>, EngineError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        if requests.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }

        let mut seen = HashSet::with_capacity(requests.len());
        for req in &requests {
            if !seen.insert(req.id) {
                return Err(EngineError::OccupationAlreadyExists(req.id));
            }
        }
        let prepared = requests
            .into_iter()
            .map(|req| self.prepare(req))
            .collect::<Result<Vec<_>, _>>()?;

        // Write locks in sorted room order so overlapping batches can't deadlock.
        let mut room_ids: Vec<RoomId> = prepared.iter().map(|p| p.occupation.room_id).collect();
        room_ids.sort();
        room_ids.dedup();

        let _gate = self.log_gate.read().await;
        for p in &prepared {
            self.authorize(&p.occupation.teacher, &p.occupation.subject)?;
        }
        let mut guards = Vec::with_capacity(room_ids.len());
        let mut guard_index = HashMap::with_capacity(room_ids.len());
        for rid in &room_ids {
            let guard = self.lock_room(*rid).await?;
            guard_index.insert(*rid, guards.len());
            guards.push(guard);
        }

        // Phase 1: every request against the store and against earlier requests.
        let mut per_room: HashMap<RoomId, usize> = HashMap::new();
        for (i, p) in prepared.iter().enumerate() {
            let o = &p.occupation;
            if self.store.contains_occupation(&o.id) {
                return Err(EngineError::OccupationAlreadyExists(o.id));
            }
            let guard = &guards[guard_index[&o.room_id]];
            let count = per_room.entry(o.room_id).or_insert(guard.occupations.len());
            *count += 1;
            if *count > MAX_OCCUPATIONS_PER_ROOM {
                return Err(EngineError::LimitExceeded("too many occupations in room"));
            }

            let slot = o.slot();
            if let Err(e) = check_no_conflict(guard, &slot) {
                metrics::counter!(SCHEDULING_CONFLICTS_TOTAL).increment(1);
                return Err(e);
            }
            for earlier in prepared[..i].iter().map(|e| &e.occupation) {
                if earlier.room_id != o.room_id {
                    continue;
                }
                if let Some(date) = clash_date(&earlier.slot(), &slot) {
                    metrics::counter!(SCHEDULING_CONFLICTS_TOTAL).increment(1);
                    return Err(EngineError::SchedulingConflict {
                        occupation: earlier.id,
                        date,
                    });
                }
            }
        }

        // Phase 2: one record for the whole batch, then apply to each room.
        let occupations: Vec<Occupation> = prepared.into_iter().map(|p| p.occupation).collect();
        let event = Event::OccupationsScheduled {
            occupations: occupations.clone(),
        };
        self.wal_append(&event).await?;
        for guard in guards.iter_mut() {
            self.store.apply_to_room(guard, &event);
        }

        metrics::counter!(OCCUPATIONS_SCHEDULED_TOTAL).increment(occupations.len() as u64);
        info!(
            "batch of {} occupations scheduled across {} rooms",
            occupations.len(),
            room_ids.len()
        );
        Ok(occupations)
    }

    pub async fn cancel_occupation(&self, id: OccupationId) -> Result<RoomId, EngineError> {
        let _gate = self.log_gate.read().await;
        let (room_id, mut guard) = self.resolve_occupation_write(&id).await?;
        let event = Event::OccupationCancelled { id, room_id };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("occupation {id} cancelled in room {room_id}");
        Ok(room_id)
    }

    /// Cancel whatever occupation is active in the room at `now`.
    pub async fn vacate_room(
        &self,
        room_id: RoomId,
        now: NaiveDateTime,
    ) -> Result<OccupationId, EngineError> {
        let _gate = self.log_gate.read().await;
        let mut guard = self.lock_room(room_id).await?;
        let id = guard
            .active_at(now.date(), TimeOfDay::from_naive_time(now.time()))
            .map(|o| o.id)
            .next()
            .ok_or(EngineError::NoCurrentOccupation(room_id))?;

        let event = Event::OccupationCancelled { id, room_id };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("room {room_id} vacated: occupation {id} cancelled");
        Ok(id)
    }

    // ── Log maintenance ──────────────────────────────────────

    /// Rewrite the log with just enough records to rebuild the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.log_gate.write().await;

        let mut events: Vec<Event> = self
            .store
            .disciplines(None)
            .into_iter()
            .map(|discipline| Event::SubjectAssigned { discipline })
            .collect();
        for rs in self.store.rooms() {
            let guard = rs.read().await;
            events.push(Event::RoomCreated {
                room: guard.room.clone(),
            });
            if !guard.occupations.is_empty() {
                events.push(Event::OccupationsScheduled {
                    occupations: guard.occupations.clone(),
                });
            }
        }
        let records = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("log writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("log writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!("log compacted to {records} records");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
