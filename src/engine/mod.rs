mod conflict;
mod disciplines;
mod error;
mod mutations;
mod queries;
pub mod recurrence;
mod store;

pub use conflict::find_conflict;
pub use error::EngineError;
pub use store::{RoomStore, SharedRoomState};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};

use crate::directory::Directory;
use crate::model::*;
use crate::observability::{WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the log and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends.
/// 4. One flush_sync for the whole batch, then answer every sender.
///
/// A non-append command seen while draining closes the batch first, so
/// compaction never races buffered bytes.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;

        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("occupation log flush failed: {e}");
    }
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so half-buffered bytes
    // don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: &mut Vec<PendingAppend>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// Rooms, their occupations and the log that makes them durable.
pub struct Engine {
    pub(super) store: RoomStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) directory: Arc<dyn Directory>,
    /// Held shared by every mutation and exclusively by compaction, so no
    /// record is appended between the compaction snapshot and the file swap.
    /// Always taken before any room lock.
    pub(super) log_gate: RwLock<()>,
    /// Occupation active in each room as of the last sweep tick.
    pub(super) occupied_now: DashMap<RoomId, OccupationId>,
}

impl Engine {
    /// Replay the log at `wal_path` and start the background writer.
    /// Must be called inside a tokio runtime.
    pub fn new(wal_path: PathBuf, directory: Arc<dyn Directory>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: RoomStore::new(),
            wal_tx,
            directory,
            log_gate: RwLock::new(()),
            occupied_now: DashMap::new(),
        };

        // Sole owner of every lock during replay, so try_write cannot fail.
        // Never block here: this may run inside an async context.
        for event in &events {
            match event {
                Event::RoomCreated { .. }
                | Event::RoomDeleted { .. }
                | Event::SubjectAssigned { .. }
                | Event::SubjectUnassigned { .. } => engine.store.apply_global(event),
                other => {
                    for room_id in store::event_rooms(other) {
                        if let Some(rs) = engine.store.get_room(&room_id)
                            && let Ok(mut guard) = rs.try_write()
                        {
                            engine.store.apply_to_room(&mut guard, other);
                        }
                    }
                }
            }
        }

        tracing::info!(
            "replayed {} log records: {} rooms, {} subject assignments",
            events.len(),
            engine.store.room_count(),
            engine.store.discipline_count()
        );
        Ok(engine)
    }

    /// Write an event through the group-commit writer and wait until it is durable.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("log writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("log writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn room_handle(&self, id: &RoomId) -> Option<SharedRoomState> {
        self.store.get_room(id)
    }

    pub fn room_count(&self) -> usize {
        self.store.room_count()
    }

    /// Log, then apply to the already-locked room.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_to_room(rs, event);
        Ok(())
    }

    /// Take a room's write lock, failing if the room was deleted while we waited.
    pub(super) async fn lock_room(
        &self,
        id: RoomId,
    ) -> Result<OwnedRwLockWriteGuard<RoomState>, EngineError> {
        let rs = self
            .store
            .get_room(&id)
            .ok_or(EngineError::RoomNotFound(id))?;
        let guard = rs.write_owned().await;
        if !self.store.contains_room(&id) {
            return Err(EngineError::RoomNotFound(id));
        }
        Ok(guard)
    }

    /// Lookup occupation → room, then take the room's write lock.
    pub(super) async fn resolve_occupation_write(
        &self,
        id: &OccupationId,
    ) -> Result<(RoomId, OwnedRwLockWriteGuard<RoomState>), EngineError> {
        let room_id = self
            .store
            .room_for_occupation(id)
            .ok_or(EngineError::OccupationNotFound(*id))?;
        let rs = self
            .store
            .get_room(&room_id)
            .ok_or(EngineError::OccupationNotFound(*id))?;
        let guard = rs.write_owned().await;
        // Cancelled while we waited for the lock.
        if guard.get_occupation(*id).is_none() {
            return Err(EngineError::OccupationNotFound(*id));
        }
        Ok((room_id, guard))
    }
}
