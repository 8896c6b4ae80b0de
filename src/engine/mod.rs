mod admission;
mod error;
mod mutations;
mod queries;
mod store;
#[cfg(test)]
mod tests;

pub use error::EngineError;
pub use queries::BookingFilter;
pub use store::SharedDayState;

use std::io;
use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot};
use ulid::Ulid;

use crate::catalog::{ServiceCatalog, StaffDirectory};
use crate::model::*;
use crate::wal::Wal;

use store::DayStore;

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

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush the batch first, then handle the
                            // non-append command.
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
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
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────

/// One tenant's allocation engine: the per-key day states, the service
/// catalog and staff directory, and the WAL channel. All mutation goes
/// through the commit path in `mutations.rs`; nothing else writes a booking
/// or flips a slot flag.
pub struct Engine {
    pub(super) store: DayStore,
    pub(super) services: ServiceCatalog,
    pub(super) staff: StaffDirectory,
    wal_tx: mpsc::Sender<WalCommand>,
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: DayStore::new(),
            services: ServiceCatalog::new(),
            staff: StaffDirectory::new(),
            wal_tx,
        };

        // Replay — we're the sole owner of the state Arcs here, so try_write
        // always succeeds instantly. Never use blocking_write: this may run
        // inside an async context (lazy tenant creation).
        for event in &events {
            engine.replay_event(event);
        }

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::ServiceCreated { .. }
            | Event::ServiceRetired { .. }
            | Event::StaffCreated { .. }
            | Event::StaffDeactivated { .. } => self.apply_catalog_event(event),
            Event::DayCreated { day } => {
                let key = DayKey {
                    staff_id: day.staff_id,
                    date: day.date,
                };
                let state = self.store.day_state_or_insert(key);
                let mut guard = state.try_write().expect("replay: uncontended write");
                self.store.apply_day_event(&mut guard, event);
            }
            Event::DayUpdated { id, .. }
            | Event::DayTrashed { id, .. }
            | Event::DayRestored { id, .. }
            | Event::DayPurged { id } => {
                if let Some(key) = self.store.key_for_day(id)
                    && let Some(state) = self.store.day_state(&key)
                {
                    let mut guard = state.try_write().expect("replay: uncontended write");
                    self.store.apply_day_event(&mut guard, event);
                }
            }
            Event::BookingCreated { booking } => {
                let state = self.store.day_state_or_insert(booking.key());
                let mut guard = state.try_write().expect("replay: uncontended write");
                self.store.apply_day_event(&mut guard, event);
            }
            Event::BookingUpdated { booking } => {
                let new_key = booking.key();
                let old_key = self.store.key_for_booking(&booking.id).unwrap_or(new_key);
                let old_state = self.store.day_state_or_insert(old_key);
                let mut old_guard = old_state.try_write().expect("replay: uncontended write");
                if old_key == new_key {
                    self.store.apply_booking_update(&mut old_guard, None, booking);
                } else {
                    let new_state = self.store.day_state_or_insert(new_key);
                    let mut new_guard =
                        new_state.try_write().expect("replay: uncontended write");
                    self.store
                        .apply_booking_update(&mut old_guard, Some(&mut new_guard), booking);
                }
            }
            Event::BookingTrashed { id, .. }
            | Event::BookingRestored { id, .. }
            | Event::BookingPurged { id } => {
                if let Some(key) = self.store.key_for_booking(id)
                    && let Some(state) = self.store.day_state(&key)
                {
                    let mut guard = state.try_write().expect("replay: uncontended write");
                    self.store.apply_day_event(&mut guard, event);
                }
            }
        }
    }

    pub(super) fn apply_catalog_event(&self, event: &Event) {
        match event {
            Event::ServiceCreated { service } => {
                self.services.insert(service.clone());
            }
            Event::ServiceRetired { id } => {
                self.services.retire(id);
            }
            Event::StaffCreated { staff } => {
                self.staff.insert(staff.clone());
            }
            Event::StaffDeactivated { id } => {
                self.staff.deactivate(id);
            }
            _ => unreachable!("not a catalog event"),
        }
    }

    /// Write an event to the WAL via the background group-commit writer.
    /// This is the commit point: once it returns Ok the event is durable.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append then apply, for single-key events. Caller holds the guard.
    pub(super) async fn persist_and_apply(
        &self,
        state: &mut DayState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_day_event(state, event);
        Ok(())
    }

    /// Look up a booking's key and take the write lock on its state.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(DayKey, tokio::sync::OwnedRwLockWriteGuard<DayState>), EngineError> {
        let key = self
            .store
            .key_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let state = self
            .store
            .day_state(&key)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let guard = state.write_owned().await;
        Ok((key, guard))
    }

    /// Look up an availability record's key and take the write lock.
    pub(super) async fn resolve_day_write(
        &self,
        day_id: &Ulid,
    ) -> Result<(DayKey, tokio::sync::OwnedRwLockWriteGuard<DayState>), EngineError> {
        let key = self
            .store
            .key_for_day(day_id)
            .ok_or(EngineError::NotFound(*day_id))?;
        let state = self
            .store
            .day_state(&key)
            .ok_or(EngineError::NotFound(*day_id))?;
        let guard = state.write_owned().await;
        Ok((key, guard))
    }
}
