use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

pub type SharedDayState = Arc<RwLock<DayState>>;

/// In-memory store of per-key day states plus the reverse indexes that let
/// id-addressed operations find the right lock.
pub struct DayStore {
    days: DashMap<DayKey, SharedDayState>,
    /// AvailabilityDay id → key. Covers trashed records too.
    day_index: DashMap<Ulid, DayKey>,
    /// Booking id → key it currently lives under.
    booking_index: DashMap<Ulid, DayKey>,
}

impl Default for DayStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DayStore {
    pub fn new() -> Self {
        Self {
            days: DashMap::new(),
            day_index: DashMap::new(),
            booking_index: DashMap::new(),
        }
    }

    pub fn day_state(&self, key: &DayKey) -> Option<SharedDayState> {
        self.days.get(key).map(|e| e.value().clone())
    }

    /// Lazily create the state entry for a key. Entries are never removed;
    /// a purged key just holds an empty state.
    pub fn day_state_or_insert(&self, key: DayKey) -> SharedDayState {
        self.days
            .entry(key)
            .or_insert_with(|| Arc::new(RwLock::new(DayState::new(key))))
            .value()
            .clone()
    }

    pub fn key_for_day(&self, day_id: &Ulid) -> Option<DayKey> {
        self.day_index.get(day_id).map(|e| *e.value())
    }

    pub fn key_for_booking(&self, booking_id: &Ulid) -> Option<DayKey> {
        self.booking_index.get(booking_id).map(|e| *e.value())
    }

    pub fn keys(&self) -> Vec<DayKey> {
        self.days.iter().map(|e| *e.key()).collect()
    }

    pub fn day_record_count(&self) -> usize {
        self.day_index.len()
    }

    /// Apply a day-scoped event to a locked state, maintaining the indexes.
    /// `BookingUpdated` is not handled here — it may span two keys, so the
    /// engine applies it with both guards in hand.
    pub fn apply_day_event(&self, state: &mut DayState, event: &Event) {
        match event {
            Event::DayCreated { day } => {
                self.day_index.insert(day.id, state.key);
                state.days.push(day.clone());
            }
            Event::DayUpdated {
                id,
                is_day_off,
                slots,
                at,
            } => {
                if let Some(day) = state.day_by_id_mut(*id) {
                    day.is_day_off = *is_day_off;
                    day.slots = slots.clone();
                    day.updated_at = *at;
                }
            }
            Event::DayTrashed { id, at } => {
                if let Some(day) = state.day_by_id_mut(*id) {
                    day.deleted_at = Some(*at);
                    day.updated_at = *at;
                }
            }
            Event::DayRestored { id, at } => {
                if let Some(day) = state.day_by_id_mut(*id) {
                    day.deleted_at = None;
                    day.updated_at = *at;
                }
            }
            Event::DayPurged { id } => {
                state.remove_day(*id);
                self.day_index.remove(id);
            }
            Event::BookingCreated { booking } => {
                self.booking_index.insert(booking.id, state.key);
                state.insert_booking(booking.clone());
            }
            Event::BookingTrashed { id, at } => {
                if let Some(booking) = state.booking_by_id_mut(*id) {
                    booking.deleted_at = Some(*at);
                    booking.updated_at = *at;
                }
            }
            Event::BookingRestored { id, at } => {
                if let Some(booking) = state.booking_by_id_mut(*id) {
                    booking.deleted_at = None;
                    booking.updated_at = *at;
                }
            }
            Event::BookingPurged { id } => {
                state.remove_booking(*id);
                self.booking_index.remove(id);
            }
            Event::BookingUpdated { .. }
            | Event::ServiceCreated { .. }
            | Event::ServiceRetired { .. }
            | Event::StaffCreated { .. }
            | Event::StaffDeactivated { .. } => {
                unreachable!("not a single-key day event")
            }
        }
    }

    /// Replace a booking after an update, possibly moving it between keys.
    /// `new_state` is `None` when the booking stays under the same key as
    /// `old_state`. Caller holds the write guards.
    pub fn apply_booking_update(
        &self,
        old_state: &mut DayState,
        new_state: Option<&mut DayState>,
        booking: &Booking,
    ) {
        old_state.remove_booking(booking.id);
        let target = match new_state {
            Some(state) => state,
            None => old_state,
        };
        self.booking_index.insert(booking.id, target.key);
        target.insert_booking(booking.clone());
    }
}
