use ulid::Ulid;

use crate::limits::MAX_LIST_ROWS;
use crate::model::*;

use super::admission::{check_admission, validate_range};
use super::{Engine, EngineError};

/// Filters for booking lookups. `trashed` flips the scan to the soft-deleted
/// side of the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub id: Option<Ulid>,
    pub staff_id: Option<Ulid>,
    pub date: Option<DayDate>,
    pub mobile: Option<String>,
    pub trashed: bool,
}

impl Engine {
    // ── Catalog reads ────────────────────────────────────

    pub fn list_services(&self) -> Vec<Service> {
        self.services.list()
    }

    pub fn list_staff(&self) -> Vec<Staff> {
        self.staff.list()
    }

    // ── Calendar reads ───────────────────────────────────

    pub async fn get_day_by_id(&self, id: Ulid) -> Result<AvailabilityDay, EngineError> {
        let key = self
            .store
            .key_for_day(&id)
            .ok_or(EngineError::NotFound(id))?;
        let state = self
            .store
            .day_state(&key)
            .ok_or(EngineError::NotFound(id))?;
        let guard = state.read().await;
        guard
            .day_by_id(id)
            .filter(|d| d.is_active())
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    pub async fn get_day(
        &self,
        staff_id: Ulid,
        date: DayDate,
    ) -> Result<AvailabilityDay, EngineError> {
        let key = DayKey { staff_id, date };
        let state = self
            .store
            .day_state(&key)
            .ok_or(EngineError::NotFound(staff_id))?;
        let guard = state.read().await;
        guard
            .active_day()
            .cloned()
            .ok_or(EngineError::NotFound(staff_id))
    }

    pub async fn list_days_for_staff(&self, staff_id: Ulid) -> Vec<AvailabilityDay> {
        let mut keys: Vec<DayKey> = self
            .store
            .keys()
            .into_iter()
            .filter(|k| k.staff_id == staff_id)
            .collect();
        keys.sort();
        let mut days = Vec::new();
        for key in keys {
            if days.len() >= MAX_LIST_ROWS {
                break;
            }
            if let Some(state) = self.store.day_state(&key) {
                let guard = state.read().await;
                days.extend(guard.active_day().cloned());
            }
        }
        days
    }

    pub async fn list_trashed_days(&self) -> Vec<AvailabilityDay> {
        let mut keys = self.store.keys();
        keys.sort();
        let mut days = Vec::new();
        'outer: for key in keys {
            if let Some(state) = self.store.day_state(&key) {
                let guard = state.read().await;
                for day in guard.days.iter().filter(|d| !d.is_active()) {
                    days.push(day.clone());
                    if days.len() >= MAX_LIST_ROWS {
                        break 'outer;
                    }
                }
            }
        }
        days
    }

    // ── Ledger reads ─────────────────────────────────────

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let key = self
            .store
            .key_for_booking(&id)
            .ok_or(EngineError::NotFound(id))?;
        let state = self
            .store
            .day_state(&key)
            .ok_or(EngineError::NotFound(id))?;
        let guard = state.read().await;
        guard
            .booking_by_id(id)
            .filter(|b| b.deleted_at.is_none())
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    pub async fn list_bookings(&self, filter: &BookingFilter) -> Vec<Booking> {
        if let Some(id) = filter.id {
            let Some(key) = self.store.key_for_booking(&id) else {
                return Vec::new();
            };
            let Some(state) = self.store.day_state(&key) else {
                return Vec::new();
            };
            let guard = state.read().await;
            return guard
                .booking_by_id(id)
                .filter(|b| b.deleted_at.is_some() == filter.trashed)
                .cloned()
                .into_iter()
                .collect();
        }

        let mut keys: Vec<DayKey> = self
            .store
            .keys()
            .into_iter()
            .filter(|k| filter.staff_id.is_none_or(|s| k.staff_id == s))
            .filter(|k| filter.date.is_none_or(|d| k.date == d))
            .collect();
        keys.sort();

        let mut bookings = Vec::new();
        'outer: for key in keys {
            if let Some(state) = self.store.day_state(&key) {
                let guard = state.read().await;
                for booking in &guard.bookings {
                    if booking.deleted_at.is_some() != filter.trashed {
                        continue;
                    }
                    if let Some(ref mobile) = filter.mobile
                        && booking.customer.mobile != *mobile
                    {
                        continue;
                    }
                    bookings.push(booking.clone());
                    if bookings.len() >= MAX_LIST_ROWS {
                        break 'outer;
                    }
                }
            }
        }
        bookings
    }

    // ── Availability query engine ────────────────────────

    /// Which staff could take `(date, start)` for `service_id` right now?
    /// Evaluates the admission check read-only per staff member, in
    /// directory order. The answer can go stale immediately; the conflict
    /// resolver re-validates at commit time.
    pub async fn query_available_staff(
        &self,
        date: DayDate,
        start: Minute,
        service_id: Ulid,
    ) -> Result<Vec<Staff>, EngineError> {
        let service = self
            .services
            .get_active(&service_id)
            .ok_or(EngineError::ServiceNotFound(service_id))?;
        let range = TimeRange {
            start,
            end: start + service.duration_min,
        };
        validate_range(&range)?;

        let mut available = Vec::new();
        for staff in self.staff.list_active() {
            let key = DayKey {
                staff_id: staff.id,
                date,
            };
            let Some(state) = self.store.day_state(&key) else {
                continue;
            };
            let guard = state.read().await;
            if check_admission(&guard, &range, None).is_ok() {
                available.push(staff);
            }
        }
        Ok(available)
    }
}
