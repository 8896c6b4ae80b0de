use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::admission::{check_admission, now_ms, validate_range};
use super::{Engine, EngineError, WalCommand};

/// Validate and normalize a slot list: every range within the day, sorted by
/// start, pairwise non-overlapping. Non-overlap is enforced here, at write
/// time, so admission never has to reason about malformed calendars.
fn validate_slots(mut slots: Vec<TimeSlot>) -> Result<Vec<TimeSlot>, EngineError> {
    if slots.len() > MAX_SLOTS_PER_DAY {
        return Err(EngineError::LimitExceeded("too many slots for one day"));
    }
    for slot in &slots {
        validate_range(&slot.range)?;
    }
    slots.sort_by_key(|s| s.range.start);
    for pair in slots.windows(2) {
        if pair[0].range.overlaps(&pair[1].range) {
            return Err(EngineError::Validation("time slots must not overlap"));
        }
    }
    Ok(slots)
}

fn validate_customer(customer: &Customer) -> Result<(), EngineError> {
    if customer.name.trim().is_empty() {
        return Err(EngineError::Validation("customer name is required"));
    }
    if customer.mobile.trim().is_empty() {
        return Err(EngineError::Validation("customer mobile is required"));
    }
    if customer.name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("customer name too long"));
    }
    if customer.mobile.len() > MAX_MOBILE_LEN {
        return Err(EngineError::LimitExceeded("customer mobile too long"));
    }
    if let Some(ref email) = customer.email
        && email.len() > MAX_EMAIL_LEN
    {
        return Err(EngineError::LimitExceeded("customer email too long"));
    }
    Ok(())
}

impl Engine {
    // ── Service catalog ──────────────────────────────────

    pub async fn create_service(
        &self,
        id: Ulid,
        name: String,
        duration_min: Minute,
        price: i64,
    ) -> Result<Service, EngineError> {
        if name.trim().is_empty() {
            return Err(EngineError::Validation("service name is required"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("service name too long"));
        }
        if !ALLOWED_SERVICE_DURATIONS_MIN.contains(&duration_min) {
            return Err(EngineError::Validation(
                "service duration must be 15, 30, 45 or 60 minutes",
            ));
        }
        if price < 0 {
            return Err(EngineError::Validation("price must not be negative"));
        }
        if self.services.len() >= MAX_SERVICES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many services"));
        }
        if self.services.get(&id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }

        let service = Service {
            id,
            name,
            duration_min,
            price,
            active: true,
        };
        let event = Event::ServiceCreated {
            service: service.clone(),
        };
        self.wal_append(&event).await?;
        self.apply_catalog_event(&event);
        Ok(service)
    }

    pub async fn retire_service(&self, id: Ulid) -> Result<(), EngineError> {
        if self.services.get(&id).is_none() {
            return Err(EngineError::ServiceNotFound(id));
        }
        let event = Event::ServiceRetired { id };
        self.wal_append(&event).await?;
        self.apply_catalog_event(&event);
        Ok(())
    }

    // ── Staff directory ──────────────────────────────────

    pub async fn create_staff(&self, id: Ulid, name: String) -> Result<Staff, EngineError> {
        if name.trim().is_empty() {
            return Err(EngineError::Validation("staff name is required"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("staff name too long"));
        }
        if self.staff.len() >= MAX_STAFF_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many staff"));
        }
        if self.staff.get(&id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }

        let staff = Staff {
            id,
            name,
            active: true,
        };
        let event = Event::StaffCreated {
            staff: staff.clone(),
        };
        self.wal_append(&event).await?;
        self.apply_catalog_event(&event);
        Ok(staff)
    }

    pub async fn deactivate_staff(&self, id: Ulid) -> Result<(), EngineError> {
        if self.staff.get(&id).is_none() {
            return Err(EngineError::StaffNotFound(id));
        }
        let event = Event::StaffDeactivated { id };
        self.wal_append(&event).await?;
        self.apply_catalog_event(&event);
        Ok(())
    }

    // ── Availability calendar ────────────────────────────

    pub async fn create_day(
        &self,
        id: Ulid,
        staff_id: Ulid,
        date: DayDate,
        is_day_off: bool,
        slots: Vec<TimeSlot>,
    ) -> Result<AvailabilityDay, EngineError> {
        if self.staff.get_active(&staff_id).is_none() {
            return Err(EngineError::StaffNotFound(staff_id));
        }
        if !is_day_off && slots.is_empty() {
            return Err(EngineError::Validation(
                "time slots are required unless the day is a day off",
            ));
        }
        let slots = if is_day_off {
            Vec::new()
        } else {
            validate_slots(slots)?
        };
        if self.store.day_record_count() >= MAX_DAY_RECORDS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many availability records"));
        }
        if self.store.key_for_day(&id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }

        let key = DayKey { staff_id, date };
        let state = self.store.day_state_or_insert(key);
        let mut guard = state.write().await;
        if let Some(existing) = guard.active_day() {
            return Err(EngineError::AlreadyExists(existing.id));
        }

        let now = now_ms();
        let day = AvailabilityDay {
            id,
            staff_id,
            date,
            is_day_off,
            slots,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        let event = Event::DayCreated { day: day.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(day)
    }

    pub async fn update_day(
        &self,
        id: Ulid,
        day_off: Option<bool>,
        slots: Option<Vec<TimeSlot>>,
    ) -> Result<AvailabilityDay, EngineError> {
        let (_, mut guard) = self.resolve_day_write(&id).await?;
        let current = guard
            .day_by_id(id)
            .filter(|d| d.is_active())
            .ok_or(EngineError::NotFound(id))?;

        let is_day_off = day_off.unwrap_or(current.is_day_off);
        let new_slots = if is_day_off {
            Vec::new()
        } else {
            match slots {
                Some(new_slots) => {
                    if new_slots.is_empty() {
                        return Err(EngineError::Validation(
                            "time slots are required unless the day is a day off",
                        ));
                    }
                    validate_slots(new_slots)?
                }
                None => current.slots.clone(),
            }
        };

        let event = Event::DayUpdated {
            id,
            is_day_off,
            slots: new_slots,
            at: now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(guard.day_by_id(id).cloned().expect("day applied above"))
    }

    pub async fn trash_day(&self, id: Ulid) -> Result<AvailabilityDay, EngineError> {
        let (_, mut guard) = self.resolve_day_write(&id).await?;
        if !guard.day_by_id(id).is_some_and(|d| d.is_active()) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::DayTrashed { id, at: now_ms() };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(guard.day_by_id(id).cloned().expect("day applied above"))
    }

    pub async fn restore_day(&self, id: Ulid) -> Result<AvailabilityDay, EngineError> {
        let (_, mut guard) = self.resolve_day_write(&id).await?;
        if !guard.day_by_id(id).is_some_and(|d| !d.is_active()) {
            return Err(EngineError::NotFound(id));
        }
        if let Some(active) = guard.active_day() {
            // The key must hold at most one live record.
            return Err(EngineError::AlreadyExists(active.id));
        }
        let event = Event::DayRestored { id, at: now_ms() };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(guard.day_by_id(id).cloned().expect("day applied above"))
    }

    pub async fn purge_day(&self, id: Ulid) -> Result<(), EngineError> {
        let (_, mut guard) = self.resolve_day_write(&id).await?;
        if !guard.day_by_id(id).is_some_and(|d| !d.is_active()) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::DayPurged { id };
        self.persist_and_apply(&mut guard, &event).await
    }

    // ── Booking ledger (conflict resolver commit path) ───

    pub async fn create_booking(&self, req: BookingRequest) -> Result<Booking, EngineError> {
        validate_customer(&req.customer)?;
        if req.price < 0 {
            return Err(EngineError::Validation("price must not be negative"));
        }
        if let Some(ref notes) = req.notes
            && notes.len() > MAX_NOTES_LEN
        {
            return Err(EngineError::LimitExceeded("notes too long"));
        }
        let service = self
            .services
            .get_active(&req.service_id)
            .ok_or(EngineError::ServiceNotFound(req.service_id))?;
        if self.staff.get_active(&req.staff_id).is_none() {
            return Err(EngineError::StaffNotFound(req.staff_id));
        }
        let range = TimeRange {
            start: req.start,
            end: req.start + service.duration_min,
        };
        validate_range(&range)?;
        if self.store.key_for_booking(&req.id).is_some() {
            return Err(EngineError::AlreadyExists(req.id));
        }

        let key = DayKey {
            staff_id: req.staff_id,
            date: req.date,
        };
        let state = self.store.day_state_or_insert(key);
        // Admission and commit form one critical section per (staff, date).
        let mut guard = state.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many bookings for one day"));
        }
        check_admission(&guard, &range, None)?;

        let now = now_ms();
        let booking = Booking {
            id: req.id,
            reference: format!("BK-{}", req.id),
            customer: req.customer,
            staff_id: req.staff_id,
            service_id: req.service_id,
            date: req.date,
            range,
            status: BookingStatus::Booked,
            price: req.price,
            notes: req.notes,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(booking)
    }

    /// Reschedule or otherwise amend a booking. Re-runs the full admission
    /// algorithm against the target interval, excluding the booking itself,
    /// and only then applies the update.
    pub async fn update_booking(
        &self,
        id: Ulid,
        patch: BookingPatch,
    ) -> Result<Booking, EngineError> {
        if let Some(price) = patch.price
            && price < 0
        {
            return Err(EngineError::Validation("price must not be negative"));
        }
        if let Some(ref notes) = patch.notes
            && notes.len() > MAX_NOTES_LEN
        {
            return Err(EngineError::LimitExceeded("notes too long"));
        }

        let old_key = self
            .store
            .key_for_booking(&id)
            .ok_or(EngineError::NotFound(id))?;
        let current = {
            let state = self
                .store
                .day_state(&old_key)
                .ok_or(EngineError::NotFound(id))?;
            let guard = state.read().await;
            guard
                .booking_by_id(id)
                .filter(|b| b.deleted_at.is_none())
                .cloned()
                .ok_or(EngineError::NotFound(id))?
        };

        let staff_id = patch.staff_id.unwrap_or(current.staff_id);
        let service_id = patch.service_id.unwrap_or(current.service_id);
        let date = patch.date.unwrap_or(current.date);
        let start = patch.start.unwrap_or(current.range.start);
        let status = patch.status.unwrap_or(current.status);

        let service = self
            .services
            .get_active(&service_id)
            .ok_or(EngineError::ServiceNotFound(service_id))?;
        if staff_id != current.staff_id && self.staff.get_active(&staff_id).is_none() {
            return Err(EngineError::StaffNotFound(staff_id));
        }
        let range = TimeRange {
            start,
            end: start + service.duration_min,
        };
        validate_range(&range)?;

        let new_key = DayKey { staff_id, date };

        // Write guards in key order so two concurrent reschedules touching
        // the same pair of keys cannot deadlock.
        let (mut old_guard, mut new_guard) = if new_key == old_key {
            let state = self
                .store
                .day_state(&old_key)
                .ok_or(EngineError::NotFound(id))?;
            (state.write_owned().await, None)
        } else {
            let old_state = self
                .store
                .day_state(&old_key)
                .ok_or(EngineError::NotFound(id))?;
            let new_state = self.store.day_state_or_insert(new_key);
            if new_key < old_key {
                let ng = new_state.write_owned().await;
                let og = old_state.write_owned().await;
                (og, Some(ng))
            } else {
                let og = old_state.write_owned().await;
                let ng = new_state.write_owned().await;
                (og, Some(ng))
            }
        };

        // The booking may have been trashed or rescheduled between the
        // snapshot and lock acquisition.
        let current = old_guard
            .booking_by_id(id)
            .filter(|b| b.deleted_at.is_none())
            .cloned()
            .ok_or(EngineError::NotFound(id))?;

        if let Some(ref ng) = new_guard
            && ng.bookings.len() >= MAX_BOOKINGS_PER_DAY
        {
            return Err(EngineError::LimitExceeded("too many bookings for one day"));
        }

        if status == BookingStatus::Booked {
            let exclude = (new_key == old_key).then_some(id);
            let target: &DayState = match &new_guard {
                Some(ng) => ng,
                None => &old_guard,
            };
            check_admission(target, &range, exclude)?;
        }

        let updated = Booking {
            id,
            reference: current.reference.clone(),
            customer: current.customer.clone(),
            staff_id,
            service_id,
            date,
            range,
            status,
            price: patch.price.unwrap_or(current.price),
            notes: patch.notes.or_else(|| current.notes.clone()),
            deleted_at: None,
            created_at: current.created_at,
            updated_at: now_ms(),
        };
        let event = Event::BookingUpdated {
            booking: updated.clone(),
        };
        self.wal_append(&event).await?;
        self.store
            .apply_booking_update(&mut old_guard, new_guard.as_deref_mut(), &updated);
        Ok(updated)
    }

    /// Soft-delete. The interval is freed implicitly: trashed bookings are
    /// excluded from overlap scans. The advisory slot flag is left as is.
    pub async fn trash_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let (_, mut guard) = self.resolve_booking_write(&id).await?;
        if !guard
            .booking_by_id(id)
            .is_some_and(|b| b.deleted_at.is_none())
        {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::BookingTrashed { id, at: now_ms() };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(guard.booking_by_id(id).cloned().expect("booking applied above"))
    }

    /// Restoring a still-`booked` record re-occupies its interval, so it
    /// re-runs admission first.
    pub async fn restore_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let (_, mut guard) = self.resolve_booking_write(&id).await?;
        let booking = guard
            .booking_by_id(id)
            .filter(|b| b.deleted_at.is_some())
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        if booking.status == BookingStatus::Booked {
            check_admission(&guard, &booking.range, Some(id))?;
        }
        let event = Event::BookingRestored { id, at: now_ms() };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(guard.booking_by_id(id).cloned().expect("booking applied above"))
    }

    pub async fn purge_booking(&self, id: Ulid) -> Result<(), EngineError> {
        let (_, mut guard) = self.resolve_booking_write(&id).await?;
        if !guard
            .booking_by_id(id)
            .is_some_and(|b| b.deleted_at.is_some())
        {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::BookingPurged { id };
        self.persist_and_apply(&mut guard, &event).await
    }

    // ── WAL maintenance ──────────────────────────────────

    /// Rewrite the WAL with the minimal event set that recreates the current
    /// state. Record-bearing events carry their soft-delete markers, so the
    /// trash survives compaction.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();
        for service in self.services.list() {
            events.push(Event::ServiceCreated { service });
        }
        for staff in self.staff.list() {
            events.push(Event::StaffCreated { staff });
        }
        for key in self.store.keys() {
            let Some(state) = self.store.day_state(&key) else {
                continue;
            };
            let guard = state.read().await;
            for day in &guard.days {
                events.push(Event::DayCreated { day: day.clone() });
            }
            for booking in &guard.bookings {
                events.push(Event::BookingCreated {
                    booking: booking.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
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
