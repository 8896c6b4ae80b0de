use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// A range is admissible input only if it stays within one calendar day.
/// Crossing midnight is rejected outright, never wrapped.
pub(crate) fn validate_range(range: &TimeRange) -> Result<(), EngineError> {
    if range.start < 0 || range.start >= range.end {
        return Err(EngineError::Validation("start time must precede end time"));
    }
    if range.end > MINUTES_PER_DAY {
        return Err(EngineError::Validation(
            "interval must not cross midnight",
        ));
    }
    Ok(())
}

/// Step 3 of admission: some unbooked slot must fully contain the request.
pub(crate) fn slot_admits(day: &AvailabilityDay, range: &TimeRange) -> bool {
    day.slots
        .iter()
        .any(|slot| !slot.is_booked && slot.range.contains_range(range))
}

/// Admission steps 2–4 against one locked day state. Pure read; the caller
/// decides whether to commit while still holding the lock.
///
/// `exclude` skips one booking in the ledger scan — the booking being
/// rescheduled must not conflict with itself.
pub(crate) fn check_admission(
    state: &DayState,
    range: &TimeRange,
    exclude: Option<ulid::Ulid>,
) -> Result<(), EngineError> {
    let day = match state.active_day() {
        Some(day) if !day.is_day_off => day,
        _ => return Err(EngineError::NoAvailability),
    };
    if !slot_admits(day, range) {
        return Err(EngineError::NoAvailability);
    }
    if let Some(conflict) = state.overlapping_active(range, exclude).next() {
        return Err(EngineError::SlotConflict(conflict.id));
    }
    Ok(())
}
