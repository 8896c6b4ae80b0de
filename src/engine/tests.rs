use std::path::PathBuf;
use std::sync::Arc;

use ulid::Ulid;

use crate::model::*;

use super::{BookingFilter, Engine, EngineError};

const H: Minute = 60;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("slotd_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn date(s: &str) -> DayDate {
    DayDate::parse(s).unwrap()
}

fn range(start: Minute, end: Minute) -> TimeRange {
    TimeRange::new(start, end)
}

fn slot(start: Minute, end: Minute) -> TimeSlot {
    TimeSlot {
        range: range(start, end),
        is_booked: false,
    }
}

fn mk_engine(name: &str) -> Engine {
    Engine::new(test_wal_path(name)).unwrap()
}

/// One staff member plus a 30-minute service.
async fn seed(engine: &Engine) -> (Ulid, Ulid) {
    let staff_id = Ulid::new();
    engine.create_staff(staff_id, "Dana".into()).await.unwrap();
    let service_id = Ulid::new();
    engine
        .create_service(service_id, "Cut".into(), 30, 2500)
        .await
        .unwrap();
    (staff_id, service_id)
}

async fn seed_day(
    engine: &Engine,
    staff_id: Ulid,
    day: DayDate,
    ranges: Vec<TimeRange>,
) -> Ulid {
    let id = Ulid::new();
    let slots = ranges
        .into_iter()
        .map(|range| TimeSlot {
            range,
            is_booked: false,
        })
        .collect();
    engine
        .create_day(id, staff_id, day, false, slots)
        .await
        .unwrap();
    id
}

fn request(staff_id: Ulid, service_id: Ulid, day: DayDate, start: Minute) -> BookingRequest {
    BookingRequest {
        id: Ulid::new(),
        customer: Customer {
            name: "Avery".into(),
            mobile: "0700123456".into(),
            email: None,
        },
        staff_id,
        service_id,
        date: day,
        start,
        price: 2500,
        notes: None,
    }
}

// ── Catalog ──────────────────────────────────────────────

#[tokio::test]
async fn service_duration_must_be_enumerated() {
    let engine = mk_engine("svc_duration.wal");
    let result = engine
        .create_service(Ulid::new(), "Odd".into(), 25, 1000)
        .await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
}

#[tokio::test]
async fn duplicate_staff_rejected() {
    let engine = mk_engine("dup_staff.wal");
    let id = Ulid::new();
    engine.create_staff(id, "A".into()).await.unwrap();
    let result = engine.create_staff(id, "B".into()).await;
    assert!(matches!(result, Err(EngineError::AlreadyExists(_))));
}

#[tokio::test]
async fn retired_service_not_bookable() {
    let engine = mk_engine("retired_svc.wal");
    let (staff_id, service_id) = seed(&engine).await;
    let day = date("2026-01-20");
    seed_day(&engine, staff_id, day, vec![range(9 * H, 12 * H)]).await;

    engine.retire_service(service_id).await.unwrap();
    let result = engine.create_booking(request(staff_id, service_id, day, 9 * H)).await;
    assert!(matches!(result, Err(EngineError::ServiceNotFound(_))));
}

// ── Availability calendar ────────────────────────────────

#[tokio::test]
async fn create_day_and_get_back() {
    let engine = mk_engine("day_create.wal");
    let (staff_id, _) = seed(&engine).await;
    let day = date("2026-01-20");
    let id = seed_day(&engine, staff_id, day, vec![range(9 * H, 12 * H)]).await;

    let fetched = engine.get_day_by_id(id).await.unwrap();
    assert_eq!(fetched.staff_id, staff_id);
    assert_eq!(fetched.slots.len(), 1);
    assert!(!fetched.is_day_off);

    let by_key = engine.get_day(staff_id, day).await.unwrap();
    assert_eq!(by_key.id, id);
}

#[tokio::test]
async fn duplicate_day_for_key_rejected() {
    let engine = mk_engine("day_dup.wal");
    let (staff_id, _) = seed(&engine).await;
    let day = date("2026-01-20");
    seed_day(&engine, staff_id, day, vec![range(9 * H, 12 * H)]).await;

    let result = engine
        .create_day(Ulid::new(), staff_id, day, false, vec![slot(13 * H, 17 * H)])
        .await;
    assert!(matches!(result, Err(EngineError::AlreadyExists(_))));
}

#[tokio::test]
async fn day_requires_slots_or_day_off() {
    let engine = mk_engine("day_validation.wal");
    let (staff_id, _) = seed(&engine).await;
    let result = engine
        .create_day(Ulid::new(), staff_id, date("2026-01-20"), false, vec![])
        .await;
    assert!(matches!(result, Err(EngineError::Validation(_))));

    // Day off with no slots is fine.
    engine
        .create_day(Ulid::new(), staff_id, date("2026-01-21"), true, vec![])
        .await
        .unwrap();
}

#[tokio::test]
async fn overlapping_slots_rejected_at_write() {
    let engine = mk_engine("day_slot_overlap.wal");
    let (staff_id, _) = seed(&engine).await;
    let result = engine
        .create_day(
            Ulid::new(),
            staff_id,
            date("2026-01-20"),
            false,
            vec![slot(9 * H, 11 * H), slot(10 * H, 12 * H)],
        )
        .await;
    assert!(matches!(result, Err(EngineError::Validation(_))));

    // Adjacent slots are fine.
    engine
        .create_day(
            Ulid::new(),
            staff_id,
            date("2026-01-20"),
            false,
            vec![slot(9 * H, 11 * H), slot(11 * H, 12 * H)],
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn day_for_unknown_staff_rejected() {
    let engine = mk_engine("day_unknown_staff.wal");
    let result = engine
        .create_day(Ulid::new(), Ulid::new(), date("2026-01-20"), true, vec![])
        .await;
    assert!(matches!(result, Err(EngineError::StaffNotFound(_))));
}

#[tokio::test]
async fn update_day_overwrites_slots() {
    let engine = mk_engine("day_update.wal");
    let (staff_id, _) = seed(&engine).await;
    let id = seed_day(&engine, staff_id, date("2026-01-20"), vec![range(9 * H, 12 * H)]).await;

    let updated = engine
        .update_day(id, None, Some(vec![slot(14 * H, 16 * H)]))
        .await
        .unwrap();
    assert_eq!(updated.slots.len(), 1);
    assert_eq!(updated.slots[0].range, range(14 * H, 16 * H));
}

#[tokio::test]
async fn update_day_to_day_off_clears_slots() {
    let engine = mk_engine("day_update_off.wal");
    let (staff_id, _) = seed(&engine).await;
    let id = seed_day(&engine, staff_id, date("2026-01-20"), vec![range(9 * H, 12 * H)]).await;

    let updated = engine.update_day(id, Some(true), None).await.unwrap();
    assert!(updated.is_day_off);
    assert!(updated.slots.is_empty());
}

#[tokio::test]
async fn day_trash_restore_purge_lifecycle() {
    let engine = mk_engine("day_lifecycle.wal");
    let (staff_id, _) = seed(&engine).await;
    let day = date("2026-01-20");
    let id = seed_day(&engine, staff_id, day, vec![range(9 * H, 12 * H)]).await;

    // Purge before trash fails.
    assert!(matches!(
        engine.purge_day(id).await,
        Err(EngineError::NotFound(_))
    ));

    engine.trash_day(id).await.unwrap();
    assert!(matches!(
        engine.get_day_by_id(id).await,
        Err(EngineError::NotFound(_))
    ));
    assert_eq!(engine.list_trashed_days().await.len(), 1);

    // Updating a trashed record fails.
    assert!(matches!(
        engine.update_day(id, Some(true), None).await,
        Err(EngineError::NotFound(_))
    ));

    engine.restore_day(id).await.unwrap();
    assert!(engine.get_day_by_id(id).await.is_ok());

    engine.trash_day(id).await.unwrap();
    engine.purge_day(id).await.unwrap();
    assert!(matches!(
        engine.get_day_by_id(id).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(engine.list_trashed_days().await.is_empty());
}

#[tokio::test]
async fn restore_blocked_by_replacement_day() {
    let engine = mk_engine("day_restore_conflict.wal");
    let (staff_id, _) = seed(&engine).await;
    let day = date("2026-01-20");
    let first = seed_day(&engine, staff_id, day, vec![range(9 * H, 12 * H)]).await;

    engine.trash_day(first).await.unwrap();
    // A replacement record now owns the key.
    seed_day(&engine, staff_id, day, vec![range(13 * H, 17 * H)]).await;

    assert!(matches!(
        engine.restore_day(first).await,
        Err(EngineError::AlreadyExists(_))
    ));
}

// ── Admission scenarios ──────────────────────────────────

#[tokio::test]
async fn booking_derives_end_from_service_duration() {
    let engine = mk_engine("booking_end.wal");
    let (staff_id, service_id) = seed(&engine).await;
    let day = date("2026-01-20");
    seed_day(&engine, staff_id, day, vec![range(9 * H, 12 * H)]).await;

    let booking = engine
        .create_booking(request(staff_id, service_id, day, 9 * H))
        .await
        .unwrap();
    assert_eq!(booking.range, range(9 * H, 9 * H + 30));
    assert_eq!(booking.status, BookingStatus::Booked);
    assert!(booking.reference.starts_with("BK-"));
}

#[tokio::test]
async fn overlapping_booking_is_slot_conflict() {
    let engine = mk_engine("booking_conflict.wal");
    let (staff_id, service_id) = seed(&engine).await;
    let day = date("2026-01-20");
    seed_day(&engine, staff_id, day, vec![range(9 * H, 12 * H)]).await;

    let first = engine
        .create_booking(request(staff_id, service_id, day, 9 * H))
        .await
        .unwrap();

    // 09:15–09:45 overlaps 09:00–09:30.
    match engine
        .create_booking(request(staff_id, service_id, day, 9 * H + 15))
        .await
    {
        Err(EngineError::SlotConflict(id)) => assert_eq!(id, first.id),
        other => panic!("expected SlotConflict, got {other:?}"),
    }
}

#[tokio::test]
async fn adjacent_booking_succeeds() {
    let engine = mk_engine("booking_adjacent.wal");
    let (staff_id, service_id) = seed(&engine).await;
    let day = date("2026-01-20");
    seed_day(&engine, staff_id, day, vec![range(9 * H, 12 * H)]).await;

    engine
        .create_booking(request(staff_id, service_id, day, 9 * H))
        .await
        .unwrap();
    // 09:30–10:00 is adjacent to 09:00–09:30, not overlapping.
    engine
        .create_booking(request(staff_id, service_id, day, 9 * H + 30))
        .await
        .unwrap();
}

#[tokio::test]
async fn no_calendar_day_is_no_availability() {
    let engine = mk_engine("booking_no_day.wal");
    let (staff_id, service_id) = seed(&engine).await;
    let result = engine
        .create_booking(request(staff_id, service_id, date("2026-01-20"), 9 * H))
        .await;
    assert!(matches!(result, Err(EngineError::NoAvailability)));
}

#[tokio::test]
async fn day_off_is_no_availability() {
    let engine = mk_engine("booking_day_off.wal");
    let (staff_id, service_id) = seed(&engine).await;
    let day = date("2026-01-20");
    engine
        .create_day(Ulid::new(), staff_id, day, true, vec![])
        .await
        .unwrap();

    let result = engine
        .create_booking(request(staff_id, service_id, day, 9 * H))
        .await;
    assert!(matches!(result, Err(EngineError::NoAvailability)));
}

#[tokio::test]
async fn request_outside_slots_is_no_availability() {
    let engine = mk_engine("booking_outside.wal");
    let (staff_id, service_id) = seed(&engine).await;
    let day = date("2026-01-20");
    seed_day(&engine, staff_id, day, vec![range(9 * H, 12 * H)]).await;

    // 11:45–12:15 pokes out of the 09:00–12:00 slot.
    let result = engine
        .create_booking(request(staff_id, service_id, day, 11 * H + 45))
        .await;
    assert!(matches!(result, Err(EngineError::NoAvailability)));
}

#[tokio::test]
async fn pre_blocked_slot_not_bookable() {
    let engine = mk_engine("booking_pre_blocked.wal");
    let (staff_id, service_id) = seed(&engine).await;
    let day = date("2026-01-20");
    let blocked = TimeSlot {
        range: range(9 * H, 10 * H),
        is_booked: true,
    };
    engine
        .create_day(
            Ulid::new(),
            staff_id,
            day,
            false,
            vec![blocked, slot(10 * H, 12 * H)],
        )
        .await
        .unwrap();

    // The flagged slot refuses admission even with an empty ledger.
    assert!(matches!(
        engine
            .create_booking(request(staff_id, service_id, day, 9 * H))
            .await,
        Err(EngineError::NoAvailability)
    ));
    // The open slot next to it admits normally.
    engine
        .create_booking(request(staff_id, service_id, day, 10 * H))
        .await
        .unwrap();
}

#[tokio::test]
async fn midnight_crossing_rejected() {
    let engine = mk_engine("booking_midnight.wal");
    let (staff_id, service_id) = seed(&engine).await;
    let day = date("2026-01-20");
    seed_day(&engine, staff_id, day, vec![range(23 * H, 24 * H)]).await;

    // 23:45 + 30min would cross midnight.
    let result = engine
        .create_booking(request(staff_id, service_id, day, 23 * H + 45))
        .await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
}

#[tokio::test]
async fn unknown_staff_and_service_are_distinguishable() {
    let engine = mk_engine("booking_unknowns.wal");
    let (staff_id, service_id) = seed(&engine).await;
    let day = date("2026-01-20");
    seed_day(&engine, staff_id, day, vec![range(9 * H, 12 * H)]).await;

    assert!(matches!(
        engine
            .create_booking(request(staff_id, Ulid::new(), day, 9 * H))
            .await,
        Err(EngineError::ServiceNotFound(_))
    ));
    assert!(matches!(
        engine
            .create_booking(request(Ulid::new(), service_id, day, 9 * H))
            .await,
        Err(EngineError::StaffNotFound(_))
    ));
}

#[tokio::test]
async fn cancellation_frees_capacity() {
    let engine = mk_engine("booking_cancel_frees.wal");
    let (staff_id, service_id) = seed(&engine).await;
    let day = date("2026-01-20");
    seed_day(&engine, staff_id, day, vec![range(9 * H, 12 * H)]).await;

    let first = engine
        .create_booking(request(staff_id, service_id, day, 9 * H))
        .await
        .unwrap();
    engine.trash_booking(first.id).await.unwrap();

    // The identical interval is free again.
    engine
        .create_booking(request(staff_id, service_id, day, 9 * H))
        .await
        .unwrap();
}

#[tokio::test]
async fn status_cancelled_frees_capacity() {
    let engine = mk_engine("booking_status_frees.wal");
    let (staff_id, service_id) = seed(&engine).await;
    let day = date("2026-01-20");
    seed_day(&engine, staff_id, day, vec![range(9 * H, 12 * H)]).await;

    let first = engine
        .create_booking(request(staff_id, service_id, day, 9 * H))
        .await
        .unwrap();
    engine
        .update_booking(
            first.id,
            BookingPatch {
                status: Some(BookingStatus::Cancelled),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    engine
        .create_booking(request(staff_id, service_id, day, 9 * H))
        .await
        .unwrap();
}

// ── Reschedule ───────────────────────────────────────────

#[tokio::test]
async fn reschedule_excludes_own_interval() {
    let engine = mk_engine("reschedule_self.wal");
    let (staff_id, service_id) = seed(&engine).await;
    let day = date("2026-01-20");
    seed_day(&engine, staff_id, day, vec![range(9 * H, 12 * H)]).await;

    let booking = engine
        .create_booking(request(staff_id, service_id, day, 9 * H))
        .await
        .unwrap();

    // 09:00→09:15 overlaps the booking's own current interval; that must
    // not count as a conflict.
    let updated = engine
        .update_booking(
            booking.id,
            BookingPatch {
                start: Some(9 * H + 15),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.range, range(9 * H + 15, 9 * H + 45));
}

#[tokio::test]
async fn reschedule_into_other_booking_conflicts() {
    let engine = mk_engine("reschedule_conflict.wal");
    let (staff_id, service_id) = seed(&engine).await;
    let day = date("2026-01-20");
    seed_day(&engine, staff_id, day, vec![range(9 * H, 12 * H)]).await;

    let first = engine
        .create_booking(request(staff_id, service_id, day, 9 * H))
        .await
        .unwrap();
    let second = engine
        .create_booking(request(staff_id, service_id, day, 10 * H))
        .await
        .unwrap();

    let result = engine
        .update_booking(
            second.id,
            BookingPatch {
                start: Some(9 * H + 15),
                ..Default::default()
            },
        )
        .await;
    match result {
        Err(EngineError::SlotConflict(id)) => assert_eq!(id, first.id),
        other => panic!("expected SlotConflict, got {other:?}"),
    }
    // The failed reschedule left the original interval untouched.
    let unchanged = engine.get_booking(second.id).await.unwrap();
    assert_eq!(unchanged.range, range(10 * H, 10 * H + 30));
}

#[tokio::test]
async fn reschedule_moves_between_dates() {
    let engine = mk_engine("reschedule_move.wal");
    let (staff_id, service_id) = seed(&engine).await;
    let day1 = date("2026-01-20");
    let day2 = date("2026-01-21");
    seed_day(&engine, staff_id, day1, vec![range(9 * H, 12 * H)]).await;
    seed_day(&engine, staff_id, day2, vec![range(9 * H, 12 * H)]).await;

    let booking = engine
        .create_booking(request(staff_id, service_id, day1, 9 * H))
        .await
        .unwrap();
    let moved = engine
        .update_booking(
            booking.id,
            BookingPatch {
                date: Some(day2),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(moved.date, day2);

    // Old interval is free, new one occupied.
    engine
        .create_booking(request(staff_id, service_id, day1, 9 * H))
        .await
        .unwrap();
    assert!(matches!(
        engine
            .create_booking(request(staff_id, service_id, day2, 9 * H))
            .await,
        Err(EngineError::SlotConflict(_))
    ));
}

#[tokio::test]
async fn reschedule_to_unavailable_date_fails() {
    let engine = mk_engine("reschedule_no_day.wal");
    let (staff_id, service_id) = seed(&engine).await;
    let day1 = date("2026-01-20");
    seed_day(&engine, staff_id, day1, vec![range(9 * H, 12 * H)]).await;

    let booking = engine
        .create_booking(request(staff_id, service_id, day1, 9 * H))
        .await
        .unwrap();
    let result = engine
        .update_booking(
            booking.id,
            BookingPatch {
                date: Some(date("2026-01-22")),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(result, Err(EngineError::NoAvailability)));
}

// ── Booking trash lifecycle ──────────────────────────────

#[tokio::test]
async fn booking_trash_restore_purge_lifecycle() {
    let engine = mk_engine("booking_lifecycle.wal");
    let (staff_id, service_id) = seed(&engine).await;
    let day = date("2026-01-20");
    seed_day(&engine, staff_id, day, vec![range(9 * H, 12 * H)]).await;

    let booking = engine
        .create_booking(request(staff_id, service_id, day, 9 * H))
        .await
        .unwrap();

    assert!(matches!(
        engine.purge_booking(booking.id).await,
        Err(EngineError::NotFound(_))
    ));

    engine.trash_booking(booking.id).await.unwrap();
    assert!(matches!(
        engine.get_booking(booking.id).await,
        Err(EngineError::NotFound(_))
    ));

    let restored = engine.restore_booking(booking.id).await.unwrap();
    assert!(restored.deleted_at.is_none());

    engine.trash_booking(booking.id).await.unwrap();
    engine.purge_booking(booking.id).await.unwrap();
    assert!(matches!(
        engine.restore_booking(booking.id).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn restore_into_occupied_interval_conflicts() {
    let engine = mk_engine("booking_restore_conflict.wal");
    let (staff_id, service_id) = seed(&engine).await;
    let day = date("2026-01-20");
    seed_day(&engine, staff_id, day, vec![range(9 * H, 12 * H)]).await;

    let first = engine
        .create_booking(request(staff_id, service_id, day, 9 * H))
        .await
        .unwrap();
    engine.trash_booking(first.id).await.unwrap();

    // Someone else takes the interval while the first sits in the trash.
    engine
        .create_booking(request(staff_id, service_id, day, 9 * H))
        .await
        .unwrap();

    assert!(matches!(
        engine.restore_booking(first.id).await,
        Err(EngineError::SlotConflict(_))
    ));
}

// ── Concurrency ──────────────────────────────────────────

#[tokio::test]
async fn at_most_one_winner_for_contended_interval() {
    let engine = Arc::new(mk_engine("concurrent_winner.wal"));
    let (staff_id, service_id) = seed(&engine).await;
    let day = date("2026-01-20");
    seed_day(&engine, staff_id, day, vec![range(9 * H, 12 * H)]).await;

    let n = 8;
    let mut handles = Vec::new();
    for _ in 0..n {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            eng.create_booking(request(staff_id, service_id, day, 9 * H))
                .await
        }));
    }

    let mut wins = 0;
    let mut conflicts = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => wins += 1,
            Err(EngineError::SlotConflict(_)) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(wins, 1);
    assert_eq!(conflicts, n - 1);
}

#[tokio::test]
async fn disjoint_intervals_all_win_concurrently() {
    let engine = Arc::new(mk_engine("concurrent_disjoint.wal"));
    let (staff_id, service_id) = seed(&engine).await;
    let day = date("2026-01-20");
    seed_day(&engine, staff_id, day, vec![range(9 * H, 17 * H)]).await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            eng.create_booking(request(staff_id, service_id, day, 9 * H + i * 30))
                .await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    let filter = BookingFilter {
        staff_id: Some(staff_id),
        date: Some(day),
        ..Default::default()
    };
    assert_eq!(engine.list_bookings(&filter).await.len(), 8);
}

#[tokio::test]
async fn committed_bookings_never_overlap() {
    let engine = Arc::new(mk_engine("concurrent_invariant.wal"));
    let (staff_id, service_id) = seed(&engine).await;
    let day = date("2026-01-20");
    seed_day(&engine, staff_id, day, vec![range(9 * H, 17 * H)]).await;

    // Deliberately clashing grid: starts every 15 minutes, 30-minute jobs.
    let mut handles = Vec::new();
    for i in 0..16 {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            eng.create_booking(request(staff_id, service_id, day, 9 * H + i * 15))
                .await
        }));
    }
    for h in handles {
        let _ = h.await.unwrap();
    }

    let filter = BookingFilter {
        staff_id: Some(staff_id),
        date: Some(day),
        ..Default::default()
    };
    let committed = engine.list_bookings(&filter).await;
    assert!(!committed.is_empty());
    for a in &committed {
        for b in &committed {
            if a.id != b.id {
                assert!(
                    !a.range.overlaps(&b.range),
                    "{:?} overlaps {:?}",
                    a.range,
                    b.range
                );
            }
        }
    }
}

// ── Availability query engine ────────────────────────────

#[tokio::test]
async fn query_returns_free_staff_in_directory_order() {
    let engine = mk_engine("query_order.wal");
    let service_id = Ulid::new();
    engine
        .create_service(service_id, "Cut".into(), 30, 2500)
        .await
        .unwrap();

    let day = date("2026-01-20");
    let staff_a = Ulid::from_parts(1000, 1);
    let staff_b = Ulid::from_parts(2000, 2);
    engine.create_staff(staff_a, "A".into()).await.unwrap();
    engine.create_staff(staff_b, "B".into()).await.unwrap();
    seed_day(&engine, staff_a, day, vec![range(9 * H, 12 * H)]).await;
    seed_day(&engine, staff_b, day, vec![range(9 * H, 12 * H)]).await;

    let available = engine
        .query_available_staff(day, 9 * H, service_id)
        .await
        .unwrap();
    let ids: Vec<Ulid> = available.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![staff_a, staff_b]);
}

#[tokio::test]
async fn query_excludes_day_off_and_busy_staff() {
    let engine = mk_engine("query_excludes.wal");
    let service_id = Ulid::new();
    engine
        .create_service(service_id, "Cut".into(), 30, 2500)
        .await
        .unwrap();

    let day = date("2026-01-20");
    let free = Ulid::from_parts(1000, 1);
    let off = Ulid::from_parts(2000, 2);
    let busy = Ulid::from_parts(3000, 3);
    let absent = Ulid::from_parts(4000, 4);
    for (id, name) in [(free, "free"), (off, "off"), (busy, "busy"), (absent, "absent")] {
        engine.create_staff(id, name.into()).await.unwrap();
    }
    seed_day(&engine, free, day, vec![range(9 * H, 12 * H)]).await;
    engine
        .create_day(Ulid::new(), off, day, true, vec![])
        .await
        .unwrap();
    seed_day(&engine, busy, day, vec![range(9 * H, 12 * H)]).await;
    engine
        .create_booking(request(busy, service_id, day, 9 * H))
        .await
        .unwrap();
    // `absent` has no calendar record at all.

    let available = engine
        .query_available_staff(day, 9 * H, service_id)
        .await
        .unwrap();
    let ids: Vec<Ulid> = available.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![free]);
}

#[tokio::test]
async fn query_sees_freed_capacity_after_cancel() {
    let engine = mk_engine("query_freed.wal");
    let (staff_id, service_id) = seed(&engine).await;
    let day = date("2026-01-20");
    seed_day(&engine, staff_id, day, vec![range(9 * H, 12 * H)]).await;

    let booking = engine
        .create_booking(request(staff_id, service_id, day, 9 * H))
        .await
        .unwrap();
    assert!(engine
        .query_available_staff(day, 9 * H, service_id)
        .await
        .unwrap()
        .is_empty());

    engine.trash_booking(booking.id).await.unwrap();
    assert_eq!(
        engine
            .query_available_staff(day, 9 * H, service_id)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn query_unknown_service_fails() {
    let engine = mk_engine("query_bad_service.wal");
    let result = engine
        .query_available_staff(date("2026-01-20"), 9 * H, Ulid::new())
        .await;
    assert!(matches!(result, Err(EngineError::ServiceNotFound(_))));
}

// ── Lookups ──────────────────────────────────────────────

#[tokio::test]
async fn bookings_found_by_customer_mobile() {
    let engine = mk_engine("query_mobile.wal");
    let (staff_id, service_id) = seed(&engine).await;
    let day = date("2026-01-20");
    seed_day(&engine, staff_id, day, vec![range(9 * H, 17 * H)]).await;

    let mut req = request(staff_id, service_id, day, 9 * H);
    req.customer.mobile = "0711111111".into();
    engine.create_booking(req).await.unwrap();
    let mut req = request(staff_id, service_id, day, 10 * H);
    req.customer.mobile = "0722222222".into();
    engine.create_booking(req).await.unwrap();

    let filter = BookingFilter {
        mobile: Some("0711111111".into()),
        ..Default::default()
    };
    let found = engine.list_bookings(&filter).await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].customer.mobile, "0711111111");
}

#[tokio::test]
async fn staff_calendar_listing_skips_trashed() {
    let engine = mk_engine("query_staff_days.wal");
    let (staff_id, _) = seed(&engine).await;
    let other = Ulid::new();
    engine.create_staff(other, "Other".into()).await.unwrap();

    let kept = seed_day(&engine, staff_id, date("2026-01-20"), vec![range(9 * H, 12 * H)]).await;
    let gone = seed_day(&engine, staff_id, date("2026-01-21"), vec![range(9 * H, 12 * H)]).await;
    seed_day(&engine, other, date("2026-01-20"), vec![range(9 * H, 12 * H)]).await;
    engine.trash_day(gone).await.unwrap();

    let days = engine.list_days_for_staff(staff_id).await;
    assert_eq!(days.len(), 1);
    assert_eq!(days[0].id, kept);
}

#[tokio::test]
async fn trashed_bookings_listed_separately() {
    let engine = mk_engine("query_trash.wal");
    let (staff_id, service_id) = seed(&engine).await;
    let day = date("2026-01-20");
    seed_day(&engine, staff_id, day, vec![range(9 * H, 17 * H)]).await;

    let keep = engine
        .create_booking(request(staff_id, service_id, day, 9 * H))
        .await
        .unwrap();
    let gone = engine
        .create_booking(request(staff_id, service_id, day, 10 * H))
        .await
        .unwrap();
    engine.trash_booking(gone.id).await.unwrap();

    let active = engine.list_bookings(&BookingFilter::default()).await;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, keep.id);

    let trashed = engine
        .list_bookings(&BookingFilter {
            trashed: true,
            ..Default::default()
        })
        .await;
    assert_eq!(trashed.len(), 1);
    assert_eq!(trashed[0].id, gone.id);
}

// ── WAL replay & compaction ──────────────────────────────

#[tokio::test]
async fn replay_reconstructs_admission_state() {
    let path = test_wal_path("replay_admission.wal");
    let day = date("2026-01-20");
    let (staff_id, service_id);
    {
        let engine = Engine::new(path.clone()).unwrap();
        (staff_id, service_id) = seed(&engine).await;
        seed_day(&engine, staff_id, day, vec![range(9 * H, 12 * H)]).await;
        engine
            .create_booking(request(staff_id, service_id, day, 9 * H))
            .await
            .unwrap();
    }

    let engine2 = Engine::new(path).unwrap();
    // The replayed ledger still defends the committed interval.
    assert!(matches!(
        engine2
            .create_booking(request(staff_id, service_id, day, 9 * H + 15))
            .await,
        Err(EngineError::SlotConflict(_))
    ));
    // And still admits the adjacent one.
    engine2
        .create_booking(request(staff_id, service_id, day, 9 * H + 30))
        .await
        .unwrap();
}

#[tokio::test]
async fn replay_preserves_trash_and_purge() {
    let path = test_wal_path("replay_trash.wal");
    let day = date("2026-01-20");
    let trashed_day_id;
    let purged_booking_id;
    {
        let engine = Engine::new(path.clone()).unwrap();
        let (staff_id, service_id) = seed(&engine).await;
        trashed_day_id = seed_day(&engine, staff_id, day, vec![range(9 * H, 12 * H)]).await;
        let booking = engine
            .create_booking(request(staff_id, service_id, day, 9 * H))
            .await
            .unwrap();
        purged_booking_id = booking.id;
        engine.trash_booking(booking.id).await.unwrap();
        engine.purge_booking(booking.id).await.unwrap();
        engine.trash_day(trashed_day_id).await.unwrap();
    }

    let engine2 = Engine::new(path).unwrap();
    assert!(matches!(
        engine2.get_day_by_id(trashed_day_id).await,
        Err(EngineError::NotFound(_))
    ));
    assert_eq!(engine2.list_trashed_days().await.len(), 1);
    assert!(matches!(
        engine2.get_booking(purged_booking_id).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn replay_follows_reschedule_across_dates() {
    let path = test_wal_path("replay_reschedule.wal");
    let day1 = date("2026-01-20");
    let day2 = date("2026-01-21");
    let booking_id;
    {
        let engine = Engine::new(path.clone()).unwrap();
        let (staff_id, service_id) = seed(&engine).await;
        seed_day(&engine, staff_id, day1, vec![range(9 * H, 12 * H)]).await;
        seed_day(&engine, staff_id, day2, vec![range(9 * H, 12 * H)]).await;
        let booking = engine
            .create_booking(request(staff_id, service_id, day1, 9 * H))
            .await
            .unwrap();
        booking_id = booking.id;
        engine
            .update_booking(
                booking.id,
                BookingPatch {
                    date: Some(day2),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    let engine2 = Engine::new(path).unwrap();
    let booking = engine2.get_booking(booking_id).await.unwrap();
    assert_eq!(booking.date, day2);
}

#[tokio::test]
async fn group_commit_batches_concurrent_appends() {
    let path = test_wal_path("group_commit.wal");
    let engine = Arc::new(Engine::new(path.clone()).unwrap());

    let n = 20;
    let mut handles = Vec::new();
    for i in 0..n {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            eng.create_staff(Ulid::new(), format!("S{i}")).await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
    assert_eq!(engine.list_staff().len(), n);

    let engine2 = Engine::new(path).unwrap();
    assert_eq!(engine2.list_staff().len(), n);
}

#[tokio::test]
async fn appends_counter_and_compaction() {
    let path = test_wal_path("compact_counter.wal");
    let engine = Engine::new(path.clone()).unwrap();
    assert_eq!(engine.wal_appends_since_compact().await, 0);

    let (staff_id, service_id) = seed(&engine).await;
    let day = date("2026-01-20");
    seed_day(&engine, staff_id, day, vec![range(9 * H, 12 * H)]).await;
    let booking = engine
        .create_booking(request(staff_id, service_id, day, 9 * H))
        .await
        .unwrap();
    engine.trash_booking(booking.id).await.unwrap();
    assert_eq!(engine.wal_appends_since_compact().await, 5);

    engine.compact_wal().await.unwrap();
    assert_eq!(engine.wal_appends_since_compact().await, 0);

    // Compacted WAL reproduces the full state, trash included.
    let engine2 = Engine::new(path).unwrap();
    assert_eq!(engine2.list_staff().len(), 1);
    assert_eq!(engine2.list_services().len(), 1);
    assert!(engine2.get_day(staff_id, day).await.is_ok());
    let trashed = engine2
        .list_bookings(&BookingFilter {
            trashed: true,
            ..Default::default()
        })
        .await;
    assert_eq!(trashed.len(), 1);
    assert_eq!(trashed[0].id, booking.id);
}

// ── Limits ───────────────────────────────────────────────

#[tokio::test]
async fn slots_per_day_capped() {
    let engine = mk_engine("limit_slots.wal");
    let (staff_id, _) = seed(&engine).await;

    let slots: Vec<TimeSlot> = (0..crate::limits::MAX_SLOTS_PER_DAY as i64 + 1)
        .map(|i| slot(i * 10, i * 10 + 5))
        .collect();
    let result = engine
        .create_day(Ulid::new(), staff_id, date("2026-01-20"), false, slots)
        .await;
    assert!(matches!(result, Err(EngineError::LimitExceeded(_))));
}

#[tokio::test]
async fn notes_length_capped() {
    let engine = mk_engine("limit_notes.wal");
    let (staff_id, service_id) = seed(&engine).await;
    let day = date("2026-01-20");
    seed_day(&engine, staff_id, day, vec![range(9 * H, 12 * H)]).await;

    let mut req = request(staff_id, service_id, day, 9 * H);
    req.notes = Some("x".repeat(crate::limits::MAX_NOTES_LEN + 1));
    assert!(matches!(
        engine.create_booking(req).await,
        Err(EngineError::LimitExceeded(_))
    ));
}
