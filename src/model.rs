use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — used for audit timestamps only.
pub type Ms = i64;

/// Minutes since midnight — the only time-of-day type.
pub type Minute = i64;

pub const MINUTES_PER_DAY: Minute = 24 * 60;

/// Half-open time-of-day interval `[start, end)` in minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Minute,
    pub end: Minute,
}

impl TimeRange {
    pub fn new(start: Minute, end: Minute) -> Self {
        debug_assert!(start < end, "TimeRange start must be before end");
        Self { start, end }
    }

    pub fn duration_min(&self) -> Minute {
        self.end - self.start
    }

    /// The single source of truth for every conflict check. Adjacent ranges
    /// (`a.end == b.start`) do not overlap; identical ranges do.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_range(&self, other: &TimeRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Parse `HH:mm` into minutes since midnight. `24:00` is accepted so a slot
/// may end exactly at midnight; anything past that is rejected.
pub fn parse_hhmm(s: &str) -> Option<Minute> {
    let (h, m) = s.split_once(':')?;
    if h.len() != 2 || m.len() != 2 || !s.bytes().all(|b| b.is_ascii_digit() || b == b':') {
        return None;
    }
    let h: Minute = h.parse().ok()?;
    let m: Minute = m.parse().ok()?;
    if h == 24 && m == 0 {
        return Some(MINUTES_PER_DAY);
    }
    if h > 23 || m > 59 {
        return None;
    }
    Some(h * 60 + m)
}

pub fn format_hhmm(minute: Minute) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

/// A calendar day, `YYYY-MM-DD` at the boundary. No timezone semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DayDate {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

impl DayDate {
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('-');
        let (y, m, d) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() || y.len() != 4 || m.len() != 2 || d.len() != 2 {
            return None;
        }
        let year: u16 = y.parse().ok()?;
        let month: u8 = m.parse().ok()?;
        let day: u8 = d.parse().ok()?;
        if month == 0 || month > 12 || day == 0 || day > days_in_month(year, month) {
            return None;
        }
        Some(Self { year, month, day })
    }
}

impl fmt::Display for DayDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

fn days_in_month(year: u16, month: u8) -> u8 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            let leap = (year % 4 == 0 && year % 100 != 0) || year % 400 == 0;
            if leap { 29 } else { 28 }
        }
        _ => 0,
    }
}

/// The unit of mutual exclusion: one lock per staff member per day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DayKey {
    pub staff_id: Ulid,
    pub date: DayDate,
}

/// A bookable sub-interval of a staff member's day. `is_booked` is calendar
/// data: admission refuses a flagged slot, but the commit path never writes
/// the flag — the booking ledger is the durable truth for conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub range: TimeRange,
    pub is_booked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityDay {
    pub id: Ulid,
    pub staff_id: Ulid,
    pub date: DayDate,
    pub is_day_off: bool,
    /// Sorted by start, pairwise non-overlapping. Empty when day off.
    pub slots: Vec<TimeSlot>,
    pub deleted_at: Option<Ms>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl AvailabilityDay {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Booked,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Booked => "booked",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "booked" => Some(BookingStatus::Booked),
            "completed" => Some(BookingStatus::Completed),
            "cancelled" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    pub mobile: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    /// Human-readable reference handed to the customer.
    pub reference: String,
    pub customer: Customer,
    pub staff_id: Ulid,
    pub service_id: Ulid,
    pub date: DayDate,
    /// End is derived from the service duration at admission time.
    pub range: TimeRange,
    pub status: BookingStatus,
    /// Integer minor units.
    pub price: i64,
    pub notes: Option<String>,
    pub deleted_at: Option<Ms>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Booking {
    /// Whether this record participates in overlap checks.
    pub fn blocks_overlap(&self) -> bool {
        self.status == BookingStatus::Booked && self.deleted_at.is_none()
    }

    pub fn key(&self) -> DayKey {
        DayKey {
            staff_id: self.staff_id,
            date: self.date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub name: String,
    pub duration_min: Minute,
    pub price: i64,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Staff {
    pub id: Ulid,
    pub name: String,
    pub active: bool,
}

/// Everything the conflict resolver needs for one `(staff, date)` key, held
/// behind a single lock: the calendar records and the ledger entries.
#[derive(Debug, Clone)]
pub struct DayState {
    pub key: DayKey,
    /// Active plus trashed calendar records; at most one active.
    pub days: Vec<AvailabilityDay>,
    /// Ledger entries sorted by `range.start`, including soft-deleted ones.
    pub bookings: Vec<Booking>,
}

impl DayState {
    pub fn new(key: DayKey) -> Self {
        Self {
            key,
            days: Vec::new(),
            bookings: Vec::new(),
        }
    }

    pub fn active_day(&self) -> Option<&AvailabilityDay> {
        self.days.iter().find(|d| d.is_active())
    }

    pub fn active_day_mut(&mut self) -> Option<&mut AvailabilityDay> {
        self.days.iter_mut().find(|d| d.is_active())
    }

    pub fn day_by_id(&self, id: Ulid) -> Option<&AvailabilityDay> {
        self.days.iter().find(|d| d.id == id)
    }

    pub fn day_by_id_mut(&mut self, id: Ulid) -> Option<&mut AvailabilityDay> {
        self.days.iter_mut().find(|d| d.id == id)
    }

    pub fn remove_day(&mut self, id: Ulid) -> Option<AvailabilityDay> {
        let pos = self.days.iter().position(|d| d.id == id)?;
        Some(self.days.remove(pos))
    }

    /// Insert maintaining sort order by range.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.range.start, |b| b.range.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn booking_by_id(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_by_id_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    /// Active bookings whose range overlaps `query`, skipping `exclude`.
    /// Binary search skips everything that starts at or after `query.end`.
    pub fn overlapping_active<'a>(
        &'a self,
        query: &'a TimeRange,
        exclude: Option<Ulid>,
    ) -> impl Iterator<Item = &'a Booking> {
        let right_bound = self.bookings.partition_point(|b| b.range.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.range.end > query.start)
            .filter(|b| b.blocks_overlap())
            .filter(move |b| Some(b.id) != exclude)
    }
}

/// The WAL record format. Record-bearing events carry the full entity so
/// replay and compaction apply them verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ServiceCreated {
        service: Service,
    },
    ServiceRetired {
        id: Ulid,
    },
    StaffCreated {
        staff: Staff,
    },
    StaffDeactivated {
        id: Ulid,
    },
    DayCreated {
        day: AvailabilityDay,
    },
    DayUpdated {
        id: Ulid,
        is_day_off: bool,
        slots: Vec<TimeSlot>,
        at: Ms,
    },
    DayTrashed {
        id: Ulid,
        at: Ms,
    },
    DayRestored {
        id: Ulid,
        at: Ms,
    },
    DayPurged {
        id: Ulid,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingUpdated {
        booking: Booking,
    },
    BookingTrashed {
        id: Ulid,
        at: Ms,
    },
    BookingRestored {
        id: Ulid,
        at: Ms,
    },
    BookingPurged {
        id: Ulid,
    },
}

/// Booking fields supplied by the caller; everything else is derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub id: Ulid,
    pub customer: Customer,
    pub staff_id: Ulid,
    pub service_id: Ulid,
    pub date: DayDate,
    pub start: Minute,
    pub price: i64,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingPatch {
    pub staff_id: Option<Ulid>,
    pub service_id: Option<Ulid>,
    pub date: Option<DayDate>,
    pub start: Option<Minute>,
    pub status: Option<BookingStatus>,
    pub price: Option<i64>,
    pub notes: Option<String>,
}
