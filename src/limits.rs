//! Hard caps. Everything here is a guard against unbounded input, not a
//! tuning knob.

pub const MAX_TENANTS: usize = 64;
pub const MAX_TENANT_NAME_LEN: usize = 64;

pub const MAX_STAFF_PER_TENANT: usize = 10_000;
pub const MAX_SERVICES_PER_TENANT: usize = 10_000;
pub const MAX_DAY_RECORDS_PER_TENANT: usize = 1_000_000;

pub const MAX_SLOTS_PER_DAY: usize = 64;
pub const MAX_BOOKINGS_PER_DAY: usize = 512;

pub const MAX_NAME_LEN: usize = 128;
pub const MAX_MOBILE_LEN: usize = 32;
pub const MAX_EMAIL_LEN: usize = 128;
pub const MAX_NOTES_LEN: usize = 1024;

/// Row cap for list-shaped SELECTs.
pub const MAX_LIST_ROWS: usize = 1000;

/// Upper bound on a single WAL entry payload. Entries claiming more are
/// treated as corruption during replay.
pub const MAX_WAL_ENTRY_BYTES: usize = 1 << 20;

/// Service durations accepted by the catalog, in minutes.
pub const ALLOWED_SERVICE_DURATIONS_MIN: [i64; 4] = [15, 30, 45, 60];
