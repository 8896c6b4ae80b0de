//! slotd — a staff-day slot allocation engine speaking the Postgres wire
//! protocol. Availability calendars and a booking ledger live behind one
//! lock per `(staff, date)` key; admission checks and commits run inside
//! that critical section, backed by an append-only WAL.

pub mod auth;
pub mod catalog;
pub mod compactor;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod sql;
pub mod tenant;
pub mod tls;
pub mod wal;
pub mod wire;
