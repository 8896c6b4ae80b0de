use ulid::Ulid;

#[derive(Debug)]
pub enum EngineError {
    /// Malformed input — the caller's fault, never retried.
    Validation(&'static str),
    NotFound(Ulid),
    /// A record already occupies the id or the `(staff, date)` key.
    AlreadyExists(Ulid),
    ServiceNotFound(Ulid),
    StaffNotFound(Ulid),
    /// No availability record, a day off, or no slot that fits the request.
    NoAvailability,
    /// An active booking overlaps the requested interval.
    SlotConflict(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "validation: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::ServiceNotFound(id) => write!(f, "service not found: {id}"),
            EngineError::StaffNotFound(id) => write!(f, "staff not found: {id}"),
            EngineError::NoAvailability => {
                write!(f, "no availability for the requested interval")
            }
            EngineError::SlotConflict(id) => {
                write!(f, "staff is already booked for this time: {id}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
