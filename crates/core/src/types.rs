/// Job and scene identifiers (PostgreSQL BIGSERIAL).
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
