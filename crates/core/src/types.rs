/// Externally visible identifier of one job invocation.
pub type RunId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Generate a fresh run id (UUID v4).
pub fn new_run_id() -> RunId {
    uuid::Uuid::new_v4().to_string()
}
