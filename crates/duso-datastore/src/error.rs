/// Errors surfaced by datastore operations. Timeouts and read-only
/// rejections are not fatal to the evaluator — built-ins translate them
/// into `error` values rather than propagating as Rust panics.
#[derive(Debug, thiserror::Error)]
pub enum DatastoreError {
    #[error("datastore operation timed out")]
    Timeout,

    #[error("namespace '{0}' is read-only")]
    ReadOnly(String),

    #[error("key '{key}' does not hold a {expected} value")]
    TypeMismatch { key: String, expected: &'static str },

    #[error("no persistence path configured for this datastore")]
    NoPersistencePath,

    #[error("datastore io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("datastore serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
