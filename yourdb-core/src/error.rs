//! Engine-wide error taxonomy.

use thiserror::Error;

/// Errors returned by the storage engine and catalog.
#[derive(Error, Debug)]
pub enum YourDbError {
    /// A record failed schema validation.
    #[error("schema violation on field '{field}': expected {expected}, got {got}")]
    SchemaViolation {
        field: String,
        expected: String,
        got: String,
    },

    /// A filter operand's kind did not match the declared field kind.
    #[error("kind mismatch on field '{field}': expected {expected}, got {got}")]
    KindMismatch {
        field: String,
        expected: String,
        got: String,
    },

    /// Insert conflicted with an existing primary key.
    #[error("duplicate primary key: {0}")]
    DuplicatePrimaryKey(String),

    /// An update transform attempted to change the primary key.
    #[error("primary key is immutable (entity '{entity}')")]
    PrimaryKeyImmutable { entity: String },

    /// Catalog: entity name already registered.
    #[error("entity '{0}' already exists")]
    EntityExists(String),

    /// Catalog: no entity registered under this name.
    #[error("entity '{0}' not found")]
    EntityNotFound(String),

    /// Catalog: schema failed structural validation at creation time.
    #[error("invalid schema for entity '{entity}': {reason}")]
    InvalidSchema { entity: String, reason: String },

    /// On open, a stored record's version has no reachable upgrade path.
    #[error("no upgrade path from version {from} to {to} for entity '{entity}'")]
    UpgradeChainBroken { entity: String, from: u64, to: u64 },

    /// Underlying storage failure, fatal to the current operation.
    #[error("I/O error during {context}: {source}")]
    IoError {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// A non-trailing frame failed codec validation.
    #[error("corrupt frame in log '{path}' at offset {offset}: {reason}")]
    CorruptFrame {
        path: String,
        offset: u64,
        reason: String,
    },

    /// A poisoned gate mutex; indicates a prior panic while holding the gate.
    #[error("concurrency gate poisoned for entity '{0}'")]
    GatePoisoned(String),

    /// A transient I/O error that was retried past the configured budget.
    #[error("transient I/O error in {context} after {attempts} attempts: {source}")]
    TransientIoExhausted {
        context: &'static str,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    /// Record serialization/deserialization failure.
    #[error("codec error: {0}")]
    Codec(String),
}

pub type Result<T> = std::result::Result<T, YourDbError>;

/// Classifies a raw I/O error, marking the genuinely transient kinds so
/// [`crate::persistence::io_utils::retry_io_operation`] knows what to retry.
pub(crate) fn is_transient(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted
    )
}
