//! Error types for the storage controller database core
//!
//! One error type is shared by the loader, the entity drivers, the number
//! pools and the three backend engines so that any failure can travel to the
//! transaction boundary unchanged.

use thiserror::Error;

/// Unified error type for the persistence core
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Object Graph Errors
    // =========================================================================
    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("Row {key} of table {table} references unknown {reference}")]
    UnresolvableReference {
        table: &'static str,
        key: String,
        reference: String,
    },

    #[error("{kind} {name} is still in use: {reason}")]
    StillInUse {
        kind: &'static str,
        name: String,
        reason: String,
    },

    #[error("Layer stack invariant violated: {0}")]
    StackInvariant(String),

    // =========================================================================
    // Parse / Validation Errors
    // =========================================================================
    #[error("Invalid value '{value}' in {table}.{column}: {reason}")]
    Parse {
        table: &'static str,
        column: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid {kind} '{value}': {reason}")]
    InvalidName {
        kind: &'static str,
        value: String,
        reason: String,
    },

    #[error("{kind} {value} is out of range [{min}, {max}]")]
    ValueOutOfRange {
        kind: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("Failed to load row {key} of table {table}: {source}")]
    Load {
        table: &'static str,
        key: String,
        #[source]
        source: Box<Error>,
    },

    // =========================================================================
    // Number Pool Errors
    // =========================================================================
    #[error("Number pool {pool} exhausted, no free value in [{min}, {max}]")]
    PoolExhausted { pool: &'static str, min: u32, max: u32 },

    #[error("Value {value} of number pool {pool} is already in use")]
    ValueInUse { pool: &'static str, value: u32 },

    // =========================================================================
    // Access Control Errors
    // =========================================================================
    #[error("Access denied: {identity} requires {required} on {object}")]
    AccessDenied {
        identity: String,
        object: String,
        required: String,
    },

    // =========================================================================
    // Backend Errors
    // =========================================================================
    #[error("Backend operation failed: {engine} - {operation}: {reason}")]
    Backend {
        engine: &'static str,
        operation: &'static str,
        reason: String,
    },

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("etcd error: {0}")]
    Etcd(#[from] etcd_client::Error),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    // =========================================================================
    // Serialization / IO Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an [`Error`], used by callers deciding how to
/// surface a failed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AlreadyExists,
    NotFound,
    Parse,
    PoolExhausted,
    ValueInUse,
    Backend,
    AccessDenied,
    Invalid,
    Internal,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Error::NotFound { .. } | Error::UnresolvableReference { .. } => ErrorKind::NotFound,
            Error::Parse { .. }
            | Error::InvalidName { .. }
            | Error::ValueOutOfRange { .. }
            | Error::JsonParse(_)
            | Error::YamlParse(_) => ErrorKind::Parse,
            Error::PoolExhausted { .. } => ErrorKind::PoolExhausted,
            Error::ValueInUse { .. } => ErrorKind::ValueInUse,
            Error::Backend { .. }
            | Error::Sql(_)
            | Error::Etcd(_)
            | Error::Kube(_)
            | Error::Io(_) => ErrorKind::Backend,
            Error::AccessDenied { .. } => ErrorKind::AccessDenied,
            Error::StillInUse { .. } | Error::StackInvariant(_) | Error::Configuration(_) => {
                ErrorKind::Invalid
            }
            Error::Load { source, .. } => source.kind(),
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Check if retrying the whole operation may succeed
    pub fn is_retryable(&self) -> bool {
        self.is_transient()
    }

    /// Check if this error is a transport or storage fault of a backend
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Etcd(_) | Error::Kube(_) | Error::Io(_) => true,
            Error::Sql(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            Error::Load { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Wrap a row failure with the table and primary key of the row
    pub fn in_row(self, table: &'static str, key: impl Into<String>) -> Self {
        match self {
            err @ Error::Load { .. } => err,
            other => Error::Load {
                table,
                key: key.into(),
                source: Box::new(other),
            },
        }
    }
}

/// Result type alias for the persistence core
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = Error::AlreadyExists {
            kind: "volume definition",
            name: "rscA/0".into(),
        };
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        let err = Error::ValueInUse {
            pool: "minor",
            value: 1000,
        };
        assert_eq!(err.kind(), ErrorKind::ValueInUse);
        assert!(!err.is_retryable());

        let err = Error::PoolExhausted {
            pool: "tcp port",
            min: 7000,
            max: 7001,
        };
        assert_eq!(err.kind(), ErrorKind::PoolExhausted);
    }

    #[test]
    fn test_load_wrapping() {
        let err = Error::Parse {
            table: "NODES",
            column: "NODE_NAME",
            value: "9bad".into(),
            reason: "must start with a letter".into(),
        }
        .in_row("NODES", "9bad");

        assert_eq!(err.kind(), ErrorKind::Parse);
        let text = err.to_string();
        assert!(text.contains("NODES"));
        assert!(text.contains("9bad"));

        // Wrapping twice keeps the innermost row
        let err = err.in_row("RESOURCES", "other");
        match err {
            Error::Load { table, .. } => assert_eq!(table, "NODES"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_error_transient() {
        let io = Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "reset"));
        assert!(io.is_transient());
        assert_eq!(io.kind(), ErrorKind::Backend);

        let config_err = Error::Configuration("invalid".into());
        assert!(!config_err.is_retryable());
        assert_eq!(config_err.kind(), ErrorKind::Invalid);
    }
}
