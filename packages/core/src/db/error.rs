//! Database Error Types
//!
//! This module defines error types for database operations, providing
//! clear error handling for connection, initialization, and query failures.

use std::path::PathBuf;
use thiserror::Error;

/// Database operation errors
///
/// Covers connection, initialization and statement failures. Domain-level
/// failures (missing nodes, hierarchy violations) are reported by the service
/// layer's `HierarchyError`.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to establish database connection
    #[error("Failed to connect to database at {path}: {source}")]
    ConnectionFailed {
        path: PathBuf,
        source: libsql::Error,
    },

    /// Failed to initialize database schema
    #[error("Failed to initialize database schema: {0}")]
    InitializationFailed(String),

    /// Permission denied when accessing database
    #[error("Permission denied for database path: {path}")]
    PermissionDenied { path: PathBuf },

    /// Failed to create parent directory
    #[error("Failed to create parent directory for database: {0}")]
    DirectoryCreationFailed(#[from] std::io::Error),

    /// libsql operation error
    #[error("Database operation failed: {0}")]
    LibsqlError(#[from] libsql::Error),

    /// A statement failed; the libsql error keeps the SQLite result code
    #[error("{context}: {source}")]
    Statement {
        context: String,
        #[source]
        source: libsql::Error,
    },

    /// SQL execution error with context
    #[error("SQL execution failed: {context}")]
    SqlExecutionError { context: String },

    /// A stored row could not be encoded or decoded
    #[error("Row encoding failed: {0}")]
    Encoding(String),
}

/// Primary SQLite result codes (the low byte of an extended code)
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const SQLITE_CONSTRAINT: i32 = 19;

impl DatabaseError {
    /// Create a connection failed error
    pub fn connection_failed(path: PathBuf, source: libsql::Error) -> Self {
        Self::ConnectionFailed { path, source }
    }

    /// Create an initialization failed error
    pub fn initialization_failed(msg: impl Into<String>) -> Self {
        Self::InitializationFailed(msg.into())
    }

    /// Create a permission denied error
    pub fn permission_denied(path: PathBuf) -> Self {
        Self::PermissionDenied { path }
    }

    /// Create a SQL execution error with context
    pub fn sql_execution(context: impl Into<String>) -> Self {
        Self::SqlExecutionError {
            context: context.into(),
        }
    }

    /// Wrap a failed libsql call with what was being attempted
    pub fn statement(context: impl Into<String>, source: libsql::Error) -> Self {
        Self::Statement {
            context: context.into(),
            source,
        }
    }

    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding(msg.into())
    }

    /// Primary SQLite result code of the underlying failure, if there is one
    pub fn sqlite_code(&self) -> Option<i32> {
        let source = match self {
            Self::Statement { source, .. }
            | Self::LibsqlError(source)
            | Self::ConnectionFailed { source, .. } => source,
            _ => return None,
        };
        match source {
            libsql::Error::SqliteFailure(code, _) => Some(*code & 0xff),
            _ => None,
        }
    }

    /// Whether the failure came from lock contention (`SQLITE_BUSY` / `SQLITE_LOCKED`).
    ///
    /// These are transient: the transaction was rolled back and the same call may be retried.
    pub fn is_busy(&self) -> bool {
        matches!(self.sqlite_code(), Some(SQLITE_BUSY | SQLITE_LOCKED))
    }

    /// Whether the failure came from a UNIQUE / PRIMARY KEY / FOREIGN KEY / CHECK constraint.
    pub fn is_constraint_violation(&self) -> bool {
        self.sqlite_code() == Some(SQLITE_CONSTRAINT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(code: i32, message: &str) -> DatabaseError {
        DatabaseError::statement(
            "Failed to run statement",
            libsql::Error::SqliteFailure(code, message.to_string()),
        )
    }

    #[test]
    fn test_busy_detection_uses_result_codes() {
        assert!(failure(5, "database is locked").is_busy());
        assert!(failure(6, "database table is locked").is_busy());
        // SQLITE_BUSY_SNAPSHOT
        assert!(failure(517, "database is locked").is_busy());
        assert!(!failure(1, "no such table: timeline_nodes").is_busy());

        // A message alone no longer counts
        assert!(!DatabaseError::sql_execution("database is locked").is_busy());
    }

    #[test]
    fn test_constraint_detection_uses_result_codes() {
        // SQLITE_CONSTRAINT_PRIMARYKEY and SQLITE_CONSTRAINT_FOREIGNKEY
        assert!(failure(1555, "UNIQUE constraint failed: node_closure.ancestor_id")
            .is_constraint_violation());
        assert!(failure(787, "FOREIGN KEY constraint failed").is_constraint_violation());
        assert!(!failure(5, "database is locked").is_constraint_violation());
        assert_eq!(failure(787, "x").sqlite_code(), Some(19));
        assert_eq!(DatabaseError::encoding("bad meta").sqlite_code(), None);
    }
}
