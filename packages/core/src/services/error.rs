//! Service Layer Error Types
//!
//! `HierarchyError` is the taxonomy every public service operation reports.
//! Storage failures are wrapped rather than flattened so callers can still tell
//! a transient lock timeout apart from a broken schema.

use crate::db::DatabaseError;
use crate::models::ValidationError;
use thiserror::Error;

/// Hierarchy operation errors
///
/// Every mutating operation that returns one of these has rolled back its
/// transaction; the store is exactly as it was before the call.
#[derive(Error, Debug)]
pub enum HierarchyError {
    /// Malformed or incomplete meta, or bad insight content
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Node or insight missing, or invisible to the caller
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Caller does not own the target
    #[error("User {actor_id} may not modify {kind} {id}")]
    Forbidden {
        kind: &'static str,
        id: String,
        actor_id: String,
    },

    /// Target parent type may not carry children
    #[error("Hierarchy constraint violated: {0}")]
    HierarchyViolation(String),

    /// The change would make a node its own ancestor
    #[error("Circular reference detected: {context}")]
    Cycle { context: String },

    /// A concurrent change invalidated the operation's assumptions
    #[error("Conflicting change: {0}")]
    Conflict(String),

    /// Database operation failed
    #[error("Database operation failed: {0}")]
    Database(#[source] DatabaseError),

    /// Stored data could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl HierarchyError {
    pub fn node_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Node",
            id: id.into(),
        }
    }

    pub fn insight_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Insight",
            id: id.into(),
        }
    }

    pub fn forbidden_node(id: impl Into<String>, actor_id: impl Into<String>) -> Self {
        Self::Forbidden {
            kind: "node",
            id: id.into(),
            actor_id: actor_id.into(),
        }
    }

    pub fn forbidden_insight(id: impl Into<String>, actor_id: impl Into<String>) -> Self {
        Self::Forbidden {
            kind: "insight",
            id: id.into(),
            actor_id: actor_id.into(),
        }
    }

    pub fn hierarchy_violation(msg: impl Into<String>) -> Self {
        Self::HierarchyViolation(msg.into())
    }

    pub fn cycle(context: impl Into<String>) -> Self {
        Self::Cycle {
            context: context.into(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// HTTP status a REST layer should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound { .. } => 404,
            Self::Forbidden { .. } => 403,
            Self::HierarchyViolation(_) | Self::Cycle { .. } => 422,
            Self::Conflict(_) => 409,
            Self::Database(_) | Self::Serialization(_) => 500,
        }
    }

    /// Whether the same call may simply be repeated
    ///
    /// True only for lock contention; the failed attempt left no trace.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(e) if e.is_busy())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Lift a storage error into the domain taxonomy
///
/// A constraint failure inside a write transaction means a row the operation
/// depended on changed underneath it (for example a parent deleted mid-create),
/// so it becomes `Conflict`. Rows that cannot be decoded become `Serialization`.
impl From<DatabaseError> for HierarchyError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Encoding(msg) => Self::serialization(msg),
            err if err.is_constraint_violation() => Self::Conflict(err.to_string()),
            err => Self::Database(err),
        }
    }
}
