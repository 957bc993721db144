//! Database Connection Management
//!
//! This module provides the database connection, schema initialization and
//! transaction helpers for the hierarchy engine, backed by libsql.
//!
//! # Architecture
//!
//! - **Path-agnostic**: Accepts any valid PathBuf
//! - **WAL mode**: Readers never block the single writer
//! - **Foreign keys**: Enabled on every connection handed out
//! - **Write transactions**: `BEGIN IMMEDIATE`, so the write lock is held before
//!   the first validation read of a structural mutation
//!
//! # Database Connection Patterns
//!
//! **ALWAYS use `connect_with_timeout()` in async functions.** It applies the busy
//! timeout and foreign key pragma to the new connection so concurrent writers wait
//! instead of failing immediately with `SQLITE_BUSY`.
//!
//! ```no_run
//! # use careerline_core::db::DatabaseService;
//! # use std::path::PathBuf;
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db_service = DatabaseService::new(PathBuf::from("./data/careerline.db")).await?;
//! let conn = db_service.connect_with_timeout().await?;
//! # Ok(())
//! # }
//! ```

use crate::db::error::DatabaseError;
use anyhow::Result as AnyResult;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use libsql::{Builder, Connection, Database};
use std::path::PathBuf;
use std::sync::Arc;

/// Default busy timeout applied to every connection (milliseconds)
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Database service for managing the libsql connection and schema
///
/// # Examples
///
/// ```no_run
/// use careerline_core::db::DatabaseService;
/// use std::path::PathBuf;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let db_service = DatabaseService::new(PathBuf::from("/path/to/careerline.db")).await?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct DatabaseService {
    /// libsql database handle (wrapped in Arc for sharing)
    pub db: Arc<Database>,

    /// Path to the database file
    pub db_path: PathBuf,

    busy_timeout_ms: u64,
}

impl DatabaseService {
    /// Create a new DatabaseService with the default busy timeout
    ///
    /// This will:
    /// 1. Ensure the parent directory exists (create if needed)
    /// 2. Open/create the database file
    /// 3. Initialize the schema (CREATE TABLE IF NOT EXISTS)
    /// 4. Enable WAL mode
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if:
    /// - Parent directory cannot be created
    /// - Database connection fails
    /// - Schema initialization fails
    pub async fn new(db_path: PathBuf) -> Result<Self, DatabaseError> {
        Self::with_busy_timeout(db_path, DEFAULT_BUSY_TIMEOUT_MS).await
    }

    /// Create a new DatabaseService with an explicit busy timeout
    pub async fn with_busy_timeout(
        db_path: PathBuf,
        busy_timeout_ms: u64,
    ) -> Result<Self, DatabaseError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::PermissionDenied {
                        DatabaseError::permission_denied(db_path.clone())
                    } else {
                        DatabaseError::DirectoryCreationFailed(e)
                    }
                })?;
            }
        }

        let db = Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| DatabaseError::connection_failed(db_path.clone(), e))?;

        let service = Self {
            db: Arc::new(db),
            db_path,
            busy_timeout_ms,
        };

        service.initialize_schema().await?;
        tracing::debug!("Database ready at {}", service.db_path.display());

        Ok(service)
    }

    /// Execute a PRAGMA statement
    ///
    /// PRAGMA statements may return rows, so they go through query() instead of execute().
    async fn execute_pragma(&self, conn: &Connection, pragma: &str) -> Result<(), DatabaseError> {
        let mut stmt = conn.prepare(pragma).await.map_err(|e| {
            DatabaseError::statement(format!("Failed to execute '{}'", pragma), e)
        })?;
        let _ = stmt.query(()).await.map_err(|e| {
            DatabaseError::statement(format!("Failed to execute '{}'", pragma), e)
        })?;
        Ok(())
    }

    /// Initialize database schema and configuration
    ///
    /// Creates tables and indexes using CREATE TABLE IF NOT EXISTS, so the call is
    /// idempotent.
    ///
    /// # Schema
    ///
    /// - `timeline_nodes`: node records; `parent_id` is the structural source of truth,
    ///   `external_id` is an optional import key unique per owner
    /// - `node_closure`: derived ancestor/descendant index, unique on the pair
    /// - `node_insights`: annotations owned by a node
    ///
    /// Foreign keys are immediate: a dangling reference fails the statement that
    /// writes it, inside the transaction, rather than the COMMIT.
    async fn initialize_schema(&self) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;

        self.execute_pragma(&conn, "PRAGMA journal_mode = WAL")
            .await?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS timeline_nodes (
                id TEXT PRIMARY KEY,
                node_type TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                parent_id TEXT,
                meta JSON NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                external_id TEXT,
                FOREIGN KEY (parent_id) REFERENCES timeline_nodes(id)
            )",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::initialization_failed(format!(
                "Failed to create timeline_nodes table: {}",
                e
            ))
        })?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS node_closure (
                ancestor_id TEXT NOT NULL,
                descendant_id TEXT NOT NULL,
                depth INTEGER NOT NULL CHECK (depth >= 0),
                PRIMARY KEY (ancestor_id, descendant_id),
                FOREIGN KEY (ancestor_id) REFERENCES timeline_nodes(id),
                FOREIGN KEY (descendant_id) REFERENCES timeline_nodes(id)
            )",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::initialization_failed(format!(
                "Failed to create node_closure table: {}",
                e
            ))
        })?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS node_insights (
                id TEXT PRIMARY KEY,
                node_id TEXT NOT NULL,
                author_id TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (node_id) REFERENCES timeline_nodes(id)
            )",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::initialization_failed(format!(
                "Failed to create node_insights table: {}",
                e
            ))
        })?;

        self.create_core_indexes(&conn).await?;

        Ok(())
    }

    /// Create core indexes
    ///
    /// The closure table is keyed by (ancestor_id, descendant_id); the extra
    /// descendant index serves ancestor lookups in the other direction.
    async fn create_core_indexes(&self, conn: &Connection) -> Result<(), DatabaseError> {
        const INDEXES: [(&str, &str); 7] = [
            (
                "idx_nodes_owner",
                "CREATE INDEX IF NOT EXISTS idx_nodes_owner ON timeline_nodes(owner_id)",
            ),
            (
                "idx_nodes_parent",
                "CREATE INDEX IF NOT EXISTS idx_nodes_parent ON timeline_nodes(parent_id)",
            ),
            (
                "idx_nodes_owner_parent",
                "CREATE INDEX IF NOT EXISTS idx_nodes_owner_parent ON timeline_nodes(owner_id, parent_id)",
            ),
            (
                "idx_nodes_owner_external",
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_nodes_owner_external
                 ON timeline_nodes(owner_id, external_id) WHERE external_id IS NOT NULL",
            ),
            (
                "idx_closure_ancestor",
                "CREATE INDEX IF NOT EXISTS idx_closure_ancestor ON node_closure(ancestor_id, depth)",
            ),
            (
                "idx_closure_descendant",
                "CREATE INDEX IF NOT EXISTS idx_closure_descendant ON node_closure(descendant_id, depth)",
            ),
            (
                "idx_insights_node",
                "CREATE INDEX IF NOT EXISTS idx_insights_node ON node_insights(node_id)",
            ),
        ];

        for (name, sql) in INDEXES {
            conn.execute(sql, ()).await.map_err(|e| {
                DatabaseError::initialization_failed(format!(
                    "Failed to create index '{}': {}",
                    name, e
                ))
            })?;
        }

        Ok(())
    }

    /// Get a raw connection to the database
    ///
    /// **⚠️ WARNING**: The connection has no busy timeout and foreign keys are off.
    /// Use `connect_with_timeout()` for any real work.
    pub fn connect(&self) -> Result<Connection, DatabaseError> {
        self.db.connect().map_err(DatabaseError::LibsqlError)
    }

    /// Get a connection with busy timeout and foreign keys configured
    ///
    /// **✅ RECOMMENDED**: Use this for all async functions.
    pub async fn connect_with_timeout(&self) -> Result<Connection, DatabaseError> {
        let conn = self.connect()?;

        self.execute_pragma(&conn, &format!("PRAGMA busy_timeout = {}", self.busy_timeout_ms))
            .await?;
        self.execute_pragma(&conn, "PRAGMA foreign_keys = ON")
            .await?;

        Ok(conn)
    }

    /// Open a connection and start a write transaction on it
    ///
    /// `BEGIN IMMEDIATE` takes the database write lock up front. Every read made
    /// through the returned connection therefore sees a state no other writer can
    /// change until `finish_transaction` commits or rolls back.
    pub async fn begin_write(&self) -> Result<Connection, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        conn.execute("BEGIN IMMEDIATE", ())
            .await
            .map_err(|e| DatabaseError::statement("Failed to begin transaction", e))?;
        Ok(conn)
    }

    /// Commit on success, roll back on failure
    ///
    /// A failed COMMIT is rolled back and reported, so the caller never observes
    /// a half-applied mutation.
    pub async fn finish_transaction<T, E>(conn: &Connection, outcome: Result<T, E>) -> Result<T, E>
    where
        E: From<DatabaseError> + std::fmt::Display,
    {
        match outcome {
            Ok(value) => {
                if let Err(e) = conn.execute("COMMIT", ()).await {
                    Self::rollback(conn).await;
                    return Err(DatabaseError::statement("Failed to commit transaction", e).into());
                }
                Ok(value)
            }
            Err(err) => {
                tracing::warn!("Rolling back transaction: {}", err);
                Self::rollback(conn).await;
                Err(err)
            }
        }
    }

    async fn rollback(conn: &Connection) {
        if let Err(e) = conn.execute("ROLLBACK", ()).await {
            // Nothing left to undo when SQLite already aborted the transaction
            tracing::debug!("ROLLBACK after failed transaction reported: {}", e);
        }
    }
}

/// Render a timestamp the way it is stored: RFC3339 with microseconds, UTC `Z`.
///
/// Fixed precision keeps lexicographic order equal to chronological order.
pub(crate) fn to_db_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp - handles both RFC3339 and SQLite formats
///
/// Rows written by the engine use RFC3339; rows inserted by hand through the
/// SQLite shell typically use `CURRENT_TIMESTAMP` ("YYYY-MM-DD HH:MM:SS").
pub(crate) fn parse_timestamp(s: &str) -> AnyResult<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }

    Err(anyhow::anyhow!(
        "Unable to parse timestamp '{}' as RFC3339 or SQLite format",
        s
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn table_names(conn: &Connection) -> Vec<String> {
        let mut rows = conn
            .query("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name", ())
            .await
            .unwrap();
        let mut names = Vec::new();
        while let Some(row) = rows.next().await.unwrap() {
            names.push(row.get::<String>(0).unwrap());
        }
        names
    }

    #[tokio::test]
    async fn test_database_creation() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let db_service = DatabaseService::new(db_path.clone()).await.unwrap();

        assert_eq!(db_service.db_path, db_path);
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_schema_initialization() {
        let temp_dir = TempDir::new().unwrap();
        let db_service = DatabaseService::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();
        let conn = db_service.connect().unwrap();

        let names = table_names(&conn).await;
        assert!(names.contains(&"timeline_nodes".to_string()));
        assert!(names.contains(&"node_closure".to_string()));
        assert!(names.contains(&"node_insights".to_string()));
    }

    #[tokio::test]
    async fn test_indexes_created() {
        let temp_dir = TempDir::new().unwrap();
        let db_service = DatabaseService::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();
        let conn = db_service.connect().unwrap();

        let mut rows = conn
            .query(
                "SELECT name FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%'",
                (),
            )
            .await
            .unwrap();
        let mut index_names = Vec::new();
        while let Some(row) = rows.next().await.unwrap() {
            index_names.push(row.get::<String>(0).unwrap());
        }

        for expected in [
            "idx_nodes_owner",
            "idx_nodes_parent",
            "idx_nodes_owner_parent",
            "idx_nodes_owner_external",
            "idx_closure_ancestor",
            "idx_closure_descendant",
            "idx_insights_node",
        ] {
            assert!(
                index_names.contains(&expected.to_string()),
                "missing index {}",
                expected
            );
        }
    }

    #[tokio::test]
    async fn test_wal_mode_enabled() {
        let temp_dir = TempDir::new().unwrap();
        let db_service = DatabaseService::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();
        let conn = db_service.connect().unwrap();

        let mut rows = conn.query("PRAGMA journal_mode", ()).await.unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let mode: String = row.get(0).unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn test_foreign_keys_enabled_per_connection() {
        let temp_dir = TempDir::new().unwrap();
        let db_service = DatabaseService::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();
        let conn = db_service.connect_with_timeout().await.unwrap();

        let mut rows = conn.query("PRAGMA foreign_keys", ()).await.unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let enabled: i64 = row.get(0).unwrap();
        assert_eq!(enabled, 1);
    }

    #[tokio::test]
    async fn test_parent_directory_creation() {
        let temp_dir = TempDir::new().unwrap();
        let nested_path = temp_dir.path().join("nested").join("dirs").join("test.db");

        let _db_service = DatabaseService::new(nested_path.clone()).await.unwrap();

        assert!(nested_path.exists());
    }

    #[tokio::test]
    async fn test_idempotent_initialization() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let _first = DatabaseService::new(db_path.clone()).await.unwrap();
        let second = DatabaseService::new(db_path).await.unwrap();

        let conn = second.connect().unwrap();
        let names: Vec<String> = table_names(&conn)
            .await
            .into_iter()
            .filter(|name| !name.starts_with("sqlite_") && !name.starts_with("libsql_"))
            .collect();
        assert_eq!(names, vec!["node_closure", "node_insights", "timeline_nodes"]);
    }

    #[tokio::test]
    async fn test_rolled_back_transaction_leaves_no_rows() {
        let temp_dir = TempDir::new().unwrap();
        let db_service = DatabaseService::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();

        let conn = db_service.begin_write().await.unwrap();
        let outcome: Result<(), DatabaseError> = async {
            conn.execute(
                "INSERT INTO timeline_nodes (id, node_type, owner_id, meta, created_at, updated_at)
                 VALUES ('n1', 'job', 'u1', '{}', 'x', 'x')",
                (),
            )
            .await?;
            Err(DatabaseError::sql_execution("forced failure"))
        }
        .await;
        assert!(DatabaseService::finish_transaction(&conn, outcome)
            .await
            .is_err());

        let reader = db_service.connect_with_timeout().await.unwrap();
        let mut rows = reader
            .query("SELECT COUNT(*) FROM timeline_nodes", ())
            .await
            .unwrap();
        let count: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_dangling_reference_fails_its_own_statement() {
        let temp_dir = TempDir::new().unwrap();
        let db_service = DatabaseService::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();

        let conn = db_service.begin_write().await.unwrap();
        let err = conn
            .execute(
                "INSERT INTO timeline_nodes (id, node_type, owner_id, parent_id, meta, created_at, updated_at)
                 VALUES ('n1', 'job', 'u1', 'ghost', '{}', 'x', 'x')",
                (),
            )
            .await
            .map_err(|e| DatabaseError::statement("Failed to insert node", e))
            .unwrap_err();
        assert!(err.is_constraint_violation());

        let outcome: Result<(), DatabaseError> = Err(err);
        assert!(DatabaseService::finish_transaction(&conn, outcome)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_external_id_is_unique_per_owner() {
        let temp_dir = TempDir::new().unwrap();
        let db_service = DatabaseService::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();
        let conn = db_service.connect_with_timeout().await.unwrap();

        let insert = "INSERT INTO timeline_nodes (id, node_type, owner_id, meta, created_at, updated_at, external_id)
                      VALUES (?, 'job', ?, '{}', 'x', 'x', ?)";
        conn.execute(insert, ["n1", "u1", "linkedin:42"]).await.unwrap();
        conn.execute(insert, ["n2", "u2", "linkedin:42"]).await.unwrap();
        let err = conn
            .execute(insert, ["n3", "u1", "linkedin:42"])
            .await
            .map_err(DatabaseError::LibsqlError)
            .unwrap_err();
        assert!(err.is_constraint_violation());
    }

    #[test]
    fn test_timestamp_round_trip_and_sqlite_format() {
        let now = Utc::now();
        let stored = to_db_timestamp(&now);
        let parsed = parse_timestamp(&stored).unwrap();
        assert_eq!(parsed.timestamp_micros(), now.timestamp_micros());

        let legacy = parse_timestamp("2024-01-02 03:04:05").unwrap();
        assert_eq!(to_db_timestamp(&legacy), "2024-01-02T03:04:05.000000Z");
        assert!(parse_timestamp("yesterday").is_err());
    }
}
