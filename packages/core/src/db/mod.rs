//! Database Layer
//!
//! This module handles all database interactions using libsql (embedded SQLite):
//!
//! - Database initialization and connection management
//! - Node rows (`timeline_nodes`), the derived closure index (`node_closure`)
//!   and node insights (`node_insights`)
//! - Write transactions (`BEGIN IMMEDIATE`) shared by node and closure writes
//! - Domain events broadcast after commit
//!
//! # Architecture
//!
//! The stores in this module borrow a `libsql::Connection` and carry no state of
//! their own. Services open the connection (transactional or not) and hand it to
//! whichever stores an operation needs, so one transaction can span all three tables.

mod closure;
mod database;
mod error;
pub mod events;
mod insight_store;
mod node_store;

pub use closure::{expected_closure, ClosureMaintainer, MoveStats};
pub use database::{DatabaseService, DEFAULT_BUSY_TIMEOUT_MS};
pub use error::DatabaseError;
pub use events::{HierarchyEvent, DEFAULT_EVENT_CHANNEL_CAPACITY};
pub use insight_store::InsightStore;
pub use node_store::NodeStore;
