//! Careerline Core - Hierarchy Engine
//!
//! This crate stores career timeline nodes (jobs, education, projects, events,
//! actions, career transitions) in per-user trees and answers structural queries
//! through a closure table.
//!
//! # Architecture
//!
//! - **Parent pointer is the truth**: `timeline_nodes.parent_id` defines the tree
//! - **Closure table is derived**: `node_closure` holds every ancestor/descendant
//!   pair and is written in the same transaction as the parent pointer
//! - **libsql**: embedded SQLite in WAL mode; writers use `BEGIN IMMEDIATE`
//! - **Explicit context**: owner and viewer ids are passed on every call
//!
//! # Modules
//!
//! - [`models`] - Data structures (TimelineNode, ClosureEntry, Insight, ...)
//! - [`behaviors`] - Nesting rules and per-type meta schema
//! - [`db`] - Database layer with libsql integration
//! - [`services`] - Node mutations, tree queries, permissions, insights
//! - [`engine`] - Facade wiring everything from a [`HierarchyConfig`]

pub mod behaviors;
pub mod config;
pub mod db;
pub mod engine;
pub mod models;
pub mod services;
pub mod telemetry;

// Re-export commonly used types
pub use behaviors::*;
pub use config::{ConfigError, HierarchyConfig};
pub use db::{DatabaseError, DatabaseService, HierarchyEvent};
pub use engine::HierarchyEngine;
pub use models::*;
pub use services::*;
