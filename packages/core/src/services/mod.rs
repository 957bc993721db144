//! Business Services
//!
//! This module contains the hierarchy engine's services:
//!
//! - `NodeService` - create, update, delete and move nodes
//! - `HierarchyValidator` - parentable types and cycle prevention
//! - `TreeQueryService` - closure-indexed reads and forest building
//! - `PermissionFilter` - viewer-based filtering through an `AccessPolicy`
//! - `InsightService` - annotations attached to nodes
//!
//! Services coordinate between the database layer and callers. They hold no
//! per-request state: owner and viewer ids are passed on every call.

pub mod error;
pub mod hierarchy_validator;
pub mod insight_service;
pub mod node_service;
pub mod permission;
pub mod tree_query;

pub use error::HierarchyError;
pub use hierarchy_validator::HierarchyValidator;
pub use insight_service::InsightService;
pub use node_service::NodeService;
pub use permission::{AccessPolicy, FnAccessPolicy, OwnerOnlyPolicy, PermissionFilter};
pub use tree_query::TreeQueryService;
