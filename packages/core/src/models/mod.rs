//! Data Models
//!
//! This module contains the core data structures used by the hierarchy engine:
//!
//! - `TimelineNode` - A career milestone stored in the user's tree
//! - `ClosureEntry` - One ancestor/descendant pair of the closure index
//! - `TimelineTree` - Nested read model built from flat node lists
//! - `Insight` - Free-text annotation attached to a node

mod insight;
mod node;

pub use insight::{Insight, NewInsight};
pub(crate) use insight::normalize_content;
pub use node::{
    build_forest, ClosureEntry, DeleteResult, MetaPatch, NewTimelineNode, NodeMeta, NodeType,
    TimelineNode, TimelineTree, ValidationError,
};
