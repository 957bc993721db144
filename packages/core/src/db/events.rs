//! Hierarchy Events
//!
//! Change notifications emitted by the services after a write transaction has
//! committed. Subscribers receive them through a tokio broadcast channel, so a
//! slow or absent subscriber never blocks a mutation.
//!
//! # Event Flow
//!
//! 1. A service commits a structural or content change
//! 2. The matching `HierarchyEvent` is sent on the broadcast channel
//! 3. Every subscriber receives its own clone asynchronously
//!
//! Events are never sent for rolled-back transactions.

use crate::models::{Insight, TimelineNode};
use serde::{Deserialize, Serialize};

/// Default capacity of the broadcast channel
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 128;

/// Domain events emitted by the hierarchy services
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HierarchyEvent {
    /// A node was created (closure rows included)
    NodeCreated { node: TimelineNode },

    /// A node's meta changed
    NodeUpdated { node: TimelineNode },

    /// A subtree was deleted, root first
    #[serde(rename_all = "camelCase")]
    NodesDeleted {
        owner_id: String,
        node_ids: Vec<String>,
    },

    /// A node changed parent; its whole subtree moved with it
    #[serde(rename_all = "camelCase")]
    NodeMoved {
        node: TimelineNode,
        old_parent_id: Option<String>,
    },

    InsightCreated { insight: Insight },

    InsightUpdated { insight: Insight },

    #[serde(rename_all = "camelCase")]
    InsightDeleted { insight_id: String, node_id: String },
}

impl HierarchyEvent {
    /// Get a string representation of the event type
    pub fn event_type(&self) -> &'static str {
        match self {
            HierarchyEvent::NodeCreated { .. } => "node:created",
            HierarchyEvent::NodeUpdated { .. } => "node:updated",
            HierarchyEvent::NodesDeleted { .. } => "node:deleted",
            HierarchyEvent::NodeMoved { .. } => "node:moved",
            HierarchyEvent::InsightCreated { .. } => "insight:created",
            HierarchyEvent::InsightUpdated { .. } => "insight:updated",
            HierarchyEvent::InsightDeleted { .. } => "insight:deleted",
        }
    }
}
