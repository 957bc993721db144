//! Timeline Node Data Structures
//!
//! This module defines the `TimelineNode` struct and the related types used by the
//! hierarchy engine: node types, creation parameters, meta patches, closure rows
//! and the nested tree representation handed to read-side consumers.
//!
//! # Architecture
//!
//! - **Parent pointer is the source of truth**: `parent_id` defines the tree
//! - **Closure rows are derived**: `ClosureEntry` values index the parent relation
//! - **Structured meta**: type-specific fields live in `meta`, validated by a
//!   `MetaSchemaValidator` (see [`crate::behaviors`])
//!
//! # Examples
//!
//! ```rust
//! use careerline_core::models::{NewTimelineNode, NodeType};
//! use serde_json::json;
//!
//! let job = NewTimelineNode::new(
//!     NodeType::Job,
//!     "user-1",
//!     json!({ "title": "Engineer", "company": "Acme" }),
//! );
//! assert!(job.parent_id.is_none());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Structured, type-specific payload of a timeline node.
pub type NodeMeta = Map<String, Value>;

/// Validation errors for node meta and insight payloads
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Unknown field '{field}' for {node_type} node")]
    UnknownField { node_type: NodeType, field: String },

    #[error("Invalid value for field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Invalid node type: {0}")]
    InvalidNodeType(String),

    #[error("Meta validation failed: {0}")]
    InvalidMeta(String),

    #[error("Content must not be empty")]
    EmptyContent,
}

impl ValidationError {
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// The fixed set of milestone kinds a timeline node can represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeType {
    Job,
    Education,
    Project,
    Event,
    Action,
    CareerTransition,
}

impl NodeType {
    pub const ALL: [NodeType; 6] = [
        NodeType::Job,
        NodeType::Education,
        NodeType::Project,
        NodeType::Event,
        NodeType::Action,
        NodeType::CareerTransition,
    ];

    /// Stable storage name (also the serde representation)
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Job => "job",
            NodeType::Education => "education",
            NodeType::Project => "project",
            NodeType::Event => "event",
            NodeType::Action => "action",
            NodeType::CareerTransition => "careerTransition",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = ValidationError;

    /// Accepts the storage name plus the snake_case spelling used by older clients.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "job" => Ok(NodeType::Job),
            "education" => Ok(NodeType::Education),
            "project" => Ok(NodeType::Project),
            "event" => Ok(NodeType::Event),
            "action" => Ok(NodeType::Action),
            "careerTransition" | "career_transition" => Ok(NodeType::CareerTransition),
            other => Err(ValidationError::InvalidNodeType(other.to_string())),
        }
    }
}

/// A milestone stored in the user's timeline tree.
///
/// # Fields
///
/// - `id`: UUID v4 assigned at creation
/// - `node_type`: One of [`NodeType`]
/// - `owner_id`: Owning user; never changes after creation
/// - `parent_id`: Optional parent, always owned by the same user
/// - `meta`: Type-specific structured payload
/// - `external_id`: Optional key from an importing system, unique per owner
/// - `created_at` / `updated_at`: Timestamps maintained by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineNode {
    pub id: String,

    #[serde(rename = "type")]
    pub node_type: NodeType,

    pub owner_id: String,

    pub parent_id: Option<String>,

    #[serde(default)]
    pub meta: NodeMeta,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl TimelineNode {
    /// Root nodes have no parent.
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Convenience accessor for the required `title` meta field
    pub fn title(&self) -> Option<&str> {
        self.meta.get("title").and_then(Value::as_str)
    }
}

/// Parameters for creating a node
///
/// Built with [`NewTimelineNode::new`] and optionally [`NewTimelineNode::with_parent`].
/// `meta` must be a JSON object; anything else is rejected with a validation error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTimelineNode {
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub owner_id: String,
    pub parent_id: Option<String>,
    pub meta: Value,
    #[serde(default)]
    pub external_id: Option<String>,
}

impl NewTimelineNode {
    pub fn new(node_type: NodeType, owner_id: impl Into<String>, meta: Value) -> Self {
        Self {
            node_type,
            owner_id: owner_id.into(),
            parent_id: None,
            meta,
            external_id: None,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Key the node by an id from an importing system (see `upsert_by_external_id`)
    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    /// Materialise a full node record with a fresh id and timestamps.
    pub(crate) fn into_node(self, meta: NodeMeta) -> TimelineNode {
        let now = Utc::now();
        TimelineNode {
            id: Uuid::new_v4().to_string(),
            node_type: self.node_type,
            owner_id: self.owner_id,
            parent_id: self.parent_id,
            meta,
            external_id: self.external_id,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Sparse meta update.
///
/// Supplied fields overwrite, omitted fields are preserved, and an explicit
/// `null` clears an optional field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetaPatch(pub NodeMeta);

impl MetaPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn clear(mut self, field: impl Into<String>) -> Self {
        self.0.insert(field.into(), Value::Null);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl TryFrom<Value> for MetaPatch {
    type Error = ValidationError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(ValidationError::InvalidMeta(
                "meta patch must be a JSON object".to_string(),
            )),
        }
    }
}

/// One row of the closure table: `ancestor_id` reaches `descendant_id`
/// through `depth` parent links (0 for the self row).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosureEntry {
    pub ancestor_id: String,
    pub descendant_id: String,
    pub depth: i64,
}

impl ClosureEntry {
    pub fn new(ancestor_id: impl Into<String>, descendant_id: impl Into<String>, depth: i64) -> Self {
        Self {
            ancestor_id: ancestor_id.into(),
            descendant_id: descendant_id.into(),
            depth,
        }
    }

    pub fn self_entry(node_id: impl Into<String>) -> Self {
        let id = node_id.into();
        Self::new(id.clone(), id, 0)
    }
}

/// Result of a delete operation
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    /// Every node id removed by the cascade, root first
    pub deleted_ids: Vec<String>,
    /// Number of insights removed along with the nodes
    pub deleted_insights: u64,
}

impl DeleteResult {
    pub fn node_count(&self) -> usize {
        self.deleted_ids.len()
    }
}

/// A node together with its nested children, as returned by tree builds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineTree {
    #[serde(flatten)]
    pub node: TimelineNode,
    pub children: Vec<TimelineTree>,
}

impl TimelineTree {
    /// Total number of nodes in this subtree, including the root.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(TimelineTree::size).sum::<usize>()
    }

    /// Depth-first search for a node id within this subtree.
    pub fn find(&self, id: &str) -> Option<&TimelineTree> {
        if self.node.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }
}

/// Build a forest from a flat node list in a single pass.
///
/// An index `parent_id -> children` is built in O(n), then each root is expanded.
/// A node counts as a root when it has no parent *or* when its parent is absent
/// from `nodes` (for example after permission filtering). Input order is kept
/// among siblings and among roots.
pub fn build_forest(nodes: Vec<TimelineNode>) -> Vec<TimelineTree> {
    let present: std::collections::HashSet<String> = nodes.iter().map(|n| n.id.clone()).collect();

    let mut roots = Vec::new();
    let mut children_index: HashMap<String, Vec<TimelineNode>> = HashMap::new();
    for node in nodes {
        match node.parent_id.as_deref() {
            Some(parent_id) if present.contains(parent_id) => {
                children_index
                    .entry(parent_id.to_string())
                    .or_default()
                    .push(node);
            }
            _ => roots.push(node),
        }
    }

    roots
        .into_iter()
        .map(|root| attach_children(root, &mut children_index))
        .collect()
}

fn attach_children(
    node: TimelineNode,
    children_index: &mut HashMap<String, Vec<TimelineNode>>,
) -> TimelineTree {
    let children = children_index
        .remove(&node.id)
        .unwrap_or_default()
        .into_iter()
        .map(|child| attach_children(child, children_index))
        .collect();

    TimelineTree { node, children }
}
