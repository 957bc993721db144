//! Parent/child nesting rules per node type
//!
//! A static table says which node types may carry children. Types absent from the
//! parentable set are leaves: they can never appear as an ancestor at depth > 0.

use crate::models::NodeType;
use std::collections::BTreeSet;

/// Default nesting matrix.
///
/// Container-like milestones (jobs, education, projects, career transitions) group
/// work underneath them; events and actions are terminal.
pub const DEFAULT_PARENTABLE: [(NodeType, bool); 6] = [
    (NodeType::Job, true),
    (NodeType::Education, true),
    (NodeType::Project, true),
    (NodeType::Event, false),
    (NodeType::Action, false),
    (NodeType::CareerTransition, true),
];

/// Which node types may have children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyRules {
    parentable: BTreeSet<NodeType>,
}

impl Default for HierarchyRules {
    fn default() -> Self {
        Self::new(
            DEFAULT_PARENTABLE
                .iter()
                .filter(|(_, parentable)| *parentable)
                .map(|(node_type, _)| *node_type),
        )
    }
}

impl HierarchyRules {
    /// Build rules from an explicit list of parentable types; every other type is a leaf.
    pub fn new(parentable: impl IntoIterator<Item = NodeType>) -> Self {
        Self {
            parentable: parentable.into_iter().collect(),
        }
    }

    pub fn can_have_children(&self, node_type: NodeType) -> bool {
        self.parentable.contains(&node_type)
    }

    pub fn parentable_types(&self) -> impl Iterator<Item = NodeType> + '_ {
        self.parentable.iter().copied()
    }

    pub fn leaf_types(&self) -> impl Iterator<Item = NodeType> + '_ {
        NodeType::ALL
            .into_iter()
            .filter(move |node_type| !self.parentable.contains(node_type))
    }
}
