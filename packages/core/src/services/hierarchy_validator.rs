//! Hierarchy Validator
//!
//! Pre-checks for structural writes. Both checks run on the connection of the
//! write transaction that is about to change the tree, so the closure rows they
//! read cannot change before the write commits.

use crate::behaviors::HierarchyRules;
use crate::db::ClosureMaintainer;
use crate::models::NodeType;
use crate::services::error::HierarchyError;
use libsql::Connection;

#[derive(Debug, Clone, Default)]
pub struct HierarchyValidator {
    rules: HierarchyRules,
}

impl HierarchyValidator {
    pub fn new(rules: HierarchyRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &HierarchyRules {
        &self.rules
    }

    /// Fail with `HierarchyViolation` unless `parent_type` may carry children
    pub fn validate_new_edge(&self, parent_type: NodeType) -> Result<(), HierarchyError> {
        if self.rules.can_have_children(parent_type) {
            Ok(())
        } else {
            Err(HierarchyError::hierarchy_violation(format!(
                "{} nodes cannot have children",
                parent_type
            )))
        }
    }

    /// Fail with `Cycle` if attaching `node_id` under `proposed_parent_id` would
    /// make the node its own ancestor
    pub async fn validate_no_cycle(
        &self,
        conn: &Connection,
        node_id: &str,
        proposed_parent_id: &str,
    ) -> Result<(), HierarchyError> {
        if node_id == proposed_parent_id {
            return Err(HierarchyError::cycle(format!(
                "node {} cannot be its own parent",
                node_id
            )));
        }

        if ClosureMaintainer::new(conn)
            .is_strict_descendant(node_id, proposed_parent_id)
            .await?
        {
            return Err(HierarchyError::cycle(format!(
                "node {} is a descendant of {}",
                proposed_parent_id, node_id
            )));
        }

        Ok(())
    }
}
