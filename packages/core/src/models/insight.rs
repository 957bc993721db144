//! Insight annotations attached to timeline nodes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ValidationError;

/// Free-text annotation owned by exactly one node.
///
/// Insights live and die with their node: the node delete cascade removes them
/// in the same transaction as the node rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub id: String,
    pub node_id: String,
    pub author_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for attaching an insight to a node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewInsight {
    pub node_id: String,
    pub author_id: String,
    pub content: String,
}

impl NewInsight {
    pub fn new(
        node_id: impl Into<String>,
        author_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            author_id: author_id.into(),
            content: content.into(),
        }
    }

    pub(crate) fn into_insight(self) -> Result<Insight, ValidationError> {
        let content = normalize_content(&self.content)?;
        let now = Utc::now();
        Ok(Insight {
            id: Uuid::new_v4().to_string(),
            node_id: self.node_id,
            author_id: self.author_id,
            content,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Trim surrounding whitespace and reject blank content.
pub(crate) fn normalize_content(content: &str) -> Result<String, ValidationError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyContent);
    }
    Ok(trimmed.to_string())
}
