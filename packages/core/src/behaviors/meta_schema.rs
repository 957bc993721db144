//! Per-type meta schema validation
//!
//! Node meta is checked at the boundary of every create and update. The engine
//! only depends on the [`MetaSchemaValidator`] trait; [`BuiltinMetaSchema`] is the
//! field table shipped with the crate.
//!
//! # Merge semantics
//!
//! Updates are applied field by field against the declared schema: supplied fields
//! overwrite, omitted fields are preserved, and an explicit `null` clears the field.
//! The merged result is then validated as a whole, so a patch can never leave a node
//! in a state that a fresh create would reject.

use crate::models::{MetaPatch, NodeMeta, NodeType, ValidationError};
use chrono::NaiveDate;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// `YYYY-MM` or `YYYY-MM-DD`
const DATE_PATTERN: &str = r"^\d{4}-(0[1-9]|1[0-2])(-(0[1-9]|[12]\d|3[01]))?$";

/// Validates and merges node meta for a given node type.
pub trait MetaSchemaValidator: Send + Sync {
    /// Check a complete meta object for `node_type`.
    fn validate(&self, node_type: NodeType, meta: &NodeMeta) -> Result<(), ValidationError>;

    /// Apply `patch` to `existing`, returning the merged meta (not yet validated).
    fn merge(
        &self,
        _node_type: NodeType,
        existing: &NodeMeta,
        patch: &MetaPatch,
    ) -> Result<NodeMeta, ValidationError> {
        let mut merged = existing.clone();
        for (field, value) in patch.fields() {
            if value.is_null() {
                merged.remove(field);
            } else {
                merged.insert(field.clone(), value.clone());
            }
        }
        Ok(merged)
    }
}

/// Convert raw create input into a meta object.
pub fn meta_from_value(value: Value) -> Result<NodeMeta, ValidationError> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(NodeMeta::new()),
        other => Err(ValidationError::InvalidMeta(format!(
            "meta must be a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Date,
    TextList,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

const fn field(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required: false,
    }
}

const COMMON_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        name: "title",
        kind: FieldKind::Text,
        required: true,
    },
    field("description", FieldKind::Text),
    field("startDate", FieldKind::Date),
    field("endDate", FieldKind::Date),
];

const JOB_FIELDS: &[FieldSpec] = &[
    field("company", FieldKind::Text),
    field("role", FieldKind::Text),
    field("location", FieldKind::Text),
    field("employmentType", FieldKind::Text),
];

const EDUCATION_FIELDS: &[FieldSpec] = &[
    field("institution", FieldKind::Text),
    field("degree", FieldKind::Text),
    field("field", FieldKind::Text),
    field("location", FieldKind::Text),
];

const PROJECT_FIELDS: &[FieldSpec] = &[
    field("status", FieldKind::Text),
    field("technologies", FieldKind::TextList),
];

const EVENT_FIELDS: &[FieldSpec] = &[
    field("eventType", FieldKind::Text),
    field("location", FieldKind::Text),
];

const ACTION_FIELDS: &[FieldSpec] = &[
    field("category", FieldKind::Text),
    field("status", FieldKind::Text),
];

const CAREER_TRANSITION_FIELDS: &[FieldSpec] = &[
    field("transitionType", FieldKind::Text),
    field("fromRole", FieldKind::Text),
    field("toRole", FieldKind::Text),
];

/// Field table for the six built-in node types.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinMetaSchema;

impl BuiltinMetaSchema {
    pub fn new() -> Self {
        Self
    }

    fn type_fields(node_type: NodeType) -> &'static [FieldSpec] {
        match node_type {
            NodeType::Job => JOB_FIELDS,
            NodeType::Education => EDUCATION_FIELDS,
            NodeType::Project => PROJECT_FIELDS,
            NodeType::Event => EVENT_FIELDS,
            NodeType::Action => ACTION_FIELDS,
            NodeType::CareerTransition => CAREER_TRANSITION_FIELDS,
        }
    }

    /// Look up the declaration of `name` for `node_type`.
    pub fn field_spec(node_type: NodeType, name: &str) -> Option<FieldSpec> {
        COMMON_FIELDS
            .iter()
            .chain(Self::type_fields(node_type))
            .find(|spec| spec.name == name)
            .copied()
    }

    fn check_value(spec: &FieldSpec, value: &Value) -> Result<(), ValidationError> {
        match spec.kind {
            FieldKind::Text => {
                let text = value.as_str().ok_or_else(|| {
                    ValidationError::invalid_field(
                        spec.name,
                        format!("expected text, got {}", json_kind(value)),
                    )
                })?;
                if spec.required && text.trim().is_empty() {
                    return Err(ValidationError::invalid_field(spec.name, "must not be empty"));
                }
            }
            FieldKind::Date => {
                let text = value.as_str().ok_or_else(|| {
                    ValidationError::invalid_field(
                        spec.name,
                        format!("expected date string, got {}", json_kind(value)),
                    )
                })?;
                if !is_valid_date(text) {
                    return Err(ValidationError::invalid_field(
                        spec.name,
                        format!("'{}' is not a YYYY-MM or YYYY-MM-DD date", text),
                    ));
                }
            }
            FieldKind::TextList => {
                let items = value.as_array().ok_or_else(|| {
                    ValidationError::invalid_field(
                        spec.name,
                        format!("expected list of text, got {}", json_kind(value)),
                    )
                })?;
                if let Some(bad) = items.iter().find(|item| !item.is_string()) {
                    return Err(ValidationError::invalid_field(
                        spec.name,
                        format!("list entries must be text, got {}", json_kind(bad)),
                    ));
                }
            }
        }
        Ok(())
    }
}

impl MetaSchemaValidator for BuiltinMetaSchema {
    fn validate(&self, node_type: NodeType, meta: &NodeMeta) -> Result<(), ValidationError> {
        for (name, value) in meta {
            let spec = Self::field_spec(node_type, name).ok_or_else(|| {
                ValidationError::UnknownField {
                    node_type,
                    field: name.clone(),
                }
            })?;
            Self::check_value(&spec, value)?;
        }

        for spec in COMMON_FIELDS.iter().chain(Self::type_fields(node_type)) {
            if spec.required && !meta.contains_key(spec.name) {
                return Err(ValidationError::MissingField(spec.name.to_string()));
            }
        }

        if let (Some(start), Some(end)) = (
            meta.get("startDate").and_then(Value::as_str),
            meta.get("endDate").and_then(Value::as_str),
        ) {
            if ends_before(start, end) {
                return Err(ValidationError::invalid_field(
                    "endDate",
                    format!("end date {} is before start date {}", end, start),
                ));
            }
        }

        Ok(())
    }

    fn merge(
        &self,
        node_type: NodeType,
        existing: &NodeMeta,
        patch: &MetaPatch,
    ) -> Result<NodeMeta, ValidationError> {
        let mut merged = existing.clone();
        for (name, value) in patch.fields() {
            let spec = Self::field_spec(node_type, name).ok_or_else(|| {
                ValidationError::UnknownField {
                    node_type,
                    field: name.clone(),
                }
            })?;

            if value.is_null() {
                if spec.required {
                    return Err(ValidationError::invalid_field(
                        spec.name,
                        "required field cannot be cleared",
                    ));
                }
                merged.remove(name);
            } else {
                merged.insert(name.clone(), value.clone());
            }
        }
        Ok(merged)
    }
}

fn is_valid_date(text: &str) -> bool {
    static DATE_REGEX: OnceLock<Regex> = OnceLock::new();
    let date_regex = DATE_REGEX.get_or_init(|| Regex::new(DATE_PATTERN).unwrap());

    if !date_regex.is_match(text) {
        return false;
    }

    // Full dates must exist on the calendar (rejects 2023-02-30)
    if text.len() == 10 {
        return NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok();
    }
    true
}

/// Compare two valid dates at the coarser of their precisions
///
/// Both share the YYYY-MM[-DD] layout, so on a common prefix string order is
/// date order, and an end month contains every day of itself.
fn ends_before(start: &str, end: &str) -> bool {
    let precision = start.len().min(end.len());
    match (start.get(..precision), end.get(..precision)) {
        (Some(start), Some(end)) => end < start,
        _ => false,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "text",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}
