//! Node Type Behaviors
//!
//! Type-driven rules for timeline nodes:
//!
//! - `HierarchyRules` - which node types may carry children
//! - `MetaSchemaValidator` trait - per-type meta validation and patch merging
//! - `BuiltinMetaSchema` - the field table shipped with the crate
//!
//! Services receive these as values so callers can swap in product-specific
//! nesting matrices or external schema validators.

mod hierarchy_rules;
mod meta_schema;

pub use hierarchy_rules::{HierarchyRules, DEFAULT_PARENTABLE};
pub use meta_schema::{
    meta_from_value, BuiltinMetaSchema, FieldKind, FieldSpec, MetaSchemaValidator,
};
