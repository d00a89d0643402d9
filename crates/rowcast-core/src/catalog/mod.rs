//! Record type catalog.
//!
//! Describes the record types a store exposes and the relations between
//! them. This is the only schema information the engine needs.

mod relation;
mod schema;

pub use relation::{default_foreign_key, RelationDef, RelationKind};
pub use schema::{RecordTypeDef, Schema, DEFAULT_IDENTITY_FIELD};
