//! Relation definitions between record types.

use serde::{Deserialize, Serialize};

/// Direction and cardinality of a declared relation.
///
/// A relation is always declared from a *source* type towards a *target*
/// type. The kind decides which side physically carries the foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// The source holds a foreign key pointing at the target.
    BelongsTo,
    /// The source is linked to many targets through a junction it owns.
    BelongsToMany,
    /// The source owns one target; the target holds the foreign key.
    HasOne,
    /// The source owns many targets; each target holds the foreign key.
    HasMany,
}

impl RelationKind {
    /// Whether the source side of the relation carries the foreign key.
    pub fn source_holds_key(self) -> bool {
        matches!(self, RelationKind::BelongsTo | RelationKind::BelongsToMany)
    }
}

/// A relation declared between two record types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDef {
    /// Declaring type.
    pub source: String,
    /// Related type.
    pub target: String,
    /// Ownership direction.
    pub kind: RelationKind,
    /// Foreign key field on the holding side. Defaults to `<ReferencedType>Id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<String>,
}

impl RelationDef {
    fn new(source: impl Into<String>, target: impl Into<String>, kind: RelationKind) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            kind,
            foreign_key: None,
        }
    }

    /// `source` holds a reference to `target`.
    pub fn belongs_to(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(source, target, RelationKind::BelongsTo)
    }

    /// `source` is linked to many `target`s through a junction.
    pub fn belongs_to_many(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(source, target, RelationKind::BelongsToMany)
    }

    /// `source` owns exactly one `target`.
    pub fn has_one(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(source, target, RelationKind::HasOne)
    }

    /// `source` owns many `target`s.
    pub fn has_many(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(source, target, RelationKind::HasMany)
    }

    /// Override the foreign key field name.
    pub fn with_foreign_key(mut self, field: impl Into<String>) -> Self {
        self.foreign_key = Some(field.into());
        self
    }

    /// The type that physically carries the foreign key.
    pub fn holder(&self) -> &str {
        if self.kind.source_holds_key() {
            &self.source
        } else {
            &self.target
        }
    }

    /// The type the foreign key points at.
    pub fn referenced(&self) -> &str {
        if self.kind.source_holds_key() {
            &self.target
        } else {
            &self.source
        }
    }

    /// Foreign key field on the holder, falling back to `<ReferencedType>Id`.
    pub fn foreign_key_field(&self) -> String {
        match &self.foreign_key {
            Some(field) => field.clone(),
            None => default_foreign_key(self.referenced()),
        }
    }
}

/// Conventional foreign key name for a reference to `record_type`.
pub fn default_foreign_key(record_type: &str) -> String {
    format!("{record_type}Id")
}
