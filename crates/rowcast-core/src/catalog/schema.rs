//! Schema - the record types and relations a store exposes.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::RelationDef;
use crate::error::{Error, Result};

/// Default identity field for record types.
pub const DEFAULT_IDENTITY_FIELD: &str = "id";

fn default_identity_field() -> String {
    DEFAULT_IDENTITY_FIELD.to_string()
}

/// A record type definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordTypeDef {
    /// Type name (unique within the schema).
    pub name: String,
    /// Field carrying each record's own id.
    #[serde(default = "default_identity_field")]
    pub identity_field: String,
}

impl RecordTypeDef {
    /// Create a record type whose identity lives in `id`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identity_field: default_identity_field(),
        }
    }

    /// Use a different identity field.
    pub fn with_identity_field(mut self, field: impl Into<String>) -> Self {
        self.identity_field = field.into();
        self
    }
}

/// Relationship description consumed once when the engine starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Known record types, in declaration order.
    pub record_types: Vec<RecordTypeDef>,
    /// Declared relations.
    #[serde(default)]
    pub relations: Vec<RelationDef>,
}

impl Schema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record type.
    pub fn with_record_type(mut self, record_type: RecordTypeDef) -> Self {
        self.record_types.push(record_type);
        self
    }

    /// Add a record type with the default identity field.
    pub fn with_type(self, name: impl Into<String>) -> Self {
        self.with_record_type(RecordTypeDef::new(name))
    }

    /// Add a relation.
    pub fn with_relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    /// Look up a record type by name.
    pub fn get_record_type(&self, name: &str) -> Option<&RecordTypeDef> {
        self.record_types.iter().find(|t| t.name == name)
    }

    /// Whether `name` is a known record type.
    pub fn contains(&self, name: &str) -> bool {
        self.get_record_type(name).is_some()
    }

    /// All type names, in declaration order.
    pub fn type_names(&self) -> Vec<&str> {
        self.record_types.iter().map(|t| t.name.as_str()).collect()
    }

    /// Check the schema is usable: non-empty, unique names, known relation ends.
    pub fn validate(&self) -> Result<()> {
        if self.record_types.is_empty() {
            return Err(Error::Configuration(
                "schema declares no record types".to_string(),
            ));
        }

        for (i, record_type) in self.record_types.iter().enumerate() {
            if record_type.name.is_empty() {
                return Err(Error::Configuration(
                    "record type with empty name".to_string(),
                ));
            }
            if self.record_types[..i].iter().any(|t| t.name == record_type.name) {
                return Err(Error::Configuration(format!(
                    "record type {} declared twice",
                    record_type.name
                )));
            }
        }

        for relation in &self.relations {
            for end in [&relation.source, &relation.target] {
                if !self.contains(end) {
                    return Err(Error::Configuration(format!(
                        "relation {} -> {} references unknown record type {}",
                        relation.source, relation.target, end
                    )));
                }
            }
        }

        Ok(())
    }

    /// Parse a schema from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Configuration(format!("invalid schema json: {e}")))
    }

    /// Read a JSON schema file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read schema {}: {e}", path.display()))
        })?;
        Self::from_json(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn blog_schema() -> Schema {
        Schema::new()
            .with_type("User")
            .with_type("Post")
            .with_record_type(RecordTypeDef::new("Comment").with_identity_field("uuid"))
            .with_relation(RelationDef::has_many("User", "Post"))
            .with_relation(RelationDef::belongs_to("Comment", "Post"))
    }

    #[test]
    fn test_schema_builder() {
        let schema = blog_schema();

        assert_eq!(schema.type_names(), vec!["User", "Post", "Comment"]);
        assert_eq!(schema.relations.len(), 2);
        assert_eq!(
            schema.get_record_type("Comment").unwrap().identity_field,
            "uuid"
        );
        assert!(schema.validate().is_ok());
    }

    #[test]
    fn test_empty_schema_rejected() {
        let err = Schema::new().validate().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_duplicate_type_rejected() {
        let err = Schema::new().with_type("User").with_type("User").validate();
        assert!(matches!(err, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_unknown_relation_end_rejected() {
        let schema = Schema::new()
            .with_type("User")
            .with_relation(RelationDef::has_many("User", "Ghost"));

        let err = schema.validate().unwrap_err();
        assert!(err.to_string().contains("Ghost"));
    }

    #[test]
    fn test_schema_from_json_defaults() {
        let schema = Schema::from_json(
            r#"{
                "record_types": [{"name": "Parent"}, {"name": "Child", "identity_field": "key"}],
                "relations": [{"source": "Child", "target": "Parent", "kind": "belongs_to"}]
            }"#,
        )
        .unwrap();

        assert_eq!(schema.record_types[0].identity_field, "id");
        assert_eq!(schema.record_types[1].identity_field, "key");
        assert_eq!(schema.relations[0].holder(), "Child");
    }

    #[test]
    fn test_schema_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"record_types": [{{"name": "Note"}}]}}"#).unwrap();

        let schema = Schema::load(file.path()).unwrap();
        assert!(schema.contains("Note"));
        assert!(schema.relations.is_empty());
    }

    #[test]
    fn test_schema_load_missing_file() {
        let err = Schema::load("/nonexistent/rowcast-schema.json").unwrap_err();
        assert!(err.is_configuration());
    }
}
