//! Identifiers, record snapshots and mutation events.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field-name to value map describing one record.
pub type RecordData = Map<String, Value>;

/// Identifier of a record within its type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Create a record id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Resolve an id from a field value.
    ///
    /// Strings and integers are ids; null, missing and other values are not.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(Self(s.clone())),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(Self(n.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for RecordId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// Caller-supplied identifier of one logical subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Create a subscription id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriptionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SubscriptionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for SubscriptionId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// Kind of mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// A record was created.
    Create,
    /// A record was updated.
    Update,
    /// A record was deleted.
    Delete,
}

impl Operation {
    /// Whether generic (type-wide) subscribers hear about this operation.
    pub fn reaches_generic(self) -> bool {
        matches!(self, Operation::Create | Operation::Delete)
    }

    /// Whether specific (per-record) subscribers hear about this operation.
    pub fn reaches_specific(self) -> bool {
        matches!(self, Operation::Update | Operation::Delete)
    }

    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single-record mutation reported by the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationEvent {
    /// Type of the mutated record.
    pub record_type: String,
    /// What happened.
    pub operation: Operation,
    /// Fields touched by the mutation.
    #[serde(default)]
    pub changed_fields: Vec<String>,
    /// Snapshot of the record after (or, for deletes, before) the mutation.
    pub data: RecordData,
}

impl MutationEvent {
    /// Create a mutation event with no changed fields.
    pub fn new(record_type: impl Into<String>, operation: Operation, data: RecordData) -> Self {
        Self {
            record_type: record_type.into(),
            operation,
            changed_fields: Vec::new(),
            data,
        }
    }

    /// A create event listing every field of the snapshot as changed.
    pub fn create(record_type: impl Into<String>, data: RecordData) -> Self {
        let changed_fields = data.keys().cloned().collect();
        Self::new(record_type, Operation::Create, data).with_changed_fields(changed_fields)
    }

    /// An update event.
    pub fn update(
        record_type: impl Into<String>,
        changed_fields: Vec<String>,
        data: RecordData,
    ) -> Self {
        Self::new(record_type, Operation::Update, data).with_changed_fields(changed_fields)
    }

    /// A delete event.
    pub fn delete(record_type: impl Into<String>, data: RecordData) -> Self {
        Self::new(record_type, Operation::Delete, data)
    }

    /// Set the changed fields.
    pub fn with_changed_fields(mut self, changed_fields: Vec<String>) -> Self {
        self.changed_fields = changed_fields;
        self
    }
}

/// Build a [`RecordData`] from a `serde_json::json!` object literal.
///
/// Non-object values produce an empty record.
pub fn record_data(value: Value) -> RecordData {
    match value {
        Value::Object(map) => map,
        _ => RecordData::new(),
    }
}
