//! Dependency graph between record types.
//!
//! Built once from the schema's relations. For every record type the graph
//! lists the types that depend on it: the types physically carrying a
//! foreign key that points at it. Subscribers of a referenced record are
//! told about changes to its dependents.
//!
//! The graph is immutable after [`DependencyGraph::build`].

use std::collections::{HashMap, HashSet};

use crate::catalog::Schema;
use crate::error::{Error, Result};

/// An outgoing reference from a dependent type to the type it points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    /// The referenced record type.
    pub record_type: String,
    /// Field on the dependent record holding the referenced id.
    pub foreign_key: String,
}

/// Immutable mapping from record types to their dependents.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Every known record type, in declaration order.
    record_types: Vec<String>,
    /// Referenced type -> dependent types, in order of first discovery.
    dependents: HashMap<String, Vec<String>>,
    /// Dependent type -> references it carries.
    references: HashMap<String, Vec<Reference>>,
}

impl DependencyGraph {
    /// Derive the graph from a schema.
    ///
    /// Fails with [`Error::Configuration`] when the schema is empty or a
    /// relation names a type outside the schema.
    pub fn build(schema: &Schema) -> Result<Self> {
        schema.validate()?;

        let record_types: Vec<String> =
            schema.record_types.iter().map(|t| t.name.clone()).collect();

        let mut dependents: HashMap<String, Vec<String>> = record_types
            .iter()
            .map(|name| (name.clone(), Vec::new()))
            .collect();
        let mut references: HashMap<String, Vec<Reference>> = record_types
            .iter()
            .map(|name| (name.clone(), Vec::new()))
            .collect();
        let mut seen_references: HashSet<(String, Reference)> = HashSet::new();

        for relation in &schema.relations {
            let holder = relation.holder();
            let referenced = relation.referenced();

            let list = dependents
                .get_mut(referenced)
                .ok_or_else(|| unknown_type(referenced))?;
            if !list.iter().any(|d| d == holder) {
                list.push(holder.to_string());
            }

            let reference = Reference {
                record_type: referenced.to_string(),
                foreign_key: relation.foreign_key_field(),
            };
            if seen_references.insert((holder.to_string(), reference.clone())) {
                references
                    .get_mut(holder)
                    .ok_or_else(|| unknown_type(holder))?
                    .push(reference);
            }
        }

        tracing::debug!(
            record_types = record_types.len(),
            relations = schema.relations.len(),
            "dependency graph built"
        );

        Ok(Self {
            record_types,
            dependents,
            references,
        })
    }

    /// Whether `record_type` is part of the known set.
    pub fn contains(&self, record_type: &str) -> bool {
        self.dependents.contains_key(record_type)
    }

    /// All known record types.
    pub fn record_types(&self) -> &[String] {
        &self.record_types
    }

    /// Types that depend on `record_type`. Empty for unknown types.
    pub fn dependents_of(&self, record_type: &str) -> &[String] {
        self.dependents
            .get(record_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// References carried by records of `record_type`, i.e. the types whose
    /// subscribers must hear about its changes.
    pub fn references_of(&self, record_type: &str) -> &[Reference] {
        self.references
            .get(record_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of (referenced, dependent) pairs.
    pub fn edge_count(&self) -> usize {
        self.dependents.values().map(Vec::len).sum()
    }
}

fn unknown_type(record_type: &str) -> Error {
    Error::Configuration(format!("unknown record type {record_type} in relation"))
}
