//! Core error types.

use thiserror::Error;

use crate::registry::SubscriptionKind;

/// Errors raised by the graph builder, registry and notification engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid relationship metadata or schema.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A record type outside the known set was referenced.
    #[error("unknown record type: {0}")]
    UnknownRecordType(String),

    /// The exact subscription is already registered.
    #[error("subscription {subscription_id} already holds a {kind} subscription on {record_type}{}", fmt_record(.record_id))]
    DuplicateSubscription {
        subscription_id: String,
        record_type: String,
        kind: SubscriptionKind,
        record_id: Option<String>,
    },

    /// No matching subscription exists in either index.
    #[error("subscription {subscription_id} has no {kind} subscription on {record_type}{}", fmt_record(.record_id))]
    SubscriptionNotFound {
        subscription_id: String,
        record_type: String,
        kind: SubscriptionKind,
        record_id: Option<String>,
    },

    /// The by-subscriber and by-resource indices disagree about an entry.
    #[error("subscription index divergence for {subscription_id} on {record_type}{} (by_subscriber={in_subscriber_index}, by_resource={in_resource_index})", fmt_record(.record_id))]
    IndexDivergence {
        subscription_id: String,
        record_type: String,
        record_id: Option<String>,
        in_subscriber_index: bool,
        in_resource_index: bool,
    },

    /// Malformed mutation passed to the notification engine.
    #[error("invalid mutation event: {0}")]
    InvalidMutationEvent(String),
}

impl Error {
    /// Whether this error stems from configuration (unknown types, bad relations).
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration(_) | Error::UnknownRecordType(_))
    }

    /// Whether this error signals a broken internal invariant rather than a caller mistake.
    pub fn is_internal(&self) -> bool {
        matches!(self, Error::IndexDivergence { .. })
    }
}

fn fmt_record(record_id: &Option<String>) -> String {
    match record_id {
        Some(id) => format!(" record {id}"),
        None => String::new(),
    }
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
