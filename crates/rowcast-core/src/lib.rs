//! Rowcast Core - dependency-aware change notifications for record stores.
//!
//! Consumers subscribe to a record type (creates and deletes), to a single
//! record (updates and deletes), and implicitly to the records that depend
//! on a subscribed record. The record store reports its mutations through
//! [`hooks::LifecycleHooks`]; the [`NotificationEngine`] turns each one into
//! at most one consolidated [`DataChanged`] event.

pub mod catalog;
pub mod engine;
pub mod error;
pub mod event;
pub mod graph;
pub mod hooks;
pub mod metrics;
pub mod record;
pub mod registry;

pub use catalog::{RecordTypeDef, RelationDef, RelationKind, Schema};
pub use engine::{EngineConfig, NotificationEngine, SharedNotificationEngine};
pub use error::{Error, Result};
pub use event::{
    DataChanged, EventBus, NotifierEvent, SubscriptionAction, SubscriptionsChanged,
};
pub use graph::{DependencyGraph, Reference};
pub use hooks::{attach, HookRegistrar, LifecycleHooks, ReadOptions};
pub use metrics::{EngineMetrics, MetricsSnapshot, SharedEngineMetrics};
pub use record::{record_data, MutationEvent, Operation, RecordData, RecordId, SubscriptionId};
pub use registry::{
    ResourceKey, SubscriptionIndices, SubscriptionKind, SubscriptionRegistry,
};
