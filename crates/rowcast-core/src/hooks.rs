//! Record store integration.
//!
//! A record store exposes its relationship description as a
//! [`Schema`](crate::catalog::Schema) and a callback registration point
//! ([`HookRegistrar`]). [`attach`] installs the engine as the
//! [`LifecycleHooks`] of every known record type, after which the store
//! calls back into the engine once per completed operation.

use std::sync::Arc;

use crate::engine::NotificationEngine;
use crate::error::Result;
use crate::record::{Operation, RecordData, SubscriptionId};

/// Per-read opt-in for subscription tracking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Subscriber to register for the returned records. `None` disables tracking.
    pub subscription_id: Option<SubscriptionId>,
    /// Also subscribe to create/delete events of the whole type.
    pub generic: bool,
}

impl ReadOptions {
    /// A read that registers nothing.
    pub fn none() -> Self {
        Self::default()
    }

    /// A read that subscribes `subscription_id` to the returned records.
    pub fn subscribe(subscription_id: impl Into<SubscriptionId>) -> Self {
        Self {
            subscription_id: Some(subscription_id.into()),
            generic: false,
        }
    }

    /// Also subscribe generically to the type.
    pub fn with_generic(mut self) -> Self {
        self.generic = true;
        self
    }

    /// Whether this read registers subscriptions.
    pub fn is_tracked(&self) -> bool {
        self.subscription_id.is_some()
    }
}

/// Callbacks a record store invokes after completing an operation.
pub trait LifecycleHooks: Send + Sync {
    /// A read returned `records`.
    fn after_find(&self, record_type: &str, records: &[RecordData], options: &ReadOptions)
        -> Result<()>;

    /// A single record was created.
    fn after_create(&self, record_type: &str, data: &RecordData) -> Result<()>;

    /// Several records were created in one call.
    fn after_bulk_create(&self, record_type: &str, records: &[RecordData]) -> Result<()>;

    /// A single record was updated.
    fn after_update(&self, record_type: &str, changed_fields: &[String], data: &RecordData)
        -> Result<()>;

    /// A single record was deleted.
    fn after_delete(&self, record_type: &str, data: &RecordData) -> Result<()>;

    /// Several records were updated in one call.
    fn after_bulk_update(
        &self,
        record_type: &str,
        changed_fields: &[String],
        records: &[RecordData],
    ) -> Result<()>;

    /// Several records were deleted in one call.
    fn after_bulk_delete(&self, record_type: &str, records: &[RecordData]) -> Result<()>;
}

/// Callback registration point provided by the record store.
pub trait HookRegistrar {
    /// Install `hooks` for `record_type`.
    fn register_hooks(&mut self, record_type: &str, hooks: Arc<dyn LifecycleHooks>);
}

/// Install `engine` as the lifecycle hooks of every record type it knows.
pub fn attach(engine: &Arc<NotificationEngine>, registrar: &mut dyn HookRegistrar) {
    for record_type in engine.graph().record_types() {
        let hooks: Arc<dyn LifecycleHooks> = engine.clone();
        registrar.register_hooks(record_type, hooks);
    }
}

impl LifecycleHooks for NotificationEngine {
    fn after_find(
        &self,
        record_type: &str,
        records: &[RecordData],
        options: &ReadOptions,
    ) -> Result<()> {
        self.track_read(record_type, records, options).map(|_| ())
    }

    fn after_create(&self, record_type: &str, data: &RecordData) -> Result<()> {
        let changed_fields: Vec<String> = data.keys().cloned().collect();
        self.notify(record_type, Operation::Create, &changed_fields, data)
            .map(|_| ())
    }

    fn after_bulk_create(&self, record_type: &str, records: &[RecordData]) -> Result<()> {
        for data in records {
            self.after_create(record_type, data)?;
        }
        Ok(())
    }

    fn after_update(
        &self,
        record_type: &str,
        changed_fields: &[String],
        data: &RecordData,
    ) -> Result<()> {
        self.notify(record_type, Operation::Update, changed_fields, data)
            .map(|_| ())
    }

    fn after_delete(&self, record_type: &str, data: &RecordData) -> Result<()> {
        self.notify(record_type, Operation::Delete, &[], data)
            .map(|_| ())
    }

    fn after_bulk_update(
        &self,
        record_type: &str,
        changed_fields: &[String],
        records: &[RecordData],
    ) -> Result<()> {
        self.notify_bulk(record_type, Operation::Update, changed_fields, records)
            .map(|_| ())
    }

    fn after_bulk_delete(&self, record_type: &str, records: &[RecordData]) -> Result<()> {
        self.notify_bulk(record_type, Operation::Delete, &[], records)
            .map(|_| ())
    }
}
