//! Subscription registry.
//!
//! Subscriptions are indexed twice: by subscriber (what does this
//! subscription id watch?) and by resource (who watches this type or this
//! record?). Both indices live in one [`Indices`] value behind a single
//! lock, and only the mutators on [`Indices`] touch them, so an entry is in
//! one index if and only if it is in the other.

use std::collections::{HashMap, HashSet};
use std::fmt;

use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::event::{EventBus, NotifierEvent, SubscriptionAction, SubscriptionsChanged};
use crate::metrics::SharedEngineMetrics;
use crate::record::{RecordId, SubscriptionId};

/// Generic (type-wide) or specific (single record) interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionKind {
    /// All create/delete events of a record type.
    Generic,
    /// Update/delete events of one record.
    Specific,
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionKind::Generic => f.write_str("generic"),
            SubscriptionKind::Specific => f.write_str("specific"),
        }
    }
}

/// Lookup key of the by-resource index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    /// Record type.
    pub record_type: String,
    /// Record id, `None` for the type-wide generic key.
    pub record_id: Option<RecordId>,
}

impl ResourceKey {
    /// Key for generic subscriptions on a type.
    pub fn generic(record_type: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            record_id: None,
        }
    }

    /// Key for specific subscriptions on one record.
    pub fn record(record_type: impl Into<String>, record_id: RecordId) -> Self {
        Self {
            record_type: record_type.into(),
            record_id: Some(record_id),
        }
    }

    fn new(record_type: &str, record_id: Option<&RecordId>) -> Self {
        Self {
            record_type: record_type.to_string(),
            record_id: record_id.cloned(),
        }
    }

    /// Kind of subscription stored under this key.
    pub fn kind(&self) -> SubscriptionKind {
        match self.record_id {
            Some(_) => SubscriptionKind::Specific,
            None => SubscriptionKind::Generic,
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.record_id {
            Some(id) => write!(f, "{}:{}", self.record_type, id),
            None => write!(f, "{}:*", self.record_type),
        }
    }
}

/// Where a subscription sits in each index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubscriptionIndices {
    /// Position within the subscriber's resource list.
    pub by_subscriber: Option<usize>,
    /// Position within the resource's subscriber list.
    pub by_resource: Option<usize>,
}

impl SubscriptionIndices {
    /// Present in both indices.
    pub fn is_present(&self) -> bool {
        self.by_subscriber.is_some() && self.by_resource.is_some()
    }

    /// Absent from both indices.
    pub fn is_absent(&self) -> bool {
        self.by_subscriber.is_none() && self.by_resource.is_none()
    }

    /// Present in exactly one index.
    pub fn is_divergent(&self) -> bool {
        !self.is_present() && !self.is_absent()
    }
}

/// The two cross-referenced indices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Indices {
    by_subscriber: HashMap<SubscriptionId, Vec<ResourceKey>>,
    by_resource: HashMap<ResourceKey, Vec<SubscriptionId>>,
}

impl Indices {
    fn find(&self, subscription_id: &SubscriptionId, key: &ResourceKey) -> SubscriptionIndices {
        SubscriptionIndices {
            by_subscriber: self
                .by_subscriber
                .get(subscription_id)
                .and_then(|keys| keys.iter().position(|k| k == key)),
            by_resource: self
                .by_resource
                .get(key)
                .and_then(|ids| ids.iter().position(|id| id == subscription_id)),
        }
    }

    fn insert(&mut self, subscription_id: &SubscriptionId, key: &ResourceKey) -> Result<()> {
        let found = self.find(subscription_id, key);
        if found.is_divergent() {
            return Err(divergence(subscription_id, key, found));
        }
        if found.is_present() {
            return Err(Error::DuplicateSubscription {
                subscription_id: subscription_id.to_string(),
                record_type: key.record_type.clone(),
                kind: key.kind(),
                record_id: key.record_id.as_ref().map(|id| id.to_string()),
            });
        }

        self.by_subscriber
            .entry(subscription_id.clone())
            .or_default()
            .push(key.clone());
        self.by_resource
            .entry(key.clone())
            .or_default()
            .push(subscription_id.clone());
        Ok(())
    }

    fn remove(&mut self, subscription_id: &SubscriptionId, key: &ResourceKey) -> Result<()> {
        let found = self.find(subscription_id, key);
        let (Some(subscriber_pos), Some(resource_pos)) = (found.by_subscriber, found.by_resource)
        else {
            if found.is_divergent() {
                return Err(divergence(subscription_id, key, found));
            }
            return Err(Error::SubscriptionNotFound {
                subscription_id: subscription_id.to_string(),
                record_type: key.record_type.clone(),
                kind: key.kind(),
                record_id: key.record_id.as_ref().map(|id| id.to_string()),
            });
        };

        if let Some(keys) = self.by_subscriber.get_mut(subscription_id) {
            keys.remove(subscriber_pos);
            if keys.is_empty() {
                self.by_subscriber.remove(subscription_id);
            }
        }
        if let Some(ids) = self.by_resource.get_mut(key) {
            ids.remove(resource_pos);
            if ids.is_empty() {
                self.by_resource.remove(key);
            }
        }
        Ok(())
    }

    fn subscribers(&self, key: &ResourceKey) -> &[SubscriptionId] {
        self.by_resource
            .get(key)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn len(&self) -> usize {
        self.by_resource.values().map(Vec::len).sum()
    }

    /// Check that every entry of each index is mirrored in the other.
    fn verify(&self) -> Result<()> {
        let forward: HashSet<(&SubscriptionId, &ResourceKey)> = self
            .by_subscriber
            .iter()
            .flat_map(|(id, keys)| keys.iter().map(move |k| (id, k)))
            .collect();
        let backward: HashSet<(&SubscriptionId, &ResourceKey)> = self
            .by_resource
            .iter()
            .flat_map(|(k, ids)| ids.iter().map(move |id| (id, k)))
            .collect();

        if let Some((id, key)) = forward.symmetric_difference(&backward).next() {
            let found = self.find(id, key);
            return Err(divergence(id, key, found));
        }
        Ok(())
    }
}

fn divergence(
    subscription_id: &SubscriptionId,
    key: &ResourceKey,
    found: SubscriptionIndices,
) -> Error {
    Error::IndexDivergence {
        subscription_id: subscription_id.to_string(),
        record_type: key.record_type.clone(),
        record_id: key.record_id.as_ref().map(|id| id.to_string()),
        in_subscriber_index: found.by_subscriber.is_some(),
        in_resource_index: found.by_resource.is_some(),
    }
}

/// Consistent read-only view of the registry.
///
/// Holding a view blocks registry mutations, so several lookups made
/// through one view see the same state.
pub struct RegistryView<'a> {
    indices: RwLockReadGuard<'a, Indices>,
}

impl RegistryView<'_> {
    /// Subscribers registered under `key`, in registration order.
    pub fn subscribers(&self, key: &ResourceKey) -> &[SubscriptionId] {
        self.indices.subscribers(key)
    }

    /// Generic subscribers of a record type.
    pub fn generic_subscribers(&self, record_type: &str) -> &[SubscriptionId] {
        self.subscribers(&ResourceKey::new(record_type, None))
    }

    /// Specific subscribers of one record.
    pub fn record_subscribers(&self, record_type: &str, record_id: &RecordId) -> &[SubscriptionId] {
        self.subscribers(&ResourceKey::new(record_type, Some(record_id)))
    }
}

/// Index of active subscriptions.
pub struct SubscriptionRegistry {
    known_types: HashSet<String>,
    indices: RwLock<Indices>,
    events: EventBus,
    metrics: SharedEngineMetrics,
}

impl SubscriptionRegistry {
    /// Create an empty registry accepting the given record types.
    pub fn new<I, S>(known_types: I, events: EventBus, metrics: SharedEngineMetrics) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known_types: known_types.into_iter().map(Into::into).collect(),
            indices: RwLock::new(Indices::default()),
            events,
            metrics,
        }
    }

    fn check_type(&self, record_type: &str) -> Result<()> {
        if self.known_types.contains(record_type) {
            Ok(())
        } else {
            Err(Error::UnknownRecordType(record_type.to_string()))
        }
    }

    /// Register interest in a record type (`record_id` absent) or one record.
    pub fn add_subscription(
        &self,
        record_type: &str,
        subscription_id: &SubscriptionId,
        record_id: Option<&RecordId>,
    ) -> Result<()> {
        self.check_type(record_type)?;
        let key = ResourceKey::new(record_type, record_id);

        let mut indices = self.indices.write();
        indices.insert(subscription_id, &key)?;
        self.metrics.record_subscription_added();

        tracing::debug!(
            subscription_id = %subscription_id,
            resource = %key,
            "subscription added"
        );
        self.emit_change(SubscriptionAction::Added, subscription_id, key);
        Ok(())
    }

    /// Remove one subscription.
    pub fn remove_subscription(
        &self,
        record_type: &str,
        subscription_id: &SubscriptionId,
        record_id: Option<&RecordId>,
    ) -> Result<()> {
        self.check_type(record_type)?;
        let key = ResourceKey::new(record_type, record_id);

        let mut indices = self.indices.write();
        self.remove_locked(&mut indices, subscription_id, key)
    }

    fn remove_locked(
        &self,
        indices: &mut Indices,
        subscription_id: &SubscriptionId,
        key: ResourceKey,
    ) -> Result<()> {
        if let Err(e) = indices.remove(subscription_id, &key) {
            if e.is_internal() {
                tracing::error!(
                    subscription_id = %subscription_id,
                    resource = %key,
                    "subscription indices diverged"
                );
            }
            return Err(e);
        }
        self.metrics.record_subscription_removed();

        tracing::debug!(
            subscription_id = %subscription_id,
            resource = %key,
            "subscription removed"
        );
        self.emit_change(SubscriptionAction::Removed, subscription_id, key);
        Ok(())
    }

    /// Remove every subscription owned by `subscription_id`.
    ///
    /// Returns how many were removed. An unknown id removes nothing.
    ///
    /// Every owned subscription is attempted. If the indices have diverged
    /// for some of them, the rest are still removed and signalled, and the
    /// first [`Error::IndexDivergence`] is returned afterwards.
    pub fn remove_all_subscriptions(&self, subscription_id: &SubscriptionId) -> Result<usize> {
        let mut indices = self.indices.write();

        let owned: Vec<ResourceKey> = indices
            .by_subscriber
            .get(subscription_id)
            .cloned()
            .unwrap_or_default();

        let mut count = 0;
        let mut first_error = None;
        for key in owned {
            match self.remove_locked(&mut indices, subscription_id, key) {
                Ok(()) => count += 1,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        drop(indices);

        if let Some(e) = first_error {
            return Err(e);
        }

        if count > 0 {
            tracing::debug!(
                subscription_id = %subscription_id,
                removed = count,
                "removed all subscriptions"
            );
        }
        Ok(count)
    }

    /// Locate a subscription in both indices without modifying anything.
    pub fn find_subscription_indices(
        &self,
        record_type: &str,
        subscription_id: &SubscriptionId,
        record_id: Option<&RecordId>,
    ) -> SubscriptionIndices {
        let key = ResourceKey::new(record_type, record_id);
        self.indices.read().find(subscription_id, &key)
    }

    /// Take a consistent read view.
    pub fn read(&self) -> RegistryView<'_> {
        RegistryView {
            indices: self.indices.read(),
        }
    }

    /// Subscribers registered under `key`.
    pub fn subscribers_for(&self, key: &ResourceKey) -> Vec<SubscriptionId> {
        self.indices.read().subscribers(key).to_vec()
    }

    /// Resources watched by `subscription_id`.
    pub fn subscriptions_of(&self, subscription_id: &SubscriptionId) -> Vec<ResourceKey> {
        self.indices
            .read()
            .by_subscriber
            .get(subscription_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Total number of subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.indices.read().len()
    }

    /// Whether no subscriptions exist.
    pub fn is_empty(&self) -> bool {
        self.indices.read().by_resource.is_empty()
    }

    /// Whether `record_type` is accepted by this registry.
    pub fn is_known_type(&self, record_type: &str) -> bool {
        self.known_types.contains(record_type)
    }

    /// Copy both indices.
    pub fn snapshot(&self) -> Indices {
        self.indices.read().clone()
    }

    /// Check the cross-index invariant.
    pub fn verify_consistency(&self) -> Result<()> {
        self.indices.read().verify()
    }

    fn emit_change(
        &self,
        action: SubscriptionAction,
        subscription_id: &SubscriptionId,
        key: ResourceKey,
    ) {
        let kind = key.kind();
        self.events
            .emit(NotifierEvent::SubscriptionsChanged(SubscriptionsChanged {
                action,
                record_type: key.record_type,
                subscription_id: subscription_id.clone(),
                record_id: key.record_id,
                kind,
            }));
    }
}
