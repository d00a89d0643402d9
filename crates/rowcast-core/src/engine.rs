//! Notification engine.
//!
//! For each mutation the engine resolves the interested subscribers in one
//! consistent registry view:
//!
//! 1. generic subscribers of the type for creates and deletes,
//! 2. specific subscribers of the record for updates and deletes,
//! 3. specific subscribers of every record the mutated record references
//!    (one hop through the dependency graph).
//!
//! The union is deduplicated in order of first discovery and, when
//! non-empty, emitted as a single [`DataChanged`] event.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::catalog::Schema;
use crate::error::{Error, Result};
use crate::event::{DataChanged, EventBus, NotifierEvent, DEFAULT_EVENT_CAPACITY};
use crate::graph::DependencyGraph;
use crate::hooks::ReadOptions;
use crate::metrics::{EngineMetrics, MetricsSnapshot, SharedEngineMetrics};
use crate::record::{MutationEvent, Operation, RecordData, RecordId, SubscriptionId};
use crate::registry::{RegistryView, SubscriptionRegistry};

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
    /// Fan bulk updates and deletes out into per-record notifications.
    pub propagate_bulk: bool,
}

impl EngineConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
            propagate_bulk: false,
        }
    }

    /// Set the event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Enable or disable per-record fan-out of bulk updates and deletes.
    pub fn with_propagate_bulk(mut self, propagate: bool) -> Self {
        self.propagate_bulk = propagate;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Change-notification engine for one record store.
pub struct NotificationEngine {
    graph: DependencyGraph,
    identity_fields: HashMap<String, String>,
    registry: SubscriptionRegistry,
    events: EventBus,
    metrics: SharedEngineMetrics,
    config: EngineConfig,
}

impl NotificationEngine {
    /// Create an engine with the default configuration.
    pub fn new(schema: &Schema) -> Result<Self> {
        Self::with_config(schema, EngineConfig::default())
    }

    /// Create an engine.
    ///
    /// Builds the dependency graph; fails with [`Error::Configuration`] on an
    /// empty schema or a relation naming an unknown type.
    pub fn with_config(schema: &Schema, config: EngineConfig) -> Result<Self> {
        let graph = DependencyGraph::build(schema)?;
        let identity_fields = schema
            .record_types
            .iter()
            .map(|t| (t.name.clone(), t.identity_field.clone()))
            .collect();

        let events = EventBus::new(config.event_capacity);
        let metrics = Arc::new(EngineMetrics::new());
        let registry = SubscriptionRegistry::new(
            graph.record_types().iter().cloned(),
            events.clone(),
            Arc::clone(&metrics),
        );

        tracing::info!(
            record_types = graph.record_types().len(),
            dependency_edges = graph.edge_count(),
            propagate_bulk = config.propagate_bulk,
            "notification engine ready"
        );

        Ok(Self {
            graph,
            identity_fields,
            registry,
            events,
            metrics,
            config,
        })
    }

    /// The dependency graph.
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// The subscription registry.
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// The event bus.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// The active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current counter values.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Register a subscription. See [`SubscriptionRegistry::add_subscription`].
    pub fn add_subscription(
        &self,
        record_type: &str,
        subscription_id: &SubscriptionId,
        record_id: Option<&RecordId>,
    ) -> Result<()> {
        self.registry
            .add_subscription(record_type, subscription_id, record_id)
    }

    /// Remove a subscription. See [`SubscriptionRegistry::remove_subscription`].
    pub fn remove_subscription(
        &self,
        record_type: &str,
        subscription_id: &SubscriptionId,
        record_id: Option<&RecordId>,
    ) -> Result<()> {
        self.registry
            .remove_subscription(record_type, subscription_id, record_id)
    }

    /// Remove all subscriptions of a subscriber.
    pub fn remove_all_subscriptions(&self, subscription_id: &SubscriptionId) -> Result<usize> {
        self.registry.remove_all_subscriptions(subscription_id)
    }

    /// Own id of a record, read from its type's identity field.
    pub fn record_id(&self, record_type: &str, data: &RecordData) -> Option<RecordId> {
        let field = self.identity_fields.get(record_type)?;
        data.get(field).and_then(RecordId::from_value)
    }

    /// Process one mutation.
    ///
    /// Returns the emitted event, or `None` when nobody was interested.
    /// Updates and deletes must carry the record's own id.
    pub fn notify(
        &self,
        record_type: &str,
        operation: Operation,
        changed_fields: &[String],
        data: &RecordData,
    ) -> Result<Option<DataChanged>> {
        self.metrics.record_mutation(operation);

        let subscription_ids = self.resolve_subscribers(record_type, operation, data)?;
        if subscription_ids.is_empty() {
            tracing::trace!(record_type, %operation, "no subscribers for mutation");
            return Ok(None);
        }

        let event = DataChanged {
            operation,
            record_type: record_type.to_string(),
            data: data.clone(),
            changed_fields: changed_fields.to_vec(),
            subscription_ids,
        };

        self.metrics.record_notification(event.subscription_ids.len());
        let receivers = self.events.emit(NotifierEvent::DataChanged(event.clone()));
        tracing::trace!(
            record_type,
            %operation,
            subscribers = event.subscription_ids.len(),
            receivers,
            "emitted data change"
        );

        Ok(Some(event))
    }

    /// Process a [`MutationEvent`].
    pub fn notify_event(&self, event: &MutationEvent) -> Result<Option<DataChanged>> {
        self.notify(
            &event.record_type,
            event.operation,
            &event.changed_fields,
            &event.data,
        )
    }

    /// Process a bulk mutation.
    ///
    /// Bulk creates fan out into one notification per record. Bulk updates
    /// and deletes are only fanned out when [`EngineConfig::propagate_bulk`]
    /// is set; otherwise they are counted and dropped.
    ///
    /// Every record is checked before anything is emitted: an update or
    /// delete batch containing a record without an id fails as a whole.
    pub fn notify_bulk(
        &self,
        record_type: &str,
        operation: Operation,
        changed_fields: &[String],
        records: &[RecordData],
    ) -> Result<Vec<DataChanged>> {
        if operation != Operation::Create && !self.config.propagate_bulk {
            self.metrics.record_bulk_skipped();
            tracing::debug!(
                record_type,
                %operation,
                records = records.len(),
                "bulk mutation not propagated"
            );
            return Ok(Vec::new());
        }

        if operation.reaches_specific() && self.graph.contains(record_type) {
            if let Some(position) = records
                .iter()
                .position(|data| self.record_id(record_type, data).is_none())
            {
                return Err(Error::InvalidMutationEvent(format!(
                    "bulk {operation} on {record_type}: record {position} has no id"
                )));
            }
        }

        let mut emitted = Vec::with_capacity(records.len());
        for data in records {
            if let Some(event) = self.notify(record_type, operation, changed_fields, data)? {
                emitted.push(event);
            }
        }
        Ok(emitted)
    }

    /// Compute the deduplicated subscriber set for a mutation without emitting.
    pub fn resolve_subscribers(
        &self,
        record_type: &str,
        operation: Operation,
        data: &RecordData,
    ) -> Result<Vec<SubscriptionId>> {
        if !self.graph.contains(record_type) {
            tracing::warn!(record_type, %operation, "mutation on unknown record type ignored");
            return Ok(Vec::new());
        }

        let own_id = self.record_id(record_type, data);
        if operation.reaches_specific() && own_id.is_none() {
            return Err(Error::InvalidMutationEvent(format!(
                "{operation} on {record_type} without a record id"
            )));
        }

        let view = self.registry.read();
        let mut collector = Collector::default();

        if operation.reaches_generic() {
            collector.extend(view.generic_subscribers(record_type));
        }
        if operation.reaches_specific() {
            if let Some(id) = &own_id {
                collector.extend(view.record_subscribers(record_type, id));
            }
        }

        let cascaded = self.cascade(&view, record_type, data, &mut collector);
        drop(view);

        if cascaded > 0 {
            self.metrics.record_cascade(cascaded);
        }
        Ok(collector.ids)
    }

    /// Add subscribers of records referenced by `data`. Returns how many new
    /// subscribers the cascade contributed.
    fn cascade(
        &self,
        view: &RegistryView<'_>,
        record_type: &str,
        data: &RecordData,
        collector: &mut Collector,
    ) -> usize {
        let mut added = 0;
        for reference in self.graph.references_of(record_type) {
            let Some(parent_id) = data
                .get(&reference.foreign_key)
                .and_then(RecordId::from_value)
            else {
                continue;
            };

            added += collector.extend(view.record_subscribers(&reference.record_type, &parent_id));
        }
        added
    }

    /// Register subscriptions for records returned by a read.
    ///
    /// Does nothing unless `options` carries a subscription id. Each returned
    /// record with an id gets a specific subscription; `options.generic`
    /// also subscribes to the whole type. Subscriptions that already exist
    /// are kept. Returns how many were added.
    pub fn track_read(
        &self,
        record_type: &str,
        records: &[RecordData],
        options: &ReadOptions,
    ) -> Result<usize> {
        let Some(subscription_id) = &options.subscription_id else {
            return Ok(0);
        };
        if !self.registry.is_known_type(record_type) {
            return Err(Error::UnknownRecordType(record_type.to_string()));
        }

        let mut added = 0;
        if options.generic {
            added += self.add_if_absent(record_type, subscription_id, None)?;
        }
        for data in records {
            match self.record_id(record_type, data) {
                Some(id) => added += self.add_if_absent(record_type, subscription_id, Some(&id))?,
                None => {
                    tracing::debug!(record_type, "read record without id not tracked");
                }
            }
        }
        Ok(added)
    }

    fn add_if_absent(
        &self,
        record_type: &str,
        subscription_id: &SubscriptionId,
        record_id: Option<&RecordId>,
    ) -> Result<usize> {
        match self
            .registry
            .add_subscription(record_type, subscription_id, record_id)
        {
            Ok(()) => Ok(1),
            Err(Error::DuplicateSubscription { .. }) => Ok(0),
            Err(e) => Err(e),
        }
    }
}

/// Ordered, duplicate-free subscriber list.
#[derive(Default)]
struct Collector {
    ids: Vec<SubscriptionId>,
    seen: HashSet<SubscriptionId>,
}

impl Collector {
    fn extend(&mut self, ids: &[SubscriptionId]) -> usize {
        let mut added = 0;
        for id in ids {
            if self.seen.insert(id.clone()) {
                self.ids.push(id.clone());
                added += 1;
            }
        }
        added
    }
}

/// Shared engine handle.
pub type SharedNotificationEngine = Arc<NotificationEngine>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{RecordTypeDef, RelationDef};
    use crate::record::record_data;
    use serde_json::json;

    fn sid(id: u64) -> SubscriptionId {
        SubscriptionId::from(id)
    }

    fn rid(id: &str) -> RecordId {
        RecordId::from(id)
    }

    fn engine() -> NotificationEngine {
        let schema = Schema::new()
            .with_type("Parent")
            .with_type("Child")
            .with_type("B")
            .with_type("X")
            .with_record_type(RecordTypeDef::new("Keyed").with_identity_field("key"))
            .with_relation(RelationDef::has_many("Parent", "Child"));
        NotificationEngine::new(&schema).unwrap()
    }

    #[test]
    fn test_generic_create_and_delete_only() {
        let engine = engine();
        engine.add_subscription("B", &sid(5), None).unwrap();
        let data = record_data(json!({"id": "b1"}));

        let created = engine.notify("B", Operation::Create, &[], &data).unwrap();
        assert_eq!(created.unwrap().subscription_ids, vec![sid(5)]);

        let updated = engine.notify("B", Operation::Update, &[], &data).unwrap();
        assert!(updated.is_none());

        let deleted = engine.notify("B", Operation::Delete, &[], &data).unwrap();
        assert_eq!(deleted.unwrap().subscription_ids, vec![sid(5)]);
    }

    #[test]
    fn test_specific_update_and_delete_only() {
        let engine = engine();
        engine.add_subscription("B", &sid(1), Some(&rid("b1"))).unwrap();
        let b1 = record_data(json!({"id": "b1"}));
        let b2 = record_data(json!({"id": "b2"}));

        assert!(engine.notify("B", Operation::Create, &[], &b1).unwrap().is_none());
        assert!(engine.notify("B", Operation::Update, &[], &b1).unwrap().is_some());
        assert!(engine.notify("B", Operation::Update, &[], &b2).unwrap().is_none());
        assert!(engine.notify("B", Operation::Delete, &[], &b1).unwrap().is_some());
        assert!(engine.notify("B", Operation::Delete, &[], &b2).unwrap().is_none());
    }

    #[test]
    fn test_delete_deduplicates_generic_and_specific() {
        let engine = engine();
        engine.add_subscription("B", &sid(1), None).unwrap();
        engine.add_subscription("B", &sid(1), Some(&rid("b1"))).unwrap();
        engine.add_subscription("B", &sid(2), Some(&rid("b1"))).unwrap();

        let event = engine
            .notify("B", Operation::Delete, &[], &record_data(json!({"id": "b1"})))
            .unwrap()
            .unwrap();
        assert_eq!(event.subscription_ids, vec![sid(1), sid(2)]);
    }

    #[test]
    fn test_cascade_to_parent_subscriber() {
        let engine = engine();
        engine.add_subscription("Parent", &sid(1), Some(&rid("p1"))).unwrap();
        let mut rx = engine.events().subscribe();

        let child = record_data(json!({"id": "c1", "ParentId": "p1", "name": "kid"}));
        let fields = vec!["name".to_string()];
        let event = engine
            .notify("Child", Operation::Create, &fields, &child)
            .unwrap()
            .unwrap();

        assert_eq!(event.record_type, "Child");
        assert_eq!(event.operation, Operation::Create);
        assert_eq!(event.subscription_ids, vec![sid(1)]);
        assert_eq!(event.changed_fields, fields);
        assert_eq!(rx.try_recv().unwrap(), NotifierEvent::DataChanged(event));
        assert!(rx.try_recv().is_err());
        assert_eq!(engine.metrics().cascade_hits, 1);
    }

    #[test]
    fn test_cascade_ignores_other_parents_and_null_keys() {
        let engine = engine();
        engine.add_subscription("Parent", &sid(1), Some(&rid("p1"))).unwrap();

        let other = record_data(json!({"id": "c1", "ParentId": "p2"}));
        let orphan = record_data(json!({"id": "c2", "ParentId": null}));
        let missing = record_data(json!({"id": "c3"}));

        for data in [other, orphan, missing] {
            assert!(engine
                .notify("Child", Operation::Update, &[], &data)
                .unwrap()
                .is_none());
        }
    }

    #[test]
    fn test_cascade_does_not_flow_downwards() {
        let engine = engine();
        engine.add_subscription("Child", &sid(1), Some(&rid("c1"))).unwrap();

        let parent = record_data(json!({"id": "p1", "ChildId": "c1"}));
        assert!(engine
            .notify("Parent", Operation::Update, &[], &parent)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_cascade_numeric_foreign_key() {
        let engine = engine();
        engine.add_subscription("Parent", &sid(9), Some(&rid("42"))).unwrap();

        let child = record_data(json!({"id": 7, "ParentId": 42}));
        let event = engine
            .notify("Child", Operation::Delete, &[], &child)
            .unwrap()
            .unwrap();
        assert_eq!(event.subscription_ids, vec![sid(9)]);
    }

    #[test]
    fn test_no_subscribers_no_event() {
        let engine = engine();
        let mut rx = engine.events().subscribe();
        let data = record_data(json!({"id": "x1"}));

        for op in [Operation::Create, Operation::Update, Operation::Delete] {
            assert!(engine.notify("X", op, &[], &data).unwrap().is_none());
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(engine.metrics().notifications_emitted, 0);
        assert_eq!(engine.metrics().mutations_seen, 3);
    }

    #[test]
    fn test_missing_id_on_update_or_delete() {
        let engine = engine();
        let data = record_data(json!({"name": "anonymous"}));

        for op in [Operation::Update, Operation::Delete] {
            let err = engine.notify("B", op, &[], &data).unwrap_err();
            assert!(matches!(err, Error::InvalidMutationEvent(_)));
        }
        assert!(engine.notify("B", Operation::Create, &[], &data).is_ok());
    }

    #[test]
    fn test_custom_identity_field() {
        let engine = engine();
        engine.add_subscription("Keyed", &sid(1), Some(&rid("k1"))).unwrap();

        let data = record_data(json!({"id": "ignored", "key": "k1"}));
        let event = engine.notify("Keyed", Operation::Update, &[], &data).unwrap();
        assert!(event.is_some());

        let err = engine
            .notify("Keyed", Operation::Update, &[], &record_data(json!({"id": "k1"})))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidMutationEvent(_)));
    }

    #[test]
    fn test_unknown_type_degrades() {
        let engine = engine();
        let data = record_data(json!({"id": 1}));
        assert!(engine.notify("Ghost", Operation::Update, &[], &data).unwrap().is_none());
    }

    #[test]
    fn test_bulk_create_fans_out() {
        let engine = engine();
        engine.add_subscription("B", &sid(5), None).unwrap();
        let records = vec![
            record_data(json!({"id": "b1"})),
            record_data(json!({"id": "b2"})),
        ];

        let events = engine
            .notify_bulk("B", Operation::Create, &[], &records)
            .unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_bulk_update_not_propagated_by_default() {
        let engine = engine();
        engine.add_subscription("B", &sid(5), Some(&rid("b1"))).unwrap();
        let records = vec![record_data(json!({"id": "b1"}))];

        let events = engine
            .notify_bulk("B", Operation::Update, &[], &records)
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(engine.metrics().bulk_skipped, 1);
    }

    #[test]
    fn test_bulk_update_propagated_when_enabled() {
        let schema = Schema::new().with_type("B");
        let engine = NotificationEngine::with_config(
            &schema,
            EngineConfig::new().with_propagate_bulk(true),
        )
        .unwrap();
        engine.add_subscription("B", &sid(5), Some(&rid("b1"))).unwrap();
        let records = vec![
            record_data(json!({"id": "b1"})),
            record_data(json!({"id": "b2"})),
        ];

        let events = engine
            .notify_bulk("B", Operation::Delete, &[], &records)
            .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_bulk_batch_with_missing_id_emits_nothing() {
        let schema = Schema::new().with_type("Message");
        let engine = NotificationEngine::with_config(
            &schema,
            EngineConfig::new().with_propagate_bulk(true),
        )
        .unwrap();
        engine.add_subscription("Message", &sid(1), None).unwrap();
        let mut rx = engine.events().subscribe();

        let records = vec![
            record_data(json!({"id": "m1"})),
            record_data(json!({"x": 1})),
            record_data(json!({"id": "m3"})),
        ];
        let err = engine
            .notify_bulk("Message", Operation::Delete, &[], &records)
            .unwrap_err();

        assert!(matches!(err, Error::InvalidMutationEvent(_)));
        assert!(rx.try_recv().is_err());
        assert_eq!(engine.metrics().notifications_emitted, 0);

        // A bulk create does not need ids.
        let created = engine
            .notify_bulk("Message", Operation::Create, &[], &records)
            .unwrap();
        assert_eq!(created.len(), 3);
    }

    #[test]
    fn test_cascade_deduplicates_with_direct_interest() {
        let schema = Schema::new()
            .with_type("User")
            .with_type("Message")
            .with_relation(RelationDef::belongs_to("Message", "User").with_foreign_key("senderId"))
            .with_relation(
                RelationDef::belongs_to("Message", "User").with_foreign_key("recipientId"),
            );
        let engine = NotificationEngine::new(&schema).unwrap();
        engine.add_subscription("Message", &sid(1), None).unwrap();
        engine.add_subscription("User", &sid(1), Some(&rid("u1"))).unwrap();
        engine.add_subscription("User", &sid(2), Some(&rid("u1"))).unwrap();

        let message = record_data(json!({"id": "m1", "senderId": "u1", "recipientId": "u1"}));
        let event = engine
            .notify("Message", Operation::Create, &[], &message)
            .unwrap()
            .unwrap();

        assert_eq!(event.subscription_ids, vec![sid(1), sid(2)]);
        assert_eq!(engine.metrics().cascade_hits, 1);
    }

    #[test]
    fn test_track_read() {
        let engine = engine();
        let records = vec![
            record_data(json!({"id": "b1"})),
            record_data(json!({"id": "b2"})),
            record_data(json!({"title": "no id"})),
        ];

        let untracked = engine.track_read("B", &records, &ReadOptions::none()).unwrap();
        assert_eq!(untracked, 0);
        assert!(engine.registry().is_empty());

        let options = ReadOptions::subscribe(sid(3)).with_generic();
        assert_eq!(engine.track_read("B", &records, &options).unwrap(), 3);
        // Reading again keeps the existing subscriptions.
        assert_eq!(engine.track_read("B", &records, &options).unwrap(), 0);
        assert_eq!(engine.registry().subscriptions_of(&sid(3)).len(), 3);

        let err = engine.track_read("Ghost", &records, &options).unwrap_err();
        assert!(matches!(err, Error::UnknownRecordType(_)));
    }

    #[test]
    fn test_empty_schema_rejected() {
        assert!(matches!(
            NotificationEngine::new(&Schema::new()),
            Err(Error::Configuration(_))
        ));
    }
}
