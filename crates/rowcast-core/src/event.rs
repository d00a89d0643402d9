//! Observable events emitted by the registry and the notification engine.
//!
//! Events are fanned out over a `tokio::sync::broadcast` channel. Emission
//! is fire-and-forget: having no receivers is not an error, and a lagging
//! receiver loses the oldest events.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::record::{Operation, RecordData, RecordId, SubscriptionId};
use crate::registry::SubscriptionKind;

/// Default capacity of the event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Whether a registry change added or removed a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionAction {
    /// A subscription was registered.
    Added,
    /// A subscription was removed.
    Removed,
}

/// A registry mutation occurred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionsChanged {
    /// Added or removed.
    pub action: SubscriptionAction,
    /// Record type of the subscription.
    pub record_type: String,
    /// Owner of the subscription.
    pub subscription_id: SubscriptionId,
    /// Record id for specific subscriptions.
    pub record_id: Option<RecordId>,
    /// Generic or specific.
    pub kind: SubscriptionKind,
}

/// A mutation with at least one interested subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataChanged {
    /// What happened.
    pub operation: Operation,
    /// Type of the mutated record.
    pub record_type: String,
    /// Full record snapshot.
    pub data: RecordData,
    /// Fields touched by the mutation.
    pub changed_fields: Vec<String>,
    /// Interested subscribers, each listed once.
    pub subscription_ids: Vec<SubscriptionId>,
}

/// Any event the engine emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotifierEvent {
    /// Registry mutation.
    SubscriptionsChanged(SubscriptionsChanged),
    /// Consolidated change notification.
    DataChanged(DataChanged),
}

impl NotifierEvent {
    /// The data-changed payload, if this is one.
    pub fn as_data_changed(&self) -> Option<&DataChanged> {
        match self {
            NotifierEvent::DataChanged(event) => Some(event),
            NotifierEvent::SubscriptionsChanged(_) => None,
        }
    }
}

/// Broadcast channel carrying [`NotifierEvent`]s to any number of listeners.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<NotifierEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per receiver.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Start listening. Only events emitted after this call are received.
    pub fn subscribe(&self) -> broadcast::Receiver<NotifierEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Returns how many receivers it reached.
    pub fn emit(&self, event: NotifierEvent) -> usize {
        // An error here only means nobody is listening.
        self.tx.send(event).unwrap_or(0)
    }

    /// Number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
