//! Serialized access to the notification engine.
//!
//! Every registry mutation and notification goes through one worker task
//! that handles requests strictly in arrival order. Callers talk to it via
//! a cloneable [`DispatcherHandle`] and receive results over oneshot
//! channels.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use rowcast_core::{
    DataChanged, MutationEvent, Operation, ReadOptions, RecordData, RecordId,
    SharedNotificationEngine, SubscriptionId,
};

use crate::error::Error;

type Reply<T> = oneshot::Sender<rowcast_core::Result<T>>;

/// A request handled by the dispatcher.
pub enum Request {
    /// Register a subscription.
    Subscribe {
        record_type: String,
        subscription_id: SubscriptionId,
        record_id: Option<RecordId>,
        reply: Reply<()>,
    },
    /// Remove a subscription.
    Unsubscribe {
        record_type: String,
        subscription_id: SubscriptionId,
        record_id: Option<RecordId>,
        reply: Reply<()>,
    },
    /// Remove every subscription of a subscriber.
    UnsubscribeAll {
        subscription_id: SubscriptionId,
        reply: Reply<usize>,
    },
    /// Notify about a single-record mutation.
    Notify {
        event: MutationEvent,
        reply: Reply<Option<DataChanged>>,
    },
    /// Notify about a bulk mutation.
    NotifyBulk {
        record_type: String,
        operation: Operation,
        changed_fields: Vec<String>,
        records: Vec<RecordData>,
        reply: Reply<Vec<DataChanged>>,
    },
    /// Register subscriptions for the results of a read.
    TrackRead {
        record_type: String,
        records: Vec<RecordData>,
        options: ReadOptions,
        reply: Reply<usize>,
    },
}

/// Worker that owns the request queue.
pub struct Dispatcher {
    rx: mpsc::Receiver<Request>,
    engine: SharedNotificationEngine,
}

impl Dispatcher {
    /// Create a dispatcher over `engine`.
    pub fn new(rx: mpsc::Receiver<Request>, engine: SharedNotificationEngine) -> Self {
        Self { rx, engine }
    }

    /// Process requests until every handle is dropped.
    pub async fn run(mut self) {
        info!("dispatcher started");

        while let Some(request) = self.rx.recv().await {
            self.process(request);
        }

        info!("dispatcher stopped (channel closed)");
    }

    fn process(&self, request: Request) {
        // A dropped reply receiver means the caller stopped waiting.
        match request {
            Request::Subscribe {
                record_type,
                subscription_id,
                record_id,
                reply,
            } => {
                let result =
                    self.engine
                        .add_subscription(&record_type, &subscription_id, record_id.as_ref());
                let _ = reply.send(result);
            }
            Request::Unsubscribe {
                record_type,
                subscription_id,
                record_id,
                reply,
            } => {
                let result = self.engine.remove_subscription(
                    &record_type,
                    &subscription_id,
                    record_id.as_ref(),
                );
                let _ = reply.send(result);
            }
            Request::UnsubscribeAll {
                subscription_id,
                reply,
            } => {
                let _ = reply.send(self.engine.remove_all_subscriptions(&subscription_id));
            }
            Request::Notify { event, reply } => {
                debug!(
                    record_type = %event.record_type,
                    operation = %event.operation,
                    "dispatching mutation"
                );
                let _ = reply.send(self.engine.notify_event(&event));
            }
            Request::NotifyBulk {
                record_type,
                operation,
                changed_fields,
                records,
                reply,
            } => {
                let result =
                    self.engine
                        .notify_bulk(&record_type, operation, &changed_fields, &records);
                let _ = reply.send(result);
            }
            Request::TrackRead {
                record_type,
                records,
                options,
                reply,
            } => {
                let _ = reply.send(self.engine.track_read(&record_type, &records, &options));
            }
        }
    }
}

/// Handle for submitting requests to a running dispatcher.
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<Request>,
    engine: SharedNotificationEngine,
}

impl DispatcherHandle {
    /// The engine behind the dispatcher, for read-only access.
    pub fn engine(&self) -> &SharedNotificationEngine {
        &self.engine
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Request,
    ) -> Result<T, Error> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| Error::DispatcherClosed)?;
        let result = rx.await.map_err(|_| Error::DispatcherClosed)?;
        Ok(result?)
    }

    /// Register a subscription.
    pub async fn subscribe(
        &self,
        record_type: impl Into<String>,
        subscription_id: SubscriptionId,
        record_id: Option<RecordId>,
    ) -> Result<(), Error> {
        let record_type = record_type.into();
        self.call(|reply| Request::Subscribe {
            record_type,
            subscription_id,
            record_id,
            reply,
        })
        .await
    }

    /// Remove a subscription.
    pub async fn unsubscribe(
        &self,
        record_type: impl Into<String>,
        subscription_id: SubscriptionId,
        record_id: Option<RecordId>,
    ) -> Result<(), Error> {
        let record_type = record_type.into();
        self.call(|reply| Request::Unsubscribe {
            record_type,
            subscription_id,
            record_id,
            reply,
        })
        .await
    }

    /// Remove every subscription of `subscription_id`.
    pub async fn unsubscribe_all(&self, subscription_id: SubscriptionId) -> Result<usize, Error> {
        self.call(|reply| Request::UnsubscribeAll {
            subscription_id,
            reply,
        })
        .await
    }

    /// Notify about a single-record mutation.
    pub async fn notify(&self, event: MutationEvent) -> Result<Option<DataChanged>, Error> {
        self.call(|reply| Request::Notify { event, reply }).await
    }

    /// Notify about a bulk mutation.
    pub async fn notify_bulk(
        &self,
        record_type: impl Into<String>,
        operation: Operation,
        changed_fields: Vec<String>,
        records: Vec<RecordData>,
    ) -> Result<Vec<DataChanged>, Error> {
        let record_type = record_type.into();
        self.call(|reply| Request::NotifyBulk {
            record_type,
            operation,
            changed_fields,
            records,
            reply,
        })
        .await
    }

    /// Register subscriptions for the results of a read.
    pub async fn track_read(
        &self,
        record_type: impl Into<String>,
        records: Vec<RecordData>,
        options: ReadOptions,
    ) -> Result<usize, Error> {
        let record_type = record_type.into();
        self.call(|reply| Request::TrackRead {
            record_type,
            records,
            options,
            reply,
        })
        .await
    }
}

/// Spawn a dispatcher for `engine` and return a handle to it.
pub fn start_dispatcher(engine: SharedNotificationEngine, queue_size: usize) -> DispatcherHandle {
    let (tx, rx) = mpsc::channel(queue_size.max(1));
    let dispatcher = Dispatcher::new(rx, Arc::clone(&engine));

    tokio::spawn(async move {
        dispatcher.run().await;
    });

    DispatcherHandle { tx, engine }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowcast_core::{record_data, NotificationEngine, NotifierEvent, RelationDef, Schema};
    use serde_json::json;

    fn engine() -> SharedNotificationEngine {
        let schema = Schema::new()
            .with_type("Parent")
            .with_type("Child")
            .with_relation(RelationDef::belongs_to("Child", "Parent"));
        Arc::new(NotificationEngine::new(&schema).unwrap())
    }

    #[tokio::test]
    async fn test_subscribe_and_notify() {
        let handle = start_dispatcher(engine(), 8);
        let mut rx = handle.engine().events().subscribe();

        handle
            .subscribe("Parent", SubscriptionId::from(1), Some(RecordId::from("p1")))
            .await
            .unwrap();

        let event = MutationEvent::create(
            "Child",
            record_data(json!({"id": "c1", "ParentId": "p1"})),
        );
        let changed = handle.notify(event).await.unwrap().unwrap();
        assert_eq!(changed.subscription_ids, vec![SubscriptionId::from(1)]);

        assert!(matches!(
            rx.recv().await.unwrap(),
            NotifierEvent::SubscriptionsChanged(_)
        ));
        assert_eq!(rx.recv().await.unwrap(), NotifierEvent::DataChanged(changed));
    }

    #[tokio::test]
    async fn test_errors_are_returned() {
        let handle = start_dispatcher(engine(), 8);

        let err = handle
            .subscribe("Ghost", SubscriptionId::from(1), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Engine(rowcast_core::Error::UnknownRecordType(_))
        ));

        let err = handle
            .unsubscribe("Parent", SubscriptionId::from(1), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Engine(rowcast_core::Error::SubscriptionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_requests_processed_in_order() {
        let handle = start_dispatcher(engine(), 4);

        let mut tasks = Vec::new();
        for i in 0..20u64 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                handle
                    .subscribe("Parent", SubscriptionId::from(i), None)
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(handle.engine().registry().subscription_count(), 20);
        assert_eq!(handle.unsubscribe_all(SubscriptionId::from(3)).await.unwrap(), 1);
        handle.engine().registry().verify_consistency().unwrap();
    }

    #[tokio::test]
    async fn test_track_read_and_bulk() {
        let handle = start_dispatcher(engine(), 8);
        let records = vec![
            record_data(json!({"id": "p1"})),
            record_data(json!({"id": "p2"})),
        ];

        let added = handle
            .track_read("Parent", records.clone(), ReadOptions::subscribe(5u64))
            .await
            .unwrap();
        assert_eq!(added, 2);

        let skipped = handle
            .notify_bulk("Parent", Operation::Update, vec!["name".into()], records.clone())
            .await
            .unwrap();
        assert!(skipped.is_empty());

        let deleted = handle
            .notify(MutationEvent::delete("Parent", records[0].clone()))
            .await
            .unwrap();
        assert!(deleted.is_some());
    }

    #[tokio::test]
    async fn test_dispatcher_stops_when_handles_dropped() {
        let engine = engine();
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(Dispatcher::new(rx, engine).run());

        drop(tx);
        task.await.unwrap();
    }
}
