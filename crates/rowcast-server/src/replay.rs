//! JSON-lines replay of record store activity.
//!
//! Each input line is one [`Command`]. Commands are applied through the
//! dispatcher; every event they cause is written as one JSON line, and
//! failures are written as `{"error": "..."}` lines without stopping the
//! stream.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast::{self, error::TryRecvError};

use rowcast_core::{
    MutationEvent, NotifierEvent, Operation, ReadOptions, RecordData, RecordId, SubscriptionId,
};

use crate::dispatcher::DispatcherHandle;
use crate::error::Error;

/// One replayed operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    /// Register a subscription.
    Subscribe {
        record_type: String,
        subscription_id: SubscriptionId,
        #[serde(default)]
        record_id: Option<RecordId>,
    },
    /// Remove a subscription.
    Unsubscribe {
        record_type: String,
        subscription_id: SubscriptionId,
        #[serde(default)]
        record_id: Option<RecordId>,
    },
    /// Remove all subscriptions of a subscriber.
    UnsubscribeAll { subscription_id: SubscriptionId },
    /// A record was created.
    Create { record_type: String, data: RecordData },
    /// Several records were created.
    BulkCreate {
        record_type: String,
        records: Vec<RecordData>,
    },
    /// A record was updated.
    Update {
        record_type: String,
        #[serde(default)]
        changed_fields: Vec<String>,
        data: RecordData,
    },
    /// Several records were updated.
    BulkUpdate {
        record_type: String,
        #[serde(default)]
        changed_fields: Vec<String>,
        records: Vec<RecordData>,
    },
    /// A record was deleted.
    Delete { record_type: String, data: RecordData },
    /// Several records were deleted.
    BulkDelete {
        record_type: String,
        records: Vec<RecordData>,
    },
    /// A read returned `records`.
    Find {
        record_type: String,
        records: Vec<RecordData>,
        #[serde(default)]
        subscription_id: Option<SubscriptionId>,
        #[serde(default)]
        generic: bool,
    },
}

impl Command {
    /// Apply the command through the dispatcher.
    pub async fn apply(self, handle: &DispatcherHandle) -> Result<(), Error> {
        match self {
            Command::Subscribe {
                record_type,
                subscription_id,
                record_id,
            } => handle.subscribe(record_type, subscription_id, record_id).await,
            Command::Unsubscribe {
                record_type,
                subscription_id,
                record_id,
            } => {
                handle
                    .unsubscribe(record_type, subscription_id, record_id)
                    .await
            }
            Command::UnsubscribeAll { subscription_id } => {
                handle.unsubscribe_all(subscription_id).await.map(|_| ())
            }
            Command::Create { record_type, data } => handle
                .notify(MutationEvent::create(record_type, data))
                .await
                .map(|_| ()),
            Command::BulkCreate {
                record_type,
                records,
            } => {
                // Each created record reports all of its fields as changed.
                for data in records {
                    handle
                        .notify(MutationEvent::create(record_type.clone(), data))
                        .await?;
                }
                Ok(())
            }
            Command::Update {
                record_type,
                changed_fields,
                data,
            } => handle
                .notify(MutationEvent::update(record_type, changed_fields, data))
                .await
                .map(|_| ()),
            Command::BulkUpdate {
                record_type,
                changed_fields,
                records,
            } => handle
                .notify_bulk(record_type, Operation::Update, changed_fields, records)
                .await
                .map(|_| ()),
            Command::Delete { record_type, data } => handle
                .notify(MutationEvent::delete(record_type, data))
                .await
                .map(|_| ()),
            Command::BulkDelete {
                record_type,
                records,
            } => handle
                .notify_bulk(record_type, Operation::Delete, Vec::new(), records)
                .await
                .map(|_| ()),
            Command::Find {
                record_type,
                records,
                subscription_id,
                generic,
            } => {
                let options = ReadOptions {
                    subscription_id,
                    generic,
                };
                handle
                    .track_read(record_type, records, options)
                    .await
                    .map(|_| ())
            }
        }
    }
}

/// Totals of a replay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Non-empty lines read.
    pub commands: usize,
    /// Commands that failed to parse or apply.
    pub errors: usize,
    /// Events written.
    pub events: usize,
}

/// Replays commands and writes the resulting events.
pub struct Replay {
    handle: DispatcherHandle,
    events: broadcast::Receiver<NotifierEvent>,
}

impl Replay {
    /// Create a replay over a running dispatcher.
    ///
    /// Only events emitted after this call are written.
    pub fn new(handle: DispatcherHandle) -> Self {
        let events = handle.engine().events().subscribe();
        Self { handle, events }
    }

    /// Read commands until EOF.
    pub async fn run<R, W>(&mut self, reader: R, writer: &mut W) -> Result<ReplaySummary, Error>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut summary = ReplaySummary::default();
        let mut lines = reader.lines();

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            summary.commands += 1;

            let outcome = match serde_json::from_str::<Command>(line) {
                Ok(command) => command.apply(&self.handle).await,
                Err(e) => Err(Error::Json(e)),
            };

            summary.events += self.flush_events(writer).await?;

            if let Err(e) = outcome {
                summary.errors += 1;
                tracing::warn!(line = summary.commands, error = %e, "command failed");
                let error_line = serde_json::json!({ "error": e.to_string() });
                write_line(writer, &error_line).await?;
            }
        }

        writer.flush().await?;
        Ok(summary)
    }

    async fn flush_events<W>(&mut self, writer: &mut W) -> Result<usize, Error>
    where
        W: AsyncWrite + Unpin,
    {
        let mut written = 0;
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    write_line(writer, &event).await?;
                    written += 1;
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event receiver lagged");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        Ok(written)
    }
}

async fn write_line<W, T>(writer: &mut W, value: &T) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    Ok(())
}
