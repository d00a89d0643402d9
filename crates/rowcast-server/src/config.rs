//! Server configuration.

use clap::Parser;
use rowcast_core::event::DEFAULT_EVENT_CAPACITY;
use rowcast_core::{EngineConfig, Schema};
use std::path::PathBuf;

use crate::error::Error;

/// Default dispatcher queue size.
pub const DEFAULT_QUEUE_SIZE: usize = 256;

/// Rowcast server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path to the JSON schema describing record types and relations.
    pub schema_path: PathBuf,

    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,

    /// Number of requests the dispatcher queue buffers.
    pub queue_size: usize,

    /// Fan bulk updates and deletes out into per-record notifications.
    pub propagate_bulk: bool,
}

impl ServerConfig {
    /// Create a configuration reading its schema from `schema_path`.
    pub fn new(schema_path: impl Into<PathBuf>) -> Self {
        Self {
            schema_path: schema_path.into(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            queue_size: DEFAULT_QUEUE_SIZE,
            propagate_bulk: false,
        }
    }

    /// Set the event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Set the dispatcher queue size.
    pub fn with_queue_size(mut self, size: usize) -> Self {
        self.queue_size = size.max(1);
        self
    }

    /// Enable per-record fan-out of bulk updates and deletes.
    pub fn with_propagate_bulk(mut self, propagate: bool) -> Self {
        self.propagate_bulk = propagate;
        self
    }

    /// Engine settings derived from this configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::new()
            .with_event_capacity(self.event_capacity)
            .with_propagate_bulk(self.propagate_bulk)
    }

    /// Load the schema file.
    pub fn load_schema(&self) -> Result<Schema, Error> {
        let schema = Schema::load(&self.schema_path)?;
        if schema.record_types.is_empty() {
            return Err(Error::Config(format!(
                "schema {} declares no record types",
                self.schema_path.display()
            )));
        }
        Ok(schema)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("./schema.json")
    }
}

/// Command-line arguments for the server.
#[derive(Parser, Debug)]
#[command(name = "rowcast-server")]
#[command(version, about = "Replays record store mutations through the rowcast engine", long_about = None)]
pub struct Args {
    /// Path to the JSON schema file.
    #[arg(short, long, default_value = "./schema.json")]
    pub schema: PathBuf,

    /// Event channel capacity.
    #[arg(long, default_value_t = DEFAULT_EVENT_CAPACITY)]
    pub event_capacity: usize,

    /// Dispatcher queue size.
    #[arg(long, default_value_t = DEFAULT_QUEUE_SIZE)]
    pub queue_size: usize,

    /// Notify per record for bulk updates and deletes.
    #[arg(long)]
    pub propagate_bulk: bool,
}

impl Args {
    /// Convert command-line arguments to server configuration.
    pub fn into_config(self) -> ServerConfig {
        ServerConfig::new(self.schema)
            .with_event_capacity(self.event_capacity)
            .with_queue_size(self.queue_size)
            .with_propagate_bulk(self.propagate_bulk)
    }
}
