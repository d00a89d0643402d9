//! Rowcast Server library.
//!
//! Hosts the runnable surface around the notification engine: configuration,
//! a dispatcher that serializes engine access through one worker task, and a
//! JSON-lines replay of record store activity.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod replay;

pub use config::{Args, ServerConfig};
pub use dispatcher::{start_dispatcher, Dispatcher, DispatcherHandle, Request};
pub use error::Error;
pub use replay::{Command, Replay, ReplaySummary};
