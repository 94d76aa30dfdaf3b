mod client;
mod config;
mod recovery;

pub use client::{Channel, ChannelEvent, DisconnectReason};
pub use config::{Config, ConfigBuilder};
pub use recovery::{ReconnectionState, backoff_delay};
