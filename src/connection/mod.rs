//! Connection handling for the probe
//!
//! - `manager`: reconnect loop, owns one connection at a time
//! - `heartbeat`: periodic ping/pong liveness probe
//! - `reader`: journals inbound messages, forwards pongs
//! - `state`: connection state and counters

mod heartbeat;
mod manager;
mod reader;
mod state;

pub use manager::{ConnectionConfig, ConnectionManager};
