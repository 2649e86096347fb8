//! Shared connection state and counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected
    #[default]
    Disconnected,
    /// Handshake in progress
    Connecting,
    /// Heartbeat and reader running
    Connected,
    /// Waiting out the reconnect delay
    Reconnecting,
    /// Interrupt received
    ShuttingDown,
}

/// Counters accumulated across every connection attempt
#[derive(Debug, Default)]
pub struct ProbeStats {
    attempts: AtomicU64,
    connections: AtomicU64,
    messages: AtomicU64,
    probes_sent: AtomicU64,
}

/// Point-in-time copy of [`ProbeStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub attempts: u64,
    pub connections: u64,
    pub messages: u64,
    pub probes_sent: u64,
}

impl ProbeStats {
    /// Count a connection attempt and return its 1-based number
    pub fn record_attempt(&self) -> u64 {
        self.attempts.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_connection(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message(&self) {
        self.messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_probe(&self) {
        self.probes_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
            messages: self.messages.load(Ordering::Relaxed),
            probes_sent: self.probes_sent.load(Ordering::Relaxed),
        }
    }
}
