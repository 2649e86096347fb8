//! Connection manager
//!
//! Owns the reconnect loop. Each iteration:
//! 1. Performs the WebSocket handshake (bounded by the connect timeout)
//! 2. Journals the CONNECTED banner and starts the heartbeat and reader
//! 3. Waits for whichever of them ends first, or for shutdown
//! 4. Cancels and awaits the heartbeat, then closes the socket
//! 5. Journals why the connection ended and sleeps the reconnect delay

use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::{Backoff, Constant};
use futures_util::stream::SplitSink;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::RwLock;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::heartbeat::{Heartbeat, HeartbeatExit, HeartbeatOutcome};
use super::reader::MessageReader;
use super::state::{ConnectionState, ProbeStats, StatsSnapshot};
use crate::config::EndpointSettings;
use crate::error::{Error, Result};
use crate::journal::Journal;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ─────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────

/// Timings and target for the reconnect loop
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket URL of the endpoint
    pub url: String,

    /// Interval between heartbeat probes
    pub heartbeat_interval: Duration,

    /// How long a probe waits for its pong
    pub heartbeat_timeout: Duration,

    /// Fixed pause between attempts
    pub reconnect_delay: Duration,

    /// Upper bound on the opening handshake
    pub connect_timeout: Duration,
}

impl From<&EndpointSettings> for ConnectionConfig {
    fn from(settings: &EndpointSettings) -> Self {
        Self {
            url: settings.url.clone(),
            heartbeat_interval: settings.heartbeat_interval(),
            heartbeat_timeout: settings.heartbeat_timeout(),
            reconnect_delay: settings.reconnect_delay(),
            connect_timeout: settings.connect_timeout(),
        }
    }
}

/// Why a live connection stopped
enum Ended<S> {
    Shutdown,
    Reader(Error),
    Heartbeat(std::result::Result<HeartbeatExit<S>, JoinError>),
}

// ─────────────────────────────────────────────────────────────────
// Connection Manager
// ─────────────────────────────────────────────────────────────────

/// Keeps one connection to the endpoint alive until shutdown
pub struct ConnectionManager {
    config: ConnectionConfig,
    journal: Arc<Journal>,
    state: Arc<RwLock<ConnectionState>>,
    stats: Arc<ProbeStats>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, journal: Arc<Journal>) -> Self {
        Self {
            config,
            journal,
            state: Arc::new(RwLock::new(ConnectionState::default())),
            stats: Arc::new(ProbeStats::default()),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Run the reconnect loop until `shutdown` turns true or its sender drops
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut delays = Constant::new(self.config.reconnect_delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let attempt = self.stats.record_attempt();
            self.set_state(ConnectionState::Connecting);
            info!(url = %self.config.url, attempt, "Connecting");

            let connected = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                result = self.connect() => result,
            };

            let cause = match connected {
                Ok(ws) => match self.run_connection(ws, &mut shutdown).await {
                    Some(cause) => cause,
                    None => break,
                },
                Err(e) => e,
            };

            self.report(attempt, &cause);
            self.set_state(ConnectionState::Reconnecting);

            let delay = delays.next_backoff().unwrap_or(self.config.reconnect_delay);
            self.journal
                .note(&format!("Reconnecting in {}...", format_delay(delay)));

            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                _ = time::sleep(delay) => {}
            }
        }

        self.set_state(ConnectionState::ShuttingDown);
        info!("Reconnect loop stopped");
    }

    /// Perform the opening handshake
    async fn connect(&self) -> Result<WsStream> {
        let url = self.config.url.as_str();
        match time::timeout(self.config.connect_timeout, connect_async(url)).await {
            Ok(Ok((ws, response))) => {
                debug!(status = %response.status(), "Handshake complete");
                Ok(ws)
            }
            Ok(Err(e)) => Err(Error::from_transport(url, e)),
            Err(_) => Err(Error::ConnectionTimeout {
                url: url.to_string(),
                timeout_ms: self.config.connect_timeout.as_millis() as u64,
            }),
        }
    }

    /// Drive one live connection; `None` means shutdown was requested
    async fn run_connection<T>(&self, ws: T, shutdown: &mut watch::Receiver<bool>) -> Option<Error>
    where
        T: Stream<Item = std::result::Result<WsMessage, WsError>>
            + Sink<WsMessage, Error = WsError>
            + Unpin
            + Send
            + 'static,
    {
        self.stats.record_connection();
        self.set_state(ConnectionState::Connected);
        self.journal.banner(&format!("CONNECTED to {}", self.config.url));
        info!(url = %self.config.url, "Connected");

        let (sink, stream) = ws.split();
        let (pong_tx, pong_rx) = watch::channel(0u64);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let mut heartbeat = Heartbeat::new(
            self.config.heartbeat_interval,
            self.config.heartbeat_timeout,
            self.journal.clone(),
            self.stats.clone(),
        )
        .spawn(sink, pong_rx, cancel_rx);

        let reading = MessageReader::new(
            stream,
            self.config.url.clone(),
            pong_tx,
            self.journal.clone(),
            self.stats.clone(),
        )
        .run();
        tokio::pin!(reading);

        // The reader goes first: a server close seen on the same wakeup as a
        // failed ping is reported as the close
        let ended: Ended<SplitSink<T, WsMessage>> = tokio::select! {
            biased;
            _ = shutdown_requested(shutdown) => Ended::Shutdown,
            cause = &mut reading => Ended::Reader(cause),
            joined = &mut heartbeat => Ended::Heartbeat(joined),
        };

        // Stop whichever side is still running before touching the socket
        let _ = cancel_tx.send(true);
        let (cause, exit) = match ended {
            Ended::Shutdown => (None, self.stop_heartbeat(heartbeat).await),
            Ended::Reader(cause) => (Some(cause), self.stop_heartbeat(heartbeat).await),
            Ended::Heartbeat(Ok(HeartbeatExit { outcome, sink })) => {
                let cause = match outcome {
                    HeartbeatOutcome::Failed(e) => e,
                    HeartbeatOutcome::Cancelled => {
                        Error::Internal("heartbeat stopped without a cause".to_string())
                    }
                };
                (Some(cause), Some(sink))
            }
            Ended::Heartbeat(Err(e)) => (
                Some(Error::Internal(format!("heartbeat task failed: {}", e))),
                None,
            ),
        };

        if let Some(sink) = exit {
            self.close(sink).await;
        }

        cause
    }

    /// Cancel has been requested; wait for the task to acknowledge it
    async fn stop_heartbeat<S>(&self, mut task: JoinHandle<HeartbeatExit<S>>) -> Option<S> {
        match time::timeout(self.config.heartbeat_timeout, &mut task).await {
            Ok(Ok(HeartbeatExit { outcome, sink })) => {
                if let HeartbeatOutcome::Failed(e) = outcome {
                    debug!(error = %e, "Heartbeat failed while the connection was ending");
                }
                Some(sink)
            }
            Ok(Err(e)) => {
                error!(error = %e, "Heartbeat task failed");
                None
            }
            Err(_) => {
                warn!("Heartbeat did not stop in time, aborting it");
                task.abort();
                None
            }
        }
    }

    /// Send a close frame; a connection that is already gone is fine
    async fn close<S>(&self, mut sink: S)
    where
        S: Sink<WsMessage, Error = WsError> + Unpin,
    {
        match time::timeout(self.config.connect_timeout, sink.close()).await {
            Ok(Ok(())) => debug!("Connection closed"),
            Ok(Err(e)) => debug!(error = %e, "Close on a finished connection ignored"),
            Err(_) => debug!("Close timed out"),
        }
    }

    fn report(&self, attempt: u64, cause: &Error) {
        match cause {
            Error::ConnectionClosed { code, reason } => {
                info!(attempt, code, reason = %reason, "Connection closed by server");
            }
            other if other.is_retryable() => {
                warn!(attempt, error = %other.format_for_log(), "Connection ended");
            }
            other => error!(attempt, error = %other.format_for_log(), "Connection ended unexpectedly"),
        }
        self.journal.note(&cause.journal_line());
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }
}

/// Resolves once shutdown is requested or the requester is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|requested| *requested).await;
}

/// Human form of the reconnect delay ("5 s", "250 ms")
fn format_delay(delay: Duration) -> String {
    if delay.subsec_millis() == 0 {
        format!("{} s", delay.as_secs())
    } else {
        format!("{} ms", delay.as_millis())
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
