//! Heartbeat task
//!
//! Sends a WebSocket ping every interval and waits for the matching pong.
//! The ping payload is a big-endian `u64` sequence number; the message
//! reader publishes the highest sequence it has seen on a watch channel.
//!
//! Cancellation is only observed between probes, so a ping is either sent
//! completely or not at all.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::{debug, trace, warn};

use super::state::ProbeStats;
use crate::error::Error;
use crate::journal::Journal;

/// How the heartbeat task ended
#[derive(Debug)]
pub enum HeartbeatOutcome {
    /// Stopped on request
    Cancelled,
    /// A probe could not be sent or was not answered in time
    Failed(Error),
}

/// Returned from the heartbeat task so the owner can close the connection
pub struct HeartbeatExit<S> {
    pub outcome: HeartbeatOutcome,
    pub sink: S,
}

/// Periodic liveness probe for one connection
pub struct Heartbeat {
    interval: Duration,
    timeout: Duration,
    journal: Arc<Journal>,
    stats: Arc<ProbeStats>,
}

impl Heartbeat {
    pub fn new(
        interval: Duration,
        timeout: Duration,
        journal: Arc<Journal>,
        stats: Arc<ProbeStats>,
    ) -> Self {
        Self {
            interval,
            timeout,
            journal,
            stats,
        }
    }

    /// Spawn the probe loop on the runtime
    pub fn spawn<S>(
        self,
        sink: S,
        pongs: watch::Receiver<u64>,
        cancel: watch::Receiver<bool>,
    ) -> JoinHandle<HeartbeatExit<S>>
    where
        S: Sink<WsMessage, Error = WsError> + Unpin + Send + 'static,
    {
        tokio::spawn(self.run(sink, pongs, cancel))
    }

    /// Probe until cancelled or a probe fails, then hand the sink back
    pub async fn run<S>(
        self,
        mut sink: S,
        mut pongs: watch::Receiver<u64>,
        mut cancel: watch::Receiver<bool>,
    ) -> HeartbeatExit<S>
    where
        S: Sink<WsMessage, Error = WsError> + Unpin,
    {
        let outcome = self.probe_loop(&mut sink, &mut pongs, &mut cancel).await;
        HeartbeatExit { outcome, sink }
    }

    async fn probe_loop<S>(
        &self,
        sink: &mut S,
        pongs: &mut watch::Receiver<u64>,
        cancel: &mut watch::Receiver<bool>,
    ) -> HeartbeatOutcome
    where
        S: Sink<WsMessage, Error = WsError> + Unpin,
    {
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut seq: u64 = 0;

        loop {
            tokio::select! {
                biased;
                _ = cancelled(cancel) => return HeartbeatOutcome::Cancelled,
                _ = ticker.tick() => {}
            }

            // The tick and the cancel request can race; never send after cancel
            if *cancel.borrow() {
                return HeartbeatOutcome::Cancelled;
            }

            seq += 1;
            if let Err(e) = sink.send(WsMessage::Ping(seq.to_be_bytes().to_vec())).await {
                return self.fail(seq, format!("ping could not be sent: {}", e));
            }
            self.stats.record_probe();
            debug!(seq, "Ping sent");

            tokio::select! {
                biased;
                _ = cancelled(cancel) => return HeartbeatOutcome::Cancelled,
                answered = time::timeout(self.timeout, pongs.wait_for(|acked| *acked >= seq)) => {
                    match answered {
                        Ok(Ok(_)) => trace!(seq, "Pong received"),
                        // Reader is gone, the connection is being torn down
                        Ok(Err(_)) => return HeartbeatOutcome::Cancelled,
                        Err(_) => {
                            return self.fail(
                                seq,
                                format!("no pong within {}ms", self.timeout.as_millis()),
                            );
                        }
                    }
                }
            }
        }
    }

    fn fail(&self, seq: u64, detail: String) -> HeartbeatOutcome {
        warn!(seq, detail = %detail, "Heartbeat probe failed");
        self.journal
            .note(&format!("WARN: Heartbeat probe #{} failed - {}", seq, detail));
        HeartbeatOutcome::Failed(Error::heartbeat_failed(detail))
    }
}

/// Resolves once cancellation is requested or the requester is gone
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|requested| *requested).await;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::journal::tests::read_lines;
    use parking_lot::Mutex;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tempfile::TempDir;

    /// Sink that records pings and optionally acknowledges them
    #[derive(Clone)]
    pub(crate) struct RecordingSink {
        pub sent: Arc<Mutex<Vec<WsMessage>>>,
        fail: bool,
        pong_tx: Option<Arc<watch::Sender<u64>>>,
    }

    impl RecordingSink {
        fn new(fail: bool, pong_tx: Option<Arc<watch::Sender<u64>>>) -> Self {
            Self {
                sent: Arc::new(Mutex::new(Vec::new())),
                fail,
                pong_tx,
            }
        }

        fn ping_count(&self) -> usize {
            self.sent
                .lock()
                .iter()
                .filter(|m| matches!(m, WsMessage::Ping(_)))
                .count()
        }
    }

    impl Sink<WsMessage> for RecordingSink {
        type Error = WsError;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: WsMessage) -> Result<(), WsError> {
            if self.fail {
                return Err(WsError::AlreadyClosed);
            }
            if let (WsMessage::Ping(payload), Some(tx)) = (&item, &self.pong_tx) {
                let mut seq = [0u8; 8];
                seq.copy_from_slice(payload);
                tx.send_replace(u64::from_be_bytes(seq));
            }
            self.sent.lock().push(item);
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
            Poll::Ready(Ok(()))
        }
    }

    fn heartbeat(dir: &TempDir, interval_ms: u64, timeout_ms: u64) -> (Heartbeat, Arc<Journal>) {
        let journal = Arc::new(Journal::new(dir.path().join("journal.log"), false));
        let hb = Heartbeat::new(
            Duration::from_millis(interval_ms),
            Duration::from_millis(timeout_ms),
            journal.clone(),
            Arc::new(ProbeStats::default()),
        );
        (hb, journal)
    }

    fn warnings(journal: &Journal) -> usize {
        read_lines(journal.path())
            .iter()
            .filter(|l| l.contains("WARN: Heartbeat probe"))
            .count()
    }

    #[tokio::test]
    async fn test_answered_probes_continue_until_cancelled() {
        let dir = TempDir::new().unwrap();
        let (hb, journal) = heartbeat(&dir, 20, 500);
        let (pong_tx, pong_rx) = watch::channel(0u64);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let sink = RecordingSink::new(false, Some(Arc::new(pong_tx)));

        let task = hb.spawn(sink.clone(), pong_rx, cancel_rx);
        time::sleep(Duration::from_millis(130)).await;
        cancel_tx.send(true).unwrap();

        let exit = task.await.unwrap();
        assert!(matches!(exit.outcome, HeartbeatOutcome::Cancelled));
        assert!(sink.ping_count() >= 3);
        assert_eq!(warnings(&journal), 0);
    }

    #[tokio::test]
    async fn test_no_probe_after_cancel() {
        let dir = TempDir::new().unwrap();
        let (hb, _journal) = heartbeat(&dir, 30, 500);
        let (pong_tx, pong_rx) = watch::channel(0u64);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let sink = RecordingSink::new(false, Some(Arc::new(pong_tx)));

        let task = hb.spawn(sink.clone(), pong_rx, cancel_rx);
        time::sleep(Duration::from_millis(70)).await;
        cancel_tx.send(true).unwrap();
        task.await.unwrap();

        let sent_at_cancel = sink.ping_count();
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sink.ping_count(), sent_at_cancel);
    }

    #[tokio::test]
    async fn test_first_probe_waits_one_interval() {
        let dir = TempDir::new().unwrap();
        let (hb, _journal) = heartbeat(&dir, 200, 500);
        let (_pong_tx, pong_rx) = watch::channel(0u64);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let sink = RecordingSink::new(false, None);

        let task = hb.spawn(sink.clone(), pong_rx, cancel_rx);
        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sink.ping_count(), 0);

        cancel_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_failure_warns_once_and_stops() {
        let dir = TempDir::new().unwrap();
        let (hb, journal) = heartbeat(&dir, 10, 500);
        let (_pong_tx, pong_rx) = watch::channel(0u64);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let sink = RecordingSink::new(true, None);

        let exit = hb.spawn(sink.clone(), pong_rx, cancel_rx).await.unwrap();

        assert!(matches!(
            exit.outcome,
            HeartbeatOutcome::Failed(Error::HeartbeatFailed { .. })
        ));
        assert_eq!(sink.ping_count(), 0);
        assert_eq!(warnings(&journal), 1);
    }

    #[tokio::test]
    async fn test_missing_pong_times_out() {
        let dir = TempDir::new().unwrap();
        let (hb, journal) = heartbeat(&dir, 10, 50);
        let (_pong_tx, pong_rx) = watch::channel(0u64);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let sink = RecordingSink::new(false, None);

        let exit = hb.spawn(sink.clone(), pong_rx, cancel_rx).await.unwrap();

        match exit.outcome {
            HeartbeatOutcome::Failed(e) => assert!(e.to_string().contains("no pong within 50ms")),
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(sink.ping_count(), 1);
        assert_eq!(warnings(&journal), 1);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_pong() {
        let dir = TempDir::new().unwrap();
        let (hb, journal) = heartbeat(&dir, 10, 5_000);
        let (_pong_tx, pong_rx) = watch::channel(0u64);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let sink = RecordingSink::new(false, None);

        let task = hb.spawn(sink.clone(), pong_rx, cancel_rx);
        time::sleep(Duration::from_millis(60)).await;
        cancel_tx.send(true).unwrap();

        let exit = time::timeout(Duration::from_millis(500), task)
            .await
            .expect("cancellation is prompt")
            .unwrap();
        assert!(matches!(exit.outcome, HeartbeatOutcome::Cancelled));
        assert_eq!(warnings(&journal), 0);
    }
}
