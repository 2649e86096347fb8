//! Message reader
//!
//! Turns the read half of a connection into a sequence of inbound payloads.
//! Control frames never reach the caller: pongs are handed to the heartbeat,
//! pings are answered by the transport, and a close frame ends the sequence
//! with [`Error::ConnectionClosed`].

use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::{debug, trace};

use super::state::ProbeStats;
use crate::error::{Error, CLOSE_CODE_ABNORMAL, CLOSE_CODE_NO_STATUS};
use crate::journal::Journal;

/// Reads one connection's messages; built fresh for every connection
pub struct MessageReader<R> {
    stream: R,
    url: String,
    pongs: watch::Sender<u64>,
    journal: Arc<Journal>,
    stats: Arc<ProbeStats>,
    finished: bool,
}

impl<R> MessageReader<R>
where
    R: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    pub fn new(
        stream: R,
        url: impl Into<String>,
        pongs: watch::Sender<u64>,
        journal: Arc<Journal>,
        stats: Arc<ProbeStats>,
    ) -> Self {
        Self {
            stream,
            url: url.into(),
            pongs,
            journal,
            stats,
            finished: false,
        }
    }

    /// Wait for the next inbound payload
    ///
    /// Text is returned verbatim, binary as lossy UTF-8. Once an error has
    /// been returned the reader is exhausted and keeps returning
    /// [`Error::ConnectionClosed`].
    pub async fn next_message(&mut self) -> Result<String, Error> {
        if self.finished {
            return Err(Error::ConnectionClosed {
                code: CLOSE_CODE_ABNORMAL,
                reason: "reader already finished".to_string(),
            });
        }

        let result = self.read_payload().await;
        if result.is_err() {
            self.finished = true;
        }
        result
    }

    async fn read_payload(&mut self) -> Result<String, Error> {
        loop {
            match self.stream.next().await {
                Some(Ok(WsMessage::Text(text))) => return Ok(text),
                Some(Ok(WsMessage::Binary(data))) => {
                    return Ok(String::from_utf8_lossy(&data).into_owned());
                }
                Some(Ok(WsMessage::Pong(payload))) => self.acknowledge(&payload),
                Some(Ok(WsMessage::Ping(_))) => trace!("Ping received"),
                Some(Ok(WsMessage::Frame(_))) => {}
                Some(Ok(WsMessage::Close(frame))) => return Err(closed(frame)),
                Some(Err(e)) => return Err(Error::from_transport(&self.url, e)),
                None => {
                    return Err(Error::ConnectionClosed {
                        code: CLOSE_CODE_ABNORMAL,
                        reason: "connection dropped".to_string(),
                    });
                }
            }
        }
    }

    /// Journal every message until the connection ends, returning the cause
    pub async fn run(mut self) -> Error {
        loop {
            match self.next_message().await {
                Ok(text) => {
                    self.journal.note(&format!("RECV: {}", text));
                    self.stats.record_message();
                }
                Err(cause) => {
                    debug!(cause = %cause, "Reader finished");
                    return cause;
                }
            }
        }
    }

    /// Forward a heartbeat pong; foreign payloads are ignored
    fn acknowledge(&self, payload: &[u8]) {
        match <[u8; 8]>::try_from(payload) {
            Ok(bytes) => {
                let seq = u64::from_be_bytes(bytes);
                trace!(seq, "Pong received");
                self.pongs.send_modify(|acked| *acked = (*acked).max(seq));
            }
            Err(_) => trace!(len = payload.len(), "Unsolicited pong ignored"),
        }
    }
}

fn closed(frame: Option<CloseFrame<'static>>) -> Error {
    match frame {
        Some(frame) => Error::ConnectionClosed {
            code: u16::from(frame.code),
            reason: frame.reason.into_owned(),
        },
        None => Error::ConnectionClosed {
            code: CLOSE_CODE_NO_STATUS,
            reason: String::new(),
        },
    }
}
