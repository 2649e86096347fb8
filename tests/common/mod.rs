//! Common test utilities and fixtures
//!
//! This module provides shared test infrastructure

#![allow(dead_code)]

use std::fs;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// Get the path to the test fixtures directory
pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

/// Get a path to a specific fixture file
pub fn fixture_path(name: &str) -> PathBuf {
    fixtures_dir().join(name)
}

/// Get the valid config fixture path
pub fn valid_config_fixture() -> PathBuf {
    fixture_path("valid_config.toml")
}

/// Get the invalid config fixture path
pub fn invalid_config_fixture() -> PathBuf {
    fixture_path("invalid_config.toml")
}

/// Write a probe configuration with short timings into `dir`
pub fn write_probe_config(dir: &Path, url: &str, journal: &Path) -> PathBuf {
    let path = dir.join("wsprobe.toml");
    let content = format!(
        r#"[endpoint]
url = "{url}"
heartbeat_interval_ms = 200
heartbeat_timeout_ms = 500
reconnect_delay_ms = 300
connect_timeout_ms = 2000

[journal]
file = "{journal}"
echo_stdout = false

[logging]
level = "warn"
"#,
        url = url,
        journal = journal.display().to_string().replace('\\', "/"),
    );
    fs::write(&path, content).unwrap();
    path
}

/// Turn on the stdout echo in a config written by [`write_probe_config`]
pub fn enable_echo(config: &Path) {
    let content = fs::read_to_string(config).unwrap();
    fs::write(config, content.replace("echo_stdout = false", "echo_stdout = true")).unwrap();
}

/// Address that nothing listens on
pub fn unused_addr() -> SocketAddr {
    let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

/// Start a WebSocket endpoint on a background thread
///
/// Every client receives "hello" and is then kept open, answering pings,
/// until it goes away.
pub fn start_greeting_server() -> SocketAddr {
    let (addr_tx, addr_rx) = mpsc::channel();

    thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            addr_tx.send(listener.local_addr().unwrap()).unwrap();

            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let Ok(mut ws) = accept_async(stream).await else {
                        return;
                    };
                    if ws.send(Message::Text("hello".to_string())).await.is_err() {
                        return;
                    }
                    while let Some(Ok(_)) = ws.next().await {}
                });
            }
        });
    });

    addr_rx.recv_timeout(Duration::from_secs(5)).unwrap()
}

/// Journal text without the `[YYYY-MM-DD HH:MM:SS] ` prefix
pub fn journal_texts(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .filter_map(|line| line.get(22..).map(str::to_string))
        .collect()
}

/// Poll the journal until `predicate` holds or `timeout` passes
pub fn wait_for_journal<F>(path: &Path, timeout: Duration, predicate: F) -> Vec<String>
where
    F: Fn(&[String]) -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        let texts = journal_texts(path);
        if predicate(&texts) || Instant::now() >= deadline {
            return texts;
        }
        thread::sleep(Duration::from_millis(50));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixtures_dir_exists() {
        assert!(fixtures_dir().exists(), "Fixtures directory should exist");
    }

    #[test]
    fn test_valid_config_exists() {
        assert!(
            valid_config_fixture().exists(),
            "Valid config fixture should exist"
        );
    }

    #[test]
    fn test_invalid_config_exists() {
        assert!(
            invalid_config_fixture().exists(),
            "Invalid config fixture should exist"
        );
    }
}
