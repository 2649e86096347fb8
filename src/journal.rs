//! Message journal
//!
//! Every connection event and every inbound message becomes one line of the
//! form `[YYYY-MM-DD HH:MM:SS] <text>`. Lines are echoed to stdout and
//! appended to the journal file. The file is opened and closed on every
//! write, so no handle outlives a call and an external `tail -f` or log
//! shipper always sees complete lines. A closed stdout only turns the echo
//! off; the file keeps receiving every line.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Local;
use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Timestamp layout used for every journal line
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Separator line used in connect/stop banners
pub const BANNER_RULE: &str =
    "============================================================";

/// Format the current local time as `[YYYY-MM-DD HH:MM:SS]`
pub fn format_timestamp() -> String {
    format!("[{}]", Local::now().format(TIMESTAMP_FORMAT))
}

/// Append-only journal sink shared by the connection tasks
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    echo_stdout: AtomicBool,
    // Serializes writers so lines from concurrent tasks never interleave
    write_lock: Mutex<()>,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>, echo_stdout: bool) -> Self {
        Self {
            path: path.into(),
            echo_stdout: AtomicBool::new(echo_stdout),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the parent directory if needed and check the file is writable
    pub fn prepare(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        self.open().map(drop)
    }

    /// Timestamp `text`, append it to the journal file and echo it
    ///
    /// The file is flushed and closed before this returns. If the echo
    /// fails the line is already on disk and echoing stops for good.
    pub fn record(&self, text: &str) -> Result<()> {
        self.record_with_echo(text, &mut io::stdout().lock())
    }

    fn record_with_echo<W: Write>(&self, text: &str, echo: &mut W) -> Result<()> {
        let _guard = self.write_lock.lock();
        // Stamped under the lock so file order is timestamp order
        let line = format!("{} {}", format_timestamp(), text);

        let mut file = self.open()?;
        writeln!(file, "{}", line)
            .and_then(|_| file.flush())
            .map_err(|e| Error::IoWrite {
                path: self.path.clone(),
                source: e,
            })?;

        if self.echo_stdout.load(Ordering::Relaxed) {
            if let Err(e) = writeln!(echo, "{}", line).and_then(|_| echo.flush()) {
                self.echo_stdout.store(false, Ordering::Relaxed);
                return Err(Error::IoWrite {
                    path: PathBuf::from("<stdout>"),
                    source: e,
                });
            }
        }

        Ok(())
    }

    /// Record a line, downgrading a failed write to a diagnostic
    ///
    /// Connection tasks use this so a full disk never stops the probe.
    pub fn note(&self, text: &str) {
        if let Err(e) = self.record(text) {
            tracing::error!(error = %e, path = %self.path.display(), "Failed to write journal");
        }
    }

    /// Three-line banner framed by rules
    pub fn banner(&self, text: &str) {
        self.note(BANNER_RULE);
        self.note(text);
        self.note(BANNER_RULE);
    }

    fn open(&self) -> Result<fs::File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::IoWrite {
                path: self.path.clone(),
                source: e,
            })
    }
}
