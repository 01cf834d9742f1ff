// ─── Output Relay ───
// Turns a child's combined stdout/stderr pipe into an ordered line stream
// and keeps a bounded console history for late observers.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const RELAY_BUFFER: usize = 1024;

/// Lines of one process run, in arrival order. Ends once every write end
/// of the output pipe is closed. There is one relay per process and it
/// cannot be restarted.
pub struct OutputRelay {
    rx: mpsc::Receiver<String>,
}

impl OutputRelay {
    pub(crate) fn channel() -> (mpsc::Sender<String>, Self) {
        let (tx, rx) = mpsc::channel(RELAY_BUFFER);
        (tx, Self { rx })
    }

    pub async fn next_line(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// Copy `reader` line by line into the relay on a dedicated thread. The
/// sender is bounded, so a slow consumer applies backpressure instead of
/// losing lines.
pub(crate) fn pump<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: Read + Send + 'static,
{
    let spawned = std::thread::Builder::new()
        .name("server-output".into())
        .spawn(move || {
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) => {
                        while matches!(buf.last(), Some(b'\n' | b'\r')) {
                            buf.pop();
                        }
                        let line = String::from_utf8_lossy(&buf).into_owned();
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("Server output closed with error: {}", e);
                        break;
                    }
                }
            }
            debug!("Server output reached end of stream");
        });
    if let Err(e) = spawned {
        warn!("Could not start output reader: {}", e);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsoleLine {
    pub at: DateTime<Utc>,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsoleSnapshot {
    pub lines: Vec<ConsoleLine>,
    /// Lines evicted since the log was created.
    pub dropped: u64,
}

/// Capped console history. Oldest lines go first.
#[derive(Debug)]
pub struct ConsoleLog {
    lines: VecDeque<ConsoleLine>,
    capacity: usize,
    dropped: u64,
}

impl ConsoleLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            dropped: 0,
        }
    }

    /// Append a line. Returns `true` when an older line had to be evicted.
    pub fn push(&mut self, text: impl Into<String>) -> bool {
        let evicted = if self.lines.len() >= self.capacity {
            self.lines.pop_front();
            self.dropped += 1;
            true
        } else {
            false
        };
        self.lines.push_back(ConsoleLine {
            at: Utc::now(),
            text: text.into(),
        });
        evicted
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn snapshot(&self) -> ConsoleSnapshot {
        ConsoleSnapshot {
            lines: self.lines.iter().cloned().collect(),
            dropped: self.dropped,
        }
    }
}
