//! Follow a log file that an external process appends to.
//!
//! There is no portable "wait for new data" primitive, so this polls: it
//! retries opening the file until it appears, then re-reads on a short
//! interval. Everything is bounded by a liveness check on the process.

use crate::model::PollIntervals;
use futures::stream::{self, Stream};
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

struct LogFollower<F> {
    path: PathBuf,
    alive: F,
    poll: PollIntervals,
    reader: Option<BufReader<File>>,
    pending: Vec<u8>,
    finished: bool,
}

impl<F: Fn() -> bool> LogFollower<F> {
    async fn next_line(&mut self) -> Option<String> {
        loop {
            if self.finished {
                return None;
            }

            if self.reader.is_none() {
                // Sample liveness before the attempt: if the process was
                // already gone and the file still does not exist, it never will.
                let alive = (self.alive)();
                match File::open(&self.path).await {
                    Ok(file) => {
                        debug!(path = %self.path.display(), "Following tool log");
                        self.reader = Some(BufReader::new(file));
                    }
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        if !alive {
                            debug!(path = %self.path.display(), "Process exited before log appeared");
                            self.finished = true;
                            return None;
                        }
                        tokio::time::sleep(self.poll.open_retry).await;
                    }
                    Err(e) => {
                        warn!(path = %self.path.display(), error = %e, "Cannot open tool log");
                        self.finished = true;
                        return None;
                    }
                }
                continue;
            }
            let Some(reader) = self.reader.as_mut() else {
                continue;
            };

            // Once the process is gone, keep reading until EOF so nothing
            // already written is lost.
            let alive = (self.alive)();
            match reader.read_until(b'\n', &mut self.pending).await {
                Ok(0) => {
                    if !alive {
                        self.finished = true;
                        return self.take_partial();
                    }
                    tokio::time::sleep(self.poll.read_retry).await;
                }
                Ok(_) if self.pending.ends_with(b"\n") => {
                    return Some(decode_line(std::mem::take(&mut self.pending)));
                }
                // Partial line; its newline has not been written yet.
                Ok(_) => {
                    if alive {
                        tokio::time::sleep(self.poll.read_retry).await;
                    }
                }
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "Reading tool log failed");
                    self.finished = true;
                    return self.take_partial();
                }
            }
        }
    }

    fn take_partial(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(decode_line(std::mem::take(&mut self.pending)))
        }
    }
}

// Tool logs are not guaranteed to be UTF-8; bad bytes become U+FFFD.
fn decode_line(mut bytes: Vec<u8>) -> String {
    while matches!(bytes.last(), Some(b'\n' | b'\r')) {
        bytes.pop();
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Lines appended to `path` while `alive()` holds.
///
/// The stream is lazy and single-use; to start over, call this again. It
/// waits `poll.open_retry` between attempts to open a missing file and
/// `poll.read_retry` after an empty read. If the process exits before the
/// file exists the stream simply ends. Content written before exit is
/// drained before the stream ends.
pub fn follow_log<F>(path: PathBuf, alive: F, poll: PollIntervals) -> impl Stream<Item = String>
where
    F: Fn() -> bool,
{
    let follower = LogFollower {
        path,
        alive,
        poll,
        reader: None,
        pending: Vec::new(),
        finished: false,
    };
    stream::unfold(follower, |mut follower| async move {
        follower.next_line().await.map(|line| (line, follower))
    })
}
