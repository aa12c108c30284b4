//! Change-notification stream.
//!
//! A [`Topic`] is a cursor-ordered log of "these keys may have changed"
//! batches with one writer and any number of subscribers. Subscribers
//! hold only an integer cursor; the topic keeps a bounded ring of recent
//! batches and a broadcast of the newest cursor, so thousands of idle
//! connections cost nothing on the publish path.
//!
//! ```text
//! publisher ──► ring of (cursor, keys) ──► watch broadcast of newest
//!                                                │
//! subscriber(cursor) ◄── union of batches after cursor, or CursorLost
//! ```
//!
//! A subscriber whose cursor has fallen out of the retained window gets
//! [`Notification::CursorLost`] and is expected to resend its full state.

use std::collections::HashSet;
use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;
use tracing::trace;

use crate::errors::{Error, Result};
use crate::key::Key;

/// Outcome of a [`Topic::subscribe`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Keys published strictly after the subscriber's cursor,
    /// deduplicated across batches. `cursor` is the new position.
    Changed { cursor: u64, keys: Vec<Key> },
    /// The subscriber's cursor fell behind the retained window. `cursor`
    /// is the position to continue from after a full resend.
    CursorLost { cursor: u64 },
}

/// Single-producer, multi-subscriber change log.
pub struct Topic {
    state: Mutex<State>,
    current: watch::Sender<u64>,
    retention: usize,
    shutdown: watch::Receiver<()>,
}

struct State {
    batches: VecDeque<Batch>,
    next_cursor: u64,
}

struct Batch {
    cursor: u64,
    keys: Vec<Key>,
}

impl Topic {
    pub fn new(retention: usize, shutdown: watch::Receiver<()>) -> Self {
        let (current, _) = watch::channel(0);
        Self {
            state: Mutex::new(State {
                batches: VecDeque::new(),
                next_cursor: 1,
            }),
            current,
            retention,
            shutdown,
        }
    }

    /// Appends a batch of dirty keys and wakes all subscribers. Returns
    /// the cursor assigned to the batch.
    pub fn publish(&self, keys: Vec<Key>) -> u64 {
        let cursor = {
            let mut state = self.state.lock();
            let cursor = state.next_cursor;
            state.next_cursor += 1;
            trace!(cursor, count = keys.len(), "publish changed keys");
            state.batches.push_back(Batch { cursor, keys });
            while state.batches.len() > self.retention {
                state.batches.pop_front();
            }
            cursor
        };
        self.current.send_replace(cursor);
        cursor
    }

    /// The cursor of the newest published batch, `0` before the first.
    pub fn current(&self) -> u64 {
        *self.current.borrow()
    }

    /// Blocks until at least one batch strictly after `cursor` exists,
    /// then returns everything buffered since. Returns
    /// [`Error::Closed`] when the shutdown signal trips.
    pub async fn subscribe(&self, cursor: u64) -> Result<Notification> {
        let mut current = self.current.subscribe();
        let mut shutdown = self.shutdown.clone();

        loop {
            if let Some(notification) = self.since(cursor) {
                return Ok(notification);
            }

            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("topic subscriber woken by shutdown");
                    return Err(Error::Closed);
                }
                changed = current.changed() => {
                    if changed.is_err() {
                        return Err(Error::Closed);
                    }
                }
            }
        }
    }

    fn since(&self, cursor: u64) -> Option<Notification> {
        let state = self.state.lock();
        let newest = state.next_cursor - 1;
        if newest <= cursor {
            return None;
        }

        match state.batches.front() {
            Some(front) if cursor + 1 >= front.cursor => {
                let mut seen = HashSet::new();
                let mut keys = Vec::new();
                for batch in state.batches.iter().filter(|batch| batch.cursor > cursor) {
                    for key in &batch.keys {
                        if seen.insert(key) {
                            keys.push(key.clone());
                        }
                    }
                }
                Some(Notification::Changed {
                    cursor: newest,
                    keys,
                })
            }
            _ => Some(Notification::CursorLost { cursor: newest }),
        }
    }
}
