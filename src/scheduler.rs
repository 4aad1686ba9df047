//! Delayed-task queue shared by every stream.
//!
//! Staggered starts, reconnects and segment cleanup are all entries in one
//! [`DelayQueue`] polled by the supervisor loop. Nothing here checks whether an entry is
//! still wanted; the supervisor re-validates each entry against the registry when it
//! comes due.
use std::{
    collections::HashMap,
    future::poll_fn,
    path::PathBuf,
    task::Poll,
    time::Duration,
};

use tokio_util::time::{DelayQueue, delay_queue::Key};

use crate::stream::{RelayTarget, StreamIdentity};

/// Why a start was deferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum StartReason {
    /// Staggered startup of a stream's destinations.
    Stagger,
    /// Restart of an auto-reconnecting destination.
    Reconnect,
}

/// Work due at a later instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scheduled {
    /// Start one target of a stream, if the manager that asked is still registered.
    Start {
        identity: StreamIdentity,
        epoch: u64,
        target: RelayTarget,
        reason: StartReason,
    },
    /// Delete a stream's segmented output directory.
    Purge {
        identity: StreamIdentity,
        dir: PathBuf,
    },
}

#[derive(Debug, Default)]
pub struct Scheduler {
    queue: DelayQueue<Scheduled>,
    purges: HashMap<StreamIdentity, Key>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, task: Scheduled, delay: Duration) {
        match task {
            Scheduled::Purge { identity, dir } => self.schedule_purge(identity, dir, delay),
            task => {
                self.queue.insert(task, delay);
            }
        }
    }

    /// Schedules deletion of `dir`, replacing any purge already pending for the stream.
    pub fn schedule_purge(&mut self, identity: StreamIdentity, dir: PathBuf, delay: Duration) {
        self.cancel_purge(&identity);
        let key = self.queue.insert(
            Scheduled::Purge {
                identity: identity.clone(),
                dir,
            },
            delay,
        );
        self.purges.insert(identity, key);
    }

    /// Drops the pending purge for a stream, returning its directory.
    pub fn cancel_purge(&mut self, identity: &StreamIdentity) -> Option<PathBuf> {
        let key = self.purges.remove(identity)?;
        match self.queue.remove(&key).into_inner() {
            Scheduled::Purge { dir, .. } => Some(dir),
            Scheduled::Start { .. } => None,
        }
    }

    /// Removes every pending purge, returning what they would have deleted.
    pub fn take_purges(&mut self) -> Vec<(StreamIdentity, PathBuf)> {
        let identities: Vec<_> = self.purges.keys().cloned().collect();
        identities
            .into_iter()
            .filter_map(|identity| {
                let dir = self.cancel_purge(&identity)?;
                Some((identity, dir))
            })
            .collect()
    }

    pub fn has_purge(&self, identity: &StreamIdentity) -> bool {
        self.purges.contains_key(identity)
    }

    /// Waits for the next entry to come due. Pending forever while the queue is empty.
    pub async fn next_due(&mut self) -> Scheduled {
        let task = poll_fn(|cx| match self.queue.poll_expired(cx) {
            Poll::Ready(Some(expired)) => Poll::Ready(expired.into_inner()),
            // An empty queue returns `Ready(None)` and is woken again by the next insert.
            Poll::Ready(None) | Poll::Pending => Poll::Pending,
        })
        .await;

        if let Scheduled::Purge { identity, .. } = &task {
            self.purges.remove(identity);
        }
        task
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
