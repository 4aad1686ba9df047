//! Stream registry: which streams are active right now.
use std::collections::{HashMap, hash_map::Entry};

use crate::{manager::RelayManager, stream::StreamIdentity};

/// Map from stream identity to its relay manager.
///
/// Presence here is what makes a stream active. Each manager gets a fresh epoch when
/// it is created, so an identity that is removed and re-added never matches timers
/// scheduled for the earlier manager.
#[derive(Debug, Default)]
pub struct StreamRegistry {
    streams: HashMap<StreamIdentity, RelayManager>,
    next_epoch: u64,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the manager for `identity`, creating it with `input` if absent.
    /// The flag is `true` when the manager was created by this call.
    pub fn get_or_create(
        &mut self,
        identity: &StreamIdentity,
        input: String,
    ) -> (&mut RelayManager, bool) {
        match self.streams.entry(identity.clone()) {
            Entry::Occupied(entry) => (entry.into_mut(), false),
            Entry::Vacant(entry) => {
                self.next_epoch += 1;
                let manager = RelayManager::new(identity.clone(), input, self.next_epoch);
                (entry.insert(manager), true)
            }
        }
    }

    pub fn remove(&mut self, identity: &StreamIdentity) -> Option<RelayManager> {
        self.streams.remove(identity)
    }

    pub fn get(&self, identity: &StreamIdentity) -> Option<&RelayManager> {
        self.streams.get(identity)
    }

    pub fn get_mut(&mut self, identity: &StreamIdentity) -> Option<&mut RelayManager> {
        self.streams.get_mut(identity)
    }

    pub fn contains(&self, identity: &StreamIdentity) -> bool {
        self.streams.contains_key(identity)
    }

    /// Active identities, sorted by key.
    pub fn identities(&self) -> Vec<StreamIdentity> {
        let mut identities: Vec<_> = self.streams.keys().cloned().collect();
        identities.sort_by(|a, b| a.key().cmp(b.key()));
        identities
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
