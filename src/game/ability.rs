//! Ability activations and the exactly-once target data cache
//!
//! Every activation carries its own [`PredictionKey`], so target data sent for
//! one fire can never be matched against another. The server keeps one
//! [`TargetDataCache`] per controller.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Default time the server waits for target data after an activation
pub const DEFAULT_ABILITY_TIMEOUT: Duration = Duration::from_secs(2);
/// How long finished entries are kept so late duplicates stay ignored
const FINISHED_RETENTION: Duration = Duration::from_secs(10);

/// A granted ability instance on one controller (a weapon slot)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AbilityHandle(pub u32);

impl AbilityHandle {
    pub const PRIMARY_WEAPON: Self = Self(0);
    pub const SECONDARY_WEAPON: Self = Self(1);
}

impl fmt::Display for AbilityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-activation correlation token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PredictionKey(pub u32);

impl fmt::Display for PredictionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-side source of prediction keys, never yielding 0
#[derive(Debug, Clone)]
pub struct PredictionKeyGenerator {
    next: u32,
}

impl PredictionKeyGenerator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn next_key(&mut self) -> PredictionKey {
        let key = PredictionKey(self.next);
        self.next = self.next.checked_add(1).unwrap_or(1);
        key
    }
}

impl Default for PredictionKeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
enum Slot<D> {
    /// Activation seen, no data yet
    Awaiting,
    /// Data arrived and has not been consumed
    Ready(D),
    Consumed,
    Cancelled,
}

#[derive(Debug, Clone)]
struct Entry<D> {
    slot: Slot<D>,
    since: Duration,
}

/// Server-side store of client target data keyed by activation
#[derive(Debug, Clone)]
pub struct TargetDataCache<D> {
    entries: HashMap<(AbilityHandle, PredictionKey), Entry<D>>,
}

impl<D> TargetDataCache<D> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Start waiting for data on an activation; no-op if already known
    pub fn register_await(&mut self, ability: AbilityHandle, key: PredictionKey, now: Duration) {
        self.entries.entry((ability, key)).or_insert(Entry {
            slot: Slot::Awaiting,
            since: now,
        });
    }

    pub fn contains(&self, ability: AbilityHandle, key: PredictionKey) -> bool {
        self.entries.contains_key(&(ability, key))
    }

    pub fn is_awaiting(&self, ability: AbilityHandle, key: PredictionKey) -> bool {
        matches!(
            self.entries.get(&(ability, key)),
            Some(Entry { slot: Slot::Awaiting, .. })
        )
    }

    /// Store data for an activation
    ///
    /// Returns false when the activation already has data, was consumed, or
    /// was cancelled; the new data is dropped.
    pub fn set_data(
        &mut self,
        ability: AbilityHandle,
        key: PredictionKey,
        data: D,
        now: Duration,
    ) -> bool {
        let entry = self.entries.entry((ability, key)).or_insert(Entry {
            slot: Slot::Awaiting,
            since: now,
        });
        match entry.slot {
            Slot::Awaiting => {
                entry.slot = Slot::Ready(data);
                entry.since = now;
                true
            }
            _ => {
                trace!(%ability, %key, "Target data already delivered, ignoring");
                false
            }
        }
    }

    /// Take the data for an activation, at most once
    ///
    /// The first call after data arrived returns it; every later call returns
    /// `None` and leaves the cache untouched.
    pub fn try_consume(
        &mut self,
        ability: AbilityHandle,
        key: PredictionKey,
        now: Duration,
    ) -> Option<D> {
        let entry = self.entries.get_mut(&(ability, key))?;
        match std::mem::replace(&mut entry.slot, Slot::Consumed) {
            Slot::Ready(data) => {
                entry.since = now;
                Some(data)
            }
            other => {
                entry.slot = other;
                None
            }
        }
    }

    /// Stop waiting on an activation; returns true only the first time
    pub fn cancel(&mut self, ability: AbilityHandle, key: PredictionKey, now: Duration) -> bool {
        let entry = self.entries.entry((ability, key)).or_insert(Entry {
            slot: Slot::Awaiting,
            since: now,
        });
        match entry.slot {
            Slot::Awaiting | Slot::Ready(_) => {
                entry.slot = Slot::Cancelled;
                entry.since = now;
                true
            }
            Slot::Consumed | Slot::Cancelled => false,
        }
    }

    /// Cancel awaits older than `timeout` and forget long-finished entries
    ///
    /// Returns the activations that timed out.
    pub fn expire(&mut self, now: Duration, timeout: Duration) -> Vec<(AbilityHandle, PredictionKey)> {
        let mut timed_out = Vec::new();
        for (&(ability, key), entry) in self.entries.iter_mut() {
            if matches!(entry.slot, Slot::Awaiting | Slot::Ready(_))
                && now.saturating_sub(entry.since) >= timeout
            {
                debug!(%ability, %key, "Ability timed out waiting for target data");
                entry.slot = Slot::Cancelled;
                entry.since = now;
                timed_out.push((ability, key));
            }
        }
        self.entries.retain(|_, entry| {
            matches!(entry.slot, Slot::Awaiting | Slot::Ready(_))
                || now.saturating_sub(entry.since) < FINISHED_RETENTION
        });
        timed_out
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<D> Default for TargetDataCache<D> {
    fn default() -> Self {
        Self::new()
    }
}
