// Event subscription registry
//
// Tracks active breakpoints, watchpoints and state subscriptions. Lookups run
// on every instrumented program point, so they are a single hash probe under
// one short-lived lock.

use crate::events::StateKind;
use crate::poison;
use crate::protocol::{WireError, WireResult};
use crate::types::{EntryId, EntryKind, Location, SuspendPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// What `add` does with an identical (location, kind) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Fail with `DuplicateEntry`
    #[default]
    Reject,
    /// Return the existing entry's handle
    Merge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: EntryId,
    pub location: Location,
    pub kind: EntryKind,
    pub enabled: bool,
    pub policy: SuspendPolicy,
    pub hit_count: u32,
}

impl Entry {
    pub fn handle(&self) -> EntryHandle {
        EntryHandle {
            id: self.id,
            location: self.location.clone(),
            kind: self.kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryHandle {
    pub id: EntryId,
    pub location: Location,
    pub kind: EntryKind,
}

/// A trigger that matched during lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Hit {
    pub id: EntryId,
    pub policy: SuspendPolicy,
}

/// Registry contents; only reachable through the registry lock
#[derive(Debug, Default)]
pub(crate) struct Entries {
    by_location: HashMap<Location, Vec<Entry>>,
    subscriptions: HashMap<StateKind, SuspendPolicy>,
    next_id: EntryId,
}

impl Entries {
    fn add(
        &mut self,
        location: Location,
        kind: EntryKind,
        policy: SuspendPolicy,
        duplicates: DuplicatePolicy,
    ) -> WireResult<EntryHandle> {
        let slot = self.by_location.entry(location.clone()).or_default();

        if let Some(existing) = slot.iter().find(|e| e.kind == kind) {
            return match duplicates {
                DuplicatePolicy::Reject => Err(WireError::DuplicateEntry(format!(
                    "{} at {}",
                    kind, location
                ))),
                DuplicatePolicy::Merge => Ok(existing.handle()),
            };
        }

        self.next_id += 1;
        let entry = Entry {
            id: self.next_id,
            location,
            kind,
            enabled: true,
            policy,
            hit_count: 0,
        };
        let handle = entry.handle();
        slot.push(entry);
        Ok(handle)
    }

    pub(crate) fn remove(&mut self, location: &Location) -> Vec<Entry> {
        self.by_location.remove(location).unwrap_or_default()
    }

    pub(crate) fn remove_kind(&mut self, location: &Location, kind: EntryKind) -> Option<Entry> {
        let slot = self.by_location.get_mut(location)?;
        let index = slot.iter().position(|e| e.kind == kind)?;
        let entry = slot.remove(index);
        if slot.is_empty() {
            self.by_location.remove(location);
        }
        Some(entry)
    }

    pub(crate) fn remove_all(&mut self) -> usize {
        let removed = self.by_location.values().map(Vec::len).sum();
        self.by_location.clear();
        removed
    }

    /// Match an enabled entry and count the hit
    pub(crate) fn hit(&mut self, location: &Location, kind: EntryKind) -> Option<Hit> {
        let entry = self
            .by_location
            .get_mut(location)?
            .iter_mut()
            .find(|e| e.kind == kind && e.enabled)?;
        entry.hit_count += 1;
        Some(Hit {
            id: entry.id,
            policy: entry.policy,
        })
    }

    pub(crate) fn subscription(&self, kind: StateKind) -> Option<SuspendPolicy> {
        self.subscriptions.get(&kind).copied()
    }

    pub(crate) fn subscribe(&mut self, kind: StateKind, policy: SuspendPolicy) -> bool {
        self.subscriptions.insert(kind, policy).is_none()
    }

    pub(crate) fn unsubscribe(&mut self, kind: StateKind) -> bool {
        self.subscriptions.remove(&kind).is_some()
    }

    pub(crate) fn contains(&self, location: &Location, kind: EntryKind) -> bool {
        self.by_location
            .get(location)
            .map_or(false, |slot| slot.iter().any(|e| e.kind == kind))
    }

    pub(crate) fn sorted(&self) -> Vec<Entry> {
        let mut entries: Vec<Entry> = self.by_location.values().flatten().cloned().collect();
        entries.sort_by_key(|e| e.id);
        entries
    }

    /// Subscriptions ordered by kind name
    pub(crate) fn subscriptions(&self) -> Vec<(StateKind, SuspendPolicy)> {
        let mut subscriptions: Vec<(StateKind, SuspendPolicy)> =
            self.subscriptions.iter().map(|(k, p)| (*k, *p)).collect();
        subscriptions.sort_by_key(|(k, _)| k.as_str());
        subscriptions
    }
}

#[derive(Debug, Default)]
pub struct EventRegistry {
    entries: Mutex<Entries>,
    duplicate_policy: DuplicatePolicy,
}

impl EventRegistry {
    pub fn new(duplicate_policy: DuplicatePolicy) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            duplicate_policy,
        }
    }

    pub(crate) fn locked(&self) -> MutexGuard<'_, Entries> {
        poison::lock(&self.entries, "registry")
    }

    pub(crate) fn add_locked(
        &self,
        entries: &mut Entries,
        location: Location,
        kind: EntryKind,
        policy: SuspendPolicy,
    ) -> WireResult<EntryHandle> {
        let handle = entries.add(location, kind, policy, self.duplicate_policy)?;
        debug!("Registered {} #{} at {}", handle.kind, handle.id, handle.location);
        Ok(handle)
    }

    pub fn duplicate_policy(&self) -> DuplicatePolicy {
        self.duplicate_policy
    }

    pub fn add(
        &self,
        location: Location,
        kind: EntryKind,
        policy: SuspendPolicy,
    ) -> WireResult<EntryHandle> {
        let mut entries = self.locked();
        self.add_locked(&mut entries, location, kind, policy)
    }

    /// Remove every entry at `location`. Absent locations are not an error.
    pub fn remove(&self, location: &Location) -> Vec<Entry> {
        self.locked().remove(location)
    }

    pub fn remove_kind(&self, location: &Location, kind: EntryKind) -> Option<Entry> {
        self.locked().remove_kind(location, kind)
    }

    /// Clear everything; returns how many entries were dropped
    pub fn remove_all(&self) -> usize {
        self.locked().remove_all()
    }

    pub fn lookup(&self, location: &Location) -> Option<EntryHandle> {
        self.locked()
            .by_location
            .get(location)
            .and_then(|slot| slot.first())
            .map(Entry::handle)
    }

    pub fn lookup_kind(&self, location: &Location, kind: EntryKind) -> Option<Entry> {
        self.locked()
            .by_location
            .get(location)
            .and_then(|slot| slot.iter().find(|e| e.kind == kind))
            .cloned()
    }

    pub fn set_enabled(&self, handle: &EntryHandle, enabled: bool) -> WireResult<()> {
        let mut entries = self.locked();
        let entry = entries
            .by_location
            .get_mut(&handle.location)
            .and_then(|slot| slot.iter_mut().find(|e| e.id == handle.id))
            .ok_or_else(|| WireError::UnknownLocation(handle.location.to_string()))?;
        entry.enabled = enabled;
        Ok(())
    }

    /// Snapshot of all entries in creation order
    pub fn entries(&self) -> Vec<Entry> {
        self.locked().sorted()
    }

    pub fn len(&self) -> usize {
        self.locked().by_location.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self, kind: StateKind, policy: SuspendPolicy) -> bool {
        self.locked().subscribe(kind, policy)
    }

    pub fn unsubscribe(&self, kind: StateKind) -> bool {
        self.locked().unsubscribe(kind)
    }

    pub fn subscription(&self, kind: StateKind) -> Option<SuspendPolicy> {
        self.locked().subscription(kind)
    }
}
