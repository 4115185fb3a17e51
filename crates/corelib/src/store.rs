//! Publish/lookup directory.
//!
//! Entries are kept in publication order in an [`IndexMap`] keyed by the
//! published key, which gives:
//!
//! - **First writer wins**: a key that is already present is never
//!   overwritten, later publishes of it are ignored.
//! - **Store order scans**: lookups and unpublishes observe entries in the
//!   order they were admitted.
//! - **Safe removal**: bulk deletion goes through `retain`, never through
//!   manual cursor bookkeeping.
//!
//! Ownership is tracked per entry so that `unpublish` only removes what the
//! requester published.

use indexmap::IndexMap;

use crate::proc::ProcId;
use crate::status::Status;
use crate::value::{validate_key, Info, Persistence, PublishedData, Scope, Value};

/// A single published record.
#[derive(Clone, PartialEq, Debug)]
pub struct PublishedEntry {
    pub key: String,
    pub value: Value,
    pub owner: ProcId,
    pub scope: Scope,
    pub persistence: Persistence,
}

/// Outcome of a lookup: one slot per requested key, in request order.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct LookupResult {
    pub status: Status,
    pub data: Vec<Option<PublishedData>>,
}

impl LookupResult {
    /// Number of requested keys that matched.
    pub fn found(&self) -> usize {
        self.data.iter().filter(|slot| slot.is_some()).count()
    }
}

#[derive(Debug, Default)]
pub struct PublishStore {
    entries: IndexMap<String, PublishedEntry>,
}

impl PublishStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&PublishedEntry> {
        self.entries.get(key)
    }

    /// Entries in store order.
    pub fn iter(&self) -> impl Iterator<Item = &PublishedEntry> {
        self.entries.values()
    }

    pub fn contains_all<S: AsRef<str>>(&self, keys: &[S]) -> bool {
        keys.iter().all(|key| self.entries.contains_key(key.as_ref()))
    }

    /// Insert every pair whose key is not yet present, owned by `owner`.
    ///
    /// Duplicates and invalid keys are skipped; the rest of the batch is
    /// still admitted. Returns the number of entries admitted.
    pub fn publish(
        &mut self,
        owner: &ProcId,
        scope: Scope,
        persistence: Persistence,
        infos: Vec<Info>,
    ) -> usize {
        let mut admitted = 0;
        for info in infos {
            if let Err(err) = validate_key(&info.key) {
                tracing::warn!(owner = %owner, error = %err, "skipping invalid key");
                continue;
            }
            if self.entries.contains_key(&info.key) {
                tracing::debug!(key = %info.key, owner = %owner, "key already published, ignoring");
                continue;
            }
            let entry = PublishedEntry {
                key: info.key.clone(),
                value: info.value,
                owner: owner.clone(),
                scope,
                persistence,
            };
            self.entries.insert(info.key, entry);
            admitted += 1;
        }
        admitted
    }

    /// Resolve `keys` in request order.
    ///
    /// The status is `Success` only if every key matched; otherwise
    /// `NotFound` is reported together with whatever did match. Entries
    /// published with [`Persistence::FirstRead`] are removed once returned.
    pub fn lookup<S: AsRef<str>>(&mut self, keys: &[S]) -> LookupResult {
        let mut data = Vec::with_capacity(keys.len());
        let mut consumed = Vec::new();

        for key in keys {
            let key = key.as_ref();
            let slot = self.entries.get(key).map(|entry| {
                if entry.persistence == Persistence::FirstRead {
                    consumed.push(entry.key.clone());
                }
                PublishedData {
                    proc: entry.owner.clone(),
                    key: entry.key.clone(),
                    value: entry.value.clone(),
                }
            });
            data.push(slot);
        }

        for key in consumed {
            self.entries.shift_remove(&key);
        }

        let all_found = data.iter().all(Option::is_some);
        LookupResult {
            status: if all_found {
                Status::Success
            } else {
                Status::NotFound
            },
            data,
        }
    }

    /// Remove entries owned by `requester`.
    ///
    /// With no keys (or an empty list) every entry of the requester goes;
    /// otherwise only entries whose key is listed. Returns how many entries
    /// were removed.
    pub fn unpublish<S: AsRef<str>>(&mut self, requester: &ProcId, keys: Option<&[S]>) -> usize {
        let before = self.entries.len();
        match keys {
            Some(keys) if !keys.is_empty() => self.entries.retain(|key, entry| {
                !(entry.owner == *requester && keys.iter().any(|k| k.as_ref() == key))
            }),
            _ => self.entries.retain(|_, entry| entry.owner != *requester),
        }
        before - self.entries.len()
    }

    /// Drop the entries of `owner` that only live as long as the process.
    pub fn release_process(&mut self, owner: &ProcId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            !(entry.owner == *owner && entry.persistence == Persistence::Process)
        });
        before - self.entries.len()
    }

    /// Tear the whole store down.
    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }
}
