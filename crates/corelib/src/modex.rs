//! Local modex store: opaque per-process blobs keyed by `ProcId`.
//!
//! A single server can only answer for processes it hosts; a fetch for an
//! unknown process is reported as not found instead of being forwarded.

use indexmap::IndexMap;

use crate::proc::ProcId;
use crate::value::Scope;

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ModexEntry {
    pub scope: Scope,
    pub blob: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct ModexStore {
    entries: IndexMap<ProcId, ModexEntry>,
}

impl ModexStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Store `blob` for `proc`, replacing any earlier contribution.
    pub fn store(&mut self, proc: ProcId, scope: Scope, blob: Vec<u8>) -> Option<ModexEntry> {
        self.entries.insert(proc, ModexEntry { scope, blob })
    }

    pub fn get(&self, proc: &ProcId) -> Option<&ModexEntry> {
        self.entries.get(proc)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
