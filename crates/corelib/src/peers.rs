//! Bookkeeping of the local peers expected to finalize.

use indexmap::IndexSet;

use crate::proc::ProcId;

/// Result of recording a finalize.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum FinalizeOutcome {
    /// First finalize from this peer; `last` is set when every expected
    /// peer has now finalized.
    Recorded { last: bool },
    /// The peer had already finalized.
    Duplicate,
}

#[derive(Debug)]
pub struct PeerTable {
    expected: usize,
    finalized: IndexSet<ProcId>,
}

impl PeerTable {
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            finalized: IndexSet::new(),
        }
    }

    pub fn finalized_count(&self) -> usize {
        self.finalized.len()
    }

    pub fn all_finalized(&self) -> bool {
        self.finalized.len() >= self.expected
    }

    pub fn mark_finalized(&mut self, proc: &ProcId) -> FinalizeOutcome {
        if !self.finalized.insert(proc.clone()) {
            return FinalizeOutcome::Duplicate;
        }
        FinalizeOutcome::Recorded {
            last: self.finalized.len() == self.expected,
        }
    }
}
