//! Lowest-free-sequence code allocation, serialized per numbering slot.

use std::sync::{Mutex, MutexGuard};

use axon_store::{DirectoryStore, DirectoryStoreError};
use axon_types::{AgentCode, AgentTier, CodePrefix, CodeSpace, MAX_CODE_SEQUENCE};

use crate::{DirectoryError, EngineResult};

const SLOT_COUNT: usize = CodeSpace::ALL.len() * CodePrefix::ALL.len();

/// Returns the smallest sequence number in 1..=999 not present in `taken`,
/// or `None` when the space is exhausted.
pub fn first_free_sequence(taken: &[u16]) -> Option<u16> {
    let mut held: Vec<u16> = taken
        .iter()
        .copied()
        .filter(|sequence| (1..=MAX_CODE_SEQUENCE).contains(sequence))
        .collect();
    held.sort_unstable();
    held.dedup();

    let mut candidate: u16 = 1;
    for sequence in held {
        if sequence > candidate {
            break;
        }
        candidate += 1;
    }
    if candidate > MAX_CODE_SEQUENCE {
        None
    } else {
        Some(candidate)
    }
}

/// Issues unique tier-prefixed codes by scanning the currently-held sequence
/// numbers of the entire agent population.
///
/// Each `(space, prefix)` slot carries an in-process mutex; the directory
/// holds the slot guard across scan *and* reservation so two concurrent
/// allocations for the same tier never observe the same free sequence. A
/// collision against another service instance still surfaces as `CodeTaken`
/// from the store and is retried by the caller.
#[derive(Debug, Default)]
pub struct CodeAllocator {
    slots: [Mutex<()>; SLOT_COUNT],
}

impl CodeAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot_index(space: CodeSpace, prefix: CodePrefix) -> usize {
        space.index() * CodePrefix::ALL.len() + prefix.index()
    }

    /// Locks one numbering slot for the duration of a scan-and-reserve step.
    /// Guards for different spaces of the same prefix are always taken in
    /// `CodeSpace::ALL` order to keep lock acquisition deadlock-free.
    pub(crate) fn reserve_slot(
        &self,
        space: CodeSpace,
        prefix: CodePrefix,
    ) -> EngineResult<MutexGuard<'_, ()>> {
        self.slots[Self::slot_index(space, prefix)]
            .lock()
            .map_err(|_| DirectoryStoreError::LockPoisoned.into())
    }

    /// Scans for the smallest unused code without taking the slot guard; the
    /// caller is expected to hold it via [`Self::reserve_slot`].
    pub(crate) fn scan_free(
        &self,
        store: &dyn DirectoryStore,
        space: CodeSpace,
        prefix: CodePrefix,
    ) -> EngineResult<String> {
        let taken = store.taken_sequences(space, prefix)?;
        let sequence = first_free_sequence(&taken)
            .ok_or(DirectoryError::AllocationExhausted { space, prefix })?;
        Ok(AgentCode::new(prefix, sequence).to_string())
    }

    /// Allocates the smallest unused code for `tier` in `space`.
    pub fn allocate(
        &self,
        store: &dyn DirectoryStore,
        space: CodeSpace,
        tier: AgentTier,
    ) -> EngineResult<String> {
        let prefix = tier.prefix();
        let _slot = self.reserve_slot(space, prefix)?;
        self.scan_free(store, space, prefix)
    }
}
