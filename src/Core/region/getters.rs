use super::*;
use crate::Exchange::Slot::layout::{STATE_ACTION_READY, STATE_OBSERVATION_READY};

/// Getter methods exposing region internals for debugging and monitoring.
impl MessageRegion {
    /// Get a reference to the underlying shared memory backend
    ///
    /// # Safety
    /// The returned reference must not outlive the MessageRegion
    pub unsafe fn shm(&self) -> &dyn SharedMemoryBackend {
        &*self.shm
    }

    /// Get the raw pointer to the RegionHeader
    pub fn header_ptr(&self) -> *const RegionHeader {
        self.header
    }

    /// Size of the mapping in bytes
    pub fn mapped_size(&self) -> usize {
        self.shm.size()
    }

    /// Check if the region has been properly initialized
    ///
    /// Returns true if the magic number matches and the creator published
    /// the ready word.
    pub fn is_initialized(&self) -> bool {
        !self.header.is_null()
            && self.header().magic == REGION_MAGIC
            && self.header().ready.load(Ordering::Acquire) == READY_WORD
    }

    /// Number of slots currently waiting on the decision side
    /// (observation published, no action yet).
    pub fn pending_observations(&self) -> usize {
        (0..self.slot_count())
            .filter(|&i| self.header().slots[i].state.load(Ordering::Relaxed) == STATE_OBSERVATION_READY)
            .count()
    }

    /// Number of slots whose action has not yet been consumed.
    pub fn pending_actions(&self) -> usize {
        (0..self.slot_count())
            .filter(|&i| self.header().slots[i].state.load(Ordering::Relaxed) == STATE_ACTION_READY)
            .count()
    }
}
