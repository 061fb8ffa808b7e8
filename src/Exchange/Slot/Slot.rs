// The observation/action slot view - one per configured slot index

use super::layout::{RegionHeader, SlotControl};
use std::time::Duration;

/// How long a blocked side sleeps before re-checking the finished flag and
/// the peer's liveness, even without a wakeup.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Observable state of a slot, mirroring the `STATE_*` words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    AwaitingObservation,
    ObservationReady,
    ActionReady,
}

/// A view over one slot of a mapped region.
///
/// This struct is NOT stored in shared memory. It is a transient view that holds
/// pointers into the shared region, which must outlive it.
///
/// ### Handoff Design:
/// - **Simulation side**: waits for `AwaitingObservation` (and no decision-side
///   read view), writes the observation, publishes -> `ObservationReady`.
/// - **Decision side**: reads the observation while `ObservationReady`, writes the
///   action, publishes -> `ActionReady`.
/// - **Simulation side**: reads the action, releases -> `AwaitingObservation`.
///
/// Each transition is a single Release store after the buffer is complete, and
/// readers gate on an Acquire load of the state, so a partially written buffer
/// is never visible to the other side.
pub struct SlotView {
    /// Pointer to the slot control block in the header table.
    pub(crate) control: *const SlotControl,

    /// Pointer to the region header (finished flag, peer pids).
    pub(crate) header: *const RegionHeader,

    /// Start of the observation buffer.
    pub(crate) observation: *mut u8,

    /// Start of the action buffer.
    pub(crate) action: *mut u8,

    /// Stable slot index.
    pub(crate) index: usize,
}

unsafe impl Send for SlotView {}
unsafe impl Sync for SlotView {}
