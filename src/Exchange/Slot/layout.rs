use crossbeam_utils::CachePadded;
use std::mem::size_of;
use std::sync::atomic::{AtomicU32, AtomicU64};

use crate::Exchange::Structs::Message_Structs::SlotLayout;

/// The maximum number of slots that can be configured in one region.
/// This must be a constant to allow for a fixed-size array in the RegionHeader.
pub const MAX_SLOTS: usize = 64;

/// Minimum alignment of every observation/action buffer in the data band.
pub const BUFFER_ALIGN: usize = 64;

/// Region files are sized in whole pages.
pub const PAGE_SIZE: usize = 4096;

pub const REGION_MAGIC: u64 = 0x444D_5850_5349_4D42; // "DMXPSIMB"
pub const REGION_VERSION: u32 = 1;

/// Written last by the creator; attachers never read anything else before it.
pub const READY_WORD: u32 = 0x5245_4459; // "REDY"

/// Slot states. Exactly one holds at any time.
pub const STATE_AWAIT_OBSERVATION: u32 = 0;
pub const STATE_OBSERVATION_READY: u32 = 1;
pub const STATE_ACTION_READY: u32 = 2;

pub const MODE_SCALAR: u32 = 0;
pub const MODE_VECTOR: u32 = 1;

/// Control block of one observation/action slot.
///
/// Lives in the header table; the buffers themselves live in the data band
/// at `observation_offset` / `action_offset`.
#[repr(C, align(128))]
pub struct SlotControl {
    /// One of the `STATE_*` constants. Written with Release after the
    /// corresponding buffer is complete, read with Acquire before it is used.
    pub state: AtomicU32,

    /// Futex word. Bumped on every transition and on finish so that
    /// waiters never miss a wakeup between checking and sleeping.
    pub signal: AtomicU32,

    /// Non-zero while the decision side holds a read view of the observation.
    /// The simulation side may not overwrite the observation until it drops.
    pub observation_held: AtomicU32,

    /// Reserved.
    pub flags: u32,

    /// Schema id of the (Observation, Action) pair bound to this slot.
    pub schema_id: u64,

    /// Byte offset of the observation buffer from the start of the region.
    pub observation_offset: u64,

    /// Byte offset of the action buffer from the start of the region.
    pub action_offset: u64,

    pub observation_size: u32,
    pub action_size: u32,

    /// Count of observations published on this slot.
    pub observations_published: CachePadded<AtomicU64>,

    /// Count of actions published on this slot.
    pub actions_published: CachePadded<AtomicU64>,
}

/// The header located at the very beginning of the shared region.
///
/// It is the entry point for both processes, carrying versioning, the
/// configuration both sides must agree on, and the slot table.
#[repr(C, align(128))]
pub struct RegionHeader {
    /// A "magic number" identifying the region as a simulation bridge.
    pub magic: u64,

    /// The version of the memory layout.
    pub version: u32,

    /// Number of slots in use (prefix of `slots`).
    pub slot_count: u32,

    /// `MODE_SCALAR` or `MODE_VECTOR`.
    pub mode: u32,

    /// Non-zero if the simulation side raises the finished flag on teardown.
    pub handle_finish: u32,

    /// `READY_WORD` once the creator finished initializing.
    pub ready: AtomicU32,

    /// Cooperative shutdown flag.
    pub finished: AtomicU32,

    pub creator_pid: AtomicU32,
    pub simulation_pid: AtomicU32,
    pub decision_pid: AtomicU32,
    pub reserved: u32,

    /// Size in bytes the creator mapped.
    pub total_size: u64,

    /// The slot table.
    pub slots: [SlotControl; MAX_SLOTS],
}

#[inline]
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Buffer offsets for each slot and the total region size for `layouts`.
/// Both processes derive the same answer from the same layouts.
pub fn plan_region(layouts: &[SlotLayout]) -> (Vec<(u64, u64)>, usize) {
    let mut offset = size_of::<RegionHeader>();
    let mut offsets = Vec::with_capacity(layouts.len());

    for layout in layouts {
        offset = align_up(offset, BUFFER_ALIGN.max(layout.observation_align as usize));
        let observation = offset;
        offset += layout.observation_size as usize;

        offset = align_up(offset, BUFFER_ALIGN.max(layout.action_align as usize));
        let action = offset;
        offset += layout.action_size as usize;

        offsets.push((observation as u64, action as u64));
    }

    (offsets, align_up(offset.max(1), PAGE_SIZE))
}
