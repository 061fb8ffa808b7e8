use std::fmt;
use std::sync::atomic::Ordering;

use crate::Core::region::MessageRegion;
use crate::Exchange::interface::MessageInterface;
use crate::Exchange::Slot::SlotView;

/// Debug function for MessageRegion
///
/// Shows the header location and the shared words both processes agree on
/// without dereferencing the data band:
/// - Name and role
/// - Slot count and mapping size
/// - Finished flag and recorded pids
pub fn debug_message_region(region: &MessageRegion, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let initialized = region.is_initialized();
    let mut s = f.debug_struct("MessageRegion");
    s.field("name", &region.name())
        .field("role", &region.role())
        .field("header", &format_args!("{:p}", region.header_ptr()))
        .field("mapped_size", &region.mapped_size())
        .field("initialized", &initialized);
    if initialized {
        let header = region.header();
        s.field("slot_count", &region.slot_count())
            .field("finished", &(header.finished.load(Ordering::Relaxed) != 0))
            .field("creator_pid", &header.creator_pid.load(Ordering::Relaxed))
            .field("simulation_pid", &header.simulation_pid.load(Ordering::Relaxed))
            .field("decision_pid", &header.decision_pid.load(Ordering::Relaxed))
            .field("pending_observations", &region.pending_observations())
            .field("pending_actions", &region.pending_actions());
    }
    s.finish()
}

/// Debug function for SlotView
///
/// State and publish counters only; buffers are shown as addresses.
pub fn debug_slot_view(view: &SlotView, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SlotView")
        .field("index", &view.index())
        .field("state", &view.state())
        .field("observations", &view.observations_published())
        .field("actions", &view.actions_published())
        .field("observation", &format_args!("0x{:x}", view.observation_ptr() as usize))
        .field("action", &format_args!("0x{:x}", view.action_ptr() as usize))
        .finish()
}

pub fn debug_message_interface(iface: &MessageInterface, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MessageInterface")
        .field("side", &iface.side())
        .field("finished", &iface.is_finished())
        .field("region", iface.region())
        .finish_non_exhaustive()
}
