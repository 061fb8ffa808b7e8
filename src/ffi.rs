use crate::error::Error;
use crate::Exchange::builder::{InterfaceConfig, Role, Side, SlotMode};
use crate::Exchange::interface::MessageInterface;
use crate::Exchange::Structs::Message_Structs::{schema_id, SlotLayout};
use std::ffi::{c_char, CStr};
use std::ptr;
use std::time::Duration;

// Error codes
const DMXP_SUCCESS: i32 = 0;
const DMXP_ERROR_NULL_POINTER: i32 = -1;
const DMXP_ERROR_INVALID_ARG: i32 = -2;
const DMXP_ERROR_CONFIGURATION: i32 = -3;
const DMXP_ERROR_PEER_LOST: i32 = -4;
const DMXP_ERROR_FINISHED: i32 = -5;
const DMXP_ERROR_PROTOCOL: i32 = -6;
const DMXP_ERROR_INTERNAL: i32 = -7;

/// Handle to a message interface (opaque pointer)
pub struct InterfaceHandle {
    inner: MessageInterface,
}

/// Layout of one slot as seen from C.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DmxpSlotLayout {
    pub observation_size: u32,
    pub observation_align: u32,
    pub action_size: u32,
    pub action_align: u32,
    /// From `dmxp_schema_id`, identical on both sides.
    pub schema_id: u64,
}

fn error_code(err: &Error) -> i32 {
    match err {
        Error::Configuration(_) => DMXP_ERROR_CONFIGURATION,
        Error::PeerLost { .. } => DMXP_ERROR_PEER_LOST,
        Error::Finished => DMXP_ERROR_FINISHED,
        Error::Protocol(_) => DMXP_ERROR_PROTOCOL,
        Error::InvalidAction { .. } | Error::ClockAnomaly { .. } => DMXP_ERROR_INVALID_ARG,
        Error::Io(_) => DMXP_ERROR_INTERNAL,
    }
}

fn status(result: crate::error::Result<()>) -> i32 {
    match result {
        Ok(()) => DMXP_SUCCESS,
        Err(e) => error_code(&e),
    }
}

/// Run `op` on the interface behind `handle`, mapping the outcome to a status code.
unsafe fn with_interface(
    handle: *mut InterfaceHandle,
    op: impl FnOnce(&MessageInterface) -> crate::error::Result<()>,
) -> i32 {
    match handle.as_ref() {
        Some(h) => status(op(&h.inner)),
        None => DMXP_ERROR_NULL_POINTER,
    }
}

/// Negative milliseconds mean "no timeout".
fn timeout_from_ms(timeout_ms: i64) -> Option<Duration> {
    u64::try_from(timeout_ms).ok().map(Duration::from_millis)
}

unsafe fn str_arg<'a>(s: *const c_char) -> Option<&'a str> {
    if s.is_null() {
        return None;
    }
    CStr::from_ptr(s).to_str().ok()
}

// -----------------------------------------------------------------------------
// Setup
// -----------------------------------------------------------------------------

/// Schema id of a message pair, for filling `DmxpSlotLayout::schema_id`.
///
/// Returns 0 if either name is NULL or not UTF-8.
#[no_mangle]
pub unsafe extern "C" fn dmxp_schema_id(
    observation_name: *const c_char,
    observation_size: u32,
    observation_align: u32,
    action_name: *const c_char,
    action_size: u32,
    action_align: u32,
) -> u64 {
    match (str_arg(observation_name), str_arg(action_name)) {
        (Some(obs), Some(act)) => schema_id(
            (obs, observation_size, observation_align),
            (act, action_size, action_align),
        ),
        _ => 0,
    }
}

/// Create or attach a message interface.
///
/// # Arguments
/// * `name` - Shared name (file under /dev/shm).
/// * `creator` - Allocate the region (true) or attach to it (false).
/// * `decision_side` - Play the decision side (true) or the simulation side.
/// * `vector_mode` - Vector mode; scalar mode requires exactly one slot.
/// * `handle_finish` - Simulation side raises the finished flag on free.
/// * `layouts` / `slot_count` - One layout per slot.
/// * `attach_timeout_ms` - How long an attacher waits; negative waits forever.
///
/// # Returns
/// * Pointer to `InterfaceHandle`, or NULL on failure.
#[no_mangle]
pub unsafe extern "C" fn dmxp_interface_open(
    name: *const c_char,
    creator: bool,
    decision_side: bool,
    vector_mode: bool,
    handle_finish: bool,
    layouts: *const DmxpSlotLayout,
    slot_count: u32,
    attach_timeout_ms: i64,
) -> *mut InterfaceHandle {
    let Some(name) = str_arg(name) else {
        return ptr::null_mut();
    };
    if layouts.is_null() || slot_count == 0 {
        return ptr::null_mut();
    }

    let layouts = std::slice::from_raw_parts(layouts, slot_count as usize)
        .iter()
        .map(|l| {
            SlotLayout::raw(
                l.observation_size,
                l.observation_align,
                l.action_size,
                l.action_align,
                l.schema_id,
            )
        })
        .collect();

    let config = InterfaceConfig::builder()
        .shared_name(name)
        .role(if creator { Role::Creator } else { Role::Attacher })
        .side(if decision_side { Side::Decision } else { Side::Simulation })
        .slots(layouts)
        .mode(if vector_mode { SlotMode::Vector } else { SlotMode::Scalar })
        .handle_finish(handle_finish)
        .attach_timeout(timeout_from_ms(attach_timeout_ms))
        .build();

    match config.and_then(MessageInterface::create_or_attach) {
        Ok(inner) => Box::into_raw(Box::new(InterfaceHandle { inner })),
        Err(e) => {
            tracing::error!(error = %e, name, "dmxp_interface_open failed");
            ptr::null_mut()
        }
    }
}

/// Free an interface handle. A creator also removes the shared region.
#[no_mangle]
pub unsafe extern "C" fn dmxp_interface_free(handle: *mut InterfaceHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

// -----------------------------------------------------------------------------
// Handoff
// -----------------------------------------------------------------------------

/// Block until this side may write its buffer of `slot`.
///
/// # Returns
/// * 0 on success, `DMXP_ERROR_FINISHED` once the run ended,
///   `DMXP_ERROR_PEER_LOST` on timeout or peer death.
#[no_mangle]
pub unsafe extern "C" fn dmxp_begin_produce(handle: *mut InterfaceHandle, slot: u32, timeout_ms: i64) -> i32 {
    with_interface(handle, |iface| {
        iface.begin_produce_timeout(slot as usize, iface.side(), timeout_from_ms(timeout_ms))
    })
}

/// Publish the buffer written since `dmxp_begin_produce`.
#[no_mangle]
pub unsafe extern "C" fn dmxp_end_produce(handle: *mut InterfaceHandle, slot: u32) -> i32 {
    with_interface(handle, |iface| iface.end_produce(slot as usize, iface.side()))
}

/// Drop a write without publishing it.
#[no_mangle]
pub unsafe extern "C" fn dmxp_abandon_produce(handle: *mut InterfaceHandle, slot: u32) -> i32 {
    with_interface(handle, |iface| iface.abandon_produce(slot as usize, iface.side()))
}

/// Block until the counterpart buffer of `slot` is published.
#[no_mangle]
pub unsafe extern "C" fn dmxp_begin_consume(handle: *mut InterfaceHandle, slot: u32, timeout_ms: i64) -> i32 {
    with_interface(handle, |iface| {
        iface.begin_consume_timeout(slot as usize, iface.side(), timeout_from_ms(timeout_ms))
    })
}

#[no_mangle]
pub unsafe extern "C" fn dmxp_end_consume(handle: *mut InterfaceHandle, slot: u32) -> i32 {
    with_interface(handle, |iface| iface.end_consume(slot as usize, iface.side()))
}

/// Observation buffer of `slot`, or NULL if out of range.
#[no_mangle]
pub unsafe extern "C" fn dmxp_observation_ptr(handle: *mut InterfaceHandle, slot: u32) -> *mut u8 {
    handle
        .as_ref()
        .and_then(|h| h.inner.observation_ptr(slot as usize).ok())
        .unwrap_or(ptr::null_mut())
}

/// Action buffer of `slot`, or NULL if out of range.
#[no_mangle]
pub unsafe extern "C" fn dmxp_action_ptr(handle: *mut InterfaceHandle, slot: u32) -> *mut u8 {
    handle
        .as_ref()
        .and_then(|h| h.inner.action_ptr(slot as usize).ok())
        .unwrap_or(ptr::null_mut())
}

// -----------------------------------------------------------------------------
// Shutdown
// -----------------------------------------------------------------------------

#[no_mangle]
pub unsafe extern "C" fn dmxp_signal_finished(handle: *mut InterfaceHandle) -> i32 {
    with_interface(handle, |iface| {
        iface.signal_finished();
        Ok(())
    })
}

/// 1 if finished, 0 if not, negative on error.
#[no_mangle]
pub unsafe extern "C" fn dmxp_is_finished(handle: *mut InterfaceHandle) -> i32 {
    match handle.as_ref() {
        Some(h) => i32::from(h.inner.is_finished()),
        None => DMXP_ERROR_NULL_POINTER,
    }
}
