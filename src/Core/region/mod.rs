use crate::error::{Error, Result};
use crate::Core::process::{current_pid, is_process_alive};
use crate::Core::SharedMemory::{
    attach_shared_memory, create_shared_memory, unlink_shared_memory, SharedMemoryBackend,
};
use crate::Exchange::builder::{InterfaceConfig, Role, Side, SlotMode};
use crate::Exchange::Slot::layout::{
    plan_region, RegionHeader, SlotControl, MODE_SCALAR, MODE_VECTOR, READY_WORD, REGION_MAGIC,
    REGION_VERSION, STATE_AWAIT_OBSERVATION,
};
use lazy_static::lazy_static;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::io;
use std::mem::size_of;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
mod debug;
mod getters;

const ATTACH_RETRY: Duration = Duration::from_millis(10);

/// How long an existing region without a readable owner is given to show one.
const CREATOR_INIT_GRACE: Duration = Duration::from_millis(500);

lazy_static! {
    // Names this process currently owns as creator.
    static ref LIVE_CREATORS: Mutex<HashSet<String>> = Mutex::new(HashSet::new());
}

/// A mapped shared region: header, slot table and data band.
///
/// The creator initializes and, on drop, unlinks the region. An attacher only
/// maps it and never destroys it.
pub struct MessageRegion {
    shm: Box<dyn SharedMemoryBackend>,
    header: *mut RegionHeader,
    role: Role,
}

impl MessageRegion {
    /// Create-or-attach according to `config.role`.
    pub fn open(config: &InterfaceConfig) -> Result<Self> {
        let region = match config.role {
            Role::Creator => Self::create(config)?,
            Role::Attacher => Self::attach(config)?,
        };
        region.register_side(config.side);
        Ok(region)
    }

    /// Allocate and initialize a fresh region under `config.shared_name`.
    pub fn create(config: &InterfaceConfig) -> Result<Self> {
        let name = config.shared_name.as_str();
        let (offsets, size) = plan_region(&config.layouts);

        let mut live = LIVE_CREATORS.lock();
        if live.contains(name) {
            return Err(Error::config(format!(
                "a creator already exists for {:?} in this process",
                name
            )));
        }

        let shm = match create_shared_memory(size, name) {
            Ok(shm) => shm,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if let Some(pid) = live_foreign_creator(name)? {
                    return Err(Error::config(format!(
                        "region {:?} is already owned by creator pid {}",
                        name, pid
                    )));
                }
                warn!(name, "replacing stale shared region");
                unlink_shared_memory(name)?;
                create_shared_memory(size, name).map_err(|e| match e.kind() {
                    io::ErrorKind::AlreadyExists => Error::config(format!(
                        "another creator took region {:?} while it was being replaced",
                        name
                    )),
                    _ => Error::Io(e),
                })?
            }
            Err(e) => return Err(e.into()),
        };

        let header = shm.as_ptr() as *mut RegionHeader;
        // Claim the name before anything else so a concurrent creator sees
        // a live owner rather than a stale file.
        unsafe { (*header).creator_pid.store(current_pid(), Ordering::Release) };

        if (header as usize) % std::mem::align_of::<RegionHeader>() != 0 {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "Shared memory not properly aligned",
            )));
        }

        // The file is fresh and zero-filled; zero is a valid value for every
        // atomic in the header, so fields can be written in place.
        unsafe {
            let h = &mut *header;
            h.version = REGION_VERSION;
            h.slot_count = config.layouts.len() as u32;
            h.mode = match config.mode {
                SlotMode::Scalar => MODE_SCALAR,
                SlotMode::Vector => MODE_VECTOR,
            };
            h.handle_finish = config.handle_finish as u32;
            h.total_size = size as u64;

            for (i, (layout, (obs_off, act_off))) in
                config.layouts.iter().zip(offsets.iter()).enumerate()
            {
                let slot = &mut h.slots[i];
                slot.state.store(STATE_AWAIT_OBSERVATION, Ordering::Relaxed);
                slot.schema_id = layout.schema_id;
                slot.observation_offset = *obs_off;
                slot.action_offset = *act_off;
                slot.observation_size = layout.observation_size;
                slot.action_size = layout.action_size;
            }

            h.magic = REGION_MAGIC;
            h.ready.store(READY_WORD, Ordering::Release);
        }

        live.insert(name.to_owned());
        info!(name, size, slots = config.layouts.len(), "created shared region");

        Ok(Self {
            shm,
            header,
            role: Role::Creator,
        })
    }

    /// Map a region made by the creator, waiting for it to appear and become
    /// ready, then check it against `config`.
    pub fn attach(config: &InterfaceConfig) -> Result<Self> {
        let name = config.shared_name.as_str();
        let start = Instant::now();
        let mut announced = false;

        let shm = loop {
            match attach_shared_memory(name, size_of::<RegionHeader>()) {
                Ok(shm) => {
                    let header = unsafe { &*(shm.as_ptr() as *const RegionHeader) };
                    if header.ready.load(Ordering::Acquire) == READY_WORD
                        && header.magic == REGION_MAGIC
                    {
                        break shm;
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::NotFound | io::ErrorKind::InvalidData
                    ) => {}
                Err(e) => return Err(e.into()),
            }

            if let Some(limit) = config.attach_timeout {
                if start.elapsed() >= limit {
                    return Err(Error::config(format!(
                        "no creator initialized region {:?} within {:?}",
                        name, limit
                    )));
                }
            }
            if !announced {
                info!(name, "waiting for the memory creator");
                announced = true;
            }
            std::thread::sleep(ATTACH_RETRY);
        };

        let header = shm.as_ptr() as *mut RegionHeader;
        validate_header(unsafe { &*header }, shm.size(), config)?;
        debug!(name, size = shm.size(), "attached shared region");

        Ok(Self {
            shm,
            header,
            role: Role::Attacher,
        })
    }

    fn register_side(&self, side: Side) {
        let header = self.header();
        let pid = match side {
            Side::Simulation => &header.simulation_pid,
            Side::Decision => &header.decision_pid,
        };
        pid.store(current_pid(), Ordering::Release);
    }

    pub fn header(&self) -> &RegionHeader {
        unsafe { &*self.header }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn name(&self) -> &str {
        self.shm.name()
    }

    pub fn slot_count(&self) -> usize {
        self.header().slot_count as usize
    }

    pub fn slot(&self, index: usize) -> Option<&SlotControl> {
        if index >= self.slot_count() {
            return None;
        }
        Some(&self.header().slots[index])
    }

    /// Pointer to the start of the observation buffer of `index`.
    ///
    /// # Safety
    /// `index` must be below `slot_count()`. Writes through the pointer must
    /// follow the slot handoff protocol.
    pub unsafe fn observation_ptr(&self, index: usize) -> *mut u8 {
        let offset = self.header().slots[index].observation_offset as usize;
        self.shm.as_ptr().add(offset)
    }

    /// Pointer to the start of the action buffer of `index`.
    ///
    /// # Safety
    /// Same contract as [`observation_ptr`](Self::observation_ptr).
    pub unsafe fn action_ptr(&self, index: usize) -> *mut u8 {
        let offset = self.header().slots[index].action_offset as usize;
        self.shm.as_ptr().add(offset)
    }

    /// Pid of the process playing the other side, 0 if it never registered.
    pub fn peer_pid(&self, side: Side) -> u32 {
        let header = self.header();
        match side {
            Side::Simulation => header.decision_pid.load(Ordering::Acquire),
            Side::Decision => header.simulation_pid.load(Ordering::Acquire),
        }
    }
}

impl Drop for MessageRegion {
    fn drop(&mut self) {
        if self.role != Role::Creator {
            return;
        }
        let name = self.shm.name().to_owned();
        if let Err(e) = unlink_shared_memory(&name) {
            warn!(name = %name, error = %e, "failed to unlink shared region");
        }
        LIVE_CREATORS.lock().remove(&name);
        debug!(name = %name, "released shared region");
    }
}

// Implement Send + Sync since synchronization happens through the slot atomics
unsafe impl Send for MessageRegion {}
unsafe impl Sync for MessageRegion {}

/// Pid of a live creator in another process owning `name`, if any.
///
/// A live `creator_pid` owns the region whatever state its header is in. A
/// file too short to hold a header, or one with no pid yet, may belong to a
/// creator that has not finished setting it up, so it is re-read until
/// `CREATOR_INIT_GRACE` runs out before being called stale.
fn live_foreign_creator(name: &str) -> Result<Option<u32>> {
    let deadline = Instant::now() + CREATOR_INIT_GRACE;
    loop {
        match attach_shared_memory(name, size_of::<RegionHeader>()) {
            Ok(shm) => {
                let header = unsafe { &*(shm.as_ptr() as *const RegionHeader) };
                let pid = header.creator_pid.load(Ordering::Acquire);
                if pid == current_pid() {
                    return Ok(None);
                }
                if pid != 0 {
                    return Ok(is_process_alive(pid).then_some(pid));
                }
                if header.magic == REGION_MAGIC {
                    return Ok(None);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {}
            Err(e) => return Err(e.into()),
        }

        if Instant::now() >= deadline {
            return Ok(None);
        }
        std::thread::sleep(ATTACH_RETRY);
    }
}

fn validate_header(header: &RegionHeader, mapped: usize, config: &InterfaceConfig) -> Result<()> {
    if header.version != REGION_VERSION {
        return Err(Error::config(format!(
            "layout version {} does not match expected {}",
            header.version, REGION_VERSION
        )));
    }
    if (header.total_size as usize) > mapped {
        return Err(Error::config("region is smaller than its header claims"));
    }
    if header.slot_count as usize != config.layouts.len() {
        return Err(Error::config(format!(
            "creator configured {} slots, attacher expects {}",
            header.slot_count,
            config.layouts.len()
        )));
    }
    let mode = match config.mode {
        SlotMode::Scalar => MODE_SCALAR,
        SlotMode::Vector => MODE_VECTOR,
    };
    if header.mode != mode {
        return Err(Error::config("scalar/vector slot mode differs from the creator"));
    }
    if header.handle_finish != config.handle_finish as u32 {
        return Err(Error::config("handle-finish flag differs from the creator"));
    }

    for (i, layout) in config.layouts.iter().enumerate() {
        let slot = &header.slots[i];
        if slot.schema_id != layout.schema_id
            || slot.observation_size != layout.observation_size
            || slot.action_size != layout.action_size
        {
            return Err(Error::config(format!(
                "slot {} schema mismatch: region has {:#018x} ({}B/{}B), expected {:#018x} ({}B/{}B)",
                i,
                slot.schema_id,
                slot.observation_size,
                slot.action_size,
                layout.schema_id,
                layout.observation_size,
                layout.action_size
            )));
        }
        let end_obs = slot.observation_offset as usize + slot.observation_size as usize;
        let end_act = slot.action_offset as usize + slot.action_size as usize;
        if end_obs > mapped || end_act > mapped {
            return Err(Error::config(format!("slot {} buffers lie outside the region", i)));
        }
    }
    Ok(())
}
