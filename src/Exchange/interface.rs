use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::Core::region::MessageRegion;
use crate::Exchange::builder::{InterfaceConfig, Role, Side};
use crate::Exchange::Slot::{SlotState, SlotView};
use crate::Exchange::Structs::Message_Structs::SlotLayout;

/// Which operation this process has in flight on a slot, per side.
/// Process-local; the shared state word is the cross-process truth.
#[derive(Default)]
struct InFlight {
    producing: [AtomicBool; 2],
    consuming: [AtomicBool; 2],
}

/// The shared region of one process plus the slot handoff protocol.
///
/// Every slot is a strict ping-pong: the simulation side writes an
/// observation, the decision side reads it and writes an action, the
/// simulation side reads the action. Both `begin_*` calls block until the slot
/// is in the state that side needs, or fail with `Finished` / `PeerLost`.
pub struct MessageInterface {
    region: MessageRegion,
    config: InterfaceConfig,
    slots: Vec<SlotView>,
    in_flight: Vec<InFlight>,
}

impl MessageInterface {
    /// Create the region (creator role) or wait for and map it (attacher role).
    pub fn create_or_attach(config: InterfaceConfig) -> Result<Self> {
        let region = MessageRegion::open(&config)?;

        let slots: Vec<SlotView> = (0..config.slot_count())
            .map(|i| unsafe {
                SlotView::new(
                    region.header_ptr(),
                    i,
                    region.observation_ptr(i),
                    region.action_ptr(i),
                )
            })
            .collect();

        if config.side == Side::Decision {
            slots.iter().for_each(SlotView::clear_stale_view);
        }

        let in_flight = (0..slots.len()).map(|_| InFlight::default()).collect();

        info!(
            name = %config.shared_name,
            role = ?config.role,
            side = ?config.side,
            slots = slots.len(),
            "message interface ready"
        );

        Ok(Self {
            region,
            config,
            slots,
            in_flight,
        })
    }

    fn slot(&self, index: usize) -> Result<&SlotView> {
        self.slots.get(index).ok_or_else(|| {
            Error::config(format!(
                "slot {} out of range ({} slots)",
                index,
                self.slots.len()
            ))
        })
    }

    fn claim(flag: &AtomicBool, what: &'static str) -> Result<()> {
        if flag.swap(true, Ordering::AcqRel) {
            return Err(Error::Protocol(what));
        }
        Ok(())
    }

    fn release(flag: &AtomicBool, what: &'static str) -> Result<()> {
        if !flag.swap(false, Ordering::AcqRel) {
            return Err(Error::Protocol(what));
        }
        Ok(())
    }

    /// Block until `side` may write its buffer of `slot`, using the
    /// configured exchange timeout.
    pub fn begin_produce(&self, slot: usize, side: Side) -> Result<()> {
        self.begin_produce_timeout(slot, side, self.config.exchange_timeout)
    }

    pub fn begin_produce_timeout(
        &self,
        slot: usize,
        side: Side,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let view = self.slot(slot)?;
        let flag = &self.in_flight[slot].producing[side.index()];
        Self::claim(flag, "begin_produce while a write is already in progress")?;
        view.begin_produce(side, timeout).inspect_err(|_| {
            flag.store(false, Ordering::Release);
        })
    }

    /// Publish the buffer written since `begin_produce` and wake the peer.
    pub fn end_produce(&self, slot: usize, side: Side) -> Result<()> {
        let view = self.slot(slot)?;
        Self::release(
            &self.in_flight[slot].producing[side.index()],
            "end_produce without begin_produce",
        )?;
        view.end_produce(side)?;
        debug!(slot, ?side, "published");
        Ok(())
    }

    /// Give up a write started with `begin_produce` without publishing it.
    /// The slot state is unchanged, so the next `begin_produce` succeeds again.
    pub fn abandon_produce(&self, slot: usize, side: Side) -> Result<()> {
        self.slot(slot)?;
        Self::release(
            &self.in_flight[slot].producing[side.index()],
            "abandon_produce without begin_produce",
        )
    }

    /// Block until the counterpart buffer of `slot` is published for `side`.
    pub fn begin_consume(&self, slot: usize, side: Side) -> Result<()> {
        self.begin_consume_timeout(slot, side, self.config.exchange_timeout)
    }

    pub fn begin_consume_timeout(
        &self,
        slot: usize,
        side: Side,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let view = self.slot(slot)?;
        let flag = &self.in_flight[slot].consuming[side.index()];
        Self::claim(flag, "begin_consume while a read is already in progress")?;
        view.begin_consume(side, timeout).inspect_err(|_| {
            flag.store(false, Ordering::Release);
        })
    }

    /// Release the read view. On the simulation side this returns the slot to
    /// "awaiting observation" for the next round.
    pub fn end_consume(&self, slot: usize, side: Side) -> Result<()> {
        let view = self.slot(slot)?;
        Self::release(
            &self.in_flight[slot].consuming[side.index()],
            "end_consume without begin_consume",
        )?;
        view.end_consume(side)
    }

    /// Raise the cooperative shutdown flag and wake every blocked call on
    /// either side.
    pub fn signal_finished(&self) {
        let header = self.region.header();
        if header.finished.swap(1, Ordering::AcqRel) == 0 {
            info!(name = %self.config.shared_name, "signalled finished");
        }
        self.slots.iter().for_each(SlotView::notify);
    }

    pub fn is_finished(&self) -> bool {
        self.region.header().finished.load(Ordering::Acquire) != 0
    }

    /// Start of the observation buffer of `slot`. Writes are only legal
    /// between `begin_produce`/`end_produce` on the simulation side.
    pub fn observation_ptr(&self, slot: usize) -> Result<*mut u8> {
        Ok(self.slot(slot)?.observation_ptr())
    }

    /// Start of the action buffer of `slot`. Writes are only legal between
    /// `begin_produce`/`end_produce` on the decision side.
    pub fn action_ptr(&self, slot: usize) -> Result<*mut u8> {
        Ok(self.slot(slot)?.action_ptr())
    }

    pub fn slot_state(&self, slot: usize) -> Result<SlotState> {
        Ok(self.slot(slot)?.state())
    }

    /// (observations, actions) published on `slot` so far.
    pub fn published(&self, slot: usize) -> Result<(u64, u64)> {
        let view = self.slot(slot)?;
        Ok((view.observations_published(), view.actions_published()))
    }

    pub fn layout(&self, slot: usize) -> Result<SlotLayout> {
        self.config.layouts.get(slot).copied().ok_or_else(|| {
            Error::config(format!("slot {} out of range", slot))
        })
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn side(&self) -> Side {
        self.config.side
    }

    pub fn role(&self) -> Role {
        self.config.role
    }

    pub fn config(&self) -> &InterfaceConfig {
        &self.config
    }

    pub fn region(&self) -> &MessageRegion {
        &self.region
    }
}

impl Drop for MessageInterface {
    fn drop(&mut self) {
        // The simulation ending is what tells the decision loop to exit.
        if self.config.handle_finish && self.config.side == Side::Simulation {
            self.signal_finished();
        }
    }
}

impl std::fmt::Debug for MessageInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        crate::Debug::StructDebug::debug_message_interface(self, f)
    }
}
