use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};
use std::time::{Duration, Instant};

use super::layout::{
    RegionHeader, SlotControl, STATE_ACTION_READY, STATE_AWAIT_OBSERVATION,
    STATE_OBSERVATION_READY,
};
use super::Slot::{SlotState, SlotView, POLL_INTERVAL};
use crate::error::{Error, Result};
use crate::Core::futex::{futex_wait, futex_wake_all};
use crate::Core::process::is_process_alive;
use crate::Exchange::builder::Side;

impl SlotView {
    /// Create a slot view over an existing, initialized region.
    ///
    /// # Safety
    /// `header` must point at an initialized region and `index` must be below
    /// its slot count; the buffer pointers must lie inside the same mapping.
    pub unsafe fn new(
        header: *const RegionHeader,
        index: usize,
        observation: *mut u8,
        action: *mut u8,
    ) -> Self {
        Self {
            control: &(*header).slots[index],
            header,
            observation,
            action,
            index,
        }
    }

    #[inline]
    fn control(&self) -> &SlotControl {
        unsafe { &*self.control }
    }

    #[inline]
    fn region(&self) -> &RegionHeader {
        unsafe { &*self.header }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn observation_ptr(&self) -> *mut u8 {
        self.observation
    }

    pub fn action_ptr(&self) -> *mut u8 {
        self.action
    }

    pub fn state(&self) -> SlotState {
        match self.control().state.load(Acquire) {
            STATE_OBSERVATION_READY => SlotState::ObservationReady,
            STATE_ACTION_READY => SlotState::ActionReady,
            _ => SlotState::AwaitingObservation,
        }
    }

    pub fn observations_published(&self) -> u64 {
        self.control().observations_published.load(Relaxed)
    }

    pub fn actions_published(&self) -> u64 {
        self.control().actions_published.load(Relaxed)
    }

    pub fn is_finished(&self) -> bool {
        self.region().finished.load(Acquire) != 0
    }

    fn peer_alive(&self, side: Side) -> bool {
        let pid = match side {
            Side::Simulation => self.region().decision_pid.load(Acquire),
            Side::Decision => self.region().simulation_pid.load(Acquire),
        };
        is_process_alive(pid)
    }

    /// Wake every waiter on this slot after a transition.
    pub fn notify(&self) {
        let signal = &self.control().signal;
        signal.fetch_add(1, Release);
        futex_wake_all(signal);
    }

    /// Block until `ready` holds, the region finishes, the peer dies or
    /// `timeout` expires.
    fn wait_until(
        &self,
        side: Side,
        timeout: Option<Duration>,
        ready: impl Fn(&SlotControl) -> bool,
    ) -> Result<()> {
        let start = Instant::now();
        loop {
            let control = self.control();
            // Snapshot the futex word before checking, so a transition that
            // lands after the check changes the word and the wait returns.
            let seen = control.signal.load(Acquire);

            if self.is_finished() {
                return Err(Error::Finished);
            }
            if ready(control) {
                return Ok(());
            }

            let waited = start.elapsed();
            let mut nap = POLL_INTERVAL;
            if let Some(limit) = timeout {
                if waited >= limit {
                    return Err(Error::PeerLost {
                        slot: self.index,
                        waited,
                    });
                }
                nap = nap.min(limit - waited);
            }
            if !self.peer_alive(side) {
                return Err(Error::PeerLost {
                    slot: self.index,
                    waited,
                });
            }

            futex_wait(&control.signal, seen, nap);
        }
    }

    /// Wait until `side` may write its buffer.
    pub fn begin_produce(&self, side: Side, timeout: Option<Duration>) -> Result<()> {
        match side {
            Side::Simulation => self.wait_until(side, timeout, |c| {
                c.state.load(Acquire) == STATE_AWAIT_OBSERVATION
                    && c.observation_held.load(Acquire) == 0
            }),
            Side::Decision => self.wait_until(side, timeout, |c| {
                c.state.load(Acquire) == STATE_OBSERVATION_READY
            }),
        }
    }

    /// Publish the buffer `side` just wrote.
    pub fn end_produce(&self, side: Side) -> Result<()> {
        let control = self.control();
        let (from, to, counter) = match side {
            Side::Simulation => (
                STATE_AWAIT_OBSERVATION,
                STATE_OBSERVATION_READY,
                &control.observations_published,
            ),
            Side::Decision => (
                STATE_OBSERVATION_READY,
                STATE_ACTION_READY,
                &control.actions_published,
            ),
        };

        control
            .state
            .compare_exchange(from, to, AcqRel, Acquire)
            .map_err(|_| Error::Protocol("slot changed state while being written"))?;
        counter.fetch_add(1, Relaxed);
        self.notify();
        Ok(())
    }

    /// Wait until the counterpart buffer for `side` is published.
    pub fn begin_consume(&self, side: Side, timeout: Option<Duration>) -> Result<()> {
        match side {
            Side::Simulation => self.wait_until(side, timeout, |c| {
                c.state.load(Acquire) == STATE_ACTION_READY
            }),
            Side::Decision => {
                self.wait_until(side, timeout, |c| {
                    c.state.load(Acquire) == STATE_OBSERVATION_READY
                })?;
                self.control().observation_held.store(1, Release);
                Ok(())
            }
        }
    }

    /// Release the view taken by `begin_consume`.
    pub fn end_consume(&self, side: Side) -> Result<()> {
        let control = self.control();
        match side {
            Side::Simulation => {
                control
                    .state
                    .compare_exchange(STATE_ACTION_READY, STATE_AWAIT_OBSERVATION, AcqRel, Acquire)
                    .map_err(|_| Error::Protocol("action released while not published"))?;
            }
            Side::Decision => {
                control.observation_held.store(0, Release);
            }
        }
        self.notify();
        Ok(())
    }

    /// Drop any read view left behind by a previous decision process that
    /// died while holding the observation.
    pub(crate) fn clear_stale_view(&self) {
        if self.control().observation_held.swap(0, AcqRel) != 0 {
            self.notify();
        }
    }
}

impl std::fmt::Debug for SlotView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        crate::Debug::StructDebug::debug_slot_view(self, f)
    }
}
