// Typed views binding one slot of a MessageInterface to an (O, A) pair.

use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::Exchange::builder::Side;
use crate::Exchange::interface::MessageInterface;
use crate::Exchange::Structs::Message_Structs::{Message, SlotLayout};

/// A slot of a [`MessageInterface`] bound to `O` observations and `A` actions.
///
/// The simulation side uses `begin_send_observation` / `begin_recv_action`,
/// the decision side `begin_recv_observation` / `begin_send_action`.
pub struct TypedInterface<O: Message, A: Message> {
    inner: Arc<MessageInterface>,
    slot: usize,
    side: Side,
    timeout: Option<Duration>,
    _marker: PhantomData<fn() -> (O, A)>,
}

impl<O: Message, A: Message> std::fmt::Debug for TypedInterface<O, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedInterface")
            .field("inner", &self.inner)
            .field("slot", &self.slot)
            .field("side", &self.side)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<O: Message, A: Message> TypedInterface<O, A> {
    /// Bind `slot` of `inner`, checking the slot was laid out for `(O, A)`.
    pub fn bind(inner: Arc<MessageInterface>, slot: usize) -> Result<Self> {
        let expected = SlotLayout::of::<O, A>();
        let actual = inner.layout(slot)?;
        if actual != expected {
            return Err(Error::config(format!(
                "slot {} is laid out as {:#018x}, cannot bind {} / {} ({:#018x})",
                slot,
                actual.schema_id,
                O::SCHEMA,
                A::SCHEMA,
                expected.schema_id
            )));
        }
        let side = inner.side();
        let timeout = inner.config().exchange_timeout;
        Ok(Self {
            inner,
            slot,
            side,
            timeout,
            _marker: PhantomData,
        })
    }

    /// Override the bound on every blocking call made through this handle.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn interface(&self) -> &Arc<MessageInterface> {
        &self.inner
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    pub fn signal_finished(&self) {
        self.inner.signal_finished()
    }

    fn require(&self, side: Side, what: &'static str) -> Result<()> {
        if self.side != side {
            return Err(Error::Protocol(what));
        }
        Ok(())
    }

    fn produce<T: Message>(&self, ptr: *mut u8, timeout: Option<Duration>) -> Result<ProduceGuard<'_, T>> {
        self.inner.begin_produce_timeout(self.slot, self.side, timeout)?;
        Ok(ProduceGuard {
            iface: &self.inner,
            slot: self.slot,
            side: self.side,
            ptr: ptr as *mut T,
            published: false,
        })
    }

    fn consume<T: Message>(&self, ptr: *mut u8, timeout: Option<Duration>) -> Result<ConsumeGuard<'_, T>> {
        self.inner.begin_consume_timeout(self.slot, self.side, timeout)?;
        Ok(ConsumeGuard {
            iface: &self.inner,
            slot: self.slot,
            side: self.side,
            ptr: ptr as *const T,
            released: false,
        })
    }

    // ----------------------------------------------------------------------
    // Simulation side
    // ----------------------------------------------------------------------

    /// Exclusive write access to the observation buffer.
    pub fn begin_send_observation(&self) -> Result<ProduceGuard<'_, O>> {
        self.require(Side::Simulation, "only the simulation side sends observations")?;
        let ptr = self.inner.observation_ptr(self.slot)?;
        self.produce(ptr, self.timeout)
    }

    /// Read access to the published action.
    pub fn begin_recv_action(&self) -> Result<ConsumeGuard<'_, A>> {
        self.begin_recv_action_timeout(self.timeout)
    }

    pub fn begin_recv_action_timeout(&self, timeout: Option<Duration>) -> Result<ConsumeGuard<'_, A>> {
        self.require(Side::Simulation, "only the simulation side receives actions")?;
        let ptr = self.inner.action_ptr(self.slot)?;
        self.consume(ptr, timeout)
    }

    pub fn send_observation(&self, observation: O) -> Result<()> {
        let mut guard = self.begin_send_observation()?;
        *guard = observation;
        guard.publish()
    }

    pub fn recv_action(&self) -> Result<A> {
        let guard = self.begin_recv_action()?;
        let action = *guard;
        guard.end()?;
        Ok(action)
    }

    /// One full round: publish `observation`, wait for and return the action.
    pub fn exchange(&self, observation: O) -> Result<A> {
        self.send_observation(observation)?;
        self.recv_action()
    }

    // ----------------------------------------------------------------------
    // Decision side
    // ----------------------------------------------------------------------

    /// Read access to the published observation.
    pub fn begin_recv_observation(&self) -> Result<ConsumeGuard<'_, O>> {
        self.require(Side::Decision, "only the decision side receives observations")?;
        let ptr = self.inner.observation_ptr(self.slot)?;
        self.consume(ptr, self.timeout)
    }

    /// Exclusive write access to the action buffer.
    pub fn begin_send_action(&self) -> Result<ProduceGuard<'_, A>> {
        self.require(Side::Decision, "only the decision side sends actions")?;
        let ptr = self.inner.action_ptr(self.slot)?;
        self.produce(ptr, self.timeout)
    }

    pub fn recv_observation(&self) -> Result<O> {
        let guard = self.begin_recv_observation()?;
        let observation = *guard;
        guard.end()?;
        Ok(observation)
    }

    pub fn send_action(&self, action: A) -> Result<()> {
        let mut guard = self.begin_send_action()?;
        *guard = action;
        guard.publish()
    }

    /// Answer observations with `decide` until the simulation finishes.
    /// Returns the number of actions sent.
    pub fn serve<F>(&self, mut decide: F) -> Result<u64>
    where
        F: FnMut(&O) -> A,
    {
        let mut served = 0u64;
        loop {
            let observation = match self.begin_recv_observation() {
                Ok(guard) => guard,
                Err(Error::Finished) => {
                    debug!(slot = self.slot, served, "simulation finished");
                    return Ok(served);
                }
                Err(e) => return Err(e),
            };
            let action = decide(&*observation);

            match self.begin_send_action() {
                Ok(mut out) => {
                    *out = action;
                    out.publish()?;
                }
                Err(Error::Finished) => return Ok(served),
                Err(e) => return Err(e),
            }
            observation.end()?;
            served += 1;
        }
    }
}

/// Exclusive write access to one buffer of a slot.
///
/// Nothing is visible to the peer until [`publish`](Self::publish). Dropping
/// the guard abandons the write and leaves the slot state untouched.
pub struct ProduceGuard<'a, T: Message> {
    iface: &'a MessageInterface,
    slot: usize,
    side: Side,
    ptr: *mut T,
    published: bool,
}

impl<T: Message> ProduceGuard<'_, T> {
    pub fn publish(mut self) -> Result<()> {
        self.published = true;
        self.iface.end_produce(self.slot, self.side)
    }
}

impl<T: Message> Deref for ProduceGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.ptr }
    }
}

impl<T: Message> DerefMut for ProduceGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.ptr }
    }
}

impl<T: Message> Drop for ProduceGuard<'_, T> {
    fn drop(&mut self) {
        if !self.published {
            warn!(slot = self.slot, side = ?self.side, "write abandoned without publishing");
            let _ = self.iface.abandon_produce(self.slot, self.side);
        }
    }
}

/// Read access to the buffer the peer published. Released on
/// [`end`](Self::end) or drop.
pub struct ConsumeGuard<'a, T: Message> {
    iface: &'a MessageInterface,
    slot: usize,
    side: Side,
    ptr: *const T,
    released: bool,
}

impl<T: Message> ConsumeGuard<'_, T> {
    pub fn end(mut self) -> Result<()> {
        self.released = true;
        self.iface.end_consume(self.slot, self.side)
    }
}

impl<T: Message> Deref for ConsumeGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.ptr }
    }
}

impl<T: Message> Drop for ConsumeGuard<'_, T> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.iface.end_consume(self.slot, self.side) {
                warn!(slot = self.slot, side = ?self.side, error = %e, "release on drop failed");
            }
        }
    }
}
