use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::Control::trigger::TriggerPolicy;
use crate::Exchange::typed::TypedInterface;
use crate::Exchange::Slot::SlotState;
use crate::Exchange::Structs::Message;

/// Where a control cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Observe,
    Send,
    AwaitAction,
    Apply,
}

/// Result of one control cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome<A> {
    /// The trigger policy did not ask for an exchange.
    Skipped,
    /// The action arrived and the actuator accepted it.
    Applied(A),
    /// The action arrived but the actuator refused it; state is unchanged.
    Rejected(A),
    /// No answer this cycle. Nothing was applied; the next cycle retries.
    PeerLost,
    /// The exchange is shut down; no further cycles will exchange.
    Finished,
}

impl<A> CycleOutcome<A> {
    pub fn action(&self) -> Option<&A> {
        match self {
            CycleOutcome::Applied(a) | CycleOutcome::Rejected(a) => Some(a),
            _ => None,
        }
    }
}

/// Pushes an action into the controlled entity.
///
/// Returning `Err(Error::InvalidAction { .. })` (or any error) rejects the
/// action; the loop counts it and keeps running.
pub trait Actuator<A> {
    fn apply(&mut self, action: &A) -> Result<()>;
}

impl<A, F> Actuator<A> for F
where
    F: FnMut(&A) -> Result<()>,
{
    fn apply(&mut self, action: &A) -> Result<()> {
        self(action)
    }
}

/// Counters of one control loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub cycles: u64,
    pub skipped: u64,
    pub applied: u64,
    pub rejected: u64,
    pub peer_lost: u64,
    pub finished: u64,
    /// Late actions from a cycle that had already given up, thrown away.
    pub stale_discarded: u64,
}

/// Simulation-side control cycle over one typed slot:
/// `Idle -> Observe -> Send -> AwaitAction -> Apply -> Idle`.
///
/// `AwaitAction` is the only suspension point. A cycle that loses its peer
/// there leaves an observation outstanding; the next cycle first collects
/// and discards the late action so the decision side and this loop agree on
/// which observation an action answers.
pub struct ControlLoop<O: Message, A: Message, P: TriggerPolicy<O>> {
    iface: TypedInterface<O, A>,
    policy: P,
    phase: CyclePhase,
    stats: LoopStats,
    outstanding: bool,
    last_round_trip: Option<Duration>,
}

impl<O, A, P> ControlLoop<O, A, P>
where
    O: Message,
    A: Message,
    P: TriggerPolicy<O>,
{
    pub fn new(iface: TypedInterface<O, A>, policy: P) -> Self {
        Self {
            iface,
            policy,
            phase: CyclePhase::Idle,
            stats: LoopStats::default(),
            outstanding: false,
            last_round_trip: None,
        }
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn interface(&self) -> &TypedInterface<O, A> {
        &self.iface
    }

    /// Timer period the owner should drive `on_timer` at, if any.
    pub fn period(&self) -> Option<Duration> {
        self.policy.period()
    }

    /// Time between publishing the last observation and receiving its action.
    pub fn last_round_trip(&self) -> Option<Duration> {
        self.last_round_trip
    }

    /// True while an observation from a failed cycle is still unanswered.
    pub fn has_outstanding(&self) -> bool {
        self.outstanding
    }

    fn enter(&mut self, phase: CyclePhase) {
        trace!(slot = self.iface.slot(), ?phase, "control phase");
        self.phase = phase;
    }

    /// Feed a measurement from the collaborator. Exchanges immediately when
    /// the policy says so.
    pub fn report_measurement<X: Actuator<A>>(
        &mut self,
        measurement: O,
        actuator: &mut X,
    ) -> Result<CycleOutcome<A>> {
        match self.policy.on_measurement(measurement) {
            Some(observation) => self.run_cycle(observation, actuator),
            None => {
                self.stats.skipped += 1;
                Ok(CycleOutcome::Skipped)
            }
        }
    }

    /// Timer tick from the owner's scheduler.
    pub fn on_timer<X: Actuator<A>>(&mut self, actuator: &mut X) -> Result<CycleOutcome<A>> {
        match self.policy.on_timer() {
            Some(observation) => self.run_cycle(observation, actuator),
            None => {
                self.stats.skipped += 1;
                Ok(CycleOutcome::Skipped)
            }
        }
    }

    /// One full cycle with `observation`, applying the action to `actuator`.
    ///
    /// Exchange failures come back as `PeerLost` / `Finished` outcomes;
    /// only protocol and I/O faults are returned as errors.
    pub fn run_cycle<X: Actuator<A>>(
        &mut self,
        observation: O,
        actuator: &mut X,
    ) -> Result<CycleOutcome<A>> {
        let action = match self.exchange(observation) {
            Ok(action) => action,
            Err(Error::Finished) => return Ok(CycleOutcome::Finished),
            Err(Error::PeerLost { .. }) => return Ok(CycleOutcome::PeerLost),
            Err(e) => return Err(e),
        };

        self.enter(CyclePhase::Apply);
        let outcome = match actuator.apply(&action) {
            Ok(()) => {
                self.stats.applied += 1;
                CycleOutcome::Applied(action)
            }
            Err(e) => {
                self.stats.rejected += 1;
                warn!(slot = self.iface.slot(), error = %e, "action rejected");
                CycleOutcome::Rejected(action)
            }
        };
        self.enter(CyclePhase::Idle);
        Ok(outcome)
    }

    /// Observe, send and await, without applying. The action is returned to
    /// the caller; `PeerLost` and `Finished` are counted before returning.
    pub fn exchange(&mut self, observation: O) -> Result<A> {
        self.stats.cycles += 1;
        let result = self.exchange_inner(observation);
        match &result {
            Err(Error::Finished) => {
                self.stats.finished += 1;
                if self.stats.finished == 1 {
                    info!(slot = self.iface.slot(), "exchange finished; cycles no longer exchange");
                }
            }
            Err(Error::PeerLost { waited, .. }) => {
                self.stats.peer_lost += 1;
                warn!(slot = self.iface.slot(), ?waited, "peer lost; skipping cycle");
            }
            _ => {}
        }
        self.enter(CyclePhase::Idle);
        result
    }

    fn exchange_inner(&mut self, observation: O) -> Result<A> {
        self.enter(CyclePhase::Observe);
        if self.outstanding {
            self.drain_stale()?;
        }

        self.enter(CyclePhase::Send);
        self.iface.send_observation(observation)?;
        let sent_at = Instant::now();
        self.outstanding = true;

        self.enter(CyclePhase::AwaitAction);
        let action = self.iface.recv_action()?;
        self.outstanding = false;

        let round_trip = sent_at.elapsed();
        self.last_round_trip = Some(round_trip);
        debug!(slot = self.iface.slot(), ?round_trip, "round trip");
        Ok(action)
    }

    /// Collect the action owed for an observation a previous cycle gave up on.
    fn drain_stale(&mut self) -> Result<()> {
        let state = self.iface.interface().slot_state(self.iface.slot())?;
        if state == SlotState::AwaitingObservation {
            self.outstanding = false;
            return Ok(());
        }

        self.iface.recv_action()?;
        self.outstanding = false;
        self.stats.stale_discarded += 1;
        debug!(slot = self.iface.slot(), ?state, "discarded stale action");
        Ok(())
    }
}
