// Where the per-tick tier choice comes from.

use crate::error::{Error, Result};
use crate::Control::{ControlLoop, CycleOutcome, TriggerPolicy};
use crate::Exchange::Structs::{AbrAction, AbrObservation};

/// Chooses the tier for the next interval.
///
/// The returned index is unchecked; the client validates it against the
/// ladder and holds the current tier when it is out of range. An
/// `Err(PeerLost | Finished)` also holds the tier for this tick.
pub trait TierDecider {
    fn decide(&mut self, observation: &AbrObservation, current_tier: usize) -> Result<usize>;
}

/// No decision source: the tier never changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct HoldTier;

impl TierDecider for HoldTier {
    fn decide(&mut self, _observation: &AbrObservation, current_tier: usize) -> Result<usize> {
        Ok(current_tier)
    }
}

/// Highest tier whose bitrate fits in the measured throughput.
#[derive(Debug, Clone)]
pub struct ThroughputRule {
    tiers_bps: Vec<u32>,
    /// Fraction of measured throughput considered usable.
    safety: f64,
}

impl ThroughputRule {
    pub fn new(tiers_bps: impl Into<Vec<u32>>) -> Self {
        Self {
            tiers_bps: tiers_bps.into(),
            safety: 1.0,
        }
    }

    pub fn with_safety(mut self, safety: f64) -> Self {
        self.safety = safety;
        self
    }

    /// Tier for a throughput in Mbit/s. Falls back to the lowest tier.
    pub fn pick(&self, throughput_mbps: f64) -> usize {
        let usable_bps = throughput_mbps * 1e6 * self.safety;
        self.tiers_bps
            .iter()
            .rposition(|&bps| f64::from(bps) <= usable_bps)
            .unwrap_or(0)
    }

    pub fn decide_action(&self, observation: &AbrObservation) -> AbrAction {
        let tier = self.pick(f64::from(observation.last_chunk_throughput));
        AbrAction {
            bitrate_index: u8::try_from(tier).unwrap_or(u8::MAX),
        }
    }
}

impl TierDecider for ThroughputRule {
    fn decide(&mut self, observation: &AbrObservation, _current_tier: usize) -> Result<usize> {
        Ok(self.pick(f64::from(observation.last_chunk_throughput)))
    }
}

/// Asks the external decision process through a control loop.
///
/// Each tick's observation goes through the loop's trigger policy: an
/// `OnMeasurement` loop exchanges it directly, a timed loop caches it and is
/// then fired once for the tick. The returned action is applied through an
/// actuator that checks the index against the ladder when one is set.
pub struct ExchangeDecider<P: TriggerPolicy<AbrObservation>> {
    control: ControlLoop<AbrObservation, AbrAction, P>,
    tier_count: Option<usize>,
}

impl<P: TriggerPolicy<AbrObservation>> ExchangeDecider<P> {
    pub fn new(control: ControlLoop<AbrObservation, AbrAction, P>) -> Self {
        Self {
            control,
            tier_count: None,
        }
    }

    /// Reject indices at or above `tiers` in the loop's APPLY step.
    pub fn with_tier_count(mut self, tiers: usize) -> Self {
        self.tier_count = Some(tiers);
        self
    }

    pub fn control(&self) -> &ControlLoop<AbrObservation, AbrAction, P> {
        &self.control
    }

    pub fn into_inner(self) -> ControlLoop<AbrObservation, AbrAction, P> {
        self.control
    }
}

impl<P: TriggerPolicy<AbrObservation>> TierDecider for ExchangeDecider<P> {
    fn decide(&mut self, observation: &AbrObservation, current_tier: usize) -> Result<usize> {
        let tier_count = self.tier_count;
        let mut select = |action: &AbrAction| -> Result<()> {
            let index = usize::from(action.bitrate_index);
            match tier_count {
                Some(tiers) if index >= tiers => Err(Error::InvalidAction {
                    index: index as u64,
                    tiers,
                }),
                _ => Ok(()),
            }
        };

        let mut outcome = self.control.report_measurement(*observation, &mut select)?;
        if matches!(outcome, CycleOutcome::Skipped) {
            outcome = self.control.on_timer(&mut select)?;
        }

        match outcome {
            // A rejected index is still handed back so the client records it.
            CycleOutcome::Applied(action) | CycleOutcome::Rejected(action) => {
                Ok(usize::from(action.bitrate_index))
            }
            CycleOutcome::Skipped => Ok(current_tier),
            CycleOutcome::PeerLost => Err(Error::PeerLost {
                slot: self.control.interface().slot(),
                waited: self.control.interface().timeout().unwrap_or_default(),
            }),
            CycleOutcome::Finished => Err(Error::Finished),
        }
    }
}
