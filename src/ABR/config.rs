//! ABR client configuration.

use crate::error::{Error, Result};

/// Default bitrate ladder in bit/s: 20, 40 and 80 Mbit/s.
pub const DEFAULT_TIERS_BPS: [u32; 3] = [20_000_000, 40_000_000, 80_000_000];

/// Tunables of an [`AbrClient`](crate::ABR::AbrClient).
#[derive(Debug, Clone, PartialEq)]
pub struct AbrConfig {
    /// Bitrate ladder in bit/s, lowest first. Never empty.
    pub tiers_bps: Vec<u32>,
    /// Nominal tick length in seconds. Substituted for a non-positive elapsed time.
    pub tick_period_sec: f64,
    /// Buffer level at stream start, in media seconds.
    pub initial_buffer_sec: f64,
    /// Tier selected at stream start.
    pub initial_tier: usize,
}

impl Default for AbrConfig {
    fn default() -> Self {
        Self {
            tiers_bps: DEFAULT_TIERS_BPS.to_vec(),
            tick_period_sec: 1.0,
            initial_buffer_sec: 0.0,
            initial_tier: 0,
        }
    }
}

impl AbrConfig {
    pub fn builder() -> AbrConfigBuilder {
        AbrConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn tier_count(&self) -> usize {
        self.tiers_bps.len()
    }

    /// Bitrate of `tier` in bit/s, if `tier` is on the ladder.
    pub fn bitrate(&self, tier: usize) -> Option<u32> {
        self.tiers_bps.get(tier).copied()
    }

    pub fn validate(&self) -> Result<()> {
        if self.tiers_bps.is_empty() {
            return Err(Error::config("bitrate ladder is empty"));
        }
        if self.tiers_bps.contains(&0) {
            return Err(Error::config("bitrate tiers must be non-zero"));
        }
        if !(self.tick_period_sec > 0.0 && self.tick_period_sec.is_finite()) {
            return Err(Error::config(format!(
                "tick period must be positive, got {}",
                self.tick_period_sec
            )));
        }
        if self.initial_buffer_sec.is_nan() || self.initial_buffer_sec < 0.0 {
            return Err(Error::config("initial buffer must not be negative"));
        }
        if self.initial_tier >= self.tiers_bps.len() {
            return Err(Error::config(format!(
                "initial tier {} outside a ladder of {}",
                self.initial_tier,
                self.tiers_bps.len()
            )));
        }
        Ok(())
    }
}

pub struct AbrConfigBuilder {
    config: AbrConfig,
}

impl AbrConfigBuilder {
    pub fn tiers_bps(mut self, tiers: Vec<u32>) -> Self {
        self.config.tiers_bps = tiers;
        self
    }

    pub fn tick_period_sec(mut self, period: f64) -> Self {
        self.config.tick_period_sec = period;
        self
    }

    pub fn initial_buffer_sec(mut self, seconds: f64) -> Self {
        self.config.initial_buffer_sec = seconds;
        self
    }

    pub fn initial_tier(mut self, tier: usize) -> Self {
        self.config.initial_tier = tier;
        self
    }

    pub fn build(self) -> Result<AbrConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
