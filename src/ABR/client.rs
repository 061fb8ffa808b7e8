use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::ABR::command::RateCommandSink;
use crate::ABR::config::AbrConfig;
use crate::ABR::decider::TierDecider;
use crate::ABR::report::AbrReport;
use crate::Exchange::Structs::AbrObservation;

/// What one tick computed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickSummary {
    pub elapsed_sec: f64,
    pub throughput_bps: f64,
    pub buffer_level_sec: f64,
    pub rebuffering: bool,
    pub tier: usize,
    pub switched: bool,
}

/// Client-side adaptive bitrate state machine.
///
/// Times are simulation seconds supplied by the caller. The owner calls
/// [`start`](Self::start) once, feeds received bytes through
/// [`on_bytes_received`](Self::on_bytes_received) and calls
/// [`tick`](Self::tick) once per playback interval.
pub struct AbrClient<D: TierDecider, S: RateCommandSink> {
    config: AbrConfig,
    decider: D,
    sink: S,

    current_tier: usize,
    last_applied_tier: usize,
    buffer_level: f64,
    rebuffer_start: Option<f64>,
    last_tick: Option<f64>,

    window_bytes: u64,
    total_bytes: u64,
    intervals: u64,
    bitrate_sum: f64,
    quality_switches: u64,
    rebuffering_closed: f64,
    rate_commands_sent: u64,

    invalid_actions: u64,
    clock_anomalies: u64,
    exchange_failures: u64,
    command_failures: u64,
}

impl<D: TierDecider, S: RateCommandSink> AbrClient<D, S> {
    pub fn new(config: AbrConfig, decider: D, sink: S) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            current_tier: config.initial_tier,
            last_applied_tier: config.initial_tier,
            buffer_level: config.initial_buffer_sec,
            config,
            decider,
            sink,
            rebuffer_start: None,
            last_tick: None,
            window_bytes: 0,
            total_bytes: 0,
            intervals: 0,
            bitrate_sum: 0.0,
            quality_switches: 0,
            rebuffering_closed: 0.0,
            rate_commands_sent: 0,
            invalid_actions: 0,
            clock_anomalies: 0,
            exchange_failures: 0,
            command_failures: 0,
        })
    }

    /// Begin the stream at `now` and announce the initial tier's bitrate.
    pub fn start(&mut self, now: f64) {
        self.last_tick = Some(now);
        let bitrate = self.tier_bitrate(self.current_tier);
        self.send_rate(bitrate);
        info!(now, tier = self.current_tier, bitrate, "stream started");
    }

    pub fn is_started(&self) -> bool {
        self.last_tick.is_some()
    }

    /// Byte-counting sink for the media flow.
    pub fn on_bytes_received(&mut self, bytes: u64) {
        self.window_bytes += bytes;
        self.total_bytes += bytes;
    }

    /// One playback interval ending at `now`.
    pub fn tick(&mut self, now: f64) -> Result<TickSummary> {
        let last = self
            .last_tick
            .ok_or(Error::Protocol("tick before start"))?;

        let mut elapsed = now - last;
        if !(elapsed > 0.0) {
            self.clock_anomalies += 1;
            let err = Error::ClockAnomaly { elapsed };
            warn!(now, error = %err, "substituting nominal tick period");
            elapsed = self.config.tick_period_sec;
        }
        self.last_tick = Some(now);

        let throughput = self.window_bytes as f64 * 8.0 / elapsed;
        self.window_bytes = 0;

        let gained = throughput * elapsed / self.tier_bitrate(self.current_tier) as f64;
        self.buffer_level += gained;
        self.buffer_level -= elapsed;

        if self.buffer_level < 0.0 {
            let shortfall = -self.buffer_level;
            self.buffer_level = 0.0;
            if self.rebuffer_start.is_none() {
                // The buffer ran dry `shortfall` seconds before the tick.
                let start = now - shortfall.min(elapsed);
                self.rebuffer_start = Some(start);
                info!(now, start, "rebuffering started");
            }
        } else if let Some(start) = self.rebuffer_start.take() {
            let episode = now - start;
            self.rebuffering_closed += episode;
            info!(now, episode, "rebuffering ended");
        }

        let observation = AbrObservation {
            buffer_level_sec: self.buffer_level as f32,
            last_chunk_throughput: (throughput / 1e6) as f32,
            chunk_index: self.intervals as u32,
            ..AbrObservation::default()
        };
        self.choose_tier(&observation);

        self.bitrate_sum += self.tier_bitrate(self.current_tier) as f64;
        self.intervals += 1;

        let switched = self.current_tier != self.last_applied_tier;
        if switched {
            self.quality_switches += 1;
            self.last_applied_tier = self.current_tier;
            self.send_rate(self.tier_bitrate(self.current_tier));
        }

        debug!(
            now,
            throughput_mbps = throughput / 1e6,
            buffer = self.buffer_level,
            tier = self.current_tier,
            "tick"
        );

        Ok(TickSummary {
            elapsed_sec: elapsed,
            throughput_bps: throughput,
            buffer_level_sec: self.buffer_level,
            rebuffering: self.rebuffer_start.is_some(),
            tier: self.current_tier,
            switched,
        })
    }

    fn choose_tier(&mut self, observation: &AbrObservation) {
        match self.decider.decide(observation, self.current_tier) {
            Ok(tier) if tier < self.config.tier_count() => self.current_tier = tier,
            Ok(tier) => {
                self.invalid_actions += 1;
                let err = Error::InvalidAction {
                    index: tier as u64,
                    tiers: self.config.tier_count(),
                };
                warn!(error = %err, held = self.current_tier, "holding tier");
            }
            Err(e) => {
                self.exchange_failures += 1;
                if e.is_exchange_failure() {
                    debug!(error = %e, held = self.current_tier, "no decision this tick");
                } else {
                    warn!(error = %e, held = self.current_tier, "decision failed");
                }
            }
        }
    }

    fn send_rate(&mut self, bitrate: u32) {
        match self.sink.send_rate(bitrate) {
            Ok(()) => self.rate_commands_sent += 1,
            Err(e) => {
                self.command_failures += 1;
                warn!(bitrate, error = %e, "rate update not sent");
            }
        }
    }

    fn tier_bitrate(&self, tier: usize) -> u32 {
        self.config.tiers_bps[tier]
    }

    /// Summary as of `now`. Does not change state, so repeated calls without
    /// ticks in between agree.
    pub fn report(&self, now: f64) -> AbrReport {
        let open = self
            .rebuffer_start
            .map(|start| (now - start).max(0.0))
            .unwrap_or(0.0);
        let avg_bitrate_bps = if self.intervals > 0 {
            self.bitrate_sum / self.intervals as f64
        } else {
            0.0
        };
        AbrReport {
            intervals: self.intervals,
            avg_bitrate_bps,
            quality_switches: self.quality_switches,
            rebuffering_sec: self.rebuffering_closed + open,
            rebuffering: self.rebuffer_start.is_some(),
            buffer_level_sec: self.buffer_level,
            total_bytes: self.total_bytes,
            rate_commands_sent: self.rate_commands_sent,
            invalid_actions: self.invalid_actions,
            clock_anomalies: self.clock_anomalies,
            exchange_failures: self.exchange_failures,
            command_failures: self.command_failures,
        }
    }

    pub fn current_tier(&self) -> usize {
        self.current_tier
    }

    pub fn buffer_level(&self) -> f64 {
        self.buffer_level
    }

    pub fn is_rebuffering(&self) -> bool {
        self.rebuffer_start.is_some()
    }

    pub fn config(&self) -> &AbrConfig {
        &self.config
    }

    pub fn decider(&self) -> &D {
        &self.decider
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}
