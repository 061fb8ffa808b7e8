use std::fmt;

/// End-of-run summary of an ABR session.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AbrReport {
    /// Ticks observed.
    pub intervals: u64,
    /// Mean of the tier bitrate selected on each tick, in bit/s.
    pub avg_bitrate_bps: f64,
    pub quality_switches: u64,
    /// Closed episodes plus the open one up to the query time.
    pub rebuffering_sec: f64,
    pub rebuffering: bool,
    pub buffer_level_sec: f64,
    pub total_bytes: u64,
    pub rate_commands_sent: u64,

    // Recovered conditions.
    pub invalid_actions: u64,
    pub clock_anomalies: u64,
    pub exchange_failures: u64,
    pub command_failures: u64,
}

impl AbrReport {
    pub fn avg_bitrate_mbps(&self) -> f64 {
        self.avg_bitrate_bps / 1e6
    }
}

impl fmt::Display for AbrReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "intervals={} avg_bitrate={:.2}Mbps switches={} rebuffering={:.3}s bytes={} \
             invalid_actions={} clock_anomalies={} exchange_failures={}",
            self.intervals,
            self.avg_bitrate_mbps(),
            self.quality_switches,
            self.rebuffering_sec,
            self.total_bytes,
            self.invalid_actions,
            self.clock_anomalies,
            self.exchange_failures,
        )
    }
}
