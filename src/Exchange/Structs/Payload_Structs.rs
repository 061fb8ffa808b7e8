// Observation/action pairs shipped with the bridge.
// ABI-stable across languages; all fields are native-endian and #[repr(C)].

use super::Message_Structs::Message;

/// What the ABR client reports to the decision process once per tick.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct AbrObservation {
    /// Seconds of media queued for playback.
    pub buffer_level_sec: f32,
    /// Throughput measured over the last tick, in Mbit/s.
    pub last_chunk_throughput: f32,
    /// Mean RTT in ms (reserved, zero when not measured).
    pub rtt_mean_ms: f32,
    /// RTT variance (reserved).
    pub rtt_var_ms: f32,
    /// Probe loss rate (reserved).
    pub probe_loss_rate: f32,
    /// Number of intervals observed so far; increases by one every tick.
    pub chunk_index: u32,
}

/// Bitrate tier chosen for the next interval.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct AbrAction {
    pub bitrate_index: u8,
}

/// Per-terminal signal quality report.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct UeObservation {
    pub rnti: u16,
    pub sinr: f64,
}

/// Transmit power to apply to the terminal, in dBm.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct UeAction {
    pub tx_power: f64,
}

unsafe impl Message for AbrObservation {
    const SCHEMA: &'static str = "abr.observation.v1";
}

unsafe impl Message for AbrAction {
    const SCHEMA: &'static str = "abr.action.v1";
}

unsafe impl Message for UeObservation {
    const SCHEMA: &'static str = "ue.observation.v1";
}

unsafe impl Message for UeAction {
    const SCHEMA: &'static str = "ue.action.v1";
}
