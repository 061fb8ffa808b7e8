// Simulation side of the ABR demo: creates the region, plays a synthetic
// capacity trace through the ABR client, asks `abr_agent` for tiers.
//
//   cargo run --example abr_sim -- 30      (then, elsewhere)   cargo run --example abr_agent

use dmxp_simbridge::ABR::{
    AbrClient, AbrConfig, ExchangeDecider, RateController, TrafficSource, UdpRateSender,
    DEFAULT_TIERS_BPS,
};
use dmxp_simbridge::Control::{ControlLoop, OnMeasurement};
use dmxp_simbridge::{AbrAction, AbrObservation, InterfaceBuilder, InterfaceRegistry, Role, Side};
use std::env;
use std::net::UdpSocket;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Capacity of the bottleneck link per second of simulated time, in Mbit/s.
const CAPACITY_MBPS: &[f64] = &[60.0, 90.0, 90.0, 30.0, 15.0, 15.0, 45.0, 100.0, 70.0, 25.0];

/// The video server: sends at whatever rate it was last told to.
struct PacedSource {
    rate_bps: u32,
}

impl TrafficSource for PacedSource {
    fn set_rate(&mut self, bitrate_bps: u32) {
        self.rate_bps = bitrate_bps;
    }
}

fn main() -> dmxp_simbridge::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let ticks: u32 = env::args().nth(1).and_then(|a| a.parse().ok()).unwrap_or(30);

    let config = InterfaceBuilder::from_env()
        .role(Role::Creator)
        .side(Side::Simulation)
        .scalar::<AbrObservation, AbrAction>()
        .exchange_timeout(Some(Duration::from_secs(2)))
        .build()?;
    let registry = InterfaceRegistry::with_config(config);
    let typed = registry.bind::<AbrObservation, AbrAction>(0)?;
    let decider = ExchangeDecider::new(ControlLoop::new(typed, OnMeasurement))
        .with_tier_count(DEFAULT_TIERS_BPS.len());

    // Control channel over loopback; the controller drains it every tick.
    let control_socket = UdpSocket::bind("127.0.0.1:0")?;
    control_socket.set_nonblocking(true)?;
    let sender = UdpRateSender::connect(control_socket.local_addr()?)?;
    let mut server = RateController::new(PacedSource { rate_bps: 0 });

    let abr_config = AbrConfig::default();
    let mut client = AbrClient::new(abr_config, decider, sender)?;
    client.start(0.0);

    for tick in 1..=ticks {
        server.poll_socket(&control_socket)?;

        let capacity_bps = CAPACITY_MBPS[(tick as usize - 1) % CAPACITY_MBPS.len()] * 1e6;
        let delivered_bps = capacity_bps.min(f64::from(server.source().rate_bps));
        client.on_bytes_received((delivered_bps / 8.0) as u64);

        let summary = client.tick(f64::from(tick))?;
        println!(
            "t={:>3}s capacity={:>5.1}Mbps tier={} buffer={:.2}s{}",
            tick,
            capacity_bps / 1e6,
            summary.tier,
            summary.buffer_level_sec,
            if summary.rebuffering { " REBUFFERING" } else { "" }
        );
    }

    let report = client.report(f64::from(ticks));
    println!("{}", report);
    println!("loop stats: {:?}", client.decider().control().stats());

    // Dropping the registry raises the finished flag so the agent exits.
    Ok(())
}
