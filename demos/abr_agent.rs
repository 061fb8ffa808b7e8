// Decision side of the ABR demo: attaches to the region `abr_sim` created and
// answers every observation with the highest tier the throughput allows.

use dmxp_simbridge::ABR::{ThroughputRule, DEFAULT_TIERS_BPS};
use dmxp_simbridge::{AbrAction, AbrObservation, InterfaceBuilder, InterfaceRegistry, Role, Side};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> dmxp_simbridge::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = InterfaceBuilder::from_env()
        .role(Role::Attacher)
        .side(Side::Decision)
        .scalar::<AbrObservation, AbrAction>()
        .attach_timeout(Some(Duration::from_secs(60)))
        .build()?;
    let registry = InterfaceRegistry::with_config(config);
    let typed = registry.bind::<AbrObservation, AbrAction>(0)?;

    let iface = Arc::clone(typed.interface());
    ctrlc::set_handler(move || iface.signal_finished())
        .map_err(|e| dmxp_simbridge::Error::Io(std::io::Error::other(e)))?;

    let rule = ThroughputRule::new(DEFAULT_TIERS_BPS).with_safety(0.9);
    let served = typed.serve(|obs| {
        let action = rule.decide_action(obs);
        info!(
            chunk = obs.chunk_index,
            buffer = obs.buffer_level_sec,
            throughput_mbps = obs.last_chunk_throughput,
            tier = action.bitrate_index,
            "decided"
        );
        action
    })?;

    println!("agent: answered {} observations", served);
    Ok(())
}
