use dmxp_simbridge::{
    AbrAction, AbrObservation, Error, InterfaceConfig, InterfaceRegistry, Role, Side, SlotLayout,
    UeAction, UeObservation,
};
use dmxp_simbridge::Core::SharedMemory::unlink_shared_memory;
use serial_test::serial;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

fn name(tag: &str) -> String {
    format!("simbridge_registry_{}_{}", tag, std::process::id())
}

fn mixed_slots(name: &str, role: Role, side: Side) -> InterfaceConfig {
    InterfaceConfig::builder()
        .shared_name(name)
        .role(role)
        .side(side)
        .slots(vec![
            SlotLayout::of::<AbrObservation, AbrAction>(),
            SlotLayout::of::<UeObservation, UeAction>(),
        ])
        .exchange_timeout(Some(Duration::from_secs(5)))
        .attach_timeout(Some(Duration::from_secs(5)))
        .build()
        .unwrap()
}

#[test]
#[serial]
fn test_lazy_creation() {
    let name = name("lazy");
    let registry = InterfaceRegistry::with_config(mixed_slots(&name, Role::Creator, Side::Simulation));
    assert!(!registry.is_initialized());

    let iface = registry.interface().unwrap();
    assert!(registry.is_initialized());
    assert_eq!(iface.slot_count(), 2);

    // The same interface on every access.
    let again = registry.interface().unwrap();
    assert!(std::sync::Arc::ptr_eq(&iface, &again));
}

#[test]
#[serial]
fn test_use_before_configure() {
    let registry = InterfaceRegistry::new();
    assert!(matches!(registry.interface(), Err(Error::Configuration(_))));
    assert!(matches!(
        registry.bind::<UeObservation, UeAction>(0),
        Err(Error::Configuration(_))
    ));
}

#[test]
#[serial]
fn test_configure_frozen_after_first_use() {
    let name = name("frozen");
    let registry = InterfaceRegistry::new();
    // Reconfiguring before first use is fine.
    registry.configure(mixed_slots("placeholder", Role::Creator, Side::Simulation)).unwrap();
    registry.configure(mixed_slots(&name, Role::Creator, Side::Simulation)).unwrap();

    let _typed = registry.bind::<AbrObservation, AbrAction>(0).unwrap();
    let err = registry
        .configure(mixed_slots(&name, Role::Creator, Side::Simulation))
        .unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
    assert_eq!(registry.interface().unwrap().config().shared_name, name);
}

#[test]
#[serial]
fn test_bind_rules() {
    let name = name("bind");
    let registry = InterfaceRegistry::with_config(mixed_slots(&name, Role::Creator, Side::Simulation));

    // Slot 0 carries the ABR pair, slot 1 the UE pair.
    assert!(matches!(
        registry.bind::<UeObservation, UeAction>(0),
        Err(Error::Configuration(_))
    ));
    let abr = registry.bind::<AbrObservation, AbrAction>(0).unwrap();
    let ue = registry.bind::<UeObservation, UeAction>(1).unwrap();
    assert_eq!(abr.slot(), 0);
    assert_eq!(ue.slot(), 1);

    // Each slot binds once.
    assert!(matches!(
        registry.bind::<AbrObservation, AbrAction>(0),
        Err(Error::Configuration(_))
    ));
    assert!(matches!(
        registry.bind::<AbrObservation, AbrAction>(2),
        Err(Error::Configuration(_))
    ));
}

#[test]
#[serial]
fn test_two_registries_two_slots() {
    let name = name("pairs");
    let sim = InterfaceRegistry::with_config(mixed_slots(&name, Role::Creator, Side::Simulation));
    let dec = InterfaceRegistry::with_config(mixed_slots(&name, Role::Attacher, Side::Decision));

    let sim_abr = sim.bind::<AbrObservation, AbrAction>(0).unwrap();
    let sim_ue = sim.bind::<UeObservation, UeAction>(1).unwrap();
    let dec_abr = dec.bind::<AbrObservation, AbrAction>(0).unwrap();
    let dec_ue = dec.bind::<UeObservation, UeAction>(1).unwrap();

    // Slots are independent: each can be mid-exchange on its own.
    sim_ue.send_observation(UeObservation { rnti: 3, sinr: 12.5 }).unwrap();
    sim_abr
        .send_observation(AbrObservation { buffer_level_sec: 4.0, chunk_index: 1, ..Default::default() })
        .unwrap();

    let abr_obs = dec_abr.recv_observation().unwrap();
    dec_abr.send_action(AbrAction { bitrate_index: 2 }).unwrap();
    let ue_obs = dec_ue.recv_observation().unwrap();
    dec_ue.send_action(UeAction { tx_power: 23.0 }).unwrap();

    assert_eq!(abr_obs.chunk_index, 1);
    assert_eq!(ue_obs.rnti, 3);
    assert_eq!(sim_abr.recv_action().unwrap().bitrate_index, 2);
    assert_eq!(sim_ue.recv_action().unwrap().tx_power, 23.0);
}

#[test]
#[serial]
fn test_registry_answers_while_attacher_waits() {
    let name = name("waiting");
    // A leftover region from an aborted run would satisfy the attacher early.
    unlink_shared_memory(&name).unwrap();
    let config = InterfaceConfig::builder()
        .shared_name(&name)
        .role(Role::Attacher)
        .side(Side::Decision)
        .slots(vec![
            SlotLayout::of::<AbrObservation, AbrAction>(),
            SlotLayout::of::<UeObservation, UeAction>(),
        ])
        .attach_timeout(None)
        .build()
        .unwrap();
    let registry = Arc::new(InterfaceRegistry::with_config(config));

    let opener = Arc::clone(&registry);
    let attach = thread::spawn(move || opener.interface().map(|iface| iface.slot_count()));
    thread::sleep(Duration::from_millis(100));

    // The attacher is parked waiting for a creator; other threads still get answers.
    let (tx, rx) = mpsc::channel();
    let asker = Arc::clone(&registry);
    thread::spawn(move || {
        let initialized = asker.is_initialized();
        let reconfigure = asker.configure(mixed_slots("other", Role::Attacher, Side::Decision));
        let _ = tx.send((initialized, reconfigure.is_err()));
    });
    let (initialized, refused) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(!initialized);
    assert!(refused, "configuration must be frozen while first use is in progress");

    let creator = InterfaceRegistry::with_config(mixed_slots(&name, Role::Creator, Side::Simulation));
    let _sim = creator.interface().unwrap();

    assert_eq!(attach.join().unwrap().unwrap(), 2);
    assert!(registry.is_initialized());
    assert!(matches!(
        registry.configure(mixed_slots(&name, Role::Attacher, Side::Decision)),
        Err(Error::Configuration(_))
    ));
}
