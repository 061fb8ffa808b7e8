// Slot handoff tests. Both sides run in this process against the same named
// region, the decision side on a helper thread where it has to block.
use dmxp_simbridge::Core::SharedMemory::{
    attach_shared_memory, create_shared_memory, shm_path, unlink_shared_memory,
    SharedMemoryBackend,
};
use dmxp_simbridge::Exchange::Slot::layout::RegionHeader;
use dmxp_simbridge::Exchange::Slot::SlotState;
use dmxp_simbridge::{
    AbrAction, AbrObservation, Error, InterfaceConfig, MessageInterface, Role, Side,
    TypedInterface, UeAction, UeObservation,
};
use serial_test::serial;
use std::io;
use std::mem::size_of;
use std::process::{Child, Command};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn name(tag: &str) -> String {
    format!("simbridge_exchange_{}_{}", tag, std::process::id())
}

fn simulation(name: &str, timeout: Option<Duration>) -> Arc<MessageInterface> {
    let config = InterfaceConfig::builder()
        .shared_name(name)
        .role(Role::Creator)
        .side(Side::Simulation)
        .scalar::<UeObservation, UeAction>()
        .exchange_timeout(timeout)
        .build()
        .unwrap();
    Arc::new(MessageInterface::create_or_attach(config).unwrap())
}

fn creator_config(name: &str) -> InterfaceConfig {
    InterfaceConfig::builder()
        .shared_name(name)
        .role(Role::Creator)
        .side(Side::Simulation)
        .scalar::<UeObservation, UeAction>()
        .build()
        .unwrap()
}

fn decision_config(name: &str) -> InterfaceConfig {
    InterfaceConfig::builder()
        .shared_name(name)
        .role(Role::Attacher)
        .side(Side::Decision)
        .scalar::<UeObservation, UeAction>()
        .attach_timeout(Some(Duration::from_secs(5)))
        .build()
        .unwrap()
}

fn decision(name: &str) -> Arc<MessageInterface> {
    Arc::new(MessageInterface::create_or_attach(decision_config(name)).unwrap())
}

fn typed(iface: &Arc<MessageInterface>) -> TypedInterface<UeObservation, UeAction> {
    TypedInterface::bind(Arc::clone(iface), 0).unwrap()
}

#[test]
#[serial]
fn test_ping_pong_across_threads() {
    let name = name("ping_pong");
    let sim = simulation(&name, Some(Duration::from_secs(5)));

    let agent_name = name.clone();
    let agent = thread::spawn(move || {
        let dec = decision(&agent_name);
        typed(&dec).serve(|obs| UeAction { tx_power: obs.sinr * 2.0 + f64::from(obs.rnti) })
    });

    let sim_typed = typed(&sim);
    for i in 0..100u16 {
        let action = sim_typed
            .exchange(UeObservation { rnti: i, sinr: f64::from(i) / 4.0 })
            .unwrap();
        // Each action answers exactly the observation that preceded it.
        assert_eq!(action.tx_power, f64::from(i) / 2.0 + f64::from(i));
    }

    assert_eq!(sim.published(0).unwrap(), (100, 100));
    assert_eq!(sim.slot_state(0).unwrap(), SlotState::AwaitingObservation);

    sim.signal_finished();
    let served = agent.join().unwrap().unwrap();
    assert_eq!(served, 100);
}

#[test]
#[serial]
fn test_finished_wakes_blocked_recv() {
    let name = name("finished");
    let sim = simulation(&name, None);
    let dec = decision(&name);

    let sim_typed = typed(&sim);
    sim_typed.send_observation(UeObservation { rnti: 1, sinr: 3.0 }).unwrap();

    let finisher = Arc::clone(&sim);
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        finisher.signal_finished();
    });

    // The decision side never answers; only the finished flag ends the wait.
    let start = Instant::now();
    let err = sim_typed.recv_action().unwrap_err();
    assert!(matches!(err, Error::Finished), "got {:?}", err);
    assert!(start.elapsed() < Duration::from_secs(5));
    handle.join().unwrap();

    // Once set, every blocking call on either side returns finished.
    assert!(dec.is_finished());
    assert!(matches!(typed(&dec).recv_observation(), Err(Error::Finished)));
    assert!(matches!(
        sim_typed.send_observation(UeObservation::default()),
        Err(Error::Finished)
    ));
}

#[test]
#[serial]
fn test_timeout_returns_peer_lost() {
    let name = name("timeout");
    let sim = simulation(&name, Some(Duration::from_millis(100)));
    let _dec = decision(&name);

    let start = Instant::now();
    let err = typed(&sim)
        .exchange(UeObservation { rnti: 7, sinr: 1.0 })
        .unwrap_err();
    assert!(err.is_exchange_failure());
    match err {
        Error::PeerLost { slot, waited } => {
            assert_eq!(slot, 0);
            assert!(waited >= Duration::from_millis(100));
        }
        other => panic!("expected PeerLost, got {:?}", other),
    }
    assert!(start.elapsed() >= Duration::from_millis(100));
    // The observation is still published and waiting for its answer.
    assert_eq!(sim.slot_state(0).unwrap(), SlotState::ObservationReady);
}

#[test]
#[serial]
fn test_second_creator_rejected() {
    let name = name("double_creator");
    let _sim = simulation(&name, None);

    let config = InterfaceConfig::builder()
        .shared_name(&name)
        .role(Role::Creator)
        .side(Side::Simulation)
        .scalar::<UeObservation, UeAction>()
        .build()
        .unwrap();
    let err = MessageInterface::create_or_attach(config).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)), "got {:?}", err);
}

/// Pid of a process that has already exited and been reaped.
fn reaped_pid() -> u32 {
    let mut child = Command::new("true").spawn().unwrap();
    let pid = child.id();
    child.wait().unwrap();
    pid
}

fn sleeper() -> Child {
    Command::new("sleep").arg("30").spawn().unwrap()
}

fn header_of(shm: &dyn SharedMemoryBackend) -> &RegionHeader {
    unsafe { &*(shm.as_ptr() as *const RegionHeader) }
}

/// A zeroed region file as another process would leave it mid-setup.
fn foreign_region(name: &str) -> Box<dyn SharedMemoryBackend> {
    unlink_shared_memory(name).unwrap();
    create_shared_memory(size_of::<RegionHeader>(), name).unwrap()
}

#[test]
#[serial]
fn test_live_creator_owns_uninitialized_region() {
    let name = name("live_owner");
    let mut owner = sleeper();
    let owner_pid = owner.id();
    let foreign = foreign_region(&name);
    // Only the pid is set: no magic, not ready.
    header_of(&*foreign).creator_pid.store(owner_pid, Ordering::SeqCst);

    let result = MessageInterface::create_or_attach(creator_config(&name));

    let current = attach_shared_memory(&name, size_of::<RegionHeader>()).unwrap();
    let still_owned = header_of(&*current).creator_pid.load(Ordering::SeqCst);
    owner.kill().unwrap();
    owner.wait().unwrap();
    unlink_shared_memory(&name).unwrap();

    let err = result.unwrap_err();
    assert!(matches!(err, Error::Configuration(_)), "got {:?}", err);
    assert_eq!(still_owned, owner_pid, "the live creator's region was replaced");
}

#[test]
#[serial]
fn test_region_still_being_sized_is_not_replaced() {
    let name = name("sizing");
    unlink_shared_memory(&name).unwrap();
    // What a creator has right after O_EXCL and before set_len.
    let file = std::fs::File::create(shm_path(&name)).unwrap();
    let mut owner = sleeper();
    let owner_pid = owner.id();

    let setup_name = name.clone();
    let setup = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        file.set_len(size_of::<RegionHeader>() as u64).unwrap();
        let shm = attach_shared_memory(&setup_name, size_of::<RegionHeader>()).unwrap();
        header_of(&*shm).creator_pid.store(owner_pid, Ordering::SeqCst);
    });

    let result = MessageInterface::create_or_attach(creator_config(&name));
    setup.join().unwrap();
    owner.kill().unwrap();
    owner.wait().unwrap();
    unlink_shared_memory(&name).unwrap();

    let err = result.unwrap_err();
    assert!(matches!(err, Error::Configuration(_)), "got {:?}", err);
}

#[test]
#[serial]
fn test_stale_region_of_dead_creator_replaced() {
    let name = name("stale");
    let foreign = foreign_region(&name);
    header_of(&*foreign).creator_pid.store(reaped_pid(), Ordering::SeqCst);

    let sim = MessageInterface::create_or_attach(creator_config(&name)).unwrap();
    let header = sim.region().header();
    assert_eq!(header.creator_pid.load(Ordering::SeqCst), std::process::id());
    assert!(sim.region().is_initialized());
    assert!(!sim.is_finished());
    // The old mapping still points at the unlinked file.
    assert_eq!(header_of(&*foreign).magic, 0);
}

#[test]
#[serial]
fn test_ownerless_file_replaced_after_grace() {
    let name = name("ownerless");
    unlink_shared_memory(&name).unwrap();
    std::fs::File::create(shm_path(&name)).unwrap();

    let sim = MessageInterface::create_or_attach(creator_config(&name)).unwrap();
    assert!(sim.region().is_initialized());
}

#[test]
#[serial]
fn test_dead_decision_process_ends_wait() {
    let name = name("dead_peer");
    let sim = simulation(&name, None);
    let _dec = decision(&name);
    sim.region()
        .header()
        .decision_pid
        .store(reaped_pid(), Ordering::SeqCst);

    let sim_typed = typed(&sim);
    sim_typed.send_observation(UeObservation { rnti: 3, sinr: 0.5 }).unwrap();

    // No timeout is configured; only the liveness check ends this wait.
    let start = Instant::now();
    let err = sim_typed.recv_action().unwrap_err();
    assert!(matches!(err, Error::PeerLost { slot: 0, .. }), "got {:?}", err);
    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(!sim.is_finished());
}

#[test]
#[serial]
fn test_reattached_decision_clears_stale_view() {
    let name = name("reattach");
    let sim = simulation(&name, Some(Duration::from_millis(50)));
    let sim_typed = typed(&sim);

    {
        let first = decision(&name);
        let first_typed = typed(&first);
        sim_typed.send_observation(UeObservation { rnti: 1, sinr: 1.0 }).unwrap();
        let view = first_typed.begin_recv_observation().unwrap();
        first_typed.send_action(UeAction { tx_power: 4.0 }).unwrap();
        // The process goes away without releasing its read view.
        std::mem::forget(view);
    }
    assert_eq!(sim_typed.recv_action().unwrap().tx_power, 4.0);
    assert!(matches!(
        sim_typed.send_observation(UeObservation { rnti: 2, sinr: 2.0 }),
        Err(Error::PeerLost { .. })
    ));

    let second = decision(&name);
    sim_typed.send_observation(UeObservation { rnti: 2, sinr: 2.0 }).unwrap();
    assert_eq!(typed(&second).recv_observation().unwrap().rnti, 2);
}

#[test]
#[serial]
fn test_creator_name_released_on_drop() {
    let name = name("recreate");
    drop(simulation(&name, None));
    // The first creator unlinked the region and gave up the name.
    let again = simulation(&name, None);
    assert!(!again.is_finished());
}

#[test]
#[serial]
fn test_attach_waits_for_creator() {
    let name = name("late_creator");

    let attach_name = name.clone();
    let attacher = thread::spawn(move || MessageInterface::create_or_attach(decision_config(&attach_name)));

    thread::sleep(Duration::from_millis(100));
    let sim = simulation(&name, Some(Duration::from_secs(5)));

    let dec = Arc::new(attacher.join().unwrap().unwrap());
    assert_eq!(dec.role(), Role::Attacher);
    assert_eq!(dec.region().peer_pid(Side::Decision), std::process::id());

    let agent = thread::spawn(move || typed(&dec).recv_observation());
    typed(&sim).send_observation(UeObservation { rnti: 9, sinr: 0.5 }).unwrap();
    let seen = agent.join().unwrap().unwrap();
    assert_eq!(seen.rnti, 9);
}

#[test]
#[serial]
fn test_attach_without_creator_times_out() {
    let config = InterfaceConfig::builder()
        .shared_name(name("no_creator"))
        .role(Role::Attacher)
        .side(Side::Decision)
        .scalar::<UeObservation, UeAction>()
        .attach_timeout(Some(Duration::from_millis(50)))
        .build()
        .unwrap();
    let err = MessageInterface::create_or_attach(config).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)), "got {:?}", err);
}


#[test]
#[serial]
fn test_schema_mismatch_rejected() {
    let name = name("schema");
    let _sim = simulation(&name, None);

    let config = InterfaceConfig::builder()
        .shared_name(&name)
        .role(Role::Attacher)
        .side(Side::Decision)
        .scalar::<AbrObservation, AbrAction>()
        .attach_timeout(Some(Duration::from_secs(1)))
        .build()
        .unwrap();
    let err = MessageInterface::create_or_attach(config).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)), "got {:?}", err);

    // Slot count disagreement is caught the same way.
    let config = InterfaceConfig::builder()
        .shared_name(&name)
        .role(Role::Attacher)
        .side(Side::Decision)
        .vector::<UeObservation, UeAction>(2)
        .attach_timeout(Some(Duration::from_secs(1)))
        .build()
        .unwrap();
    assert!(matches!(
        MessageInterface::create_or_attach(config),
        Err(Error::Configuration(_))
    ));
}

#[test]
#[serial]
fn test_typed_bind_checks_layout() {
    let name = name("bind_layout");
    let sim = simulation(&name, None);

    let err = TypedInterface::<AbrObservation, AbrAction>::bind(Arc::clone(&sim), 0).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
    let err = TypedInterface::<UeObservation, UeAction>::bind(Arc::clone(&sim), 1).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}

#[test]
#[serial]
fn test_protocol_misuse() {
    let name = name("misuse");
    let sim = simulation(&name, Some(Duration::from_millis(50)));
    let dec = decision(&name);

    // Operations of the other side.
    assert!(matches!(typed(&dec).send_observation(UeObservation::default()), Err(Error::Protocol(_))));
    assert!(matches!(typed(&sim).send_action(UeAction::default()), Err(Error::Protocol(_))));

    // Ends without begins.
    assert!(matches!(sim.end_produce(0, Side::Simulation), Err(Error::Protocol(_))));
    assert!(matches!(sim.end_consume(0, Side::Simulation), Err(Error::Protocol(_))));

    // A second write while one is in flight.
    sim.begin_produce(0, Side::Simulation).unwrap();
    assert!(matches!(sim.begin_produce(0, Side::Simulation), Err(Error::Protocol(_))));
    sim.end_produce(0, Side::Simulation).unwrap();

    // Slots out of range.
    assert!(matches!(sim.begin_produce(3, Side::Simulation), Err(Error::Configuration(_))));
    assert!(sim.observation_ptr(3).is_err());
}

#[test]
#[serial]
fn test_abandoned_write_is_invisible() {
    let name = name("abandon");
    let sim = simulation(&name, Some(Duration::from_millis(50)));
    let dec = decision(&name);
    let sim_typed = typed(&sim);

    {
        let mut guard = sim_typed.begin_send_observation().unwrap();
        guard.rnti = 99;
        // Dropped without publish.
    }
    assert_eq!(sim.slot_state(0).unwrap(), SlotState::AwaitingObservation);
    assert_eq!(sim.published(0).unwrap(), (0, 0));
    let dec_typed = typed(&dec).with_timeout(Some(Duration::from_millis(50)));
    assert!(matches!(dec_typed.recv_observation(), Err(Error::PeerLost { .. })));

    // The slot is still writable.
    sim_typed.send_observation(UeObservation { rnti: 5, sinr: 2.0 }).unwrap();
    assert_eq!(dec_typed.recv_observation().unwrap().rnti, 5);
}

#[test]
#[serial]
fn test_observation_not_overwritten_while_held() {
    let name = name("held");
    let sim = simulation(&name, Some(Duration::from_millis(50)));
    let dec = decision(&name);
    let (sim_typed, dec_typed) = (typed(&sim), typed(&dec));

    sim_typed.send_observation(UeObservation { rnti: 1, sinr: 1.0 }).unwrap();
    let view = dec_typed.begin_recv_observation().unwrap();
    dec_typed.send_action(UeAction { tx_power: 10.0 }).unwrap();
    assert_eq!(sim_typed.recv_action().unwrap().tx_power, 10.0);

    // The decision side still holds its view, so the next write must wait.
    assert!(matches!(
        sim_typed.send_observation(UeObservation { rnti: 2, sinr: 2.0 }),
        Err(Error::PeerLost { .. })
    ));
    assert_eq!(view.rnti, 1);
    view.end().unwrap();

    sim_typed.send_observation(UeObservation { rnti: 2, sinr: 2.0 }).unwrap();
}

#[test]
#[serial]
fn test_simulation_drop_signals_finished() {
    let name = name("drop_finish");
    let sim = simulation(&name, None);
    let dec = decision(&name);

    assert!(!dec.is_finished());
    drop(sim);
    assert!(dec.is_finished());
    assert!(matches!(typed(&dec).recv_observation(), Err(Error::Finished)));
}

#[test]
#[serial]
fn test_debug_output() {
    let name = name("debug");
    let sim = simulation(&name, None);
    let text = format!("{:?}", sim);
    println!("{}", text);
    assert!(text.contains("MessageInterface"));
    assert!(text.contains(&name));
}

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
#[serial]
fn test_failed_release_on_drop_is_logged() {
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        let name = name("drop_release");
        let sim = simulation(&name, Some(Duration::from_secs(5)));
        let dec = decision(&name);
        let (sim_typed, dec_typed) = (typed(&sim), typed(&dec));

        sim_typed.send_observation(UeObservation { rnti: 9, sinr: 1.0 }).unwrap();
        dec_typed.recv_observation().unwrap();
        dec_typed.send_action(UeAction { tx_power: 1.0 }).unwrap();

        let guard = sim_typed.begin_recv_action().unwrap();
        // Released behind the guard's back, so its own release must fail.
        sim.end_consume(0, Side::Simulation).unwrap();
        drop(guard);
    });

    let text = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
    assert!(text.contains("release on drop failed"), "logs were: {}", text);
    assert!(text.contains("end_consume without begin_consume"));
}
