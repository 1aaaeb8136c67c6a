use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use gpiod_hub::{
    AppConfig, AppError, Bias, BinarySensorConfig, ChipResolver, EdgeDetect, EdgeKind,
    EntityKind, EntitySet, EventClock, GpioComponent, LineConfig, MockGpioBackend, PullMode,
    SwitchConfig,
};

const CHIP: &str = "/dev/gpiochip0";

fn component(backend: &Arc<MockGpioBackend>) -> Arc<GpioComponent<MockGpioBackend>> {
    let chip = ChipResolver::new(backend.clone(), "pinctrl")
        .resolve()
        .expect("mock chip");
    Arc::new(GpioComponent::new(
        backend.clone(),
        chip,
        "gpiod-hub-test",
        Duration::from_millis(50),
    ))
}

fn sensor(name: &str, port: u32, invert_logic: bool) -> BinarySensorConfig {
    BinarySensorConfig {
        name: name.to_string(),
        port,
        pull_mode: PullMode::Up,
        bouncetime: 50,
        invert_logic,
        unique_id: None,
    }
}

fn switch(name: &str, port: u32, invert_logic: bool) -> SwitchConfig {
    SwitchConfig {
        name: name.to_string(),
        port,
        invert_logic,
        unique_id: None,
    }
}

fn wait_for(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn sensor_follows_edges() {
    let backend = Arc::new(MockGpioBackend::default());
    let mut entities = EntitySet::new(component(&backend), 16);

    let door = entities.add_binary_sensor(sensor("door", 4, false)).unwrap();
    let window = entities.add_binary_sensor(sensor("window", 5, true)).unwrap();

    // pull-up lines idle active
    assert_eq!(door.is_on(), Some(true));
    assert_eq!(window.is_on(), Some(false));
    assert!(entities.component().is_listening());

    backend.inject_edge(CHIP, 4, EdgeKind::Falling);
    backend.inject_edge(CHIP, 5, EdgeKind::Falling);

    assert!(wait_for(|| door.is_on() == Some(false)));
    assert!(wait_for(|| window.is_on() == Some(true)));
}

#[test]
fn pull_down_sensor_idles_inactive() {
    let backend = Arc::new(MockGpioBackend::default());
    let mut entities = EntitySet::new(component(&backend), 16);
    let mut cfg = sensor("button", 22, false);
    cfg.pull_mode = PullMode::Down;

    let button = entities.add_binary_sensor(cfg).unwrap();

    assert_eq!(button.is_on(), Some(false));
    let line = entities.component().manager().get(22).unwrap();
    assert_eq!(line.bias(), Bias::PullDown);
    assert_eq!(line.edge_detection(), EdgeDetect::Both);
    assert_eq!(line.debounce(), Duration::from_millis(50));
    assert_eq!(line.event_clock(), Some(EventClock::Realtime));
}

#[test]
fn switch_writes_physical_levels() {
    let backend = Arc::new(MockGpioBackend::default());
    let mut entities = EntitySet::new(component(&backend), 16);

    let relay = entities.add_switch(switch("relay", 17, false)).unwrap();
    let inverted = entities.add_switch(switch("inverted", 18, true)).unwrap();

    assert!(!relay.is_on());
    assert!(!inverted.is_on());
    assert_eq!(backend.line_value(CHIP, 17), Some(false));
    assert_eq!(backend.line_value(CHIP, 18), Some(true));

    relay.turn_on().unwrap();
    inverted.turn_on().unwrap();
    assert!(relay.is_on());
    assert!(inverted.is_on());
    assert_eq!(backend.line_value(CHIP, 17), Some(true));
    assert_eq!(backend.line_value(CHIP, 18), Some(false));

    relay.turn_off().unwrap();
    assert!(!relay.is_on());
    assert_eq!(backend.line_value(CHIP, 17), Some(false));
}

#[test]
fn attaching_consumer_keeps_switch_level() {
    let backend = Arc::new(MockGpioBackend::default());
    let mut entities = EntitySet::new(component(&backend), 16);

    let relay = entities.add_switch(switch("relay", 17, false)).unwrap();
    relay.turn_on().unwrap();
    assert!(!entities.component().is_listening());

    entities.add_binary_sensor(sensor("door", 4, false)).unwrap();

    assert!(entities.component().is_listening());
    assert_eq!(backend.line_value(CHIP, 17), Some(true));
    relay.turn_off().unwrap();
}

#[test]
fn output_lines_are_not_shared() {
    let backend = Arc::new(MockGpioBackend::default());
    let component = component(&backend);
    let mut entities = EntitySet::new(component.clone(), 16);

    let relay = entities.add_switch(switch("relay", 17, false)).unwrap();
    assert_eq!(component.registry().output_owner(17), Some(relay.consumer_id()));

    assert!(matches!(
        entities.add_binary_sensor(sensor("door", 17, false)),
        Err(AppError::LineInUse(17))
    ));
    assert!(matches!(
        entities.add_switch(switch("relay again", 17, false)),
        Err(AppError::LineInUse(17))
    ));

    let line = LineConfig::input(
        Bias::PullUp,
        EdgeDetect::Both,
        Duration::ZERO,
        EventClock::Monotonic,
    )
    .unwrap();
    assert!(matches!(
        component.setup_input(17, line, Arc::new(|| {})),
        Err(AppError::LineInUse(17))
    ));
}

#[test]
fn failed_attach_is_surfaced_and_recoverable() {
    let backend = Arc::new(MockGpioBackend::default());
    let mut entities = EntitySet::new(component(&backend), 16);

    let door = entities.add_binary_sensor(sensor("door", 4, false)).unwrap();
    backend.mark_busy(CHIP, 6);

    assert!(matches!(
        entities.add_switch(switch("relay", 6, false)),
        Err(AppError::AcquireFailed { .. })
    ));
    assert!(entities.switch(6).is_err());
    assert!(!entities.component().is_listening());
    assert_eq!(door.is_on(), Some(true));
    assert!(matches!(
        entities.component().read(4),
        Err(AppError::NotBound)
    ));

    backend.clear_busy(CHIP, 6);
    entities.component().configure_lines(Vec::new()).unwrap();

    assert!(entities.component().is_listening());
    assert!(entities.component().read(4).unwrap());
}

#[test]
fn shutdown_is_idempotent() {
    let backend = Arc::new(MockGpioBackend::default());
    let mut entities = EntitySet::new(component(&backend), 16);
    entities.add_binary_sensor(sensor("door", 4, false)).unwrap();
    entities.add_switch(switch("relay", 17, false)).unwrap();

    entities.shutdown();
    entities.shutdown();

    let component = entities.component();
    assert!(!component.is_listening());
    assert!(!component.manager().is_bound());
    assert!(component.manager().snapshot().is_empty());
    assert_eq!(component.registry().subscribers(4), 0);
    assert!(!backend.is_claimed(CHIP, 4));
    assert!(!backend.is_claimed(CHIP, 17));
    assert!(component.configure_lines(Vec::new()).is_err());
}

#[test]
fn state_changes_are_broadcast() {
    let backend = Arc::new(MockGpioBackend::default());
    let mut entities = EntitySet::new(component(&backend), 16);
    let relay = entities.add_switch(switch("relay", 17, false)).unwrap();
    let mut rx = entities.subscribe_events();

    relay.turn_on().unwrap();

    let change = rx.try_recv().unwrap();
    assert_eq!(change.kind, EntityKind::Switch);
    assert_eq!(change.port, 17);
    assert!(change.is_on);
}

#[test]
fn component_starts_from_config() {
    let config: AppConfig = serde_json::from_str(
        r#"
        {
            "http": { "host": "localhost:8080", "path": "/api/v1", "timeout": 30 },
            "binary_sensors": [ { "name": "door", "port": 4 } ],
            "switches": [ { "name": "relay", "port": 17, "invert_logic": true } ]
        }
        "#,
    )
    .expect("valid config");
    assert_eq!(config.poll_timeout_ms, 500);
    assert_eq!(config.binary_sensors[0].bouncetime, 50);
    assert_eq!(config.binary_sensors[0].pull_mode, PullMode::Up);

    let backend = Arc::new(MockGpioBackend::default());
    let component = Arc::new(GpioComponent::start(backend.clone(), &config).unwrap());
    assert_eq!(component.chip().path.to_str(), Some(CHIP));

    let entities = EntitySet::from_config(component, &config).unwrap();
    let list = entities.list();
    assert_eq!(list.binary_sensors.len(), 1);
    assert_eq!(list.switches.len(), 1);
    assert_eq!(backend.line_value(CHIP, 17), Some(true));
}

#[test]
fn configured_missing_chip_fails_startup() {
    let config: AppConfig = serde_json::from_str(
        r#"
        {
            "http": { "host": "localhost:8080", "path": "/api/v1", "timeout": 30 },
            "chip": "/dev/gpiochip3"
        }
        "#,
    )
    .expect("valid config");

    let backend = Arc::new(MockGpioBackend::default());

    assert!(matches!(
        GpioComponent::start(backend, &config),
        Err(AppError::NoChipFound(_))
    ));
}

#[test]
fn detached_consumer_no_longer_hears_edges() {
    let backend = Arc::new(MockGpioBackend::default());
    let component = component(&backend);
    let line = LineConfig::input(
        Bias::PullUp,
        EdgeDetect::Both,
        Duration::ZERO,
        EventClock::Realtime,
    )
    .unwrap();

    let count = Arc::new(AtomicUsize::new(0));
    let seen = count.clone();
    let id = component
        .setup_input(
            4,
            line,
            Arc::new(move || {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
    assert!(component.is_listening());

    assert!(backend.inject_edge(CHIP, 4, EdgeKind::Falling));
    assert!(wait_for(|| count.load(Ordering::SeqCst) == 1));

    component.detach(id);
    assert_eq!(component.registry().subscribers(4), 0);
    assert!(backend.is_claimed(CHIP, 4));

    assert!(backend.inject_edge(CHIP, 4, EdgeKind::Rising));
    thread::sleep(Duration::from_millis(200));
    assert_eq!(count.load(Ordering::SeqCst), 1);
}
