use log::{debug, warn};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::backend::GpioBackend;
use crate::config::{AppConfig, BinarySensorConfig, SwitchConfig};
use crate::consumer::{Consumer, ConsumerId};
use crate::error::AppError;
use crate::gpio::GpioComponent;
use crate::line::{EdgeDetect, EventClock, LineConfig, OutputValue};
use crate::request::LineRequestManager;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    BinarySensor,
    Switch,
}

#[derive(Debug, Clone, Serialize)]
pub struct StateChange {
    pub kind: EntityKind,
    pub port: u32,
    pub name: String,
    pub is_on: bool,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntitySnapshot {
    pub kind: EntityKind,
    pub name: String,
    pub unique_id: Option<String>,
    pub port: u32,
    pub invert_logic: bool,
    pub is_on: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityList {
    pub binary_sensors: Vec<EntitySnapshot>,
    pub switches: Vec<EntitySnapshot>,
}

/// Input line observed through edge events.
pub struct BinarySensor<B: GpioBackend> {
    config: BinarySensorConfig,
    manager: Arc<LineRequestManager<B>>,
    state: RwLock<Option<bool>>,
    events: broadcast::Sender<StateChange>,
}

impl<B: GpioBackend> BinarySensor<B> {
    fn new(
        config: BinarySensorConfig,
        manager: Arc<LineRequestManager<B>>,
        events: broadcast::Sender<StateChange>,
    ) -> Self {
        Self {
            config,
            manager,
            state: RwLock::new(None),
            events,
        }
    }

    pub fn line_config(config: &BinarySensorConfig) -> Result<LineConfig, AppError> {
        LineConfig::input(
            config.pull_mode.bias(),
            EdgeDetect::Both,
            Duration::from_millis(config.bouncetime),
            EventClock::Realtime,
        )
    }

    pub fn port(&self) -> u32 {
        self.config.port
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// `None` until the line has been read once.
    pub fn is_on(&self) -> Option<bool> {
        *self.state.read()
    }

    pub fn snapshot(&self) -> EntitySnapshot {
        EntitySnapshot {
            kind: EntityKind::BinarySensor,
            name: self.config.name.clone(),
            unique_id: self.config.unique_id.clone(),
            port: self.config.port,
            invert_logic: self.config.invert_logic,
            is_on: self.is_on(),
        }
    }
}

impl<B: GpioBackend> Consumer for BinarySensor<B> {
    fn update(&self) {
        let active = match self.manager.read(self.config.port) {
            Ok(active) => active,
            Err(e) => {
                warn!("cannot update sensor {}: {e}", self.config.name);
                return;
            }
        };
        let is_on = active != self.config.invert_logic;
        *self.state.write() = Some(is_on);
        debug!(
            "sensor {} on line {} is {}",
            self.config.name,
            self.config.port,
            if is_on { "on" } else { "off" }
        );
        let _ = self.events.send(StateChange {
            kind: EntityKind::BinarySensor,
            port: self.config.port,
            name: self.config.name.clone(),
            is_on,
            timestamp_ms: epoch_millis(),
        });
    }
}

/// Output line with a single owner.
pub struct Switch<B: GpioBackend> {
    config: SwitchConfig,
    id: ConsumerId,
    manager: Arc<LineRequestManager<B>>,
    state: RwLock<bool>,
    events: broadcast::Sender<StateChange>,
}

impl<B: GpioBackend> Switch<B> {
    /// The line starts at the physical level that means "off".
    pub fn line_config(config: &SwitchConfig) -> LineConfig {
        LineConfig::output(OutputValue::from(config.invert_logic))
    }

    pub fn port(&self) -> u32 {
        self.config.port
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn consumer_id(&self) -> ConsumerId {
        self.id
    }

    pub fn is_on(&self) -> bool {
        *self.state.read()
    }

    pub fn turn_on(&self) -> Result<(), AppError> {
        self.set(true)
    }

    pub fn turn_off(&self) -> Result<(), AppError> {
        self.set(false)
    }

    pub fn set(&self, on: bool) -> Result<(), AppError> {
        let physical = on != self.config.invert_logic;
        debug!(
            "switch {} writes {} to line {}",
            self.config.name, physical, self.config.port
        );
        self.manager.write(self.config.port, physical)?;
        *self.state.write() = on;
        let _ = self.events.send(StateChange {
            kind: EntityKind::Switch,
            port: self.config.port,
            name: self.config.name.clone(),
            is_on: on,
            timestamp_ms: epoch_millis(),
        });
        Ok(())
    }

    pub fn snapshot(&self) -> EntitySnapshot {
        EntitySnapshot {
            kind: EntityKind::Switch,
            name: self.config.name.clone(),
            unique_id: self.config.unique_id.clone(),
            port: self.config.port,
            invert_logic: self.config.invert_logic,
            is_on: Some(self.is_on()),
        }
    }
}

/// The sensors and switches attached to one [`GpioComponent`], keyed by port.
pub struct EntitySet<B: GpioBackend> {
    component: Arc<GpioComponent<B>>,
    binary_sensors: FxHashMap<u32, Arc<BinarySensor<B>>>,
    switches: FxHashMap<u32, Arc<Switch<B>>>,
    events: broadcast::Sender<StateChange>,
}

impl<B: GpioBackend> EntitySet<B> {
    pub fn new(component: Arc<GpioComponent<B>>, broadcast_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(broadcast_capacity.max(1));
        Self {
            component,
            binary_sensors: FxHashMap::default(),
            switches: FxHashMap::default(),
            events,
        }
    }

    /// Attaches every configured entity; the first failure aborts setup.
    pub fn from_config(
        component: Arc<GpioComponent<B>>,
        config: &AppConfig,
    ) -> Result<Self, AppError> {
        let mut set = Self::new(component, config.broadcast_capacity);
        for sensor in &config.binary_sensors {
            set.add_binary_sensor(sensor.clone())?;
        }
        for switch in &config.switches {
            set.add_switch(switch.clone())?;
        }
        Ok(set)
    }

    fn ensure_port_free(&self, port: u32) -> Result<(), AppError> {
        if self.binary_sensors.contains_key(&port) || self.switches.contains_key(&port) {
            return Err(AppError::LineInUse(port));
        }
        Ok(())
    }

    pub fn add_binary_sensor(
        &mut self,
        config: BinarySensorConfig,
    ) -> Result<Arc<BinarySensor<B>>, AppError> {
        self.ensure_port_free(config.port)?;
        debug!("adding binary sensor {} on line {}", config.name, config.port);

        let line = BinarySensor::<B>::line_config(&config)?;
        let port = config.port;
        let sensor = Arc::new(BinarySensor::new(
            config,
            self.component.manager().clone(),
            self.events.clone(),
        ));
        self.component.setup_input(port, line, sensor.clone())?;
        sensor.update();

        self.binary_sensors.insert(port, sensor.clone());
        Ok(sensor)
    }

    pub fn add_switch(&mut self, config: SwitchConfig) -> Result<Arc<Switch<B>>, AppError> {
        self.ensure_port_free(config.port)?;
        debug!("adding switch {} on line {}", config.name, config.port);

        let line = Switch::<B>::line_config(&config);
        let port = config.port;
        let id = self.component.setup_output(port, line)?;
        let switch = Arc::new(Switch {
            config,
            id,
            manager: self.component.manager().clone(),
            state: RwLock::new(false),
            events: self.events.clone(),
        });

        self.switches.insert(port, switch.clone());
        Ok(switch)
    }

    pub fn component(&self) -> &Arc<GpioComponent<B>> {
        &self.component
    }

    pub fn binary_sensor(&self, port: u32) -> Result<&Arc<BinarySensor<B>>, AppError> {
        self.binary_sensors
            .get(&port)
            .ok_or_else(|| AppError::NotFoundEntity(format!("binary_sensor {port}")))
    }

    pub fn switch(&self, port: u32) -> Result<&Arc<Switch<B>>, AppError> {
        self.switches
            .get(&port)
            .ok_or_else(|| AppError::NotFoundEntity(format!("switch {port}")))
    }

    pub fn list(&self) -> EntityList {
        let mut binary_sensors: Vec<EntitySnapshot> =
            self.binary_sensors.values().map(|s| s.snapshot()).collect();
        binary_sensors.sort_by_key(|s| s.port);
        let mut switches: Vec<EntitySnapshot> =
            self.switches.values().map(|s| s.snapshot()).collect();
        switches.sort_by_key(|s| s.port);

        EntityList {
            binary_sensors,
            switches,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<StateChange> {
        self.events.subscribe()
    }

    pub fn shutdown(&self) {
        self.component.shutdown();
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
