pub mod backend;
pub mod chip;
pub mod config;
pub mod consumer;
pub mod entity;
pub mod error;
pub mod gpio;
pub mod line;
pub mod listener;
pub mod request;
pub mod routes;

pub use chip::{ChipResolver, ResolvedChip};
pub use config::{AppConfig, BinarySensorConfig, HttpConfig, PullMode, SwitchConfig};
pub use consumer::{Consumer, ConsumerId, ConsumerRegistry};
pub use entity::{BinarySensor, EntityKind, EntitySet, EntitySnapshot, StateChange, Switch};
pub use error::AppError;
pub use gpio::GpioComponent;
pub use line::{
    Bias, Direction, EdgeDetect, EdgeEvent, EdgeKind, EventClock, LineConfig, LineConfigStore,
    OutputValue,
};
pub use listener::EdgeEventListener;
pub use request::LineRequestManager;
pub use routes::AppState;

#[cfg(feature = "hardware-gpio")]
pub use backend::LibgpiodBackend;
pub use backend::{ChipInfo, GpioBackend, LineRequest, MockGpioBackend};
