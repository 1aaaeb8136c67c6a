use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::chip::DEFAULT_CHIP_LABEL;
use crate::error::AppError;
use crate::line::Bias;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HttpConfig {
    pub unix_socket: Option<String>,
    pub host: Option<String>,
    pub path: String,
    pub timeout: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum PullMode {
    #[default]
    #[serde(rename = "UP", alias = "up")]
    Up,
    #[serde(rename = "DOWN", alias = "down")]
    Down,
}

impl PullMode {
    pub fn bias(&self) -> Bias {
        match self {
            PullMode::Up => Bias::PullUp,
            PullMode::Down => Bias::PullDown,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BinarySensorConfig {
    pub name: String,
    pub port: u32,
    #[serde(default)]
    pub pull_mode: PullMode,
    #[serde(default = "default_bouncetime")]
    pub bouncetime: u64,
    #[serde(default)]
    pub invert_logic: bool,
    #[serde(default)]
    pub unique_id: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SwitchConfig {
    pub name: String,
    pub port: u32,
    #[serde(default)]
    pub invert_logic: bool,
    #[serde(default)]
    pub unique_id: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub http: HttpConfig,
    #[serde(default)]
    pub chip: Option<String>,
    #[serde(default = "default_chip_label")]
    pub chip_label: String,
    #[serde(default = "default_consumer")]
    pub consumer: String,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
    #[serde(default)]
    pub binary_sensors: Vec<BinarySensorConfig>,
    #[serde(default)]
    pub switches: Vec<SwitchConfig>,
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| AppError::Config(format!("Invalid config json: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.poll_timeout_ms == 0 {
            return Err(AppError::Config("poll_timeout_ms must be positive".into()));
        }
        if self.broadcast_capacity == 0 {
            return Err(AppError::Config("broadcast_capacity must be positive".into()));
        }
        Ok(())
    }
}

fn default_bouncetime() -> u64 {
    50
}

fn default_chip_label() -> String {
    DEFAULT_CHIP_LABEL.to_string()
}

fn default_consumer() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

fn default_poll_timeout_ms() -> u64 {
    500
}

fn default_broadcast_capacity() -> usize {
    64
}
