use std::time::Duration;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Hash, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    Input,
    Output,
}

#[derive(Debug, Hash, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Bias {
    None,
    PullUp,
    PullDown,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeDetect {
    None,
    Rising,
    Falling,
    Both,
}

impl EdgeDetect {
    pub fn matches(&self, kind: EdgeKind) -> bool {
        match self {
            EdgeDetect::None => false,
            EdgeDetect::Rising => kind == EdgeKind::Rising,
            EdgeDetect::Falling => kind == EdgeKind::Falling,
            EdgeDetect::Both => true,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum EventClock {
    Monotonic,
    Realtime,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum OutputValue {
    Inactive,
    Active,
}

impl OutputValue {
    pub fn is_active(&self) -> bool {
        matches!(self, OutputValue::Active)
    }
}

impl From<bool> for OutputValue {
    fn from(active: bool) -> Self {
        if active {
            OutputValue::Active
        } else {
            OutputValue::Inactive
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeKind {
    Rising,
    Falling,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct EdgeEvent {
    pub offset: u32,
    pub kind: EdgeKind,
    pub timestamp_ns: u64,
}

// Immutable once built. Output lines carry no edge fields, input lines no output default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineConfig {
    direction: Direction,
    bias: Bias,
    edge: EdgeDetect,
    debounce: Duration,
    event_clock: Option<EventClock>,
    output_default: Option<OutputValue>,
}

impl LineConfig {
    pub fn new(
        direction: Direction,
        bias: Bias,
        edge: EdgeDetect,
        debounce: Duration,
        event_clock: Option<EventClock>,
        output_default: Option<OutputValue>,
    ) -> Result<Self, AppError> {
        match direction {
            Direction::Output => {
                if edge != EdgeDetect::None {
                    return Err(AppError::InvalidLineConfig(
                        "output line cannot use edge detection".into(),
                    ));
                }
                if !debounce.is_zero() {
                    return Err(AppError::InvalidLineConfig(
                        "output line cannot be debounced".into(),
                    ));
                }
                if event_clock.is_some() {
                    return Err(AppError::InvalidLineConfig(
                        "output line cannot select an event clock".into(),
                    ));
                }
            }
            Direction::Input => {
                if output_default.is_some() {
                    return Err(AppError::InvalidLineConfig(
                        "input line cannot carry an output default".into(),
                    ));
                }
                if edge == EdgeDetect::None && !debounce.is_zero() {
                    return Err(AppError::InvalidLineConfig(
                        "debouncing requires edge detection to be enabled".into(),
                    ));
                }
                if edge == EdgeDetect::None && event_clock.is_some() {
                    return Err(AppError::InvalidLineConfig(
                        "event clock requires edge detection to be enabled".into(),
                    ));
                }
            }
        }

        Ok(Self {
            direction,
            bias,
            edge,
            debounce,
            event_clock,
            output_default,
        })
    }

    pub fn input(
        bias: Bias,
        edge: EdgeDetect,
        debounce: Duration,
        event_clock: EventClock,
    ) -> Result<Self, AppError> {
        let clock = (edge != EdgeDetect::None).then_some(event_clock);
        Self::new(Direction::Input, bias, edge, debounce, clock, None)
    }

    pub fn output(default: OutputValue) -> Self {
        Self {
            direction: Direction::Output,
            bias: Bias::None,
            edge: EdgeDetect::None,
            debounce: Duration::ZERO,
            event_clock: None,
            output_default: Some(default),
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn bias(&self) -> Bias {
        self.bias
    }

    pub fn edge_detection(&self) -> EdgeDetect {
        self.edge
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    pub fn event_clock(&self) -> Option<EventClock> {
        self.event_clock
    }

    pub fn output_default(&self) -> Option<OutputValue> {
        self.output_default
    }

    pub fn is_output(&self) -> bool {
        self.direction == Direction::Output
    }

    pub fn has_edge_detection(&self) -> bool {
        self.edge != EdgeDetect::None
    }
}

/// Desired configuration of every line requested from the chip, keyed by offset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineConfigStore {
    lines: FxHashMap<u32, LineConfig>,
}

impl LineConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, offset: u32, config: LineConfig) -> Option<LineConfig> {
        self.lines.insert(offset, config)
    }

    pub fn get(&self, offset: u32) -> Option<&LineConfig> {
        self.lines.get(&offset)
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &LineConfig)> {
        self.lines.iter().map(|(offset, cfg)| (*offset, cfg))
    }

    pub fn offsets(&self) -> Vec<u32> {
        let mut offsets: Vec<u32> = self.lines.keys().copied().collect();
        offsets.sort_unstable();
        offsets
    }

    pub fn has_edge_lines(&self) -> bool {
        self.lines.values().any(LineConfig::has_edge_detection)
    }
}
