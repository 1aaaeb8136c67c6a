use log::debug;
use std::path::Path;
use std::time::{Duration, Instant};

use libgpiod::{chip::Chip, line, request};
use parking_lot::FairMutex;

use crate::backend::{ChipInfo, GpioBackend, LineRequest};
use crate::error::AppError;
use crate::line::{
    Bias, Direction, EdgeDetect, EdgeEvent, EdgeKind, EventClock, LineConfig, LineConfigStore,
};

const LIBGPIOD_BACKEND_EVENT_BUFFER_CAPACITY: usize = 64;
const LIBGPIOD_BACKEND_EVENT_WAIT_SLICE: Duration = Duration::from_millis(10);

#[derive(Default)]
pub struct LibgpiodBackend;

pub struct LibgpiodLineRequest {
    handle: FairMutex<GpiodHandle>,
}

struct GpiodHandle {
    request: request::Request,
    buffer: request::Buffer,
}

impl LibgpiodBackend {
    pub fn new() -> Result<Self, AppError> {
        Ok(Self)
    }

    fn open_chip(path: &Path) -> Result<Chip, AppError> {
        Chip::open(&path.to_path_buf())
            .map_err(|e| AppError::Gpio(format!("open chip {}: {e}", path.display())))
    }

    fn make_line_settings(cfg: &LineConfig) -> Result<line::Settings, AppError> {
        let mut ls =
            line::Settings::new().map_err(|e| AppError::Gpio(format!("libgpiod settings: {e}")))?;

        match cfg.direction() {
            Direction::Output => {
                ls.set_direction(line::Direction::Output)
                    .map_err(|e| AppError::Gpio(format!("set direction: {e}")))?;
                if let Some(value) = cfg.output_default() {
                    ls.set_output_value(if value.is_active() {
                        line::Value::Active
                    } else {
                        line::Value::InActive
                    })
                    .map_err(|e| AppError::Gpio(format!("set output value: {e}")))?;
                }
            }
            Direction::Input => {
                ls.set_direction(line::Direction::Input)
                    .map_err(|e| AppError::Gpio(format!("set direction: {e}")))?;
            }
        }

        let bias = match cfg.bias() {
            Bias::None => None,
            Bias::PullUp => Some(line::Bias::PullUp),
            Bias::PullDown => Some(line::Bias::PullDown),
        };
        ls.set_bias(bias)
            .map_err(|e| AppError::Gpio(format!("set bias: {e}")))?;

        if cfg.has_edge_detection() {
            let edge = match cfg.edge_detection() {
                EdgeDetect::None => None,
                EdgeDetect::Rising => Some(line::Edge::Rising),
                EdgeDetect::Falling => Some(line::Edge::Falling),
                EdgeDetect::Both => Some(line::Edge::Both),
            };
            ls.set_edge_detection(edge)
                .map_err(|e| AppError::Gpio(format!("set edge detection: {e}")))?;
            let clock = match cfg.event_clock() {
                Some(EventClock::Realtime) => line::EventClock::Realtime,
                Some(EventClock::Monotonic) | None => line::EventClock::Monotonic,
            };
            ls.set_event_clock(clock)
                .map_err(|e| AppError::Gpio(format!("set event clock: {e}")))?;
            ls.set_debounce_period(cfg.debounce());
        }

        Ok(ls)
    }

    fn make_line_config(lines: &LineConfigStore) -> Result<line::Config, AppError> {
        let mut cfg =
            line::Config::new().map_err(|e| AppError::Gpio(format!("line config: {e}")))?;
        for offset in lines.offsets() {
            let Some(line_cfg) = lines.get(offset) else {
                continue;
            };
            let settings = Self::make_line_settings(line_cfg)?;
            cfg.add_line_settings(&[offset], settings)
                .map_err(|e| AppError::Gpio(format!("line config add settings: {e}")))?;
        }
        Ok(cfg)
    }
}

impl GpioBackend for LibgpiodBackend {
    type Request = LibgpiodLineRequest;

    fn probe_chip(&self, path: &Path) -> Result<Option<ChipInfo>, AppError> {
        if !path.exists() {
            return Ok(None);
        }

        let chip = Self::open_chip(path)?;
        let info = chip
            .info()
            .map_err(|e| AppError::Gpio(format!("chip info {}: {e}", path.display())))?;
        let name = info
            .name()
            .map_err(|e| AppError::Gpio(format!("chip name {}: {e}", path.display())))?
            .to_string();
        let label = info
            .label()
            .map_err(|e| AppError::Gpio(format!("chip label {}: {e}", path.display())))?
            .to_string();
        debug!("probed {}: name={name} label={label}", path.display());

        Ok(Some(ChipInfo {
            name,
            label,
            num_lines: info.num_lines() as u32,
        }))
    }

    fn request_lines(
        &self,
        chip: &Path,
        consumer: &str,
        lines: &LineConfigStore,
    ) -> Result<Self::Request, AppError> {
        let chip = Self::open_chip(chip)?;
        let line_cfg = Self::make_line_config(lines)?;

        let mut req_cfg =
            request::Config::new().map_err(|e| AppError::Gpio(format!("request config: {e}")))?;
        req_cfg
            .set_consumer(consumer)
            .map_err(|e| AppError::Gpio(format!("request consumer: {e}")))?;
        let request = chip
            .request_lines(Some(&req_cfg), &line_cfg)
            .map_err(|e| AppError::Gpio(format!("request lines: {e}")))?;
        let buffer = request::Buffer::new(LIBGPIOD_BACKEND_EVENT_BUFFER_CAPACITY)
            .map_err(|e| AppError::Gpio(format!("event buffer: {e}")))?;

        Ok(LibgpiodLineRequest {
            handle: FairMutex::new(GpiodHandle { request, buffer }),
        })
    }
}

impl LineRequest for LibgpiodLineRequest {
    fn value(&self, offset: u32) -> Result<bool, AppError> {
        let value = self
            .handle
            .lock()
            .request
            .value(offset)
            .map_err(|e| AppError::Gpio(format!("get value: {e}")))?;
        Ok(matches!(value, line::Value::Active))
    }

    fn set_value(&self, offset: u32, active: bool) -> Result<(), AppError> {
        self.handle
            .lock()
            .request
            .set_value(
                offset,
                if active {
                    line::Value::Active
                } else {
                    line::Value::InActive
                },
            )
            .map_err(|e| AppError::Gpio(format!("set value: {e}")))?;
        Ok(())
    }

    // the request is locked for one slice at a time so value reads can interleave
    fn wait_edge_events(&self, timeout: Duration) -> Result<bool, AppError> {
        let deadline = Instant::now() + timeout;
        loop {
            let slice = deadline
                .saturating_duration_since(Instant::now())
                .min(LIBGPIOD_BACKEND_EVENT_WAIT_SLICE);
            let ready = self
                .handle
                .lock()
                .request
                .wait_edge_events(Some(slice))
                .map_err(|e| AppError::Gpio(format!("wait edge events: {e}")))?;
            if ready {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
        }
    }

    fn read_edge_events(&self) -> Result<Vec<Result<EdgeEvent, AppError>>, AppError> {
        let mut hdl = self.handle.lock();
        let GpiodHandle { request, buffer } = &mut *hdl;

        let events = request
            .read_edge_events(buffer)
            .map_err(|e| AppError::Gpio(format!("read edge events: {e}")))?;

        let mut decoded = Vec::new();
        for evt in events {
            let evt = match evt {
                Ok(e) => e,
                Err(e) => {
                    decoded.push(Err(AppError::Gpio(format!("decode edge event: {e}"))));
                    continue;
                }
            };
            let kind = match evt.event_type() {
                Ok(line::EdgeKind::Rising) => EdgeKind::Rising,
                Ok(line::EdgeKind::Falling) => EdgeKind::Falling,
                Err(e) => {
                    decoded.push(Err(AppError::Gpio(format!("edge kind on line {}: {e}", evt.line_offset()))));
                    continue;
                }
            };
            decoded.push(Ok(EdgeEvent {
                offset: evt.line_offset(),
                kind,
                timestamp_ns: evt.timestamp().as_nanos() as u64,
            }));
        }
        Ok(decoded)
    }
}
