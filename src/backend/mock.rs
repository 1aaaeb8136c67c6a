use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::{Condvar, Mutex};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::backend::{ChipInfo, GpioBackend, LineRequest};
use crate::chip::DEFAULT_CHIP_PATH;
use crate::error::AppError;
use crate::line::{Bias, Direction, EdgeEvent, EdgeKind, LineConfig, LineConfigStore};

const MOCK_DEFAULT_LABEL: &str = "pinctrl-bcm2711";
const MOCK_DEFAULT_NUM_LINES: u32 = 58;

/// In-memory chips for tests and for running without hardware.
pub struct MockGpioBackend {
    chips: Mutex<FxHashMap<PathBuf, Arc<MockChip>>>,
    non_chips: Mutex<FxHashSet<PathBuf>>,
    next_request: AtomicU64,
}

struct MockChip {
    info: ChipInfo,
    state: Mutex<MockChipState>,
    events: Condvar,
}

#[derive(Default)]
struct MockChipState {
    values: FxHashMap<u32, bool>,
    claims: FxHashMap<u32, MockClaim>,
    busy: FxHashSet<u32>,
    queues: FxHashMap<u64, VecDeque<Result<EdgeEvent, String>>>, // keyed by request id
}

struct MockClaim {
    request: u64,
    config: LineConfig,
}

pub struct MockLineRequest {
    chip: Arc<MockChip>,
    id: u64,
}

impl Default for MockGpioBackend {
    fn default() -> Self {
        Self::empty().with_chip(DEFAULT_CHIP_PATH, MOCK_DEFAULT_LABEL, MOCK_DEFAULT_NUM_LINES)
    }
}

impl MockGpioBackend {
    pub fn empty() -> Self {
        Self {
            chips: Mutex::new(FxHashMap::default()),
            non_chips: Mutex::new(FxHashSet::default()),
            next_request: AtomicU64::new(1),
        }
    }

    pub fn with_chip(self, path: impl Into<PathBuf>, label: &str, num_lines: u32) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let chip = MockChip {
            info: ChipInfo {
                name,
                label: label.to_string(),
                num_lines,
            },
            state: Mutex::new(MockChipState::default()),
            events: Condvar::new(),
        };
        self.chips.lock().insert(path, Arc::new(chip));
        self
    }

    /// Registers a device node that exists but is not a GPIO chip.
    pub fn with_non_chip(self, path: impl Into<PathBuf>) -> Self {
        self.non_chips.lock().insert(path.into());
        self
    }

    fn chip(&self, path: &Path) -> Option<Arc<MockChip>> {
        self.chips.lock().get(path).cloned()
    }

    /// Simulates another process holding `offset`.
    pub fn mark_busy(&self, chip: impl AsRef<Path>, offset: u32) {
        if let Some(chip) = self.chip(chip.as_ref()) {
            chip.state.lock().busy.insert(offset);
        }
    }

    pub fn clear_busy(&self, chip: impl AsRef<Path>, offset: u32) {
        if let Some(chip) = self.chip(chip.as_ref()) {
            chip.state.lock().busy.remove(&offset);
        }
    }

    /// Drives the physical level of `offset` and queues an edge event for the request holding
    /// it when its edge detection matches. Returns whether an event was queued.
    pub fn inject_edge(&self, chip: impl AsRef<Path>, offset: u32, kind: EdgeKind) -> bool {
        let Some(chip) = self.chip(chip.as_ref()) else {
            return false;
        };
        let mut state = chip.state.lock();
        state.values.insert(offset, kind == EdgeKind::Rising);

        let target = state
            .claims
            .get(&offset)
            .filter(|claim| claim.config.edge_detection().matches(kind))
            .map(|claim| claim.request);
        if let Some(id) = target
            && let Some(queue) = state.queues.get_mut(&id)
        {
            queue.push_back(Ok(EdgeEvent {
                offset,
                kind,
                timestamp_ns: epoch_nanos(),
            }));
            chip.events.notify_all();
            return true;
        }
        false
    }

    /// Queues an event that fails to decode on the request holding `offset`.
    pub fn inject_malformed_event(&self, chip: impl AsRef<Path>, offset: u32) -> bool {
        let Some(chip) = self.chip(chip.as_ref()) else {
            return false;
        };
        let mut state = chip.state.lock();
        let target = state.claims.get(&offset).map(|claim| claim.request);
        if let Some(id) = target
            && let Some(queue) = state.queues.get_mut(&id)
        {
            queue.push_back(Err(format!("malformed event on line {offset}")));
            chip.events.notify_all();
            return true;
        }
        false
    }

    pub fn line_value(&self, chip: impl AsRef<Path>, offset: u32) -> Option<bool> {
        self.chip(chip.as_ref())
            .and_then(|chip| chip.state.lock().values.get(&offset).copied())
    }

    pub fn is_claimed(&self, chip: impl AsRef<Path>, offset: u32) -> bool {
        self.chip(chip.as_ref())
            .map(|chip| chip.state.lock().claims.contains_key(&offset))
            .unwrap_or(false)
    }
}

impl GpioBackend for MockGpioBackend {
    type Request = MockLineRequest;

    fn probe_chip(&self, path: &Path) -> Result<Option<ChipInfo>, AppError> {
        if self.non_chips.lock().contains(path) {
            return Err(AppError::Gpio(format!(
                "{} is not a GPIO character device",
                path.display()
            )));
        }
        Ok(self.chip(path).map(|chip| chip.info.clone()))
    }

    fn request_lines(
        &self,
        chip_path: &Path,
        _consumer: &str,
        lines: &LineConfigStore,
    ) -> Result<Self::Request, AppError> {
        let chip = self
            .chip(chip_path)
            .ok_or_else(|| AppError::Gpio(format!("{}: no such device", chip_path.display())))?;
        let id = self.next_request.fetch_add(1, Ordering::Relaxed);

        {
            let mut state = chip.state.lock();
            for (offset, _) in lines.iter() {
                if offset >= chip.info.num_lines {
                    return Err(AppError::Gpio(format!("line {offset} out of range")));
                }
                if state.busy.contains(&offset) || state.claims.contains_key(&offset) {
                    return Err(AppError::Gpio(format!("line {offset} busy")));
                }
            }

            for (offset, cfg) in lines.iter() {
                match cfg.output_default() {
                    Some(value) => {
                        state.values.insert(offset, value.is_active());
                    }
                    None => {
                        state
                            .values
                            .entry(offset)
                            .or_insert(cfg.bias() == Bias::PullUp);
                    }
                }
                state.claims.insert(
                    offset,
                    MockClaim {
                        request: id,
                        config: cfg.clone(),
                    },
                );
            }
            state.queues.insert(id, VecDeque::new());
        }

        Ok(MockLineRequest { chip, id })
    }
}

impl MockLineRequest {
    fn claimed<'a>(
        &self,
        state: &'a MockChipState,
        offset: u32,
    ) -> Result<&'a MockClaim, AppError> {
        state
            .claims
            .get(&offset)
            .filter(|claim| claim.request == self.id)
            .ok_or_else(|| AppError::Gpio(format!("line {offset} not held by this request")))
    }
}

impl LineRequest for MockLineRequest {
    fn value(&self, offset: u32) -> Result<bool, AppError> {
        let state = self.chip.state.lock();
        self.claimed(&state, offset)?;
        Ok(state.values.get(&offset).copied().unwrap_or(false))
    }

    fn set_value(&self, offset: u32, active: bool) -> Result<(), AppError> {
        let mut state = self.chip.state.lock();
        if self.claimed(&state, offset)?.config.direction() != Direction::Output {
            return Err(AppError::Gpio(format!("line {offset} is an input")));
        }
        state.values.insert(offset, active);
        Ok(())
    }

    fn wait_edge_events(&self, timeout: Duration) -> Result<bool, AppError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.chip.state.lock();
        loop {
            match state.queues.get(&self.id) {
                None => return Err(AppError::Gpio("request released".into())),
                Some(queue) if !queue.is_empty() => return Ok(true),
                Some(_) => {}
            }
            if self.chip.events.wait_until(&mut state, deadline).timed_out() {
                return Ok(state
                    .queues
                    .get(&self.id)
                    .is_some_and(|queue| !queue.is_empty()));
            }
        }
    }

    fn read_edge_events(&self) -> Result<Vec<Result<EdgeEvent, AppError>>, AppError> {
        let mut state = self.chip.state.lock();
        let queue = state
            .queues
            .get_mut(&self.id)
            .ok_or_else(|| AppError::Gpio("request released".into()))?;
        Ok(queue
            .drain(..)
            .map(|evt| evt.map_err(AppError::Gpio))
            .collect())
    }
}

impl Drop for MockLineRequest {
    fn drop(&mut self) {
        let mut state = self.chip.state.lock();
        let id = self.id;
        state.claims.retain(|_, claim| claim.request != id);
        state.queues.remove(&id);
        self.chip.events.notify_all();
    }
}

fn epoch_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
