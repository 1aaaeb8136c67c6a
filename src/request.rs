use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::backend::{GpioBackend, LineRequest};
use crate::error::AppError;
use crate::line::{Direction, EdgeEvent, LineConfig, LineConfigStore};

// the live claim on the chip together with the configuration it was acquired for
struct ActiveLineRequest<R: LineRequest> {
    request: R,
    lines: LineConfigStore,
}

impl<R: LineRequest> ActiveLineRequest<R> {
    // output levels worth carrying into the next request: same offset, unchanged config
    fn output_levels(&self, next: &LineConfigStore) -> FxHashMap<u32, bool> {
        self.lines
            .iter()
            .filter(|(offset, cfg)| cfg.is_output() && next.get(*offset) == Some(*cfg))
            .filter_map(|(offset, _)| match self.request.value(offset) {
                Ok(value) => Some((offset, value)),
                Err(e) => {
                    debug!("cannot retain level of line {offset}: {e}");
                    None
                }
            })
            .collect()
    }
}

/// Store mutation, `rebuild` and `release` are serialized by one lock. The handle itself is
/// only write-locked to take or install it, so `read`/`write` during a rebuild fail with
/// [`AppError::NotBound`] instead of waiting for the OS acquire.
pub struct LineRequestManager<B: GpioBackend> {
    backend: Arc<B>,
    chip: PathBuf,
    consumer: String,
    store: Mutex<LineConfigStore>,
    active: RwLock<Option<ActiveLineRequest<B::Request>>>,
}

impl<B: GpioBackend> LineRequestManager<B> {
    pub fn new(backend: Arc<B>, chip: impl Into<PathBuf>, consumer: impl Into<String>) -> Self {
        Self {
            backend,
            chip: chip.into(),
            consumer: consumer.into(),
            store: Mutex::new(LineConfigStore::new()),
            active: RwLock::new(None),
        }
    }

    pub fn chip(&self) -> &Path {
        &self.chip
    }

    // store only, the live request is untouched until the next rebuild
    pub fn set(&self, offset: u32, config: LineConfig) {
        self.store.lock().set(offset, config);
    }

    pub fn get(&self, offset: u32) -> Option<LineConfig> {
        self.store.lock().get(offset).cloned()
    }

    pub fn snapshot(&self) -> LineConfigStore {
        self.store.lock().clone()
    }

    pub fn has_edge_lines(&self) -> bool {
        self.store.lock().has_edge_lines()
    }

    pub fn is_bound(&self) -> bool {
        self.active.read().is_some()
    }

    pub fn bound_offsets(&self) -> Vec<u32> {
        self.active
            .read()
            .as_ref()
            .map(|active| active.lines.offsets())
            .unwrap_or_default()
    }

    pub fn rebuild(&self) -> Result<(), AppError> {
        let store = self.store.lock();
        self.rebuild_locked(&store)
    }

    pub fn apply(&self, offset: u32, config: LineConfig) -> Result<(), AppError> {
        let mut store = self.store.lock();
        store.set(offset, config);
        self.rebuild_locked(&store)
    }

    pub fn apply_all<I>(&self, lines: I) -> Result<(), AppError>
    where
        I: IntoIterator<Item = (u32, LineConfig)>,
    {
        let mut store = self.store.lock();
        for (offset, config) in lines {
            store.set(offset, config);
        }
        self.rebuild_locked(&store)
    }

    pub fn release(&self) {
        let _store = self.store.lock();
        if self.active.write().take().is_some() {
            debug!("released lines on {}", self.chip.display());
        }
    }

    pub fn teardown(&self) {
        let mut store = self.store.lock();
        if self.active.write().take().is_some() {
            debug!("released lines on {}", self.chip.display());
        }
        store.clear();
    }

    fn rebuild_locked(&self, store: &LineConfigStore) -> Result<(), AppError> {
        // release fully before acquiring, the OS refuses a second claim on the same offset
        let previous = self.active.write().take();
        let retained = match previous {
            Some(previous) => {
                let levels = previous.output_levels(store);
                drop(previous);
                debug!("released lines on {}", self.chip.display());
                levels
            }
            None => FxHashMap::default(),
        };

        if store.is_empty() {
            debug!("no lines configured on {}, staying unbound", self.chip.display());
            return Ok(());
        }

        let mut effective = store.clone();
        for (offset, active) in retained {
            effective.set(offset, LineConfig::output(active.into()));
        }

        match self
            .backend
            .request_lines(&self.chip, &self.consumer, &effective)
        {
            Ok(request) => {
                debug!(
                    "requested lines {:?} on {}",
                    store.offsets(),
                    self.chip.display()
                );
                *self.active.write() = Some(ActiveLineRequest {
                    request,
                    lines: store.clone(),
                });
                Ok(())
            }
            Err(e) => {
                warn!(
                    "requesting lines {:?} on {} failed: {e}",
                    store.offsets(),
                    self.chip.display()
                );
                Err(AppError::AcquireFailed {
                    chip: self.chip.display().to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    // physical level, invert logic is the caller's concern
    pub fn read(&self, offset: u32) -> Result<bool, AppError> {
        let active = self.active.read();
        let active = active.as_ref().ok_or(AppError::NotBound)?;
        active
            .lines
            .get(offset)
            .ok_or(AppError::UnknownLine(offset))?;
        active.request.value(offset)
    }

    pub fn write(&self, offset: u32, value: bool) -> Result<(), AppError> {
        let active = self.active.read();
        let active = active.as_ref().ok_or(AppError::NotBound)?;
        let cfg = active
            .lines
            .get(offset)
            .ok_or(AppError::UnknownLine(offset))?;
        if cfg.direction() != Direction::Output {
            return Err(AppError::WrongDirection(offset));
        }
        active.request.set_value(offset, value)
    }

    // holds the handle read lock for the whole wait, stop the listener before rebuilding
    pub fn wait_edge_events(&self, timeout: Duration) -> Result<bool, AppError> {
        let active = self.active.read();
        active
            .as_ref()
            .ok_or(AppError::NotBound)?
            .request
            .wait_edge_events(timeout)
    }

    pub fn read_edge_events(&self) -> Result<Vec<Result<EdgeEvent, AppError>>, AppError> {
        let active = self.active.read();
        active
            .as_ref()
            .ok_or(AppError::NotBound)?
            .request
            .read_edge_events()
    }
}
