use log::info;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::backend::GpioBackend;
use crate::chip::{ChipResolver, ResolvedChip};
use crate::config::AppConfig;
use crate::consumer::{Consumer, ConsumerId, ConsumerRegistry};
use crate::error::AppError;
use crate::line::LineConfig;
use crate::listener::EdgeEventListener;
use crate::request::LineRequestManager;

/// One instance per chip, shared by reference with the consumers.
pub struct GpioComponent<B: GpioBackend> {
    chip: ResolvedChip,
    manager: Arc<LineRequestManager<B>>,
    registry: Arc<ConsumerRegistry>,
    listener: EdgeEventListener<B>,
    setup: Mutex<()>,
    shut_down: AtomicBool,
}

impl<B: GpioBackend> GpioComponent<B> {
    pub fn new(backend: Arc<B>, chip: ResolvedChip, consumer: &str, poll_timeout: Duration) -> Self {
        let manager = Arc::new(LineRequestManager::new(
            backend,
            chip.path.clone(),
            consumer,
        ));
        let registry = Arc::new(ConsumerRegistry::new());
        let listener = EdgeEventListener::new(manager.clone(), registry.clone(), poll_timeout);

        Self {
            chip,
            manager,
            registry,
            listener,
            setup: Mutex::new(()),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn start(backend: Arc<B>, config: &AppConfig) -> Result<Self, AppError> {
        let resolver = ChipResolver::new(backend.clone(), config.chip_label.clone());
        let chip = match &config.chip {
            Some(path) => resolver.resolve_path(path)?,
            None => resolver.resolve()?,
        };

        Ok(Self::new(
            backend,
            chip,
            &config.consumer,
            Duration::from_millis(config.poll_timeout_ms),
        ))
    }

    pub fn chip(&self) -> &ResolvedChip {
        &self.chip
    }

    pub fn manager(&self) -> &Arc<LineRequestManager<B>> {
        &self.manager
    }

    pub fn registry(&self) -> &Arc<ConsumerRegistry> {
        &self.registry
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_running()
    }

    pub fn configure_line(&self, offset: u32, config: LineConfig) -> Result<(), AppError> {
        let _setup = self.setup.lock();
        self.reconfigure(|manager| manager.apply(offset, config))
    }

    pub fn configure_lines(&self, lines: Vec<(u32, LineConfig)>) -> Result<(), AppError> {
        let _setup = self.setup.lock();
        self.reconfigure(|manager| manager.apply_all(lines))
    }

    pub fn setup_input(
        &self,
        offset: u32,
        config: LineConfig,
        consumer: Arc<dyn Consumer>,
    ) -> Result<ConsumerId, AppError> {
        let _setup = self.setup.lock();
        if config.is_output() {
            return Err(AppError::InvalidLineConfig(format!(
                "line {offset} must be an input to be observed"
            )));
        }
        if self.registry.output_owner(offset).is_some() {
            return Err(AppError::LineInUse(offset));
        }

        let id = self.registry.subscribe(offset, consumer);
        if let Err(e) = self.reconfigure(|manager| manager.apply(offset, config)) {
            self.registry.unsubscribe(offset, id);
            return Err(e);
        }
        Ok(id)
    }

    pub fn setup_output(&self, offset: u32, config: LineConfig) -> Result<ConsumerId, AppError> {
        let _setup = self.setup.lock();
        if !config.is_output() {
            return Err(AppError::InvalidLineConfig(format!(
                "line {offset} must be an output to be owned"
            )));
        }
        if self.registry.subscribers(offset) > 0 {
            return Err(AppError::LineInUse(offset));
        }

        let id = self.registry.consumer_id();
        self.registry.claim_output(offset, id)?;
        if let Err(e) = self.reconfigure(|manager| manager.apply(offset, config)) {
            self.registry.release_output(offset, id);
            return Err(e);
        }
        Ok(id)
    }

    // the line stays requested until shutdown
    pub fn detach(&self, id: ConsumerId) {
        self.registry.unsubscribe_all(id);
    }

    // caller holds the setup lock
    fn reconfigure<F>(&self, apply: F) -> Result<(), AppError>
    where
        F: FnOnce(&LineRequestManager<B>) -> Result<(), AppError>,
    {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(AppError::Gpio(format!(
                "GPIO component on {} is shut down",
                self.chip.path.display()
            )));
        }

        self.listener.stop();
        let result = apply(&self.manager);
        if self.manager.is_bound() && self.manager.has_edge_lines() {
            self.listener.start()?;
        }
        result
    }

    pub fn read(&self, offset: u32) -> Result<bool, AppError> {
        self.manager.read(offset)
    }

    pub fn write(&self, offset: u32, value: bool) -> Result<(), AppError> {
        self.manager.write(offset, value)
    }

    // runs once, later calls return immediately
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let _setup = self.setup.lock();
        self.listener.stop();
        self.manager.teardown();
        self.registry.clear();
        info!("GPIO component on {} shut down", self.chip.path.display());
    }
}

impl<B: GpioBackend> Drop for GpioComponent<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
