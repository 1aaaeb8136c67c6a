use log::{debug, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::backend::GpioBackend;
use crate::consumer::ConsumerRegistry;
use crate::error::AppError;
use crate::request::LineRequestManager;

pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(500);

const LISTENER_THREAD_NAME: &str = "gpio-edge-listener";
const LISTENER_ERROR_BACKOFF: Duration = Duration::from_millis(10);

// Cancellation is cooperative: the running flag is checked after every bounded wait and
// before every dispatch, so nothing is delivered once `stop` has returned.
pub struct EdgeEventListener<B: GpioBackend> {
    manager: Arc<LineRequestManager<B>>,
    registry: Arc<ConsumerRegistry>,
    poll_timeout: Duration,
    worker: Mutex<Option<Worker>>,
}

struct Worker {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl<B: GpioBackend> EdgeEventListener<B> {
    pub fn new(
        manager: Arc<LineRequestManager<B>>,
        registry: Arc<ConsumerRegistry>,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            manager,
            registry,
            poll_timeout,
            worker: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    // no-op when already running
    pub fn start(&self) -> Result<(), AppError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }

        let running = Arc::new(AtomicBool::new(true));
        let running_flag = running.clone();
        let manager = self.manager.clone();
        let registry = self.registry.clone();
        let poll_timeout = self.poll_timeout;

        let handle = thread::Builder::new()
            .name(LISTENER_THREAD_NAME.into())
            .spawn(move || listen(&manager, &registry, &running_flag, poll_timeout))
            .map_err(|e| AppError::Gpio(format!("spawn edge listener: {e}")))?;

        debug!("edge listener started on {}", self.manager.chip().display());
        *worker = Some(Worker { running, handle });
        Ok(())
    }

    pub fn stop(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        worker.running.store(false, Ordering::Release);

        // a consumer callback stopping the listener cannot join its own thread
        if worker.handle.thread().id() == thread::current().id() {
            return;
        }
        if worker.handle.join().is_err() {
            warn!("edge listener thread panicked");
        }
        debug!("edge listener stopped on {}", self.manager.chip().display());
    }
}

impl<B: GpioBackend> Drop for EdgeEventListener<B> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn listen<B: GpioBackend>(
    manager: &LineRequestManager<B>,
    registry: &ConsumerRegistry,
    running: &AtomicBool,
    poll_timeout: Duration,
) {
    while running.load(Ordering::Acquire) {
        match manager.wait_edge_events(poll_timeout) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(AppError::NotBound) => {
                thread::sleep(poll_timeout);
                continue;
            }
            Err(e) => {
                warn!("wait edge events error on {}: {e}", manager.chip().display());
                thread::sleep(LISTENER_ERROR_BACKOFF);
                continue;
            }
        }

        let events = match manager.read_edge_events() {
            Ok(events) => events,
            Err(e) => {
                warn!("read edge events error on {}: {e}", manager.chip().display());
                thread::sleep(LISTENER_ERROR_BACKOFF);
                continue;
            }
        };

        for evt in events {
            // a callback may have stopped the listener mid-batch
            if !running.load(Ordering::Acquire) {
                break;
            }
            match evt {
                Ok(evt) => {
                    debug!(
                        "edge {:?} on line {} at {}ns",
                        evt.kind, evt.offset, evt.timestamp_ns
                    );
                    registry.notify(evt.offset);
                }
                Err(e) => warn!("skipping edge event: {e}"),
            }
        }
    }
}
