use std::path::Path;
use std::time::Duration;

use serde::Serialize;

use crate::error::AppError;
use crate::line::{EdgeEvent, LineConfigStore};

#[cfg(feature = "hardware-gpio")]
pub mod libgpiod;
pub mod mock;

#[cfg(feature = "hardware-gpio")]
pub use libgpiod::LibgpiodBackend;
pub use mock::MockGpioBackend;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChipInfo {
    pub name: String,
    pub label: String,
    pub num_lines: u32,
}

/// Access to the GPIO character devices of the host.
pub trait GpioBackend: Send + Sync + 'static {
    type Request: LineRequest;

    /// `Ok(None)` when nothing exists at `path`, an error when something exists but is not a
    /// usable GPIO chip.
    fn probe_chip(&self, path: &Path) -> Result<Option<ChipInfo>, AppError>;

    /// Claims every line in `lines` in a single request. Dropping the returned request
    /// releases the lines.
    fn request_lines(
        &self,
        chip: &Path,
        consumer: &str,
        lines: &LineConfigStore,
    ) -> Result<Self::Request, AppError>;
}

/// A live claim on a set of lines.
pub trait LineRequest: Send + Sync + 'static {
    fn value(&self, offset: u32) -> Result<bool, AppError>;
    fn set_value(&self, offset: u32, active: bool) -> Result<(), AppError>;
    fn wait_edge_events(&self, timeout: Duration) -> Result<bool, AppError>;
    fn read_edge_events(&self) -> Result<Vec<Result<EdgeEvent, AppError>>, AppError>;
}
