use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::backend::{ChipInfo, GpioBackend};
use crate::error::AppError;

pub const DEFAULT_CHIP_PATH: &str = "/dev/gpiochip0";
pub const DEFAULT_CHIP_LABEL: &str = "pinctrl";

const CHIP_CANDIDATE_COUNT: u32 = 5;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ResolvedChip {
    pub path: PathBuf,
    pub info: ChipInfo,
}

/// Finds the GPIO character device that carries the pin controller lines.
///
/// Candidates are probed and closed again; no chip handle outlives resolution.
pub struct ChipResolver<B: GpioBackend> {
    backend: Arc<B>,
    expected_label: String,
}

impl<B: GpioBackend> ChipResolver<B> {
    pub fn new(backend: Arc<B>, expected_label: impl Into<String>) -> Self {
        Self {
            backend,
            expected_label: expected_label.into(),
        }
    }

    /// First match over `/dev/gpiochip0` .. `/dev/gpiochip4`.
    pub fn resolve(&self) -> Result<ResolvedChip, AppError> {
        let mut rejected: Option<AppError> = None;

        for index in 0..CHIP_CANDIDATE_COUNT {
            let path = PathBuf::from(format!("/dev/gpiochip{index}"));
            match self.check(&path) {
                Ok(Some(chip)) => {
                    info!(
                        "using GPIO chip {} ({})",
                        chip.path.display(),
                        chip.info.label
                    );
                    return Ok(chip);
                }
                Ok(None) => debug!("no device at {}", path.display()),
                Err(e) => {
                    debug!("skipping {}: {e}", path.display());
                    rejected = Some(e);
                }
            }
        }

        Err(rejected.unwrap_or_else(|| {
            AppError::NoChipFound(format!(
                "none of /dev/gpiochip0..{} exist",
                CHIP_CANDIDATE_COUNT - 1
            ))
        }))
    }

    /// Validates an explicitly configured chip path.
    pub fn resolve_path<P: AsRef<Path>>(&self, path: P) -> Result<ResolvedChip, AppError> {
        let path = path.as_ref();
        let chip = self
            .check(path)?
            .ok_or_else(|| AppError::NoChipFound(path.display().to_string()))?;
        info!(
            "using GPIO chip {} ({})",
            chip.path.display(),
            chip.info.label
        );
        Ok(chip)
    }

    fn check(&self, path: &Path) -> Result<Option<ResolvedChip>, AppError> {
        let info = match self.backend.probe_chip(path) {
            Ok(Some(info)) => info,
            Ok(None) => return Ok(None),
            Err(e) => {
                return Err(AppError::InvalidChip {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                });
            }
        };

        if !info.label.contains(&self.expected_label) {
            return Err(AppError::InvalidChip {
                path: path.display().to_string(),
                reason: format!(
                    "label '{}' does not contain '{}'",
                    info.label, self.expected_label
                ),
            });
        }

        Ok(Some(ResolvedChip {
            path: path.to_path_buf(),
            info,
        }))
    }
}
