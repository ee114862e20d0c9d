use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{AppError, Result};

/// Kernel backlight class directory
pub const BACKLIGHT_CLASS_DIR: &str = "/sys/class/backlight";

/// Side-effecting display controls
#[async_trait]
pub trait DisplayBackend: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Prevent (or stop preventing) the screen from blanking
    async fn set_keep_screen_on(&self, on: bool) -> Result<()>;

    /// Set brightness in 0.0 - 1.0, `None` restores the system level
    async fn set_brightness(&self, level: Option<f32>) -> Result<()>;

    /// Hide (or show) system bars around the video
    async fn set_immersive(&self, immersive: bool) -> Result<()>;
}

/// Backend that only logs what it would do
#[derive(Debug, Default)]
pub struct LogDisplay;

#[async_trait]
impl DisplayBackend for LogDisplay {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn set_keep_screen_on(&self, on: bool) -> Result<()> {
        info!(on, "Keep screen on");
        Ok(())
    }

    async fn set_brightness(&self, level: Option<f32>) -> Result<()> {
        match level {
            Some(level) => info!(level, "Brightness"),
            None => info!("Brightness: system default"),
        }
        Ok(())
    }

    async fn set_immersive(&self, immersive: bool) -> Result<()> {
        info!(immersive, "Immersive mode");
        Ok(())
    }
}

/// Linux backlight through sysfs (`brightness` / `max_brightness`)
///
/// Only brightness is supported; the other controls are no-ops. The level
/// found at open time is restored for the system default.
#[derive(Debug)]
pub struct SysfsBacklight {
    dir: PathBuf,
    max: u32,
    initial: u32,
}

impl SysfsBacklight {
    /// Open a backlight device directory
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let max = read_level(&dir.join("max_brightness")).await?;
        if max == 0 {
            return Err(display_error(format!(
                "{} reports max_brightness 0",
                dir.display()
            )));
        }
        let initial = read_level(&dir.join("brightness")).await?;
        info!(device = %dir.display(), max, initial, "Backlight opened");
        Ok(Self { dir, max, initial })
    }

    /// Open the first device under `class_dir`
    pub async fn detect(class_dir: impl AsRef<Path>) -> Result<Self> {
        let class_dir = class_dir.as_ref();
        let mut entries = tokio::fs::read_dir(class_dir).await?;
        let mut devices = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            devices.push(entry.path());
        }
        devices.sort();

        match devices.into_iter().next() {
            Some(dir) => Self::open(dir).await,
            None => Err(display_error(format!(
                "no backlight device in {}",
                class_dir.display()
            ))),
        }
    }

    /// Raw value for a 0.0 - 1.0 level; never 0 so the panel stays lit
    fn raw_level(&self, level: f32) -> u32 {
        ((level.clamp(0.0, 1.0) * self.max as f32).round() as u32).clamp(1, self.max)
    }
}

#[async_trait]
impl DisplayBackend for SysfsBacklight {
    fn name(&self) -> &'static str {
        "sysfs"
    }

    async fn set_keep_screen_on(&self, on: bool) -> Result<()> {
        debug!(on, "Keep-screen-on is not controlled through sysfs");
        Ok(())
    }

    async fn set_brightness(&self, level: Option<f32>) -> Result<()> {
        let raw = match level {
            Some(level) => self.raw_level(level),
            None => self.initial,
        };
        debug!(device = %self.dir.display(), raw, "Writing backlight level");
        tokio::fs::write(self.dir.join("brightness"), raw.to_string())
            .await
            .map_err(|e| display_error(format!("{}: {}", self.dir.display(), e)))
    }

    async fn set_immersive(&self, immersive: bool) -> Result<()> {
        debug!(immersive, "Immersive mode has no sysfs control");
        Ok(())
    }
}

fn display_error(reason: String) -> AppError {
    AppError::Display {
        backend: "sysfs".to_string(),
        reason,
    }
}

async fn read_level(path: &Path) -> Result<u32> {
    let raw = tokio::fs::read_to_string(path).await?;
    raw.trim()
        .parse()
        .map_err(|_| display_error(format!("{}: not a number: {:?}", path.display(), raw.trim())))
}
