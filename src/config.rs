use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::alert::gpio::DEFAULT_SYSFS_ROOT;
use crate::alert::{AlertPolicy, Direction, InputPin, MemoryPin, OutputPin, SysfsPin};
use crate::clock::Clock;
use crate::detect::DefaultModelLoader;
use crate::ingest::{CameraProvider, SyntheticConfig, SyntheticProvider};

const DEFAULT_CADENCE_MS: u64 = 100;
const DEFAULT_TARGET_LABEL: &str = "Grasshopper";
const DEFAULT_THRESHOLD: f32 = 0.70;
const DEFAULT_HOLD_MS: u64 = 5_000;
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_CAMERA_FPS: u32 = 10;
const DEFAULT_MAX_PROBE: u32 = 5;
const DEFAULT_ALERT_PIN: u32 = 27;
const DEFAULT_TRIGGER_PIN: u32 = 17;
const DEFAULT_ONNX_INPUT: u32 = 96;

pub const CONFIG_ENV: &str = "PEST_WATCH_CONFIG";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PestWatchConfigFile {
    cadence_ms: Option<u64>,
    policy: Option<PolicyConfigFile>,
    camera: Option<CameraConfigFile>,
    gpio: Option<GpioConfigFile>,
    model: Option<ModelConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PolicyConfigFile {
    target_label: Option<String>,
    confidence_threshold: Option<f32>,
    hold_duration_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CameraConfigFile {
    backend: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    max_probe: Option<u32>,
    synthetic_devices: Option<usize>,
    synthetic_frames: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct GpioConfigFile {
    backend: Option<String>,
    sysfs_root: Option<PathBuf>,
    alert_pin: Option<u32>,
    trigger_pin: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ModelConfigFile {
    labels: Option<Vec<String>>,
    input_width: Option<u32>,
    input_height: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CameraBackend {
    V4l2,
    Synthetic,
}

impl std::str::FromStr for CameraBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "v4l2" => Ok(Self::V4l2),
            "synthetic" => Ok(Self::Synthetic),
            other => Err(anyhow!(
                "unknown camera backend {:?} (expected v4l2 or synthetic)",
                other
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GpioBackend {
    Sysfs,
    Memory,
}

impl std::str::FromStr for GpioBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sysfs" => Ok(Self::Sysfs),
            "memory" => Ok(Self::Memory),
            other => Err(anyhow!(
                "unknown gpio backend {:?} (expected sysfs or memory)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PestWatchConfig {
    pub cadence_ms: u64,
    pub policy: PolicySettings,
    pub camera: CameraSettings,
    pub gpio: GpioSettings,
    pub model: ModelSettings,
}

#[derive(Debug, Clone)]
pub struct PolicySettings {
    pub target_label: String,
    pub confidence_threshold: f32,
    pub hold_duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub backend: CameraBackend,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    pub max_probe: u32,
    pub synthetic_devices: usize,
    /// 0 means unbounded.
    pub synthetic_frames: u64,
}

#[derive(Debug, Clone)]
pub struct GpioSettings {
    pub backend: GpioBackend,
    pub sysfs_root: PathBuf,
    pub alert_pin: u32,
    pub trigger_pin: u32,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub labels: Vec<String>,
    pub input_width: u32,
    pub input_height: u32,
}

impl PestWatchConfig {
    /// Load from the file named by `PEST_WATCH_CONFIG`, if any.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(CONFIG_ENV).ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Load from an explicit file (or defaults), then apply env overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => PestWatchConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PestWatchConfigFile) -> Result<Self> {
        let policy = file.policy.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        let gpio = file.gpio.unwrap_or_default();
        let model = file.model.unwrap_or_default();

        let camera_backend = match camera.backend.as_deref() {
            Some(name) => name.parse()?,
            None => CameraBackend::V4l2,
        };
        let gpio_backend = match gpio.backend.as_deref() {
            Some(name) => name.parse()?,
            None => GpioBackend::Sysfs,
        };

        Ok(Self {
            cadence_ms: file.cadence_ms.unwrap_or(DEFAULT_CADENCE_MS),
            policy: PolicySettings {
                target_label: policy
                    .target_label
                    .unwrap_or_else(|| DEFAULT_TARGET_LABEL.to_string()),
                confidence_threshold: policy.confidence_threshold.unwrap_or(DEFAULT_THRESHOLD),
                hold_duration_ms: policy.hold_duration_ms.unwrap_or(DEFAULT_HOLD_MS),
            },
            camera: CameraSettings {
                backend: camera_backend,
                width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
                target_fps: camera.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
                max_probe: camera.max_probe.unwrap_or(DEFAULT_MAX_PROBE),
                synthetic_devices: camera.synthetic_devices.unwrap_or(1),
                synthetic_frames: camera.synthetic_frames.unwrap_or(0),
            },
            gpio: GpioSettings {
                backend: gpio_backend,
                sysfs_root: gpio
                    .sysfs_root
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_SYSFS_ROOT)),
                alert_pin: gpio.alert_pin.unwrap_or(DEFAULT_ALERT_PIN),
                trigger_pin: gpio.trigger_pin.unwrap_or(DEFAULT_TRIGGER_PIN),
            },
            model: ModelSettings {
                labels: model.labels.unwrap_or_default(),
                input_width: model.input_width.unwrap_or(DEFAULT_ONNX_INPUT),
                input_height: model.input_height.unwrap_or(DEFAULT_ONNX_INPUT),
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(cadence) = env_nonempty("PEST_WATCH_CADENCE_MS") {
            self.cadence_ms = cadence.parse().map_err(|_| {
                anyhow!("PEST_WATCH_CADENCE_MS must be an integer number of milliseconds")
            })?;
        }
        if let Some(label) = env_nonempty("PEST_WATCH_TARGET_LABEL") {
            self.policy.target_label = label;
        }
        if let Some(threshold) = env_nonempty("PEST_WATCH_THRESHOLD") {
            self.policy.confidence_threshold = threshold
                .parse()
                .map_err(|_| anyhow!("PEST_WATCH_THRESHOLD must be a number in [0, 1]"))?;
        }
        if let Some(hold) = env_nonempty("PEST_WATCH_HOLD_MS") {
            self.policy.hold_duration_ms = hold.parse().map_err(|_| {
                anyhow!("PEST_WATCH_HOLD_MS must be an integer number of milliseconds")
            })?;
        }
        if let Some(backend) = env_nonempty("PEST_WATCH_CAMERA_BACKEND") {
            self.camera.backend = backend.parse()?;
        }
        if let Some(backend) = env_nonempty("PEST_WATCH_GPIO_BACKEND") {
            self.gpio.backend = backend.parse()?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.policy.target_label = self.policy.target_label.trim().to_string();
        if self.policy.target_label.is_empty() {
            return Err(anyhow!("policy.target_label must not be empty"));
        }
        let threshold = self.policy.confidence_threshold;
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!(
                "policy.confidence_threshold must be within [0, 1], got {}",
                threshold
            ));
        }
        if self.cadence_ms == 0 {
            return Err(anyhow!("cadence_ms must be greater than zero"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be non-zero"));
        }
        if self.model.input_width == 0 || self.model.input_height == 0 {
            return Err(anyhow!("model input width and height must be non-zero"));
        }
        if self.gpio.alert_pin == self.gpio.trigger_pin {
            return Err(anyhow!(
                "gpio.alert_pin and gpio.trigger_pin must differ (both {})",
                self.gpio.alert_pin
            ));
        }
        Ok(())
    }

    pub fn alert_policy(&self) -> AlertPolicy {
        AlertPolicy {
            target_label: self.policy.target_label.clone(),
            confidence_threshold: self.policy.confidence_threshold,
            hold_duration_ms: self.policy.hold_duration_ms,
        }
    }

    pub fn model_loader(&self) -> DefaultModelLoader {
        DefaultModelLoader {
            labels: self.model.labels.clone(),
            onnx_input: (self.model.input_width, self.model.input_height),
        }
    }

    pub fn camera_provider(&self, clock: Arc<dyn Clock>) -> Result<Box<dyn CameraProvider>> {
        match self.camera.backend {
            CameraBackend::Synthetic => Ok(Box::new(SyntheticProvider::new(
                SyntheticConfig {
                    width: self.camera.width,
                    height: self.camera.height,
                    frame_limit: self.camera.synthetic_frames,
                    devices: self.camera.synthetic_devices,
                },
                clock,
            ))),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::V4l2 => Ok(Box::new(crate::ingest::V4l2Provider::new(
                crate::ingest::V4l2Config {
                    target_fps: self.camera.target_fps,
                    width: self.camera.width,
                    height: self.camera.height,
                    ..Default::default()
                },
                self.camera.max_probe,
                clock,
            ))),
            #[cfg(not(feature = "ingest-v4l2"))]
            CameraBackend::V4l2 => Err(anyhow!(
                "camera backend v4l2 requires the ingest-v4l2 feature; \
                 rebuild with --features ingest-v4l2 or set camera.backend = \"synthetic\""
            )),
        }
    }

    /// Open the alert output and the reserved trigger input.
    pub fn open_gpio(&self) -> Result<(Box<dyn OutputPin>, Box<dyn InputPin>)> {
        match self.gpio.backend {
            GpioBackend::Sysfs => {
                let root = &self.gpio.sysfs_root;
                let alert = SysfsPin::open(root, self.gpio.alert_pin, Direction::Out)
                    .context("failed to open alert output")?;
                let trigger = SysfsPin::open(root, self.gpio.trigger_pin, Direction::In)
                    .context("failed to open trigger input")?;
                Ok((Box::new(alert), Box::new(trigger)))
            }
            GpioBackend::Memory => {
                let (alert, _) = MemoryPin::new(self.gpio.alert_pin);
                let (trigger, _) = MemoryPin::new(self.gpio.trigger_pin);
                log::warn!("gpio backend is memory; alerts are logged only");
                Ok((Box::new(alert), Box::new(trigger)))
            }
        }
    }
}

fn read_config_file(path: &Path) -> Result<PestWatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
