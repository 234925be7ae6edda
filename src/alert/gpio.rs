//! Digital I/O lines.
//!
//! `SysfsPin` drives the kernel's `/sys/class/gpio` interface. `MemoryPin`
//! keeps the level in memory and records every write; a `PinProbe` handle
//! lets tests and dry runs observe it after the pin has been handed to the
//! actuator.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::GpioError;

pub const DEFAULT_SYSFS_ROOT: &str = "/sys/class/gpio";

/// A single digital output line.
pub trait OutputPin: Send {
    fn pin(&self) -> u32;

    fn set_level(&mut self, high: bool) -> Result<(), GpioError>;

    /// Give the line back to the system. The pin is unusable afterwards.
    fn release(&mut self) -> Result<(), GpioError>;
}

/// A single digital input line.
pub trait InputPin: Send {
    fn pin(&self) -> u32;

    fn read(&mut self) -> Result<bool, GpioError>;

    fn release(&mut self) -> Result<(), GpioError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

/// GPIO line driven through sysfs.
pub struct SysfsPin {
    root: PathBuf,
    pin: u32,
    direction: Direction,
    exported_here: bool,
    released: bool,
}

impl SysfsPin {
    /// Export `pin` under `root` if needed and set its direction. Output
    /// lines start LOW.
    pub fn open<P: AsRef<Path>>(root: P, pin: u32, direction: Direction) -> Result<Self, GpioError> {
        let root = root.as_ref().to_path_buf();
        let pin_dir = root.join(format!("gpio{}", pin));
        let mut exported_here = false;
        if !pin_dir.exists() {
            write_attr(pin, "export", &root.join("export"), &pin.to_string())?;
            exported_here = true;
            // udev needs a moment to fix permissions on freshly exported lines.
            for _ in 0..20 {
                if pin_dir.join("direction").exists() {
                    break;
                }
                std::thread::sleep(Duration::from_millis(10));
            }
        }
        let dir_value = match direction {
            // "low" sets direction out and drives LOW in one write.
            Direction::Out => "low",
            Direction::In => "in",
        };
        if let Err(err) = write_attr(pin, "direction", &pin_dir.join("direction"), dir_value) {
            if exported_here {
                let unexport = root.join("unexport");
                if let Err(e) = write_attr(pin, "unexport", &unexport, &pin.to_string()) {
                    log::warn!("gpio {}: unexport after failed setup: {}", pin, e);
                }
            }
            return Err(err);
        }
        log::debug!("gpio {} configured as {:?} under {}", pin, direction, root.display());
        Ok(Self {
            root,
            pin,
            direction,
            exported_here,
            released: false,
        })
    }

    fn value_path(&self) -> PathBuf {
        self.root.join(format!("gpio{}", self.pin)).join("value")
    }

    fn release_line(&mut self) -> Result<(), GpioError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        if self.exported_here {
            write_attr(
                self.pin,
                "unexport",
                &self.root.join("unexport"),
                &self.pin.to_string(),
            )?;
        }
        log::debug!("gpio {} ({:?}) released", self.pin, self.direction);
        Ok(())
    }
}

impl Drop for SysfsPin {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if self.direction == Direction::Out {
            if let Err(err) = write_attr(self.pin, "write", &self.value_path(), "0") {
                log::error!("gpio {}: failed to drive LOW on drop: {}", self.pin, err);
            }
        }
        if let Err(err) = self.release_line() {
            log::error!("gpio {}: failed to release on drop: {}", self.pin, err);
        }
    }
}

impl OutputPin for SysfsPin {
    fn pin(&self) -> u32 {
        self.pin
    }

    fn set_level(&mut self, high: bool) -> Result<(), GpioError> {
        if self.released {
            return Err(GpioError::Released { pin: self.pin });
        }
        let path = self.value_path();
        write_attr(self.pin, "write", &path, if high { "1" } else { "0" })
    }

    fn release(&mut self) -> Result<(), GpioError> {
        self.release_line()
    }
}

impl InputPin for SysfsPin {
    fn pin(&self) -> u32 {
        self.pin
    }

    fn read(&mut self) -> Result<bool, GpioError> {
        if self.released {
            return Err(GpioError::Released { pin: self.pin });
        }
        let path = self.value_path();
        let raw = fs::read_to_string(&path).map_err(|source| GpioError::Io {
            pin: self.pin,
            op: "read",
            path: path.clone(),
            source,
        })?;
        match raw.trim() {
            "0" => Ok(false),
            "1" => Ok(true),
            other => Err(GpioError::BadValue {
                pin: self.pin,
                value: other.to_string(),
            }),
        }
    }

    fn release(&mut self) -> Result<(), GpioError> {
        self.release_line()
    }
}

fn write_attr(pin: u32, op: &'static str, path: &Path, value: &str) -> Result<(), GpioError> {
    fs::write(path, value).map_err(|source| GpioError::Io {
        pin,
        op,
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Default)]
struct PinLog {
    level: bool,
    writes: Vec<bool>,
    released: bool,
}

/// In-memory GPIO line.
pub struct MemoryPin {
    pin: u32,
    log: Arc<Mutex<PinLog>>,
}

/// Read-only observer of a `MemoryPin`.
#[derive(Clone)]
pub struct PinProbe {
    log: Arc<Mutex<PinLog>>,
}

impl MemoryPin {
    /// New LOW line plus a probe observing it.
    pub fn new(pin: u32) -> (Self, PinProbe) {
        let log = Arc::new(Mutex::new(PinLog::default()));
        (
            Self {
                pin,
                log: log.clone(),
            },
            PinProbe { log },
        )
    }

    fn with_log<T>(&self, f: impl FnOnce(&mut PinLog) -> T) -> T {
        // A poisoned lock only means a test thread panicked mid-write; the
        // level itself is still meaningful.
        let mut guard = self.log.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }
}

impl OutputPin for MemoryPin {
    fn pin(&self) -> u32 {
        self.pin
    }

    fn set_level(&mut self, high: bool) -> Result<(), GpioError> {
        let pin = self.pin;
        self.with_log(|state| {
            if state.released {
                return Err(GpioError::Released { pin });
            }
            if state.level != high {
                log::debug!("gpio {} -> {}", pin, if high { "HIGH" } else { "LOW" });
            }
            state.level = high;
            state.writes.push(high);
            Ok(())
        })
    }

    fn release(&mut self) -> Result<(), GpioError> {
        self.with_log(|state| state.released = true);
        Ok(())
    }
}

impl InputPin for MemoryPin {
    fn pin(&self) -> u32 {
        self.pin
    }

    fn read(&mut self) -> Result<bool, GpioError> {
        let pin = self.pin;
        self.with_log(|state| {
            if state.released {
                Err(GpioError::Released { pin })
            } else {
                Ok(state.level)
            }
        })
    }

    fn release(&mut self) -> Result<(), GpioError> {
        self.with_log(|state| state.released = true);
        Ok(())
    }
}

impl PinProbe {
    fn with_log<T>(&self, f: impl FnOnce(&mut PinLog) -> T) -> T {
        let mut guard = self.log.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn is_high(&self) -> bool {
        self.with_log(|state| state.level)
    }

    /// Every level written, in order.
    pub fn writes(&self) -> Vec<bool> {
        self.with_log(|state| state.writes.clone())
    }

    pub fn is_released(&self) -> bool {
        self.with_log(|state| state.released)
    }
}
