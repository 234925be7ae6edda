//! Alert policy and actuation.
//!
//! The actuator owns the physical alert line and a two-state machine:
//!
//! - `Idle`: line LOW
//! - `Active { until_ms }`: line HIGH until the hold window ends
//!
//! Activation while active does not extend the window, so every alert is a
//! bounded pulse of exactly the hold duration (or longer, if the expiry check
//! runs late; never shorter). The line is forced LOW by `deactivate`, which
//! every shutdown path calls.
//!
//! The actuator assumes single-threaded access. It is driven only from the
//! control loop's thread and has no internal locking.

pub mod gpio;

pub use gpio::{Direction, InputPin, MemoryPin, OutputPin, PinProbe, SysfsPin};

use std::sync::Arc;

use crate::clock::Clock;
use crate::detect::BoundingBox;
use crate::error::GpioError;

/// Which detections raise the alert, and for how long.
#[derive(Clone, Debug, PartialEq)]
pub struct AlertPolicy {
    pub target_label: String,
    /// Inclusive lower bound on box confidence, in `[0, 1]`.
    pub confidence_threshold: f32,
    pub hold_duration_ms: u64,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            target_label: "Grasshopper".to_string(),
            confidence_threshold: 0.70,
            hold_duration_ms: 5_000,
        }
    }
}

impl AlertPolicy {
    /// A box qualifies when its label matches exactly and its confidence
    /// meets or exceeds the threshold.
    pub fn qualifies(&self, bbox: &BoundingBox) -> bool {
        bbox.label == self.target_label && bbox.confidence >= self.confidence_threshold
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertState {
    Idle,
    Active { until_ms: u64 },
}

pub struct AlertActuator {
    pin: Box<dyn OutputPin>,
    clock: Arc<dyn Clock>,
    hold_ms: u64,
    state: AlertState,
    released: bool,
}

impl AlertActuator {
    /// Take ownership of the alert line and drive it LOW.
    pub fn new(
        mut pin: Box<dyn OutputPin>,
        clock: Arc<dyn Clock>,
        hold_ms: u64,
    ) -> Result<Self, GpioError> {
        pin.set_level(false)?;
        Ok(Self {
            pin,
            clock,
            hold_ms,
            state: AlertState::Idle,
            released: false,
        })
    }

    pub fn state(&self) -> AlertState {
        self.state
    }

    pub fn is_asserted(&self) -> bool {
        matches!(self.state, AlertState::Active { .. })
    }

    /// Raise the alert. Returns `true` when this call started a new pulse,
    /// `false` when a pulse was already running.
    pub fn activate(&mut self) -> Result<bool, GpioError> {
        self.refresh()?;
        match self.state {
            AlertState::Active { .. } => Ok(false),
            AlertState::Idle => {
                let until_ms = self.clock.now_ms().saturating_add(self.hold_ms);
                self.pin.set_level(true)?;
                self.state = AlertState::Active { until_ms };
                log::debug!("alert pin {} HIGH until {}ms", self.pin.pin(), until_ms);
                Ok(true)
            }
        }
    }

    /// End an expired pulse. Cheap to call on every loop iteration.
    pub fn refresh(&mut self) -> Result<(), GpioError> {
        if let AlertState::Active { until_ms } = self.state {
            if self.clock.now_ms() >= until_ms {
                self.pin.set_level(false)?;
                self.state = AlertState::Idle;
                log::debug!("alert pin {} LOW (hold elapsed)", self.pin.pin());
            }
        }
        Ok(())
    }

    /// Force `Idle` and drive the line LOW regardless of state.
    pub fn deactivate(&mut self) -> Result<(), GpioError> {
        self.state = AlertState::Idle;
        self.pin.set_level(false)
    }

    /// Drive LOW and hand the line back to the system.
    pub fn release(&mut self) -> Result<(), GpioError> {
        if self.released {
            return Ok(());
        }
        self.deactivate()?;
        self.released = true;
        self.pin.release()
    }
}

impl Drop for AlertActuator {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Reached only when cleanup was skipped, e.g. on panic.
        if let Err(err) = self.release() {
            log::error!("failed to release alert pin {}: {}", self.pin.pin(), err);
        }
    }
}
