//! Pest Watch
//!
//! A camera-driven pest detector for single-board computers. One capture
//! device feeds an inference engine at a fixed cadence; when a box of the
//! target pest clears the confidence threshold, a GPIO line is pulsed HIGH
//! for a bounded hold window.
//!
//! # Guarantees
//!
//! 1. **One frame in flight**: frames are inferred strictly in capture order.
//! 2. **Bounded pulses**: re-detections never extend an active alert.
//! 3. **Line safety**: every exit path drives the alert line LOW before the
//!    GPIO handles are released.
//!
//! # Module Structure
//!
//! - `ingest`: capture devices (V4L2, synthetic) and device selection
//! - `detect`: inference backends and the normalized `DetectionResult`
//! - `alert`: alert policy, actuator state machine, GPIO lines
//! - `dispatch`: result interpretation and alert triggering
//! - `paced_loop`: cadence-throttled acquisition loop with cancellation
//! - `runner`: setup, run and ordered cleanup

pub mod alert;
pub mod clock;
pub mod config;
pub mod detect;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod paced_loop;
pub mod runner;

pub use alert::{AlertActuator, AlertPolicy, AlertState};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::PestWatchConfig;
pub use detect::{
    BoundingBox, DefaultModelLoader, DetectionResult, InferenceBackend, LabelScore, ModelInfo,
    ModelKind, ModelLoader,
};
pub use dispatch::{ResultDispatcher, Summary};
pub use error::{DeviceError, Error, GpioError, InferenceError, ModelLoadError, Result};
pub use frame::Frame;
pub use ingest::{select_device, CameraInfo, CameraProvider, FrameSource};
pub use paced_loop::{CancelToken, LoopExit, LoopReport, LoopState, PacedLoop, ResultSink};
pub use runner::{Collaborators, RunReport, Runner};
