//! Top-level orchestration.
//!
//! `Runner` owns every hardware handle for the duration of one run:
//!
//! 1. load the model and log its metadata
//! 2. resolve and open the capture device, then read a warm-up frame
//! 3. sample the reserved trigger input once
//! 4. run the paced loop until end of stream, cancellation or a fatal error
//!
//! Whatever happens, cleanup runs in a fixed order: the camera is closed,
//! the alert line is forced LOW, the GPIO lines are released, and finally
//! the inference engine is stopped. Cleanup failures are logged; the error
//! that ended the run takes precedence.

use std::sync::Arc;

use crate::alert::{AlertActuator, AlertPolicy, InputPin};
use crate::clock::Clock;
use crate::detect::{DetectionResult, InferenceBackend, ModelLoader};
use crate::dispatch::{ResultDispatcher, Summary};
use crate::error::{DeviceError, Error, Result};
use crate::ingest::{select_device, CameraProvider, FrameSource};
use crate::paced_loop::{CancelToken, LoopReport, PacedLoop, ResultSink};

/// Capabilities a run is wired against.
pub struct Collaborators {
    pub cameras: Box<dyn CameraProvider>,
    pub models: Box<dyn ModelLoader>,
    pub actuator: AlertActuator,
    /// Reserved external trigger line; sampled at startup only.
    pub trigger: Option<Box<dyn InputPin>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunReport {
    pub device: String,
    pub project: String,
    pub loop_report: LoopReport,
    /// Alert pulses started during the run.
    pub alerts: u64,
}

pub struct Runner {
    model_ref: String,
    device: Option<String>,
    cadence_ms: u64,
    policy: AlertPolicy,
    clock: Arc<dyn Clock>,
    cancel: CancelToken,
}

impl Runner {
    pub fn new(
        model_ref: impl Into<String>,
        device: Option<String>,
        cadence_ms: u64,
        policy: AlertPolicy,
        clock: Arc<dyn Clock>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            model_ref: model_ref.into(),
            device,
            cadence_ms,
            policy,
            clock,
            cancel,
        }
    }

    pub fn run(&self, parts: Collaborators) -> Result<RunReport> {
        let Collaborators {
            cameras,
            models,
            mut actuator,
            mut trigger,
        } = parts;
        let mut backend = None;
        let mut source = None;

        let outcome = self.setup_and_run(
            cameras.as_ref(),
            models.as_ref(),
            &mut actuator,
            trigger.as_mut(),
            &mut backend,
            &mut source,
        );
        let cleanup = cleanup(source, &mut actuator, trigger, backend);

        match (outcome, cleanup) {
            (Ok(report), Ok(())) => Ok(report),
            (Ok(_), Err(err)) => Err(err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(cleanup_err)) => {
                log::error!("cleanup after failed run also failed: {}", cleanup_err);
                Err(err)
            }
        }
    }

    fn setup_and_run(
        &self,
        cameras: &dyn CameraProvider,
        models: &dyn ModelLoader,
        actuator: &mut AlertActuator,
        trigger: Option<&mut Box<dyn InputPin>>,
        backend: &mut Option<Box<dyn InferenceBackend>>,
        source: &mut Option<Box<dyn FrameSource>>,
    ) -> Result<RunReport> {
        let backend = backend.insert(models.load(&self.model_ref)?);
        let info = backend.model_info();
        log::info!("loaded model: {} / {}", info.owner, info.project);
        log::info!(
            "model {:?} input {}x{}x{} via {}",
            info.kind,
            info.input_width,
            info.input_height,
            info.channels,
            backend.name()
        );
        log::info!("labels: {}", info.labels.join(", "));
        let project = info.project.clone();

        let device = select_device(cameras, self.device.as_deref())?;
        let source = source.insert(cameras.open(&device)?);
        match source.next_frame() {
            Ok(Some(_)) => log::info!("camera {} ready", device),
            Ok(None) => {
                return Err(DeviceError::InitFailed {
                    device,
                    reason: "camera init failed: no frame".to_string(),
                }
                .into())
            }
            Err(err) => {
                return Err(DeviceError::InitFailed {
                    device,
                    reason: format!("camera init failed: {}", err),
                }
                .into())
            }
        }

        if let Some(trigger) = trigger {
            match trigger.read() {
                Ok(level) => log::info!(
                    "trigger input gpio {} is {}",
                    trigger.pin(),
                    if level { "HIGH" } else { "LOW" }
                ),
                Err(err) => log::warn!("trigger input unreadable: {}", err),
            }
        }

        let dispatcher = ResultDispatcher::new(self.policy.clone());
        let mut sink = DispatchSink {
            dispatcher: &dispatcher,
            actuator,
            alerts: 0,
        };
        let mut paced = PacedLoop::new(self.cadence_ms, self.clock.clone());
        let loop_report = paced.run(&mut **source, &mut **backend, &mut sink, &self.cancel)?;
        log::info!(
            "loop finished ({:?}): {} frames, {} inference failures",
            loop_report.exit,
            loop_report.frames,
            loop_report.inference_failures
        );

        Ok(RunReport {
            device,
            project,
            loop_report,
            alerts: sink.alerts,
        })
    }
}

struct DispatchSink<'a> {
    dispatcher: &'a ResultDispatcher,
    actuator: &'a mut AlertActuator,
    alerts: u64,
}

impl ResultSink for DispatchSink<'_> {
    fn handle(&mut self, result: DetectionResult) -> Result<()> {
        let summary = self.dispatcher.dispatch(result, self.actuator)?;
        log::info!("{}", summary);
        if let Summary::Detections { boxes, alert_raised } = &summary {
            for entry in boxes.iter().filter(|entry| entry.qualifying) {
                log::info!(
                    "[ALERT] {} detected ({:.2})",
                    entry.bbox.label,
                    entry.bbox.confidence
                );
            }
            if *alert_raised {
                self.alerts += 1;
            }
        }
        Ok(())
    }

    fn tick(&mut self) -> Result<()> {
        self.actuator.refresh()?;
        Ok(())
    }
}

fn cleanup(
    source: Option<Box<dyn FrameSource>>,
    actuator: &mut AlertActuator,
    trigger: Option<Box<dyn InputPin>>,
    backend: Option<Box<dyn InferenceBackend>>,
) -> Result<()> {
    let mut first: Option<Error> = None;

    if let Some(mut source) = source {
        source.close();
        log::info!("camera {} closed", source.device());
    }

    if let Err(err) = actuator.deactivate() {
        log::error!("failed to drive alert line LOW: {}", err);
        first.get_or_insert(err.into());
    }

    if let Err(err) = actuator.release() {
        log::error!("failed to release alert line: {}", err);
        first.get_or_insert(err.into());
    }
    if let Some(mut trigger) = trigger {
        if let Err(err) = trigger.release() {
            log::error!("failed to release trigger line: {}", err);
            first.get_or_insert(err.into());
        }
    }

    if let Some(mut backend) = backend {
        backend.stop();
    }

    match first {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
