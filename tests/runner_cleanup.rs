use std::sync::{Arc, Mutex};

use pest_watch::alert::{InputPin, MemoryPin, OutputPin};
use pest_watch::{
    AlertActuator, AlertPolicy, CameraInfo, CameraProvider, CancelToken, Clock, Collaborators,
    DetectionResult, DeviceError, Error, Frame, FrameSource, GpioError, InferenceBackend,
    InferenceError, LoopExit, ManualClock, ModelInfo, ModelKind, ModelLoadError, ModelLoader,
    Runner,
};

type Journal = Arc<Mutex<Vec<String>>>;

fn note(journal: &Journal, entry: impl Into<String>) {
    journal.lock().unwrap().push(entry.into());
}

struct JournalPin {
    name: &'static str,
    pin: u32,
    level: bool,
    journal: Journal,
}

impl OutputPin for JournalPin {
    fn pin(&self) -> u32 {
        self.pin
    }

    fn set_level(&mut self, high: bool) -> Result<(), GpioError> {
        self.level = high;
        note(&self.journal, format!("{} {}", self.name, if high { "high" } else { "low" }));
        Ok(())
    }

    fn release(&mut self) -> Result<(), GpioError> {
        note(&self.journal, format!("{} release", self.name));
        Ok(())
    }
}

impl InputPin for JournalPin {
    fn pin(&self) -> u32 {
        self.pin
    }

    fn read(&mut self) -> Result<bool, GpioError> {
        note(&self.journal, format!("{} read", self.name));
        Ok(self.level)
    }

    fn release(&mut self) -> Result<(), GpioError> {
        note(&self.journal, format!("{} release", self.name));
        Ok(())
    }
}

/// Scripted camera: `None` entries end the stream, `Err` entries fail capture.
struct ScriptedSource {
    frames: Vec<Result<Option<u8>, ()>>,
    clock: Arc<ManualClock>,
    journal: Journal,
}

impl FrameSource for ScriptedSource {
    fn device(&self) -> &str {
        "scripted0"
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, DeviceError> {
        if self.frames.is_empty() {
            return Ok(None);
        }
        match self.frames.remove(0) {
            Ok(Some(value)) => Ok(Some(Frame::new(vec![value; 12], 2, 2, self.clock.now_ms()))),
            Ok(None) => Ok(None),
            Err(()) => Err(DeviceError::Capture {
                device: "scripted0".into(),
                reason: "cable pulled".into(),
            }),
        }
    }

    fn close(&mut self) {
        note(&self.journal, "camera close");
    }
}

struct ScriptedCameras {
    ids: Vec<&'static str>,
    frames: Mutex<Option<Vec<Result<Option<u8>, ()>>>>,
    clock: Arc<ManualClock>,
    journal: Journal,
}

impl CameraProvider for ScriptedCameras {
    fn candidates(&self) -> Result<Vec<CameraInfo>, DeviceError> {
        Ok(self
            .ids
            .iter()
            .map(|id| CameraInfo {
                id: id.to_string(),
                driver: "scripted".into(),
                width: 2,
                height: 2,
            })
            .collect())
    }

    fn open(&self, device: &str) -> Result<Box<dyn FrameSource>, DeviceError> {
        note(&self.journal, format!("camera open {}", device));
        let frames = self.frames.lock().unwrap().take().unwrap_or_default();
        Ok(Box::new(ScriptedSource {
            frames,
            clock: self.clock.clone(),
            journal: self.journal.clone(),
        }))
    }
}

/// Detects a Grasshopper whenever the frame's first byte is 1.
struct PixelBackend {
    info: ModelInfo,
    journal: Journal,
}

impl InferenceBackend for PixelBackend {
    fn name(&self) -> &'static str {
        "pixel"
    }

    fn model_info(&self) -> &ModelInfo {
        &self.info
    }

    fn infer(&mut self, frame: &Frame) -> Result<DetectionResult, InferenceError> {
        let boxes = if frame.pixels()[0] == 1 {
            vec![pest_watch::BoundingBox {
                label: "Grasshopper".into(),
                confidence: 0.9,
                x: 0,
                y: 0,
                width: 1,
                height: 1,
            }]
        } else {
            vec![]
        };
        Ok(DetectionResult::Detections(boxes))
    }

    fn stop(&mut self) {
        note(&self.journal, "engine stop");
    }
}

struct PixelModels {
    journal: Journal,
    fail: bool,
}

impl ModelLoader for PixelModels {
    fn load(&self, reference: &str) -> Result<Box<dyn InferenceBackend>, ModelLoadError> {
        if self.fail {
            return Err(ModelLoadError::NotFound(reference.into()));
        }
        note(&self.journal, "engine load");
        Ok(Box::new(PixelBackend {
            info: ModelInfo {
                owner: "tester".into(),
                project: "pixels".into(),
                labels: vec!["Grasshopper".into()],
                input_width: 2,
                input_height: 2,
                channels: 3,
                kind: ModelKind::ObjectDetection,
            },
            journal: self.journal.clone(),
        }))
    }
}

struct Rig {
    journal: Journal,
    clock: Arc<ManualClock>,
    parts: Collaborators,
}

fn rig(ids: Vec<&'static str>, frames: Vec<Result<Option<u8>, ()>>, model_fails: bool) -> Rig {
    let journal: Journal = Arc::new(Mutex::new(Vec::new()));
    let clock = Arc::new(ManualClock::new(0));
    let alert = JournalPin {
        name: "alert",
        pin: 27,
        level: false,
        journal: journal.clone(),
    };
    let trigger = JournalPin {
        name: "trigger",
        pin: 17,
        level: false,
        journal: journal.clone(),
    };
    let actuator = AlertActuator::new(Box::new(alert), clock.clone(), 5_000).unwrap();
    let parts = Collaborators {
        cameras: Box::new(ScriptedCameras {
            ids,
            frames: Mutex::new(Some(frames)),
            clock: clock.clone(),
            journal: journal.clone(),
        }),
        models: Box::new(PixelModels {
            journal: journal.clone(),
            fail: model_fails,
        }),
        actuator,
        trigger: Some(Box::new(trigger)),
    };
    Rig {
        journal,
        clock,
        parts,
    }
}

fn runner(clock: Arc<ManualClock>, cancel: CancelToken) -> Runner {
    Runner::new(
        "pixels.eim",
        None,
        100,
        AlertPolicy::default(),
        clock,
        cancel,
    )
}

fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

/// Entries after the last "camera close" or, without a camera, after setup.
fn tail(journal: &Journal, from: &str) -> Vec<String> {
    let all = entries(journal);
    let start = all.iter().rposition(|e| e == from).unwrap_or(0);
    all[start..].to_vec()
}

#[test]
fn end_of_stream_cleans_up_in_order() {
    let rig = rig(vec!["scripted0"], vec![Ok(Some(0)), Ok(Some(1)), Ok(Some(0))], false);
    let report = runner(rig.clock.clone(), CancelToken::new())
        .run(rig.parts)
        .unwrap();

    assert_eq!(report.device, "scripted0");
    assert_eq!(report.project, "pixels");
    assert_eq!(report.loop_report.exit, LoopExit::EndOfStream);
    assert_eq!(report.loop_report.frames, 2);
    assert_eq!(report.alerts, 1);

    assert_eq!(
        tail(&rig.journal, "camera close"),
        vec![
            "camera close",
            "alert low",
            "alert low",
            "alert release",
            "trigger release",
            "engine stop",
        ]
    );
    let all = entries(&rig.journal);
    assert!(all.contains(&"alert high".to_string()));
    assert!(all.contains(&"trigger read".to_string()));
}

#[test]
fn zero_cameras_fails_with_line_low_and_released() {
    let rig = rig(vec![], vec![], false);
    let err = runner(rig.clock.clone(), CancelToken::new())
        .run(rig.parts)
        .unwrap_err();
    assert!(matches!(err, Error::Device(DeviceError::NotFound)));

    let all = entries(&rig.journal);
    assert!(!all.iter().any(|e| e.starts_with("camera")));
    assert_eq!(
        &all[all.len() - 4..],
        ["alert low", "alert release", "trigger release", "engine stop"]
    );
}

#[test]
fn multiple_cameras_without_device_is_ambiguous() {
    let rig = rig(vec!["scripted0", "scripted1"], vec![], false);
    let err = runner(rig.clock.clone(), CancelToken::new())
        .run(rig.parts)
        .unwrap_err();
    match err {
        Error::Device(DeviceError::Ambiguous(ids)) => {
            assert_eq!(ids, vec!["scripted0", "scripted1"])
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn model_load_failure_still_releases_lines() {
    let rig = rig(vec!["scripted0"], vec![Ok(Some(0))], true);
    let err = runner(rig.clock.clone(), CancelToken::new())
        .run(rig.parts)
        .unwrap_err();
    assert!(matches!(err, Error::ModelLoad(ModelLoadError::NotFound(_))));
    let all = entries(&rig.journal);
    assert_eq!(all.last().map(String::as_str), Some("trigger release"));
    assert!(!all.iter().any(|e| e == "engine stop" || e.starts_with("camera")));
}

#[test]
fn missing_warm_up_frame_is_init_failure() {
    let rig = rig(vec!["scripted0"], vec![Ok(None)], false);
    let err = runner(rig.clock.clone(), CancelToken::new())
        .run(rig.parts)
        .unwrap_err();
    assert!(matches!(err, Error::Device(DeviceError::InitFailed { .. })));
    assert_eq!(
        tail(&rig.journal, "camera close"),
        vec![
            "camera close",
            "alert low",
            "alert low",
            "alert release",
            "trigger release",
            "engine stop",
        ]
    );
}

#[test]
fn capture_failure_mid_run_drops_active_alert() {
    let rig = rig(vec!["scripted0"], vec![Ok(Some(0)), Ok(Some(1)), Err(())], false);
    let err = runner(rig.clock.clone(), CancelToken::new())
        .run(rig.parts)
        .unwrap_err();
    assert!(matches!(err, Error::Device(DeviceError::Capture { .. })));

    let all = entries(&rig.journal);
    let high = all.iter().position(|e| e == "alert high").unwrap();
    let close = all.iter().position(|e| e == "camera close").unwrap();
    assert!(high < close);
    assert_eq!(all[close + 1], "alert low");
    // Well inside the hold window: cleanup, not expiry, dropped the line.
    assert!(rig.clock.now_ms() < 5_000);
}

#[test]
fn cancellation_exits_cleanly() {
    let cancel = CancelToken::new();
    let rig = rig(vec!["scripted0"], vec![Ok(Some(0)); 10], false);
    cancel.cancel();
    let report = runner(rig.clock.clone(), cancel).run(rig.parts).unwrap();
    assert_eq!(report.loop_report.exit, LoopExit::Cancelled);
    assert_eq!(report.loop_report.frames, 0);
    assert_eq!(
        tail(&rig.journal, "camera close")[..2],
        ["camera close", "alert low"]
    );
}

#[test]
fn memory_pins_end_low_and_released() {
    let clock = Arc::new(ManualClock::new(0));
    let (alert, alert_probe) = MemoryPin::new(27);
    let (trigger, trigger_probe) = MemoryPin::new(17);
    let actuator = AlertActuator::new(Box::new(alert), clock.clone(), 5_000).unwrap();
    let journal: Journal = Arc::new(Mutex::new(Vec::new()));
    let parts = Collaborators {
        cameras: Box::new(ScriptedCameras {
            ids: vec!["scripted0"],
            frames: Mutex::new(Some(vec![Ok(Some(0)), Ok(Some(1))])),
            clock: clock.clone(),
            journal: journal.clone(),
        }),
        models: Box::new(PixelModels {
            journal,
            fail: false,
        }),
        actuator,
        trigger: Some(Box::new(trigger)),
    };
    let report = runner(clock.clone(), CancelToken::new()).run(parts).unwrap();
    assert_eq!(report.alerts, 1);
    assert!(clock.now_ms() < 5_000);
    assert_eq!(alert_probe.writes().last(), Some(&false));
    assert!(alert_probe.is_released());
    assert!(trigger_probe.is_released());
}
