//! Edge Impulse Linux model runner backend.
//!
//! An `.eim` file is a standalone executable. It is started with a socket
//! path as its only argument and then speaks JSON over that Unix socket:
//! requests are bare JSON objects, responses are JSON objects terminated by
//! a NUL byte. The backend performs the `hello` handshake once at load time
//! and one `classify` round trip per frame.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::detect::backend::InferenceBackend;
use crate::detect::preprocess::{fit_and_resize, pack_features, CropWindow};
use crate::detect::result::{BoundingBox, DetectionResult, ModelInfo, ModelKind};
use crate::error::{InferenceError, ModelLoadError};
use crate::frame::Frame;

const SOCKET_WAIT_ATTEMPTS: u32 = 100;
const SOCKET_WAIT_STEP: Duration = Duration::from_millis(50);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

static SOCKET_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Serialize)]
struct HelloRequest {
    hello: u32,
    id: u64,
}

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    classify: &'a [f32],
    id: u64,
}

#[derive(Debug, Deserialize)]
struct HelloResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    project: Option<ProjectInfo>,
    #[serde(default)]
    model_parameters: Option<ModelParameters>,
}

#[derive(Debug, Deserialize)]
struct ProjectInfo {
    #[serde(default)]
    owner: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct ModelParameters {
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    image_input_width: u32,
    #[serde(default)]
    image_input_height: u32,
    #[serde(default = "default_channels")]
    image_channel_count: u32,
    #[serde(default)]
    model_type: Option<String>,
}

fn default_channels() -> u32 {
    3
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    result: Option<RawResult>,
}

#[derive(Debug, Deserialize)]
struct RawResult {
    #[serde(default)]
    classification: Option<HashMap<String, f32>>,
    #[serde(default)]
    bounding_boxes: Option<Vec<RawBox>>,
}

#[derive(Debug, Deserialize)]
struct RawBox {
    label: String,
    value: f32,
    x: i64,
    y: i64,
    width: i64,
    height: i64,
}

/// Backend driving an Edge Impulse `.eim` model process.
pub struct EimBackend {
    child: Option<Child>,
    reader: BufReader<UnixStream>,
    writer: UnixStream,
    socket_dir: Option<PathBuf>,
    next_id: u64,
    info: ModelInfo,
}

impl EimBackend {
    /// Start the model runner at `path` and complete the handshake.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ModelLoadError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ModelLoadError::NotFound(path.to_path_buf()));
        }
        log_fingerprint(path);

        let socket_dir = std::env::temp_dir().join(format!(
            "pest-watch-{}-{}",
            std::process::id(),
            SOCKET_SEQ.fetch_add(1, Ordering::SeqCst)
        ));
        std::fs::create_dir_all(&socket_dir).map_err(|source| ModelLoadError::Spawn {
            path: socket_dir.clone(),
            source,
        })?;
        let socket_path = socket_dir.join("runner.sock");

        let mut child = Command::new(path)
            .arg(&socket_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|source| ModelLoadError::Spawn {
                path: path.to_path_buf(),
                source,
            })?;

        let connected = wait_for_socket(&mut child, &socket_path).and_then(Self::connect_with);
        let mut backend = match connected {
            Ok(backend) => backend,
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                let _ = std::fs::remove_dir_all(&socket_dir);
                return Err(err);
            }
        };
        backend.child = Some(child);
        backend.socket_dir = Some(socket_dir);
        Ok(backend)
    }

    /// Handshake over an already connected stream.
    pub(crate) fn connect_with(stream: UnixStream) -> Result<Self, ModelLoadError> {
        stream
            .set_read_timeout(Some(RESPONSE_TIMEOUT))
            .map_err(|e| ModelLoadError::Handshake(e.to_string()))?;
        let mut writer = stream
            .try_clone()
            .map_err(|e| ModelLoadError::Handshake(e.to_string()))?;
        let mut reader = BufReader::new(stream);

        send_json(&mut writer, &HelloRequest { hello: 1, id: 1 })
            .map_err(|e| ModelLoadError::Handshake(e.to_string()))?;
        let raw = read_message(&mut reader).map_err(|e| ModelLoadError::Handshake(e.to_string()))?;
        let hello: HelloResponse = serde_json::from_slice(&raw)
            .map_err(|e| ModelLoadError::Handshake(format!("invalid hello response: {}", e)))?;
        let info = model_info_from_hello(hello)?;

        Ok(Self {
            child: None,
            reader,
            writer,
            socket_dir: None,
            next_id: 2,
            info,
        })
    }

    fn round_trip(&mut self, features: &[f32]) -> Result<ClassifyResponse, InferenceError> {
        let id = self.next_id;
        self.next_id += 1;
        send_json(
            &mut self.writer,
            &ClassifyRequest {
                classify: features,
                id,
            },
        )?;
        let raw = read_message(&mut self.reader)?;
        serde_json::from_slice(&raw)
            .map_err(|e| InferenceError::MalformedResult(format!("invalid classify response: {}", e)))
    }
}

impl InferenceBackend for EimBackend {
    fn name(&self) -> &'static str {
        "eim"
    }

    fn model_info(&self) -> &ModelInfo {
        &self.info
    }

    fn infer(&mut self, frame: &Frame) -> Result<DetectionResult, InferenceError> {
        if let Some(child) = self.child.as_mut() {
            if let Ok(Some(status)) = child.try_wait() {
                log::error!("eim runner exited with {}", status);
                return Err(InferenceError::NotRunning);
            }
        }
        let (rgb, window) = fit_and_resize(frame, self.info.input_width, self.info.input_height)?;
        let features = pack_features(&rgb, self.info.channels);
        let response = self.round_trip(&features)?;
        convert_response(response, &self.info.labels, &window)
    }

    fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = self.writer.shutdown(std::net::Shutdown::Both);
            if let Err(err) = child.kill() {
                log::debug!("eim runner already exited: {}", err);
            }
            match child.wait() {
                Ok(status) => log::info!("eim runner stopped ({})", status),
                Err(err) => log::warn!("failed to reap eim runner: {}", err),
            }
        }
        if let Some(dir) = self.socket_dir.take() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}

impl Drop for EimBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

fn log_fingerprint(path: &Path) {
    match std::fs::read(path) {
        Ok(bytes) => log::info!(
            "model {} sha256={}",
            path.display(),
            hex::encode(Sha256::digest(&bytes))
        ),
        Err(err) => log::warn!("could not fingerprint model {}: {}", path.display(), err),
    }
}

fn wait_for_socket(child: &mut Child, socket_path: &Path) -> Result<UnixStream, ModelLoadError> {
    for _ in 0..SOCKET_WAIT_ATTEMPTS {
        if let Ok(Some(status)) = child.try_wait() {
            return Err(ModelLoadError::Handshake(format!(
                "model runner exited early ({})",
                status
            )));
        }
        if socket_path.exists() {
            if let Ok(stream) = UnixStream::connect(socket_path) {
                return Ok(stream);
            }
        }
        std::thread::sleep(SOCKET_WAIT_STEP);
    }
    Err(ModelLoadError::Handshake(format!(
        "model runner socket {} never became available",
        socket_path.display()
    )))
}

fn send_json<T: Serialize, W: Write>(writer: &mut W, message: &T) -> std::io::Result<()> {
    let bytes = serde_json::to_vec(message)?;
    writer.write_all(&bytes)?;
    writer.flush()
}

/// Read one NUL-terminated response.
fn read_message<R: Read>(reader: &mut BufReader<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let n = reader.read_until(0, &mut buf)?;
    if n == 0 || buf.last() != Some(&0) {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "model runner closed the connection",
        ));
    }
    buf.pop();
    Ok(buf)
}

fn model_info_from_hello(hello: HelloResponse) -> Result<ModelInfo, ModelLoadError> {
    if !hello.success {
        return Err(ModelLoadError::Handshake(
            hello.error.unwrap_or_else(|| "runner rejected hello".to_string()),
        ));
    }
    let params = hello
        .model_parameters
        .ok_or_else(|| ModelLoadError::Handshake("hello response has no model_parameters".into()))?;
    if params.image_input_width == 0 || params.image_input_height == 0 {
        return Err(ModelLoadError::Handshake(
            "model is not an image model (no image input size)".into(),
        ));
    }
    let kind = match params.model_type.as_deref() {
        Some(t) if t.contains("object_detection") => ModelKind::ObjectDetection,
        _ => ModelKind::Classification,
    };
    let project = hello.project.unwrap_or(ProjectInfo {
        owner: String::new(),
        name: String::new(),
    });
    Ok(ModelInfo {
        owner: project.owner,
        project: project.name,
        labels: params.labels,
        input_width: params.image_input_width,
        input_height: params.image_input_height,
        channels: if params.image_channel_count == 1 { 1 } else { 3 },
        kind,
    })
}

fn convert_response(
    response: ClassifyResponse,
    labels: &[String],
    window: &CropWindow,
) -> Result<DetectionResult, InferenceError> {
    if !response.success {
        return Err(InferenceError::Engine(
            response.error.unwrap_or_else(|| "classification failed".to_string()),
        ));
    }
    let result = response
        .result
        .ok_or_else(|| InferenceError::MalformedResult("response has no result".into()))?;
    match (result.classification, result.bounding_boxes) {
        (Some(scores), boxes) => {
            if boxes.is_some() {
                log::debug!("result carries both shapes; using classification");
            }
            Ok(DetectionResult::classification_over(labels, &scores))
        }
        (None, Some(boxes)) => Ok(DetectionResult::Detections(
            boxes
                .into_iter()
                .map(|b| {
                    window.to_frame(BoundingBox {
                        label: b.label,
                        confidence: b.value.clamp(0.0, 1.0),
                        x: b.x.max(0) as u32,
                        y: b.y.max(0) as u32,
                        width: b.width.max(0) as u32,
                        height: b.height.max(0) as u32,
                    })
                })
                .collect(),
        )),
        (None, None) => Err(InferenceError::MalformedResult(
            "result has neither classification nor bounding_boxes".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const HELLO_DETECTION: &str = r#"{
        "success": true, "id": 1,
        "project": {"owner": "Field Lab", "name": "Pest Detection", "id": 7},
        "model_parameters": {
            "labels": ["Beetle", "Grasshopper"],
            "image_input_width": 4, "image_input_height": 4,
            "image_channel_count": 3, "model_type": "constrained_object_detection"
        }
    }"#;

    fn write_reply<W: Write>(writer: &mut W, body: &str) {
        writer.write_all(body.as_bytes()).unwrap();
        writer.write_all(&[0]).unwrap();
    }

    fn read_request(reader: &mut UnixStream) -> serde_json::Value {
        // Requests are not delimited; read until a full JSON value parses.
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = reader.read(&mut chunk).unwrap();
            buf.extend_from_slice(&chunk[..n]);
            if let Ok(value) = serde_json::from_slice(&buf) {
                return value;
            }
        }
    }

    fn frame() -> Frame {
        Frame::new(vec![10u8; 8 * 4 * 3], 8, 4, 0)
    }

    #[test]
    fn handshake_and_detection_round_trip() {
        let (client, mut server) = UnixStream::pair().unwrap();
        let handle = thread::spawn(move || {
            let hello = read_request(&mut server);
            assert_eq!(hello["hello"], 1);
            write_reply(&mut server, HELLO_DETECTION);

            let classify = read_request(&mut server);
            assert_eq!(classify["id"], 2);
            assert_eq!(classify["classify"].as_array().unwrap().len(), 16);
            write_reply(
                &mut server,
                r#"{"success": true, "id": 2, "result": {"bounding_boxes": [
                    {"label": "Grasshopper", "value": 0.72, "x": 1, "y": 0, "width": 2, "height": 4}
                ]}}"#,
            );
        });

        let mut backend = EimBackend::connect_with(client).unwrap();
        assert_eq!(backend.model_info().owner, "Field Lab");
        assert_eq!(backend.model_info().kind, ModelKind::ObjectDetection);

        let result = backend.infer(&frame()).unwrap();
        handle.join().unwrap();

        // 8x4 frame cropped to a 4x4 window at x0=2, scale 1.
        assert_eq!(
            result,
            DetectionResult::Detections(vec![BoundingBox {
                label: "Grasshopper".into(),
                confidence: 0.72,
                x: 3,
                y: 0,
                width: 2,
                height: 4,
            }])
        );
    }

    #[test]
    fn engine_failure_is_an_inference_error() {
        let response: ClassifyResponse =
            serde_json::from_str(r#"{"success": false, "error": "bad input"}"#).unwrap();
        let window = CropWindow::fit_shortest(4, 4, 4, 4);
        match convert_response(response, &[], &window) {
            Err(InferenceError::Engine(msg)) => assert_eq!(msg, "bad input"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn result_without_a_shape_is_malformed() {
        let response: ClassifyResponse =
            serde_json::from_str(r#"{"success": true, "result": {"timing": {}}}"#).unwrap();
        let window = CropWindow::fit_shortest(4, 4, 4, 4);
        assert!(matches!(
            convert_response(response, &[], &window),
            Err(InferenceError::MalformedResult(_))
        ));
    }

    #[test]
    fn classification_is_normalized_to_label_set() {
        let response: ClassifyResponse = serde_json::from_str(
            r#"{"success": true, "result": {"classification": {"Grasshopper": 0.8}}}"#,
        )
        .unwrap();
        let labels = vec!["Beetle".to_string(), "Grasshopper".to_string()];
        let window = CropWindow::fit_shortest(4, 4, 4, 4);
        let result = convert_response(response, &labels, &window).unwrap();
        let DetectionResult::Classification(scores) = result else {
            panic!("expected classification");
        };
        assert_eq!(scores.len(), 2);
        assert_eq!(scores[0].score, 0.0);
        assert_eq!(scores[1].score, 0.8);
    }

    #[test]
    fn rejected_hello_fails_load() {
        let hello: HelloResponse =
            serde_json::from_str(r#"{"success": false, "error": "license expired"}"#).unwrap();
        assert!(matches!(
            model_info_from_hello(hello),
            Err(ModelLoadError::Handshake(msg)) if msg == "license expired"
        ));
    }

    #[test]
    fn closed_connection_is_eof() {
        let (client, server) = UnixStream::pair().unwrap();
        drop(server);
        let mut reader = BufReader::new(client);
        let err = read_message(&mut reader).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn missing_model_file_is_not_found() {
        assert!(matches!(
            EimBackend::load("/nonexistent/model.eim"),
            Err(ModelLoadError::NotFound(_))
        ));
    }
}
