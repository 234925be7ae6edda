use std::collections::HashMap;

/// Normalized output of one inference call.
///
/// The shape is decided once, at the backend boundary. An empty `Detections`
/// list is a valid "nothing found" result.
#[derive(Clone, Debug, PartialEq)]
pub enum DetectionResult {
    /// Scores over the model's full label set, in label-set order.
    Classification(Vec<LabelScore>),
    /// Bounding boxes in frame pixel space, in engine order.
    Detections(Vec<BoundingBox>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct LabelScore {
    pub label: String,
    pub score: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BoundingBox {
    pub label: String,
    pub confidence: f32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelKind {
    Classification,
    ObjectDetection,
}

/// Static description of a loaded model.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelInfo {
    pub owner: String,
    pub project: String,
    pub labels: Vec<String>,
    pub input_width: u32,
    pub input_height: u32,
    /// 1 (grayscale) or 3 (RGB).
    pub channels: u32,
    pub kind: ModelKind,
}

impl DetectionResult {
    /// Build a classification result over `labels`, each label exactly once.
    ///
    /// Labels the engine did not score get 0.0; scores for labels outside the
    /// label set are dropped.
    pub fn classification_over(labels: &[String], raw: &HashMap<String, f32>) -> Self {
        for extra in raw.keys().filter(|key| !labels.contains(key)) {
            log::debug!("dropping score for label {:?} outside the model label set", extra);
        }
        let mut seen: Vec<&str> = Vec::with_capacity(labels.len());
        let scores = labels
            .iter()
            .filter(|label| {
                if seen.contains(&label.as_str()) {
                    false
                } else {
                    seen.push(label.as_str());
                    true
                }
            })
            .map(|label| LabelScore {
                label: label.clone(),
                score: raw.get(label).copied().unwrap_or(0.0),
            })
            .collect();
        DetectionResult::Classification(scores)
    }
}
