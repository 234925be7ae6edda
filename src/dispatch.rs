//! Result interpretation and alert policy.
//!
//! `ResultDispatcher` turns one `DetectionResult` into a `Summary` and, for
//! box results, raises the alert for every qualifying box. Classification
//! results never touch the alert line. The summary is plain data; printing
//! it is left to the caller.

use std::fmt;

use crate::alert::{AlertActuator, AlertPolicy};
use crate::detect::{BoundingBox, DetectionResult, LabelScore};
use crate::error::GpioError;

#[derive(Clone, Debug, PartialEq)]
pub struct BoxEntry {
    pub bbox: BoundingBox,
    /// Label and confidence met the alert policy.
    pub qualifying: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Summary {
    Classification {
        scores: Vec<LabelScore>,
    },
    Detections {
        boxes: Vec<BoxEntry>,
        /// A new alert pulse started while dispatching this result.
        alert_raised: bool,
    },
}

impl Summary {
    pub fn qualifying(&self) -> usize {
        match self {
            Summary::Classification { .. } => 0,
            Summary::Detections { boxes, .. } => boxes.iter().filter(|b| b.qualifying).count(),
        }
    }

    pub fn alert_raised(&self) -> bool {
        matches!(self, Summary::Detections { alert_raised: true, .. })
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Summary::Classification { scores } => {
                write!(f, "classification results:")?;
                for score in scores {
                    write!(f, " {}: {:.2}", score.label, score.score)?;
                }
                Ok(())
            }
            Summary::Detections { boxes, .. } => {
                write!(f, "found {} bounding boxes", boxes.len())?;
                for entry in boxes {
                    let b = &entry.bbox;
                    write!(
                        f,
                        "\n\t{} ({:.2}): x={} y={} w={} h={}",
                        b.label, b.confidence, b.x, b.y, b.width, b.height
                    )?;
                }
                Ok(())
            }
        }
    }
}

pub struct ResultDispatcher {
    policy: AlertPolicy,
}

impl ResultDispatcher {
    pub fn new(policy: AlertPolicy) -> Self {
        Self { policy }
    }

    pub fn dispatch(
        &self,
        result: DetectionResult,
        actuator: &mut AlertActuator,
    ) -> Result<Summary, GpioError> {
        match result {
            DetectionResult::Classification(scores) => Ok(Summary::Classification { scores }),
            DetectionResult::Detections(boxes) => {
                let mut alert_raised = false;
                let mut entries = Vec::with_capacity(boxes.len());
                for bbox in boxes {
                    let qualifying = self.policy.qualifies(&bbox);
                    if qualifying {
                        // Idempotent while a pulse is running.
                        alert_raised |= actuator.activate()?;
                    }
                    entries.push(BoxEntry { bbox, qualifying });
                }
                Ok(Summary::Detections {
                    boxes: entries,
                    alert_raised,
                })
            }
        }
    }
}
