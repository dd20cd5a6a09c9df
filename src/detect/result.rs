use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;

/// Detector output before thresholding and clamping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub class_id: usize,
    pub confidence: f32,
    /// `[x1, y1, x2, y2]` as fractions of frame width and height
    pub bbox: [f32; 4],
}

/// Pixel box, inclusive corners, always inside the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BoundingBox {
    /// Scale a normalized box to `width x height` and clamp each corner to
    /// `0..=width-1` / `0..=height-1`.
    pub fn from_normalized(bbox: [f32; 4], width: u32, height: u32) -> Self {
        let clamp = |v: f32, extent: u32| -> u32 {
            let max = extent.saturating_sub(1) as i64;
            // `as` saturates and maps NaN to 0
            ((v * extent as f32) as i64).clamp(0, max) as u32
        };
        Self {
            x1: clamp(bbox[0], width),
            y1: clamp(bbox[1], height),
            x2: clamp(bbox[2], width),
            y2: clamp(bbox[3], height),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
}

impl Detection {
    /// Text burned into the frame, e.g. `person: 0.87`
    pub fn caption(&self) -> String {
        format!("{}: {:.2}", self.label, self.confidence)
    }
}

/// Detections from one completed pass, in detector emission order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectionReport {
    pub count: usize,
    pub detections: Vec<Detection>,
}

impl DetectionReport {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            count: detections.len(),
            detections,
        }
    }

    /// Captions of the last `n` detections.
    pub fn recent_captions(&self, n: usize) -> Vec<String> {
        let skip = self.detections.len().saturating_sub(n);
        self.detections[skip..].iter().map(Detection::caption).collect()
    }
}

/// Most recent detection report, shared between publish loops and slower pollers.
///
/// Replaced whole after every successful pass, never cleared; readers get a copy.
#[derive(Clone)]
pub struct LatestDetections {
    slot: Arc<ArcSwap<DetectionReport>>,
}

impl LatestDetections {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(ArcSwap::from_pointee(DetectionReport::default())),
        }
    }

    pub fn publish(&self, report: DetectionReport) {
        self.slot.store(Arc::new(report));
    }

    pub fn snapshot(&self) -> DetectionReport {
        DetectionReport::clone(&self.slot.load())
    }

    pub fn count(&self) -> usize {
        self.slot.load().count
    }
}

impl Default for LatestDetections {
    fn default() -> Self {
        Self::new()
    }
}
