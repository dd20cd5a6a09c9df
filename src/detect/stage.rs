use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use image::RgbImage;
use metrics::gauge;
use tracing::{debug, instrument};

use super::backend::{Detector, DetectorInput};
use super::overlay::draw_detection;
use super::result::{BoundingBox, Detection, DetectionReport, LatestDetections};
use crate::capture::{PixelFormat, RasterFrame};
use crate::error::DetectError;

/// Runtime on/off switch shared with the delivery surface.
#[derive(Debug, Clone)]
pub struct DetectionToggle(Arc<AtomicBool>);

impl DetectionToggle {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Relaxed);
    }

    /// Flip the switch and return the new state.
    pub fn toggle(&self) -> bool {
        !self.0.fetch_xor(true, Ordering::Relaxed)
    }
}

/// Output of one detection pass.
#[derive(Debug, Clone)]
pub struct Annotated {
    pub frame: RasterFrame,
    pub detections: Vec<Detection>,
    pub count: usize,
}

impl Annotated {
    fn passthrough(frame: RasterFrame) -> Self {
        Self {
            frame,
            detections: Vec::new(),
            count: 0,
        }
    }
}

/// Frame to (annotated frame, detections) transform.
///
/// Without a detector, with the toggle off, or for non-color frames this is
/// the identity. Detector failures count as "nothing detected" and leave the
/// last published report in place.
pub struct DetectionStage {
    detector: Option<Arc<dyn Detector>>,
    toggle: DetectionToggle,
    threshold: f32,
    latest: LatestDetections,
}

impl DetectionStage {
    pub fn new(
        detector: Option<Arc<dyn Detector>>,
        toggle: DetectionToggle,
        threshold: f32,
        latest: LatestDetections,
    ) -> Self {
        Self {
            detector,
            toggle,
            threshold,
            latest,
        }
    }

    /// A stage with no detector. Always the identity.
    pub fn disabled() -> Self {
        Self::new(None, DetectionToggle::new(false), 0.5, LatestDetections::new())
    }

    pub fn toggle(&self) -> &DetectionToggle {
        &self.toggle
    }

    pub fn latest(&self) -> &LatestDetections {
        &self.latest
    }

    pub fn is_active(&self) -> bool {
        self.detector.is_some() && self.toggle.is_enabled()
    }

    #[instrument(level = "trace", skip_all, fields(sequence = frame.sequence()))]
    pub fn detect(&self, frame: RasterFrame) -> Annotated {
        let detector = match &self.detector {
            Some(detector) if self.toggle.is_enabled() => detector,
            _ => return Annotated::passthrough(frame),
        };
        if frame.format() != PixelFormat::Rgb24 {
            return Annotated::passthrough(frame);
        }

        match self.try_detect(detector.as_ref(), &frame) {
            Ok(annotated) => {
                self.latest
                    .publish(DetectionReport::new(annotated.detections.clone()));
                gauge!("periscope_detections").set(annotated.count as f64);
                annotated
            }
            Err(e) => {
                debug!("Detector {} failed, treating as no detections: {}", detector.name(), e);
                Annotated::passthrough(frame)
            }
        }
    }

    /// One detection pass with failures reported instead of swallowed.
    pub fn try_detect(
        &self,
        detector: &dyn Detector,
        frame: &RasterFrame,
    ) -> Result<Annotated, DetectError> {
        let input = DetectorInput::from_frame(frame, &detector.input_spec())?;
        let raw = detector.detect(&input)?;

        let (width, height) = (frame.width(), frame.height());
        let classes = detector.classes();
        let detections: Vec<Detection> = raw
            .iter()
            .filter(|r| r.confidence > self.threshold)
            .map(|r| Detection {
                label: classes.label(r.class_id).into_owned(),
                confidence: r.confidence,
                bbox: BoundingBox::from_normalized(r.bbox, width, height),
            })
            .collect();

        if detections.is_empty() {
            return Ok(Annotated::passthrough(frame.clone()));
        }

        // Burn-in works on a private copy; the stored frame is never touched
        let mut image = RgbImage::from_raw(width, height, frame.data.to_vec())
            .ok_or_else(|| DetectError::Input("sample buffer shorter than frame".into()))?;
        for detection in &detections {
            draw_detection(&mut image, detection);
        }

        let count = detections.len();
        Ok(Annotated {
            frame: RasterFrame {
                data: Bytes::from(image.into_raw()),
                meta: frame.meta.clone(),
                timestamp: frame.timestamp,
            },
            detections,
            count,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::detect::{ClassTable, InputSpec, RawDetection};
    use std::sync::atomic::AtomicUsize;

    /// Returns the same detections on every call.
    pub(crate) struct ScriptedDetector {
        pub raw: Vec<RawDetection>,
        pub classes: ClassTable,
        pub calls: AtomicUsize,
    }

    impl ScriptedDetector {
        pub(crate) fn new(raw: Vec<RawDetection>) -> Self {
            Self {
                raw,
                classes: ClassTable::new(["background", "person", "fish"]),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Detector for ScriptedDetector {
        fn name(&self) -> &str {
            "scripted"
        }

        fn input_spec(&self) -> InputSpec {
            InputSpec {
                width: 32,
                height: 32,
                ..InputSpec::default()
            }
        }

        fn classes(&self) -> &ClassTable {
            &self.classes
        }

        fn detect(&self, _input: &DetectorInput) -> Result<Vec<RawDetection>, DetectError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(self.raw.clone())
        }
    }

    struct FailingDetector(ClassTable);

    impl Detector for FailingDetector {
        fn name(&self) -> &str {
            "failing"
        }

        fn input_spec(&self) -> InputSpec {
            InputSpec::default()
        }

        fn classes(&self) -> &ClassTable {
            &self.0
        }

        fn detect(&self, _input: &DetectorInput) -> Result<Vec<RawDetection>, DetectError> {
            Err(DetectError::Backend("model exploded".into()))
        }
    }

    fn gray_frame(width: u32, height: u32) -> RasterFrame {
        RasterFrame::rgb(width, height, vec![128u8; (width * height * 3) as usize])
    }

    fn stage_with(detector: Arc<dyn Detector>) -> DetectionStage {
        DetectionStage::new(
            Some(detector),
            DetectionToggle::new(true),
            0.5,
            LatestDetections::new(),
        )
    }

    fn raw(class_id: usize, confidence: f32, bbox: [f32; 4]) -> RawDetection {
        RawDetection {
            class_id,
            confidence,
            bbox,
        }
    }

    #[test]
    fn toggle_flips_and_reports_state() {
        let toggle = DetectionToggle::new(true);
        assert!(!toggle.toggle());
        assert!(!toggle.is_enabled());
        assert!(toggle.toggle());
        toggle.set(false);
        assert!(!toggle.is_enabled());
    }

    #[test]
    fn disabled_stage_is_identity() {
        let detector = Arc::new(ScriptedDetector::new(vec![raw(1, 0.9, [0.1, 0.1, 0.5, 0.5])]));
        let stage = stage_with(detector.clone());
        stage.toggle().set(false);

        let frame = gray_frame(64, 48);
        let out = stage.detect(frame.clone());
        assert_eq!(out.frame.data, frame.data);
        assert!(out.detections.is_empty());
        assert_eq!(out.count, 0);
        assert_eq!(detector.calls.load(Ordering::Relaxed), 0);
        assert_eq!(stage.latest().count(), 0);

        let out = DetectionStage::disabled().detect(frame.clone());
        assert_eq!(out.frame.data, frame.data);
        assert_eq!(out.count, 0);
    }

    #[test]
    fn low_confidence_detections_are_filtered() {
        let stage = stage_with(Arc::new(ScriptedDetector::new(vec![
            raw(1, 0.5, [0.1, 0.1, 0.5, 0.5]),
            raw(2, 0.51, [0.2, 0.2, 0.6, 0.6]),
            raw(1, 0.3, [0.0, 0.0, 1.0, 1.0]),
        ])));
        let out = stage.detect(gray_frame(100, 100));
        assert_eq!(out.count, 1);
        assert_eq!(out.detections[0].label, "fish");
        assert_eq!(out.detections[0].bbox.x1, 20);
    }

    #[test]
    fn box_beyond_frame_is_clamped() {
        let stage = stage_with(Arc::new(ScriptedDetector::new(vec![raw(
            1,
            0.9,
            [0.5, 0.25, 1.4, 0.75],
        )])));
        let out = stage.detect(gray_frame(64, 48));
        let bbox = out.detections[0].bbox;
        assert_eq!(bbox.x2, 63);
        assert_eq!((bbox.x1, bbox.y1, bbox.y2), (32, 12, 36));
        // Right edge of the box is burned in at the clamped column
        let row = 24usize;
        let offset = (row * 64 + 63) * 3;
        assert_eq!(&out.frame.data[offset..offset + 3], &[0, 255, 0]);
    }

    #[test]
    fn annotation_does_not_touch_input() {
        let stage = stage_with(Arc::new(ScriptedDetector::new(vec![raw(
            1,
            0.9,
            [0.1, 0.1, 0.9, 0.9],
        )])));
        let frame = gray_frame(64, 64);
        let out = stage.detect(frame.clone());
        assert_ne!(out.frame.data, frame.data);
        assert!(frame.data.iter().all(|&b| b == 128));
        assert_eq!(out.frame.meta, frame.meta);
    }

    #[test]
    fn unknown_class_gets_numeric_label() {
        let stage = stage_with(Arc::new(ScriptedDetector::new(vec![raw(
            90,
            0.8,
            [0.0, 0.0, 0.5, 0.5],
        )])));
        let out = stage.detect(gray_frame(32, 32));
        assert_eq!(out.detections[0].label, "Class90");
    }

    #[test]
    fn successful_pass_updates_latest_report() {
        let stage = stage_with(Arc::new(ScriptedDetector::new(vec![
            raw(1, 0.9, [0.0, 0.0, 0.5, 0.5]),
            raw(2, 0.7, [0.5, 0.5, 1.0, 1.0]),
        ])));
        stage.detect(gray_frame(32, 32));
        let report = stage.latest().snapshot();
        assert_eq!(report.count, 2);
        assert_eq!(report.recent_captions(10), vec!["person: 0.90", "fish: 0.70"]);
    }

    #[test]
    fn detector_failure_is_no_detections() {
        let latest = LatestDetections::new();
        latest.publish(DetectionReport::new(vec![Detection {
            label: "person".into(),
            confidence: 0.9,
            bbox: BoundingBox {
                x1: 0,
                y1: 0,
                x2: 1,
                y2: 1,
            },
        }]));
        let stage = DetectionStage::new(
            Some(Arc::new(FailingDetector(ClassTable::default()))),
            DetectionToggle::new(true),
            0.5,
            latest.clone(),
        );

        let frame = gray_frame(16, 16);
        let out = stage.detect(frame.clone());
        assert_eq!(out.frame.data, frame.data);
        assert_eq!(out.count, 0);
        // Previous report survives a failed pass
        assert_eq!(latest.count(), 1);

        let detector = FailingDetector(ClassTable::default());
        assert!(matches!(
            stage.try_detect(&detector, &frame),
            Err(DetectError::Backend(_))
        ));
    }

    #[test]
    fn depth_frames_pass_through() {
        let detector = Arc::new(ScriptedDetector::new(vec![raw(1, 0.9, [0.0, 0.0, 1.0, 1.0])]));
        let stage = stage_with(detector.clone());
        let out = stage.detect(RasterFrame::depth(2, 2, &[1, 2, 3, 4]));
        assert_eq!(out.count, 0);
        assert_eq!(detector.calls.load(Ordering::Relaxed), 0);
    }
}
