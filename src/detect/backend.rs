use std::borrow::Cow;
use std::path::Path;

use image::imageops::{self, FilterType};
use image::RgbImage;

use super::result::RawDetection;
use crate::capture::{PixelFormat, RasterFrame};
use crate::error::DetectError;

/// Injected object detector.
///
/// The model format and how it is invoked stay behind this trait. Detectors
/// are shared by every publish loop, so `detect` takes `&self`.
pub trait Detector: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &str;

    /// Input size and normalization the model expects.
    fn input_spec(&self) -> InputSpec;

    /// Class index to label table.
    fn classes(&self) -> &ClassTable;

    /// Run the model. Boxes are normalized to `0..1` of the input frame.
    fn detect(&self, input: &DetectorInput) -> Result<Vec<RawDetection>, DetectError>;
}

/// Model input geometry and normalization: `(sample - mean) * scale`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputSpec {
    pub width: u32,
    pub height: u32,
    pub mean: f32,
    pub scale: f32,
    /// Feed channels as B G R
    pub swap_rb: bool,
}

impl Default for InputSpec {
    fn default() -> Self {
        Self {
            width: 300,
            height: 300,
            mean: 127.5,
            scale: 1.0,
            swap_rb: false,
        }
    }
}

/// Planar CHW tensor resized from a color frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorInput {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

impl DetectorInput {
    pub fn from_frame(frame: &RasterFrame, spec: &InputSpec) -> Result<Self, DetectError> {
        if frame.format() != PixelFormat::Rgb24 {
            return Err(DetectError::Input(format!(
                "expected rgb frame, got {:?}",
                frame.format()
            )));
        }
        if spec.width == 0 || spec.height == 0 {
            return Err(DetectError::Input("zero-sized model input".into()));
        }
        let image = RgbImage::from_raw(frame.width(), frame.height(), frame.data.to_vec())
            .ok_or_else(|| DetectError::Input("sample buffer shorter than frame".into()))?;
        let resized = if image.dimensions() == (spec.width, spec.height) {
            image
        } else {
            imageops::resize(&image, spec.width, spec.height, FilterType::Triangle)
        };

        let plane = (spec.width * spec.height) as usize;
        let mut data = vec![0f32; plane * 3];
        for (i, pixel) in resized.pixels().enumerate() {
            for c in 0..3 {
                let source = if spec.swap_rb { 2 - c } else { c };
                data[c * plane + i] = (pixel[source] as f32 - spec.mean) * spec.scale;
            }
        }

        Ok(Self {
            width: spec.width,
            height: spec.height,
            data,
        })
    }
}

/// Class labels indexed by class id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassTable {
    labels: Vec<String>,
}

impl ClassTable {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    /// One label per line, line number = class id. Surrounding whitespace is
    /// trimmed; blank lines stay as empty labels so later ids keep their index.
    pub fn from_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::new(text.lines().map(str::trim)))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Label for `class_id`, or `Class{id}` when out of range.
    pub fn label(&self, class_id: usize) -> Cow<'_, str> {
        match self.labels.get(class_id) {
            Some(label) => Cow::Borrowed(label),
            None => Cow::Owned(format!("Class{class_id}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn label_falls_back_to_index() {
        let classes = ClassTable::new(["background", "person"]);
        assert_eq!(classes.label(1), "person");
        assert_eq!(classes.label(7), "Class7");
    }

    #[test]
    fn loads_labels_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "background\n person \n\nbicycle").unwrap();
        let classes = ClassTable::from_file(file.path()).unwrap();
        assert_eq!(classes.len(), 4);
        assert_eq!(classes.label(1), "person");
        assert_eq!(classes.label(2), "");
        assert_eq!(classes.label(3), "bicycle");
        assert_eq!(classes.label(4), "Class4");
    }

    #[test]
    fn blank_lines_keep_class_ids_aligned() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "background\n\nperson\n").unwrap();
        let classes = ClassTable::from_file(file.path()).unwrap();
        assert_eq!(classes.len(), 3);
        assert_eq!(classes.label(1), "");
        assert_eq!(classes.label(2), "person");
    }

    #[test]
    fn input_is_planar_and_normalized() {
        // Two pixels: pure red, pure blue
        let frame = RasterFrame::rgb(2, 1, vec![255u8, 0, 0, 0, 0, 255]);
        let spec = InputSpec {
            width: 2,
            height: 1,
            mean: 128.0,
            scale: 0.5,
            swap_rb: false,
        };
        let input = DetectorInput::from_frame(&frame, &spec).unwrap();
        assert_eq!(input.data, vec![63.5, -64.0, -64.0, -64.0, -64.0, 63.5]);

        let swapped = DetectorInput::from_frame(&frame, &InputSpec { swap_rb: true, ..spec }).unwrap();
        assert_eq!(swapped.data, vec![-64.0, 63.5, -64.0, -64.0, 63.5, -64.0]);
    }

    #[test]
    fn input_is_resized_to_model_size() {
        let frame = RasterFrame::rgb(8, 4, vec![127u8; 8 * 4 * 3]);
        let input = DetectorInput::from_frame(&frame, &InputSpec::default()).unwrap();
        assert_eq!((input.width, input.height), (300, 300));
        assert_eq!(input.data.len(), 300 * 300 * 3);
    }

    #[test]
    fn depth_frames_are_not_detector_input() {
        let frame = RasterFrame::depth(1, 1, &[1000]);
        assert!(DetectorInput::from_frame(&frame, &InputSpec::default()).is_err());
    }
}
