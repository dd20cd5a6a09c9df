mod backend;
mod overlay;
mod result;
pub(crate) mod stage;

pub use backend::{ClassTable, Detector, DetectorInput, InputSpec};
pub use overlay::draw_detection;
pub use result::{BoundingBox, Detection, DetectionReport, LatestDetections, RawDetection};
pub use stage::{Annotated, DetectionStage, DetectionToggle};
