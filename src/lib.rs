pub mod capture;
pub mod detect;
pub mod error;
pub mod pipeline;
pub mod pointcloud;
pub mod utils;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use capture::{FrameMetadata, PixelFormat, RasterFrame};
pub use detect::{Detection, DetectionStage, DetectionToggle, Detector, LatestDetections};
pub use pipeline::{FrameStore, StatsAggregator, StatsSnapshot, StreamPublisher};
pub use pointcloud::{Intrinsics, Point3D, ProjectionParams};

/// Environment variables override file values, e.g. `PERISCOPE__INGRESS__COLOR_PORT=6001`
pub const ENV_PREFIX: &str = "PERISCOPE";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ingress: IngressConfig,
    pub detection: DetectionConfig,
    pub point_cloud: PointCloudConfig,
    pub publisher: PublisherConfig,
    pub stats: StatsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngressConfig {
    pub bind_host: String,
    /// Length-prefixed JPEG stream (TCP)
    pub color_port: u16,
    /// Tagged depth datagrams (UDP)
    pub depth_port: u16,
    /// Receive timeout before the depth worker re-polls
    pub depth_poll_timeout_ms: u64,
    /// Upper bound on a declared payload size, both transports
    pub max_payload_bytes: u32,
    /// Largest datagram accepted in one receive
    pub datagram_buffer_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Initial state of the runtime toggle
    pub enabled: bool,
    /// Detections at or below this confidence are discarded
    pub confidence_threshold: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PointCloudConfig {
    /// Spatial decimation stride in pixels
    pub step: u32,
    pub min_depth_m: f32,
    /// Depth mapped to the top of the color ramp
    pub max_depth_m: f32,
    /// fx = fy; principal point is the frame center
    pub focal_length_px: f32,
    /// Consumer-side render cap
    pub point_cap: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub jpeg_quality: u8,
    pub empty_wait_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    pub fps_window_ms: u64,
    pub bandwidth_samples: usize,
    /// Frames older than this count as a dead feed
    pub stale_after_ms: u64,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".into(),
            color_port: 5001,
            depth_port: 5000,
            depth_poll_timeout_ms: 1000,
            max_payload_bytes: 5_000_000,
            datagram_buffer_bytes: 65_536,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            confidence_threshold: 0.5,
        }
    }
}

impl Default for PointCloudConfig {
    fn default() -> Self {
        Self {
            step: 4,
            min_depth_m: 0.1,
            max_depth_m: 5.0,
            focal_length_px: 525.0,
            point_cap: 2000,
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: 80,
            empty_wait_ms: 100,
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            fps_window_ms: 1000,
            bandwidth_samples: 30,
            stale_after_ms: 2000,
        }
    }
}

impl Config {
    /// Layer defaults, an optional TOML file and `PERISCOPE__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        // Missing keys fall back to `Default` through `#[serde(default)]`
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()
    }

    pub fn depth_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.ingress.depth_poll_timeout_ms)
    }

    pub fn empty_wait(&self) -> Duration {
        Duration::from_millis(self.publisher.empty_wait_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stats.stale_after_ms)
    }

    pub fn projection_params(&self) -> ProjectionParams {
        ProjectionParams {
            step: self.point_cloud.step,
            min_depth: self.point_cloud.min_depth_m,
            max_depth: self.point_cloud.max_depth_m,
        }
    }
}
