//! Periscope ingest node: color and depth ingress with a headless monitor

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::WrapErr, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use periscope::capture::datagram::run_depth_ingress;
use periscope::capture::stream::run_color_ingress;
use periscope::capture::DatagramFrameReassembler;
use periscope::pipeline::Subscription;
use periscope::pointcloud::{project, sample_points};
use periscope::utils::{self, ShutdownSignal};
use periscope::{
    Config, DetectionStage, DetectionToggle, FrameStore, Intrinsics, LatestDetections,
    StatsAggregator, StreamPublisher,
};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("periscope=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Periscope launching...");

    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref()).wrap_err("loading configuration")?;
    debug!("Configuration: {:?}", config);

    let sockets = utils::bind_ingress(&config.ingress).await?;

    let color_store = FrameStore::new("color");
    let depth_store = FrameStore::new("depth");

    // No detector backend is linked into this binary; the stage stays a pass-through
    let latest = LatestDetections::new();
    let stage = Arc::new(DetectionStage::new(
        None,
        DetectionToggle::new(config.detection.enabled),
        config.detection.confidence_threshold,
        latest.clone(),
    ));
    if !stage.is_active() {
        info!("Object detection unavailable, publishing raw frames");
    }

    let stats = Arc::new(StatsAggregator::new(
        Duration::from_millis(config.stats.fps_window_ms),
        config.stats.bandwidth_samples,
    ));
    let publisher = StreamPublisher::new(
        color_store.clone(),
        stage.clone(),
        stats.clone(),
        config.publisher.jpeg_quality,
        config.empty_wait(),
    );

    let (trigger, shutdown) = utils::shutdown_channel();

    let color_handle = tokio::spawn(run_color_ingress(
        sockets.color,
        color_store.clone(),
        config.ingress.max_payload_bytes,
        shutdown.clone(),
    ));

    let depth_handle = {
        let socket = sockets.depth;
        let store = depth_store.clone();
        let config = config.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                let reassembler = DatagramFrameReassembler::new(config.ingress.max_payload_bytes);
                let result = run_depth_ingress(
                    &socket,
                    store.clone(),
                    reassembler,
                    config.depth_poll_timeout(),
                    config.ingress.datagram_buffer_bytes,
                    shutdown.clone(),
                )
                .await;
                match result {
                    Ok(()) => break,
                    Err(e) => {
                        error!("Depth ingress failed, restarting: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        })
    };

    // Headless consumer: keeps the publisher (and its stats) running
    let preview = publisher.subscribe();
    let monitor_handle = tokio::spawn(monitor(
        config,
        color_store,
        depth_store,
        stats,
        latest,
        preview,
        shutdown,
    ));

    tokio::signal::ctrl_c().await.wrap_err("waiting for Ctrl-C")?;
    info!("Shutting down");
    trigger.trigger();

    for (name, handle) in [
        ("color ingress", color_handle),
        ("depth ingress", depth_handle),
        ("monitor", monitor_handle),
    ] {
        if let Err(e) = handle.await {
            warn!("{} task ended abnormally: {}", name, e);
        }
    }

    info!("Periscope stopped");
    Ok(())
}

/// Drain preview chunks and log a summary once per second.
async fn monitor(
    config: Config,
    color_store: FrameStore,
    depth_store: FrameStore,
    stats: Arc<StatsAggregator>,
    latest: LatestDetections,
    preview: Subscription,
    mut shutdown: ShutdownSignal,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let params = config.projection_params();
    let mut rng = StdRng::from_entropy();

    loop {
        tokio::select! {
            chunk = preview.recv() => match chunk {
                Some(chunk) => debug!("Preview chunk: {} bytes", chunk.len()),
                None => break,
            },
            _ = ticker.tick() => {
                let snapshot = stats.snapshot();
                let (color_written, _) = color_store.stats();
                let (depth_written, _) = depth_store.stats();
                info!(
                    "Color: {} fps, {:.1} KB/s avg ({} frames) | depth frames: {}",
                    snapshot.frames_per_second,
                    snapshot.average_bandwidth_kbps,
                    color_written,
                    depth_written,
                );

                let report = latest.snapshot();
                if report.count > 0 {
                    info!("Detections ({}): {}", report.count, report.recent_captions(10).join(", "));
                }

                match depth_store.read_fresh(config.stale_after()) {
                    Some(depth) => {
                        let intrinsics = Intrinsics::centered(
                            depth.width(),
                            depth.height(),
                            config.point_cloud.focal_length_px,
                        );
                        match project(&depth, &intrinsics, &params) {
                            Ok(points) => {
                                let shown = sample_points(&points, config.point_cloud.point_cap, &mut rng);
                                info!("Point cloud: {} points, {} rendered", points.len(), shown.len());
                            }
                            Err(e) => warn!("Point cloud projection failed: {}", e),
                        }
                    }
                    None => debug!("No fresh depth frame"),
                }
            }
            _ = shutdown.wait() => break,
        }
    }
    info!("Monitor stopped");
}
