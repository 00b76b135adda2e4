mod classify;
mod error;
mod estimate;
mod render;
mod segmentation;
mod server;
mod session;

use anyhow::{Context, Result};
use clap::Parser;
use estimate::{EstimatorSettings, GeoAdminElevation};
use render::OverlayStyle;
use server::AppState;
use session::{SessionStore, StoreSettings};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:8000")]
    bind: String,

    /// SAM2 image encoder (ONNX file)
    #[arg(long)]
    sam_encoder: PathBuf,

    /// SAM2 prompt/mask decoder (ONNX file)
    #[arg(long)]
    sam_decoder: PathBuf,

    /// Avalanche / not-avalanche classifier (ONNX file)
    /// If not provided, /spamcheck answers 503
    #[arg(long)]
    spam_model: Option<PathBuf>,

    /// Avalanche-type classifier (ONNX file)
    /// If not provided, /checkavalanchetype answers 503
    #[arg(long)]
    type_model: Option<PathBuf>,

    /// ONNX Runtime intra-op threads per model
    #[arg(long, default_value_t = 4)]
    intra_threads: usize,

    /// Blend factor of the mask highlight
    #[arg(long, default_value_t = 0.5)]
    overlay_alpha: f32,

    /// Half-length of a prompt marker arm in pixels
    #[arg(long, default_value_t = 5)]
    marker_size: u32,

    /// Elevation service endpoint
    #[arg(long, default_value = "https://api3.geo.admin.ch/rest/services/height")]
    elevation_url: String,

    /// Timeout for one elevation request
    #[arg(long, default_value_t = 10)]
    elevation_timeout_secs: u64,

    /// Distance in metres between slope samples
    #[arg(long, default_value_t = 5.0)]
    steepness_offset: f64,

    /// Sessions idle for longer are evicted
    #[arg(long, default_value_t = 1800)]
    session_ttl_secs: u64,

    /// Write each mask as PNG under <dir>/<session>/ (disabled when unset)
    #[arg(long)]
    mask_cache_dir: Option<PathBuf>,

    /// Largest accepted upload in megabytes
    #[arg(long, default_value_t = 25)]
    max_upload_mb: usize,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("Avalanche locator starting");

    let segmenter = segmentation::create_default_model(&args.sam_encoder, &args.sam_decoder, args.intra_threads)
        .context("Failed to load SAM2 model")?;

    let spam_filter = match &args.spam_model {
        Some(path) => Some(
            classify::create_spam_filter(path, args.intra_threads)
                .context("Failed to load spam classifier")?,
        ),
        None => {
            tracing::info!("No spam model given; /spamcheck is disabled");
            None
        }
    };

    let type_classifier = match &args.type_model {
        Some(path) => Some(
            classify::create_type_classifier(path, args.intra_threads)
                .context("Failed to load avalanche type classifier")?,
        ),
        None => {
            tracing::info!("No avalanche type model given; /checkavalanchetype is disabled");
            None
        }
    };

    let elevation = GeoAdminElevation::new(
        args.elevation_url.as_str(),
        Duration::from_secs(args.elevation_timeout_secs),
    )?;
    tracing::info!("Elevation service: {}", args.elevation_url);

    let style = OverlayStyle {
        alpha: args.overlay_alpha.clamp(0.0, 1.0),
        marker_size: args.marker_size,
        ..OverlayStyle::default()
    };

    let store_settings = StoreSettings {
        idle_ttl: Duration::from_secs(args.session_ttl_secs),
        cache_root: args.mask_cache_dir.clone(),
    };
    match &store_settings.cache_root {
        Some(dir) => tracing::info!("Caching masks under {}", dir.display()),
        None => tracing::info!("Mask cache disabled"),
    }

    let sessions = Arc::new(SessionStore::new(segmenter, style, store_settings));
    let sweep_period = Duration::from_secs((args.session_ttl_secs / 4).clamp(1, 60));
    let _sweeper = sessions.spawn_sweeper(sweep_period);

    let state = AppState {
        sessions,
        spam_filter,
        type_classifier,
        elevation: Arc::new(elevation),
        estimator: EstimatorSettings {
            steepness_offset: args.steepness_offset,
        },
    };

    let app = server::router(state, args.max_upload_mb * 1024 * 1024);
    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("Failed to bind {}", args.bind))?;

    server::serve(listener, app).await
}
