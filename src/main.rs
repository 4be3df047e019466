//! Weather wake-light server
//!
//! Loads the LED layout, starts the animator thread and serves the HTTP
//! trigger API. A scheduler (cron, a home automation hub) posts to
//! `/api/v1/fade/start` with today's weather and the strip fades in.
//!
//! ## Architecture
//! - **Animator thread** (std::thread): owns the output sink, ticks the fade
//! - **HTTP server** (tokio/axum): renders target frames, starts and cancels fades
//!
//! ## Rust concepts
//! - `#[tokio::main]` async entry point
//! - clap derive with custom `value_parser` functions
//! - `Box<dyn Trait>` to pick the output sink at runtime
//! - Graceful shutdown driven by an `AtomicBool` polled from async code
//!
//! ## Usage
//! ```sh
//! ./target/release/weather-wakelight --layout leds.csv --media-dir /srv/wakelight \
//!     --output /dev/spidev0.0 --port 8080
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use weather_wakelight::animator::{
    self, AnimatorConfig, CancelPolicy, DEFAULT_DITHER_BATCH, FadeController, FadeTimings,
};
use weather_wakelight::colorize::{self, ColorizerConfig};
use weather_wakelight::layout::CoordinateSpace;
use weather_wakelight::partition::PartitionCache;
use weather_wakelight::render::{FrameCache, Renderer};
use weather_wakelight::server::{self, AppState};
use weather_wakelight::sink::{FrameSink, LogSink, OutputSink, StreamSink};
use weather_wakelight::weather::WeatherImages;
use weather_wakelight::{is_running, setup_signal_handler};

/// Weather wake-light HTTP server
#[derive(Parser)]
#[command(name = "weather-wakelight")]
#[command(about = "Fades a weather image onto an LED strip as a wake-up light")]
#[command(version)]
struct Args {
    /// CSV file with one x,y position per LED, in wiring order
    #[arg(long, default_value = "leds.csv")]
    layout: PathBuf,

    /// How layout coordinates relate to image pixels
    #[arg(long, value_enum, default_value_t = CoordinateSpace::Pixels)]
    space: CoordinateSpace,

    /// Root directory containing an images/ subdirectory
    #[arg(long, default_value = ".")]
    media_dir: PathBuf,

    /// Directory for cached target frames (disabled when not set)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Device or file receiving raw RGB frames (frames are only logged when not set)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Port to listen on
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Animator tick interval in milliseconds
    #[arg(long, default_value = "50")]
    tick_ms: u64,

    /// LEDs advanced per tick
    #[arg(long, default_value_t = DEFAULT_DITHER_BATCH)]
    dither_batch: usize,

    /// What the strip shows after a cancel
    #[arg(long, value_enum, default_value_t = CancelPolicy::Black)]
    cancel_policy: CancelPolicy,

    /// Color clusters per LED region
    #[arg(long, default_value_t = colorize::DEFAULT_CLUSTERS)]
    clusters: usize,

    /// Seed for clustering and dither order
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Default fade-in length in seconds
    #[arg(long, default_value = "1200", value_parser = parse_secs)]
    fade_in: Duration,

    /// Default hold length in seconds
    #[arg(long, default_value = "1200", value_parser = parse_secs)]
    hold: Duration,

    /// Default fade-out length in seconds
    #[arg(long, default_value = "600", value_parser = parse_secs)]
    fade_out: Duration,

    /// Extra weather mapping, e.g. `--weather Mist=fog.jpg` (repeatable)
    #[arg(long = "weather", value_parser = parse_weather_entry)]
    weather_entries: Vec<(String, String)>,
}

fn parse_secs(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|e| format!("{e}"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("{e}"))
}

fn parse_weather_entry(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((condition, file)) if !condition.trim().is_empty() && !file.trim().is_empty() => {
            Ok((condition.trim().to_string(), file.trim().to_string()))
        }
        _ => Err(format!("expected CONDITION=FILE, got {s:?}")),
    }
}

fn open_sink(output: Option<&PathBuf>) -> std::io::Result<Box<dyn OutputSink>> {
    match output {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            tracing::info!("Writing frames to {}", path.display());
            Ok(Box::new(StreamSink::new(file)))
        }
        None => {
            tracing::info!("No output configured, logging frames only");
            Ok(Box::new(LogSink::new()))
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Initialize tracing subscriber for request logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_ansi(false) // Disable ANSI color codes for systemd/journald
        .compact()
        .init();

    let args = Args::parse();

    let media_dir = args.media_dir.canonicalize().unwrap_or_else(|_| {
        tracing::warn!("Could not canonicalize media dir, using as-is");
        args.media_dir.clone()
    });

    tracing::info!("Weather wake-light v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Layout: {} ({:?})", args.layout.display(), args.space);
    tracing::info!("Media dir: {}", media_dir.display());
    tracing::info!("Port: {}", args.port);

    let partitions = match PartitionCache::open(&args.layout, args.space) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!("Cannot load LED layout: {}", e);
            std::process::exit(1);
        }
    };

    let colorizer = ColorizerConfig {
        clusters: args.clusters,
        seed: args.seed,
        ..ColorizerConfig::default()
    };
    let cache = args.cache_dir.as_ref().map(FrameCache::new);
    if let Some(cache) = &cache {
        tracing::info!("Frame cache: {}", cache.dir().display());
    }
    let renderer = Renderer::new(partitions, colorizer, cache);
    let led_count = renderer.led_count();
    tracing::info!("{} LEDs", led_count);

    let running = match setup_signal_handler() {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("Failed to install signal handler: {}", e);
            std::process::exit(1);
        }
    };

    let sink = match open_sink(args.output.as_ref()) {
        Ok(s) => FrameSink::new(s, led_count),
        Err(e) => {
            tracing::error!("Cannot open output: {}", e);
            std::process::exit(1);
        }
    };

    // Shared fade state: animator thread ticks it, HTTP handlers start and cancel.
    let controller = FadeController::new(led_count);
    let animator_config = AnimatorConfig {
        tick_interval: Duration::from_millis(args.tick_ms.max(1)),
        dither_batch: args.dither_batch,
        cancel_policy: args.cancel_policy,
        seed: Some(args.seed),
    };
    let animator_handle = animator::spawn(
        animator::Animator::new(&controller, sink, animator_config),
        running.clone(),
    );

    let weather = args
        .weather_entries
        .iter()
        .fold(WeatherImages::new(media_dir.join("images")), |w, (condition, file)| {
            w.with_entry(condition, file)
        });

    let app_state = AppState {
        controller,
        renderer: std::sync::Arc::new(renderer),
        weather: std::sync::Arc::new(weather),
        media_dir,
        defaults: FadeTimings {
            fade_in: args.fade_in,
            hold: args.hold,
            fade_out: args.fade_out,
        },
    };

    let app = server::create_router(app_state);

    let addr = format!("0.0.0.0:{}", args.port);
    tracing::info!("Listening on http://{}", addr);
    tracing::info!("API Documentation: http://localhost:{}/docs", args.port);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            running.store(false, std::sync::atomic::Ordering::SeqCst);
            let _ = animator_handle.join();
            std::process::exit(1);
        }
    };

    let shutdown_flag = running.clone();
    let shutdown = async move {
        while is_running(&shutdown_flag) {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        tracing::info!("Shutting down");
    };

    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
        tracing::error!("Server error: {}", e);
        running.store(false, std::sync::atomic::Ordering::SeqCst);
    }

    // The animator switches the strip off before it returns.
    if animator_handle.join().is_err() {
        tracing::error!("Animator thread panicked");
        std::process::exit(1);
    }
}
