//! Frame renderer: source image + partition → target frame.
//!
//! Rendering is a pure function of the image, the partition and the
//! colorizer settings; the k-means random source is re-seeded from the
//! config on every call, so the same inputs always give the same frame.
//!
//! Clustering every region is slow on a small board, so finished frames
//! are kept in a [`FrameCache`] on disk, one JSON file per image.
//!
//! ## Rust concepts
//! - `map_err` to turn every library error into one domain error
//! - Struct update syntax (`..Self::key(..)`) to fill a cache entry
//! - `Mutex` inside a struct shared through `Arc` (interior mutability)
//! - let-chains (`if let Some(..) = .. && let Err(..) = ..`)

use crate::colorize::{ColorizerConfig, colorize};
use crate::layout::CoordinateSpace;
use crate::partition::{Partition, PartitionCache};
use crate::{ColorVector, Result, WakeLightError};
use image::{ImageReader, RgbImage};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::UNIX_EPOCH;

/// Open and decode an image. Any failure is `ImageUnavailable`.
pub fn load_image(path: &Path) -> Result<RgbImage> {
    let reader = ImageReader::open(path).map_err(|e| WakeLightError::image_unavailable(path, e))?;
    let reader = reader
        .with_guessed_format()
        .map_err(|e| WakeLightError::image_unavailable(path, e))?;
    let img = reader
        .decode()
        .map_err(|e| WakeLightError::image_unavailable(path, e))?;
    Ok(img.to_rgb8())
}

/// Target frame for `image`: the dominant color of each LED's region.
pub fn render(image: &RgbImage, partition: &Partition, config: &ColorizerConfig) -> ColorVector {
    let mut rng = fastrand::Rng::with_seed(config.seed);
    colorize(image, partition, config, &mut rng)
}

// ── Frame cache ──────────────────────────────────────────────────────

/// What a cache file holds. An entry is only reused when every key field
/// matches the current render.
#[derive(Debug, Serialize, Deserialize)]
struct CachedFrame {
    layout_digest: u64,
    led_count: usize,
    space: CoordinateSpace,
    clusters: usize,
    max_iterations: usize,
    seed: u64,
    /// Canonical path of the source image.
    source: PathBuf,
    /// Image modification time in nanoseconds since the epoch, if known.
    image_stamp: Option<u64>,
    colors: ColorVector,
}

impl CachedFrame {
    fn matches(&self, key: &CachedFrame) -> bool {
        self.layout_digest == key.layout_digest
            && self.led_count == key.led_count
            && self.space == key.space
            && self.clusters == key.clusters
            && self.max_iterations == key.max_iterations
            && self.seed == key.seed
            && self.source == key.source
            && self.image_stamp == key.image_stamp
            && self.colors.len() == self.led_count
    }
}

/// Directory of rendered frames, one file per source image.
///
/// Files are named after the image plus a digest of its canonical path, so
/// same-named images in different directories never share an entry.
#[derive(Clone, Debug)]
pub struct FrameCache {
    dir: PathBuf,
}

impl FrameCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, image: &Path) -> PathBuf {
        let name = image
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .into_owned();
        let digest = crate::fnv1a(source_path(image).to_string_lossy().bytes());
        self.dir.join(format!("{name}-{digest:016x}.json"))
    }

    fn key(image: &Path, partition: &Partition, config: &ColorizerConfig) -> CachedFrame {
        let image_stamp = fs::metadata(image)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as u64);

        CachedFrame {
            layout_digest: partition.layout_digest(),
            led_count: partition.led_count(),
            space: partition.space(),
            clusters: config.clusters,
            max_iterations: config.max_iterations,
            seed: config.seed,
            source: source_path(image),
            image_stamp,
            colors: Vec::new(),
        }
    }

    /// A previously rendered frame for this image, if it is still valid.
    pub fn load(&self, image: &Path, partition: &Partition, config: &ColorizerConfig) -> Option<ColorVector> {
        let path = self.entry_path(image);
        let text = fs::read_to_string(&path).ok()?;
        let cached: CachedFrame = match serde_json::from_str(&text) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("Ignoring unreadable cache entry {}: {}", path.display(), e);
                return None;
            }
        };

        if cached.matches(&Self::key(image, partition, config)) {
            Some(cached.colors)
        } else {
            tracing::debug!("Cache entry {} is stale", path.display());
            None
        }
    }

    pub fn store(
        &self,
        image: &Path,
        partition: &Partition,
        config: &ColorizerConfig,
        colors: &[crate::Color],
    ) -> Result<()> {
        let entry = CachedFrame {
            colors: colors.to_vec(),
            ..Self::key(image, partition, config)
        };
        let json = serde_json::to_string(&entry).map_err(|e| WakeLightError::cache(e.to_string()))?;
        fs::create_dir_all(&self.dir)?;
        fs::write(self.entry_path(image), json)?;
        Ok(())
    }
}

/// The image's canonical path, or the path as given if it can't be resolved.
fn source_path(image: &Path) -> PathBuf {
    image.canonicalize().unwrap_or_else(|_| image.to_path_buf())
}

// ── Renderer ─────────────────────────────────────────────────────────

/// Everything needed to turn an image path into a target frame.
///
/// Shared between request handlers, so the partition cache sits behind a
/// mutex; it is only held long enough to check the layout file.
pub struct Renderer {
    partitions: Mutex<PartitionCache>,
    config: ColorizerConfig,
    cache: Option<FrameCache>,
}

impl Renderer {
    pub fn new(partitions: PartitionCache, config: ColorizerConfig, cache: Option<FrameCache>) -> Self {
        Self {
            partitions: Mutex::new(partitions),
            config,
            cache,
        }
    }

    pub fn config(&self) -> &ColorizerConfig {
        &self.config
    }

    /// Current partition, rebuilt if the layout file changed.
    pub fn partition(&self) -> Arc<Partition> {
        self.partitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get()
    }

    pub fn led_count(&self) -> usize {
        self.partition().led_count()
    }

    /// Render the image at `path`, using the frame cache when possible.
    ///
    /// Cache problems are logged and never fail the render.
    pub fn render_path(&self, path: &Path) -> Result<ColorVector> {
        let partition = self.partition();

        if let Some(colors) = self
            .cache
            .as_ref()
            .and_then(|cache| cache.load(path, &partition, &self.config))
        {
            tracing::info!("Using cached frame for {}", path.display());
            return Ok(colors);
        }

        let image = load_image(path)?;
        let started = std::time::Instant::now();
        let colors = render(&image, &partition, &self.config);
        tracing::info!(
            "Rendered {} ({}x{}) onto {} LEDs in {}ms",
            path.display(),
            image.width(),
            image.height(),
            colors.len(),
            started.elapsed().as_millis()
        );

        if let Some(cache) = &self.cache
            && let Err(e) = cache.store(path, &partition, &self.config, &colors)
        {
            tracing::warn!("Could not cache frame for {}: {}", path.display(), e);
        }
        Ok(colors)
    }
}
