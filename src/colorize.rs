//! Region colorizer: one representative color per LED.
//!
//! Averaging a region that straddles, say, a blue sky and an orange sun
//! gives a muddy brown nobody would recognise. Instead each region's colors
//! are grouped with k-means and the most populous cluster wins.
//!
//! The clusterer takes its randomness from a caller-supplied
//! [`fastrand::Rng`], so a fixed seed gives the same frame every time.
//!
//! ## Rust concepts
//! - `BTreeMap` for ordered, deterministic iteration
//! - `&mut` borrows to thread one random source through many calls
//! - let-chains in `if` conditions

use crate::partition::Partition;
use crate::{Color, ColorVector};
use image::RgbImage;
use std::collections::BTreeMap;

pub const DEFAULT_CLUSTERS: usize = 4;
pub const DEFAULT_MAX_ITERATIONS: usize = 16;
pub const DEFAULT_SEED: u64 = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColorizerConfig {
    /// Clusters per region. Reduced automatically for regions with fewer
    /// distinct colors.
    pub clusters: usize,
    /// Upper bound on k-means iterations; it usually settles much sooner.
    pub max_iterations: usize,
    /// Seed for the per-render random source.
    pub seed: u64,
}

impl Default for ColorizerConfig {
    fn default() -> Self {
        Self {
            clusters: DEFAULT_CLUSTERS,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            seed: DEFAULT_SEED,
        }
    }
}

/// Group the image's pixels by owning LED.
///
/// The outer vector has one entry per LED, possibly empty.
pub fn regions(image: &RgbImage, partition: &Partition) -> Vec<Vec<Color>> {
    let mut regions = vec![Vec::new(); partition.led_count()];
    let (width, height) = image.dimensions();

    for (x, y, pixel) in image.enumerate_pixels() {
        if let Some(owner) = partition.owner_of_pixel(x, y, width, height) {
            regions[owner].push(Color::from(*pixel));
        }
    }
    regions
}

/// Dominant color of every LED's region, in wiring order.
///
/// Regions no pixel maps to come out black.
pub fn colorize(
    image: &RgbImage,
    partition: &Partition,
    config: &ColorizerConfig,
    rng: &mut fastrand::Rng,
) -> ColorVector {
    let regions = regions(image, partition);
    let empty = regions.iter().filter(|r| r.is_empty()).count();
    if empty > 0 {
        tracing::debug!("{} of {} LED regions are empty", empty, regions.len());
    }

    regions
        .iter()
        .map(|pixels| dominant_color(pixels, config.clusters, config.max_iterations, rng))
        .collect()
}

/// Most populous k-means cluster of `pixels`, as a rounded centroid.
///
/// An empty slice gives black without touching the clusterer.
pub fn dominant_color(
    pixels: &[Color],
    clusters: usize,
    max_iterations: usize,
    rng: &mut fastrand::Rng,
) -> Color {
    if pixels.is_empty() {
        return Color::BLACK;
    }

    // Cluster the distinct colors weighted by how often they occur. The
    // BTreeMap keeps the sample order independent of pixel order.
    let mut histogram: BTreeMap<[u8; 3], usize> = BTreeMap::new();
    for &c in pixels {
        *histogram.entry(c.into()).or_default() += 1;
    }
    if histogram.len() == 1
        && let Some(&only) = histogram.keys().next()
    {
        return Color::from(only);
    }

    let samples: Vec<Sample> = histogram
        .into_iter()
        .map(|(rgb, weight)| Sample {
            rgb: Color::from(rgb).to_f32(),
            weight,
        })
        .collect();

    let k = clusters.clamp(1, samples.len());
    let clusters = kmeans(&samples, k, max_iterations, rng);

    clusters
        .iter()
        .enumerate()
        // Largest count wins; on a tie the lower cluster index wins.
        .max_by(|(ia, a), (ib, b)| a.count.cmp(&b.count).then(ib.cmp(ia)))
        .map(|(_, c)| Color::from_f32(c.centroid))
        .unwrap_or(Color::BLACK)
}

#[derive(Clone, Copy, Debug)]
struct Sample {
    rgb: [f32; 3],
    weight: usize,
}

#[derive(Clone, Copy, Debug)]
struct Cluster {
    centroid: [f32; 3],
    count: usize,
}

fn dist_sq(a: [f32; 3], b: [f32; 3]) -> f32 {
    (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)
}

fn nearest_centroid(rgb: [f32; 3], centroids: &[[f32; 3]]) -> usize {
    let mut best = (f32::INFINITY, 0);
    for (i, &c) in centroids.iter().enumerate() {
        let d = dist_sq(rgb, c);
        if d < best.0 {
            best = (d, i);
        }
    }
    best.1
}

/// Weighted k-means++ seeding: the first centroid is drawn in proportion to
/// weight, the rest in proportion to weight × squared distance to the
/// closest centroid so far.
fn seed_centroids(samples: &[Sample], k: usize, rng: &mut fastrand::Rng) -> Vec<[f32; 3]> {
    let mut centroids = Vec::with_capacity(k);
    let total: f64 = samples.iter().map(|s| s.weight as f64).sum();
    centroids.push(samples[pick_weighted(samples.iter().map(|s| s.weight as f64), total, rng)].rgb);

    while centroids.len() < k {
        let scores: Vec<f64> = samples
            .iter()
            .map(|s| {
                let d = centroids
                    .iter()
                    .map(|&c| dist_sq(s.rgb, c))
                    .fold(f32::INFINITY, f32::min);
                s.weight as f64 * d as f64
            })
            .collect();
        let total: f64 = scores.iter().sum();
        if total <= 0.0 {
            break;
        }
        centroids.push(samples[pick_weighted(scores.iter().copied(), total, rng)].rgb);
    }
    centroids
}

fn pick_weighted(weights: impl Iterator<Item = f64>, total: f64, rng: &mut fastrand::Rng) -> usize {
    let target = rng.f64() * total;
    let mut acc = 0.0;
    let mut last = 0;
    for (i, w) in weights.enumerate() {
        if w <= 0.0 {
            continue;
        }
        acc += w;
        last = i;
        if target < acc {
            return i;
        }
    }
    last
}

fn kmeans(samples: &[Sample], k: usize, max_iterations: usize, rng: &mut fastrand::Rng) -> Vec<Cluster> {
    let mut centroids = seed_centroids(samples, k, rng);
    let k = centroids.len();
    let mut assignment = vec![usize::MAX; samples.len()];

    for _ in 0..max_iterations.max(1) {
        let mut changed = false;
        for (slot, s) in assignment.iter_mut().zip(samples) {
            let nearest = nearest_centroid(s.rgb, &centroids);
            if *slot != nearest {
                *slot = nearest;
                changed = true;
            }
        }
        if !changed {
            break;
        }
        centroids = means(samples, &assignment, &centroids)
            .iter()
            .map(|c| c.centroid)
            .collect();
    }

    debug_assert_eq!(centroids.len(), k);
    means(samples, &assignment, &centroids)
}

/// Weighted mean and member count of each cluster. A cluster that lost all
/// its members keeps its old centroid and a count of zero.
fn means(samples: &[Sample], assignment: &[usize], centroids: &[[f32; 3]]) -> Vec<Cluster> {
    let mut sums = vec![[0.0f64; 3]; centroids.len()];
    let mut counts = vec![0usize; centroids.len()];

    for (s, &cluster) in samples.iter().zip(assignment) {
        for (sum, v) in sums[cluster].iter_mut().zip(s.rgb) {
            *sum += v as f64 * s.weight as f64;
        }
        counts[cluster] += s.weight;
    }

    centroids
        .iter()
        .zip(sums.iter().zip(&counts))
        .map(|(&old, (sum, &count))| Cluster {
            centroid: if count > 0 {
                let n = count as f64;
                [(sum[0] / n) as f32, (sum[1] / n) as f32, (sum[2] / n) as f32]
            } else {
                old
            },
            count,
        })
        .collect()
}
