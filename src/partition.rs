//! Spatial partitioner: which LED owns a given point.
//!
//! Every pixel of the source image belongs to the region of its nearest
//! LED. An image has far more pixels than the strip has LEDs, so lookups go
//! through a balanced 2-d tree built once per layout. Layouts smaller than
//! [`LINEAR_SCAN_MAX`] skip the tree and scan all positions; that is only a
//! fallback for tiny strips.
//!
//! Ties: when two LEDs are exactly the same distance away, the lower index
//! wins. Coincident LEDs are allowed, and the higher-indexed one simply ends
//! up with an empty region.
//!
//! ## Rust concepts
//! - Index-based trees (`Vec<Node>` + `Option<usize>`) instead of boxed nodes
//! - `split_at_mut` to recurse into two disjoint halves of a slice
//! - `Arc` to hand out a shared, immutable partition

use crate::layout::{CoordinateSpace, LedLayout, LedPosition};
use crate::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// Layouts with fewer LEDs than this are searched linearly.
pub const LINEAR_SCAN_MAX: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Axis {
    X,
    Y,
}

impl Axis {
    fn of(self, p: &LedPosition) -> f32 {
        match self {
            Axis::X => p.x,
            Axis::Y => p.y,
        }
    }

    fn next(self) -> Self {
        match self {
            Axis::X => Axis::Y,
            Axis::Y => Axis::X,
        }
    }
}

#[derive(Clone, Debug)]
struct Node {
    /// Offset into `Partition::points`.
    point: usize,
    axis: Axis,
    left: Option<usize>,
    right: Option<usize>,
}

/// Nearest-neighbor index over a layout.
#[derive(Clone, Debug)]
pub struct Partition {
    points: Vec<LedPosition>,
    nodes: Vec<Node>,
    root: Option<usize>,
    space: CoordinateSpace,
    layout_digest: u64,
}

impl Partition {
    /// Build the index for a layout already expressed in pixel coordinates.
    pub fn build(layout: &LedLayout) -> Self {
        Self::build_in(layout, CoordinateSpace::Pixels)
    }

    /// Build the index after mapping the layout into `space`.
    pub fn build_in(layout: &LedLayout, space: CoordinateSpace) -> Self {
        let layout = layout.in_space(space);
        let points = layout.positions().to_vec();
        let mut nodes = Vec::new();
        let mut root = None;

        if points.len() >= LINEAR_SCAN_MAX {
            let mut ids: Vec<usize> = (0..points.len()).collect();
            nodes.reserve(points.len());
            root = build_subtree(&points, &mut ids, Axis::X, &mut nodes);
        }

        tracing::debug!(
            "Built partition over {} LEDs ({})",
            points.len(),
            if root.is_some() { "2-d tree" } else { "linear scan" }
        );

        Self {
            points,
            nodes,
            root,
            space,
            layout_digest: layout.digest(),
        }
    }

    /// Number of LEDs, and so the length of every frame rendered through
    /// this partition.
    pub fn led_count(&self) -> usize {
        self.points.len()
    }

    pub fn space(&self) -> CoordinateSpace {
        self.space
    }

    /// Digest of the layout this partition was built from.
    pub fn layout_digest(&self) -> u64 {
        self.layout_digest
    }

    /// Index of the LED nearest to (`x`, `y`), or `None` for an empty layout.
    pub fn nearest(&self, x: f32, y: f32) -> Option<usize> {
        if self.points.is_empty() {
            return None;
        }

        let mut best = Best {
            dist_sq: f32::INFINITY,
            index: usize::MAX,
        };
        match self.root {
            Some(root) => self.search(root, x, y, &mut best),
            None => {
                for p in &self.points {
                    best.offer(p, x, y);
                }
            }
        }
        Some(best.index)
    }

    /// Owning LED of pixel (`px`, `py`) in a `width`×`height` image.
    pub fn owner_of_pixel(&self, px: u32, py: u32, width: u32, height: u32) -> Option<usize> {
        let (x, y) = self.space.pixel_to_layout(px, py, width, height);
        self.nearest(x, y)
    }

    fn search(&self, node: usize, x: f32, y: f32, best: &mut Best) {
        let n = &self.nodes[node];
        let p = &self.points[n.point];
        best.offer(p, x, y);

        let query = match n.axis {
            Axis::X => x,
            Axis::Y => y,
        };
        let diff = query - n.axis.of(p);
        let (near, far) = if diff < 0.0 {
            (n.left, n.right)
        } else {
            (n.right, n.left)
        };

        if let Some(near) = near {
            self.search(near, x, y, best);
        }
        // `<=` so an equally distant LED on the far side still gets a chance
        // to win the tie on index.
        if diff * diff <= best.dist_sq
            && let Some(far) = far
        {
            self.search(far, x, y, best);
        }
    }
}

struct Best {
    dist_sq: f32,
    index: usize,
}

impl Best {
    fn offer(&mut self, p: &LedPosition, x: f32, y: f32) {
        let dx = p.x - x;
        let dy = p.y - y;
        let d = dx * dx + dy * dy;
        if d < self.dist_sq || (d == self.dist_sq && p.index < self.index) {
            self.dist_sq = d;
            self.index = p.index;
        }
    }
}

/// Median split on alternating axes. Within an axis, equal coordinates are
/// ordered by LED index so the tree shape is deterministic.
fn build_subtree(
    points: &[LedPosition],
    ids: &mut [usize],
    axis: Axis,
    nodes: &mut Vec<Node>,
) -> Option<usize> {
    if ids.is_empty() {
        return None;
    }

    ids.sort_by(|&a, &b| {
        axis.of(&points[a])
            .total_cmp(&axis.of(&points[b]))
            .then(a.cmp(&b))
    });
    let mid = ids.len() / 2;
    let slot = nodes.len();
    nodes.push(Node {
        point: ids[mid],
        axis,
        left: None,
        right: None,
    });

    let (lower, rest) = ids.split_at_mut(mid);
    let upper = &mut rest[1..];
    let left = build_subtree(points, lower, axis.next(), nodes);
    let right = build_subtree(points, upper, axis.next(), nodes);
    nodes[slot].left = left;
    nodes[slot].right = right;
    Some(slot)
}

// ── Cache ──────────────────────────────────────────────────────────

/// Keeps one built partition alive and rebuilds it only when the layout
/// file's modification time changes (or after [`PartitionCache::invalidate`]).
pub struct PartitionCache {
    path: PathBuf,
    space: CoordinateSpace,
    modified: Option<SystemTime>,
    partition: Arc<Partition>,
}

impl PartitionCache {
    /// Load the layout and build the first partition. A missing or malformed
    /// file is an error here; the caller treats it as fatal.
    pub fn open(path: &Path, space: CoordinateSpace) -> Result<Self> {
        let modified = modified_time(path);
        let layout = LedLayout::load(path)?;
        let partition = Arc::new(Partition::build_in(&layout, space));
        Ok(Self {
            path: path.to_path_buf(),
            space,
            modified,
            partition,
        })
    }

    /// The current partition, rebuilt first if the layout file changed.
    ///
    /// If a changed file fails to load, the previous partition is kept.
    pub fn get(&mut self) -> Arc<Partition> {
        let modified = modified_time(&self.path);
        if modified.is_some() && modified != self.modified {
            match self.reload() {
                Ok(()) => self.modified = modified,
                Err(e) => tracing::warn!("Keeping previous LED layout: {}", e),
            }
        }
        self.partition.clone()
    }

    /// Force a rebuild on the next [`get`](Self::get).
    pub fn invalidate(&mut self) {
        self.modified = None;
    }

    fn reload(&mut self) -> Result<()> {
        let layout = LedLayout::load(&self.path)?;
        if layout.len() != self.partition.led_count() {
            tracing::warn!(
                "LED count changed from {} to {}",
                self.partition.led_count(),
                layout.len()
            );
        }
        self.partition = Arc::new(Partition::build_in(&layout, self.space));
        tracing::info!("Rebuilt partition from {}", self.path.display());
        Ok(())
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

impl std::fmt::Debug for PartitionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionCache")
            .field("path", &self.path)
            .field("space", &self.space)
            .field("leds", &self.partition.led_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WakeLightError;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use tempfile::TempDir;

    fn brute_force(points: &[(f32, f32)], x: f32, y: f32) -> usize {
        let mut best = (f32::INFINITY, usize::MAX);
        for (i, &(px, py)) in points.iter().enumerate() {
            let d = (px - x).powi(2) + (py - y).powi(2);
            if d < best.0 {
                best = (d, i);
            }
        }
        best.1
    }

    fn scattered(n: usize, seed: u64) -> Vec<(f32, f32)> {
        let mut rng = fastrand::Rng::with_seed(seed);
        (0..n)
            .map(|_| (rng.f32() * 40.0, rng.f32() * 30.0))
            .collect()
    }

    #[test]
    fn empty_layout_has_no_owner() {
        let partition = Partition::build(&LedLayout::default());
        assert_eq!(partition.led_count(), 0);
        assert_eq!(partition.nearest(1.0, 1.0), None);
    }

    #[test]
    fn single_led_owns_everything() {
        let partition = Partition::build(&LedLayout::from_points(&[(100.0, -3.0)]));
        for y in 0..10 {
            for x in 0..10 {
                assert_eq!(partition.owner_of_pixel(x, y, 10, 10), Some(0));
            }
        }
    }

    #[rstest]
    #[case(3)]
    #[case(LINEAR_SCAN_MAX)]
    #[case(50)]
    #[case(150)]
    fn every_pixel_maps_to_its_nearest_led(#[case] n: usize) {
        let points = scattered(n, n as u64);
        let partition = Partition::build(&LedLayout::from_points(&points));

        for py in 0..30 {
            for px in 0..40 {
                let owner = partition.owner_of_pixel(px, py, 40, 30);
                assert_eq!(
                    owner,
                    Some(brute_force(&points, px as f32, py as f32)),
                    "pixel ({px}, {py})"
                );
            }
        }
    }

    #[test]
    fn equidistant_point_goes_to_lowest_index() {
        // A grid large enough to use the tree; (1.0, 0.0) sits exactly
        // between LED 0 at (0, 0) and LED 1 at (2, 0).
        let mut points = vec![(0.0, 0.0), (2.0, 0.0)];
        points.extend((0..10).map(|i| (i as f32 * 3.0, 9.0)));
        let partition = Partition::build(&LedLayout::from_points(&points));
        assert_eq!(partition.nearest(1.0, 0.0), Some(0));

        let mut reversed = points.clone();
        reversed.swap(0, 1);
        let partition = Partition::build(&LedLayout::from_points(&reversed));
        assert_eq!(partition.nearest(1.0, 0.0), Some(0));
    }

    #[test]
    fn coincident_leds_resolve_to_lower_index() {
        let mut points: Vec<(f32, f32)> = (0..12).map(|i| (i as f32, 0.0)).collect();
        points.push((5.0, 0.0));
        let partition = Partition::build(&LedLayout::from_points(&points));
        assert_eq!(partition.nearest(5.1, 0.2), Some(5));
    }

    #[test]
    fn normalized_space_maps_pixels_by_fraction() {
        // LEDs at the left and right edges of an arbitrary-unit layout
        let layout = LedLayout::from_points(&[(0.0, 50.0), (200.0, 50.0)]);
        let partition = Partition::build_in(&layout, CoordinateSpace::Normalized);
        assert_eq!(partition.owner_of_pixel(1, 5, 10, 10), Some(0));
        assert_eq!(partition.owner_of_pixel(9, 5, 10, 10), Some(1));
        // Same answer for a larger image
        assert_eq!(partition.owner_of_pixel(90, 50, 100, 100), Some(1));
    }

    #[test]
    fn cache_rebuilds_only_when_file_changes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("leds.csv");
        std::fs::write(&path, "x,y\n0,0\n10,0\n").unwrap();

        let mut cache = PartitionCache::open(&path, CoordinateSpace::Pixels).unwrap();
        let first = cache.get();
        let again = cache.get();
        assert!(Arc::ptr_eq(&first, &again));

        std::fs::write(&path, "x,y\n0,0\n10,0\n20,0\n").unwrap();
        cache.invalidate();
        let rebuilt = cache.get();
        assert!(!Arc::ptr_eq(&first, &rebuilt));
        assert_eq!(rebuilt.led_count(), 3);
    }

    #[test]
    fn cache_keeps_previous_partition_on_bad_reload() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("leds.csv");
        std::fs::write(&path, "x,y\n0,0\n10,0\n").unwrap();

        let mut cache = PartitionCache::open(&path, CoordinateSpace::Pixels).unwrap();
        std::fs::write(&path, "x,y\n0,zero\n").unwrap();
        cache.invalidate();
        assert_eq!(cache.get().led_count(), 2);
    }

    #[test]
    fn cache_open_fails_on_missing_file() {
        let tmp = TempDir::new().unwrap();
        let err = PartitionCache::open(&tmp.path().join("missing.csv"), CoordinateSpace::Pixels)
            .unwrap_err();
        assert!(matches!(err, WakeLightError::Layout(_)));
    }
}
