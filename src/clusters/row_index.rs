//! # Row index
//!
//! Clusters of a single `(sector, row)` stored in ascending `z`, together with a coarse
//! bucket table over `z`:
//!
//! ```text
//! bucket[k] = first position i such that clusters[i].z >= z_origin + k * bucket_width
//! ```
//!
//! The table is monotonic non-decreasing. A lower-bound query first reads the bucket
//! covering `z` (an O(1) array access) and then bisects only inside that bucket.
//!
//! Window queries never trust the buckets for the final answer: every candidate is
//! checked against the road explicitly.

use std::ops::Range;

use crate::clusters::Cluster;
use crate::constants::Centimeter;

/// Default bucket width along `z`.
pub const DEFAULT_BUCKET_WIDTH: Centimeter = 1.0;

/// Upper bound on the bucket table length; wider spans get wider buckets.
pub const MAX_BUCKETS: usize = 4096;

#[derive(Debug, Clone, Default)]
pub struct RowIndex {
    clusters: Vec<Cluster>,
    /// Position of each stored cluster in the caller's input sequence
    sources: Vec<usize>,
    z_origin: Centimeter,
    bucket_width: Centimeter,
    buckets: Vec<u32>,
}

/// Closest cluster found inside a road.
#[derive(Debug, Clone, Copy)]
pub struct RowHit<'a> {
    pub index: usize,
    pub cluster: &'a Cluster,
    /// `(Δy/road_y)² + (Δz/road_z)²`
    pub distance: f64,
}

impl RowIndex {
    /// Sort `entries` by `z` and build the bucket table.
    ///
    /// Arguments
    /// -----------------
    /// * `entries`: clusters paired with their position in the input sequence.
    /// * `bucket_width`: requested width of a bucket along `z`. Non-positive widths fall
    ///   back to [`DEFAULT_BUCKET_WIDTH`], and the width grows when the `z` span would
    ///   need more than [`MAX_BUCKETS`] buckets.
    pub fn build(mut entries: Vec<(usize, Cluster)>, bucket_width: Centimeter) -> Self {
        entries.sort_by(|a, b| a.1.z.total_cmp(&b.1.z).then(a.0.cmp(&b.0)));
        let (sources, clusters): (Vec<usize>, Vec<Cluster>) = entries.into_iter().unzip();

        let mut bucket_width = if bucket_width > 0.0 && bucket_width.is_finite() {
            bucket_width
        } else {
            DEFAULT_BUCKET_WIDTH
        };
        let (z_origin, buckets) = match (clusters.first(), clusters.last()) {
            (Some(first), Some(last)) => {
                let z_origin = first.z.floor();
                let span = last.z - z_origin;
                bucket_width = bucket_width.max(span / (MAX_BUCKETS - 2) as f64);
                let n_buckets = ((span / bucket_width).floor() as usize + 2).min(MAX_BUCKETS);
                let buckets = (0..n_buckets)
                    .map(|k| {
                        let edge = z_origin + k as f64 * bucket_width;
                        clusters.partition_point(|c| c.z < edge) as u32
                    })
                    .collect();
                (z_origin, buckets)
            }
            _ => (0.0, Vec::new()),
        };

        RowIndex {
            clusters,
            sources,
            z_origin,
            bucket_width,
            buckets,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&Cluster> {
        self.clusters.get(index)
    }

    #[inline]
    pub fn source(&self, index: usize) -> Option<usize> {
        self.sources.get(index).copied()
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    /// Bucket table, exposed for invariant checks.
    pub fn buckets(&self) -> &[u32] {
        &self.buckets
    }

    /// First position whose cluster has `z >= z`.
    pub fn lower_bound(&self, z: Centimeter) -> usize {
        if self.clusters.is_empty() || z.is_nan() {
            return self.clusters.len();
        }
        let k = ((z - self.z_origin) / self.bucket_width).floor();
        if k < 0.0 {
            return 0;
        }
        let k = k as usize;
        if k + 1 >= self.buckets.len() {
            return self.clusters.len();
        }
        let lo = self.buckets[k] as usize;
        let hi = self.buckets[k + 1] as usize;
        // rounding at a bucket edge: fall back to a full bisection
        let below_ok = lo == 0 || self.clusters[lo - 1].z < z;
        let above_ok = hi == self.clusters.len() || self.clusters[hi].z >= z;
        if !(below_ok && above_ok) {
            return self.clusters.partition_point(|c| c.z < z);
        }
        lo + self.clusters[lo..hi].partition_point(|c| c.z < z)
    }

    /// Positions of the clusters with `z_min <= z <= z_max`.
    pub fn z_window(&self, z_min: Centimeter, z_max: Centimeter) -> Range<usize> {
        let start = self.lower_bound(z_min);
        let end = start + self.clusters[start..].partition_point(|c| c.z <= z_max);
        start..end
    }

    /// Closest cluster inside the rectangular road around `(y, z)`.
    ///
    /// Arguments
    /// -----------------
    /// * `y`, `z`: predicted position.
    /// * `road_y`, `road_z`: half-widths of the road (must be > 0).
    ///
    /// Return
    /// ----------
    /// * The cluster minimizing `(Δy/road_y)² + (Δz/road_z)²` among those with
    ///   `|Δy| <= road_y` and `|Δz| <= road_z`, or `None` when the road is empty.
    pub fn nearest(
        &self,
        y: Centimeter,
        z: Centimeter,
        road_y: Centimeter,
        road_z: Centimeter,
    ) -> Option<RowHit<'_>> {
        if !(road_y > 0.0 && road_z > 0.0) {
            return None;
        }
        let mut best: Option<RowHit<'_>> = None;
        for index in self.z_window(z - road_z, z + road_z) {
            let cluster = &self.clusters[index];
            let dy = cluster.y - y;
            let dz = cluster.z - z;
            if dy.abs() > road_y || dz.abs() > road_z {
                continue;
            }
            let distance = (dy / road_y).powi(2) + (dz / road_z).powi(2);
            if best.map_or(true, |b| distance < b.distance) {
                best = Some(RowHit {
                    index,
                    cluster,
                    distance,
                });
            }
        }
        best
    }
}
