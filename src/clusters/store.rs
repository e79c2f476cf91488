//! # Cluster store
//!
//! Event-scoped owner of every cluster, organised as one [`RowIndex`] per
//! `(sector, row)`. Built once per event and read-only afterwards, so it can be shared
//! freely between the seeding, following and consolidation stages.
//!
//! ## See also
//!
//! * [`RowIndex`] – per-row z-sorted arena and bucket table
//! * [`crate::clusters::usage::UsageTable`] – mutable claims, indexed by [`ClusterStore::flat_index`]

use std::ops::Range;

use tracing::warn;

use crate::clusters::row_index::{RowIndex, DEFAULT_BUCKET_WIDTH};
use crate::clusters::{Cluster, ClusterId};
use crate::constants::Centimeter;
use crate::geometry::DetectorGeometry;

/// Result of [`ClusterStore::nearest`].
#[derive(Debug, Clone, Copy)]
pub struct NearestCluster<'a> {
    pub id: ClusterId,
    pub cluster: &'a Cluster,
    pub distance: f64,
}

#[derive(Debug, Clone)]
pub struct ClusterStore {
    n_sectors: usize,
    n_rows: usize,
    rows: Vec<RowIndex>,
    /// Flat numbering offset of each `(sector, row)`
    offsets: Vec<usize>,
    total: usize,
    rejected: usize,
}

impl ClusterStore {
    /// Distribute clusters into their rows and build every row index.
    ///
    /// Clusters pointing outside the geometry, beyond the drift length or carrying
    /// non-finite values are dropped with a warning; their number is available through
    /// [`ClusterStore::rejected`].
    ///
    /// Arguments
    /// -----------------
    /// * `geometry`: sector and row layout.
    /// * `clusters`: the event's clusters, in any order.
    pub fn build<I>(geometry: &DetectorGeometry, clusters: I) -> Self
    where
        I: IntoIterator<Item = Cluster>,
    {
        Self::build_with_bucket_width(geometry, clusters, DEFAULT_BUCKET_WIDTH)
    }

    pub fn build_with_bucket_width<I>(
        geometry: &DetectorGeometry,
        clusters: I,
        bucket_width: Centimeter,
    ) -> Self
    where
        I: IntoIterator<Item = Cluster>,
    {
        let n_sectors = geometry.n_sectors();
        let n_rows = geometry.n_rows();
        let z_length = geometry.z_length();
        let mut per_row: Vec<Vec<(usize, Cluster)>> = vec![Vec::new(); n_sectors * n_rows];
        let mut rejected = 0;

        for (position, cluster) in clusters.into_iter().enumerate() {
            let (sector, row) = (cluster.sector as usize, cluster.row as usize);
            if sector >= n_sectors
                || row >= n_rows
                || !cluster.is_well_formed()
                || cluster.z.abs() > z_length
            {
                rejected += 1;
                continue;
            }
            per_row[sector * n_rows + row].push((position, cluster));
        }
        if rejected > 0 {
            warn!(rejected, "dropped malformed clusters");
        }

        let rows: Vec<RowIndex> = per_row
            .into_iter()
            .map(|entries| RowIndex::build(entries, bucket_width))
            .collect();
        let mut offsets = Vec::with_capacity(rows.len());
        let mut total = 0;
        for row in &rows {
            offsets.push(total);
            total += row.len();
        }

        ClusterStore {
            n_sectors,
            n_rows,
            rows,
            offsets,
            total,
            rejected,
        }
    }

    /// Number of stored clusters.
    #[inline]
    pub fn len(&self) -> usize {
        self.total
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Number of input clusters dropped at build time.
    #[inline]
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    #[inline]
    pub fn row(&self, sector: usize, row: usize) -> &RowIndex {
        &self.rows[sector * self.n_rows + row]
    }

    pub fn get(&self, id: ClusterId) -> Option<&Cluster> {
        let (sector, row) = (id.sector as usize, id.row as usize);
        if sector >= self.n_sectors || row >= self.n_rows {
            return None;
        }
        self.row(sector, row).get(id.index as usize)
    }

    /// Dense index in `0..len()`, used by per-cluster tables.
    #[inline]
    pub fn flat_index(&self, id: ClusterId) -> usize {
        self.offsets[id.sector as usize * self.n_rows + id.row as usize] + id.index as usize
    }

    /// Position of the cluster in the sequence passed to [`ClusterStore::build`].
    pub fn source_index(&self, id: ClusterId) -> Option<usize> {
        let (sector, row) = (id.sector as usize, id.row as usize);
        if sector >= self.n_sectors || row >= self.n_rows {
            return None;
        }
        self.row(sector, row).source(id.index as usize)
    }

    /// Closest cluster of `(sector, row)` inside the road around `(y, z)`.
    ///
    /// Return
    /// ----------
    /// * The minimizer of `(Δy/road_y)² + (Δz/road_z)²` among clusters with
    ///   `|Δy| <= road_y` and `|Δz| <= road_z`, or `None`.
    pub fn nearest(
        &self,
        sector: usize,
        row: usize,
        y: Centimeter,
        z: Centimeter,
        road_y: Centimeter,
        road_z: Centimeter,
    ) -> Option<NearestCluster<'_>> {
        if sector >= self.n_sectors || row >= self.n_rows {
            return None;
        }
        self.row(sector, row)
            .nearest(y, z, road_y, road_z)
            .map(|hit| NearestCluster {
                id: ClusterId::new(sector, row, hit.index),
                cluster: hit.cluster,
                distance: hit.distance,
            })
    }

    /// Row positions of the clusters of `(sector, row)` with `z_min <= z <= z_max`.
    pub fn clusters_in_z_window(
        &self,
        sector: usize,
        row: usize,
        z_min: Centimeter,
        z_max: Centimeter,
    ) -> Range<usize> {
        self.row(sector, row).z_window(z_min, z_max)
    }

    /// Every stored cluster with its id, row by row.
    pub fn iter(&self) -> impl Iterator<Item = (ClusterId, &Cluster)> + '_ {
        self.rows.iter().enumerate().flat_map(move |(k, row)| {
            let (sector, r) = (k / self.n_rows, k % self.n_rows);
            row.clusters()
                .iter()
                .enumerate()
                .map(move |(i, c)| (ClusterId::new(sector, r, i), c))
        })
    }
}
