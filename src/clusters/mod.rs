//! # Clusters
//!
//! Charge clusters reconstructed on the pad rows, and the per-event structures that index
//! and account for them:
//!
//! * [`row_index::RowIndex`] – clusters of one `(sector, row)` sorted by `z`, with a coarse
//!   bucket table for constant-time window lookup,
//! * [`store::ClusterStore`] – one [`row_index::RowIndex`] per `(sector, row)` plus a flat
//!   numbering of every stored cluster,
//! * [`usage::UsageTable`] – provisional and authoritative claims of clusters by tracks.
//!
//! Clusters are owned by the store for the duration of an event; tracks only hold
//! [`ClusterId`]s.

pub mod row_index;
pub mod store;
pub mod usage;

use serde::{Deserialize, Serialize};

use crate::constants::{Centimeter, N_LABELS};

/// Shape class assigned by the cluster finder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ClusterKind {
    /// Single, well separated charge deposit
    #[default]
    Isolated,
    /// Unfolded from a deposit shared with a neighbour
    Overlapping,
    /// Split from a larger deposit
    Split,
    /// Touches the border of the pad plane
    Edge,
}

/// A reconstructed charge cluster, in the local frame of its sector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub sector: u16,
    pub row: u16,
    pub y: Centimeter,
    pub z: Centimeter,
    pub q_total: f64,
    pub q_max: f64,
    /// Measured shape width along the row (cm²)
    pub sigma_y2: f64,
    /// Measured shape width along the drift (cm²)
    pub sigma_z2: f64,
    /// Simulation truth labels, negative when absent
    pub labels: [i32; N_LABELS],
    pub kind: ClusterKind,
}

impl Cluster {
    /// A cluster with nominal charge and shape, no truth labels.
    pub fn new(sector: u16, row: u16, y: Centimeter, z: Centimeter) -> Self {
        Cluster {
            sector,
            row,
            y,
            z,
            q_total: 200.0,
            q_max: 40.0,
            sigma_y2: 0.06,
            sigma_z2: 0.08,
            labels: [-1; N_LABELS],
            kind: ClusterKind::Isolated,
        }
    }

    pub fn with_label(mut self, label: i32) -> Self {
        self.labels[0] = label;
        self
    }

    pub fn with_kind(mut self, kind: ClusterKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_charge(mut self, q_total: f64, q_max: f64) -> Self {
        self.q_total = q_total;
        self.q_max = q_max;
        self
    }

    /// Primary truth label, if any.
    #[inline]
    pub fn primary_label(&self) -> Option<i32> {
        (self.labels[0] >= 0).then_some(self.labels[0])
    }

    pub(crate) fn is_well_formed(&self) -> bool {
        self.y.is_finite()
            && self.z.is_finite()
            && self.q_total.is_finite()
            && self.q_max.is_finite()
            && self.sigma_y2.is_finite()
            && self.sigma_z2.is_finite()
    }
}

/// Stable handle of a stored cluster: its row and its position in the z-sorted row arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterId {
    pub sector: u16,
    pub row: u16,
    pub index: u32,
}

impl ClusterId {
    pub fn new(sector: usize, row: usize, index: usize) -> Self {
        ClusterId {
            sector: sector as u16,
            row: row as u16,
            index: index as u32,
        }
    }
}
