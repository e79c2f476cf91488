//! # Track candidates
//!
//! A [`TrackCandidate`] is a seed or track under construction: its current
//! [`TrackParam`], its sector, one [`RowSlot`] per pad row, the found / foundable / shared
//! counters, the accumulated χ², its overlap partners and its lifecycle status.
//!
//! ## Lifecycle
//!
//! ```text
//! Seeded ──► Growing ──► Active ─────────────► (output)
//!               │           ▲
//!               ├──► Stopped ┤ reactivated when its early density is high
//!               │           └──► Rejected
//!               └──► Rejected
//! ```
//!
//! Transitions are driven by the [`Follower`](crate::follower::Follower) while growing
//! and by the [`Consolidator`](crate::consolidator::Consolidator) and the tracker's
//! reactivation rule afterwards. `Rejected` is terminal.

use ahash::RandomState;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::HashMap;

use crate::clusters::store::ClusterStore;
use crate::clusters::ClusterId;
use crate::constants::{TrackId, MAX_OVERLAP_PARTNERS};
use crate::seeding::SeedingPolicy;
use crate::track::param::TrackParam;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackStatus {
    Seeded,
    Growing,
    Active,
    Stopped,
    Rejected,
}

/// Why a candidate stopped growing or was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TerminationReason {
    PropagationFailed,
    RotationFailed,
    MissedRows,
    LowDensity,
    HighChi2,
    SeedQuality,
    VertexMismatch,
    Duplicate,
    SharedClusters,
    ShortTrack,
    NotReactivated,
}

/// A cluster attached to a track on one row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClusterSlot {
    pub id: ClusterId,
    /// The cluster is also used by another track
    pub shared: bool,
    /// Local `tan φ` of the track at the row
    pub tan_phi: f64,
    /// `tan λ` of the track at the row
    pub tan_lambda: f64,
    /// χ² contribution of the row, set by [`TrackCandidate::assign`]
    pub chi2: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum RowSlot {
    #[default]
    Unvisited,
    /// Row searched inside the acceptance, nothing attached
    Missing,
    /// Row crossed in a dead zone or outside the drift volume; never foundable
    Excluded,
    Assigned(ClusterSlot),
}

impl RowSlot {
    #[inline]
    pub fn cluster(&self) -> Option<&ClusterSlot> {
        match self {
            RowSlot::Assigned(slot) => Some(slot),
            _ => None,
        }
    }
}

/// Truth label of a track, from the labels of its clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackLabel {
    /// Most frequent primary label among the attached clusters
    pub label: i32,
    /// Too many attached clusters disagree with `label`
    pub fake: bool,
}

impl TrackLabel {
    /// `label`, negated for fake tracks. A fake track of label 0 stays 0, so `fake`
    /// is the flag to test.
    #[inline]
    pub fn signed(&self) -> i32 {
        if self.fake {
            -self.label
        } else {
            self.label
        }
    }
}

/// Another track sharing clusters with this one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlapPartner {
    pub track: TrackId,
    pub shared_clusters: u32,
}

/// Where a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedOrigin {
    pub policy: SeedingPolicy,
    pub pass: usize,
    pub outer_row: usize,
    pub inner_row: usize,
}

/// Counters over a row range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClusterStatistics {
    pub found: u32,
    pub foundable: u32,
    pub shared: u32,
}

#[derive(Debug, Clone)]
pub struct TrackCandidate {
    id: TrackId,
    param: TrackParam,
    sector: usize,
    slots: Vec<RowSlot>,
    origin: SeedOrigin,
    /// Row of the outer support cluster; growth starts here, inward
    start_row: usize,
    current_row: usize,
    n_found: u32,
    n_foundable: u32,
    n_shared: u32,
    chi2: f64,
    miss_streak: u32,
    partners: SmallVec<[OverlapPartner; MAX_OVERLAP_PARTNERS]>,
    status: TrackStatus,
    termination: Option<TerminationReason>,
    marked_for_removal: bool,
    expected_shape: (f64, f64),
    shape_row: Option<usize>,
}

impl TrackCandidate {
    /// A fresh candidate at `start_row`, no cluster attached yet.
    pub fn new(
        id: TrackId,
        param: TrackParam,
        sector: usize,
        n_rows: usize,
        origin: SeedOrigin,
        start_row: usize,
    ) -> Self {
        TrackCandidate {
            id,
            param,
            sector,
            slots: vec![RowSlot::Unvisited; n_rows],
            origin,
            start_row,
            current_row: start_row,
            n_found: 0,
            n_foundable: 0,
            n_shared: 0,
            chi2: 0.0,
            miss_streak: 0,
            partners: SmallVec::new(),
            status: TrackStatus::Seeded,
            termination: None,
            marked_for_removal: false,
            expected_shape: (0.0, 0.0),
            shape_row: None,
        }
    }

    #[inline]
    pub fn id(&self) -> TrackId {
        self.id
    }
    #[inline]
    pub fn param(&self) -> &TrackParam {
        &self.param
    }
    #[inline]
    pub fn param_mut(&mut self) -> &mut TrackParam {
        &mut self.param
    }
    #[inline]
    pub fn sector(&self) -> usize {
        self.sector
    }
    #[inline]
    pub fn set_sector(&mut self, sector: usize) {
        self.sector = sector;
    }
    #[inline]
    pub fn origin(&self) -> &SeedOrigin {
        &self.origin
    }
    #[inline]
    pub fn start_row(&self) -> usize {
        self.start_row
    }
    #[inline]
    pub fn current_row(&self) -> usize {
        self.current_row
    }
    #[inline]
    pub fn n_rows(&self) -> usize {
        self.slots.len()
    }
    #[inline]
    pub fn slot(&self, row: usize) -> &RowSlot {
        &self.slots[row]
    }
    pub fn slots(&self) -> &[RowSlot] {
        &self.slots
    }
    #[inline]
    pub fn n_found(&self) -> u32 {
        self.n_found
    }
    #[inline]
    pub fn n_foundable(&self) -> u32 {
        self.n_foundable
    }
    #[inline]
    pub fn n_shared(&self) -> u32 {
        self.n_shared
    }
    #[inline]
    pub fn chi2(&self) -> f64 {
        self.chi2
    }
    #[inline]
    pub fn miss_streak(&self) -> u32 {
        self.miss_streak
    }
    #[inline]
    pub fn status(&self) -> TrackStatus {
        self.status
    }
    #[inline]
    pub fn termination(&self) -> Option<TerminationReason> {
        self.termination
    }
    #[inline]
    pub fn is_marked_for_removal(&self) -> bool {
        self.marked_for_removal
    }
    pub fn partners(&self) -> &[OverlapPartner] {
        &self.partners
    }
    #[inline]
    pub fn is_vertex_constrained(&self) -> bool {
        self.origin.policy == SeedingPolicy::VertexConstrained
    }

    /// Mean χ² per attached cluster.
    pub fn chi2_per_cluster(&self) -> f64 {
        if self.n_found == 0 {
            0.0
        } else {
            self.chi2 / self.n_found as f64
        }
    }

    /// Attach a cluster on `row`, replacing any cluster already attached there.
    ///
    /// The accumulated χ² is always the sum of the per-row contributions.
    pub fn assign(&mut self, row: usize, mut slot: ClusterSlot, chi2: f64) {
        if let RowSlot::Assigned(old) = self.slots[row] {
            self.n_found -= 1;
            if old.shared {
                self.n_shared -= 1;
            }
            self.chi2 -= old.chi2;
        }
        slot.chi2 = chi2;
        self.slots[row] = RowSlot::Assigned(slot);
        self.n_found += 1;
        if slot.shared {
            self.n_shared += 1;
        }
        self.chi2 += chi2;
        self.miss_streak = 0;
        self.current_row = row;
    }

    /// Record a searched row without an acceptable cluster.
    pub fn mark_missing(&mut self, row: usize) {
        self.slots[row] = RowSlot::Missing;
        self.miss_streak += 1;
        self.current_row = row;
    }

    /// Record a row that could not contribute a cluster.
    pub fn mark_excluded(&mut self, row: usize) {
        self.slots[row] = RowSlot::Excluded;
        self.current_row = row;
    }

    /// Count the current row as one where a cluster was expected.
    #[inline]
    pub fn count_foundable(&mut self) {
        self.n_foundable += 1;
    }

    /// Record a row revisited with an already attached cluster; `chi2` replaces the
    /// row's previous contribution.
    pub fn revisit(&mut self, row: usize, chi2: f64) {
        if let RowSlot::Assigned(slot) = &mut self.slots[row] {
            self.chi2 += chi2 - slot.chi2;
            slot.chi2 = chi2;
        }
        self.miss_streak = 0;
        self.current_row = row;
    }

    pub fn set_status(&mut self, status: TrackStatus) {
        if self.status != TrackStatus::Rejected {
            self.status = status;
        }
    }

    pub fn stop(&mut self, reason: TerminationReason) {
        if self.status != TrackStatus::Rejected {
            self.status = TrackStatus::Stopped;
            self.termination = Some(reason);
        }
    }

    pub fn reject(&mut self, reason: TerminationReason) {
        if self.status != TrackStatus::Rejected {
            self.status = TrackStatus::Rejected;
            self.termination = Some(reason);
        }
    }

    pub fn mark_for_removal(&mut self) {
        self.marked_for_removal = true;
    }

    pub(crate) fn reactivate(&mut self) {
        if self.status == TrackStatus::Stopped {
            self.status = TrackStatus::Active;
            self.termination = None;
        }
    }

    /// Attached clusters as `(row, slot)`, innermost row first.
    pub fn clusters(&self) -> impl Iterator<Item = (usize, &ClusterSlot)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(row, s)| s.cluster().map(|c| (row, c)))
    }

    pub fn first_row(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.cluster().is_some())
    }

    pub fn last_row(&self) -> Option<usize> {
        self.slots.iter().rposition(|s| s.cluster().is_some())
    }

    /// Found, foundable and shared counts over rows `first..=last`.
    pub fn cluster_statistics(&self, first: usize, last: usize) -> ClusterStatistics {
        let mut stats = ClusterStatistics::default();
        if first > last {
            return stats;
        }
        for slot in &self.slots[first..=last.min(self.slots.len() - 1)] {
            match slot {
                RowSlot::Assigned(c) => {
                    stats.found += 1;
                    stats.foundable += 1;
                    if c.shared {
                        stats.shared += 1;
                    }
                }
                RowSlot::Missing => stats.foundable += 1,
                RowSlot::Excluded | RowSlot::Unvisited => {}
            }
        }
        stats
    }

    /// Fraction of rows with an attached cluster among the first `n` rows traversed from
    /// the seeding row, inward. Excluded rows are skipped; unvisited rows count as empty.
    pub fn density_first(&self, n: usize) -> f64 {
        if n == 0 {
            return 0.0;
        }
        let found = (0..=self.start_row.min(self.slots.len().saturating_sub(1)))
            .rev()
            .map(|row| &self.slots[row])
            .filter(|s| !matches!(s, RowSlot::Excluded))
            .take(n)
            .filter(|s| s.cluster().is_some())
            .count();
        found as f64 / n as f64
    }

    /// `(shared + 1) / (found + 1)`
    pub fn shared_factor(&self) -> f64 {
        (self.n_shared as f64 + 1.0) / (self.n_found as f64 + 1.0)
    }

    pub(crate) fn clear_overlaps(&mut self) {
        self.partners.clear();
        for slot in self.slots.iter_mut() {
            if let RowSlot::Assigned(c) = slot {
                c.shared = false;
            }
        }
        self.n_shared = 0;
    }

    /// Record an overlap partner. Returns `false` when the partner list is already full.
    /// True while the overlap partner list can take another entry.
    #[inline]
    pub(crate) fn has_partner_room(&self) -> bool {
        self.partners.len() < MAX_OVERLAP_PARTNERS
    }

    pub(crate) fn add_partner(&mut self, partner: OverlapPartner) -> bool {
        if self.partners.len() >= MAX_OVERLAP_PARTNERS {
            return false;
        }
        self.partners.push(partner);
        true
    }

    pub(crate) fn set_shared(&mut self, row: usize) {
        if let RowSlot::Assigned(c) = &mut self.slots[row] {
            if !c.shared {
                c.shared = true;
                self.n_shared += 1;
            }
        }
    }

    /// Cached expected cluster shape and the row it was computed at.
    pub fn expected_shape(&self) -> Option<(usize, (f64, f64))> {
        self.shape_row.map(|row| (row, self.expected_shape))
    }

    pub fn set_expected_shape(&mut self, row: usize, shape: (f64, f64)) {
        self.shape_row = Some(row);
        self.expected_shape = shape;
    }

    /// Most frequent primary truth label among attached clusters.
    ///
    /// Return
    /// ----------
    /// * `None` if no attached cluster carries a label, otherwise the winning label,
    ///   flagged fake when more than `wrong_fraction` of the attached clusters disagree.
    pub fn cook_label(&self, store: &ClusterStore, wrong_fraction: f64) -> Option<TrackLabel> {
        let mut counts: HashMap<i32, u32, RandomState> = HashMap::default();
        let mut n = 0u32;
        for (_, slot) in self.clusters() {
            n += 1;
            if let Some(label) = store.get(slot.id).and_then(|c| c.primary_label()) {
                *counts.entry(label).or_default() += 1;
            }
        }
        let (label, count) = counts
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))?;
        let wrong = 1.0 - count as f64 / n as f64;
        Some(TrackLabel {
            label,
            fake: wrong > wrong_fraction,
        })
    }

    /// Ids of the attached clusters.
    pub fn cluster_ids(&self) -> impl Iterator<Item = ClusterId> + '_ {
        self.clusters().map(|(_, c)| c.id)
    }
}
