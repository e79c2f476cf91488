//! # Track consolidation
//!
//! Arbitration between candidates competing for the same clusters. Run after every seeding
//! pass over the whole accumulated pool, and once more at the end of the event:
//!
//! 1. candidates rejected or marked for removal during following are dropped,
//! 2. the pool is sorted by `(sector, z, id)`,
//! 3. kinematically compatible pairs with a long common row span have their identical
//!    clusters counted; pairs above `min_shared_clusters` flag those clusters as shared and
//!    record each other as overlap partners,
//! 4. a candidate whose partners share more than `duplicate_shared_fraction` of its clusters
//!    is compared with each partner, and the one with the larger curvature variance goes,
//! 5. a global usage pass in quality order removes candidates with too large a fraction of
//!    clusters already claimed by better candidates, and short candidates with too few
//!    clusters of their own,
//! 6. authoritative ownership is rebuilt from the survivors and provisional claims cleared.
//!
//! Every step is recomputed from the candidates themselves, so running the consolidation
//! again on its own output removes nothing.

use std::cmp::{Ordering, Reverse};
use std::collections::HashMap;
use std::ops::AddAssign;

use ahash::RandomState;
use itertools::Itertools;
use ordered_float::OrderedFloat;
use serde::Serialize;
use tracing::{debug, warn};

use crate::clusters::store::ClusterStore;
use crate::clusters::usage::UsageTable;
use crate::constants::TrackId;
use crate::geometry::DetectorGeometry;
use crate::params::TrackerParams;
use crate::track::candidate::{OverlapPartner, RowSlot, TrackCandidate, TrackStatus};

/// Removal counters of one or more consolidations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsolidationReport {
    /// Rejected or marked for removal during following
    pub removed_rejected: usize,
    pub removed_duplicates: usize,
    /// Too many clusters claimed by better candidates
    pub removed_shared: usize,
    pub removed_short: usize,
    /// Overlapping pairs that did not fit in a partner list
    pub partner_overflows: usize,
}

impl ConsolidationReport {
    pub fn removed(&self) -> usize {
        self.removed_rejected + self.removed_duplicates + self.removed_shared + self.removed_short
    }
}

impl AddAssign for ConsolidationReport {
    fn add_assign(&mut self, rhs: Self) {
        self.removed_rejected += rhs.removed_rejected;
        self.removed_duplicates += rhs.removed_duplicates;
        self.removed_shared += rhs.removed_shared;
        self.removed_short += rhs.removed_short;
        self.partner_overflows += rhs.partner_overflows;
    }
}

/// An overlapping pair found by the tagging step.
struct Overlap {
    a: usize,
    b: usize,
    rows: Vec<usize>,
}

#[derive(Debug, Clone, Copy)]
pub struct Consolidator<'a> {
    geometry: &'a DetectorGeometry,
    params: &'a TrackerParams,
}

impl<'a> Consolidator<'a> {
    pub fn new(geometry: &'a DetectorGeometry, params: &'a TrackerParams) -> Self {
        Consolidator { geometry, params }
    }

    /// Consolidate a pool of candidates.
    ///
    /// Arguments
    /// -----------------
    /// * `tracks`: the whole pool; consumed.
    /// * `store`: the event's clusters.
    /// * `usage`: rebuilt so that exactly the survivors' clusters are owned.
    ///
    /// Return
    /// ----------
    /// * The survivors sorted by `(sector, z, id)`, and the removal counters.
    pub fn consolidate(
        &self,
        mut tracks: Vec<TrackCandidate>,
        store: &ClusterStore,
        usage: &mut UsageTable,
    ) -> (Vec<TrackCandidate>, ConsolidationReport) {
        let mut report = ConsolidationReport::default();

        let before = tracks.len();
        tracks.retain(|t| t.status() != TrackStatus::Rejected && !t.is_marked_for_removal());
        report.removed_rejected = before - tracks.len();

        tracks.sort_by_key(|t| (t.sector(), OrderedFloat(t.param().z()), t.id()));
        for t in tracks.iter_mut() {
            t.clear_overlaps();
        }

        report.partner_overflows = self.tag_overlaps(&mut tracks);
        let mut alive = vec![true; tracks.len()];
        report.removed_duplicates = self.remove_duplicates(&tracks, &mut alive);
        let (shared, short) = self.remove_by_usage(&tracks, &mut alive, store);
        report.removed_shared = shared;
        report.removed_short = short;

        let survivors = tracks
            .into_iter()
            .zip(alive)
            .filter_map(|(t, keep)| keep.then_some(t))
            .collect::<Vec<_>>();

        usage.reset_authoritative();
        for id in survivors.iter().flat_map(|t| t.cluster_ids()) {
            usage.claim_authoritative(store.flat_index(id));
        }
        usage.clear_provisional();

        debug!(
            kept = survivors.len(),
            rejected = report.removed_rejected,
            duplicates = report.removed_duplicates,
            shared = report.removed_shared,
            short = report.removed_short,
            "consolidation"
        );
        (survivors, report)
    }

    fn compatible(&self, a: &TrackCandidate, b: &TrackCandidate) -> bool {
        let p = self.params;
        self.geometry.sector_distance(a.sector(), b.sector()) <= 1
            && (a.param().curvature() - b.param().curvature()).abs() < p.pair_max_delta_curvature
            && (a.param().tgl() - b.param().tgl()).abs() < p.pair_max_delta_tgl
    }

    /// Rows of the common span where both candidates hold the same cluster.
    fn common_clusters(&self, a: &TrackCandidate, b: &TrackCandidate) -> Option<Vec<usize>> {
        let first = a.first_row()?.max(b.first_row()?);
        let last = a.last_row()?.min(b.last_row()?);
        if last < first || last - first <= self.params.min_overlap_rows {
            return None;
        }
        let rows = (first..=last)
            .filter(|&row| match (a.slot(row), b.slot(row)) {
                (RowSlot::Assigned(x), RowSlot::Assigned(y)) => x.id == y.id,
                _ => false,
            })
            .collect::<Vec<_>>();
        (rows.len() > self.params.min_shared_clusters as usize).then_some(rows)
    }

    /// Flag shared clusters and record partners. Returns the number of partner overflows.
    fn tag_overlaps(&self, tracks: &mut [TrackCandidate]) -> usize {
        let overlaps = (0..tracks.len())
            .tuple_combinations()
            .filter(|&(a, b)| self.compatible(&tracks[a], &tracks[b]))
            .filter_map(|(a, b)| {
                self.common_clusters(&tracks[a], &tracks[b])
                    .map(|rows| Overlap { a, b, rows })
            })
            .collect::<Vec<_>>();

        let mut overflows = 0;
        for Overlap { a, b, rows } in overlaps {
            let n = rows.len() as u32;
            let (id_a, id_b) = (tracks[a].id(), tracks[b].id());
            for &row in &rows {
                tracks[a].set_shared(row);
                tracks[b].set_shared(row);
            }
            // a pair is recorded on both sides or on neither
            if !(tracks[a].has_partner_room() && tracks[b].has_partner_room()) {
                warn!(a = id_a, b = id_b, shared = n, "overlap partner list full");
                overflows += 1;
                continue;
            }
            tracks[a].add_partner(OverlapPartner {
                track: id_b,
                shared_clusters: n,
            });
            tracks[b].add_partner(OverlapPartner {
                track: id_a,
                shared_clusters: n,
            });
        }
        overflows
    }

    fn remove_duplicates(&self, tracks: &[TrackCandidate], alive: &mut [bool]) -> usize {
        let index: HashMap<TrackId, usize, RandomState> =
            tracks.iter().enumerate().map(|(i, t)| (t.id(), i)).collect();
        let mut removed = 0;
        for i in 0..tracks.len() {
            if !alive[i] || tracks[i].n_found() == 0 {
                continue;
            }
            let total: u32 = tracks[i].partners().iter().map(|p| p.shared_clusters).sum();
            if (total as f64) <= self.params.duplicate_shared_fraction * tracks[i].n_found() as f64
            {
                continue;
            }
            for partner in tracks[i].partners() {
                let Some(&j) = index.get(&partner.track) else {
                    continue;
                };
                if !alive[j] {
                    continue;
                }
                let loser = if worse_curvature(&tracks[i], &tracks[j]) { i } else { j };
                alive[loser] = false;
                removed += 1;
                if loser == i {
                    break;
                }
            }
        }
        removed
    }

    /// Global usage pass. Returns `(removed for sharing, removed as short)`.
    fn remove_by_usage(
        &self,
        tracks: &[TrackCandidate],
        alive: &mut [bool],
        store: &ClusterStore,
    ) -> (usize, usize) {
        let p = self.params;
        let bz = self.geometry.bz();
        let order = (0..tracks.len())
            .filter(|&i| alive[i])
            .sorted_by_key(|&i| (Reverse(OrderedFloat(quality(&tracks[i], bz))), tracks[i].id()))
            .collect::<Vec<_>>();

        let mut claimed = vec![false; store.len()];
        let (mut removed_shared, mut removed_short) = (0, 0);
        for i in order {
            let t = &tracks[i];
            let flats = t.cluster_ids().map(|id| store.flat_index(id)).collect::<Vec<_>>();
            let found = flats.len() as f64;
            let shared = flats.iter().filter(|&&f| claimed[f]).count() as f64;
            let limit = if t.is_vertex_constrained() {
                p.max_shared_constrained
            } else {
                p.max_shared_unconstrained
            };
            if (shared + 1.0) / (found + 1.0) > limit {
                alive[i] = false;
                removed_shared += 1;
            } else if (found as u32) < p.short_track_found
                && found - 0.5 * shared < p.short_track_min_clusters
            {
                alive[i] = false;
                removed_short += 1;
            } else {
                for f in flats {
                    claimed[f] = true;
                }
            }
        }
        (removed_shared, removed_short)
    }
}

/// Ordering key of the global usage pass: long, well-populated, stiff tracks first.
fn quality(track: &TrackCandidate, bz: f64) -> f64 {
    let span = match (track.first_row(), track.last_row()) {
        (Some(first), Some(last)) => (last - first) as f64,
        _ => 0.0,
    };
    (span + track.n_found() as f64) * (track.param().pt(bz) + 0.5).sqrt()
}

/// True if `a` loses against `b`: larger curvature variance, ties broken by the larger id.
fn worse_curvature(a: &TrackCandidate, b: &TrackCandidate) -> bool {
    let (va, vb) = (a.param().covariance()[(4, 4)], b.param().covariance()[(4, 4)]);
    match va.total_cmp(&vb) {
        Ordering::Equal => a.id() > b.id(),
        ord => ord == Ordering::Greater,
    }
}

#[cfg(test)]
mod test_consolidator {
    use super::*;
    use crate::clusters::{Cluster, ClusterId};
    use crate::constants::{StateVector, MAX_OVERLAP_PARTNERS};
    use crate::seeding::SeedingPolicy;
    use crate::track::candidate::{ClusterSlot, SeedOrigin, TerminationReason};
    use crate::track::param::TrackParam;
    use nalgebra::Matrix5;

    const N_ROWS: usize = 120;

    fn geometry() -> DetectorGeometry {
        DetectorGeometry::builder()
            .uniform_rows(N_ROWS, 100.0, 1.0, 0.5)
            .build()
            .unwrap()
    }

    /// Two clusters per row, index 0 and 1.
    fn store(geometry: &DetectorGeometry) -> ClusterStore {
        let clusters = (0..N_ROWS).flat_map(|row| {
            [
                Cluster::new(0, row as u16, 0.0, 10.0),
                Cluster::new(0, row as u16, 1.0, 20.0),
            ]
        });
        ClusterStore::build(geometry, clusters)
    }

    /// A track holding cluster `pick(row)` on every row in `rows`.
    fn track(
        id: TrackId,
        c44: f64,
        rows: std::ops::Range<usize>,
        pick: impl Fn(usize) -> usize,
    ) -> TrackCandidate {
        let cov = Matrix5::from_diagonal(&StateVector::new(0.01, 0.01, 1e-4, 1e-4, c44));
        let param = TrackParam::new(100.0, 0.0, StateVector::new(0.0, 10.0, 0.0, 0.0, 0.001), cov);
        let origin = SeedOrigin {
            policy: SeedingPolicy::VertexConstrained,
            pass: 0,
            outer_row: N_ROWS - 1,
            inner_row: 0,
        };
        let mut t = TrackCandidate::new(id, param, 0, N_ROWS, origin, N_ROWS - 1);
        for row in rows.rev() {
            t.count_foundable();
            let slot = ClusterSlot {
                id: ClusterId::new(0, row, pick(row)),
                shared: false,
                tan_phi: 0.0,
                tan_lambda: 0.0,
                chi2: 0.0,
            };
            t.assign(row, slot, 1.0);
        }
        t.set_status(TrackStatus::Active);
        t
    }

    #[test]
    fn near_duplicates_keep_the_better_fit() {
        let geometry = geometry();
        let params = TrackerParams::default();
        let store = store(&geometry);
        let mut usage = UsageTable::new(store.len());

        // 90 % of the rows hold the same cluster
        let a = track(1, 2e-8, 0..100, |_| 0);
        let b = track(2, 1e-8, 0..100, |row| usize::from(row % 10 == 0));
        let consolidator = Consolidator::new(&geometry, &params);
        let (kept, report) = consolidator.consolidate(vec![a, b], &store, &mut usage);

        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id(), 2);
        assert_eq!(report.removed_duplicates, 1);
        assert_eq!(usage.census(), [store.len() - 100, 0, 100, 0]);
    }

    #[test]
    fn disjoint_tracks_survive_and_own_their_clusters() {
        let geometry = geometry();
        let params = TrackerParams::default();
        let store = store(&geometry);
        let mut usage = UsageTable::new(store.len());
        for flat in 0..store.len() {
            usage.claim_provisional(flat);
        }

        let a = track(1, 1e-8, 0..100, |_| 0);
        let b = track(2, 1e-8, 10..110, |_| 1);
        let consolidator = Consolidator::new(&geometry, &params);
        let (kept, report) = consolidator.consolidate(vec![a, b], &store, &mut usage);

        assert_eq!(kept.len(), 2);
        assert_eq!(report.removed(), 0);
        assert!(kept.iter().all(|t| t.partners().is_empty() && t.n_shared() == 0));
        // provisional claims are gone, the survivors' clusters are owned exactly once
        assert_eq!(usage.census(), [store.len() - 200, 0, 200, 0]);
    }

    #[test]
    fn rejected_and_short_tracks_are_removed() {
        let geometry = geometry();
        let params = TrackerParams::default();
        let store = store(&geometry);
        let mut usage = UsageTable::new(store.len());

        let mut rejected = track(1, 1e-8, 0..100, |_| 0);
        rejected.reject(TerminationReason::HighChi2);
        let short = track(2, 1e-8, 0..15, |_| 1);
        let long = track(3, 1e-8, 20..100, |_| 1);
        let consolidator = Consolidator::new(&geometry, &params);
        let (kept, report) =
            consolidator.consolidate(vec![rejected, short, long], &store, &mut usage);

        assert_eq!(kept.iter().map(|t| t.id()).collect::<Vec<_>>(), vec![3]);
        assert_eq!(report.removed_rejected, 1);
        assert_eq!(report.removed_short, 1);
    }

    #[test]
    fn sharing_beyond_the_limit_loses_to_the_better_track() {
        let geometry = geometry();
        // partner tagging off: only the global usage pass can arbitrate
        let params = TrackerParams::builder().min_shared_clusters(500).build().unwrap();
        let store = store(&geometry);
        let mut usage = UsageTable::new(store.len());

        let long = track(1, 1e-8, 0..110, |_| 0);
        // 60 of its 80 clusters belong to the longer track
        let partial = track(2, 1e-8, 30..110, |row| usize::from(row >= 90));
        let consolidator = Consolidator::new(&geometry, &params);
        let (kept, report) = consolidator.consolidate(vec![partial, long], &store, &mut usage);

        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id(), 1);
        assert_eq!(report.removed_shared, 1);
    }

    #[test]
    fn crowded_overlaps_are_recorded_on_both_sides() {
        let geometry = geometry();
        let params = TrackerParams::default();
        let store = store(&geometry);
        let consolidator = Consolidator::new(&geometry, &params);

        // six copies of one track: every pair overlaps, partner lists overflow
        let mut tracks = (1..=6)
            .map(|id| track(id, id as f64 * 1e-8, 0..100, |_| 0))
            .collect::<Vec<_>>();
        let overflows = consolidator.tag_overlaps(&mut tracks);
        assert!(overflows > 0);
        for t in &tracks {
            assert!(t.partners().len() <= MAX_OVERLAP_PARTNERS);
            for p in t.partners() {
                let other = tracks.iter().find(|o| o.id() == p.track).unwrap();
                assert!(other.partners().iter().any(|q| q.track == t.id()));
            }
        }

        let mut usage = UsageTable::new(store.len());
        let pool = (1..=6)
            .map(|id| track(id, id as f64 * 1e-8, 0..100, |_| 0))
            .collect::<Vec<_>>();
        let (once, report) = consolidator.consolidate(pool, &store, &mut usage);
        assert_eq!(once.iter().map(|t| t.id()).collect::<Vec<_>>(), vec![1]);
        assert_eq!(report.removed(), 5);
        assert!(report.partner_overflows > 0);
        let census = usage.census();

        let (twice, report) = consolidator.consolidate(once, &store, &mut usage);
        assert_eq!(report.removed(), 0);
        assert_eq!(report.partner_overflows, 0);
        assert_eq!(twice.iter().map(|t| t.id()).collect::<Vec<_>>(), vec![1]);
        assert_eq!(usage.census(), census);
    }

    #[test]
    fn consolidation_is_idempotent() {
        let geometry = geometry();
        let params = TrackerParams::default();
        let store = store(&geometry);
        let mut usage = UsageTable::new(store.len());

        let pool = vec![
            track(1, 3e-8, 0..100, |_| 0),
            track(2, 1e-8, 0..100, |row| usize::from(row % 10 == 0)),
            track(3, 1e-8, 0..60, |_| 1),
            track(4, 2e-8, 50..120, |row| usize::from(row < 110)),
            track(5, 1e-8, 0..12, |_| 1),
        ];
        let consolidator = Consolidator::new(&geometry, &params);
        let (once, _) = consolidator.consolidate(pool, &store, &mut usage);
        let census = usage.census();
        let ids = once.iter().map(|t| t.id()).collect::<Vec<_>>();

        let (twice, report) = consolidator.consolidate(once, &store, &mut usage);
        assert_eq!(report.removed(), 0);
        assert_eq!(twice.iter().map(|t| t.id()).collect::<Vec<_>>(), ids);
        assert_eq!(usage.census(), census);

        // every owned cluster belongs to a survivor
        let owned = census[2] + census[3];
        let distinct = twice
            .iter()
            .flat_map(|t| t.cluster_ids())
            .sorted()
            .dedup()
            .count();
        assert_eq!(owned, distinct);
    }
}
