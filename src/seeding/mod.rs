//! # Seeding
//!
//! Combinatorial search for track candidates in the outer rows, before any cluster is owned
//! by a track. A seeding pass pairs clusters of an outer row `i1` with clusters of an inner
//! row `i2` of the same sector, and derives a helix from three points:
//!
//! * [`SeedingPolicy::VertexConstrained`] – the third point is the nominal vertex; the pair is
//!   restricted to the road pointing back to it.
//! * [`SeedingPolicy::Unconstrained`] – the third point is a cluster found in the middle row
//!   near the straight line joining the pair; used for secondaries.
//!
//! A candidate seed is kept only if a cluster exists close to its prolongation on an
//! intermediate row, if the short follow from `i1` to the middle row and the full follow to
//! `i2` find enough clusters, and (vertex-constrained policy) if the track still points back
//! to the vertex in `z`. Discarded seeds release every provisional claim they made.
//!
//! ## See also
//!
//! * [`conformal`] – helix parameters from three points
//! * [`crate::params::SeedingPass`] – pass definition and default schedule
//! * [`crate::follower::Follower`] – used for the short and full follows

pub mod conformal;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clusters::store::ClusterStore;
use crate::clusters::usage::UsageTable;
use crate::clusters::{Cluster, ClusterId};
use crate::constants::{Centimeter, StateCovariance, StateVector, TrackId};
use crate::follower::{cluster_slot, Follower};
use crate::params::{SeedCuts, SeedingPass};
use crate::track::candidate::{SeedOrigin, TerminationReason, TrackCandidate, TrackStatus};
use crate::track::param::TrackParam;

use self::conformal::{Point, SupportVector};

/// Maximum `|tan φ|` of the chord between the two support clusters of an unconstrained seed.
const UNCONSTRAINED_MAX_TAN_PHI: f64 = 0.6;

/// How the third point of a seed is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeedingPolicy {
    VertexConstrained,
    Unconstrained,
}

/// Bookkeeping of one seeding pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SeedingReport {
    pub pass: usize,
    pub policy: SeedingPolicy,
    /// Cluster pairs inside the search windows
    pub pairs_tested: usize,
    /// Seeds passing the kinematic cuts and the middle-row check
    pub seeds_created: usize,
    /// Seeds surviving the follow and acceptance rules
    pub seeds_accepted: usize,
    /// A pair or seed cap was hit and the pass was truncated
    pub overflowed: bool,
}

/// Outer support cluster of a pair.
struct Anchor<'s> {
    id: ClusterId,
    cluster: &'s Cluster,
}

/// Seed finder for one event.
#[derive(Debug, Clone, Copy)]
pub struct SeedGenerator<'a> {
    follower: Follower<'a>,
}

impl<'a> SeedGenerator<'a> {
    pub fn new(follower: Follower<'a>) -> Self {
        SeedGenerator { follower }
    }

    /// Run one seeding pass over every sector.
    ///
    /// Arguments
    /// -----------------
    /// * `store`: the event's clusters.
    /// * `usage`: claims table. Owned clusters are never used as support points; clusters
    ///   attached by accepted seeds stay provisionally claimed.
    /// * `pass`: rows, policy and cuts of the pass.
    /// * `pass_index`: position of the pass in the schedule, recorded in the seed origin.
    /// * `next_id`: next free track id, advanced for every accepted seed.
    ///
    /// Return
    /// ----------
    /// * The accepted seeds, grown down to the inner row, and the pass report.
    pub fn make_seeds(
        &self,
        store: &ClusterStore,
        usage: &mut UsageTable,
        pass: &SeedingPass,
        pass_index: usize,
        next_id: &mut TrackId,
    ) -> (Vec<TrackCandidate>, SeedingReport) {
        let geometry = self.follower.geometry();
        let params = self.follower.params();
        let mut report = SeedingReport {
            pass: pass_index,
            policy: pass.policy,
            pairs_tested: 0,
            seeds_created: 0,
            seeds_accepted: 0,
            overflowed: false,
        };
        let mut seeds = Vec::new();

        'sectors: for sector in 0..geometry.n_sectors() {
            let mut pairs = 0usize;
            let outer = store.row(sector, pass.outer_row);
            for (k1, c1) in outer.clusters().iter().enumerate() {
                let id1 = ClusterId::new(sector, pass.outer_row, k1);
                if usage.is_owned(store.flat_index(id1)) {
                    continue;
                }
                let anchor = Anchor { id: id1, cluster: c1 };
                let partners = match pass.policy {
                    SeedingPolicy::VertexConstrained => {
                        self.vertex_partners(store, usage, pass, sector, &anchor)
                    }
                    SeedingPolicy::Unconstrained => {
                        self.line_partners(store, usage, pass, sector, &anchor)
                    }
                };
                for k2 in partners {
                    pairs += 1;
                    report.pairs_tested += 1;
                    if pairs > params.max_pairs_per_sector {
                        warn!(
                            sector,
                            pass = pass_index,
                            cap = params.max_pairs_per_sector,
                            "seed pair cap reached, sector truncated"
                        );
                        report.overflowed = true;
                        continue 'sectors;
                    }
                    let Some(mut track) = self.build_seed(
                        store, usage, pass, pass_index, sector, &anchor, k2, *next_id,
                    ) else {
                        continue;
                    };
                    report.seeds_created += 1;
                    if self.grow_and_accept(&mut track, store, usage, pass) {
                        *next_id += 1;
                        report.seeds_accepted += 1;
                        seeds.push(track);
                        if report.seeds_accepted >= params.max_seeds_per_pass {
                            warn!(
                                pass = pass_index,
                                cap = params.max_seeds_per_pass,
                                "seed cap reached, pass truncated"
                            );
                            report.overflowed = true;
                            break 'sectors;
                        }
                    } else {
                        release(&track, store, usage);
                    }
                }
            }
        }
        debug!(
            pass = pass_index,
            policy = ?pass.policy,
            pairs = report.pairs_tested,
            created = report.seeds_created,
            accepted = report.seeds_accepted,
            "seeding pass"
        );
        (seeds, report)
    }

    /// Inner-row clusters pointing with the outer cluster back to the vertex.
    fn vertex_partners(
        &self,
        store: &ClusterStore,
        usage: &UsageTable,
        pass: &SeedingPass,
        sector: usize,
        anchor: &Anchor<'_>,
    ) -> Vec<usize> {
        let geometry = self.follower.geometry();
        let params = self.follower.params();
        let cuts = &pass.cuts;
        let (x3, y3, z3) = geometry.vertex_local(sector);
        let x1 = geometry.radius(pass.outer_row);
        let x2 = geometry.radius(pass.inner_row);
        let (y1, z1) = (anchor.cluster.y, anchor.cluster.z);

        if (z1 - z3).abs() > cuts.max_tgl * (x1 - x3) + params.seed_margin_z {
            return Vec::new();
        }
        let lever = (x2 - x3) / (x1 - x3);
        let z_proj = z3 + (z1 - z3) * lever;
        let y_proj = y3 + (y1 - y3) * lever;
        let cmax = cuts.max_curvature;
        let dz = params.seed_margin_z
            + cuts.max_vertex_dz * (x1 - x2) / (x1 - x3)
            + (z1 - z3).abs() * cmax * cmax * (x1 - x3) * (x1 - x2) / 4.0;
        let dy = 0.5 * cmax * (x2 - x3) * (x1 - x2) + params.seed_margin_y;

        self.window(store, usage, sector, pass.inner_row, y_proj, dy, z_proj, dz)
    }

    /// Inner-row clusters compatible with a straight chord of bounded slope.
    fn line_partners(
        &self,
        store: &ClusterStore,
        usage: &UsageTable,
        pass: &SeedingPass,
        sector: usize,
        anchor: &Anchor<'_>,
    ) -> Vec<usize> {
        let geometry = self.follower.geometry();
        let params = self.follower.params();
        let cuts = &pass.cuts;
        let lever = geometry.radius(pass.outer_row) - geometry.radius(pass.inner_row);
        let dz = cuts.max_tgl * lever * 1.2 + params.seed_margin_z;
        let dy = UNCONSTRAINED_MAX_TAN_PHI * lever
            + 0.5 * cuts.max_curvature * lever * lever
            + params.seed_margin_y;
        self.window(
            store,
            usage,
            sector,
            pass.inner_row,
            anchor.cluster.y,
            dy,
            anchor.cluster.z,
            dz,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn window(
        &self,
        store: &ClusterStore,
        usage: &UsageTable,
        sector: usize,
        row: usize,
        y: Centimeter,
        dy: Centimeter,
        z: Centimeter,
        dz: Centimeter,
    ) -> Vec<usize> {
        let clusters = store.row(sector, row).clusters();
        store
            .clusters_in_z_window(sector, row, z - dz, z + dz)
            .filter(|&k| (clusters[k].y - y).abs() <= dy)
            .filter(|&k| !usage.is_owned(store.flat_index(ClusterId::new(sector, row, k))))
            .collect()
    }

    /// Seed state and covariance at the outer cluster for one pair, or `None` if the pair
    /// fails the kinematic cuts or the middle-row check.
    #[allow(clippy::too_many_arguments)]
    fn build_seed(
        &self,
        store: &ClusterStore,
        usage: &mut UsageTable,
        pass: &SeedingPass,
        pass_index: usize,
        sector: usize,
        anchor: &Anchor<'_>,
        k2: usize,
        id: TrackId,
    ) -> Option<TrackCandidate> {
        let geometry = self.follower.geometry();
        let params = self.follower.params();
        let (i1, i2) = (pass.outer_row, pass.inner_row);
        let mid = (i1 + i2) / 2;
        let c1 = anchor.cluster;
        let c2 = store.row(sector, i2).get(k2)?;
        let p1: Point = [geometry.radius(i1), c1.y, c1.z];
        let p2: Point = [geometry.radius(i2), c2.y, c2.z];
        let two = |c: &Cluster| (2.0 * c.sigma_y2, 2.0 * c.sigma_z2);
        let (v1y, v1z) = two(c1);
        let (v2y, v2z) = two(c2);

        let (state, cov, check_row) = match pass.policy {
            SeedingPolicy::VertexConstrained => {
                let (x3, y3, z3) = geometry.vertex_local(sector);
                let points = [p1, p2, [x3, y3, z3]];
                let state = conformal::state_from_points(&points, 1)?;
                let vertex = geometry.vertex();
                let variances = SupportVector::from_column_slice(&[
                    v1y,
                    v1z,
                    v2y,
                    v2z,
                    vertex.sigma_y.powi(2) + params.vertex_curvature_term * state[4].powi(2),
                    vertex.sigma_z.powi(2),
                ]);
                let cov = self.covariance(&points, 1, &variances)?;
                (state, cov, mid)
            }
            SeedingPolicy::Unconstrained => {
                let xm = geometry.radius(mid);
                let t = (xm - p2[0]) / (p1[0] - p2[0]);
                let lever = p1[0] - p2[0];
                let road_y =
                    0.125 * pass.cuts.max_curvature * lever * lever + params.middle_road_y;
                let hit = store.nearest(
                    sector,
                    mid,
                    p2[1] + (p1[1] - p2[1]) * t,
                    p2[2] + (p1[2] - p2[2]) * t,
                    road_y,
                    params.middle_road_z,
                )?;
                if usage.is_owned(store.flat_index(hit.id)) {
                    return None;
                }
                let pm: Point = [xm, hit.cluster.y, hit.cluster.z];
                let points = [p1, pm, p2];
                let state = conformal::state_from_points(&points, 2)?;
                let (vmy, vmz) = two(hit.cluster);
                let variances =
                    SupportVector::from_column_slice(&[v1y, v1z, vmy, vmz, v2y, v2z]);
                let cov = self.covariance(&points, 2, &variances)?;
                (state, cov, (i1 + mid) / 2)
            }
        };

        if !passes_cuts(&state, &pass.cuts, params.max_seed_snp) {
            return None;
        }
        let param = TrackParam::new(p1[0], geometry.sector_alpha(sector), state, cov);
        if check_row > i2
            && check_row < i1
            && !self.has_cluster_near(store, &param, sector, check_row)
        {
            return None;
        }

        let origin = SeedOrigin {
            policy: pass.policy,
            pass: pass_index,
            outer_row: i1,
            inner_row: i2,
        };
        let mut track = TrackCandidate::new(id, param, sector, geometry.n_rows(), origin, i1);
        let flat = store.flat_index(anchor.id);
        let shared = usage.is_taken(flat, params.provisional_threshold);
        let slot = cluster_slot(track.param(), anchor.id, shared);
        track.count_foundable();
        track.assign(i1, slot, 0.0);
        usage.claim_provisional(flat);
        track.set_status(TrackStatus::Growing);
        Some(track)
    }

    fn covariance(
        &self,
        points: &[Point; 3],
        dip_from: usize,
        variances: &SupportVector,
    ) -> Option<StateCovariance> {
        let xs = [points[0][0], points[1][0], points[2][0]];
        let support = SupportVector::from_column_slice(&[
            points[0][1],
            points[0][2],
            points[1][1],
            points[1][2],
            points[2][1],
            points[2][2],
        ]);
        let map = |v: &SupportVector| {
            conformal::state_from_points(
                &[[xs[0], v[0], v[1]], [xs[1], v[2], v[3]], [xs[2], v[4], v[5]]],
                dip_from,
            )
        };
        conformal::seed_covariance(map, &support, variances, self.follower.params().jacobian_step)
    }

    fn has_cluster_near(
        &self,
        store: &ClusterStore,
        param: &TrackParam,
        sector: usize,
        row: usize,
    ) -> bool {
        let params = self.follower.params();
        param
            .prolongation(self.follower.geometry().radius(row))
            .and_then(|(y, z)| {
                store.nearest(sector, row, y, z, params.middle_road_y, params.middle_road_z)
            })
            .is_some()
    }

    /// Short follow, full follow to the inner row and acceptance rules.
    fn grow_and_accept(
        &self,
        track: &mut TrackCandidate,
        store: &ClusterStore,
        usage: &mut UsageTable,
        pass: &SeedingPass,
    ) -> bool {
        let params = self.follower.params();
        let (i1, i2) = (pass.outer_row, pass.inner_row);
        let mid = (i1 + i2) / 2;

        self.follower.follow_inward(track, mid, store, usage);
        let (found, foundable, shared) = counts(track);
        let c = track.param().covariance();
        if !is_growing(track)
            || found < params.seed_short_found_fraction * foundable
            || shared > params.seed_short_shared_fraction * found
            || c[(0, 0)] + c[(1, 1)] > params.seed_short_max_variance
        {
            track.reject(TerminationReason::SeedQuality);
            return false;
        }

        self.follower.follow_inward(track, i2, store, usage);
        let (found, foundable, shared) = counts(track);
        if !is_growing(track)
            || found < params.seed_full_span_fraction * (i1 - i2) as f64
            || found < params.seed_full_found_fraction * foundable
            || shared > params.seed_full_shared_fraction * found
        {
            track.reject(TerminationReason::SeedQuality);
            return false;
        }

        if pass.policy == SeedingPolicy::Unconstrained {
            return true;
        }
        let geometry = self.follower.geometry();
        let (x_vertex, _, z_vertex) = geometry.vertex_local(track.sector());
        let points_back = |t: &TrackCandidate| {
            t.param()
                .z_at(x_vertex)
                .is_some_and(|z| (z - z_vertex).abs() <= pass.cuts.max_vertex_dz)
        };
        if points_back(track) {
            return true;
        }
        for extra in params.vertex_retry_rows {
            let to = track.current_row().saturating_sub(extra);
            if to == track.current_row() || !is_growing(track) {
                break;
            }
            self.follower.follow_inward(track, to, store, usage);
            if is_growing(track) && points_back(track) {
                return true;
            }
        }
        track.reject(TerminationReason::VertexMismatch);
        false
    }
}

fn passes_cuts(state: &StateVector, cuts: &SeedCuts, max_snp: f64) -> bool {
    state[4].abs() <= cuts.max_curvature
        && state[2].abs() < max_snp
        && state[3].abs() <= cuts.max_tgl
}

#[inline]
fn is_growing(track: &TrackCandidate) -> bool {
    track.status() == TrackStatus::Growing
}

fn counts(track: &TrackCandidate) -> (f64, f64, f64) {
    (
        track.n_found() as f64,
        track.n_foundable() as f64,
        track.n_shared() as f64,
    )
}

/// Give back the provisional claims of a discarded seed.
fn release(track: &TrackCandidate, store: &ClusterStore, usage: &mut UsageTable) {
    for id in track.cluster_ids() {
        usage.release_provisional(store.flat_index(id));
    }
}

#[cfg(test)]
mod test_seeding {
    use super::*;
    use crate::error_model::ClusterErrorModel;
    use crate::geometry::DetectorGeometry;
    use crate::params::TrackerParams;
    use approx::assert_relative_eq;

    fn geometry() -> DetectorGeometry {
        DetectorGeometry::builder()
            .uniform_rows(120, 100.0, 1.0, 0.5)
            .build()
            .unwrap()
    }

    /// Exact clusters of a helix through the local origin of sector 0.
    fn helix(geometry: &DetectorGeometry, c: f64, snp0: f64, tgl: f64, z0: f64) -> Vec<Cluster> {
        let yc = (1.0 - snp0 * snp0).sqrt() / c;
        (0..geometry.n_rows())
            .map(|row| {
                let x = geometry.radius(row);
                let snp = c * x + snp0;
                let y = yc - (1.0 - snp * snp).sqrt() / c;
                let z = z0 + tgl * (snp.asin() - snp0.asin()) / c;
                Cluster::new(0, row as u16, y, z)
            })
            .collect()
    }

    fn pass(policy: SeedingPolicy) -> SeedingPass {
        SeedingPass {
            policy,
            outer_row: 119,
            inner_row: 104,
            cuts: SeedCuts::PRIMARY,
        }
    }

    #[test]
    fn primary_track_is_seeded_once() {
        let geometry = geometry();
        let params = TrackerParams::default();
        let errors = ClusterErrorModel::new(&geometry);
        let generator = SeedGenerator::new(Follower::new(&geometry, &params, &errors));
        let store = ClusterStore::build(&geometry, helix(&geometry, 0.001, -0.1, 0.1, 0.0));
        let mut usage = UsageTable::new(store.len());
        let mut next_id = 7;

        let (seeds, report) = generator.make_seeds(
            &store,
            &mut usage,
            &pass(SeedingPolicy::VertexConstrained),
            0,
            &mut next_id,
        );
        assert_eq!(seeds.len(), 1);
        assert_eq!(report.seeds_accepted, 1);
        assert!(!report.overflowed);
        assert_eq!(next_id, 8);

        let seed = &seeds[0];
        assert_eq!(seed.id(), 7);
        assert!(seed.is_vertex_constrained());
        assert_eq!(seed.status(), TrackStatus::Growing);
        assert_eq!(seed.n_found(), 16);
        assert_eq!(seed.n_foundable(), 16);
        assert_relative_eq!(seed.param().curvature(), 0.001, epsilon = 1e-5);
        assert_relative_eq!(seed.param().tgl(), 0.1, epsilon = 1e-4);
        let outer = store.flat_index(ClusterId::new(0, 119, 0));
        assert_eq!(usage.provisional_count(outer), 1);
    }

    #[test]
    fn displaced_track_needs_the_unconstrained_policy() {
        let geometry = geometry();
        let params = TrackerParams::default();
        let errors = ClusterErrorModel::new(&geometry);
        let generator = SeedGenerator::new(Follower::new(&geometry, &params, &errors));
        let store = ClusterStore::build(&geometry, helix(&geometry, 0.001, -0.1, 0.1, 40.0));
        let mut usage = UsageTable::new(store.len());
        let mut next_id = 0;

        let (seeds, _) = generator.make_seeds(
            &store,
            &mut usage,
            &pass(SeedingPolicy::VertexConstrained),
            0,
            &mut next_id,
        );
        assert!(seeds.is_empty());
        assert_eq!(usage.census()[0], store.len());

        let (seeds, report) = generator.make_seeds(
            &store,
            &mut usage,
            &pass(SeedingPolicy::Unconstrained),
            1,
            &mut next_id,
        );
        assert_eq!(report.seeds_accepted, 1);
        let seed = &seeds[0];
        assert_eq!(seed.origin().policy, SeedingPolicy::Unconstrained);
        assert_eq!(seed.origin().pass, 1);
        assert_relative_eq!(seed.param().curvature(), 0.001, epsilon = 1e-5);
        assert_eq!(seed.n_found(), 16);
    }

    #[test]
    fn owned_outer_clusters_are_not_seeded() {
        let geometry = geometry();
        let params = TrackerParams::default();
        let errors = ClusterErrorModel::new(&geometry);
        let generator = SeedGenerator::new(Follower::new(&geometry, &params, &errors));
        let store = ClusterStore::build(&geometry, helix(&geometry, 0.001, -0.1, 0.1, 0.0));
        let mut usage = UsageTable::new(store.len());
        usage.claim_authoritative(store.flat_index(ClusterId::new(0, 119, 0)));
        let mut next_id = 0;

        let (seeds, report) = generator.make_seeds(
            &store,
            &mut usage,
            &pass(SeedingPolicy::VertexConstrained),
            0,
            &mut next_id,
        );
        assert!(seeds.is_empty());
        assert_eq!(report.pairs_tested, 0);
    }

    #[test]
    fn steep_curvature_fails_the_cuts() {
        let cuts = SeedCuts::PRIMARY;
        let ok = StateVector::new(0.0, 0.0, 0.1, 0.5, 0.004);
        assert!(passes_cuts(&ok, &cuts, 0.9));
        let curly = StateVector::new(0.0, 0.0, 0.1, 0.5, -0.01);
        assert!(!passes_cuts(&curly, &cuts, 0.9));
        let inclined = StateVector::new(0.0, 0.0, 0.95, 0.5, 0.001);
        assert!(!passes_cuts(&inclined, &cuts, 0.9));
    }
}
