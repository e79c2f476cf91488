//! # Track following
//!
//! Row-by-row extension of a candidate. For each row the [`Follower`]:
//!
//! 1. propagates the state to the row radius, stopping the track if that is impossible,
//! 2. switches to the neighbouring sector frame if the track left the sector's row,
//! 3. excludes the row if the track crosses it in a dead zone or outside the drift volume,
//! 4. otherwise counts the row as foundable and looks for the nearest cluster in a road
//!    scaled by the predicted track and measurement uncertainty,
//! 5. classifies the match ([`MatchTier`]) and, if acceptable, updates the state and claims
//!    the cluster provisionally.
//!
//! Between rows the growth rules decide whether the candidate keeps growing, stops
//! (kept for the reactivation rule) or is rejected.
//!
//! ## See also
//!
//! * [`Follower::follow_to_next_row`] – one row
//! * [`Follower::follow_inward`] – growth towards the beam
//! * [`Follower::refit_outward`] – second, outward pass over a grown track

use tracing::trace;

use crate::clusters::store::ClusterStore;
use crate::clusters::usage::UsageTable;
use crate::clusters::{Cluster, ClusterId, ClusterKind};
use crate::constants::{Centimeter, DPI};
use crate::error_model::{ClusterErrorModel, ErrorQuery};
use crate::geometry::DetectorGeometry;
use crate::params::TrackerParams;
use crate::track::candidate::{ClusterSlot, RowSlot, TerminationReason, TrackCandidate, TrackStatus};
use crate::track::param::{Measurement, TrackParam};

/// Amplitude of the nominal cluster used to size search roads.
const ROAD_AMPLITUDE: f64 = 100.0;

/// Attached clusters needed before the χ² and shared-fraction rules apply.
const MIN_CLUSTERS_FOR_QUALITY: u32 = 10;

/// Result of [`Follower::follow_to_next_row`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// A cluster was attached
    Updated,
    /// The row was searched without success
    NoClusterFound,
    /// The row could not contribute a cluster
    DeadZone,
    /// The track moved to a neighbouring sector and no cluster was attached
    SectorCrossed,
    /// The track cannot be continued
    Stopped,
}

/// Quality class of a cluster/track association.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    Excellent,
    AcceptableIsolated,
    AcceptableOverlapping,
    Rejected,
}

impl MatchTier {
    /// Classify per-axis normalized squared residuals.
    ///
    /// Arguments
    /// -----------------
    /// * `ry2`, `rz2`: `Δy²/σy²` and `Δz²/σz²` with the combined track and cluster variances.
    /// * `kind`: shape class of the cluster.
    /// * `params`: tier thresholds and their scale factor.
    pub fn classify(ry2: f64, rz2: f64, kind: ClusterKind, params: &TrackerParams) -> MatchTier {
        if !(ry2 + rz2 <= params.max_total_residual) {
            return MatchTier::Rejected;
        }
        let k = params.chi2_scale;
        let worst = ry2.max(rz2);
        if worst <= params.excellent_match * k {
            return MatchTier::Excellent;
        }
        match kind {
            ClusterKind::Isolated if worst <= params.isolated_match * k => {
                MatchTier::AcceptableIsolated
            }
            ClusterKind::Overlapping | ClusterKind::Split | ClusterKind::Edge
                if worst <= params.overlapping_match * k =>
            {
                MatchTier::AcceptableOverlapping
            }
            _ => MatchTier::Rejected,
        }
    }

    #[inline]
    pub fn is_accepted(self) -> bool {
        self != MatchTier::Rejected
    }
}

/// Stateless row-by-row extender; all event state is passed in.
#[derive(Debug, Clone, Copy)]
pub struct Follower<'a> {
    geometry: &'a DetectorGeometry,
    params: &'a TrackerParams,
    errors: &'a ClusterErrorModel,
}

impl<'a> Follower<'a> {
    pub fn new(
        geometry: &'a DetectorGeometry,
        params: &'a TrackerParams,
        errors: &'a ClusterErrorModel,
    ) -> Self {
        Follower {
            geometry,
            params,
            errors,
        }
    }

    pub fn geometry(&self) -> &'a DetectorGeometry {
        self.geometry
    }

    pub fn params(&self) -> &'a TrackerParams {
        self.params
    }

    /// Base error query for `track` crossing `row` at its current state.
    fn query(&self, track: &TrackCandidate, row: usize) -> ErrorQuery {
        let pad = self.geometry.row(row);
        let p = track.param();
        ErrorQuery {
            amplitude: ROAD_AMPLITUDE,
            drift_length: self.geometry.drift_length(p.z()),
            regime: pad.regime,
            snp: p.snp(),
            tgl: p.tgl(),
            quality: 1.0,
            kind: ClusterKind::Isolated,
        }
    }

    fn refresh_shape(&self, track: &mut TrackCandidate, row: usize) {
        let due = match track.expected_shape() {
            None => true,
            Some((last, _)) => {
                last.abs_diff(row) >= self.params.shape_refresh_rows || track.n_found() < 5
            }
        };
        if due {
            let pad = self.geometry.row(row);
            let p = track.param();
            let shape = self.errors.expected_shape(
                pad.regime,
                pad.pad_length,
                self.geometry.drift_length(p.z()),
                p.snp(),
                p.tgl(),
            );
            track.set_expected_shape(row, shape);
        }
    }

    /// Measurement variances of `cluster` for `track` on `row`.
    pub fn cluster_errors(&self, track: &TrackCandidate, row: usize, cluster: &Cluster) -> (f64, f64) {
        let pad = self.geometry.row(row);
        let (shape_y2, shape_z2) = track
            .expected_shape()
            .map(|(_, s)| s)
            .unwrap_or((cluster.sigma_y2, cluster.sigma_z2));
        let mut q = ErrorQuery {
            amplitude: cluster.q_total / pad.pad_length,
            kind: cluster.kind,
            quality: ratio(cluster.sigma_y2, shape_y2),
            ..self.query(track, row)
        };
        let sy2 = self.errors.sigma_y2(&q);
        q.quality = ratio(cluster.sigma_z2, shape_z2);
        let sz2 = self.errors.sigma_z2(&q);
        (sy2, sz2)
    }

    fn roads(&self, track: &TrackCandidate, row: usize) -> (Centimeter, Centimeter) {
        let q = self.query(track, row);
        let c = track.param().covariance();
        let p = self.params;
        let road = |var: f64| {
            (p.road_sigma_factor * var.max(0.0).sqrt()).clamp(p.min_road, p.max_road)
        };
        (
            road(c[(0, 0)] + self.errors.sigma_y2(&q)),
            road(c[(1, 1)] + self.errors.sigma_z2(&q)),
        )
    }

    /// Move the track onto `row`, changing sector when it leaves the sector's row.
    ///
    /// Return
    /// ----------
    /// * `Ok(true)` if the sector changed, `Ok(false)` otherwise.
    fn move_to_row(&self, track: &mut TrackCandidate, row: usize) -> Result<bool, TerminationReason> {
        let x = self.geometry.radius(row);
        track
            .param_mut()
            .propagate_to(x)
            .map_err(|_| TerminationReason::PropagationFailed)?;

        let y = track.param().y();
        if y.abs() <= self.geometry.max_y(row) {
            return Ok(false);
        }
        let direction = if y > 0.0 { 1 } else { -1 };
        track
            .param_mut()
            .rotate(direction as f64 * self.geometry.sector_angle())
            .map_err(|_| TerminationReason::RotationFailed)?;
        let sector = self.geometry.neighbour_sector(track.sector(), direction);
        track.set_sector(sector);
        track
            .param_mut()
            .propagate_to(x)
            .map_err(|_| TerminationReason::PropagationFailed)?;
        Ok(true)
    }

    /// Bring the track into the frame of `sector` and onto `row`.
    fn move_to_sector_row(
        &self,
        track: &mut TrackCandidate,
        sector: usize,
        row: usize,
    ) -> Result<(), TerminationReason> {
        if sector != track.sector() {
            let mut dalpha = self.geometry.sector_alpha(sector) - track.param().alpha();
            dalpha = (dalpha + 0.5 * DPI).rem_euclid(DPI) - 0.5 * DPI;
            track
                .param_mut()
                .rotate(dalpha)
                .map_err(|_| TerminationReason::RotationFailed)?;
            track.set_sector(sector);
        }
        track
            .param_mut()
            .propagate_to(self.geometry.radius(row))
            .map_err(|_| TerminationReason::PropagationFailed)
    }

    /// Extend `track` by one row.
    ///
    /// Arguments
    /// -----------------
    /// * `track`: the candidate; its state is moved to `row`.
    /// * `row`: the next row in the growth direction.
    /// * `store`: the event's clusters.
    /// * `usage`: claims table; an attached cluster is claimed provisionally.
    ///
    /// Return
    /// ----------
    /// * The [`StepOutcome`]. `Stopped` means the track was stopped by this call (or already
    ///   was); every other outcome leaves the track growing.
    pub fn follow_to_next_row(
        &self,
        track: &mut TrackCandidate,
        row: usize,
        store: &ClusterStore,
        usage: &mut UsageTable,
    ) -> StepOutcome {
        if matches!(track.status(), TrackStatus::Stopped | TrackStatus::Rejected) {
            return StepOutcome::Stopped;
        }
        if !(track.param().snp().abs() < self.params.max_snp) {
            track.stop(TerminationReason::PropagationFailed);
            return StepOutcome::Stopped;
        }
        let crossed = match self.move_to_row(track, row) {
            Ok(crossed) => crossed,
            Err(reason) => {
                trace!(track = track.id(), row, ?reason, "stopped");
                track.stop(reason);
                return StepOutcome::Stopped;
            }
        };
        let missed = if crossed {
            StepOutcome::SectorCrossed
        } else {
            StepOutcome::NoClusterFound
        };

        let (y, z) = (track.param().y(), track.param().z());
        if self.geometry.in_dead_zone(row, y) || !self.geometry.in_acceptance(row, z) {
            track.mark_excluded(row);
            return StepOutcome::DeadZone;
        }
        track.count_foundable();
        self.refresh_shape(track, row);

        let (road_y, road_z) = self.roads(track, row);
        let Some(hit) = store.nearest(track.sector(), row, y, z, road_y, road_z) else {
            track.mark_missing(row);
            return missed;
        };

        let (sy2, sz2) = self.cluster_errors(track, row, hit.cluster);
        let c = track.param().covariance();
        let ry2 = (hit.cluster.y - y).powi(2) / (c[(0, 0)] + sy2);
        let rz2 = (hit.cluster.z - z).powi(2) / (c[(1, 1)] + sz2);
        if !MatchTier::classify(ry2, rz2, hit.cluster.kind, self.params).is_accepted() {
            track.mark_missing(row);
            return missed;
        }

        let m = Measurement {
            y: hit.cluster.y,
            z: hit.cluster.z,
            sigma_y2: sy2,
            sigma_z2: sz2,
        };
        let chi2 = track.param().predicted_chi2(&m);
        if !track.param_mut().update(&m) {
            track.mark_missing(row);
            return missed;
        }

        let flat = store.flat_index(hit.id);
        let shared = usage.is_taken(flat, self.params.provisional_threshold);
        let slot = cluster_slot(track.param(), hit.id, shared);
        track.assign(row, slot, chi2);
        usage.claim_provisional(flat);
        StepOutcome::Updated
    }

    /// True if any early-density window of `track` is above its threshold.
    pub fn has_dense_start(&self, track: &TrackCandidate) -> bool {
        self.params
            .early_density
            .iter()
            .any(|&(n, d)| track.density_first(n) > d)
    }

    /// Apply the growth rules after a step. Returns `false` once growth must end.
    pub fn check_growth(&self, track: &mut TrackCandidate) -> bool {
        let p = self.params;
        if matches!(track.status(), TrackStatus::Stopped | TrackStatus::Rejected) {
            return false;
        }
        if track.miss_streak() >= p.max_missed_rows {
            if self.has_dense_start(track) {
                track.stop(TerminationReason::MissedRows);
            } else {
                track.reject(TerminationReason::MissedRows);
            }
            return false;
        }
        if track.n_found() >= MIN_CLUSTERS_FOR_QUALITY {
            if track.chi2_per_cluster() > p.max_chi2_per_cluster {
                track.reject(TerminationReason::HighChi2);
                return false;
            }
            if track.n_shared() as f64 > p.follow_shared_cut * track.n_found() as f64 {
                track.mark_for_removal();
            }
        }
        if track.n_foundable() >= p.density_check_rows
            && (track.n_found() as f64) < p.min_track_density * track.n_foundable() as f64
        {
            track.reject(TerminationReason::LowDensity);
            return false;
        }
        true
    }

    /// Follow `track` row by row towards the beam, down to `to_row` included.
    pub fn follow_inward(
        &self,
        track: &mut TrackCandidate,
        to_row: usize,
        store: &ClusterStore,
        usage: &mut UsageTable,
    ) {
        if matches!(track.status(), TrackStatus::Seeded | TrackStatus::Active) {
            track.set_status(TrackStatus::Growing);
        }
        let from = track.current_row();
        for row in (to_row..from).rev() {
            if self.follow_to_next_row(track, row, store, usage) == StepOutcome::Stopped {
                break;
            }
            if !self.check_growth(track) {
                break;
            }
        }
    }

    /// Close the growth phase: `Growing` becomes `Active` unless the density is too low.
    pub fn finish(&self, track: &mut TrackCandidate) {
        if track.status() != TrackStatus::Growing {
            return;
        }
        if track.n_foundable() >= MIN_CLUSTERS_FOR_QUALITY
            && (track.n_found() as f64) < self.params.min_track_density * track.n_foundable() as f64
        {
            track.reject(TerminationReason::LowDensity);
        } else {
            track.set_status(TrackStatus::Active);
        }
    }

    /// Refit an active track outward from its innermost processed row.
    ///
    /// The covariance is decorrelated and inflated, attached clusters are re-used as they
    /// come, and rows the track never visited are searched normally. Rows already searched
    /// without success are skipped. A failure to move the state ends the refit but keeps the
    /// track active.
    pub fn refit_outward(
        &self,
        track: &mut TrackCandidate,
        store: &ClusterStore,
        usage: &mut UsageTable,
    ) {
        if track.status() != TrackStatus::Active {
            return;
        }
        track
            .param_mut()
            .reset_covariance(self.params.refit_covariance_factor);

        let start = track.current_row() + 1;
        let mut misses = 0;
        for row in start..track.n_rows() {
            match *track.slot(row) {
                RowSlot::Assigned(slot) => {
                    if self
                        .move_to_sector_row(track, slot.id.sector as usize, row)
                        .is_err()
                    {
                        break;
                    }
                    let Some(cluster) = store.get(slot.id) else {
                        continue;
                    };
                    let (sy2, sz2) = self.cluster_errors(track, row, cluster);
                    let m = Measurement {
                        y: cluster.y,
                        z: cluster.z,
                        sigma_y2: sy2,
                        sigma_z2: sz2,
                    };
                    let chi2 = track.param().predicted_chi2(&m);
                    if track.param_mut().update(&m) {
                        track.revisit(row, chi2);
                    }
                    misses = 0;
                }
                RowSlot::Unvisited => {
                    // growth rules do not apply to the refit: a failed step only ends it
                    track.set_status(TrackStatus::Growing);
                    let outcome = self.follow_to_next_row(track, row, store, usage);
                    if track.status() == TrackStatus::Stopped {
                        track.reactivate();
                        break;
                    }
                    track.set_status(TrackStatus::Active);
                    match outcome {
                        StepOutcome::Updated => misses = 0,
                        StepOutcome::NoClusterFound | StepOutcome::SectorCrossed => misses += 1,
                        StepOutcome::DeadZone | StepOutcome::Stopped => {}
                    }
                    if misses >= self.params.max_missed_rows {
                        break;
                    }
                }
                RowSlot::Missing | RowSlot::Excluded => {}
            }
        }
        track.set_status(TrackStatus::Active);
    }
}

/// Slot for a cluster attached at the current state of `param`.
pub(crate) fn cluster_slot(param: &TrackParam, id: ClusterId, shared: bool) -> ClusterSlot {
    let snp = param.snp();
    ClusterSlot {
        id,
        shared,
        tan_phi: snp / ((1.0 - snp) * (1.0 + snp)).sqrt(),
        tan_lambda: param.tgl(),
        chi2: 0.0,
    }
}

#[inline]
fn ratio(measured: f64, expected: f64) -> f64 {
    if expected > 0.0 {
        measured / expected
    } else {
        1.0
    }
}

#[cfg(test)]
mod test_follower {
    use super::*;
    use crate::constants::StateVector;
    use crate::seeding::SeedingPolicy;
    use crate::track::candidate::SeedOrigin;
    use nalgebra::Matrix5;

    fn setup() -> (DetectorGeometry, TrackerParams, ClusterErrorModel) {
        let geometry = DetectorGeometry::builder()
            .uniform_rows(120, 100.0, 1.0, 0.5)
            .build()
            .unwrap();
        let errors = ClusterErrorModel::new(&geometry);
        (geometry, TrackerParams::default(), errors)
    }

    fn straight_track(n_rows: usize, start_row: usize, x: f64) -> TrackCandidate {
        let p = StateVector::new(0.0, 10.0, 0.0, 0.1, 0.0);
        let cov = Matrix5::from_diagonal(&StateVector::new(0.01, 0.01, 1e-4, 1e-4, 1e-8));
        let origin = SeedOrigin {
            policy: SeedingPolicy::VertexConstrained,
            pass: 0,
            outer_row: start_row,
            inner_row: 0,
        };
        TrackCandidate::new(1, TrackParam::new(x, 0.0, p, cov), 0, n_rows, origin, start_row)
    }

    #[test]
    fn classify_tiers() {
        let p = TrackerParams::default();
        use ClusterKind::*;
        assert_eq!(MatchTier::classify(1.0, 2.0, Isolated, &p), MatchTier::Excellent);
        assert_eq!(
            MatchTier::classify(8.0, 1.0, Isolated, &p),
            MatchTier::AcceptableIsolated
        );
        assert_eq!(MatchTier::classify(8.0, 1.0, Overlapping, &p), MatchTier::Rejected);
        assert_eq!(
            MatchTier::classify(6.0, 1.0, Edge, &p),
            MatchTier::AcceptableOverlapping
        );
        assert_eq!(MatchTier::classify(20.0, 13.0, Isolated, &p), MatchTier::Rejected);
        assert_eq!(MatchTier::classify(f64::NAN, 0.0, Isolated, &p), MatchTier::Rejected);
    }

    #[test]
    fn follows_a_clean_straight_track() {
        let (geometry, params, errors) = setup();
        let follower = Follower::new(&geometry, &params, &errors);
        let clusters = (0..120)
            .map(|row| Cluster::new(0, row as u16, 0.0, 10.0 + 0.1 * (geometry.radius(row) - 219.0)))
            .collect::<Vec<_>>();
        let store = ClusterStore::build(&geometry, clusters);
        let mut usage = UsageTable::new(store.len());

        let mut track = straight_track(120, 119, geometry.radius(119));
        follower.follow_inward(&mut track, 0, &store, &mut usage);
        follower.finish(&mut track);

        assert_eq!(track.status(), TrackStatus::Active);
        assert_eq!(track.n_found(), 119);
        assert_eq!(track.n_foundable(), 119);
        assert_eq!(track.n_shared(), 0);
        assert_eq!(track.slot(0).cluster().map(|c| c.id), Some(ClusterId::new(0, 0, 0)));
        assert_eq!(usage.provisional_count(store.flat_index(ClusterId::new(0, 50, 0))), 1);
    }

    #[test]
    fn refit_replaces_the_inward_chi2() {
        let (geometry, params, errors) = setup();
        let follower = Follower::new(&geometry, &params, &errors);
        let clusters = (0..120)
            .map(|row| {
                let jitter = if row % 2 == 0 { 0.02 } else { -0.02 };
                let z = 10.0 + 0.1 * (geometry.radius(row) - 219.0);
                Cluster::new(0, row as u16, jitter, z)
            })
            .collect::<Vec<_>>();
        let store = ClusterStore::build(&geometry, clusters);
        let mut usage = UsageTable::new(store.len());

        let mut track = straight_track(120, 119, geometry.radius(119));
        follower.follow_inward(&mut track, 0, &store, &mut usage);
        follower.finish(&mut track);
        assert_eq!(track.n_found(), 119);
        let inward = track.chi2_per_cluster();
        assert!(inward > 0.0);

        follower.refit_outward(&mut track, &store, &mut usage);
        assert_eq!(track.status(), TrackStatus::Active);
        assert_eq!(track.n_found(), 120);
        assert_eq!(track.n_foundable(), 120);
        assert!((track.param().x() - geometry.radius(119)).abs() < 1e-9);

        let per_row: f64 = track.clusters().map(|(_, s)| s.chi2).sum();
        assert!((per_row - track.chi2()).abs() < 1e-9 * track.chi2().max(1.0));
        assert!(
            track.chi2_per_cluster() < 1.5 * inward,
            "refit {} vs inward {}",
            track.chi2_per_cluster(),
            inward
        );
    }

    #[test]
    fn empty_rows_stop_or_reject() {
        let (geometry, params, errors) = setup();
        let follower = Follower::new(&geometry, &params, &errors);
        let store = ClusterStore::build(&geometry, Vec::new());
        let mut usage = UsageTable::new(0);

        let mut track = straight_track(120, 119, geometry.radius(119));
        follower.follow_inward(&mut track, 0, &store, &mut usage);
        assert_eq!(track.status(), TrackStatus::Rejected);
        assert_eq!(track.termination(), Some(TerminationReason::MissedRows));
        assert_eq!(track.n_foundable(), params.max_missed_rows);
    }

    #[test]
    fn too_inclined_track_stops() {
        let (geometry, params, errors) = setup();
        let follower = Follower::new(&geometry, &params, &errors);
        let store = ClusterStore::build(&geometry, Vec::new());
        let mut usage = UsageTable::new(0);

        let p = StateVector::new(0.0, 0.0, 0.97, 0.0, 0.0);
        let origin = SeedOrigin {
            policy: SeedingPolicy::Unconstrained,
            pass: 0,
            outer_row: 10,
            inner_row: 0,
        };
        let param = TrackParam::new(geometry.radius(10), 0.0, p, Matrix5::identity());
        let mut track = TrackCandidate::new(2, param, 0, 120, origin, 10);
        assert_eq!(
            follower.follow_to_next_row(&mut track, 9, &store, &mut usage),
            StepOutcome::Stopped
        );
        assert_eq!(track.status(), TrackStatus::Stopped);
    }

    #[test]
    fn crossing_into_the_neighbour_sector() {
        let (geometry, params, errors) = setup();
        let follower = Follower::new(&geometry, &params, &errors);
        let store = ClusterStore::build(&geometry, Vec::new());
        let mut usage = UsageTable::new(0);

        // heading outward close to the upper sector edge
        let x = geometry.radius(50);
        let y = geometry.max_y(50) - 0.05;
        let p = StateVector::new(y, 0.0, 0.3, 0.0, 0.0);
        let origin = SeedOrigin {
            policy: SeedingPolicy::Unconstrained,
            pass: 0,
            outer_row: 50,
            inner_row: 0,
        };
        let param = TrackParam::new(x, geometry.sector_alpha(0), p, Matrix5::identity() * 0.01);
        let mut track = TrackCandidate::new(3, param, 0, 120, origin, 50);
        let mut crossed = false;
        for row in 51..60 {
            let outcome = follower.follow_to_next_row(&mut track, row, &store, &mut usage);
            crossed |= outcome == StepOutcome::SectorCrossed || track.sector() == 1;
            assert_ne!(outcome, StepOutcome::Stopped);
        }
        assert!(crossed);
        assert_eq!(track.sector(), 1);
        assert!(track.param().y().abs() <= geometry.max_y(59));
    }
}
