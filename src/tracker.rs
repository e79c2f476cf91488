//! # Tracker: event reconstruction façade
//!
//! This module defines the [`Tracker`], which wires together every stage of the
//! reconstruction of one event:
//!
//! 1. **Cluster store** – the event's clusters indexed per `(sector, row)`
//!    ([`ClusterStore`]) and a fresh claims table ([`UsageTable`]).
//! 2. **Seeding passes** – for each [`SeedingPass`] of the schedule, seeds are generated
//!    ([`SeedGenerator`]), followed inward to the innermost row ([`Follower`]) and merged
//!    into the candidate pool, which is then consolidated ([`Consolidator`]) so that later
//!    passes see the clusters owned so far.
//! 3. **Reactivation** – stopped candidates with a dense start are kept, the others dropped.
//! 4. **Outward refit** – active candidates are refitted from their innermost cluster
//!    outward, picking up clusters on rows they never visited.
//! 5. **Final consolidation**, then per-track dE/dx, species hypothesis and truth label.
//!
//! The tracker itself is immutable: every piece of event state lives inside
//! [`Tracker::reconstruct`], so one tracker can serve several threads, one event each.
//!
//! ## Typical usage
//!
//! ```rust, no_run
//! use tpctrack::geometry::DetectorGeometry;
//! use tpctrack::params::TrackerParams;
//! use tpctrack::tracker::Tracker;
//! use tpctrack::clusters::Cluster;
//!
//! let tracker = Tracker::new(DetectorGeometry::standard(), TrackerParams::default()).unwrap();
//! let clusters: Vec<Cluster> = Vec::new();
//! let event = tracker.reconstruct(clusters);
//! println!("{} tracks", event.tracks.len());
//! ```
//!
//! ## See also
//! ------------
//! * [`TrackerParams`] – every threshold of the pipeline.
//! * [`DetectorGeometry`] – sectors, rows and drift volume.
//! * [`EventSummary`] – per-event bookkeeping.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clusters::store::ClusterStore;
use crate::clusters::usage::UsageTable;
use crate::clusters::{Cluster, ClusterId};
use crate::consolidator::{ConsolidationReport, Consolidator};
use crate::constants::TrackId;
use crate::dedx::{BetheBlochAleph, DedxEstimate, DedxEstimator, Species};
use crate::error_model::{initialize_tables, ClusterErrorModel};
use crate::follower::Follower;
use crate::geometry::DetectorGeometry;
use crate::params::{SeedingPass, TrackerParams};
use crate::seeding::{SeedGenerator, SeedingReport};
use crate::track::candidate::{SeedOrigin, TerminationReason, TrackCandidate, TrackStatus};
use crate::tracker_errors::TrackerError;

/// A reconstructed track, in the local frame of its sector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconstructedTrack {
    pub id: TrackId,
    pub sector: usize,
    /// Rotation angle of the reference frame (rad)
    pub alpha: f64,
    /// Reference radius of the state (cm)
    pub x: f64,
    /// `(y, z, snp, tgl, C)`
    pub state: [f64; 5],
    /// Lower triangle of the state covariance
    pub covariance: [f64; 15],
    /// Attached clusters, innermost row first
    pub clusters: Vec<ClusterId>,
    /// Position of each attached cluster in the input sequence
    pub sources: Vec<usize>,
    pub n_found: u32,
    pub n_foundable: u32,
    pub n_shared: u32,
    pub chi2: f64,
    /// GeV/c
    pub pt: f64,
    /// GeV/c
    pub momentum: f64,
    pub dedx: DedxEstimate,
    pub species: Option<Species>,
    /// Truth label, negative when too many clusters disagree
    pub label: Option<i32>,
    /// Too many clusters disagree with the label; also set for a fake label 0
    pub fake: bool,
    pub status: TrackStatus,
    pub origin: SeedOrigin,
}

/// Bookkeeping of one event.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventSummary {
    /// Clusters stored
    pub n_clusters: usize,
    /// Malformed clusters dropped at input
    pub rejected_clusters: usize,
    pub passes: Vec<SeedingReport>,
    /// Seeds grown to the innermost row, all passes together
    pub candidates: usize,
    pub reactivated: usize,
    pub not_reactivated: usize,
    /// Removal counters of every consolidation of the event
    pub consolidation: ConsolidationReport,
    /// Truncated passes and partner list overflows
    pub overflow_warnings: usize,
    pub n_tracks: usize,
    /// Final cluster census, `[Unused, ProvisionallyClaimed, Owned, Shared]`
    pub cluster_usage: [usize; 4],
}

/// Output of [`Tracker::reconstruct`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventResult {
    pub tracks: Vec<ReconstructedTrack>,
    pub summary: EventSummary,
}

#[derive(Debug, Clone)]
pub struct Tracker {
    geometry: DetectorGeometry,
    params: TrackerParams,
    schedule: Vec<SeedingPass>,
    errors: ClusterErrorModel,
    bethe_bloch: BetheBlochAleph,
}

impl Tracker {
    /// Construct a tracker for a detector.
    ///
    /// Initializes the shared error tables if needed and resolves the seeding schedule
    /// (the default one when `params.passes` is empty).
    ///
    /// Arguments
    /// -----------------
    /// * `geometry`: the validated detector description.
    /// * `params`: pipeline thresholds.
    ///
    /// Return
    /// ----------
    /// * The tracker, or [`TrackerError::InvalidParameter`] if a threshold is out of range,
    ///   the schedule is empty or a pass does not fit the geometry.
    pub fn new(geometry: DetectorGeometry, params: TrackerParams) -> Result<Self, TrackerError> {
        params.validate()?;
        let schedule = params.schedule(&geometry);
        if schedule.is_empty() {
            return Err(TrackerError::InvalidParameter(
                "the seeding schedule is empty".into(),
            ));
        }
        for pass in &schedule {
            pass.validate(geometry.n_rows())?;
        }
        initialize_tables();
        let errors = ClusterErrorModel::new(&geometry);
        Ok(Tracker {
            geometry,
            params,
            schedule,
            errors,
            bethe_bloch: BetheBlochAleph::default(),
        })
    }

    pub fn geometry(&self) -> &DetectorGeometry {
        &self.geometry
    }

    pub fn params(&self) -> &TrackerParams {
        &self.params
    }

    pub fn schedule(&self) -> &[SeedingPass] {
        &self.schedule
    }

    /// Reconstruct the tracks of one event.
    ///
    /// Arguments
    /// -----------------
    /// * `clusters`: the event's clusters in any order. Malformed ones are dropped and
    ///   counted in [`EventSummary::rejected_clusters`].
    ///
    /// Return
    /// ----------
    /// * The surviving tracks, sorted by `(sector, z, id)`, and the event summary.
    pub fn reconstruct<I>(&self, clusters: I) -> EventResult
    where
        I: IntoIterator<Item = Cluster>,
    {
        let store = ClusterStore::build(&self.geometry, clusters);
        let mut usage = UsageTable::new(store.len());
        let follower = Follower::new(&self.geometry, &self.params, &self.errors);
        let seeder = SeedGenerator::new(follower);
        let consolidator = Consolidator::new(&self.geometry, &self.params);

        let mut summary = EventSummary {
            n_clusters: store.len(),
            rejected_clusters: store.rejected(),
            ..EventSummary::default()
        };
        let mut pool: Vec<TrackCandidate> = Vec::new();
        let mut next_id: TrackId = 0;

        for (k, pass) in self.schedule.iter().enumerate() {
            let (mut seeds, report) =
                seeder.make_seeds(&store, &mut usage, pass, k, &mut next_id);
            for seed in seeds.iter_mut() {
                follower.follow_inward(seed, 0, &store, &mut usage);
                follower.finish(seed);
            }
            summary.candidates += seeds.len();
            summary.overflow_warnings += usize::from(report.overflowed);
            summary.passes.push(report);

            pool.extend(seeds);
            let (kept, removed) = consolidator.consolidate(pool, &store, &mut usage);
            summary.consolidation += removed;
            pool = kept;
            debug!(pass = k, pool = pool.len(), "pass consolidated");
        }

        for track in pool.iter_mut() {
            if track.status() != TrackStatus::Stopped {
                continue;
            }
            if follower.has_dense_start(track) {
                track.reactivate();
                summary.reactivated += 1;
            } else {
                track.reject(TerminationReason::NotReactivated);
                summary.not_reactivated += 1;
            }
        }
        for track in pool.iter_mut() {
            follower.refit_outward(track, &store, &mut usage);
        }
        let (tracks, removed) = consolidator.consolidate(pool, &store, &mut usage);
        summary.consolidation += removed;
        summary.overflow_warnings += summary.consolidation.partner_overflows;

        let tracks = tracks
            .iter()
            .map(|t| self.describe(t, &store, &usage))
            .collect::<Vec<_>>();
        summary.n_tracks = tracks.len();
        summary.cluster_usage = usage.census();

        info!(
            clusters = summary.n_clusters,
            dropped = summary.rejected_clusters,
            candidates = summary.candidates,
            tracks = summary.n_tracks,
            removed = summary.consolidation.removed(),
            overflows = summary.overflow_warnings,
            "event reconstructed"
        );
        EventResult { tracks, summary }
    }

    fn describe(
        &self,
        track: &TrackCandidate,
        store: &ClusterStore,
        usage: &UsageTable,
    ) -> ReconstructedTrack {
        let p = track.param();
        let bz = self.geometry.bz();
        let dedx = DedxEstimator::new(&self.geometry, &self.params).estimate(track, store, usage);
        let momentum = p.momentum(bz);
        let species = dedx
            .is_valid()
            .then(|| {
                Species::identify(
                    dedx.overall,
                    momentum,
                    self.params.dedx_mip,
                    self.params.species_tolerance,
                    &self.bethe_bloch,
                )
            })
            .flatten();
        let cooked = track.cook_label(store, self.params.label_wrong_fraction);
        let clusters = track.cluster_ids().collect::<Vec<_>>();
        let sources = clusters
            .iter()
            .filter_map(|&id| store.source_index(id))
            .collect();

        ReconstructedTrack {
            id: track.id(),
            sector: track.sector(),
            alpha: p.alpha(),
            x: p.x(),
            state: std::array::from_fn(|i| p.state()[i]),
            covariance: p.covariance_packed(),
            clusters,
            sources,
            n_found: track.n_found(),
            n_foundable: track.n_foundable(),
            n_shared: track.n_shared(),
            chi2: track.chi2(),
            pt: p.pt(bz),
            momentum,
            dedx,
            species,
            label: cooked.map(|l| l.signed()),
            fake: cooked.is_some_and(|l| l.fake),
            status: track.status(),
            origin: *track.origin(),
        }
    }
}
