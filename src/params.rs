//! # Tracker parameters
//!
//! Every empirical threshold of the pipeline, gathered in one serializable
//! [`TrackerParams`] with documented defaults and a validating
//! [`TrackerParamsBuilder`].
//!
//! ## Example
//!
//! ```rust
//! use tpctrack::params::TrackerParams;
//!
//! let params = TrackerParams::builder()
//!     .chi2_scale(1.5)
//!     .max_missed_rows(12)
//!     .dedx_truncation(0.05, 0.7)
//!     .build()
//!     .unwrap();
//! println!("{params:#}");
//! ```
//!
//! ## See also
//!
//! * [`SeedingPass`] – one entry of the seeding schedule
//! * [`crate::tracker::Tracker::new`] – validates the schedule against the geometry

use std::cmp::Ordering::{Equal, Greater, Less};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::Curvature;
use crate::geometry::DetectorGeometry;
use crate::seeding::SeedingPolicy;
use crate::tracker_errors::TrackerError;

/// Kinematic cuts applied to seeds of one pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeedCuts {
    /// Maximum |C| (1/cm)
    pub max_curvature: Curvature,
    /// Maximum |tan λ|
    pub max_tgl: f64,
    /// Maximum |z(x=0) − z_vertex| for vertex-constrained seeds (cm)
    pub max_vertex_dz: f64,
}

impl SeedCuts {
    pub const PRIMARY: SeedCuts = SeedCuts {
        max_curvature: 0.0066,
        max_tgl: 1.5,
        max_vertex_dz: 3.0,
    };
    pub const LOOSE: SeedCuts = SeedCuts {
        max_curvature: 0.008,
        max_tgl: 1.5,
        max_vertex_dz: 6.0,
    };
}

/// One seeding pass: a policy applied to an outer/inner row pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeedingPass {
    pub policy: SeedingPolicy,
    pub outer_row: usize,
    pub inner_row: usize,
    pub cuts: SeedCuts,
}

impl SeedingPass {
    /// Default schedule for a detector with `n_rows` pad rows.
    ///
    /// Three vertex-constrained passes starting at the outermost row and shifted inward by
    /// 6 rows each, one looser vertex-constrained pass one gap further in, and one
    /// unconstrained pass for secondaries. The row gap is `max(n_rows / 8, 4)`.
    pub fn default_schedule(n_rows: usize) -> Vec<SeedingPass> {
        let gap = n_rows.div_ceil(8).max(4);
        let last = n_rows.saturating_sub(1);
        let mut passes = Vec::new();
        let mut push = |policy, outer: usize, cuts| {
            if outer >= gap + 1 {
                passes.push(SeedingPass {
                    policy,
                    outer_row: outer,
                    inner_row: outer - gap,
                    cuts,
                });
            }
        };
        for delta in [0, 6, 12] {
            push(
                SeedingPolicy::VertexConstrained,
                last.saturating_sub(delta),
                SeedCuts::PRIMARY,
            );
        }
        push(
            SeedingPolicy::VertexConstrained,
            last.saturating_sub(gap),
            SeedCuts::LOOSE,
        );
        push(SeedingPolicy::Unconstrained, last, SeedCuts::LOOSE);
        passes
    }

    pub(crate) fn validate(&self, n_rows: usize) -> Result<(), TrackerError> {
        if self.outer_row >= n_rows || self.inner_row + 2 > self.outer_row {
            return Err(TrackerError::InvalidParameter(format!(
                "seeding pass rows {}..{} do not fit {} rows with a middle row",
                self.inner_row, self.outer_row, n_rows
            )));
        }
        let c = &self.cuts;
        if !(c.max_curvature > 0.0 && c.max_tgl > 0.0 && c.max_vertex_dz > 0.0) {
            return Err(TrackerError::InvalidParameter(
                "seed cuts must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration of the whole tracking pipeline.
///
/// Fields
/// -----------------
/// **Following**
/// * `max_snp` – |snp| above which a track is considered too inclined to follow.
/// * `road_sigma_factor` – road half-width in units of `sqrt(track var + cluster var)`,
///   clamped to `[min_road, max_road]`.
/// * `shape_refresh_rows` – rows between two evaluations of the expected cluster shape.
/// * `chi2_scale` – multiplier `k` of the match tiers.
/// * `excellent_match`, `isolated_match`, `overlapping_match` – tier thresholds on the
///   per-axis normalized squared residuals (4, 9, 6.25 times `k`).
/// * `max_total_residual` – reject a match whose summed normalized residual exceeds this.
/// * `provisional_threshold` – provisional claims above which a cluster counts as shared.
/// * `max_missed_rows` – consecutive rows without a cluster before growth ends.
/// * `max_chi2_per_cluster` – reject a grown track above this mean χ².
/// * `follow_shared_cut` – mark for removal above this shared fraction.
/// * `min_track_density` – reject a track whose found/foundable falls below this once
///   `density_check_rows` rows were foundable.
/// * `early_density` – `(rows, minimum density)` windows of the reactivation rule.
/// * `refit_covariance_factor` – covariance inflation before the outward refit.
///
/// **Seeding**
/// * `passes` – seeding schedule; empty means [`SeedingPass::default_schedule`].
/// * `max_seed_snp` – |snp| cut on a seed state.
/// * `seed_margin_y`, `seed_margin_z` – extra half-width of the inner-row windows.
/// * `middle_road_y`, `middle_road_z` – road of the middle-row consistency check.
/// * `jacobian_step` – finite-difference step of the seed covariance (cm).
/// * `vertex_curvature_term` – curvature-dependent part of the vertex y variance.
/// * `seed_short_*` – acceptance after following to the middle row.
/// * `seed_full_*` – acceptance after following to the inner support row.
/// * `vertex_retry_rows` – additional rows followed before re-testing `z` at the vertex.
/// * `max_seeds_per_pass`, `max_pairs_per_sector` – combinatorial caps.
///
/// **Consolidation**
/// * `pair_max_delta_curvature`, `pair_max_delta_tgl` – kinematic compatibility of an
///   overlapping pair.
/// * `min_overlap_rows` – minimum common row span of a pair.
/// * `min_shared_clusters` – identical clusters above which a pair is tagged shared.
/// * `duplicate_shared_fraction` – total shared fraction above which duplicates are removed.
/// * `max_shared_constrained`, `max_shared_unconstrained` – global usage removal limits.
/// * `short_track_found`, `short_track_min_clusters` – short-track rule.
///
/// **dE/dx and labels**
/// * `dedx_low`, `dedx_high` – truncation fractions of the sorted samples.
/// * `dedx_min_samples` – minimum samples per region.
/// * `dedx_min_qmax` – minimum cluster peak charge.
/// * `dedx_log_scale` – scale of the logarithmic compression.
/// * `dedx_mip` – truncated mean of a minimum-ionizing track, scale of the expectations.
/// * `species_tolerance` – relative distance to a Bethe–Bloch expectation.
/// * `label_wrong_fraction` – fraction of disagreeing clusters above which a label is negated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerParams {
    // following
    pub max_snp: f64,
    pub road_sigma_factor: f64,
    pub min_road: f64,
    pub max_road: f64,
    pub shape_refresh_rows: usize,
    pub chi2_scale: f64,
    pub excellent_match: f64,
    pub isolated_match: f64,
    pub overlapping_match: f64,
    pub max_total_residual: f64,
    pub provisional_threshold: u16,
    pub max_missed_rows: u32,
    pub max_chi2_per_cluster: f64,
    pub follow_shared_cut: f64,
    pub min_track_density: f64,
    pub density_check_rows: u32,
    pub early_density: [(usize, f64); 3],
    pub refit_covariance_factor: f64,

    // seeding
    pub passes: Vec<SeedingPass>,
    pub max_seed_snp: f64,
    pub seed_margin_y: f64,
    pub seed_margin_z: f64,
    pub middle_road_y: f64,
    pub middle_road_z: f64,
    pub jacobian_step: f64,
    pub vertex_curvature_term: f64,
    pub seed_short_found_fraction: f64,
    pub seed_short_shared_fraction: f64,
    pub seed_short_max_variance: f64,
    pub seed_full_span_fraction: f64,
    pub seed_full_found_fraction: f64,
    pub seed_full_shared_fraction: f64,
    pub vertex_retry_rows: [usize; 2],
    pub max_seeds_per_pass: usize,
    pub max_pairs_per_sector: usize,

    // consolidation
    pub pair_max_delta_curvature: f64,
    pub pair_max_delta_tgl: f64,
    pub min_overlap_rows: usize,
    pub min_shared_clusters: u32,
    pub duplicate_shared_fraction: f64,
    pub max_shared_constrained: f64,
    pub max_shared_unconstrained: f64,
    pub short_track_found: u32,
    pub short_track_min_clusters: f64,

    // dE/dx and labels
    pub dedx_low: f64,
    pub dedx_high: f64,
    pub dedx_min_samples: usize,
    pub dedx_min_qmax: f64,
    pub dedx_log_scale: f64,
    pub dedx_mip: f64,
    pub species_tolerance: f64,
    pub label_wrong_fraction: f64,
}

impl TrackerParams {
    /// Create a builder initialized with the defaults.
    pub fn builder() -> TrackerParamsBuilder {
        TrackerParamsBuilder::new()
    }

    /// Check every threshold.
    ///
    /// Validation rules
    /// -----------------
    /// * `max_snp`, `max_seed_snp`, every density and shared fraction in `(0, 1)`,
    /// * `0 < min_road <= max_road`, `road_sigma_factor > 0`,
    /// * `0 < excellent_match <= overlapping_match <= isolated_match <= max_total_residual`,
    ///   `chi2_scale > 0`,
    /// * `0 <= dedx_low < dedx_high <= 1`, `dedx_min_samples >= 1`,
    /// * step sizes, roads, margins and counts strictly positive,
    /// * `label_wrong_fraction` in `[0, 1]`.
    ///
    /// Seeding passes are checked against the geometry by
    /// [`Tracker::new`](crate::tracker::Tracker::new).
    ///
    /// [`build`] and [`Tracker::new`](crate::tracker::Tracker::new)
    /// both call this, so parameters built from a literal or deserialized from a file
    /// go through the same checks.
    pub fn validate(&self) -> Result<(), TrackerError> {
        let p = self;
        let bad = |msg: &str| Err(TrackerError::InvalidParameter(msg.into()));

        let fractions = [
            p.max_snp,
            p.max_seed_snp,
            p.follow_shared_cut,
            p.min_track_density,
            p.seed_short_found_fraction,
            p.seed_short_shared_fraction,
            p.seed_full_span_fraction,
            p.seed_full_found_fraction,
            p.seed_full_shared_fraction,
            p.duplicate_shared_fraction,
            p.max_shared_constrained,
            p.max_shared_unconstrained,
            p.species_tolerance,
        ];
        if !fractions.iter().all(|&f| unit(f)) {
            return bad("fractions and |snp| limits must lie in (0, 1)");
        }
        if !p.early_density.iter().all(|&(n, d)| n > 0 && unit(d)) {
            return bad("early density windows need n > 0 and a density in (0, 1)");
        }
        if !(gt0(p.road_sigma_factor) && gt0(p.min_road) && le(p.min_road, p.max_road)) {
            return bad("require road_sigma_factor > 0 and 0 < min_road <= max_road");
        }
        let ordered_tiers = gt0(p.excellent_match)
            && le(p.excellent_match, p.overlapping_match)
            && le(p.overlapping_match, p.isolated_match)
            && le(p.isolated_match, p.max_total_residual);
        if !ordered_tiers || !gt0(p.chi2_scale) {
            return bad(
                "require 0 < excellent <= overlapping <= isolated <= total and chi2_scale > 0",
            );
        }
        if !(ge0(p.dedx_low) && p.dedx_low < p.dedx_high && le(p.dedx_high, 1.0)) {
            return bad("require 0 <= dedx_low < dedx_high <= 1");
        }
        if p.dedx_min_samples == 0 || !gt0(p.dedx_log_scale) || !ge0(p.dedx_min_qmax) {
            return bad("dE/dx sample count, log scale must be > 0 and min qmax >= 0");
        }
        let positives = [
            p.max_chi2_per_cluster,
            p.refit_covariance_factor,
            p.seed_margin_y,
            p.seed_margin_z,
            p.middle_road_y,
            p.middle_road_z,
            p.jacobian_step,
            p.seed_short_max_variance,
            p.pair_max_delta_curvature,
            p.pair_max_delta_tgl,
            p.dedx_mip,
        ];
        if !positives.iter().all(|&v| gt0(v)) {
            return bad("roads, margins, steps and pair deltas must be > 0");
        }
        if !ge0(p.vertex_curvature_term) || !ge0(p.short_track_min_clusters) {
            return bad("vertex_curvature_term and short_track_min_clusters must be >= 0");
        }
        if p.shape_refresh_rows == 0
            || p.max_missed_rows == 0
            || p.provisional_threshold == 0
            || p.max_seeds_per_pass == 0
            || p.max_pairs_per_sector == 0
        {
            return bad("row counts, thresholds and caps must be >= 1");
        }
        if !(ge0(p.label_wrong_fraction) && le(p.label_wrong_fraction, 1.0)) {
            return bad("label_wrong_fraction must lie in [0, 1]");
        }

        Ok(())
    }

    /// Seeding schedule for `geometry`.
    pub fn schedule(&self, geometry: &DetectorGeometry) -> Vec<SeedingPass> {
        if self.passes.is_empty() {
            SeedingPass::default_schedule(geometry.n_rows())
        } else {
            self.passes.clone()
        }
    }
}

impl Default for TrackerParams {
    fn default() -> Self {
        TrackerParams {
            max_snp: 0.95,
            road_sigma_factor: 3.0,
            min_road: 0.2,
            max_road: 3.0,
            shape_refresh_rows: 4,
            chi2_scale: 1.0,
            excellent_match: 4.0,
            isolated_match: 9.0,
            overlapping_match: 6.25,
            max_total_residual: 32.0,
            provisional_threshold: 1,
            max_missed_rows: 10,
            max_chi2_per_cluster: 10.0,
            follow_shared_cut: 0.7,
            min_track_density: 0.5,
            density_check_rows: 20,
            early_density: [(20, 0.8), (30, 0.8), (40, 0.7)],
            refit_covariance_factor: 10.0,

            passes: Vec::new(),
            max_seed_snp: 0.9,
            seed_margin_y: 1.0,
            seed_margin_z: 1.0,
            middle_road_y: 1.0,
            middle_road_z: 1.0,
            jacobian_step: 0.1,
            vertex_curvature_term: 25000.0,
            seed_short_found_fraction: 0.55,
            seed_short_shared_fraction: 0.5,
            seed_short_max_variance: 0.5,
            seed_full_span_fraction: 0.5,
            seed_full_found_fraction: 0.6,
            seed_full_shared_fraction: 0.4,
            vertex_retry_rows: [20, 40],
            max_seeds_per_pass: 20_000,
            max_pairs_per_sector: 200_000,

            pair_max_delta_curvature: 0.004,
            pair_max_delta_tgl: 0.6,
            min_overlap_rows: 5,
            min_shared_clusters: 5,
            duplicate_shared_fraction: 0.5,
            max_shared_constrained: 0.5,
            max_shared_unconstrained: 0.4,
            short_track_found: 50,
            short_track_min_clusters: 20.0,

            dedx_low: 0.02,
            dedx_high: 0.6,
            dedx_min_samples: 3,
            dedx_min_qmax: 5.0,
            dedx_log_scale: 50.0,
            dedx_mip: 50.0,
            species_tolerance: 0.15,
            label_wrong_fraction: 0.1,
        }
    }
}

/// Builder for [`TrackerParams`], with validation.
#[derive(Debug, Clone)]
pub struct TrackerParamsBuilder {
    params: TrackerParams,
}

impl Default for TrackerParamsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackerParamsBuilder {
    pub fn new() -> Self {
        Self {
            params: TrackerParams::default(),
        }
    }

    // --- Following ---
    pub fn max_snp(mut self, v: f64) -> Self {
        self.params.max_snp = v;
        self
    }
    pub fn road(mut self, sigma_factor: f64, min: f64, max: f64) -> Self {
        self.params.road_sigma_factor = sigma_factor;
        self.params.min_road = min;
        self.params.max_road = max;
        self
    }
    pub fn shape_refresh_rows(mut self, v: usize) -> Self {
        self.params.shape_refresh_rows = v;
        self
    }
    pub fn chi2_scale(mut self, v: f64) -> Self {
        self.params.chi2_scale = v;
        self
    }
    pub fn match_tiers(mut self, excellent: f64, overlapping: f64, isolated: f64) -> Self {
        self.params.excellent_match = excellent;
        self.params.overlapping_match = overlapping;
        self.params.isolated_match = isolated;
        self
    }
    pub fn max_total_residual(mut self, v: f64) -> Self {
        self.params.max_total_residual = v;
        self
    }
    pub fn provisional_threshold(mut self, v: u16) -> Self {
        self.params.provisional_threshold = v;
        self
    }
    pub fn max_missed_rows(mut self, v: u32) -> Self {
        self.params.max_missed_rows = v;
        self
    }
    pub fn max_chi2_per_cluster(mut self, v: f64) -> Self {
        self.params.max_chi2_per_cluster = v;
        self
    }
    pub fn follow_shared_cut(mut self, v: f64) -> Self {
        self.params.follow_shared_cut = v;
        self
    }
    pub fn min_track_density(mut self, v: f64) -> Self {
        self.params.min_track_density = v;
        self
    }
    pub fn early_density(mut self, v: [(usize, f64); 3]) -> Self {
        self.params.early_density = v;
        self
    }
    pub fn refit_covariance_factor(mut self, v: f64) -> Self {
        self.params.refit_covariance_factor = v;
        self
    }

    // --- Seeding ---
    pub fn passes(mut self, v: Vec<SeedingPass>) -> Self {
        self.params.passes = v;
        self
    }
    pub fn max_seed_snp(mut self, v: f64) -> Self {
        self.params.max_seed_snp = v;
        self
    }
    pub fn middle_road(mut self, y: f64, z: f64) -> Self {
        self.params.middle_road_y = y;
        self.params.middle_road_z = z;
        self
    }
    pub fn jacobian_step(mut self, v: f64) -> Self {
        self.params.jacobian_step = v;
        self
    }
    pub fn max_seeds_per_pass(mut self, v: usize) -> Self {
        self.params.max_seeds_per_pass = v;
        self
    }
    pub fn max_pairs_per_sector(mut self, v: usize) -> Self {
        self.params.max_pairs_per_sector = v;
        self
    }

    // --- Consolidation ---
    pub fn min_shared_clusters(mut self, v: u32) -> Self {
        self.params.min_shared_clusters = v;
        self
    }
    pub fn duplicate_shared_fraction(mut self, v: f64) -> Self {
        self.params.duplicate_shared_fraction = v;
        self
    }
    pub fn max_shared(mut self, constrained: f64, unconstrained: f64) -> Self {
        self.params.max_shared_constrained = constrained;
        self.params.max_shared_unconstrained = unconstrained;
        self
    }
    pub fn short_track(mut self, found: u32, min_clusters: f64) -> Self {
        self.params.short_track_found = found;
        self.params.short_track_min_clusters = min_clusters;
        self
    }

    // --- dE/dx and labels ---
    pub fn dedx_truncation(mut self, low: f64, high: f64) -> Self {
        self.params.dedx_low = low;
        self.params.dedx_high = high;
        self
    }
    pub fn dedx_min_samples(mut self, v: usize) -> Self {
        self.params.dedx_min_samples = v;
        self
    }
    pub fn species(mut self, mip: f64, tolerance: f64) -> Self {
        self.params.dedx_mip = mip;
        self.params.species_tolerance = tolerance;
        self
    }
    pub fn label_wrong_fraction(mut self, v: f64) -> Self {
        self.params.label_wrong_fraction = v;
        self
    }

    /// Finalize the builder and produce a [`TrackerParams`] instance.
    ///
    /// See [`TrackerParams::validate`] for the rules.
    pub fn build(self) -> Result<TrackerParams, TrackerError> {
        self.params.validate()?;
        Ok(self.params)
    }
}

impl fmt::Display for TrackerParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            const PARAM_COL: usize = 44;
            writeln!(f, "Tracker Parameters")?;
            writeln!(f, "------------------")?;

            macro_rules! line {
                ($fmt:expr, $val:expr, $comment:expr) => {{
                    let s = format!($fmt, $val);
                    let pad = if s.len() < PARAM_COL {
                        " ".repeat(PARAM_COL - s.len())
                    } else {
                        " ".to_string()
                    };
                    writeln!(f, "  {}{}# {}", s, pad, $comment)
                }};
            }

            writeln!(f, "[Following]")?;
            line!("max_snp              = {:.3}", self.max_snp, "Follow limit on |snp|")?;
            line!(
                "road                 = {:.2}σ",
                self.road_sigma_factor,
                format!("clamped to [{}, {}] cm", self.min_road, self.max_road)
            )?;
            line!(
                "match tiers          = {}",
                format!(
                    "{}/{}/{}",
                    self.excellent_match, self.overlapping_match, self.isolated_match
                ),
                format!("excellent/overlapping/isolated, × {}", self.chi2_scale)
            )?;
            line!(
                "max_total_residual   = {:.1}",
                self.max_total_residual,
                "Summed normalized residual cutoff"
            )?;
            line!(
                "max_missed_rows      = {}",
                self.max_missed_rows,
                "Consecutive empty rows before stop"
            )?;
            line!(
                "max_chi2_per_cluster = {:.2}",
                self.max_chi2_per_cluster,
                "Mean χ² rejection"
            )?;
            line!(
                "follow_shared_cut    = {:.2}",
                self.follow_shared_cut,
                "Shared fraction marking for removal"
            )?;
            line!(
                "min_track_density    = {:.2}",
                self.min_track_density,
                "Found/foundable rejection"
            )?;

            writeln!(f, "\n[Seeding]")?;
            if self.passes.is_empty() {
                line!("passes               = {}", "default", "Schedule from geometry")?;
            } else {
                line!("passes               = {}", self.passes.len(), "Explicit schedule")?;
            }
            line!("max_seed_snp         = {:.3}", self.max_seed_snp, "Seed |snp| cut")?;
            line!(
                "middle_road          = {}",
                format!("{} × {} cm", self.middle_road_y, self.middle_road_z),
                "Middle-row consistency road"
            )?;
            line!(
                "jacobian_step        = {:.3} cm",
                self.jacobian_step,
                "Seed covariance finite difference"
            )?;
            line!(
                "max_seeds_per_pass   = {}",
                self.max_seeds_per_pass,
                "Combinatorial cap"
            )?;

            writeln!(f, "\n[Consolidation]")?;
            line!(
                "min_shared_clusters  = {}",
                self.min_shared_clusters,
                "Identical clusters tagging a pair"
            )?;
            line!(
                "duplicate_fraction   = {:.2}",
                self.duplicate_shared_fraction,
                "Duplicate removal threshold"
            )?;
            line!(
                "max_shared           = {}",
                format!(
                    "{}/{}",
                    self.max_shared_constrained, self.max_shared_unconstrained
                ),
                "constrained/unconstrained"
            )?;

            writeln!(f, "\n[dE/dx]")?;
            line!(
                "truncation           = {}",
                format!("[{}, {}]", self.dedx_low, self.dedx_high),
                "Kept fraction of sorted samples"
            )?;
            line!(
                "dedx_min_samples     = {}",
                self.dedx_min_samples,
                "Per-region minimum"
            )?;
            Ok(())
        } else {
            write!(
                f,
                "TrackerParams(road={:.1}σ, tiers={}/{}/{}×{}, missed={}, dedx=[{}, {}])",
                self.road_sigma_factor,
                self.excellent_match,
                self.overlapping_match,
                self.isolated_match,
                self.chi2_scale,
                self.max_missed_rows,
                self.dedx_low,
                self.dedx_high
            )
        }
    }
}

// ---- Numeric helpers for PartialOrd (handle NaN as invalid) ----

#[inline]
fn gt0(x: f64) -> bool {
    x.partial_cmp(&0.0) == Some(Greater)
}

#[inline]
fn ge0(x: f64) -> bool {
    matches!(x.partial_cmp(&0.0), Some(Greater) | Some(Equal))
}

#[inline]
fn le(a: f64, b: f64) -> bool {
    matches!(a.partial_cmp(&b), Some(Less) | Some(Equal))
}

/// Strictly inside `(0, 1)`.
#[inline]
fn unit(x: f64) -> bool {
    gt0(x) && x.partial_cmp(&1.0) == Some(Less)
}
