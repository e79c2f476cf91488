//! # Cluster error model
//!
//! Position variances of a cluster as a function of its amplitude, drift length, track
//! inclination, pad regime, shape quality and shape class.
//!
//! ## Tables
//!
//! Two amplitude-indexed tables are precomputed per [`PadRegime`] for amplitudes
//! `3..=9999`:
//!
//! ```text
//! nel       = k_el · amp                         (electrons)
//! nprim     = k_prim · amp                       (primary clusters)
//! diffusion = (2 + k_d · nel / pl²) / nel
//! landau    = clamp((2 + 0.12 nprim) · 0.5 · (2 + 0.001 nprim² / pl²) / nprim, 0, 1) · pl² / 12
//! ```
//!
//! | regime | pl   | k_el  | k_prim | k_d    |
//! |--------|------|-------|--------|--------|
//! | short  | 0.75 | 0.268 | 0.155  | 0.001  |
//! | medium | 1.0  | 0.3   | 0.133  | 0.0008 |
//! | long   | 1.5  | 0.3   | 0.133  | 0.0008 |
//!
//! and three shape-quality correction tables over `r = i / 100, i < 500`.
//!
//! ## Lifecycle
//!
//! The tables are process-wide and immutable. They are computed by
//! [`initialize_tables`], which [`Tracker::new`](crate::tracker::Tracker::new) calls before
//! any event is processed; afterwards they are read concurrently without synchronization.
//!
//! ## See also
//!
//! * [`ClusterErrorModel::sigma_y2`], [`ClusterErrorModel::sigma_z2`]
//! * [`ClusterErrorModel::expected_shape`] – denominator of the shape quality ratio

use once_cell::sync::OnceCell;

use crate::clusters::ClusterKind;
use crate::constants::{Centimeter, ALMOST_ONE};
use crate::geometry::{DetectorGeometry, PadRegime};

/// Amplitudes strictly above this are treated as saturated.
pub const MAX_TABULATED_AMPLITUDE: usize = 9999;
const MIN_TABULATED_AMPLITUDE: usize = 3;
const N_QUALITY_BINS: usize = 500;

/// Variance returned for a saturated amplitude along y.
const SATURATED_SIGMA_Y2: f64 = 1.0;
/// Upper bound on any z variance.
const MAX_SIGMA_Z2: f64 = 3.0;

struct RegimeConstants {
    pad_length: f64,
    electrons_per_amp: f64,
    primaries_per_amp: f64,
    diffusion_coeff: f64,
}

const REGIMES: [RegimeConstants; 3] = [
    RegimeConstants {
        pad_length: 0.75,
        electrons_per_amp: 0.268,
        primaries_per_amp: 0.155,
        diffusion_coeff: 0.001,
    },
    RegimeConstants {
        pad_length: 1.0,
        electrons_per_amp: 0.3,
        primaries_per_amp: 0.133,
        diffusion_coeff: 0.0008,
    },
    RegimeConstants {
        pad_length: 1.5,
        electrons_per_amp: 0.3,
        primaries_per_amp: 0.133,
        diffusion_coeff: 0.0008,
    },
];

/// Precomputed lookup tables. See the module documentation for the formulas.
#[derive(Debug)]
pub struct ErrorTables {
    diffusion: [Vec<f64>; 3],
    landau: [Vec<f64>; 3],
    noise: [f64; 3],
    /// Isolated clusters on short pads
    cor_isolated_short: Vec<f64>,
    /// Isolated clusters on medium and long pads
    cor_isolated_outer: Vec<f64>,
    /// Overlapping and split clusters
    cor_overlapping: Vec<f64>,
}

static ERROR_TABLES: OnceCell<ErrorTables> = OnceCell::new();

/// Compute the process-wide tables if needed and return them.
///
/// Safe to call from several threads; the tables are built exactly once.
pub fn initialize_tables() -> &'static ErrorTables {
    ERROR_TABLES.get_or_init(ErrorTables::compute)
}

/// Landau term of one regime, with the relative fluctuation kept in `[0, 1]`.
fn landau_term(k: &RegimeConstants, amp: f64) -> f64 {
    let nprim = k.primaries_per_amp * amp;
    let pl2 = k.pad_length.powi(2);
    let fluct = (2.0 + 0.12 * nprim) * 0.5 * (2.0 + nprim * nprim * 0.001 / pl2) / nprim;
    // zero or negative amplitudes give inf or a negative ratio, NaN is taken as saturated
    let fluct = if fluct.is_nan() { 1.0 } else { fluct.clamp(0.0, 1.0) };
    fluct * pl2 / 12.0
}

impl ErrorTables {
    fn compute() -> Self {
        let per_regime = |f: &dyn Fn(&RegimeConstants, f64) -> f64| -> [Vec<f64>; 3] {
            std::array::from_fn(|r| {
                (0..=MAX_TABULATED_AMPLITUDE)
                    .map(|amp| f(&REGIMES[r], amp.max(MIN_TABULATED_AMPLITUDE) as f64))
                    .collect()
            })
        };

        let diffusion = per_regime(&|k: &RegimeConstants, amp: f64| {
            let nel = k.electrons_per_amp * amp;
            (2.0 + k.diffusion_coeff * nel / k.pad_length.powi(2)) / nel
        });
        let landau = per_regime(&landau_term);
        let noise = std::array::from_fn(|r| 0.0004 / REGIMES[r].pad_length);

        let quality_table = |f: fn(f64) -> f64| -> Vec<f64> {
            (0..N_QUALITY_BINS).map(|i| f(i as f64 / 100.0)).collect()
        };

        ErrorTables {
            diffusion,
            landau,
            noise,
            cor_isolated_short: quality_table(|r| (0.78 + (7.4 * (r - 1.2)).exp()).max(0.6)),
            cor_isolated_outer: quality_table(|r| (0.72 + (3.36 * (r - 1.2)).exp()).max(0.6)),
            cor_overlapping: quality_table(|r| (r + 0.5).powf(1.5).max(1.2)),
        }
    }

    #[inline]
    pub fn diffusion(&self, regime: PadRegime, amplitude: usize) -> f64 {
        self.diffusion[regime.index()][amplitude.min(MAX_TABULATED_AMPLITUDE)]
    }

    #[inline]
    pub fn landau(&self, regime: PadRegime, amplitude: usize) -> f64 {
        self.landau[regime.index()][amplitude.min(MAX_TABULATED_AMPLITUDE)]
    }

    #[inline]
    pub fn noise(&self, regime: PadRegime) -> f64 {
        self.noise[regime.index()]
    }

    fn quality_correction(&self, regime: PadRegime, kind: ClusterKind, quality: f64) -> f64 {
        let bin = ((quality * 100.0).max(0.0) as usize).min(N_QUALITY_BINS - 1);
        match (kind, regime) {
            (ClusterKind::Isolated, PadRegime::Short) => self.cor_isolated_short[bin],
            (ClusterKind::Isolated, _) => self.cor_isolated_outer[bin],
            (ClusterKind::Overlapping | ClusterKind::Split, _) => self.cor_overlapping[bin],
            (ClusterKind::Edge, _) => 1.0,
        }
    }
}

/// Everything the error model needs to know about one measurement.
#[derive(Debug, Clone, Copy)]
pub struct ErrorQuery {
    pub amplitude: f64,
    pub drift_length: Centimeter,
    pub regime: PadRegime,
    pub snp: f64,
    pub tgl: f64,
    /// Measured shape over expected shape; `1.0` when unknown
    pub quality: f64,
    pub kind: ClusterKind,
}

impl ErrorQuery {
    fn amplitude_bin(&self) -> Option<usize> {
        if !(self.amplitude <= MAX_TABULATED_AMPLITUDE as f64) {
            return None;
        }
        Some((self.amplitude.max(MIN_TABULATED_AMPLITUDE as f64)) as usize)
    }

    fn angle2_y(&self) -> f64 {
        let snp2 = self.snp.clamp(-ALMOST_ONE, ALMOST_ONE).powi(2);
        snp2 / (1.0 - snp2)
    }

    fn angle2_z(&self) -> f64 {
        self.tgl * self.tgl * (1.0 + self.angle2_y())
    }
}

/// Per-tracker view on the shared tables, carrying the detector's diffusion constants.
#[derive(Debug, Clone, Copy)]
pub struct ClusterErrorModel {
    tables: &'static ErrorTables,
    diff_t: f64,
    diff_l: f64,
    z_sigma: Centimeter,
}

impl ClusterErrorModel {
    /// Bind the (initialized) tables to a detector.
    pub fn new(geometry: &DetectorGeometry) -> Self {
        ClusterErrorModel {
            tables: initialize_tables(),
            diff_t: geometry.diff_t(),
            diff_l: geometry.diff_l(),
            z_sigma: geometry.z_sigma(),
        }
    }

    pub fn tables(&self) -> &'static ErrorTables {
        self.tables
    }

    /// Variance of the cluster position along the pad row.
    ///
    /// Arguments
    /// -----------------
    /// * `q`: amplitude, drift length, inclination, pad regime, shape quality and class.
    ///
    /// Return
    /// ----------
    /// * `diff_t² · diffusion(amp) · drift + landau(amp) · snp²/(1−snp²)`, corrected by
    ///   shape quality and class, plus the electronic noise, never below twice the noise.
    ///   A saturated amplitude returns `1.0`.
    pub fn sigma_y2(&self, q: &ErrorQuery) -> f64 {
        let Some(amp) = q.amplitude_bin() else {
            return SATURATED_SIGMA_Y2;
        };
        let t = self.tables;
        let noise = t.noise(q.regime);

        let mut res = self.diff_t * self.diff_t * t.diffusion(q.regime, amp) * q.drift_length
            + t.landau(q.regime, amp) * q.angle2_y();

        let cor = t.quality_correction(q.regime, q.kind, q.quality);
        res = match q.kind {
            ClusterKind::Isolated => res * cor,
            ClusterKind::Overlapping | ClusterKind::Split => (res + 0.002) * cor,
            ClusterKind::Edge => (res + 0.005) * 2.4,
        };

        (res + noise).max(2.0 * noise)
    }

    /// Variance of the cluster position along the drift direction.
    ///
    /// Same structure as [`ClusterErrorModel::sigma_y2`] with the longitudinal diffusion and
    /// the dip-angle projection `tgl² (1 + snp²/(1−snp²))`. Edge clusters are inflated once
    /// more below amplitude 70; the result is capped at 3 cm².
    pub fn sigma_z2(&self, q: &ErrorQuery) -> f64 {
        let Some(amp) = q.amplitude_bin() else {
            return MAX_SIGMA_Z2;
        };
        let t = self.tables;
        let noise = t.noise(q.regime);

        let mut res = self.diff_l * self.diff_l * t.diffusion(q.regime, amp) * q.drift_length
            + t.landau(q.regime, amp) * q.angle2_z();

        let cor = t.quality_correction(q.regime, q.kind, q.quality);
        res = match q.kind {
            ClusterKind::Isolated => res * cor,
            ClusterKind::Overlapping | ClusterKind::Split => (res + 0.002) * cor,
            ClusterKind::Edge => {
                let mut r = (res + 0.002) * 1.3;
                if amp < 70 {
                    r *= 1.3;
                }
                r
            }
        };

        (res + noise).max(2.0 * noise).min(MAX_SIGMA_Z2)
    }

    /// Expected cluster shape `(σy², σz²)` for a track crossing a row.
    ///
    /// Sum of the longitudinal diffusion over the drift length, the angular spread over
    /// the pad length and the intrinsic pad response (0.2 cm on short pads, 0.3 cm
    /// otherwise; `z_sigma` along z).
    pub fn expected_shape(
        &self,
        regime: PadRegime,
        pad_length: Centimeter,
        drift_length: Centimeter,
        snp: f64,
        tgl: f64,
    ) -> (f64, f64) {
        let nominal = ErrorQuery {
            amplitude: 0.0,
            drift_length,
            regime,
            snp,
            tgl,
            quality: 1.0,
            kind: ClusterKind::Isolated,
        };
        let sd2 = drift_length * self.diff_l * self.diff_l;
        let pl2 = pad_length * pad_length;
        let sres_y: f64 = if regime == PadRegime::Short { 0.2 } else { 0.3 };

        let sy2 = sd2 + pl2 * nominal.angle2_y() / 12.0 + sres_y * sres_y;
        let sz2 = sd2 + pl2 * nominal.angle2_z() / 12.0 + self.z_sigma * self.z_sigma;
        (sy2, sz2)
    }
}
