//! # Specific energy loss
//!
//! Truncated-mean dE/dx of a track from the peak charges of its clusters, per pad regime
//! and combined, and a particle species hypothesis from the ALEPH Bethe–Bloch
//! parametrization.
//!
//! Each usable cluster gives one sample `2 · q_max`, normalized by the regime gain
//! (short pads `/0.6`, long pads `/1.5`), reduced for broad clusters and corrected for the
//! path length through the pad. Samples are compressed logarithmically, sorted, and only the
//! fraction `[dedx_low, dedx_high)` of each region is averaged, which removes the Landau
//! tail and the lowest outliers.
//!
//! ## See also
//!
//! * [`DedxEstimator::estimate`]
//! * [`Species::identify`]

use serde::{Deserialize, Serialize};

use crate::clusters::store::ClusterStore;
use crate::clusters::usage::{ClusterUsage, UsageTable};
use crate::clusters::ClusterKind;
use crate::geometry::{DetectorGeometry, PadRegime};
use crate::params::TrackerParams;
use crate::track::candidate::TrackCandidate;

/// Cluster width, `sqrt(σy² σz²)`, above which a sample is scaled down.
const BROAD_CLUSTER: f64 = 1.5;
const BROAD_CLUSTER_SCALE: f64 = 1.3;

fn regime_gain(regime: PadRegime) -> f64 {
    match regime {
        PadRegime::Short => 0.6,
        PadRegime::Medium => 1.0,
        PadRegime::Long => 1.5,
    }
}

/// Truncated mean of one pad regime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionDedx {
    /// `0.0` when the region has too few samples
    pub mean: f64,
    pub sigma: f64,
    /// Samples kept after truncation
    pub n_samples: usize,
}

/// dE/dx of a track, overall and per [`PadRegime`] (indexed by [`PadRegime::index`]).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DedxEstimate {
    pub overall: f64,
    pub regions: [RegionDedx; 3],
}

impl DedxEstimate {
    pub fn region(&self, regime: PadRegime) -> &RegionDedx {
        &self.regions[regime.index()]
    }

    pub fn is_valid(&self) -> bool {
        self.overall > 0.0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DedxEstimator<'a> {
    geometry: &'a DetectorGeometry,
    params: &'a TrackerParams,
}

impl<'a> DedxEstimator<'a> {
    pub fn new(geometry: &'a DetectorGeometry, params: &'a TrackerParams) -> Self {
        DedxEstimator { geometry, params }
    }

    /// Truncated-mean dE/dx of `track`.
    ///
    /// Clusters with `q_max < dedx_min_qmax`, edge clusters and clusters owned by more than
    /// one track are skipped.
    ///
    /// Return
    /// ----------
    /// * The per-region truncated means and their sample-weighted combination. Regions with
    ///   fewer than `dedx_min_samples` kept samples are reported as zero and left out of
    ///   the combination; a track without any valid region gets `overall == 0.0`.
    pub fn estimate(
        &self,
        track: &TrackCandidate,
        store: &ClusterStore,
        usage: &UsageTable,
    ) -> DedxEstimate {
        let p = self.params;
        let mut samples: [Vec<f64>; 3] = Default::default();
        for (row, slot) in track.clusters() {
            let Some(cluster) = store.get(slot.id) else {
                continue;
            };
            if cluster.q_max < p.dedx_min_qmax
                || cluster.kind == ClusterKind::Edge
                || usage.state(store.flat_index(slot.id)) == ClusterUsage::Shared
            {
                continue;
            }
            let regime = self.geometry.row(row).regime;
            let mut amplitude = 2.0 * cluster.q_max / regime_gain(regime);
            if (cluster.sigma_y2 * cluster.sigma_z2).sqrt() > BROAD_CLUSTER {
                amplitude /= BROAD_CLUSTER_SCALE;
            }
            amplitude /= (1.0 + slot.tan_phi.powi(2) + slot.tan_lambda.powi(2)).sqrt();
            samples[regime.index()].push(compress(amplitude, p.dedx_log_scale));
        }

        let mut estimate = DedxEstimate::default();
        let (mut weighted, mut total) = (0.0, 0usize);
        for (region, values) in estimate.regions.iter_mut().zip(samples.iter_mut()) {
            if let Some(r) = self.truncated_mean(values) {
                weighted += r.mean * r.n_samples as f64;
                total += r.n_samples;
                *region = r;
            }
        }
        if total > 0 {
            estimate.overall = weighted / total as f64;
        }
        estimate
    }

    /// Truncated mean of log-compressed samples, expressed back in amplitude units.
    fn truncated_mean(&self, values: &mut [f64]) -> Option<RegionDedx> {
        let p = self.params;
        values.sort_by(f64::total_cmp);
        let n = values.len();
        let lo = (p.dedx_low * n as f64) as usize;
        let hi = ((p.dedx_high * n as f64) as usize).min(n);
        if hi <= lo || hi - lo < p.dedx_min_samples {
            return None;
        }
        let kept = &values[lo..hi];
        let m = kept.len() as f64;
        let mean = kept.iter().sum::<f64>() / m;
        let var = kept.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / m;
        let scale = p.dedx_log_scale;
        Some(RegionDedx {
            mean: expand(mean, scale),
            sigma: var.sqrt() * (mean / scale).exp(),
            n_samples: kept.len(),
        })
    }
}

#[inline]
fn compress(amplitude: f64, scale: f64) -> f64 {
    scale * (1.0 + amplitude / scale).ln()
}

#[inline]
fn expand(value: f64, scale: f64) -> f64 {
    scale * ((value / scale).exp() - 1.0)
}

/// ALEPH parametrization of the mean energy loss as a function of `βγ`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BetheBlochAleph {
    pub p: [f64; 5],
}

impl Default for BetheBlochAleph {
    fn default() -> Self {
        BetheBlochAleph {
            p: [0.0283086, 26.3394, 5.04114e-11, 2.12543, 4.88663],
        }
    }
}

impl BetheBlochAleph {
    /// `βγ` at the minimum of ionization used as normalization.
    pub const MIP_BETA_GAMMA: f64 = 3.5;

    pub fn evaluate(&self, beta_gamma: f64) -> f64 {
        let [p0, p1, p2, p3, p4] = self.p;
        let beta = beta_gamma / (1.0 + beta_gamma * beta_gamma).sqrt();
        let aa = beta.powf(p3);
        let bb = p2 + (1.0 / beta_gamma).powf(p4);
        p0 / aa * (p1 - aa - bb.ln())
    }

    /// Energy loss relative to a minimum-ionizing particle.
    pub fn relative(&self, beta_gamma: f64) -> f64 {
        self.evaluate(beta_gamma) / self.evaluate(Self::MIP_BETA_GAMMA)
    }
}

/// Particle species hypotheses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Species {
    Electron,
    Pion,
    Kaon,
    Proton,
}

impl Species {
    pub const ALL: [Species; 4] = [
        Species::Electron,
        Species::Pion,
        Species::Kaon,
        Species::Proton,
    ];

    /// Mass in GeV/c².
    pub fn mass(self) -> f64 {
        match self {
            Species::Electron => 0.000_510_999,
            Species::Pion => 0.139_570,
            Species::Kaon => 0.493_677,
            Species::Proton => 0.938_272,
        }
    }

    /// Expected truncated mean for `momentum` (GeV/c), in units where a MIP gives `mip`.
    pub fn expected_dedx(self, momentum: f64, mip: f64, curve: &BetheBlochAleph) -> f64 {
        mip * curve.relative(momentum / self.mass())
    }

    /// Species whose expectation is closest to `dedx`, within a relative `tolerance`.
    ///
    /// Return
    /// ----------
    /// * `None` if `dedx` or `momentum` is not positive, or no expectation lies within
    ///   `tolerance · expected` of the measurement.
    pub fn identify(
        dedx: f64,
        momentum: f64,
        mip: f64,
        tolerance: f64,
        curve: &BetheBlochAleph,
    ) -> Option<Species> {
        if !(dedx > 0.0 && momentum > 0.0) {
            return None;
        }
        Species::ALL
            .iter()
            .map(|&s| {
                let expected = s.expected_dedx(momentum, mip, curve);
                (s, ((dedx - expected) / expected).abs())
            })
            .filter(|(_, distance)| *distance <= tolerance)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(s, _)| s)
    }
}
