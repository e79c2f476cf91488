//! Synthetic events: primary helices from the nominal vertex, sampled on every pad row they
//! cross, optionally smeared.
#![allow(dead_code)]

use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use tpctrack::geometry::DetectorGeometry;
use tpctrack::{Cluster, ClusterKind};

/// A charged particle leaving the origin.
#[derive(Debug, Clone, Copy)]
pub struct Particle {
    /// Global azimuth of the initial direction
    pub phi0: f64,
    /// Signed curvature, 1/cm
    pub curvature: f64,
    pub tgl: f64,
    pub z0: f64,
    pub label: i32,
}

/// Position smearing and charge of the generated clusters.
#[derive(Debug, Clone, Copy)]
pub struct Smearing {
    pub sigma_y: f64,
    pub sigma_z: f64,
    pub q_max: f64,
    pub q_max_spread: f64,
}

impl Smearing {
    pub const NONE: Smearing = Smearing {
        sigma_y: 0.0,
        sigma_z: 0.0,
        q_max: 40.0,
        q_max_spread: 0.0,
    };

    pub const REALISTIC: Smearing = Smearing {
        sigma_y: 0.03,
        sigma_z: 0.03,
        q_max: 40.0,
        q_max_spread: 6.0,
    };
}

/// Crossing of a particle with pad `row` of `sector`, in the sector frame.
///
/// Uses `snp(x) = C·x + sin ψ0` and `y(x) = (cos ψ0 − cos ψ(x)) / C` on the outgoing branch.
fn crossing(
    geometry: &DetectorGeometry,
    p: &Particle,
    sector: usize,
    row: usize,
) -> Option<(f64, f64)> {
    let psi0 = p.phi0 - geometry.sector_alpha(sector);
    let (s0, c0) = psi0.sin_cos();
    if c0 <= 0.0 {
        return None;
    }
    let x = geometry.radius(row);
    let c = p.curvature;
    let snp = c * x + s0;
    if snp.abs() >= 0.99 {
        return None;
    }
    let y = (c0 - (1.0 - snp * snp).sqrt()) / c;
    if y.abs() > geometry.max_y(row) {
        return None;
    }
    let z = p.z0 + p.tgl * (snp.asin() - s0.asin()) / c;
    Some((y, z))
}

/// Clusters left by `particle`, one per crossed row.
pub fn particle_clusters(
    geometry: &DetectorGeometry,
    particle: &Particle,
    smearing: &Smearing,
    rng: &mut StdRng,
) -> Vec<Cluster> {
    let dy = Normal::new(0.0, smearing.sigma_y.max(1e-12)).unwrap();
    let dz = Normal::new(0.0, smearing.sigma_z.max(1e-12)).unwrap();
    let dq = Normal::new(smearing.q_max, smearing.q_max_spread.max(1e-12)).unwrap();

    let mut out = Vec::new();
    for row in 0..geometry.n_rows() {
        let Some((sector, (y, z))) = (0..geometry.n_sectors())
            .find_map(|s| crossing(geometry, particle, s, row).map(|hit| (s, hit)))
        else {
            continue;
        };
        if geometry.in_dead_zone(row, y) || !geometry.in_acceptance(row, z) {
            continue;
        }
        let (y, z) = if smearing.sigma_y > 0.0 {
            (y + dy.sample(rng), z + dz.sample(rng))
        } else {
            (y, z)
        };
        let q_max: f64 = if smearing.q_max_spread > 0.0 {
            dq.sample(rng).max(6.0)
        } else {
            smearing.q_max
        };
        out.push(
            Cluster::new(sector as u16, row as u16, y, z)
                .with_charge(5.0 * q_max, q_max)
                .with_kind(ClusterKind::Isolated)
                .with_label(particle.label),
        );
    }
    out
}

/// `n` primaries with uniform azimuth, `|C|` in `[2e-4, max_curvature]` and `|tgl| < 0.8`.
pub fn random_particles(n: usize, max_curvature: f64, rng: &mut StdRng) -> Vec<Particle> {
    (0..n)
        .map(|label| {
            let sign = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
            Particle {
                phi0: rng.gen_range(-PI..PI),
                curvature: sign * rng.gen_range(2e-4..max_curvature),
                tgl: rng.gen_range(-0.8..0.8),
                z0: 0.0,
                label: label as i32,
            }
        })
        .collect()
}

/// A full event of `n` primaries, clusters grouped by particle.
pub fn synthetic_event(
    geometry: &DetectorGeometry,
    n: usize,
    smearing: &Smearing,
    seed: u64,
) -> (Vec<Particle>, Vec<Cluster>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let particles = random_particles(n, 0.004, &mut rng);
    let clusters = particles
        .iter()
        .flat_map(|p| particle_clusters(geometry, p, smearing, &mut rng))
        .collect();
    (particles, clusters)
}
