//! Reconstruct one synthetic event and print the tracks as JSON.
//!
//! Usage:
//!   reconstruct_event [N_PARTICLES] [SEED]
//!
//! Logging follows `RUST_LOG` (e.g. `RUST_LOG=tpctrack=debug`).

use std::env;
use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tpctrack::geometry::DetectorGeometry;
use tpctrack::params::TrackerParams;
use tpctrack::{Cluster, ClusterKind, Tracker};

/// Clusters of `n` primaries from the nominal vertex, smeared by 300 µm.
fn generate(
    geometry: &DetectorGeometry,
    n: usize,
    rng: &mut StdRng,
) -> Result<Vec<Cluster>, rand_distr::NormalError> {
    let smear = Normal::new(0.0, 0.03)?;
    let charge = Normal::<f64>::new(40.0, 6.0)?;
    let mut clusters = Vec::new();
    for label in 0..n as i32 {
        let phi0: f64 = rng.gen_range(-PI..PI);
        let c = rng.gen_range(2e-4..4e-3) * if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
        let tgl = rng.gen_range(-0.8..0.8);
        for row in 0..geometry.n_rows() {
            let x = geometry.radius(row);
            let hit = (0..geometry.n_sectors()).find_map(|sector| {
                let (s0, c0) = (phi0 - geometry.sector_alpha(sector)).sin_cos();
                let snp = c * x + s0;
                if c0 <= 0.0 || snp.abs() >= 0.99 {
                    return None;
                }
                let y = (c0 - (1.0 - snp * snp).sqrt()) / c;
                let z = tgl * (snp.asin() - s0.asin()) / c;
                (y.abs() <= geometry.max_y(row)).then_some((sector, y, z))
            });
            let Some((sector, y, z)) = hit else {
                continue;
            };
            if geometry.in_dead_zone(row, y) || !geometry.in_acceptance(row, z) {
                continue;
            }
            let q_max = charge.sample(rng).max(6.0);
            clusters.push(
                Cluster::new(sector as u16, row as u16, y + smear.sample(rng), z + smear.sample(rng))
                    .with_charge(5.0 * q_max, q_max)
                    .with_kind(ClusterKind::Isolated)
                    .with_label(label),
            );
        }
    }
    Ok(clusters)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let n_particles = args.get(1).map(|s| s.parse()).transpose()?.unwrap_or(50);
    let seed = args.get(2).map(|s| s.parse()).transpose()?.unwrap_or(42);

    let tracker = Tracker::new(DetectorGeometry::standard(), TrackerParams::default())?;
    let mut rng = StdRng::seed_from_u64(seed);
    let clusters = generate(tracker.geometry(), n_particles, &mut rng)?;
    info!(particles = n_particles, clusters = clusters.len(), "event generated");

    let event = tracker.reconstruct(clusters);
    println!("{}", serde_json::to_string_pretty(&event)?);
    Ok(())
}
