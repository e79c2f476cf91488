mod common;

use approx::assert_relative_eq;
use rand::rngs::StdRng;
use rand::SeedableRng;

use common::{particle_clusters, Particle, Smearing};
use tpctrack::constants::B2C;
use tpctrack::geometry::DetectorGeometry;
use tpctrack::params::{SeedCuts, SeedingPass, TrackerParams};
use tpctrack::seeding::SeedingPolicy;
use tpctrack::track::candidate::TrackStatus;
use tpctrack::Tracker;

fn hundred_rows() -> DetectorGeometry {
    DetectorGeometry::builder()
        .uniform_rows(100, 100.0, 1.0, 0.5)
        .build()
        .unwrap()
}

fn centred_particle(geometry: &DetectorGeometry, curvature: f64, label: i32) -> Particle {
    Particle {
        phi0: geometry.sector_alpha(0),
        curvature,
        tgl: 0.2,
        z0: 0.0,
        label,
    }
}

#[test]
fn clean_track_uses_every_row() {
    let geometry = hundred_rows();
    let particle = centred_particle(&geometry, 0.001, 0);
    let mut rng = StdRng::seed_from_u64(1);
    let clusters = particle_clusters(&geometry, &particle, &Smearing::NONE, &mut rng);
    assert_eq!(clusters.len(), 100);

    let tracker = Tracker::new(geometry, TrackerParams::default()).unwrap();
    let event = tracker.reconstruct(clusters);

    assert_eq!(event.tracks.len(), 1);
    let track = &event.tracks[0];
    assert_eq!(track.n_found, 100);
    assert_eq!(track.n_foundable, 100);
    assert_eq!(track.n_shared, 0);
    assert_eq!(track.status, TrackStatus::Active);
    assert_eq!(track.origin.policy, SeedingPolicy::VertexConstrained);
    assert_eq!(track.label, Some(0));
    assert_relative_eq!(track.state[4], 0.001, max_relative = 1e-3);
    assert_relative_eq!(track.state[3], 0.2, max_relative = 1e-3);
    assert_relative_eq!(track.pt, B2C * 5.0 / 0.001, max_relative = 1e-3);
    // the refit leaves the state at the outermost row
    assert_relative_eq!(track.x, 199.0, epsilon = 1e-9);
    assert_eq!(event.summary.cluster_usage, [0, 0, 100, 0]);
    let mut sources = track.sources.clone();
    sources.sort_unstable();
    assert_eq!(sources, (0..100).collect::<Vec<_>>());
}

#[test]
fn crossing_tracks_keep_their_own_clusters() {
    let geometry = hundred_rows();
    let mut rng = StdRng::seed_from_u64(2);
    let a = centred_particle(&geometry, 0.0015, 0);
    let b = Particle {
        tgl: -0.3,
        label: 1,
        ..centred_particle(&geometry, -0.0015, 1)
    };
    let mut clusters = particle_clusters(&geometry, &a, &Smearing::REALISTIC, &mut rng);
    clusters.extend(particle_clusters(&geometry, &b, &Smearing::REALISTIC, &mut rng));

    let tracker = Tracker::new(geometry, TrackerParams::default()).unwrap();
    let event = tracker.reconstruct(clusters);

    let mut labels = event.tracks.iter().filter_map(|t| t.label).collect::<Vec<_>>();
    labels.sort_unstable();
    assert_eq!(labels, vec![0, 1]);
    for track in &event.tracks {
        assert!(track.n_found >= 90);
        assert_eq!(track.n_shared, 0);
        assert!(track.state[4].signum() == if track.label == Some(0) { 1.0 } else { -1.0 });
    }
}

#[test]
fn unconstrained_schedule_finds_the_same_track() {
    let geometry = hundred_rows();
    let particle = centred_particle(&geometry, 0.001, 3);
    let mut rng = StdRng::seed_from_u64(3);
    let clusters = particle_clusters(&geometry, &particle, &Smearing::REALISTIC, &mut rng);

    let pass = SeedingPass {
        policy: SeedingPolicy::Unconstrained,
        outer_row: 99,
        inner_row: 80,
        cuts: SeedCuts::LOOSE,
    };
    let params = TrackerParams::builder().passes(vec![pass]).build().unwrap();
    let tracker = Tracker::new(geometry, params).unwrap();
    let event = tracker.reconstruct(clusters);

    assert_eq!(event.tracks.len(), 1);
    let track = &event.tracks[0];
    assert_eq!(track.label, Some(3));
    assert_eq!(track.origin.policy, SeedingPolicy::Unconstrained);
    assert!(track.n_found >= 90);
    let [_, provisional, owned, shared] = event.summary.cluster_usage;
    assert_eq!(provisional, 0);
    assert_eq!(shared, 0);
    assert_eq!(owned, track.n_found as usize);
}

#[test]
fn reconstruction_is_deterministic() {
    let geometry = hundred_rows();
    let mut rng = StdRng::seed_from_u64(4);
    let mut clusters = Vec::new();
    for (k, c) in [0.001, -0.002, 0.0005].into_iter().enumerate() {
        let p = Particle {
            phi0: geometry.sector_alpha(k * 3),
            ..centred_particle(&geometry, c, k as i32)
        };
        clusters.extend(particle_clusters(&geometry, &p, &Smearing::REALISTIC, &mut rng));
    }
    let tracker = Tracker::new(geometry, TrackerParams::default()).unwrap();
    let first = tracker.reconstruct(clusters.clone());
    let second = tracker.reconstruct(clusters);
    assert_eq!(first, second);
    assert_eq!(first.tracks.len(), 3);
}
