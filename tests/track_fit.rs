use approx::assert_relative_eq;
use nalgebra::Matrix5;

use tpctrack::constants::StateVector;
use tpctrack::seeding::conformal::{curvature, state_from_points};
use tpctrack::track::param::{Measurement, TrackParam};

/// Exact helix in a local frame: `snp(x) = c·x + snp0`, through `(0, 0, z0)`.
struct Helix {
    c: f64,
    snp0: f64,
    tgl: f64,
    z0: f64,
}

impl Helix {
    fn at(&self, x: f64) -> [f64; 3] {
        let snp = self.c * x + self.snp0;
        let y = ((1.0 - self.snp0 * self.snp0).sqrt() - (1.0 - snp * snp).sqrt()) / self.c;
        let z = self.z0 + self.tgl * (snp.asin() - self.snp0.asin()) / self.c;
        [x, y, z]
    }

    fn snp(&self, x: f64) -> f64 {
        self.c * x + self.snp0
    }
}

#[test]
fn seed_then_filter_recovers_the_helix() {
    for (c, snp0, tgl) in [(0.002, -0.2, 0.3), (-0.003, 0.25, -0.7), (0.0005, 0.0, 0.05)] {
        let helix = Helix {
            c,
            snp0,
            tgl,
            z0: 4.0,
        };
        let radii = (0..60).map(|i| 240.0 - 2.0 * i as f64).collect::<Vec<_>>();
        let seed = state_from_points(
            &[helix.at(radii[0]), helix.at(radii[10]), helix.at(radii[20])],
            1,
        )
        .unwrap();
        assert_relative_eq!(seed[4], c, max_relative = 1e-9);
        assert_relative_eq!(seed[2], helix.snp(radii[0]), epsilon = 1e-9);
        assert_relative_eq!(seed[3], tgl, max_relative = 1e-9);

        let cov = Matrix5::from_diagonal(&StateVector::new(1.0, 1.0, 0.01, 0.01, 1e-4));
        let mut param = TrackParam::new(radii[0], 0.3, seed, cov);
        for &x in &radii[1..] {
            param.propagate_to(x).unwrap();
            let [_, y, z] = helix.at(x);
            assert_relative_eq!(param.y(), y, epsilon = 1e-7);
            assert_relative_eq!(param.z(), z, epsilon = 1e-7);
            let m = Measurement {
                y,
                z,
                sigma_y2: 1e-10,
                sigma_z2: 1e-10,
            };
            assert!(param.predicted_chi2(&m) < 1.0);
            assert!(param.update(&m));
        }
        assert_relative_eq!(param.curvature(), c, max_relative = 1e-6);
        assert_relative_eq!(param.tgl(), tgl, max_relative = 1e-6);
        assert_relative_eq!(param.snp(), helix.snp(radii[59]), epsilon = 1e-9);
    }
}

#[test]
fn curvature_is_a_property_of_the_circle() {
    let helix = Helix {
        c: -0.0025,
        snp0: 0.1,
        tgl: 0.0,
        z0: 0.0,
    };
    let [x1, y1, _] = helix.at(200.0);
    let [x2, y2, _] = helix.at(150.0);
    let [x3, y3, _] = helix.at(90.0);
    let [x4, y4, _] = helix.at(30.0);
    assert_relative_eq!(curvature(x1, y1, x2, y2, x3, y3), -0.0025, max_relative = 1e-9);
    assert_relative_eq!(curvature(x1, y1, x3, y3, x4, y4), -0.0025, max_relative = 1e-9);
}

#[test]
fn propagation_round_trip_restores_the_state() {
    let helix = Helix {
        c: 0.003,
        snp0: -0.3,
        tgl: 0.4,
        z0: -10.0,
    };
    let [x, y, z] = helix.at(120.0);
    let state = StateVector::new(y, z, helix.snp(x), 0.4, 0.003);
    let cov = Matrix5::from_diagonal(&StateVector::new(0.1, 0.2, 1e-3, 1e-3, 1e-6));
    let mut param = TrackParam::new(x, 0.0, state, cov);
    param.propagate_to(220.0).unwrap();
    let [_, y2, z2] = helix.at(220.0);
    assert_relative_eq!(param.y(), y2, epsilon = 1e-9);
    assert_relative_eq!(param.z(), z2, epsilon = 1e-9);
    param.propagate_to(x).unwrap();
    for i in 0..5 {
        assert_relative_eq!(param.state()[i], state[i], epsilon = 1e-9);
    }
}
