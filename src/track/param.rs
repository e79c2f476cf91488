//! # Local track state
//!
//! [`TrackParam`] is the five-parameter helix state of a track at a reference radius `x`
//! in the local frame of a sector (rotation angle `alpha`), together with its covariance.
//!
//! ## State vector
//!
//! ```text
//! p = (y, z, snp, tgl, C)
//!
//! y    position along the pad row
//! z    position along the drift direction
//! snp  sine of the local azimuthal direction, snp(x) = C·x − η
//! tgl  tangent of the dip angle, dz/ds
//! C    signed curvature (1/cm)
//! ```
//!
//! In the absence of material effects a track is an exact helix, so moving the state
//! between radii uses closed forms: the transverse displacement is exact for a circle
//! and the longitudinal one uses the exact arc length. Covariance transport uses the
//! first-order Jacobian.
//!
//! ## See also
//!
//! * [`TrackParam::propagate_to`] – move to another radius
//! * [`TrackParam::rotate`] – change sector frame
//! * [`TrackParam::predicted_chi2`], [`TrackParam::update`] – Kalman measurement step

use nalgebra::{Matrix2, Matrix5, Matrix5x2, Vector2};
use serde::{Deserialize, Serialize};

use crate::constants::{
    Centimeter, Curvature, KiloGauss, Radian, StateCovariance, StateVector, ALMOST_ONE, B2C,
    CHI2_SENTINEL, MAX_REPORTED_PT, SINGULAR_EPS,
};
use crate::tracker_errors::{PropagationError, RotationError};

/// A two-dimensional position measurement on a pad row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub y: Centimeter,
    pub z: Centimeter,
    pub sigma_y2: f64,
    pub sigma_z2: f64,
}

/// Geometric quantities of a move from `x` to `x + dx` along the current helix.
#[derive(Debug, Clone, Copy)]
struct Step {
    dx: f64,
    f1: f64,
    f2: f64,
    r1: f64,
    dy: f64,
    ds: f64,
}

/// Signed arc length of a circle of curvature `c` subtending a signed chord.
///
/// Exact for turning angles below π; uses the series of `asin` for small `|c·chord|`.
pub fn arc_from_chord(chord: Centimeter, c: Curvature) -> Centimeter {
    let h = 0.5 * chord * c;
    if h.abs() < 1.0e-4 {
        let h2 = h * h;
        chord * (1.0 + h2 / 6.0 + 3.0 * h2 * h2 / 40.0)
    } else {
        2.0 * h.clamp(-1.0, 1.0).asin() / c
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackParam {
    x: Centimeter,
    alpha: Radian,
    p: StateVector,
    c: StateCovariance,
}

impl TrackParam {
    pub fn new(x: Centimeter, alpha: Radian, p: StateVector, c: StateCovariance) -> Self {
        TrackParam { x, alpha, p, c }
    }

    #[inline]
    pub fn x(&self) -> Centimeter {
        self.x
    }
    #[inline]
    pub fn alpha(&self) -> Radian {
        self.alpha
    }
    #[inline]
    pub fn y(&self) -> Centimeter {
        self.p[0]
    }
    #[inline]
    pub fn z(&self) -> Centimeter {
        self.p[1]
    }
    #[inline]
    pub fn snp(&self) -> f64 {
        self.p[2]
    }
    #[inline]
    pub fn tgl(&self) -> f64 {
        self.p[3]
    }
    #[inline]
    pub fn curvature(&self) -> Curvature {
        self.p[4]
    }
    #[inline]
    pub fn state(&self) -> &StateVector {
        &self.p
    }
    #[inline]
    pub fn covariance(&self) -> &StateCovariance {
        &self.c
    }

    /// Lower triangle of the covariance, row by row (15 values).
    pub fn covariance_packed(&self) -> [f64; 15] {
        let mut out = [0.0; 15];
        let mut k = 0;
        for i in 0..5 {
            for j in 0..=i {
                out[k] = self.c[(i, j)];
                k += 1;
            }
        }
        out
    }

    /// Transverse momentum in GeV/c for a field `bz`.
    pub fn pt(&self, bz: KiloGauss) -> f64 {
        let c = self.curvature().abs();
        if c < 1.0e-12 || bz == 0.0 {
            return MAX_REPORTED_PT;
        }
        (B2C * bz.abs() / c).min(MAX_REPORTED_PT)
    }

    /// Total momentum in GeV/c for a field `bz`.
    pub fn momentum(&self, bz: KiloGauss) -> f64 {
        self.pt(bz) * (1.0 + self.tgl() * self.tgl()).sqrt()
    }

    /// Global position `(X, Y, Z)` of the reference point.
    pub fn global_position(&self) -> (f64, f64, f64) {
        let (sa, ca) = self.alpha.sin_cos();
        (
            self.x * ca - self.y() * sa,
            self.x * sa + self.y() * ca,
            self.z(),
        )
    }

    fn step_to(&self, xk: Centimeter) -> Result<Step, PropagationError> {
        let dx = xk - self.x;
        let f1 = self.snp();
        let cdx = self.curvature() * dx;
        if !(cdx.abs() < 2.0) {
            return Err(PropagationError::TurningAngleTooLarge { value: cdx.abs() });
        }
        let f2 = f1 + cdx;
        if !(f1.abs() < ALMOST_ONE) {
            return Err(PropagationError::SnpOutOfRange { snp: f1 });
        }
        if !(f2.abs() < ALMOST_ONE) {
            return Err(PropagationError::SnpOutOfRange { snp: f2 });
        }
        let r1 = ((1.0 - f1) * (1.0 + f1)).sqrt();
        let r2 = ((1.0 - f2) * (1.0 + f2)).sqrt();
        if r1 + r2 < f64::EPSILON {
            return Err(PropagationError::DegenerateDirection);
        }

        let dy2dx = (f1 + f2) / (r1 + r2);
        let dy = dx * dy2dx;
        let chord = dx * (1.0 + dy2dx * dy2dx).sqrt();
        let ds = arc_from_chord(chord, self.curvature());
        Ok(Step {
            dx,
            f1,
            f2,
            r1,
            dy,
            ds,
        })
    }

    /// Move the reference point to radius `xk` along the helix.
    ///
    /// Arguments
    /// -----------------
    /// * `xk`: target local radius.
    ///
    /// Return
    /// ----------
    /// * `Ok(())` with state and covariance transported, or a [`PropagationError`] when the
    ///   direction at either end would reach `|snp| >= 0.999` or the implied turning
    ///   `|C·dx|` exceeds the valid range. On error the state is left untouched.
    ///
    /// See also
    /// ------------
    /// * [`TrackParam::prolongation`] – same move without mutation
    pub fn propagate_to(&mut self, xk: Centimeter) -> Result<(), PropagationError> {
        let s = self.step_to(xk)?;
        if s.dx == 0.0 {
            return Ok(());
        }

        let tgl = self.tgl();
        let r1_3 = s.r1 * s.r1 * s.r1;
        let f02 = s.dx / r1_3;
        let f04 = 0.5 * s.dx * s.dx / r1_3;
        let f12 = s.dx * tgl * s.f1 / r1_3;
        let f13 = s.dx / s.r1;
        let f14 = 0.5 * s.dx * s.dx * tgl * s.f1 / r1_3;
        let f24 = s.dx;

        let mut jac = Matrix5::identity();
        jac[(0, 2)] = f02;
        jac[(0, 4)] = f04;
        jac[(1, 2)] = f12;
        jac[(1, 3)] = f13;
        jac[(1, 4)] = f14;
        jac[(2, 4)] = f24;

        self.c = symmetrized(&(jac * self.c * jac.transpose()));
        self.x = xk;
        self.p[0] += s.dy;
        self.p[1] += tgl * s.ds;
        self.p[2] = s.f2;
        Ok(())
    }

    /// Position `(y, z)` the track would have at radius `xk`, without moving it.
    pub fn prolongation(&self, xk: Centimeter) -> Option<(Centimeter, Centimeter)> {
        let s = self.step_to(xk).ok()?;
        Some((self.y() + s.dy, self.z() + self.tgl() * s.ds))
    }

    /// Drift coordinate the track would have at radius `xk`.
    pub fn z_at(&self, xk: Centimeter) -> Option<Centimeter> {
        self.prolongation(xk).map(|(_, z)| z)
    }

    /// Express the state in a frame rotated by `dalpha` around the beam axis.
    ///
    /// Return
    /// ----------
    /// * `Ok(())` on success. Fails when the track would point backwards in the new
    ///   frame or when `|snp|` would reach 0.999; on error the state is left untouched.
    pub fn rotate(&mut self, dalpha: Radian) -> Result<(), RotationError> {
        let (sa, ca) = dalpha.sin_cos();
        let sf = self.snp();
        let cf = ((1.0 - sf) * (1.0 + sf)).sqrt();
        if cf * ca + sf * sa < 0.0 {
            return Err(RotationError::BackwardDirection);
        }
        let new_snp = sf * ca - cf * sa;
        if !(new_snp.abs() < ALMOST_ONE) {
            return Err(RotationError::SnpOutOfRange { snp: new_snp });
        }

        let rr = ca + sf / cf * sa;
        let jac = Matrix5::from_diagonal(&StateVector::new(ca, 1.0, rr, 1.0, 1.0));

        let (x, y) = (self.x, self.y());
        self.alpha += dalpha;
        self.x = x * ca + y * sa;
        self.p[0] = -x * sa + y * ca;
        self.p[2] = new_snp;
        self.c = symmetrized(&(jac * self.c * jac.transpose()));
        Ok(())
    }

    fn residual_covariance(&self, m: &Measurement) -> Matrix2<f64> {
        Matrix2::new(
            self.c[(0, 0)] + m.sigma_y2,
            self.c[(0, 1)],
            self.c[(1, 0)],
            self.c[(1, 1)] + m.sigma_z2,
        )
    }

    /// χ² of a measurement against the predicted state.
    ///
    /// Return
    /// ----------
    /// * `rᵀ S⁻¹ r` with `r` the residual and `S` the predicted position covariance plus
    ///   the measurement covariance, or [`CHI2_SENTINEL`] when `S` is singular.
    pub fn predicted_chi2(&self, m: &Measurement) -> f64 {
        let s = self.residual_covariance(m);
        let det = s.determinant();
        if !(det.abs() >= SINGULAR_EPS) {
            return CHI2_SENTINEL;
        }
        let d0 = m.y - self.y();
        let d1 = m.z - self.z();
        (d0 * d0 * s[(1, 1)] + d1 * d1 * s[(0, 0)] - 2.0 * d0 * d1 * s[(0, 1)]) / det
    }

    /// Kalman update with a measurement at the current radius.
    ///
    /// Return
    /// ----------
    /// * `true` if the state was updated. `false` leaves the state untouched: the residual
    ///   covariance is singular, the updated direction reaches `|snp| >= 0.999`, or the
    ///   updated covariance loses positivity on its diagonal.
    pub fn update(&mut self, m: &Measurement) -> bool {
        let s = self.residual_covariance(m);
        if !(s.determinant().abs() >= SINGULAR_EPS) {
            return false;
        }
        let Some(s_inv) = s.try_inverse() else {
            return false;
        };

        let gain: Matrix5x2<f64> = self.c.fixed_columns::<2>(0) * s_inv;
        let residual = Vector2::new(m.y - self.y(), m.z - self.z());
        let p = self.p + gain * residual;
        if !(p[2].abs() < ALMOST_ONE) {
            return false;
        }

        let c = symmetrized(&(self.c - gain * self.c.fixed_rows::<2>(0)));
        if (0..5).any(|i| !(c[(i, i)] >= 0.0)) {
            return false;
        }

        self.p = p;
        self.c = c;
        true
    }

    /// Forget correlations and inflate the diagonal by `factor`.
    pub fn reset_covariance(&mut self, factor: f64) {
        let diag = self.c.diagonal() * factor;
        self.c = Matrix5::from_diagonal(&diag);
    }
}

#[inline]
fn symmetrized(m: &StateCovariance) -> StateCovariance {
    (m + m.transpose()) * 0.5
}

#[cfg(test)]
mod test_track_param {
    use super::*;
    use approx::assert_relative_eq;

    /// Exact helix in a local frame: circle centre `(xc, yc)`, curvature `c`.
    struct Helix {
        c: f64,
        xc: f64,
        yc: f64,
        tgl: f64,
        x_ref: f64,
        z_ref: f64,
    }

    impl Helix {
        fn snp(&self, x: f64) -> f64 {
            self.c * (x - self.xc)
        }
        fn y(&self, x: f64) -> f64 {
            let u = self.snp(x);
            self.yc - (1.0 - u * u).sqrt() / self.c
        }
        fn z(&self, x: f64) -> f64 {
            let s = (self.snp(x).asin() - self.snp(self.x_ref).asin()) / self.c;
            self.z_ref + self.tgl * s
        }
        fn param_at(&self, x: f64) -> TrackParam {
            let p = StateVector::new(self.y(x), self.z(x), self.snp(x), self.tgl, self.c);
            let cov = Matrix5::from_diagonal(&StateVector::new(0.1, 0.1, 1e-3, 1e-3, 1e-6));
            TrackParam::new(x, 0.0, p, cov)
        }
    }

    fn helix() -> Helix {
        Helix {
            c: 0.002,
            xc: 60.0,
            yc: 480.0,
            tgl: 0.4,
            x_ref: 200.0,
            z_ref: 30.0,
        }
    }

    #[test]
    fn propagation_follows_exact_helix() {
        let h = helix();
        let mut t = h.param_at(200.0);
        for x in [180.0, 150.0, 120.0, 90.0] {
            t.propagate_to(x).unwrap();
            assert_relative_eq!(t.y(), h.y(x), epsilon = 1e-9);
            assert_relative_eq!(t.z(), h.z(x), epsilon = 1e-9);
            assert_relative_eq!(t.snp(), h.snp(x), epsilon = 1e-12);
        }
    }

    #[test]
    fn propagation_is_reversible() {
        let h = helix();
        let start = h.param_at(150.0);
        let mut t = start.clone();
        t.propagate_to(240.0).unwrap();
        t.propagate_to(150.0).unwrap();
        for i in 0..5 {
            assert_relative_eq!(t.state()[i], start.state()[i], epsilon = 1e-10);
        }
    }

    #[test]
    fn propagation_refuses_tangent_tracks() {
        let p = StateVector::new(0.0, 0.0, 0.9, 0.0, 0.01);
        let mut t = TrackParam::new(100.0, 0.0, p, Matrix5::identity());
        let before = t.clone();
        assert!(matches!(
            t.propagate_to(110.0),
            Err(PropagationError::SnpOutOfRange { .. })
        ));
        assert_eq!(t, before);
        assert!(matches!(
            t.propagate_to(400.0),
            Err(PropagationError::TurningAngleTooLarge { .. })
        ));
    }

    #[test]
    fn rotation_round_trip() {
        let h = helix();
        let start = h.param_at(170.0);
        let mut t = start.clone();
        t.rotate(0.3).unwrap();
        t.rotate(-0.3).unwrap();
        assert_relative_eq!(t.x(), start.x(), epsilon = 1e-10);
        for i in 0..5 {
            assert_relative_eq!(t.state()[i], start.state()[i], epsilon = 1e-10);
        }
        assert_relative_eq!(t.alpha(), 0.0, epsilon = 1e-15);
    }

    #[test]
    fn rotation_keeps_global_position() {
        let h = helix();
        let mut t = h.param_at(170.0);
        let before = t.global_position();
        t.rotate(0.349).unwrap();
        let after = t.global_position();
        assert_relative_eq!(before.0, after.0, epsilon = 1e-9);
        assert_relative_eq!(before.1, after.1, epsilon = 1e-9);
    }

    #[test]
    fn rotation_rejects_backward_frames() {
        let p = StateVector::new(0.0, 0.0, 0.0, 0.0, 0.0);
        let mut t = TrackParam::new(100.0, 0.0, p, Matrix5::identity());
        assert_eq!(t.rotate(2.0), Err(RotationError::BackwardDirection));
    }

    #[test]
    fn chi2_and_update() {
        let h = helix();
        let mut t = h.param_at(150.0);
        let exact = Measurement {
            y: t.y(),
            z: t.z(),
            sigma_y2: 0.01,
            sigma_z2: 0.01,
        };
        assert_relative_eq!(t.predicted_chi2(&exact), 0.0);

        let shifted = Measurement {
            y: t.y() + 0.3,
            ..exact
        };
        let chi2 = t.predicted_chi2(&shifted);
        assert_relative_eq!(chi2, 0.09 / 0.11, epsilon = 1e-12);

        let var_before = t.covariance()[(0, 0)];
        assert!(t.update(&shifted));
        assert!(t.covariance()[(0, 0)] < var_before);
        assert!(t.y() > h.y(150.0));
        let c = t.covariance();
        assert_relative_eq!(c[(0, 4)], c[(4, 0)], epsilon = 1e-18);
    }

    #[test]
    fn singular_residual_covariance() {
        let p = StateVector::new(1.0, 2.0, 0.0, 0.0, 0.0);
        let mut t = TrackParam::new(100.0, 0.0, p, Matrix5::zeros());
        let m = Measurement {
            y: 1.5,
            z: 2.0,
            sigma_y2: 0.0,
            sigma_z2: 0.0,
        };
        assert_eq!(t.predicted_chi2(&m), CHI2_SENTINEL);
        assert!(!t.update(&m));
    }

    #[test]
    fn momentum_from_curvature() {
        let p = StateVector::new(0.0, 0.0, 0.0, 1.0, 0.0015);
        let t = TrackParam::new(100.0, 0.0, p, Matrix5::identity());
        assert_relative_eq!(t.pt(5.0), B2C * 5.0 / 0.0015, epsilon = 1e-12);
        assert_relative_eq!(t.momentum(5.0), t.pt(5.0) * 2f64.sqrt(), epsilon = 1e-12);
        assert_eq!(t.pt(0.0), MAX_REPORTED_PT);
    }

    #[test]
    fn arc_length_matches_circle() {
        let c: f64 = 0.004;
        let theta: f64 = 0.8;
        let chord = 2.0 * (0.5 * theta).sin() / c;
        assert_relative_eq!(arc_from_chord(chord, c), theta / c, epsilon = 1e-9);
        assert_relative_eq!(arc_from_chord(-chord, c), -theta / c, epsilon = 1e-9);
        assert_relative_eq!(arc_from_chord(12.0, 0.0), 12.0);
    }
}
