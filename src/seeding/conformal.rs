//! # Helix parameters from three points
//!
//! Closed-form estimates of the seed state from three support points, with the outer
//! point `p1` as the reference:
//!
//! * [`curvature`] – signed curvature of the circle through three `(x, y)` points,
//! * [`center_offset`] – `η = C · x_center`, so that `snp(x) = C·x − η`,
//! * [`dip_tangent`] – `tan λ = Δz / Δs` with `Δs` the exact arc length between two points,
//! * [`state_from_points`] – the full `(y, z, snp, tgl, C)` at `p1`,
//! * [`seed_covariance`] – covariance propagated through the numerical Jacobian of any
//!   seed map over its six support coordinates.
//!
//! Positive curvature means the track turns counter-clockwise when moving towards larger
//! `x`. Degenerate inputs never produce NaN: collinear points give `C = 0`, coincident
//! points give [`DEGENERATE_CURVATURE`].

use nalgebra::{SMatrix, SVector};

use crate::constants::{
    Centimeter, Curvature, StateCovariance, StateVector, COLLINEAR_EPS, DEGENERATE_CURVATURE,
};
use crate::track::param::arc_from_chord;

/// Six support coordinates of a seed, `(y1, z1, y2, z2, y3, z3)`.
pub type SupportVector = SVector<f64, 6>;

/// A support point `(x, y, z)` in the local frame.
pub type Point = [Centimeter; 3];

const COINCIDENT_EPS: f64 = 1.0e-9;

#[inline]
fn coincident(ax: f64, ay: f64) -> bool {
    ax.abs() < COINCIDENT_EPS && ay.abs() < COINCIDENT_EPS
}

/// Circle centre relative to `p1`, and the orientation determinant.
fn centre_from_p1(
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
    x3: f64,
    y3: f64,
) -> Result<(f64, f64, f64), Degeneracy> {
    let (ax, ay) = (x2 - x1, y2 - y1);
    let (bx, by) = (x3 - x1, y3 - y1);
    if coincident(ax, ay) || coincident(bx, by) || coincident(bx - ax, by - ay) {
        return Err(Degeneracy::Coincident);
    }
    let det = bx * ay - ax * by;
    if det.abs() < COLLINEAR_EPS {
        return Err(Degeneracy::Collinear);
    }
    let u = 0.5 * (ax * (ax - bx) + ay * (ay - by)) / det;
    Ok((0.5 * bx - by * u, 0.5 * by + bx * u, det))
}

enum Degeneracy {
    Collinear,
    Coincident,
}

/// Signed curvature of the circle through three points.
///
/// Arguments
/// -----------------
/// * `(x1, y1)`: outer reference point.
/// * `(x2, y2)`, `(x3, y3)`: the two other points, ordered towards the inside.
///
/// Return
/// ----------
/// * `C = ±1/R`, positive for a counter-clockwise turn from `p3` to `p1`.
/// * `0.0` for collinear points.
/// * [`DEGENERATE_CURVATURE`] when two points coincide.
pub fn curvature(x1: f64, y1: f64, x2: f64, y2: f64, x3: f64, y3: f64) -> Curvature {
    match centre_from_p1(x1, y1, x2, y2, x3, y3) {
        Ok((x0, y0, det)) => det.signum() / (x0 * x0 + y0 * y0).sqrt(),
        Err(Degeneracy::Collinear) => 0.0,
        Err(Degeneracy::Coincident) => DEGENERATE_CURVATURE,
    }
}

/// Offset `η` of the circle through three points, such that `snp(x) = C·x − η`.
///
/// For collinear points the line direction is used: `η = −sin φ` of the chord from `p3`
/// to `p1`. Coincident points return `0.0`.
pub fn center_offset(x1: f64, y1: f64, x2: f64, y2: f64, x3: f64, y3: f64) -> f64 {
    match centre_from_p1(x1, y1, x2, y2, x3, y3) {
        Ok((x0, y0, det)) => {
            let c = det.signum() / (x0 * x0 + y0 * y0).sqrt();
            c * (x1 + x0)
        }
        Err(Degeneracy::Collinear) => {
            let d = (x1 - x3).hypot(y1 - y3);
            -(y1 - y3) / d
        }
        Err(Degeneracy::Coincident) => 0.0,
    }
}

/// Dip tangent between two points on a circle of curvature `c`.
///
/// Return
/// ----------
/// * `(z1 − z2) / Δs` with `Δs` the arc length from `p2` to `p1`, signed by `x1 − x2`.
///   Falls back to the chord length when `c ≈ 0`. Returns `0.0` for coincident points
///   or when the chord cannot lie on such a circle (`|c · chord / 2| > 1`).
pub fn dip_tangent(x1: f64, y1: f64, z1: f64, x2: f64, y2: f64, z2: f64, c: Curvature) -> f64 {
    let chord = (x1 - x2).hypot(y1 - y2);
    if chord < COINCIDENT_EPS || (0.5 * chord * c).abs() > 1.0 {
        return 0.0;
    }
    let arc = arc_from_chord(chord, c).abs();
    let sign = if x1 >= x2 { 1.0 } else { -1.0 };
    sign * (z1 - z2) / arc
}

/// Seed state at `p1` from three points.
///
/// Arguments
/// -----------------
/// * `points`: `[p1, p2, p3]`, outer to inner.
/// * `dip_from`: index (1 or 2) of the point paired with `p1` for the dip tangent.
///
/// Return
/// ----------
/// * `(y1, z1, C·x1 − η, tgl, C)`, or `None` when two points coincide.
pub fn state_from_points(points: &[Point; 3], dip_from: usize) -> Option<StateVector> {
    let [p1, p2, p3] = points;
    let c = curvature(p1[0], p1[1], p2[0], p2[1], p3[0], p3[1]);
    if c == DEGENERATE_CURVATURE {
        return None;
    }
    let eta = center_offset(p1[0], p1[1], p2[0], p2[1], p3[0], p3[1]);
    let q = &points[dip_from];
    let tgl = dip_tangent(p1[0], p1[1], p1[2], q[0], q[1], q[2], c);
    Some(StateVector::new(p1[1], p1[2], c * p1[0] - eta, tgl, c))
}

/// Covariance of a seed state from the variances of its support coordinates.
///
/// Arguments
/// -----------------
/// * `map`: seed map from the six support coordinates to the state.
/// * `support`: the nominal support coordinates.
/// * `variances`: variance of each support coordinate.
/// * `step`: forward finite-difference step.
///
/// Return
/// ----------
/// * `J · diag(variances) · Jᵀ` with `J` the 5×6 forward-difference Jacobian, or `None`
///   if the map fails at the nominal point or any shifted point.
pub fn seed_covariance<F>(
    map: F,
    support: &SupportVector,
    variances: &SupportVector,
    step: f64,
) -> Option<StateCovariance>
where
    F: Fn(&SupportVector) -> Option<StateVector>,
{
    let base = map(support)?;
    let mut jac = SMatrix::<f64, 5, 6>::zeros();
    for k in 0..6 {
        let mut shifted = *support;
        shifted[k] += step;
        let moved = map(&shifted)?;
        jac.set_column(k, &((moved - base) / step));
    }
    let m = SMatrix::<f64, 6, 6>::from_diagonal(variances);
    let cov = jac * m * jac.transpose();
    Some((cov + cov.transpose()) * 0.5)
}
