//! # Constants and type definitions for tpctrack
//!
//! This module centralizes the **physical constants**, **numeric sentinels**, and **common type
//! aliases** used throughout the tracker.
//!
//! ## Overview
//!
//! - Field-to-curvature conversion factor
//! - Numeric guards on the local track direction (`snp`)
//! - Sentinels returned by degenerate geometry (χ², curvature)
//! - Unit aliases used in signatures (`Centimeter`, `Radian`, `KiloGauss`)
//!
//! Every module depends on these definitions; none of them are tunable at run time.
//! Tunable thresholds live in [`crate::params::TrackerParams`].

// -------------------------------------------------------------------------------------------------
// Physical constants
// -------------------------------------------------------------------------------------------------

/// 2π
pub const DPI: f64 = 2. * std::f64::consts::PI;

/// Curvature / momentum conversion: `C [1/cm] = B2C * Bz [kG] / pt [GeV/c]`
pub const B2C: f64 = 0.299_792_458e-3;

/// Transverse momentum reported for a track with vanishing curvature (GeV/c)
pub const MAX_REPORTED_PT: f64 = 1.0e3;

// -------------------------------------------------------------------------------------------------
// Numeric guards and sentinels
// -------------------------------------------------------------------------------------------------

/// Hard limit on `|snp|`: beyond this the track is (almost) tangent to a pad row.
pub const ALMOST_ONE: f64 = 0.999;

/// Value returned by [`predicted_chi2`](crate::track::param::TrackParam::predicted_chi2)
/// when the residual covariance cannot be inverted.
pub const CHI2_SENTINEL: f64 = 1.0e10;

/// Curvature reported for coincident support points.
///
/// Large enough to fail every seeding curvature cut, finite so it never poisons arithmetic.
pub const DEGENERATE_CURVATURE: f64 = 100.0;

/// Determinant threshold below which three support points are treated as collinear.
pub const COLLINEAR_EPS: f64 = 1.0e-10;

/// Determinant threshold of the 2×2 residual covariance.
pub const SINGULAR_EPS: f64 = 1.0e-30;

/// Maximum overlap partners recorded per track before overflow is reported.
pub const MAX_OVERLAP_PARTNERS: usize = 4;

/// Number of truth labels carried by a cluster.
pub const N_LABELS: usize = 3;

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Length in centimeters
pub type Centimeter = f64;

/// Angle in radians
pub type Radian = f64;

/// Magnetic field in kilogauss
pub type KiloGauss = f64;

/// Signed curvature in 1/cm
pub type Curvature = f64;

/// Five-parameter local track state `(y, z, snp, tgl, C)`
pub type StateVector = nalgebra::Vector5<f64>;

/// Symmetric 5×5 covariance of a [`StateVector`]
pub type StateCovariance = nalgebra::Matrix5<f64>;

/// Identifier of a track candidate, unique within an event
pub type TrackId = u32;
