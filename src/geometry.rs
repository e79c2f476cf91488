//! # Detector geometry
//!
//! Static description of the sectored drift chamber: the azimuthal sector layout, the
//! radial pad rows, the solenoidal field, the drift volume and the nominal interaction
//! vertex. A [`DetectorGeometry`] is immutable once built and shared read-only by every
//! stage of the tracker.
//!
//! ## Frames
//!
//! Each sector `s` carries a local Cartesian frame rotated by
//! `alpha(s) = alpha_shift + s · sector_angle` around the beam axis:
//!
//! ```text
//! x =  X cos α + Y sin α      (radial, the pad-row coordinate)
//! y = -X sin α + Y cos α      (along the pad row)
//! z =  Z                      (drift direction)
//! ```
//!
//! A pad row lives at a fixed local `x`; its sensitive half-width is `x · tan(sector_angle / 2)`.
//!
//! ## See also
//!
//! * [`DetectorGeometryBuilder`] – validated construction with overrides
//! * [`crate::error_model`] – consumes [`PadRegime`] and the diffusion constants

use std::cmp::Ordering::{Equal, Greater};

use serde::{Deserialize, Serialize};

use crate::constants::{Centimeter, KiloGauss, Radian, DPI};
use crate::tracker_errors::TrackerError;

/// Pad size class of a row. Drives the error tables and the dE/dx gain normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PadRegime {
    /// Inner rows, 0.75 cm pads
    Short,
    /// First outer block, 1.0 cm pads
    Medium,
    /// Second outer block, 1.5 cm pads
    Long,
}

impl PadRegime {
    pub const ALL: [PadRegime; 3] = [PadRegime::Short, PadRegime::Medium, PadRegime::Long];

    /// Classify a row from its pad length.
    pub fn from_pad_length(pad_length: Centimeter) -> Self {
        if pad_length < 0.9 {
            PadRegime::Short
        } else if pad_length < 1.25 {
            PadRegime::Medium
        } else {
            PadRegime::Long
        }
    }

    #[inline]
    pub fn index(self) -> usize {
        match self {
            PadRegime::Short => 0,
            PadRegime::Medium => 1,
            PadRegime::Long => 2,
        }
    }
}

/// One radial pad row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PadRow {
    pub radius: Centimeter,
    pub pad_length: Centimeter,
    pub pad_width: Centimeter,
    pub regime: PadRegime,
}

impl PadRow {
    pub fn new(radius: Centimeter, pad_length: Centimeter, pad_width: Centimeter) -> Self {
        PadRow {
            radius,
            pad_length,
            pad_width,
            regime: PadRegime::from_pad_length(pad_length),
        }
    }
}

/// Nominal interaction point (global frame) and its spread.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub x: Centimeter,
    pub y: Centimeter,
    pub z: Centimeter,
    pub sigma_y: Centimeter,
    pub sigma_z: Centimeter,
}

impl Default for Vertex {
    fn default() -> Self {
        Vertex {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            sigma_y: 0.3,
            sigma_z: 5.0,
        }
    }
}

/// Immutable detector description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorGeometry {
    n_sectors: usize,
    alpha_shift: Radian,
    rows: Vec<PadRow>,
    bz: KiloGauss,
    z_length: Centimeter,
    dead_zone: Centimeter,
    ctg_range: f64,
    diff_t: f64,
    diff_l: f64,
    z_sigma: Centimeter,
    vertex: Vertex,
}

impl Default for DetectorGeometry {
    fn default() -> Self {
        Self::standard()
    }
}

impl DetectorGeometry {
    /// The reference layout: 18 sectors and 159 rows in three pad regimes.
    ///
    /// | block  | rows | first radius | pitch  | pad (l × w) |
    /// |--------|------|--------------|--------|-------------|
    /// | short  | 63   | 85.225 cm    | 0.75   | 0.75 × 0.4  |
    /// | medium | 64   | 135.1 cm     | 1.0    | 1.0 × 0.6   |
    /// | long   | 32   | 199.35 cm    | 1.5    | 1.5 × 0.6   |
    pub fn standard() -> Self {
        let mut rows = Vec::with_capacity(159);
        rows.extend((0..63).map(|i| PadRow::new(85.225 + 0.75 * i as f64, 0.75, 0.4)));
        rows.extend((0..64).map(|i| PadRow::new(135.1 + 1.0 * i as f64, 1.0, 0.6)));
        rows.extend((0..32).map(|i| PadRow::new(199.35 + 1.5 * i as f64, 1.5, 0.6)));

        let n_sectors = 18;
        DetectorGeometry {
            n_sectors,
            alpha_shift: 0.5 * DPI / n_sectors as f64,
            rows,
            bz: 5.0,
            z_length: 250.0,
            dead_zone: 1.5,
            ctg_range: 1.05,
            diff_t: 0.0220,
            diff_l: 0.0220,
            z_sigma: 0.228,
            vertex: Vertex::default(),
        }
    }

    pub fn builder() -> DetectorGeometryBuilder {
        DetectorGeometryBuilder::new()
    }

    #[inline]
    pub fn n_sectors(&self) -> usize {
        self.n_sectors
    }

    #[inline]
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn row(&self, row: usize) -> &PadRow {
        &self.rows[row]
    }

    pub fn rows(&self) -> &[PadRow] {
        &self.rows
    }

    #[inline]
    pub fn radius(&self, row: usize) -> Centimeter {
        self.rows[row].radius
    }

    #[inline]
    pub fn bz(&self) -> KiloGauss {
        self.bz
    }

    #[inline]
    pub fn z_length(&self) -> Centimeter {
        self.z_length
    }

    #[inline]
    pub fn dead_zone(&self) -> Centimeter {
        self.dead_zone
    }

    #[inline]
    pub fn diff_t(&self) -> f64 {
        self.diff_t
    }

    #[inline]
    pub fn diff_l(&self) -> f64 {
        self.diff_l
    }

    #[inline]
    pub fn z_sigma(&self) -> Centimeter {
        self.z_sigma
    }

    #[inline]
    pub fn vertex(&self) -> &Vertex {
        &self.vertex
    }

    /// Azimuthal opening of one sector.
    #[inline]
    pub fn sector_angle(&self) -> Radian {
        DPI / self.n_sectors as f64
    }

    /// Rotation angle of the local frame of `sector`.
    #[inline]
    pub fn sector_alpha(&self, sector: usize) -> Radian {
        self.alpha_shift + sector as f64 * self.sector_angle()
    }

    /// Sector whose azimuthal range contains the global angle `phi`.
    pub fn sector_of_angle(&self, phi: Radian) -> usize {
        let width = self.sector_angle();
        let shifted = (phi - self.alpha_shift + 0.5 * width).rem_euclid(DPI);
        ((shifted / width) as usize).min(self.n_sectors - 1)
    }

    /// Neighbouring sector index, wrapping around the azimuth.
    #[inline]
    pub fn neighbour_sector(&self, sector: usize, direction: i32) -> usize {
        let n = self.n_sectors as i64;
        (sector as i64 + direction as i64).rem_euclid(n) as usize
    }

    /// Circular distance between two sector indices.
    pub fn sector_distance(&self, a: usize, b: usize) -> usize {
        let d = a.abs_diff(b);
        d.min(self.n_sectors - d)
    }

    /// Half-width of the sensitive area of `row` in the local frame.
    #[inline]
    pub fn max_y(&self, row: usize) -> Centimeter {
        self.rows[row].radius * (0.5 * self.sector_angle()).tan()
    }

    /// True if `y` falls in the insensitive strip along the sector boundary.
    #[inline]
    pub fn in_dead_zone(&self, row: usize, y: Centimeter) -> bool {
        (y.abs() - self.max_y(row)).abs() < self.dead_zone
    }

    /// True if a track crossing `row` at drift coordinate `z` can leave a cluster there.
    #[inline]
    pub fn in_acceptance(&self, row: usize, z: Centimeter) -> bool {
        z.abs() < self.z_length && z.abs() < self.ctg_range * self.rows[row].radius + 10.0
    }

    /// Drift distance to the readout plane, clamped at zero.
    #[inline]
    pub fn drift_length(&self, z: Centimeter) -> Centimeter {
        (self.z_length - z.abs()).max(0.0)
    }

    /// Global `(X, Y)` to the local frame of `sector`.
    pub fn to_local(&self, sector: usize, gx: f64, gy: f64) -> (Centimeter, Centimeter) {
        let (sa, ca) = self.sector_alpha(sector).sin_cos();
        (gx * ca + gy * sa, -gx * sa + gy * ca)
    }

    /// Local `(x, y)` of `sector` to the global frame.
    pub fn to_global(&self, sector: usize, x: f64, y: f64) -> (f64, f64) {
        let (sa, ca) = self.sector_alpha(sector).sin_cos();
        (x * ca - y * sa, x * sa + y * ca)
    }

    /// Nominal vertex expressed in the local frame of `sector`, as `(x, y, z)`.
    pub fn vertex_local(&self, sector: usize) -> (Centimeter, Centimeter, Centimeter) {
        let (x, y) = self.to_local(sector, self.vertex.x, self.vertex.y);
        (x, y, self.vertex.z)
    }
}

/// Builder for [`DetectorGeometry`], with validation.
#[derive(Debug, Clone)]
pub struct DetectorGeometryBuilder {
    geometry: DetectorGeometry,
}

impl Default for DetectorGeometryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorGeometryBuilder {
    /// Start from [`DetectorGeometry::standard`].
    pub fn new() -> Self {
        Self {
            geometry: DetectorGeometry::standard(),
        }
    }

    /// Set the number of sectors. The frame offset follows (half a sector).
    pub fn n_sectors(mut self, v: usize) -> Self {
        self.geometry.n_sectors = v;
        if v > 0 {
            self.geometry.alpha_shift = 0.5 * DPI / v as f64;
        }
        self
    }
    pub fn alpha_shift(mut self, v: Radian) -> Self {
        self.geometry.alpha_shift = v;
        self
    }
    pub fn rows(mut self, v: Vec<PadRow>) -> Self {
        self.geometry.rows = v;
        self
    }
    /// Replace the layout with `n` identical rows starting at `first_radius`.
    pub fn uniform_rows(
        mut self,
        n: usize,
        first_radius: Centimeter,
        pitch: Centimeter,
        pad_width: Centimeter,
    ) -> Self {
        self.geometry.rows = (0..n)
            .map(|i| PadRow::new(first_radius + pitch * i as f64, pitch, pad_width))
            .collect();
        self
    }
    pub fn bz(mut self, v: KiloGauss) -> Self {
        self.geometry.bz = v;
        self
    }
    pub fn z_length(mut self, v: Centimeter) -> Self {
        self.geometry.z_length = v;
        self
    }
    pub fn dead_zone(mut self, v: Centimeter) -> Self {
        self.geometry.dead_zone = v;
        self
    }
    pub fn ctg_range(mut self, v: f64) -> Self {
        self.geometry.ctg_range = v;
        self
    }
    pub fn diff_t(mut self, v: f64) -> Self {
        self.geometry.diff_t = v;
        self
    }
    pub fn diff_l(mut self, v: f64) -> Self {
        self.geometry.diff_l = v;
        self
    }
    pub fn z_sigma(mut self, v: Centimeter) -> Self {
        self.geometry.z_sigma = v;
        self
    }
    pub fn vertex(mut self, v: Vertex) -> Self {
        self.geometry.vertex = v;
        self
    }

    #[inline]
    fn gt0(x: f64) -> bool {
        x.partial_cmp(&0.0) == Some(Greater)
    }

    #[inline]
    fn ge0(x: f64) -> bool {
        matches!(x.partial_cmp(&0.0), Some(Greater) | Some(Equal))
    }

    /// Finalize the builder.
    ///
    /// Validation rules
    /// -----------------
    /// * at least 3 sectors and 8 pad rows,
    /// * row radii strictly positive and strictly increasing, pad sizes strictly positive,
    /// * the sector half-width at the first row must exceed the dead zone,
    /// * `z_length > 0`, `ctg_range > 0`, `z_sigma > 0`,
    /// * diffusion constants, dead zone and vertex spreads non-negative,
    /// * `bz` finite (zero is allowed: straight tracks).
    pub fn build(self) -> Result<DetectorGeometry, TrackerError> {
        let g = &self.geometry;

        if g.n_sectors < 3 {
            return Err(TrackerError::InvalidGeometry(
                "at least 3 sectors are required".into(),
            ));
        }
        if g.rows.len() < 8 {
            return Err(TrackerError::InvalidGeometry(
                "at least 8 pad rows are required".into(),
            ));
        }
        if !g.rows.iter().all(|r| {
            Self::gt0(r.radius) && Self::gt0(r.pad_length) && Self::gt0(r.pad_width)
        }) {
            return Err(TrackerError::InvalidGeometry(
                "row radius and pad sizes must be > 0".into(),
            ));
        }
        if !g.rows.windows(2).all(|w| w[0].radius < w[1].radius) {
            return Err(TrackerError::InvalidGeometry(
                "row radii must be strictly increasing".into(),
            ));
        }
        if !Self::gt0(g.z_length) || !Self::gt0(g.ctg_range) || !Self::gt0(g.z_sigma) {
            return Err(TrackerError::InvalidGeometry(
                "z_length, ctg_range and z_sigma must be > 0".into(),
            ));
        }
        if !Self::ge0(g.diff_t) || !Self::ge0(g.diff_l) || !Self::ge0(g.dead_zone) {
            return Err(TrackerError::InvalidGeometry(
                "diffusion constants and dead zone must be >= 0".into(),
            ));
        }
        if !Self::ge0(g.vertex.sigma_y) || !Self::ge0(g.vertex.sigma_z) {
            return Err(TrackerError::InvalidGeometry(
                "vertex spreads must be >= 0".into(),
            ));
        }
        if !g.bz.is_finite() || !g.alpha_shift.is_finite() {
            return Err(TrackerError::InvalidGeometry(
                "bz and alpha_shift must be finite".into(),
            ));
        }
        if g.max_y(0) <= g.dead_zone {
            return Err(TrackerError::InvalidGeometry(
                "dead zone covers the whole innermost row".into(),
            ));
        }

        Ok(self.geometry)
    }
}

#[cfg(test)]
mod test_geometry {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn standard_layout() {
        let g = DetectorGeometry::standard();
        assert_eq!(g.n_rows(), 159);
        assert_eq!(g.n_sectors(), 18);
        assert_eq!(g.row(0).regime, PadRegime::Short);
        assert_eq!(g.row(63).regime, PadRegime::Medium);
        assert_eq!(g.row(158).regime, PadRegime::Long);
        assert_relative_eq!(g.radius(62), 85.225 + 0.75 * 62.0, epsilon = 1e-12);
        assert_relative_eq!(g.radius(158), 199.35 + 1.5 * 31.0, epsilon = 1e-12);
    }

    #[test]
    fn frames_round_trip() {
        let g = DetectorGeometry::standard();
        for s in 0..g.n_sectors() {
            let (x, y) = g.to_local(s, 120.0, -35.0);
            let (gx, gy) = g.to_global(s, x, y);
            assert_relative_eq!(gx, 120.0, epsilon = 1e-10);
            assert_relative_eq!(gy, -35.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn sector_lookup_matches_frame() {
        let g = DetectorGeometry::standard();
        for s in 0..g.n_sectors() {
            let phi = g.sector_alpha(s);
            assert_eq!(g.sector_of_angle(phi), s);
            // the sector centre lies on the local x axis
            let (gx, gy) = (150.0 * phi.cos(), 150.0 * phi.sin());
            let (_, y) = g.to_local(s, gx, gy);
            assert!(y.abs() < 1e-9);
        }
        assert_eq!(g.neighbour_sector(0, -1), 17);
        assert_eq!(g.neighbour_sector(17, 1), 0);
        assert_eq!(g.sector_distance(0, 17), 1);
    }

    #[test]
    fn dead_zone_and_acceptance() {
        let g = DetectorGeometry::standard();
        let ymax = g.max_y(10);
        assert!(g.in_dead_zone(10, ymax - 0.5));
        assert!(!g.in_dead_zone(10, ymax - 5.0));
        assert!(g.in_acceptance(10, 30.0));
        assert!(!g.in_acceptance(10, 260.0));
        assert_relative_eq!(g.drift_length(-50.0), 200.0);
    }

    #[test]
    fn builder_rejects_bad_layouts() {
        let err = DetectorGeometry::builder().n_sectors(2).build().unwrap_err();
        assert!(matches!(err, TrackerError::InvalidGeometry(_)));

        let rows = vec![PadRow::new(100.0, 1.0, 0.5), PadRow::new(99.0, 1.0, 0.5)];
        assert!(DetectorGeometry::builder().rows(rows).build().is_err());

        assert!(DetectorGeometry::builder().z_length(-1.0).build().is_err());
        assert!(DetectorGeometry::builder().diff_t(f64::NAN).build().is_err());

        let g = DetectorGeometry::builder()
            .uniform_rows(100, 100.0, 1.0, 0.5)
            .bz(0.0)
            .build()
            .unwrap();
        assert_eq!(g.n_rows(), 100);
        assert_eq!(g.row(0).regime, PadRegime::Medium);
    }
}
