use thiserror::Error;

/// Errors surfaced by the tracker.
///
/// Only the configuration variants are fatal, and only at construction time
/// ([`Tracker::new`](crate::tracker::Tracker::new) or a builder's `build()`).
/// Everything that can go wrong while processing an event is handled per track.
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Invalid detector geometry: {0}")]
    InvalidGeometry(String),

    #[error("Invalid tracker parameter: {0}")]
    InvalidParameter(String),

    #[error("Propagation failed: {0}")]
    Propagation(#[from] PropagationError),

    #[error("Frame rotation failed: {0}")]
    Rotation(#[from] RotationError),
}

/// Why a track state could not be moved to a new reference radius.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum PropagationError {
    #[error("local direction |snp| = {snp} is out of range at the target radius")]
    SnpOutOfRange { snp: f64 },

    #[error("turning angle |C·dx| = {value} exceeds the valid range")]
    TurningAngleTooLarge { value: f64 },

    #[error("track direction is degenerate (cos φ ≈ 0)")]
    DegenerateDirection,
}

/// Why a track state could not be expressed in a neighbouring sector frame.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum RotationError {
    #[error("track would point backwards in the rotated frame")]
    BackwardDirection,

    #[error("local direction |snp| = {snp} is out of range in the rotated frame")]
    SnpOutOfRange { snp: f64 },
}

impl PartialEq for TrackerError {
    fn eq(&self, other: &Self) -> bool {
        use TrackerError::*;
        match (self, other) {
            (InvalidGeometry(a), InvalidGeometry(b)) => a == b,
            (InvalidParameter(a), InvalidParameter(b)) => a == b,
            (Propagation(a), Propagation(b)) => a == b,
            (Rotation(a), Rotation(b)) => a == b,
            _ => false,
        }
    }
}
