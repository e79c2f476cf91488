//! # Tracks
//!
//! * [`param::TrackParam`] – Kalman state and its transport between radii and sectors
//! * [`candidate::TrackCandidate`] – per-row cluster bookkeeping and lifecycle status

pub mod candidate;
pub mod param;
