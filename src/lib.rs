pub mod clusters;
pub mod consolidator;
pub mod constants;
pub mod dedx;
pub mod error_model;
pub mod follower;
pub mod geometry;
pub mod params;
pub mod seeding;
pub mod track;
pub mod tracker;
pub mod tracker_errors;

pub use clusters::{Cluster, ClusterId, ClusterKind};
pub use geometry::DetectorGeometry;
pub use params::TrackerParams;
pub use tracker::{EventResult, ReconstructedTrack, Tracker};
pub use tracker_errors::TrackerError;
