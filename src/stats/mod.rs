//! Statistics trait implementations for trajectories

pub mod trajectory;

pub use trajectory::TrajectoryStatistics;
