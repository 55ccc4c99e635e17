//! IO for trajectories and chain samples.

mod samples;
mod trajectory;

pub use samples::{SampleWriter, write_npy};
pub use trajectory::TrajectoryIO;
