//! This module contains the simulation and coupling engine of the library.

pub mod coupling;
pub mod derived;
pub mod gillespie;
pub mod infectivity;
pub mod mixing;
pub mod model;
pub mod pack;
pub mod partition;
pub mod path;
pub mod population;
pub mod rate_tree;
pub mod susceptibility;
pub mod timeline;
pub mod trajectory;

#[cfg(test)]
pub(crate) mod testing;

pub use coupling::Coupler;
pub use derived::DerivedQuantities;
pub use gillespie::simulate_direct;
pub use model::Model;
pub use path::Event;
pub use population::Population;
pub use rate_tree::RateTree;
pub use trajectory::{EventRef, Trajectory};
