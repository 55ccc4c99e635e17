//! Configuration data structures for model, population and chain setups.

mod chain;
mod model;
mod observations;
mod population;
mod settings;

pub use chain::ChainSettings;
pub use model::{
    CompartmentDefinition, DistributionDefinition, MatrixDefinition, MatrixEntry,
    MixingDefinition, ModelDefinition, ParameterDefinition, PeriodDefinition, SplineKnot,
    TransitionDefinition,
};
pub use observations::{ObservationRecord, Observations, ObservationsError};
pub use population::{AreaDefinition, DemographicDefinition, PopulationDefinition};
pub use settings::{Settings, SettingsError};
