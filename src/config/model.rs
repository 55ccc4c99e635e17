use serde::{Deserialize, Serialize};

/// Definition of the compartmental model, its parameters and the mixing between areas.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ModelDefinition {
    /// Disease compartments. The first compartment is the susceptible one.
    pub compartments: Vec<CompartmentDefinition>,

    /// The compartment an individual enters when infected.
    pub infection: String,

    /// Transitions between compartments after infection.
    pub transitions: Vec<TransitionDefinition>,

    /// Model parameters together with the bounds of their uniform priors.
    pub parameters: Vec<ParameterDefinition>,

    /// Knots of the linear spline giving the transmission rate over time.
    pub beta: Vec<SplineKnot>,

    /// Knots of the linear spline giving the rate of imported infections over time.
    #[serde(default)]
    pub phi: Vec<SplineKnot>,

    /// Parameters multiplying the area covariates, in the order of the covariates.
    #[serde(default)]
    pub area_effects: Vec<String>,

    /// Time periods in which the mixing between areas is constant. An empty list is a single
    /// period up to the horizon.
    #[serde(default)]
    pub periods: Vec<PeriodDefinition>,

    /// Mixing matrices of the infectious compartments.
    pub mixing: Vec<MixingDefinition>,

    /// End of the simulated time window.
    pub horizon: f64,

    /// Number of discrete steps with constant forcing.
    pub steps: usize,

    /// Maximum number of infections before a proposal is rejected.
    #[serde(default = "default_infection_ceiling")]
    pub infection_ceiling: usize,
}

fn default_infection_ceiling() -> usize {
    50000
}

fn default_factor() -> f64 {
    1.
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CompartmentDefinition {
    pub name: String,
    #[serde(default)]
    pub infectivity: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TransitionDefinition {
    pub from: String,
    pub to: String,
    pub distribution: DistributionDefinition,

    /// Branch probability parameters, either one shared by all ages or one per age. The last
    /// transition out of a compartment takes the remaining probability and has none.
    #[serde(default)]
    pub branch: Vec<String>,
}

/// Waiting time distributions, given by parameter names.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum DistributionDefinition {
    Exponential { mean: String },
    LogNormal { mean: String, cv: String },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ParameterDefinition {
    pub name: String,
    pub min: f64,
    pub max: f64,

    /// Value used for simulation. Defaults to the center of the prior.
    #[serde(default)]
    pub value: Option<f64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SplineKnot {
    pub time: f64,
    pub parameter: String,
    #[serde(default = "default_factor")]
    pub factor: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PeriodDefinition {
    pub name: String,
    pub end: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MixingDefinition {
    pub compartment: String,

    /// Period the matrix applies to, or all periods if omitted.
    #[serde(default)]
    pub period: Option<String>,

    pub matrix: MatrixDefinition,
}

/// Sparse matrices over area × age cells.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum MatrixDefinition {
    /// Mixing only within an area, weighted by an age contact matrix.
    Local { ages: Vec<Vec<f64>> },

    /// Uniform mixing between all areas, weighted by an age contact matrix and divided by the
    /// number of areas.
    Homogeneous { ages: Vec<Vec<f64>> },

    /// Explicit entries between cells.
    Explicit { entries: Vec<MatrixEntry> },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MatrixEntry {
    pub source: usize,
    pub destination: usize,
    pub weight: f64,
}
