use serde::{Deserialize, Serialize};

/// The stratified population the model runs on.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PopulationDefinition {
    /// Names of the age classes.
    pub ages: Vec<String>,

    /// Demographic positions. Each position belongs to one age class.
    pub demographics: Vec<DemographicDefinition>,

    pub areas: Vec<AreaDefinition>,

    /// Maximum number of children per node of the spatial partition.
    #[serde(default = "default_branching")]
    pub branching: usize,
}

fn default_branching() -> usize {
    4
}

fn default_infectivity() -> f64 {
    1.
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DemographicDefinition {
    pub name: String,
    pub age: String,

    /// Parameters whose exponentiated sum scales the susceptibility.
    #[serde(default)]
    pub susceptibility: Vec<String>,

    /// Relative infectivity of individuals in this position.
    #[serde(default = "default_infectivity")]
    pub infectivity: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AreaDefinition {
    pub name: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub covariates: Vec<f64>,

    /// Number of individuals per demographic position.
    pub population: Vec<usize>,
}
