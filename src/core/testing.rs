//! Small model setups shared by the unit tests.

use crate::config::{
    AreaDefinition, ChainSettings, CompartmentDefinition, DemographicDefinition,
    DistributionDefinition, MatrixDefinition, MixingDefinition, ModelDefinition,
    ParameterDefinition, PeriodDefinition, PopulationDefinition, Settings, SplineKnot,
    TransitionDefinition,
};

use super::model::Model;
use super::population::Population;

fn compartment(name: &str, infectivity: f64) -> CompartmentDefinition {
    CompartmentDefinition {
        name: name.to_string(),
        infectivity,
    }
}

fn parameter(name: &str, min: f64, max: f64, value: f64) -> ParameterDefinition {
    ParameterDefinition {
        name: name.to_string(),
        min,
        max,
        value: Some(value),
    }
}

fn knot(time: f64, parameter: &str) -> SplineKnot {
    SplineKnot {
        time,
        parameter: parameter.to_string(),
        factor: 1.,
    }
}

fn periods(n_periods: usize, horizon: f64) -> Vec<PeriodDefinition> {
    (0..n_periods)
        .map(|period| PeriodDefinition {
            name: format!("period_{period}"),
            end: horizon * (period + 1) as f64 / n_periods as f64,
        })
        .collect()
}

/// S -> I -> R with exponential recovery and homogeneous mixing between equally sized areas.
pub fn sir_settings(n_areas: usize, per_area: usize, n_periods: usize) -> Settings {
    let horizon = 60.;
    let total = (n_areas * per_area) as f64;
    Settings {
        model: ModelDefinition {
            compartments: vec![
                compartment("S", 0.),
                compartment("I", 1.),
                compartment("R", 0.),
            ],
            infection: "I".to_string(),
            transitions: vec![TransitionDefinition {
                from: "I".to_string(),
                to: "R".to_string(),
                distribution: DistributionDefinition::Exponential {
                    mean: "t_I".to_string(),
                },
                branch: vec![],
            }],
            parameters: vec![
                parameter("beta", 0.01, 2., 0.5),
                parameter("t_I", 1., 20., 5.),
                parameter("phi", 0., 0.01, 0.0005),
            ],
            beta: vec![knot(0., "beta")],
            phi: vec![knot(0., "phi")],
            area_effects: vec![],
            periods: periods(n_periods, horizon),
            mixing: vec![MixingDefinition {
                compartment: "I".to_string(),
                period: None,
                matrix: MatrixDefinition::Homogeneous {
                    ages: vec![vec![n_areas as f64 / total]],
                },
            }],
            horizon,
            steps: 60,
            infection_ceiling: 50000,
        },
        population: PopulationDefinition {
            ages: vec!["all".to_string()],
            demographics: vec![DemographicDefinition {
                name: "all".to_string(),
                age: "all".to_string(),
                susceptibility: vec![],
                infectivity: 1.,
            }],
            areas: (0..n_areas)
                .map(|area| AreaDefinition {
                    name: format!("area_{area}"),
                    x: (area % 2) as f64,
                    y: (area / 2) as f64,
                    covariates: vec![],
                    population: vec![per_area],
                })
                .collect(),
            branching: 2,
        },
        chain: ChainSettings::default(),
    }
}

/// S -> E -> I -> (H ->) R with log-normal infectious periods, branching into H, two ages, area
/// covariates and two mixing periods.
pub fn seir_settings() -> Settings {
    let horizon = 40.;
    let exponential = |mean: &str| DistributionDefinition::Exponential {
        mean: mean.to_string(),
    };
    let transition = |from: &str, to: &str, distribution, branch: &[&str]| TransitionDefinition {
        from: from.to_string(),
        to: to.to_string(),
        distribution,
        branch: branch.iter().map(|name| name.to_string()).collect(),
    };
    let infectious = DistributionDefinition::LogNormal {
        mean: "t_I".to_string(),
        cv: "cv_I".to_string(),
    };
    let ages = vec![vec![0.01, 0.005], vec![0.005, 0.01]];

    Settings {
        model: ModelDefinition {
            compartments: vec![
                compartment("S", 0.),
                compartment("E", 0.),
                compartment("I", 1.),
                compartment("H", 0.2),
                compartment("R", 0.),
            ],
            infection: "E".to_string(),
            transitions: vec![
                transition("E", "I", exponential("t_E"), &[]),
                transition("I", "H", infectious.clone(), &["p_H"]),
                transition("I", "R", infectious, &[]),
                transition("H", "R", exponential("t_H"), &[]),
            ],
            parameters: vec![
                parameter("beta", 0.05, 2., 0.6),
                parameter("phi", 0., 0.01, 0.002),
                parameter("t_E", 1., 10., 3.),
                parameter("t_I", 1., 10., 4.),
                parameter("cv_I", 0.1, 1., 0.5),
                parameter("t_H", 1., 20., 8.),
                parameter("p_H", 0., 0.5, 0.2),
                parameter("log_sus_old", -1., 1., 0.3),
                parameter("b_area", -1., 1., 0.2),
            ],
            beta: vec![knot(0., "beta"), knot(horizon, "beta")],
            phi: vec![knot(0., "phi")],
            area_effects: vec!["b_area".to_string()],
            periods: periods(2, horizon),
            mixing: vec![
                MixingDefinition {
                    compartment: "I".to_string(),
                    period: None,
                    matrix: MatrixDefinition::Local { ages: ages.clone() },
                },
                MixingDefinition {
                    compartment: "H".to_string(),
                    period: Some("period_1".to_string()),
                    matrix: MatrixDefinition::Local { ages },
                },
            ],
            horizon,
            steps: 40,
            infection_ceiling: 50000,
        },
        population: PopulationDefinition {
            ages: vec!["young".to_string(), "old".to_string()],
            demographics: vec![
                DemographicDefinition {
                    name: "young".to_string(),
                    age: "young".to_string(),
                    susceptibility: vec![],
                    infectivity: 1.,
                },
                DemographicDefinition {
                    name: "old".to_string(),
                    age: "old".to_string(),
                    susceptibility: vec!["log_sus_old".to_string()],
                    infectivity: 0.8,
                },
            ],
            areas: (0..3)
                .map(|area| AreaDefinition {
                    name: format!("area_{area}"),
                    x: area as f64,
                    y: 0.,
                    covariates: vec![area as f64 - 1.],
                    population: vec![60, 40],
                })
                .collect(),
            branching: 2,
        },
        chain: ChainSettings::default(),
    }
}

pub fn build(settings: &Settings) -> (Model, Population) {
    let model = Model::from_definition(&settings.model, &settings.population).unwrap();
    let population = Population::from_definition(&settings.population, &model).unwrap();
    (model, population)
}
