//! Resolved compartmental model
//!
//! The model is built once from its definition. Names are resolved to indices, every
//! compartment receives a self transition marking the crossing of a time period boundary, and
//! the mixing tensor is expanded for the population's areas and ages.

use crate::config::{
    DistributionDefinition, ModelDefinition, PopulationDefinition, SplineKnot,
};
use crate::errors::{EpiError, Result};

use super::mixing::{MixingTensor, SparseMatrix};

/// Smallest sojourn time.
pub const TINY: f64 = 1e-8;

/// Index of the infection transition.
pub const INFECTION: usize = 0;

/// Index of the susceptible compartment.
pub const SUSCEPTIBLE: usize = 0;

#[derive(Clone, Debug, PartialEq)]
pub struct Compartment {
    pub name: String,
    pub infectivity: f64,

    /// Outgoing transitions, excluding the period marker.
    pub transitions: Vec<usize>,

    /// Self transition marking a period boundary.
    pub marker: usize,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Sojourn {
    Exponential { mean: usize },
    LogNormal { mean: usize, cv: usize },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TransitionKind {
    Infection,
    Sojourn(Sojourn),
    PeriodBoundary,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    pub name: String,
    pub from: usize,
    pub to: usize,
    pub kind: TransitionKind,

    /// Branch probability parameters, empty, shared or per age.
    pub branch: Vec<usize>,
}

impl Transition {
    pub fn is_marker(&self) -> bool {
        self.kind == TransitionKind::PeriodBoundary
    }
}

/// Whether a parameter shapes the course of an infection or only the infection process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParameterKind {
    Transmission,
    Progression,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub value: f64,
    pub kind: ParameterKind,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Knot {
    pub time: f64,
    pub parameter: usize,
    pub factor: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Period {
    pub name: String,
    pub end: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Model {
    pub compartments: Vec<Compartment>,
    pub transitions: Vec<Transition>,
    pub parameters: Vec<Parameter>,
    pub beta: Vec<Knot>,
    pub phi: Vec<Knot>,
    pub area_effects: Vec<usize>,
    pub periods: Vec<Period>,
    pub mixing: MixingTensor,
    pub horizon: f64,
    pub steps: usize,
    pub infection_ceiling: usize,
    pub n_areas: usize,
    pub n_ages: usize,
}

fn index_of<'a>(
    kind: &str,
    names: impl Iterator<Item = &'a str>,
    name: &str,
) -> Result<usize> {
    names
        .into_iter()
        .position(|candidate| candidate == name)
        .ok_or_else(|| EpiError::InitializationError(format!("Unknown {kind} `{name}`")))
}

impl Model {
    pub fn from_definition(
        definition: &ModelDefinition,
        population: &PopulationDefinition,
    ) -> Result<Self> {
        let n_areas = population.areas.len();
        let n_ages = population.ages.len();

        if definition.compartments.len() < 2 {
            return Err(EpiError::InitializationError(
                "Model requires a susceptible and an infected compartment".to_string(),
            ));
        }
        if definition.horizon <= 0. || definition.steps == 0 {
            return Err(EpiError::InitializationError(
                "Horizon and number of steps must be positive".to_string(),
            ));
        }

        let compartment_index = |name: &str| {
            index_of(
                "compartment",
                definition.compartments.iter().map(|c| c.name.as_str()),
                name,
            )
        };
        let parameter_index = |name: &str| {
            index_of(
                "parameter",
                definition.parameters.iter().map(|p| p.name.as_str()),
                name,
            )
        };

        let mut parameters: Vec<Parameter> = definition
            .parameters
            .iter()
            .map(|parameter| Parameter {
                name: parameter.name.clone(),
                min: parameter.min,
                max: parameter.max,
                value: parameter
                    .value
                    .unwrap_or(0.5 * (parameter.min + parameter.max)),
                kind: ParameterKind::Transmission,
            })
            .collect();

        let infected = compartment_index(&definition.infection)?;
        if infected == SUSCEPTIBLE {
            return Err(EpiError::InitializationError(
                "Infection must leave the susceptible compartment".to_string(),
            ));
        }

        let mut transitions = vec![Transition {
            name: format!(
                "{}->{}",
                definition.compartments[SUSCEPTIBLE].name, definition.infection
            ),
            from: SUSCEPTIBLE,
            to: infected,
            kind: TransitionKind::Infection,
            branch: vec![],
        }];

        for transition in definition.transitions.iter() {
            let from = compartment_index(&transition.from)?;
            let to = compartment_index(&transition.to)?;
            if from == SUSCEPTIBLE || from == to {
                return Err(EpiError::InitializationError(format!(
                    "Invalid transition {}->{}",
                    transition.from, transition.to
                )));
            }
            let sojourn = match &transition.distribution {
                DistributionDefinition::Exponential { mean } => Sojourn::Exponential {
                    mean: parameter_index(mean)?,
                },
                DistributionDefinition::LogNormal { mean, cv } => Sojourn::LogNormal {
                    mean: parameter_index(mean)?,
                    cv: parameter_index(cv)?,
                },
            };
            let branch = transition
                .branch
                .iter()
                .map(|name| parameter_index(name))
                .collect::<Result<Vec<usize>>>()?;
            if !(branch.is_empty() || branch.len() == 1 || branch.len() == n_ages) {
                return Err(EpiError::InitializationError(format!(
                    "Transition {}->{} needs one branch parameter or one per age",
                    transition.from, transition.to
                )));
            }
            transitions.push(Transition {
                name: format!("{}->{}", transition.from, transition.to),
                from,
                to,
                kind: TransitionKind::Sojourn(sojourn),
                branch,
            });
        }

        for transition in transitions.iter() {
            let progression = match transition.kind {
                TransitionKind::Sojourn(Sojourn::Exponential { mean }) => vec![mean],
                TransitionKind::Sojourn(Sojourn::LogNormal { mean, cv }) => vec![mean, cv],
                _ => vec![],
            };
            for index in progression.into_iter().chain(transition.branch.iter().copied()) {
                parameters[index].kind = ParameterKind::Progression;
            }
        }

        let mut compartments: Vec<Compartment> = definition
            .compartments
            .iter()
            .enumerate()
            .map(|(index, compartment)| Compartment {
                name: compartment.name.clone(),
                infectivity: compartment.infectivity,
                transitions: transitions
                    .iter()
                    .enumerate()
                    .filter(|(_, transition)| {
                        transition.from == index && transition.kind != TransitionKind::Infection
                    })
                    .map(|(t, _)| t)
                    .collect(),
                marker: 0,
            })
            .collect();

        for compartment in compartments.iter() {
            let (last, others) = match compartment.transitions.split_last() {
                Some(split) => split,
                None => continue,
            };
            if others
                .iter()
                .any(|&t| transitions[t].branch.is_empty())
            {
                return Err(EpiError::InitializationError(format!(
                    "Branching transitions out of {} need branch parameters",
                    compartment.name
                )));
            }
            if !transitions[*last].branch.is_empty() {
                return Err(EpiError::InitializationError(format!(
                    "Last transition out of {} takes the remaining probability",
                    compartment.name
                )));
            }
        }

        for (index, compartment) in compartments.iter_mut().enumerate() {
            compartment.marker = transitions.len();
            transitions.push(Transition {
                name: format!("{}->{}", compartment.name, compartment.name),
                from: index,
                to: index,
                kind: TransitionKind::PeriodBoundary,
                branch: vec![],
            });
        }

        let periods = match definition.periods.is_empty() {
            true => vec![Period {
                name: "all".to_string(),
                end: definition.horizon,
            }],
            false => definition
                .periods
                .iter()
                .map(|period| Period {
                    name: period.name.clone(),
                    end: period.end,
                })
                .collect(),
        };
        if periods.windows(2).any(|pair| pair[1].end <= pair[0].end) {
            return Err(EpiError::InitializationError(
                "Period ends must be increasing".to_string(),
            ));
        }

        let knots = |knots: &[SplineKnot]| -> Result<Vec<Knot>> {
            let mut resolved = knots
                .iter()
                .map(|knot| {
                    Ok(Knot {
                        time: knot.time,
                        parameter: parameter_index(&knot.parameter)?,
                        factor: knot.factor,
                    })
                })
                .collect::<Result<Vec<Knot>>>()?;
            resolved.sort_by(|a, b| a.time.total_cmp(&b.time));
            Ok(resolved)
        };
        let beta = knots(&definition.beta)?;
        let phi = knots(&definition.phi)?;
        if beta.is_empty() {
            return Err(EpiError::InitializationError(
                "Transmission spline needs at least one knot".to_string(),
            ));
        }

        let area_effects = definition
            .area_effects
            .iter()
            .map(|name| parameter_index(name))
            .collect::<Result<Vec<usize>>>()?;
        if let Some(area) = population
            .areas
            .iter()
            .find(|area| area.covariates.len() != area_effects.len())
        {
            return Err(EpiError::InitializationError(format!(
                "Area {} has {} covariates, expected {}",
                area.name,
                area.covariates.len(),
                area_effects.len()
            )));
        }

        let mut mixing = MixingTensor::new(periods.len(), compartments.len());
        for entry in definition.mixing.iter() {
            let compartment = compartment_index(&entry.compartment)?;
            let applies_to = match &entry.period {
                Some(name) => vec![index_of(
                    "period",
                    periods.iter().map(|p| p.name.as_str()),
                    name,
                )?],
                None => (0..periods.len()).collect(),
            };
            let matrix = SparseMatrix::from_definition(&entry.matrix, n_areas, n_ages)?;
            mixing.insert(&applies_to, compartment, matrix);
        }

        log::debug!(
            "Resolved model with {} compartments, {} transitions and {} parameters",
            compartments.len(),
            transitions.len(),
            parameters.len()
        );

        Ok(Self {
            compartments,
            transitions,
            parameters,
            beta,
            phi,
            area_effects,
            periods,
            mixing,
            horizon: definition.horizon,
            steps: definition.steps,
            infection_ceiling: definition.infection_ceiling,
            n_areas,
            n_ages,
        })
    }

    pub fn parameter_index(&self, name: &str) -> Result<usize> {
        index_of(
            "parameter",
            self.parameters.iter().map(|p| p.name.as_str()),
            name,
        )
    }

    pub fn transition_index(&self, name: &str) -> Result<usize> {
        index_of(
            "transition",
            self.transitions.iter().map(|t| t.name.as_str()),
            name,
        )
    }

    /// Parameter values configured for simulation.
    pub fn default_parameters(&self) -> Vec<f64> {
        self.parameters.iter().map(|p| p.value).collect()
    }

    /// Check a parameter vector against the bounds of the priors.
    pub fn check_bounds(&self, parameters: &[f64]) -> Result<()> {
        for (parameter, &value) in self.parameters.iter().zip(parameters) {
            if !(parameter.min..=parameter.max).contains(&value) {
                return Err(EpiError::ParameterOutOfBounds {
                    name: parameter.name.clone(),
                    value,
                    min: parameter.min,
                    max: parameter.max,
                });
            }
        }
        Ok(())
    }

    /// Whether two parameter vectors differ in any parameter shaping the course of infection.
    pub fn progression_differs(&self, a: &[f64], b: &[f64]) -> bool {
        self.parameters
            .iter()
            .zip(a.iter().zip(b))
            .any(|(parameter, (x, y))| parameter.kind == ParameterKind::Progression && x != y)
    }

    pub fn step_duration(&self) -> f64 {
        self.horizon / self.steps as f64
    }

    pub fn step_start(&self, step: usize) -> f64 {
        self.horizon * step as f64 / self.steps as f64
    }

    pub fn step_end(&self, step: usize) -> f64 {
        self.horizon * (step + 1) as f64 / self.steps as f64
    }

    /// The step containing a time before the horizon.
    pub fn step_of(&self, time: f64) -> usize {
        ((time / self.horizon * self.steps as f64) as usize).min(self.steps - 1)
    }

    /// The time period containing a time.
    pub fn period_of(&self, time: f64) -> usize {
        let mut period = 0;
        while period + 1 < self.periods.len() && time > self.periods[period].end {
            period += 1;
        }
        period
    }

    pub fn n_compartments(&self) -> usize {
        self.compartments.len()
    }

    pub fn n_transitions(&self) -> usize {
        self.transitions.len()
    }

    pub fn n_cells(&self) -> usize {
        self.n_areas * self.n_ages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::{sir_settings, seir_settings};

    #[test]
    fn resolves_transitions() {
        let settings = seir_settings();
        let model = Model::from_definition(&settings.model, &settings.population).unwrap();
        assert_eq!(model.transitions[INFECTION].kind, TransitionKind::Infection);
        assert_eq!(model.transitions[INFECTION].name, "S->E");
        assert_eq!(model.transition_index("E->I").unwrap(), 1);
        // one marker per compartment
        assert_eq!(model.n_transitions(), 1 + 4 + model.n_compartments());
        for (index, compartment) in model.compartments.iter().enumerate() {
            let marker = &model.transitions[compartment.marker];
            assert!(marker.is_marker());
            assert_eq!((marker.from, marker.to), (index, index));
        }
    }

    #[test]
    fn parameter_kinds() {
        let settings = seir_settings();
        let model = Model::from_definition(&settings.model, &settings.population).unwrap();
        let kind = |name: &str| model.parameters[model.parameter_index(name).unwrap()].kind;
        assert_eq!(kind("beta"), ParameterKind::Transmission);
        assert_eq!(kind("t_E"), ParameterKind::Progression);
        assert_eq!(kind("cv_I"), ParameterKind::Progression);
        assert_eq!(kind("p_H"), ParameterKind::Progression);

        let a = model.default_parameters();
        let mut b = a.clone();
        b[model.parameter_index("beta").unwrap()] *= 2.;
        assert!(!model.progression_differs(&a, &b));
        b[model.parameter_index("t_E").unwrap()] *= 2.;
        assert!(model.progression_differs(&a, &b));
    }

    #[test]
    fn steps_and_periods() {
        let settings = sir_settings(4, 250, 2);
        let model = Model::from_definition(&settings.model, &settings.population).unwrap();
        assert_eq!(model.step_of(0.), 0);
        assert_eq!(model.step_of(model.horizon - 1e-9), model.steps - 1);
        assert_eq!(model.step_end(0), model.step_start(1));
        assert_eq!(model.periods.len(), 2);
        assert_eq!(model.period_of(0.), 0);
        assert_eq!(model.period_of(model.periods[0].end), 0);
        assert_eq!(model.period_of(model.horizon), 1);
    }

    #[test]
    fn bounds() {
        let settings = sir_settings(1, 10, 1);
        let model = Model::from_definition(&settings.model, &settings.population).unwrap();
        let mut parameters = model.default_parameters();
        assert!(model.check_bounds(&parameters).is_ok());
        parameters[0] = model.parameters[0].max + 1.;
        assert!(matches!(
            model.check_bounds(&parameters),
            Err(EpiError::ParameterOutOfBounds { .. })
        ));
    }

    #[test]
    fn rejects_unknown_names() {
        let mut settings = sir_settings(1, 10, 1);
        settings.model.infection = "X".to_string();
        assert!(Model::from_definition(&settings.model, &settings.population).is_err());
    }
}
