//! Quantities derived from a parameter vector.

use crate::errors::{EpiError, Result};

use super::model::{Knot, Model, Sojourn, TransitionKind};
use super::population::Population;

#[derive(Clone, Debug, PartialEq)]
pub struct DerivedQuantities {
    /// Susceptibility per demographic position.
    pub susceptibility: Vec<f64>,

    /// Transmission factor per area.
    pub area_factor: Vec<f64>,

    /// Transmission rate per step.
    pub beta: Vec<f64>,

    /// Rate of imported infections per step.
    pub phi: Vec<f64>,

    /// Probability of each transition given its source compartment, per age.
    pub branch: Vec<Vec<f64>>,
}

impl DerivedQuantities {
    /// Quantities of a process without any infections.
    pub fn zero(model: &Model, population: &Population) -> Self {
        Self {
            susceptibility: vec![1.; population.n_demographics()],
            area_factor: vec![1.; population.n_areas()],
            beta: vec![0.; model.steps],
            phi: vec![0.; model.steps],
            branch: vec![vec![1.; model.n_ages]; model.n_transitions()],
        }
    }

    pub fn compute(model: &Model, population: &Population, parameters: &[f64]) -> Result<Self> {
        if parameters.len() != model.parameters.len() {
            return Err(EpiError::InvalidParameter(format!(
                "Expected {} parameters, got {}",
                model.parameters.len(),
                parameters.len()
            )));
        }

        let susceptibility = population
            .demographics
            .iter()
            .map(|demographic| {
                demographic
                    .susceptibility
                    .iter()
                    .map(|&p| parameters[p])
                    .sum::<f64>()
                    .exp()
            })
            .collect();

        let area_factor = population
            .areas
            .iter()
            .map(|area| {
                model
                    .area_effects
                    .iter()
                    .zip(area.covariates.iter())
                    .map(|(&p, covariate)| parameters[p] * covariate)
                    .sum::<f64>()
                    .exp()
            })
            .collect();

        let midpoints: Vec<f64> = (0..model.steps)
            .map(|step| 0.5 * (model.step_start(step) + model.step_end(step)))
            .collect();
        let beta: Vec<f64> = midpoints
            .iter()
            .map(|&time| spline(&model.beta, parameters, time))
            .collect();
        let phi: Vec<f64> = midpoints
            .iter()
            .map(|&time| spline(&model.phi, parameters, time))
            .collect();
        if let Some(step) = beta.iter().chain(phi.iter()).position(|&v| v < 0.) {
            return Err(EpiError::InvalidParameter(format!(
                "Negative forcing in step {}",
                step % model.steps
            )));
        }

        for transition in model.transitions.iter() {
            let positive = match transition.kind {
                TransitionKind::Sojourn(Sojourn::Exponential { mean }) => parameters[mean] > 0.,
                TransitionKind::Sojourn(Sojourn::LogNormal { mean, cv }) => {
                    parameters[mean] > 0. && parameters[cv] > 0.
                }
                _ => true,
            };
            if !positive {
                return Err(EpiError::InvalidParameter(format!(
                    "Sojourn of {} must be positive",
                    transition.name
                )));
            }
        }

        let mut branch = vec![vec![1.; model.n_ages]; model.n_transitions()];
        for compartment in model.compartments.iter() {
            let (&last, others) = match compartment.transitions.split_last() {
                Some(split) => split,
                None => continue,
            };
            for age in 0..model.n_ages {
                let mut remaining = 1.;
                for &t in others {
                    let parameter = match model.transitions[t].branch.as_slice() {
                        [shared] => *shared,
                        per_age => per_age[age],
                    };
                    let probability = parameters[parameter];
                    if probability < 0. {
                        return Err(EpiError::InvalidParameter(format!(
                            "Negative branch probability for {}",
                            model.transitions[t].name
                        )));
                    }
                    branch[t][age] = probability;
                    remaining -= probability;
                }
                if remaining < 0. {
                    return Err(EpiError::InvalidParameter(format!(
                        "Negative branch probability for {}",
                        model.transitions[last].name
                    )));
                }
                branch[last][age] = remaining;
            }
        }

        Ok(Self {
            susceptibility,
            area_factor,
            beta,
            phi,
            branch,
        })
    }

    /// Force of infection on an individual of a demographic position in an area.
    pub fn force_of_infection(
        &self,
        step: usize,
        area: usize,
        demographic: usize,
        infectivity: f64,
    ) -> f64 {
        self.susceptibility[demographic]
            * (self.beta[step] * self.area_factor[area] * infectivity + self.phi[step])
    }
}

/// Evaluate a linear spline, constant beyond its outer knots.
fn spline(knots: &[Knot], parameters: &[f64], time: f64) -> f64 {
    let value = |knot: &Knot| parameters[knot.parameter] * knot.factor;
    let (first, last) = match (knots.first(), knots.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return 0.,
    };
    if time <= first.time {
        return value(first);
    }
    if time >= last.time {
        return value(last);
    }
    let upper = knots.iter().position(|knot| knot.time > time).unwrap_or(knots.len() - 1);
    let (a, b) = (&knots[upper - 1], &knots[upper]);
    let fraction = (time - a.time) / (b.time - a.time);
    value(a) + fraction * (value(b) - value(a))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::{build, seir_settings};

    #[test]
    fn spline_interpolates() {
        let knots = vec![
            Knot {
                time: 0.,
                parameter: 0,
                factor: 1.,
            },
            Knot {
                time: 10.,
                parameter: 1,
                factor: 2.,
            },
        ];
        let parameters = [1., 2.];
        assert_eq!(spline(&knots, &parameters, -1.), 1.);
        assert_eq!(spline(&knots, &parameters, 5.), 2.5);
        assert_eq!(spline(&knots, &parameters, 20.), 4.);
        assert_eq!(spline(&[], &parameters, 5.), 0.);
    }

    #[test]
    fn derived_quantities() {
        let (model, population) = build(&seir_settings());
        let parameters = model.default_parameters();
        let derived = DerivedQuantities::compute(&model, &population, &parameters).unwrap();

        assert_eq!(derived.susceptibility, vec![1., (0.3f64).exp()]);
        assert_eq!(derived.area_factor[1], 1.);
        assert!((derived.area_factor[2] - (0.2f64).exp()).abs() < 1e-12);
        assert!(derived.beta.iter().all(|&beta| (beta - 0.6).abs() < 1e-12));
        assert!(derived.phi.iter().all(|&phi| (phi - 0.002).abs() < 1e-12));

        let to_h = model.transition_index("I->H").unwrap();
        let to_r = model.transition_index("I->R").unwrap();
        for age in 0..model.n_ages {
            assert_eq!(derived.branch[to_h][age], 0.2);
            assert_eq!(derived.branch[to_r][age], 0.8);
        }
    }

    #[test]
    fn invalid_parameters() {
        let (model, population) = build(&seir_settings());
        let mut parameters = model.default_parameters();
        parameters[model.parameter_index("p_H").unwrap()] = 1.5;
        assert!(matches!(
            DerivedQuantities::compute(&model, &population, &parameters),
            Err(EpiError::InvalidParameter(_))
        ));

        let mut parameters = model.default_parameters();
        parameters[model.parameter_index("t_E").unwrap()] = 0.;
        assert!(DerivedQuantities::compute(&model, &population, &parameters).is_err());

        assert!(DerivedQuantities::compute(&model, &population, &parameters[1..]).is_err());
    }
}
