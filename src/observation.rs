//! Observation models
//!
//! An observation model scores a trajectory against data. The chain only sees the log
//! likelihood, so any model implementing [`ObservationModel`] can drive inference.

use std::f64::consts::PI;

use crate::config::Observations;
use crate::core::{Model, Trajectory};
use crate::errors::Result;
use crate::stats::TrajectoryStatistics;

/// Smallest variance of an observed count.
const MIN_VARIANCE: f64 = 5.;

pub trait ObservationModel {
    /// Log likelihood of the observations given a trajectory.
    fn likelihood(&self, trajectory: &Trajectory) -> f64;
}

#[derive(Clone, Debug, PartialEq)]
struct Window {
    transition: usize,
    start: f64,
    end: f64,
    count: f64,
}

/// Transition counts in time windows with a normal approximation of the observation noise.
#[derive(Clone, Debug, PartialEq)]
pub struct TransitionCounts {
    windows: Vec<Window>,
}

impl TransitionCounts {
    pub fn new(observations: &Observations, model: &Model) -> Result<Self> {
        let windows = observations
            .records()
            .iter()
            .map(|record| {
                Ok(Window {
                    transition: model.transition_index(&record.transition)?,
                    start: record.start,
                    end: record.end,
                    count: record.count,
                })
            })
            .collect::<Result<Vec<Window>>>()?;
        Ok(Self { windows })
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

impl ObservationModel for TransitionCounts {
    fn likelihood(&self, trajectory: &Trajectory) -> f64 {
        self.windows
            .iter()
            .map(|window| {
                let simulated =
                    trajectory.transition_count(window.transition, window.start, window.end) as f64;
                let variance = window.count.max(MIN_VARIANCE);
                let residual = window.count - simulated;
                -0.5 * residual * residual / variance - 0.5 * (2. * PI * variance).ln()
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ObservationRecord;
    use crate::core::Coupler;
    use crate::core::model::INFECTION;
    use crate::core::testing::{build, sir_settings};
    use rand::prelude::*;
    use rand_chacha::ChaCha8Rng;
    use std::sync::Arc;

    #[test]
    fn likelihood_prefers_matching_counts() {
        let (model, population) = build(&sir_settings(2, 100, 1));
        let (model, population) = (Arc::new(model), Arc::new(population));
        let mut coupler = Coupler::new(model.clone(), population.clone(), false);
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let trajectory = coupler
            .simulate(&model.default_parameters(), &mut rng)
            .unwrap();
        let infected = trajectory.transition_count(INFECTION, 0., 30.) as f64;

        let score = |count: f64| {
            let observations =
                Observations::from_vec(vec![ObservationRecord::new("S->I", 0., 30., count)])
                    .unwrap();
            TransitionCounts::new(&observations, &model)
                .unwrap()
                .likelihood(&trajectory)
        };
        assert!(score(infected) > score(infected + 10.));
        assert!(score(infected) > score((infected - 10.).max(0.)) || infected < 1.);
        assert!(score(infected).is_finite());
    }

    #[test]
    fn unknown_transition() {
        let (model, _) = build(&sir_settings(1, 10, 1));
        let observations =
            Observations::from_vec(vec![ObservationRecord::new("S->X", 0., 1., 1.)]).unwrap();
        assert!(TransitionCounts::new(&observations, &model).is_err());
    }
}
