use itertools::Itertools;

use crate::core::model::{INFECTION, SUSCEPTIBLE};
use crate::core::{Model, Trajectory};

/// Trait extension to summarize the event histories of a trajectory
pub trait TrajectoryStatistics {
    /// Number of individuals per compartment at the start of every step.
    fn compartment_counts(&self, model: &Model) -> Vec<Vec<usize>>;

    /// Number of occurrences of a transition within `[start, end)`.
    fn transition_count(&self, transition: usize, start: f64, end: f64) -> usize;

    /// Number of infections per area.
    fn infections_per_area(&self, areas: &[usize], n_areas: usize) -> Vec<usize>;
}

impl TrajectoryStatistics for Trajectory {
    fn compartment_counts(&self, model: &Model) -> Vec<Vec<usize>> {
        let mut current = vec![0; model.n_compartments()];
        current[SUSCEPTIBLE] = self.n_individuals();

        let mut counts = Vec::with_capacity(model.steps);
        for step in 0..model.steps {
            counts.push(current.clone());
            for &reference in self.step_events(step) {
                let transition = &model.transitions[self.event(reference).transition];
                current[transition.from] -= 1;
                current[transition.to] += 1;
            }
        }
        counts
    }

    fn transition_count(&self, transition: usize, start: f64, end: f64) -> usize {
        if transition == INFECTION {
            return self
                .infections()
                .filter(|event| start <= event.time && event.time < end)
                .count();
        }
        (0..self.n_individuals())
            .flat_map(|individual| self.events(individual).iter())
            .filter(|event| {
                event.transition == transition && start <= event.time && event.time < end
            })
            .count()
    }

    fn infections_per_area(&self, areas: &[usize], n_areas: usize) -> Vec<usize> {
        let per_area = self
            .infections()
            .map(|event| areas[event.individual])
            .counts();
        (0..n_areas)
            .map(|area| per_area.get(&area).copied().unwrap_or(0))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Coupler;
    use crate::core::testing::{build, seir_settings};
    use rand::prelude::*;
    use rand_chacha::ChaCha8Rng;
    use std::sync::Arc;

    #[test]
    fn counts_are_conserved() {
        let (model, population) = build(&seir_settings());
        let (model, population) = (Arc::new(model), Arc::new(population));
        let mut coupler = Coupler::new(model.clone(), population.clone(), false);
        let mut rng = ChaCha8Rng::seed_from_u64(31);
        let trajectory = coupler
            .simulate(&model.default_parameters(), &mut rng)
            .unwrap();

        let counts = trajectory.compartment_counts(&model);
        assert_eq!(counts.len(), model.steps);
        assert_eq!(counts[0][SUSCEPTIBLE], population.len());
        for row in counts.iter() {
            assert_eq!(row.iter().sum::<usize>(), population.len());
        }
        let susceptible_left = counts[model.steps - 1][SUSCEPTIBLE];
        let infected_before_last = trajectory.transition_count(
            INFECTION,
            0.,
            model.step_start(model.steps - 1),
        );
        assert_eq!(susceptible_left + infected_before_last, population.len());
    }

    #[test]
    fn infections_by_area() {
        let (model, population) = build(&seir_settings());
        let (model, population) = (Arc::new(model), Arc::new(population));
        let mut coupler = Coupler::new(model.clone(), population.clone(), false);
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let trajectory = coupler
            .simulate(&model.default_parameters(), &mut rng)
            .unwrap();
        let areas: Vec<usize> = population.individuals.iter().map(|i| i.area).collect();
        let per_area = trajectory.infections_per_area(&areas, population.n_areas());
        assert_eq!(per_area.iter().sum::<usize>(), trajectory.n_infections());
        assert_eq!(
            trajectory.transition_count(INFECTION, 0., model.horizon),
            trajectory.n_infections()
        );
    }
}
