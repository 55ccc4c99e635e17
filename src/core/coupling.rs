//! Model-based proposals
//!
//! The coupler runs a proposed trajectory forward in lock-step with an initial trajectory. Every
//! infection of the initial trajectory is copied with probability `λ_p / λ_i`, and the proposed
//! trajectory generates extra infections at the rate of the difference process
//!
//! ```text
//! Δλ[w] = max(0, n_both[w] · (λ_p[w] - λ_i[w])) + n_proposed_only[w] · λ_p[w]
//! ```
//!
//! such that equal parameters reproduce the initial trajectory exactly. The infectivity of the
//! proposed trajectory is the infectivity of the initial one plus a running difference, which
//! only changes through events that are not shared between both trajectories.

use rand::prelude::*;
use std::sync::Arc;

use crate::errors::{EpiError, Result};

use super::infectivity::{InfectivityBuffer, contributions};
use super::model::Model;
use super::path::{Event, couple_path, simulate_infection};
use super::population::Population;
use super::rate_tree::{Channel, RateTree, next_event_time};
use super::susceptibility::{Status, SusceptibilityLists};
use super::timeline::{EventTimeline, ScheduledEvent};
use super::trajectory::Trajectory;

/// Relative tolerance of the consistency checks.
const TOLERANCE: f64 = 1e-8;

/// Probability to copy an infection of the initial trajectory.
pub fn copy_probability(lambda_initial: f64, lambda_proposed: f64) -> f64 {
    match lambda_proposed >= lambda_initial {
        true => 1.,
        false => lambda_proposed / lambda_initial,
    }
}

/// The next thing to happen within a step.
#[derive(Clone, Copy, Debug, PartialEq)]
enum Next {
    /// An infection of the initial trajectory comes up for copying.
    Copy(ScheduledEvent),
    /// The difference process infects a new individual.
    Infect(f64),
    StepEnd,
}

/// Session state of coupling passes, reusable across passes on the same population.
pub struct Coupler {
    model: Arc<Model>,
    population: Arc<Population>,
    lists: SusceptibilityLists,
    tree: RateTree,
    buffer: InfectivityBuffer,
    lambda_initial: Vec<f64>,
    lambda_proposed: Vec<f64>,
    difference: Vec<f64>,
    unmatched: Vec<u32>,
    checks: bool,
}

impl Coupler {
    pub fn new(model: Arc<Model>, population: Arc<Population>, checks: bool) -> Self {
        let cells = (0..population.len())
            .map(|individual| population.cell(individual))
            .collect();
        Self {
            lists: SusceptibilityLists::new(cells, population.n_cells()),
            tree: RateTree::new(population.partition().clone()),
            buffer: InfectivityBuffer::new(model.mixing.n_matrices(), population.n_age_cells()),
            lambda_initial: vec![0.; population.n_cells()],
            lambda_proposed: vec![0.; population.n_cells()],
            difference: vec![0.; population.n_age_cells()],
            unmatched: vec![
                0;
                population.len() * model.n_transitions() * model.periods.len()
            ],
            checks,
            model,
            population,
        }
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn population(&self) -> &Arc<Population> {
        &self.population
    }

    /// Simulate a trajectory from scratch by coupling to a process without infections.
    pub fn simulate<R: Rng + ?Sized>(&mut self, parameters: &[f64], rng: &mut R) -> Result<Trajectory> {
        let initial = Trajectory::empty(&self.model, &self.population);
        let mut proposed = Trajectory::new(&self.model, &self.population, parameters)?;
        self.run(&initial, &mut proposed, rng)?;
        Ok(proposed)
    }

    /// Rebuild `proposed` as a coupled copy of `initial` under the parameters of `proposed`.
    ///
    /// The susceptibility lists are reset whether the pass succeeds or not. After a failure
    /// `proposed` holds a partial history and must not be used.
    pub fn run<R: Rng + ?Sized>(
        &mut self,
        initial: &Trajectory,
        proposed: &mut Trajectory,
        rng: &mut R,
    ) -> Result<()> {
        let result = self.pass(initial, proposed, rng);
        self.lists.reset();
        self.buffer.clear();
        if result.is_err() {
            self.unmatched.fill(0);
        }
        result?;

        proposed.refresh_rate_tree(&self.model, &self.population);
        if self.checks {
            proposed.rate_tree().verify()?;
        }
        log::trace!(
            "Coupling pass finished with {} initial and {} proposed infections",
            initial.n_infections(),
            proposed.n_infections()
        );
        Ok(())
    }

    fn pass<R: Rng + ?Sized>(
        &mut self,
        initial: &Trajectory,
        proposed: &mut Trajectory,
        rng: &mut R,
    ) -> Result<()> {
        let model = self.model.clone();

        proposed.clear_history();
        self.difference.fill(0.);
        let progression_differs =
            model.progression_differs(initial.parameters(), proposed.parameters());
        let mut queue = initial.infection_queue();
        let mut time = 0.;

        for step in 0..model.steps {
            let infectivity: Vec<f64> = initial
                .infectivity()
                .step(step)
                .iter()
                .zip(self.difference.iter())
                .map(|(q, dq)| q + dq)
                .collect();
            proposed.set_infectivity_step(step, &infectivity);
            self.build_difference_tree(step, initial, proposed);

            let end = model.step_end(step);
            loop {
                match self.next(&mut queue, time, end, rng) {
                    Next::StepEnd => {
                        time = end;
                        break;
                    }
                    Next::Infect(at) => {
                        time = at;
                        self.infect(proposed, time, rng)?;
                    }
                    Next::Copy(event) => {
                        time = event.time;
                        queue.pop_next();
                        self.copy_or_not(initial, proposed, event.individual, progression_differs, rng);
                    }
                }
                if proposed.n_infections() >= model.infection_ceiling {
                    return Err(EpiError::InfectionCeilingExceeded {
                        infections: proposed.n_infections(),
                        ceiling: model.infection_ceiling,
                    });
                }
            }

            self.finish_step(step, initial, proposed);
            if self.checks {
                self.check(step, time, initial, proposed)?;
            }
        }

        if self.checks {
            self.check_infectivity(proposed)?;
        }
        Ok(())
    }

    /// Race the next initial infection against the difference process and the end of the step.
    fn next<R: Rng + ?Sized>(
        &self,
        queue: &mut EventTimeline,
        time: f64,
        end: f64,
        rng: &mut R,
    ) -> Next {
        let copy = queue.peek().copied();
        let infection = next_event_time(time, self.tree.root_rate(), rng);
        let copy_time = copy.map_or(f64::INFINITY, |event| event.time);
        let infection_time = infection.unwrap_or(f64::INFINITY);

        if copy_time >= end && infection_time >= end {
            return Next::StepEnd;
        }
        match (copy, infection_time < copy_time) {
            (_, true) => Next::Infect(infection_time),
            (Some(event), false) => Next::Copy(event),
            (None, false) => Next::StepEnd,
        }
    }

    /// Rate of the difference process and proposed susceptible mass in a cell.
    fn cell_difference(&self, cell: usize) -> (f64, f64) {
        let both = self.lists.count(cell, Status::BothSusceptible) as f64;
        let proposed_only = self.lists.count(cell, Status::ProposedOnlySusceptible) as f64;
        let shared = (both * (self.lambda_proposed[cell] - self.lambda_initial[cell])).max(0.);
        (shared, proposed_only * self.lambda_proposed[cell])
    }

    fn build_difference_tree(&mut self, step: usize, initial: &Trajectory, proposed: &Trajectory) {
        let population = &self.population;
        let n_demographics = population.n_demographics();
        let infectivity_initial = initial.infectivity().step(step);
        let infectivity_proposed = proposed.infectivity().step(step);

        let mut rates = vec![0.; population.n_areas()];
        let mut masses = vec![0.; population.n_areas()];
        for area in 0..population.n_areas() {
            for demographic in 0..n_demographics {
                let cell = area * n_demographics + demographic;
                let age_cell = area * population.n_ages + population.demographics[demographic].age;
                self.lambda_initial[cell] = initial.derived().force_of_infection(
                    step,
                    area,
                    demographic,
                    infectivity_initial[age_cell],
                );
                self.lambda_proposed[cell] = proposed.derived().force_of_infection(
                    step,
                    area,
                    demographic,
                    infectivity_proposed[age_cell],
                );
                let (shared, proposed_only) = self.cell_difference(cell);
                rates[area] += shared + proposed_only;
                masses[area] += self.susceptible_mass(cell, proposed);
            }
        }
        self.tree.set_leaves(&rates, &masses);
    }

    fn susceptible_mass(&self, cell: usize, proposed: &Trajectory) -> f64 {
        let demographic = cell % self.population.n_demographics();
        let count = self.lists.count(cell, Status::BothSusceptible)
            + self.lists.count(cell, Status::ProposedOnlySusceptible);
        count as f64 * proposed.derived().susceptibility[demographic]
    }

    /// Change the status of an individual and update its leaf of the difference tree.
    fn set_status(&mut self, individual: usize, status: Status, proposed: &Trajectory) {
        let cell = self.population.cell(individual);
        let area = self.population.individuals[individual].area;
        let before = self.cell_difference(cell);
        let mass_before = self.susceptible_mass(cell, proposed);
        self.lists.set_status(individual, status);
        let after = self.cell_difference(cell);
        let mass_after = self.susceptible_mass(cell, proposed);

        let delta_rate = (after.0 + after.1) - (before.0 + before.1);
        let delta_mass = mass_after - mass_before;
        if delta_rate != 0. || delta_mass != 0. {
            self.tree.update(area, delta_rate, delta_mass);
        }
    }

    /// Infect a new individual in the proposed trajectory only.
    fn infect<R: Rng + ?Sized>(
        &mut self,
        proposed: &mut Trajectory,
        time: f64,
        rng: &mut R,
    ) -> Result<()> {
        let area = self
            .tree
            .sample_leaf(Channel::Rate, rng)?
            .ok_or_else(|| EpiError::SamplingExhaustion("Difference tree is empty".to_string()))?;

        let n_demographics = self.population.n_demographics();
        let cells = area * n_demographics..(area + 1) * n_demographics;
        let weights: Vec<(f64, f64)> = cells.clone().map(|cell| self.cell_difference(cell)).collect();
        let total: f64 = weights.iter().map(|(shared, only)| shared + only).sum();
        let draw = rng.random::<f64>() * total;
        let mut sum = 0.;
        let mut chosen = None;
        for (cell, (shared, only)) in cells.zip(weights.iter()) {
            sum += shared + only;
            if draw < sum {
                chosen = Some((cell, *shared, *only));
                break;
            }
        }
        let (cell, shared, only) = chosen.ok_or_else(|| {
            EpiError::SamplingExhaustion(format!("No cell of area {area} found for {draw} of {total}"))
        })?;

        let status = match rng.random::<f64>() * (shared + only) < shared {
            true => Status::BothSusceptible,
            false => Status::ProposedOnlySusceptible,
        };
        let members = self.lists.members(cell, status);
        if members.is_empty() {
            return Err(EpiError::SamplingExhaustion(format!(
                "No {status:?} individual in cell {cell}"
            )));
        }
        let individual = members[rng.random_range(0..members.len())];

        self.set_status(individual, Status::NotSusceptible, proposed);
        let events = simulate_infection(
            &self.model,
            proposed.regime(),
            self.population.age(individual),
            time,
            rng,
        );
        proposed.add_individual(&self.model, individual, events);
        Ok(())
    }

    /// Copy an infection of the initial trajectory with probability `λ_p / λ_i`.
    fn copy_or_not<R: Rng + ?Sized>(
        &mut self,
        initial: &Trajectory,
        proposed: &mut Trajectory,
        individual: usize,
        progression_differs: bool,
        rng: &mut R,
    ) {
        if self.lists.status(individual) != Status::BothSusceptible {
            return;
        }
        let cell = self.population.cell(individual);
        let alpha = copy_probability(self.lambda_initial[cell], self.lambda_proposed[cell]);
        if alpha < 1. && rng.random::<f64>() >= alpha {
            self.set_status(individual, Status::ProposedOnlySusceptible, proposed);
            return;
        }

        self.set_status(individual, Status::NotSusceptible, proposed);
        let events = match progression_differs {
            true => couple_path(
                &self.model,
                initial.regime(),
                proposed.regime(),
                self.population.age(individual),
                initial.events(individual),
                rng,
            ),
            false => initial.events(individual).to_vec(),
        };
        proposed.add_individual(&self.model, individual, events);
    }

    /// Feed the events of a step that are not shared by both trajectories into the difference.
    fn finish_step(&mut self, step: usize, initial: &Trajectory, proposed: &Trajectory) {
        let n_transitions = self.model.n_transitions();
        let n_periods = self.model.periods.len();
        let key = |individual: usize, event: &Event| {
            (individual * n_transitions + event.transition) * n_periods + event.period
        };

        // a step can hold several events of the same kind, e.g. two period markers
        for &reference in initial.step_events(step) {
            self.unmatched[key(reference.individual, initial.event(reference))] += 1;
        }
        for &reference in proposed.step_events(step) {
            let event = proposed.event(reference);
            let k = key(reference.individual, event);
            match self.unmatched[k] {
                0 => self.buffer_event(reference.individual, event.transition, event.period, 1.),
                _ => self.unmatched[k] -= 1,
            }
        }
        for &reference in initial.step_events(step) {
            let event = initial.event(reference);
            let k = key(reference.individual, event);
            if self.unmatched[k] > 0 {
                self.unmatched[k] -= 1;
                self.buffer_event(reference.individual, event.transition, event.period, -1.);
            }
        }

        let difference = &mut self.difference;
        self.buffer
            .flush(&self.model.mixing, |destination, delta| difference[destination] += delta);
    }

    fn buffer_event(&mut self, individual: usize, transition: usize, period: usize, sign: f64) {
        let population = &self.population;
        let weight = population.demographics[population.individuals[individual].demographic].infectivity;
        let cell = population.age_cell(individual);
        for (matrix, factor) in contributions(&self.model, transition, period, sign * weight) {
            self.buffer.add(matrix, cell, factor);
        }
    }

    /// Check lists, statuses and the difference tree against their definitions.
    fn check(&self, step: usize, time: f64, initial: &Trajectory, proposed: &Trajectory) -> Result<()> {
        self.lists.verify()?;
        self.tree.verify()?;

        for individual in 0..self.population.len() {
            let infected_initial = initial
                .events(individual)
                .first()
                .is_some_and(|event| event.time < time);
            let infected_proposed = !proposed.events(individual).is_empty();
            let expected = match (infected_initial, infected_proposed) {
                (_, true) => Status::NotSusceptible,
                (true, false) => Status::ProposedOnlySusceptible,
                (false, false) => Status::BothSusceptible,
            };
            if self.lists.status(individual) != expected {
                return Err(EpiError::NumericConsistencyViolation(format!(
                    "Individual {individual} is {:?}, expected {expected:?} in step {step}",
                    self.lists.status(individual)
                )));
            }
        }

        let n_demographics = self.population.n_demographics();
        for area in 0..self.population.n_areas() {
            let rate: f64 = (area * n_demographics..(area + 1) * n_demographics)
                .map(|cell| {
                    let (shared, only) = self.cell_difference(cell);
                    shared + only
                })
                .sum();
            let leaf = self.tree.leaf_rate(area);
            if (leaf - rate).abs() > TOLERANCE * (1. + rate.abs()) {
                return Err(EpiError::NumericConsistencyViolation(format!(
                    "Difference rate of area {area} is {leaf}, expected {rate} in step {step}"
                )));
            }
        }

        if self.unmatched.iter().any(|&count| count > 0) {
            return Err(EpiError::NumericConsistencyViolation(format!(
                "Unresolved event matches after step {step}"
            )));
        }
        Ok(())
    }

    fn check_infectivity(&self, proposed: &Trajectory) -> Result<()> {
        let recomputed = proposed.recompute_infectivity(&self.model, &self.population);
        for step in 0..self.model.steps {
            let running = proposed.infectivity().step(step);
            for (cell, (a, b)) in running.iter().zip(recomputed.step(step)).enumerate() {
                if (a - b).abs() > TOLERANCE * (1. + b.abs()) {
                    return Err(EpiError::NumericConsistencyViolation(format!(
                        "Infectivity of cell {cell} in step {step} is {a}, expected {b}"
                    )));
                }
            }
        }
        Ok(())
    }
}
