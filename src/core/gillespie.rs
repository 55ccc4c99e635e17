//! Direct simulation
//!
//! A forward event-driven simulator that does not rely on coupling. Susceptible individuals are
//! infected at rate `sus · (beta · area_factor · Q + phi)`, which the rate tree splits into an
//! endogenous channel `Σ n_sus · sus · area_factor · Q` scaled by beta at the root and a mass
//! channel `Σ n_sus · sus` scaled by phi. Scheduled transitions of infected individuals come from
//! an event timeline and enter the infectivity through a buffer flushed at every step end.

use itertools::Itertools;
use rand::prelude::*;

use crate::errors::{EpiError, Result};

use super::infectivity::{InfectivityBuffer, contributions};
use super::model::Model;
use super::path::simulate_infection;
use super::population::Population;
use super::rate_tree::{Channel, RateTree, next_event_time};
use super::susceptibility::{Status, SusceptibilityLists};
use super::timeline::EventTimeline;
use super::trajectory::Trajectory;

struct DirectSimulation<'a> {
    model: &'a Model,
    population: &'a Population,
    trajectory: Trajectory,
    susceptible: SusceptibilityLists,
    pending: EventTimeline,
    buffer: InfectivityBuffer,
    infectivity: Vec<f64>,
    tree: RateTree,
}

/// Simulate a trajectory event by event.
pub fn simulate_direct<R: Rng + ?Sized>(
    model: &Model,
    population: &Population,
    parameters: &[f64],
    rng: &mut R,
) -> Result<Trajectory> {
    let cells = (0..population.len())
        .map(|individual| population.cell(individual))
        .collect();
    let mut simulation = DirectSimulation {
        model,
        population,
        trajectory: Trajectory::new(model, population, parameters)?,
        susceptible: SusceptibilityLists::new(cells, population.n_cells()),
        pending: EventTimeline::new(model.horizon, model.steps),
        buffer: InfectivityBuffer::new(model.mixing.n_matrices(), population.n_age_cells()),
        infectivity: vec![0.; population.n_age_cells()],
        tree: RateTree::new(population.partition().clone()),
    };
    simulation.run(rng)?;

    let mut trajectory = simulation.trajectory;
    trajectory.refresh_rate_tree(model, population);
    log::debug!(
        "Direct simulation finished with {} infections",
        trajectory.n_infections()
    );
    Ok(trajectory)
}

impl DirectSimulation<'_> {
    fn run<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<()> {
        let areas: Vec<usize> = (0..self.population.n_areas()).collect();
        let mut time = 0.;
        for step in 0..self.model.steps {
            self.trajectory.set_infectivity_step(step, &self.infectivity);
            if step == 0 {
                let (rates, masses): (Vec<f64>, Vec<f64>) =
                    areas.iter().map(|&area| self.leaf_values(area)).unzip();
                self.tree.set_leaves(&rates, &masses);
            }

            let beta = self.trajectory.derived().beta[step];
            let phi = self.trajectory.derived().phi[step];
            let end = self.model.step_end(step);
            loop {
                let endogenous = beta * self.tree.root_rate();
                let imported = phi * self.tree.root_mass();
                let infection_time =
                    next_event_time(time, endogenous + imported, rng).unwrap_or(f64::INFINITY);
                let due_time = self.pending.peek_time().unwrap_or(f64::INFINITY);

                if due_time >= end && infection_time >= end {
                    time = end;
                    break;
                }
                if infection_time < due_time {
                    time = infection_time;
                    let channel = match rng.random::<f64>() * (endogenous + imported) < endogenous {
                        true => Channel::Rate,
                        false => Channel::SusceptibleMass,
                    };
                    self.infect(channel, time, rng)?;
                    if self.trajectory.n_infections() >= self.model.infection_ceiling {
                        return Err(EpiError::InfectionCeilingExceeded {
                            infections: self.trajectory.n_infections(),
                            ceiling: self.model.infection_ceiling,
                        });
                    }
                } else if let Some(due) = self.pending.pop_next() {
                    time = due.time;
                    let event = self
                        .trajectory
                        .events(due.individual)
                        .iter()
                        .find(|event| event.transition == due.transition && event.time == due.time)
                        .copied()
                        .ok_or_else(|| {
                            EpiError::NumericConsistencyViolation(format!(
                                "Scheduled event of individual {} is missing",
                                due.individual
                            ))
                        })?;
                    self.buffer_event(due.individual, event.transition, event.period);
                }
            }

            self.flush();
        }
        Ok(())
    }

    /// Endogenous rate without beta and susceptible mass of an area.
    fn leaf_values(&self, area: usize) -> (f64, f64) {
        let population = self.population;
        let derived = self.trajectory.derived();
        let n_demographics = population.n_demographics();
        let mut rate = 0.;
        let mut mass = 0.;
        for demographic in 0..n_demographics {
            let count = self
                .susceptible
                .count(area * n_demographics + demographic, Status::BothSusceptible);
            if count == 0 {
                continue;
            }
            let age = population.demographics[demographic].age;
            let susceptibility = count as f64 * derived.susceptibility[demographic];
            rate += susceptibility
                * derived.area_factor[area]
                * self.infectivity[area * population.n_ages + age];
            mass += susceptibility;
        }
        (rate, mass)
    }

    fn refresh_leaf(&mut self, area: usize) {
        let (rate, mass) = self.leaf_values(area);
        let delta_rate = rate - self.tree.leaf_rate(area);
        let delta_mass = mass - self.tree.leaf_mass(area);
        self.tree.update(area, delta_rate, delta_mass);
    }

    fn infect<R: Rng + ?Sized>(&mut self, channel: Channel, time: f64, rng: &mut R) -> Result<()> {
        let area = self.tree.sample_leaf(channel, rng)?.ok_or_else(|| {
            EpiError::SamplingExhaustion(format!("No area found on {channel:?} channel"))
        })?;

        let population = self.population;
        let derived = self.trajectory.derived();
        let n_demographics = population.n_demographics();
        let weights: Vec<f64> = (0..n_demographics)
            .map(|demographic| {
                let cell = area * n_demographics + demographic;
                let count = self.susceptible.count(cell, Status::BothSusceptible) as f64;
                let age = population.demographics[demographic].age;
                let weight = count * derived.susceptibility[demographic];
                match channel {
                    Channel::Rate => weight * self.infectivity[area * population.n_ages + age],
                    Channel::SusceptibleMass => weight,
                }
            })
            .collect();
        let total: f64 = weights.iter().sum();
        let draw = rng.random::<f64>() * total;
        let demographic = weights
            .iter()
            .scan(0., |sum, weight| {
                *sum += weight;
                Some(*sum)
            })
            .position(|sum| draw < sum)
            .ok_or_else(|| {
                EpiError::SamplingExhaustion(format!("No cell of area {area} found"))
            })?;

        let members = self
            .susceptible
            .members(area * n_demographics + demographic, Status::BothSusceptible);
        let individual = members[rng.random_range(0..members.len())];
        self.susceptible
            .set_status(individual, Status::NotSusceptible);
        self.refresh_leaf(area);

        let events = simulate_infection(
            self.model,
            self.trajectory.regime(),
            population.age(individual),
            time,
            rng,
        );
        self.buffer_event(individual, events[0].transition, events[0].period);
        for event in events.iter().skip(1) {
            self.pending
                .schedule(individual, event.transition, event.time);
        }
        self.trajectory.add_individual(self.model, individual, events);
        Ok(())
    }

    fn buffer_event(&mut self, individual: usize, transition: usize, period: usize) {
        let population = self.population;
        let weight = population.demographics[population.individuals[individual].demographic]
            .infectivity;
        let cell = population.age_cell(individual);
        for (matrix, factor) in contributions(self.model, transition, period, weight) {
            self.buffer.add(matrix, cell, factor);
        }
    }

    /// Spread the buffered infectivity and refresh every touched area once.
    fn flush(&mut self) {
        let n_ages = self.population.n_ages;
        let infectivity = &mut self.infectivity;
        let mut touched = Vec::new();
        self.buffer.flush(&self.model.mixing, |destination, delta| {
            infectivity[destination] += delta;
            touched.push(destination / n_ages);
        });
        for area in touched.into_iter().sorted_unstable().dedup() {
            self.refresh_leaf(area);
        }
    }
}
