//! Trajectory state
//!
//! A trajectory is one realization of the epidemic under a fixed parameter vector. It owns every
//! piece of state needed to continue or couple it: per-individual event histories, the infection
//! timeline, references to all events per step, the infectivity of every step and a
//! rate tree. A trajectory holds no references into other trajectories, so it can be cloned,
//! swapped or serialized freely.

use crate::errors::Result;

use super::derived::DerivedQuantities;
use super::infectivity::{InfectivityMap, apply_delta, contributions};
use super::model::{INFECTION, Model};
use super::path::{Event, Regime};
use super::population::Population;
use super::rate_tree::RateTree;
use super::timeline::{EventTimeline, ScheduledEvent};

/// Position of an event in the history of an individual.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventRef {
    pub individual: usize,
    pub index: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Trajectory {
    pub(crate) parameters: Vec<f64>,
    pub(crate) derived: DerivedQuantities,
    pub(crate) events: Vec<Vec<Event>>,
    pub(crate) timeline: EventTimeline,
    pub(crate) step_events: Vec<Vec<EventRef>>,
    pub(crate) infectivity: InfectivityMap,
    pub(crate) rate_tree: RateTree,
}

impl Trajectory {
    /// Create a trajectory without any events for the given parameters.
    pub fn new(model: &Model, population: &Population, parameters: &[f64]) -> Result<Self> {
        let derived = DerivedQuantities::compute(model, population, parameters)?;
        Ok(Self::with_derived(
            model,
            population,
            parameters.to_vec(),
            derived,
        ))
    }

    /// A trajectory of a process without infections, the starting point of a simulation.
    pub fn empty(model: &Model, population: &Population) -> Self {
        Self::with_derived(
            model,
            population,
            vec![0.; model.parameters.len()],
            DerivedQuantities::zero(model, population),
        )
    }

    fn with_derived(
        model: &Model,
        population: &Population,
        parameters: Vec<f64>,
        derived: DerivedQuantities,
    ) -> Self {
        Self {
            parameters,
            derived,
            events: vec![Vec::new(); population.len()],
            timeline: EventTimeline::new(model.horizon, model.steps),
            step_events: vec![Vec::new(); model.steps],
            infectivity: InfectivityMap::new(model.steps, population.n_age_cells()),
            rate_tree: RateTree::new(population.partition().clone()),
        }
    }

    /// Set a new parameter vector and recompute all derived quantities.
    ///
    /// The trajectory is left untouched if the derived quantities are invalid.
    pub fn set_parameters(
        &mut self,
        model: &Model,
        population: &Population,
        parameters: &[f64],
    ) -> Result<()> {
        self.derived = DerivedQuantities::compute(model, population, parameters)?;
        self.parameters = parameters.to_vec();
        Ok(())
    }

    pub fn parameters(&self) -> &[f64] {
        &self.parameters
    }

    pub fn derived(&self) -> &DerivedQuantities {
        &self.derived
    }

    pub fn regime(&self) -> Regime<'_> {
        Regime {
            parameters: &self.parameters,
            derived: &self.derived,
        }
    }

    /// Event history of an individual, empty if it was never infected.
    pub fn events(&self, individual: usize) -> &[Event] {
        &self.events[individual]
    }

    pub fn event(&self, reference: EventRef) -> &Event {
        &self.events[reference.individual][reference.index]
    }

    pub fn n_individuals(&self) -> usize {
        self.events.len()
    }

    pub fn n_infections(&self) -> usize {
        self.timeline.len()
    }

    /// Infection events in the order of the infection timeline.
    ///
    /// Simulation and coupling passes schedule infections as they happen, so their trajectories
    /// list infections in time order.
    pub fn infections(&self) -> impl Iterator<Item = &ScheduledEvent> {
        self.timeline.iter()
    }

    /// A rewound copy of the infection timeline.
    pub fn infection_queue(&self) -> EventTimeline {
        let mut queue = self.timeline.clone();
        queue.rewind();
        queue
    }

    /// References to all events of a step.
    pub fn step_events(&self, step: usize) -> &[EventRef] {
        &self.step_events[step]
    }

    pub fn infectivity(&self) -> &InfectivityMap {
        &self.infectivity
    }

    pub fn rate_tree(&self) -> &RateTree {
        &self.rate_tree
    }

    /// Remove all events while keeping the parameters.
    pub fn clear_history(&mut self) {
        self.events.iter_mut().for_each(|events| events.clear());
        self.timeline.clear();
        self.step_events.iter_mut().for_each(|refs| refs.clear());
        self.infectivity.clear();
        self.rate_tree.clear();
    }

    /// Add the path of a newly infected individual.
    ///
    /// The infection is scheduled on the timeline and every event before the horizon is
    /// referenced from its step.
    pub fn add_individual(&mut self, model: &Model, individual: usize, events: Vec<Event>) {
        debug_assert!(self.events[individual].is_empty());
        debug_assert_eq!(events.first().map(|e| e.transition), Some(INFECTION));

        if let Some(infection) = events.first() {
            self.timeline
                .schedule(individual, INFECTION, infection.time);
        }
        for (index, event) in events.iter().enumerate() {
            if event.time >= model.horizon {
                break;
            }
            self.step_events[model.step_of(event.time)].push(EventRef { individual, index });
        }
        self.events[individual] = events;
    }

    pub(crate) fn set_infectivity_step(&mut self, step: usize, values: &[f64]) {
        self.infectivity.set_step(step, values);
    }

    /// Recompute the infectivity of every step from the event histories.
    pub fn recompute_infectivity(&self, model: &Model, population: &Population) -> InfectivityMap {
        let mut map = InfectivityMap::new(model.steps, population.n_age_cells());
        let mut current = vec![0.; population.n_age_cells()];
        for step in 0..model.steps {
            map.set_step(step, &current);
            for &reference in self.step_events[step].iter() {
                let event = self.event(reference);
                let individual = reference.individual;
                let weight = population.demographics[population.individuals[individual].demographic]
                    .infectivity;
                let cell = population.age_cell(individual);
                for (matrix, factor) in contributions(model, event.transition, event.period, weight)
                {
                    apply_delta(&mut current, factor, model.mixing.row(matrix, cell));
                }
            }
        }
        map
    }

    /// Per-cell susceptible counts at the end of the horizon.
    pub fn susceptible_counts(&self, population: &Population) -> Vec<usize> {
        let mut counts = vec![0; population.n_cells()];
        for (individual, events) in self.events.iter().enumerate() {
            if events.is_empty() {
                counts[population.cell(individual)] += 1;
            }
        }
        counts
    }

    /// Set the rate tree to the infection rate and susceptible mass of the final step.
    pub fn refresh_rate_tree(&mut self, model: &Model, population: &Population) {
        let step = model.steps - 1;
        let counts = self.susceptible_counts(population);
        let infectivity = self.infectivity.step(step);
        let n_demographics = population.n_demographics();

        let mut rates = vec![0.; population.n_areas()];
        let mut masses = vec![0.; population.n_areas()];
        for (cell, &count) in counts.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let (area, demographic) = (cell / n_demographics, cell % n_demographics);
            let age = population.demographics[demographic].age;
            let lambda = self.derived.force_of_infection(
                step,
                area,
                demographic,
                infectivity[area * population.n_ages + age],
            );
            rates[area] += count as f64 * lambda;
            masses[area] += count as f64 * self.derived.susceptibility[demographic];
        }
        self.rate_tree.set_leaves(&rates, &masses);
    }
}
