//! Flat numeric serialization of trajectories
//!
//! A trajectory is written into an owned `Vec<f64>` in a fixed order. Counts and indices are
//! stored as integral floats and validated when read back.

use crate::errors::{EpiError, Result};

use super::derived::DerivedQuantities;
use super::infectivity::InfectivityMap;
use super::model::Model;
use super::path::Event;
use super::population::Population;
use super::rate_tree::RateTree;
use super::timeline::{EventTimeline, ScheduledEvent};
use super::trajectory::{EventRef, Trajectory};

/// Largest integer every smaller one of which is exactly representable.
const MAX_INDEX: f64 = 9_007_199_254_740_992.;

#[derive(Debug, Default)]
pub struct Packer {
    buffer: Vec<f64>,
}

impl Packer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: f64) {
        self.buffer.push(value);
    }

    pub fn push_index(&mut self, value: usize) {
        self.buffer.push(value as f64);
    }

    /// Push the length followed by the values.
    pub fn push_values(&mut self, values: &[f64]) {
        self.push_index(values.len());
        self.buffer.extend_from_slice(values);
    }

    pub fn push_table(&mut self, table: &[Vec<f64>]) {
        self.push_index(table.len());
        for row in table {
            self.push_values(row);
        }
    }

    pub fn finish(self) -> Vec<f64> {
        self.buffer
    }
}

#[derive(Debug)]
pub struct Unpacker<'a> {
    buffer: &'a [f64],
    position: usize,
}

impl<'a> Unpacker<'a> {
    pub fn new(buffer: &'a [f64]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    pub fn value(&mut self) -> Result<f64> {
        let value = self.buffer.get(self.position).copied().ok_or_else(|| {
            EpiError::PackError(format!("Buffer truncated at position {}", self.position))
        })?;
        self.position += 1;
        Ok(value)
    }

    pub fn index(&mut self) -> Result<usize> {
        let value = self.value()?;
        if !(0. ..MAX_INDEX).contains(&value) || value.fract() != 0. {
            return Err(EpiError::PackError(format!(
                "Invalid index {value} at position {}",
                self.position - 1
            )));
        }
        Ok(value as usize)
    }

    /// An index that must be smaller than `bound`.
    pub fn bounded_index(&mut self, bound: usize) -> Result<usize> {
        let index = self.index()?;
        if index >= bound {
            return Err(EpiError::PackError(format!(
                "Index {index} out of range {bound} at position {}",
                self.position - 1
            )));
        }
        Ok(index)
    }

    /// A length that fits into the rest of the buffer when every item takes `width` values.
    fn length(&mut self, width: usize) -> Result<usize> {
        let length = self.index()?;
        if length.saturating_mul(width) > self.buffer.len() - self.position {
            return Err(EpiError::PackError(format!(
                "Length {length} exceeds buffer at position {}",
                self.position - 1
            )));
        }
        Ok(length)
    }

    pub fn values(&mut self) -> Result<Vec<f64>> {
        let length = self.length(1)?;
        let values = self.buffer[self.position..self.position + length].to_vec();
        self.position += length;
        Ok(values)
    }

    pub fn table(&mut self) -> Result<Vec<Vec<f64>>> {
        let rows = self.length(1)?;
        (0..rows).map(|_| self.values()).collect()
    }

    pub fn finish(self) -> Result<()> {
        match self.position == self.buffer.len() {
            true => Ok(()),
            false => Err(EpiError::PackError(format!(
                "{} trailing values",
                self.buffer.len() - self.position
            ))),
        }
    }
}

impl Trajectory {
    pub fn serialize(&self) -> Vec<f64> {
        let mut packer = Packer::new();

        packer.push_values(&self.parameters);
        let derived = &self.derived;
        packer.push_values(&derived.susceptibility);
        packer.push_values(&derived.area_factor);
        packer.push_values(&derived.beta);
        packer.push_values(&derived.phi);
        packer.push_table(&derived.branch);

        packer.push_index(self.events.len());
        for events in self.events.iter() {
            packer.push_index(events.len());
            for event in events {
                packer.push_index(event.transition);
                packer.push(event.time);
                packer.push_index(event.period);
            }
        }

        packer.push_index(self.step_events.len());
        for references in self.step_events.iter() {
            packer.push_index(references.len());
            for reference in references {
                packer.push_index(reference.individual);
                packer.push_index(reference.index);
            }
        }

        let timeline = &self.timeline;
        packer.push(timeline.horizon());
        packer.push_index(timeline.n_buckets());
        for (bucket, &consumed) in timeline.buckets().iter().zip(timeline.consumed()) {
            packer.push_index(bucket.len());
            for event in bucket {
                packer.push_index(event.individual);
                packer.push_index(event.transition);
                packer.push(event.time);
            }
            packer.push_index(consumed);
        }
        packer.push_index(timeline.raw_cursor());

        packer.push_index(self.infectivity.n_cells());
        packer.push_index(self.infectivity.n_steps());
        for step in 0..self.infectivity.n_steps() {
            for &value in self.infectivity.step(step) {
                packer.push(value);
            }
        }

        let (rate, mass) = self.rate_tree.levels();
        packer.push_table(rate);
        packer.push_table(mass);

        packer.finish()
    }

    /// Read a trajectory written by [`Trajectory::serialize`] for the same model and population.
    pub fn deserialize(buffer: &[f64], model: &Model, population: &Population) -> Result<Self> {
        let mut unpacker = Unpacker::new(buffer);

        let parameters = unpacker.values()?;
        let derived = DerivedQuantities {
            susceptibility: unpacker.values()?,
            area_factor: unpacker.values()?,
            beta: unpacker.values()?,
            phi: unpacker.values()?,
            branch: unpacker.table()?,
        };
        if derived.susceptibility.len() != population.n_demographics()
            || derived.area_factor.len() != population.n_areas()
        {
            return Err(EpiError::PackError(
                "Derived quantities do not match population".to_string(),
            ));
        }
        let n_transitions = derived.branch.len();
        let n_steps = derived.beta.len();
        if n_transitions != model.n_transitions() || n_steps != model.steps {
            return Err(EpiError::PackError(
                "Derived quantities do not match model".to_string(),
            ));
        }
        let n_periods = model.periods.len();

        let n_individuals = unpacker.length(1)?;
        if n_individuals != population.len() {
            return Err(EpiError::PackError(format!(
                "Buffer holds {n_individuals} individuals, population has {}",
                population.len()
            )));
        }
        let mut events = Vec::with_capacity(n_individuals);
        for _ in 0..n_individuals {
            let n_events = unpacker.length(3)?;
            let history = (0..n_events)
                .map(|_| -> Result<Event> {
                    Ok(Event {
                        transition: unpacker.bounded_index(n_transitions)?,
                        time: unpacker.value()?,
                        period: unpacker.bounded_index(n_periods)?,
                    })
                })
                .collect::<Result<Vec<Event>>>()?;
            events.push(history);
        }

        let n_step_lists = unpacker.length(1)?;
        if n_step_lists != n_steps {
            return Err(EpiError::PackError(format!(
                "Buffer holds {n_step_lists} steps, expected {n_steps}"
            )));
        }
        let mut step_events = Vec::with_capacity(n_steps);
        for _ in 0..n_steps {
            let n_references = unpacker.length(2)?;
            let references = (0..n_references)
                .map(|_| -> Result<EventRef> {
                    let individual = unpacker.bounded_index(n_individuals)?;
                    let index = unpacker.bounded_index(events[individual].len())?;
                    Ok(EventRef { individual, index })
                })
                .collect::<Result<Vec<EventRef>>>()?;
            step_events.push(references);
        }

        let horizon = unpacker.value()?;
        let n_buckets = unpacker.length(2)?;
        let mut buckets = Vec::with_capacity(n_buckets);
        let mut consumed = Vec::with_capacity(n_buckets);
        for _ in 0..n_buckets {
            let n_scheduled = unpacker.length(3)?;
            let bucket = (0..n_scheduled)
                .map(|_| -> Result<ScheduledEvent> {
                    Ok(ScheduledEvent {
                        individual: unpacker.bounded_index(n_individuals)?,
                        transition: unpacker.bounded_index(n_transitions)?,
                        time: unpacker.value()?,
                    })
                })
                .collect::<Result<Vec<ScheduledEvent>>>()?;
            consumed.push(unpacker.bounded_index(bucket.len() + 1)?);
            buckets.push(bucket);
        }
        let cursor = unpacker.bounded_index(n_buckets + 1)?;
        let timeline = EventTimeline::from_parts(horizon, buckets, consumed, cursor);

        let n_cells = unpacker.index()?;
        let n_infectivity_steps = unpacker.index()?;
        if n_cells != population.n_age_cells() || n_infectivity_steps != n_steps {
            return Err(EpiError::PackError(
                "Infectivity map does not match population".to_string(),
            ));
        }
        let steps = (0..n_steps)
            .map(|_| (0..n_cells).map(|_| unpacker.value()).collect::<Result<Vec<f64>>>())
            .collect::<Result<Vec<Vec<f64>>>>()?;
        let infectivity = InfectivityMap::from_steps(n_cells, steps);

        let rate = unpacker.table()?;
        let mass = unpacker.table()?;
        let rate_tree = RateTree::from_levels(population.partition().clone(), rate, mass)?;

        unpacker.finish()?;

        Ok(Self {
            parameters,
            derived,
            events,
            timeline,
            step_events,
            infectivity,
            rate_tree,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::coupling::Coupler;
    use crate::core::model::INFECTION;
    use crate::core::testing::{build, seir_settings};
    use rand::prelude::*;
    use rand_chacha::ChaCha8Rng;
    use std::sync::Arc;

    #[test]
    fn unpacker_rejects_malformed() {
        let mut unpacker = Unpacker::new(&[1.5]);
        assert!(unpacker.index().is_err());
        let mut unpacker = Unpacker::new(&[-1.]);
        assert!(unpacker.index().is_err());
        let mut unpacker = Unpacker::new(&[3., 1., 2.]);
        assert!(unpacker.values().is_err());
        let unpacker = Unpacker::new(&[0.]);
        assert!(unpacker.finish().is_err());
    }

    #[test]
    fn trajectory_round_trip() {
        let (model, population) = build(&seir_settings());
        let (model, population) = (Arc::new(model), Arc::new(population));
        let mut coupler = Coupler::new(model.clone(), population.clone(), false);
        let mut rng = ChaCha8Rng::seed_from_u64(13);
        let trajectory = coupler
            .simulate(&model.default_parameters(), &mut rng)
            .unwrap();
        assert!(trajectory.n_infections() > 0);

        let buffer = trajectory.serialize();
        let restored = Trajectory::deserialize(&buffer, &model, &population).unwrap();
        assert_eq!(restored, trajectory);
        assert_eq!(restored.serialize(), buffer);
    }

    #[test]
    fn truncated_buffer_fails() {
        let (model, population) = build(&seir_settings());
        let trajectory = Trajectory::new(&model, &population, &model.default_parameters()).unwrap();
        let buffer = trajectory.serialize();
        for cut in [1, buffer.len() / 2, buffer.len() - 1] {
            assert!(matches!(
                Trajectory::deserialize(&buffer[..cut], &model, &population),
                Err(EpiError::PackError(_))
            ));
        }
        let mut extended = buffer.clone();
        extended.push(0.);
        assert!(Trajectory::deserialize(&extended, &model, &population).is_err());
    }

    #[test]
    fn period_out_of_range_fails() {
        let (model, population) = build(&seir_settings());
        let mut trajectory =
            Trajectory::new(&model, &population, &model.default_parameters()).unwrap();
        let period = model.periods.len() - 1;
        let infection = Event {
            transition: INFECTION,
            time: 1.5,
            period,
        };
        trajectory.add_individual(&model, 0, vec![infection]);
        let buffer = trajectory.serialize();
        assert!(Trajectory::deserialize(&buffer, &model, &population).is_ok());

        let mut trajectory =
            Trajectory::new(&model, &population, &model.default_parameters()).unwrap();
        let period = model.periods.len();
        let infection = Event {
            transition: INFECTION,
            time: 1.5,
            period,
        };
        trajectory.add_individual(&model, 0, vec![infection]);
        let buffer = trajectory.serialize();
        assert!(matches!(
            Trajectory::deserialize(&buffer, &model, &population),
            Err(EpiError::PackError(_))
        ));
    }

    #[test]
    fn foreign_model_fails() {
        let (model, population) = build(&seir_settings());
        let trajectory = Trajectory::new(&model, &population, &model.default_parameters()).unwrap();
        let buffer = trajectory.serialize();
        let mut settings = seir_settings();
        settings.model.steps = 20;
        let (other, _) = build(&settings);
        assert!(matches!(
            Trajectory::deserialize(&buffer, &other, &population),
            Err(EpiError::PackError(_))
        ));
    }
}
