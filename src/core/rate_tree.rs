//! Hierarchical rate tree
//!
//! The rate tree mirrors the population partition and stores, for every node, the aggregate
//! infection rate and the aggregate susceptible mass of all leaves below it. Point updates walk
//! from a leaf to the root, and sampling descends from the root to a leaf, such that both are
//! O(depth).

use rand::prelude::*;
use rand_distr::Exp1;
use smallvec::SmallVec;
use std::sync::Arc;

use super::partition::PopulationPartition;
use crate::errors::{EpiError, Result};

/// Aggregates at or below this value are treated as zero.
pub const EPSILON: f64 = 1e-12;

/// Relative tolerance of the aggregate invariant.
const TOLERANCE: f64 = 1e-8;

/// Which aggregate a sampling operation is weighted by.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    Rate,
    SusceptibleMass,
}

#[derive(Clone, Debug)]
pub struct RateTree {
    partition: Arc<PopulationPartition>,
    rate: Vec<Vec<f64>>,
    mass: Vec<Vec<f64>>,
}

impl PartialEq for RateTree {
    fn eq(&self, other: &Self) -> bool {
        self.rate == other.rate && self.mass == other.mass
    }
}

impl RateTree {
    pub fn new(partition: Arc<PopulationPartition>) -> Self {
        let rate: Vec<Vec<f64>> = (0..partition.n_levels())
            .map(|level| vec![0.; partition.level_size(level)])
            .collect();
        let mass = rate.clone();
        Self {
            partition,
            rate,
            mass,
        }
    }

    pub fn partition(&self) -> &Arc<PopulationPartition> {
        &self.partition
    }

    pub fn root_rate(&self) -> f64 {
        self.rate[0][0]
    }

    pub fn root_mass(&self) -> f64 {
        self.mass[0][0]
    }

    pub fn leaf_rate(&self, leaf: usize) -> f64 {
        self.rate[self.partition.leaf_level()][leaf]
    }

    pub fn leaf_mass(&self, leaf: usize) -> f64 {
        self.mass[self.partition.leaf_level()][leaf]
    }

    pub fn aggregate(&self, channel: Channel, level: usize, index: usize) -> f64 {
        match channel {
            Channel::Rate => self.rate[level][index],
            Channel::SusceptibleMass => self.mass[level][index],
        }
    }

    /// Add the deltas to a leaf and all of its ancestors.
    pub fn update(&mut self, leaf: usize, delta_rate: f64, delta_mass: f64) {
        let mut level = self.partition.leaf_level();
        let mut index = leaf;
        loop {
            self.rate[level][index] += delta_rate;
            self.mass[level][index] += delta_mass;
            match self.partition.parent(level, index) {
                Some(parent) => {
                    index = parent;
                    level -= 1;
                }
                None => break,
            }
        }
    }

    /// Overwrite all leaves and rebuild every aggregate from them.
    pub fn set_leaves(&mut self, rates: &[f64], masses: &[f64]) {
        let leaf_level = self.partition.leaf_level();
        self.rate[leaf_level].copy_from_slice(rates);
        self.mass[leaf_level].copy_from_slice(masses);
        for level in (0..leaf_level).rev() {
            for index in 0..self.partition.level_size(level) {
                let children = self.partition.children(level, index);
                self.rate[level][index] = children.iter().map(|&c| self.rate[level + 1][c]).sum();
                self.mass[level][index] = children.iter().map(|&c| self.mass[level + 1][c]).sum();
            }
        }
    }

    pub fn clear(&mut self) {
        self.rate.iter_mut().for_each(|level| level.fill(0.));
        self.mass.iter_mut().for_each(|level| level.fill(0.));
    }

    /// Sample a child of a node proportional to the children's aggregates.
    ///
    /// Returns `None` if the node's children carry no weight.
    pub fn sample_child<R: Rng + ?Sized>(
        &self,
        level: usize,
        index: usize,
        channel: Channel,
        rng: &mut R,
    ) -> Result<Option<usize>> {
        let children = self.partition.children(level, index);
        let mut cumulative: SmallVec<[f64; 8]> = SmallVec::with_capacity(children.len());
        let mut total = 0.;
        for &child in children {
            total += self.aggregate(channel, level + 1, child).max(0.);
            cumulative.push(total);
        }
        if total <= EPSILON {
            return Ok(None);
        }

        let draw = rng.random::<f64>() * total;
        match cumulative.iter().position(|&sum| sum > draw) {
            Some(position) => Ok(Some(children[position])),
            None => Err(EpiError::SamplingExhaustion(format!(
                "No child of node ({level}, {index}) found for {draw} of {total}"
            ))),
        }
    }

    /// Descend from the root to a leaf, weighted by the given channel.
    pub fn sample_leaf<R: Rng + ?Sized>(
        &self,
        channel: Channel,
        rng: &mut R,
    ) -> Result<Option<usize>> {
        if self.aggregate(channel, 0, 0) <= EPSILON {
            return Ok(None);
        }
        let mut index = 0;
        for level in 0..self.partition.leaf_level() {
            index = match self.sample_child(level, index, channel, rng)? {
                Some(child) => child,
                None => {
                    return Err(EpiError::SamplingExhaustion(format!(
                        "Node ({level}, {index}) has positive aggregate but empty children"
                    )));
                }
            };
        }
        Ok(Some(index))
    }

    /// Check that every node equals the sum of its children.
    pub fn verify(&self) -> Result<()> {
        for level in 0..self.partition.leaf_level() {
            for index in 0..self.partition.level_size(level) {
                let children = self.partition.children(level, index);
                for (name, values) in [("rate", &self.rate), ("mass", &self.mass)] {
                    let sum: f64 = children.iter().map(|&c| values[level + 1][c]).sum();
                    let value = values[level][index];
                    if (sum - value).abs() > TOLERANCE * (1. + sum.abs()) {
                        return Err(EpiError::NumericConsistencyViolation(format!(
                            "Node ({level}, {index}) {name} {value} differs from children {sum}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) fn levels(&self) -> (&[Vec<f64>], &[Vec<f64>]) {
        (&self.rate, &self.mass)
    }

    pub(crate) fn from_levels(
        partition: Arc<PopulationPartition>,
        rate: Vec<Vec<f64>>,
        mass: Vec<Vec<f64>>,
    ) -> Result<Self> {
        let shape_matches = |values: &Vec<Vec<f64>>| {
            values.len() == partition.n_levels()
                && values
                    .iter()
                    .enumerate()
                    .all(|(level, values)| values.len() == partition.level_size(level))
        };
        if !shape_matches(&rate) || !shape_matches(&mass) {
            return Err(EpiError::PackError(
                "Rate tree shape does not match partition".to_string(),
            ));
        }
        Ok(Self {
            partition,
            rate,
            mass,
        })
    }
}

/// Draw the time of the next event of a Poisson process with the given rate.
///
/// Returns `None` if the rate is too small for an event to occur.
pub fn next_event_time<R: Rng + ?Sized>(current: f64, rate: f64, rng: &mut R) -> Option<f64> {
    if rate <= EPSILON {
        return None;
    }
    let waiting: f64 = Exp1.sample(rng);
    Some(current + waiting / rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha8Rng;

    fn partition(n_areas: usize) -> Arc<PopulationPartition> {
        let coordinates: Vec<(f64, f64)> = (0..n_areas).map(|i| (i as f64, 0.)).collect();
        let members = (0..n_areas).map(|i| vec![i]).collect();
        Arc::new(PopulationPartition::build(&coordinates, 1, members, 2).unwrap())
    }

    #[test]
    fn update_propagates_to_root() {
        let mut tree = RateTree::new(partition(7));
        tree.update(3, 1.5, 2.);
        tree.update(5, 0.5, 1.);
        tree.update(3, -0.5, -1.);
        assert_eq!(tree.root_rate(), 1.5);
        assert_eq!(tree.root_mass(), 2.);
        assert_eq!(tree.leaf_rate(3), 1.);
        tree.verify().unwrap();
    }

    #[test]
    fn invariant_after_random_updates() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut tree = RateTree::new(partition(17));
        let mut leaves = vec![0.; 17];
        for _ in 0..1000 {
            let leaf = rng.random_range(0..17);
            let delta = rng.random::<f64>() - 0.4;
            tree.update(leaf, delta, 0.);
            leaves[leaf] += delta;
        }
        tree.verify().unwrap();
        let total: f64 = leaves.iter().sum();
        assert!((tree.root_rate() - total).abs() < 1e-9);
    }

    #[test]
    fn set_leaves_rebuilds() {
        let mut tree = RateTree::new(partition(5));
        tree.set_leaves(&[1., 2., 3., 4., 5.], &[0., 0., 1., 0., 0.]);
        assert_eq!(tree.root_rate(), 15.);
        assert_eq!(tree.root_mass(), 1.);
        tree.verify().unwrap();
    }

    #[test]
    fn zero_rate_has_no_event() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let tree = RateTree::new(partition(4));
        assert_eq!(next_event_time(0., tree.root_rate(), &mut rng), None);
        assert_eq!(next_event_time(0., tree.root_mass(), &mut rng), None);
        assert_eq!(tree.sample_leaf(Channel::Rate, &mut rng).unwrap(), None);
        assert_eq!(
            tree.sample_leaf(Channel::SusceptibleMass, &mut rng).unwrap(),
            None
        );
    }

    #[test]
    fn next_event_time_is_later() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..100 {
            let time = next_event_time(2., 5., &mut rng).unwrap();
            assert!(time >= 2.);
        }
    }

    #[test]
    fn channels_are_independent() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut tree = RateTree::new(partition(4));
        tree.update(1, 1., 0.);
        tree.update(2, 0., 1.);
        for _ in 0..50 {
            assert_eq!(tree.sample_leaf(Channel::Rate, &mut rng).unwrap(), Some(1));
            assert_eq!(
                tree.sample_leaf(Channel::SusceptibleMass, &mut rng).unwrap(),
                Some(2)
            );
        }
    }

    #[test]
    fn asymmetric_areas_sampled_by_rate_ratio() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut tree = RateTree::new(partition(2));
        tree.update(0, 1., 0.);
        tree.update(1, 3., 0.);
        let trials = 40_000;
        let hits = (0..trials)
            .filter(|_| tree.sample_leaf(Channel::Rate, &mut rng).unwrap() == Some(0))
            .count();
        let frequency = hits as f64 / trials as f64;
        assert!((frequency - 0.25).abs() < 0.015, "frequency {frequency}");
    }
}
