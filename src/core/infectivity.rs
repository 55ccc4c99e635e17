//! Infectivity map
//!
//! The infectivity map holds, per age cell, the transmission pressure of all infectious
//! individuals spread through the mixing tensor. It is piecewise constant over the steps of the
//! model: the value of step `s` accounts for every transition before the start of `s`.
//!
//! Changes are collected in an [`InfectivityBuffer`] keyed by source cell and mixing matrix and
//! flushed through the mixing rows once per step.

use smallvec::SmallVec;

use super::mixing::{MixingRow, MixingTensor};
use super::model::Model;

#[derive(Clone, Debug, PartialEq)]
pub struct InfectivityMap {
    n_cells: usize,
    steps: Vec<Vec<f64>>,
}

impl InfectivityMap {
    pub fn new(n_steps: usize, n_cells: usize) -> Self {
        Self {
            n_cells,
            steps: vec![vec![0.; n_cells]; n_steps],
        }
    }

    pub fn n_cells(&self) -> usize {
        self.n_cells
    }

    pub fn n_steps(&self) -> usize {
        self.steps.len()
    }

    pub fn step(&self, step: usize) -> &[f64] {
        &self.steps[step]
    }

    pub fn set_step(&mut self, step: usize, values: &[f64]) {
        self.steps[step].copy_from_slice(values);
    }

    pub fn clear(&mut self) {
        self.steps.iter_mut().for_each(|values| values.fill(0.));
    }

    pub(crate) fn from_steps(n_cells: usize, steps: Vec<Vec<f64>>) -> Self {
        Self { n_cells, steps }
    }
}

/// Add `net * weight` to every destination of a mixing row.
pub fn apply_delta(target: &mut [f64], net: f64, row: &MixingRow) {
    if net == 0. {
        return;
    }
    for &(destination, weight) in row {
        target[destination] += net * weight;
    }
}

/// Infectivity changes of a transition as (matrix, factor) pairs.
///
/// The infectivity of the source compartment is removed through its matrix in `period`, the
/// infectivity of the target compartment is added through its matrix. A period marker adds
/// through the matrix of the following period.
pub fn contributions(
    model: &Model,
    transition: usize,
    period: usize,
    weight: f64,
) -> SmallVec<[(usize, f64); 2]> {
    let transition = &model.transitions[transition];
    let mut result: SmallVec<[(usize, f64); 2]> = SmallVec::new();

    let from = &model.compartments[transition.from];
    if from.infectivity != 0. {
        if let Some(matrix) = model.mixing.matrix(period, transition.from) {
            result.push((matrix, -weight * from.infectivity));
        }
    }

    let to = &model.compartments[transition.to];
    let next_period = match transition.is_marker() {
        true => (period + 1).min(model.periods.len() - 1),
        false => period,
    };
    if to.infectivity != 0. {
        if let Some(matrix) = model.mixing.matrix(next_period, transition.to) {
            match result.iter_mut().find(|(m, _)| *m == matrix) {
                Some(entry) => entry.1 += weight * to.infectivity,
                None => result.push((matrix, weight * to.infectivity)),
            }
        }
    }

    result.retain(|(_, factor)| *factor != 0.);
    result
}

/// Infectivity changes waiting to be spread through the mixing tensor.
#[derive(Clone, Debug)]
pub struct InfectivityBuffer {
    n_cells: usize,
    factors: Vec<f64>,
    marked: Vec<bool>,
    dirty: Vec<usize>,
}

impl InfectivityBuffer {
    pub fn new(n_matrices: usize, n_cells: usize) -> Self {
        Self {
            n_cells,
            factors: vec![0.; n_matrices * n_cells],
            marked: vec![false; n_matrices * n_cells],
            dirty: Vec::new(),
        }
    }

    pub fn add(&mut self, matrix: usize, cell: usize, factor: f64) {
        let key = matrix * self.n_cells + cell;
        if !self.marked[key] {
            self.marked[key] = true;
            self.dirty.push(key);
        }
        self.factors[key] += factor;
    }

    pub fn is_empty(&self) -> bool {
        self.dirty.is_empty()
    }

    /// Spread all buffered changes and reset the buffer.
    ///
    /// `apply` receives every (destination cell, delta) pair.
    pub fn flush(&mut self, mixing: &MixingTensor, mut apply: impl FnMut(usize, f64)) {
        for &key in self.dirty.iter() {
            let factor = self.factors[key];
            self.factors[key] = 0.;
            self.marked[key] = false;
            if factor == 0. {
                continue;
            }
            let (matrix, cell) = (key / self.n_cells, key % self.n_cells);
            for &(destination, weight) in mixing.row(matrix, cell) {
                apply(destination, factor * weight);
            }
        }
        self.dirty.clear();
    }

    pub fn clear(&mut self) {
        for &key in self.dirty.iter() {
            self.factors[key] = 0.;
            self.marked[key] = false;
        }
        self.dirty.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mixing::SparseMatrix;
    use crate::core::testing::{build, seir_settings};
    use rand::prelude::*;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn apply_delta_spreads() {
        let mut target = vec![0.; 4];
        let matrix = SparseMatrix::local(2, &[vec![1., 0.5], vec![0.5, 1.]]);
        apply_delta(&mut target, 2., matrix.row(1));
        assert_eq!(target, vec![1., 2., 0., 0.]);
        apply_delta(&mut target, 0., matrix.row(2));
        assert_eq!(target, vec![1., 2., 0., 0.]);
    }

    #[test]
    fn transition_contributions() {
        let (model, _) = build(&seir_settings());
        let e_to_i = model.transition_index("E->I").unwrap();
        let i_to_h = model.transition_index("I->H").unwrap();
        let matrix_i = model.mixing.matrix(0, 2).unwrap();

        // becoming infectious adds
        assert_eq!(contributions(&model, e_to_i, 0, 1.).as_slice(), &[(matrix_i, 1.)]);
        // H does not mix in the first period
        assert_eq!(
            contributions(&model, i_to_h, 0, 0.5).as_slice(),
            &[(matrix_i, -0.5)]
        );
        // the infection itself is free
        assert!(contributions(&model, 0, 0, 1.).is_empty());
        // I keeps its matrix across periods, the marker cancels
        let marker_i = model.compartments[2].marker;
        assert!(contributions(&model, marker_i, 0, 1.).is_empty());
        // H starts mixing with the second period
        let marker_h = model.compartments[3].marker;
        let matrix_h = model.mixing.matrix(1, 3).unwrap();
        assert_eq!(
            contributions(&model, marker_h, 0, 1.).as_slice(),
            &[(matrix_h, 0.2)]
        );
    }

    #[test]
    fn batching_matches_sequential() {
        let (model, population) = build(&seir_settings());
        let n_cells = population.n_age_cells();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut buffer = InfectivityBuffer::new(model.mixing.n_matrices(), n_cells);
        let mut sequential = vec![0.; n_cells];
        let mut batched = vec![0.; n_cells];

        for _ in 0..200 {
            let matrix = rng.random_range(0..model.mixing.n_matrices());
            let cell = rng.random_range(0..n_cells);
            let factor = rng.random::<f64>() - 0.5;
            buffer.add(matrix, cell, factor);
            apply_delta(&mut sequential, factor, model.mixing.row(matrix, cell));
        }
        buffer.flush(&model.mixing, |destination, delta| batched[destination] += delta);

        assert!(buffer.is_empty());
        for (a, b) in sequential.iter().zip(batched.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }
}
