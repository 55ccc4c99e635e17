//! Sparse mixing tensor
//!
//! A mixing matrix maps infectivity in a source area × age cell to weighted contributions in
//! destination cells. The tensor holds one optional matrix per (time period, compartment).

use crate::config::{MatrixDefinition, MatrixEntry};
use crate::errors::{EpiError, Result};

pub type MixingRow = [(usize, f64)];

#[derive(Clone, Debug, PartialEq)]
pub struct SparseMatrix {
    rows: Vec<Vec<(usize, f64)>>,
}

impl SparseMatrix {
    pub fn from_entries(n_cells: usize, entries: &[MatrixEntry]) -> Result<Self> {
        let mut rows = vec![Vec::new(); n_cells];
        for entry in entries {
            if entry.source >= n_cells || entry.destination >= n_cells {
                return Err(EpiError::InitializationError(format!(
                    "Matrix entry ({}, {}) outside of {n_cells} cells",
                    entry.source, entry.destination
                )));
            }
            rows[entry.source].push((entry.destination, entry.weight));
        }
        Ok(Self { rows })
    }

    /// Mixing within areas only.
    pub fn local(n_areas: usize, ages: &[Vec<f64>]) -> Self {
        let n_ages = ages.len();
        let rows = (0..n_areas)
            .flat_map(move |area| {
                ages.iter().map(move |contacts| {
                    contacts
                        .iter()
                        .enumerate()
                        .filter(|(_, weight)| **weight != 0.)
                        .map(|(age, &weight)| (area * n_ages + age, weight))
                        .collect()
                })
            })
            .collect();
        Self { rows }
    }

    /// Uniform mixing between all areas.
    pub fn homogeneous(n_areas: usize, ages: &[Vec<f64>]) -> Self {
        let n_ages = ages.len();
        let scale = 1. / n_areas as f64;
        let rows = (0..n_areas)
            .flat_map(move |_| {
                ages.iter().map(move |contacts| {
                    (0..n_areas)
                        .flat_map(move |destination| {
                            contacts
                                .iter()
                                .enumerate()
                                .filter(|(_, weight)| **weight != 0.)
                                .map(move |(age, &weight)| {
                                    (destination * n_ages + age, weight * scale)
                                })
                        })
                        .collect()
                })
            })
            .collect();
        Self { rows }
    }

    pub fn from_definition(
        definition: &MatrixDefinition,
        n_areas: usize,
        n_ages: usize,
    ) -> Result<Self> {
        let check_ages = |ages: &[Vec<f64>]| {
            if ages.len() != n_ages || ages.iter().any(|row| row.len() != n_ages) {
                return Err(EpiError::InitializationError(format!(
                    "Age mixing must be a {n_ages}x{n_ages} matrix"
                )));
            }
            Ok(())
        };
        match definition {
            MatrixDefinition::Local { ages } => {
                check_ages(ages)?;
                Ok(Self::local(n_areas, ages))
            }
            MatrixDefinition::Homogeneous { ages } => {
                check_ages(ages)?;
                Ok(Self::homogeneous(n_areas, ages))
            }
            MatrixDefinition::Explicit { entries } => {
                Self::from_entries(n_areas * n_ages, entries)
            }
        }
    }

    pub fn n_cells(&self) -> usize {
        self.rows.len()
    }

    pub fn row(&self, cell: usize) -> &MixingRow {
        &self.rows[cell]
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MixingTensor {
    matrices: Vec<SparseMatrix>,
    lookup: Vec<Vec<Option<usize>>>,
}

impl MixingTensor {
    pub fn new(n_periods: usize, n_compartments: usize) -> Self {
        Self {
            matrices: Vec::new(),
            lookup: vec![vec![None; n_compartments]; n_periods],
        }
    }

    /// Use the matrix for a compartment in the given periods.
    pub fn insert(&mut self, periods: &[usize], compartment: usize, matrix: SparseMatrix) {
        let index = self.matrices.len();
        self.matrices.push(matrix);
        for &period in periods {
            self.lookup[period][compartment] = Some(index);
        }
    }

    /// Matrix of a compartment in a period, if the compartment mixes at all.
    pub fn matrix(&self, period: usize, compartment: usize) -> Option<usize> {
        self.lookup
            .get(period)
            .and_then(|compartments| compartments[compartment])
    }

    pub fn n_matrices(&self) -> usize {
        self.matrices.len()
    }

    pub fn row(&self, matrix: usize, cell: usize) -> &MixingRow {
        self.matrices[matrix].row(cell)
    }
}
