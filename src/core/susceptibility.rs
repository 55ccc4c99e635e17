//! Tri-partition susceptibility lists
//!
//! During a coupling pass every individual is susceptible in both trajectories, only in the
//! proposed one, or in neither. Each (demographic cell, status) pair owns a dense list of
//! individuals and every individual knows its slot in the list holding it, such that
//! `lists[status][cell][slot[i]] == i` for all individuals. All mutation goes through
//! [`SusceptibilityLists::set_status`] and [`SusceptibilityLists::reset`], which keep this
//! contract.

use crate::errors::{EpiError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    BothSusceptible = 0,
    ProposedOnlySusceptible = 1,
    NotSusceptible = 2,
}

const STATUSES: [Status; 3] = [
    Status::BothSusceptible,
    Status::ProposedOnlySusceptible,
    Status::NotSusceptible,
];

#[derive(Clone, Debug)]
pub struct SusceptibilityLists {
    cell: Vec<usize>,
    status: Vec<Status>,
    slot: Vec<usize>,
    lists: [Vec<Vec<usize>>; 3],
    moved: Vec<usize>,
}

impl SusceptibilityLists {
    /// Create the lists with every individual susceptible in both trajectories.
    ///
    /// `cells[i]` is the demographic cell of individual `i`.
    pub fn new(cells: Vec<usize>, n_cells: usize) -> Self {
        let mut lists: [Vec<Vec<usize>>; 3] = [
            vec![Vec::new(); n_cells],
            vec![Vec::new(); n_cells],
            vec![Vec::new(); n_cells],
        ];
        let mut slot = vec![0; cells.len()];
        for (individual, &cell) in cells.iter().enumerate() {
            slot[individual] = lists[0][cell].len();
            lists[0][cell].push(individual);
        }
        Self {
            status: vec![Status::BothSusceptible; cells.len()],
            cell: cells,
            slot,
            lists,
            moved: Vec::new(),
        }
    }

    pub fn status(&self, individual: usize) -> Status {
        self.status[individual]
    }

    pub fn count(&self, cell: usize, status: Status) -> usize {
        self.lists[status as usize][cell].len()
    }

    pub fn members(&self, cell: usize, status: Status) -> &[usize] {
        &self.lists[status as usize][cell]
    }

    pub fn n_individuals(&self) -> usize {
        self.status.len()
    }

    /// Move an individual to the list of another status.
    pub fn set_status(&mut self, individual: usize, status: Status) {
        let current = self.status[individual];
        if current == status {
            return;
        }
        let cell = self.cell[individual];

        // swap with last
        let list = &mut self.lists[current as usize][cell];
        let slot = self.slot[individual];
        let last = list.len() - 1;
        list.swap(slot, last);
        list.pop();
        if slot < last {
            let swapped = list[slot];
            self.slot[swapped] = slot;
        }

        let list = &mut self.lists[status as usize][cell];
        self.slot[individual] = list.len();
        list.push(individual);

        if current == Status::BothSusceptible {
            self.moved.push(individual);
        }
        self.status[individual] = status;
    }

    /// Return every individual to `BothSusceptible`.
    pub fn reset(&mut self) {
        let moved = std::mem::take(&mut self.moved);
        for &individual in moved.iter() {
            self.set_status(individual, Status::BothSusceptible);
        }
        self.moved = moved;
        self.moved.clear();
    }

    /// Whether every individual is susceptible in both trajectories.
    pub fn is_reset(&self) -> bool {
        self.lists[1].iter().all(|list| list.is_empty())
            && self.lists[2].iter().all(|list| list.is_empty())
    }

    /// Check the membership contract for every individual.
    pub fn verify(&self) -> Result<()> {
        let total: usize = self.lists.iter().flatten().map(|list| list.len()).sum();
        if total != self.status.len() {
            return Err(EpiError::NumericConsistencyViolation(format!(
                "Lists hold {total} entries for {} individuals",
                self.status.len()
            )));
        }
        for status in STATUSES {
            for (cell, list) in self.lists[status as usize].iter().enumerate() {
                for (slot, &individual) in list.iter().enumerate() {
                    if self.status[individual] != status
                        || self.slot[individual] != slot
                        || self.cell[individual] != cell
                    {
                        return Err(EpiError::NumericConsistencyViolation(format!(
                            "Individual {individual} misplaced in list ({cell}, {status:?})"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
