//! Population module
//!
//! The population is a fixed set of individuals, each living in an area and belonging to a
//! demographic position. Individuals are numbered area by area and, within an area, position by
//! position. Two kinds of cells index population data:
//!
//! - demographic cells `w = area * n_demographics + dp`, holding individuals,
//! - age cells `v = area * n_ages + age`, holding infectivity.
//!

use std::sync::Arc;

use crate::config::PopulationDefinition;
use crate::errors::{EpiError, Result};

use super::model::Model;
use super::partition::PopulationPartition;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Individual {
    pub area: usize,
    pub demographic: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Demographic {
    pub name: String,
    pub age: usize,
    pub susceptibility: Vec<usize>,
    pub infectivity: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Area {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub covariates: Vec<f64>,
}

#[derive(Clone, Debug)]
pub struct Population {
    pub individuals: Vec<Individual>,
    pub areas: Vec<Area>,
    pub demographics: Vec<Demographic>,
    pub n_ages: usize,
    partition: Arc<PopulationPartition>,
}

impl Population {
    pub fn from_definition(definition: &PopulationDefinition, model: &Model) -> Result<Self> {
        let n_ages = definition.ages.len();
        let n_demographics = definition.demographics.len();
        if n_ages == 0 || n_demographics == 0 {
            return Err(EpiError::InitializationError(
                "Population requires at least one age and one demographic position".to_string(),
            ));
        }

        let demographics = definition
            .demographics
            .iter()
            .map(|demographic| {
                let age = definition
                    .ages
                    .iter()
                    .position(|age| age == &demographic.age)
                    .ok_or_else(|| {
                        EpiError::InitializationError(format!("Unknown age `{}`", demographic.age))
                    })?;
                let susceptibility = demographic
                    .susceptibility
                    .iter()
                    .map(|name| model.parameter_index(name))
                    .collect::<Result<Vec<usize>>>()?;
                Ok(Demographic {
                    name: demographic.name.clone(),
                    age,
                    susceptibility,
                    infectivity: demographic.infectivity,
                })
            })
            .collect::<Result<Vec<Demographic>>>()?;

        let mut individuals = Vec::new();
        let mut members = Vec::with_capacity(definition.areas.len() * n_demographics);
        for (area, area_definition) in definition.areas.iter().enumerate() {
            if area_definition.population.len() != n_demographics {
                return Err(EpiError::InitializationError(format!(
                    "Area {} lists {} demographic counts, expected {n_demographics}",
                    area_definition.name,
                    area_definition.population.len()
                )));
            }
            for (demographic, &count) in area_definition.population.iter().enumerate() {
                members.push((individuals.len()..individuals.len() + count).collect());
                individuals.extend((0..count).map(|_| Individual { area, demographic }));
            }
        }

        let areas: Vec<Area> = definition
            .areas
            .iter()
            .map(|area| Area {
                name: area.name.clone(),
                x: area.x,
                y: area.y,
                covariates: area.covariates.clone(),
            })
            .collect();

        let coordinates: Vec<(f64, f64)> = areas.iter().map(|area| (area.x, area.y)).collect();
        let partition = PopulationPartition::build(
            &coordinates,
            n_demographics,
            members,
            definition.branching,
        )?;

        log::debug!(
            "Created population of {} individuals in {} areas",
            individuals.len(),
            areas.len()
        );

        Ok(Self {
            individuals,
            areas,
            demographics,
            n_ages,
            partition: Arc::new(partition),
        })
    }

    pub fn partition(&self) -> &Arc<PopulationPartition> {
        &self.partition
    }

    pub fn len(&self) -> usize {
        self.individuals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.individuals.is_empty()
    }

    pub fn n_areas(&self) -> usize {
        self.areas.len()
    }

    pub fn n_demographics(&self) -> usize {
        self.demographics.len()
    }

    /// Number of demographic cells.
    pub fn n_cells(&self) -> usize {
        self.areas.len() * self.demographics.len()
    }

    /// Number of age cells.
    pub fn n_age_cells(&self) -> usize {
        self.areas.len() * self.n_ages
    }

    /// Demographic cell of an individual.
    pub fn cell(&self, individual: usize) -> usize {
        let Individual { area, demographic } = self.individuals[individual];
        area * self.demographics.len() + demographic
    }

    /// Age cell of an individual.
    pub fn age_cell(&self, individual: usize) -> usize {
        let Individual { area, demographic } = self.individuals[individual];
        area * self.n_ages + self.demographics[demographic].age
    }

    pub fn age(&self, individual: usize) -> usize {
        self.demographics[self.individuals[individual].demographic].age
    }

    /// Individuals of a demographic cell.
    pub fn members(&self, cell: usize) -> &[usize] {
        let n_demographics = self.demographics.len();
        self.partition
            .members(cell / n_demographics, cell % n_demographics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::seir_settings;

    #[test]
    fn individuals_numbered_by_cell() {
        let settings = seir_settings();
        let model = Model::from_definition(&settings.model, &settings.population).unwrap();
        let population = Population::from_definition(&settings.population, &model).unwrap();

        let expected: usize = settings
            .population
            .areas
            .iter()
            .map(|area| area.population.iter().sum::<usize>())
            .sum();
        assert_eq!(population.len(), expected);

        for cell in 0..population.n_cells() {
            for &individual in population.members(cell) {
                assert_eq!(population.cell(individual), cell);
            }
        }
        let total: usize = (0..population.n_cells())
            .map(|cell| population.members(cell).len())
            .sum();
        assert_eq!(total, population.len());
    }

    #[test]
    fn age_cells() {
        let settings = seir_settings();
        let model = Model::from_definition(&settings.model, &settings.population).unwrap();
        let population = Population::from_definition(&settings.population, &model).unwrap();
        for individual in 0..population.len() {
            let area = population.individuals[individual].area;
            assert_eq!(
                population.age_cell(individual),
                area * population.n_ages + population.age(individual)
            );
        }
    }

    #[test]
    fn rejects_unknown_age() {
        let mut settings = seir_settings();
        settings.population.demographics[0].age = "elderly".to_string();
        let model = Model::from_definition(&settings.model, &settings.population).unwrap();
        assert!(Population::from_definition(&settings.population, &model).is_err());
    }
}
