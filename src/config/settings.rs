//! Settings module.

use super::chain::ChainSettings;
use super::model::ModelDefinition;
use super::population::PopulationDefinition;

use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Settings {
    pub model: ModelDefinition,
    pub population: PopulationDefinition,
    #[serde(default)]
    pub chain: ChainSettings,
}

#[derive(Debug)]
pub enum SettingsError {
    IoError(std::io::Error),
    YamlError(serde_yaml::Error),
}

impl std::error::Error for SettingsError {}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsError::IoError(error) => write!(formatter, "IO error: {}", error),
            SettingsError::YamlError(error) => write!(formatter, "YAML error: {}", error),
        }
    }
}

impl std::fmt::Display for Settings {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut output = vec![];
        self.write(&mut output).map_err(|_| std::fmt::Error)?;
        write!(
            formatter,
            "{}",
            String::from_utf8(output).map_err(|_| std::fmt::Error)?
        )
    }
}

impl Settings {
    pub fn write(&self, writer: &mut dyn std::io::Write) -> Result<(), SettingsError> {
        serde_yaml::to_writer(writer, self).map_err(SettingsError::YamlError)
    }

    pub fn read(reader: &mut dyn std::io::Read) -> Result<Settings, SettingsError> {
        serde_yaml::from_reader(reader).map_err(SettingsError::YamlError)
    }

    pub fn write_to_file(&self, filename: &str) -> Result<(), SettingsError> {
        let file = fs::File::create(filename).map_err(SettingsError::IoError)?;
        let mut writer = std::io::BufWriter::new(file);
        self.write(&mut writer)
    }

    pub fn read_from_file(filename: &str) -> Result<Settings, SettingsError> {
        let file = fs::File::open(filename).map_err(SettingsError::IoError)?;
        let mut reader = std::io::BufReader::new(file);
        Self::read(&mut reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    use crate::config::model::{
        CompartmentDefinition, DistributionDefinition, MatrixDefinition, MixingDefinition,
        ParameterDefinition, SplineKnot, TransitionDefinition,
    };
    use crate::config::population::{AreaDefinition, DemographicDefinition};

    fn settings() -> Settings {
        Settings {
            model: ModelDefinition {
                compartments: vec![
                    CompartmentDefinition {
                        name: "S".to_string(),
                        infectivity: 0.,
                    },
                    CompartmentDefinition {
                        name: "I".to_string(),
                        infectivity: 1.,
                    },
                    CompartmentDefinition {
                        name: "R".to_string(),
                        infectivity: 0.,
                    },
                ],
                infection: "I".to_string(),
                transitions: vec![TransitionDefinition {
                    from: "I".to_string(),
                    to: "R".to_string(),
                    distribution: DistributionDefinition::Exponential {
                        mean: "t_I".to_string(),
                    },
                    branch: vec![],
                }],
                parameters: vec![
                    ParameterDefinition {
                        name: "beta".to_string(),
                        min: 0.,
                        max: 1.,
                        value: Some(0.3),
                    },
                    ParameterDefinition {
                        name: "t_I".to_string(),
                        min: 1.,
                        max: 10.,
                        value: None,
                    },
                ],
                beta: vec![SplineKnot {
                    time: 0.,
                    parameter: "beta".to_string(),
                    factor: 1.,
                }],
                phi: vec![],
                area_effects: vec![],
                periods: vec![],
                mixing: vec![MixingDefinition {
                    compartment: "I".to_string(),
                    period: None,
                    matrix: MatrixDefinition::Local {
                        ages: vec![vec![1.]],
                    },
                }],
                horizon: 50.,
                steps: 50,
                infection_ceiling: 1000,
            },
            population: PopulationDefinition {
                ages: vec!["all".to_string()],
                demographics: vec![DemographicDefinition {
                    name: "all".to_string(),
                    age: "all".to_string(),
                    susceptibility: vec![],
                    infectivity: 1.,
                }],
                areas: vec![AreaDefinition {
                    name: "a".to_string(),
                    x: 0.,
                    y: 0.,
                    covariates: vec![],
                    population: vec![100],
                }],
                branching: 4,
            },
            chain: ChainSettings::default(),
        }
    }

    #[test]
    fn read_write() {
        let settings = settings();
        let mut output = vec![];
        settings.write(&mut output).unwrap();
        let settings2 = Settings::read(&mut &output[..]).unwrap();
        assert_eq!(settings, settings2);
    }

    #[test]
    #[serial]
    fn read_write_file() {
        let tmp_dir = std::env::temp_dir().join("test_epimbp_settings.yaml");
        let path = tmp_dir.to_str().unwrap();
        let settings = settings();
        settings.write_to_file(path).unwrap();
        let read_settings = Settings::read_from_file(path).unwrap();
        assert_eq!(read_settings, settings);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn defaults() {
        let content = r#"
model:
  compartments:
    - { name: S }
    - { name: I, infectivity: 1.0 }
  infection: I
  transitions: []
  parameters:
    - { name: beta, min: 0.0, max: 1.0 }
  beta:
    - { time: 0.0, parameter: beta }
  mixing: []
  horizon: 10.0
  steps: 10
population:
  ages: [all]
  demographics:
    - { name: all, age: all }
  areas:
    - { name: a, population: [10] }
"#;
        let settings = Settings::read(&mut content.as_bytes()).unwrap();
        assert_eq!(settings.model.infection_ceiling, 50000);
        assert_eq!(settings.model.beta[0].factor, 1.);
        assert_eq!(settings.population.branching, 4);
        assert_eq!(settings.population.demographics[0].infectivity, 1.);
        assert_eq!(settings.chain, ChainSettings::default());
    }
}
