use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;

/// Observed numbers of a transition within time windows.
#[derive(Clone, Debug, PartialEq)]
pub struct Observations {
    table: Vec<ObservationRecord>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ObservationRecord {
    pub transition: String,
    pub start: f64,
    pub end: f64,
    pub count: f64,
}

#[derive(Debug)]
pub enum ObservationsError {
    IoError(std::io::Error),
    CsvError(csv::Error),
    InvalidWindow(usize),
}

impl std::error::Error for ObservationsError {}

impl std::fmt::Display for ObservationsError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObservationsError::IoError(error) => write!(formatter, "IO error: {}", error),
            ObservationsError::CsvError(error) => write!(formatter, "CSV error: {}", error),
            ObservationsError::InvalidWindow(row) => {
                write!(formatter, "Observation {row} ends before it starts")
            }
        }
    }
}

impl Observations {
    pub fn read(filename: &str) -> Result<Self, ObservationsError> {
        let mut reader = BufReader::new(File::open(filename).map_err(ObservationsError::IoError)?);
        Observations::from_reader(&mut reader)
    }

    pub fn from_reader(reader: &mut dyn std::io::Read) -> Result<Self, ObservationsError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .from_reader(reader);

        let table: Vec<ObservationRecord> = reader
            .deserialize()
            .collect::<Result<Vec<ObservationRecord>, csv::Error>>()
            .map_err(ObservationsError::CsvError)?;

        Self::from_vec(table)
    }

    pub fn from_vec(table: Vec<ObservationRecord>) -> Result<Self, ObservationsError> {
        if let Some(row) = table.iter().position(|record| record.end < record.start) {
            return Err(ObservationsError::InvalidWindow(row));
        }
        Ok(Self { table })
    }

    pub fn records(&self) -> &[ObservationRecord] {
        &self.table
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl ObservationRecord {
    pub fn new(transition: &str, start: f64, end: f64, count: f64) -> Self {
        Self {
            transition: transition.to_string(),
            start,
            end,
            count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_table() {
        let content = r#"transition;start;end;count
I->R;0;7;12
I->R;7;14;30"#;

        let observations = Observations::from_reader(&mut content.as_bytes()).unwrap();
        assert_eq!(
            observations.records(),
            &[
                ObservationRecord::new("I->R", 0., 7., 12.),
                ObservationRecord::new("I->R", 7., 14., 30.),
            ]
        );
    }

    #[test]
    fn invalid_window() {
        let content = r#"transition;start;end;count
I->R;7;0;12"#;

        assert!(matches!(
            Observations::from_reader(&mut content.as_bytes()),
            Err(ObservationsError::InvalidWindow(0))
        ));
    }
}
