use std::path::Path;

use crate::core::{Model, Trajectory};
use crate::errors::{EpiError, Result};
use crate::stats::TrajectoryStatistics;

pub trait TrajectoryIO {
    /// Write the number of individuals per compartment at the start of every step.
    fn write_compartments(&self, model: &Model, path: &Path) -> Result<()>;

    /// Write every transition of every infected individual, excluding period markers.
    fn write_events(&self, model: &Model, path: &Path) -> Result<()>;
}

fn output_error(path: &Path) -> impl Fn(csv::Error) -> EpiError + '_ {
    move |err| EpiError::OutputError(format!("Failed to write to {}: {err}", path.display()))
}

impl TrajectoryIO for Trajectory {
    fn write_compartments(&self, model: &Model, path: &Path) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .from_path(path)
            .map_err(output_error(path))?;

        let mut header = vec!["step".to_string(), "time".to_string()];
        header.extend(model.compartments.iter().map(|c| c.name.clone()));
        writer.write_record(&header).map_err(output_error(path))?;

        for (step, counts) in self.compartment_counts(model).into_iter().enumerate() {
            let mut record = vec![step.to_string(), model.step_start(step).to_string()];
            record.extend(counts.iter().map(|count| count.to_string()));
            writer.write_record(&record).map_err(output_error(path))?;
        }
        writer
            .flush()
            .map_err(|err| output_error(path)(err.into()))?;
        log::debug!("Wrote compartment counts to {}", path.display());
        Ok(())
    }

    fn write_events(&self, model: &Model, path: &Path) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .from_path(path)
            .map_err(output_error(path))?;
        writer
            .write_record(["individual", "transition", "time", "period"])
            .map_err(output_error(path))?;

        for individual in 0..self.n_individuals() {
            for event in self.events(individual) {
                let transition = &model.transitions[event.transition];
                if transition.is_marker() {
                    continue;
                }
                writer
                    .write_record(&[
                        individual.to_string(),
                        transition.name.clone(),
                        event.time.to_string(),
                        model.periods[event.period].name.clone(),
                    ])
                    .map_err(output_error(path))?;
            }
        }
        writer
            .flush()
            .map_err(|err| output_error(path)(err.into()))?;
        log::debug!("Wrote events to {}", path.display());
        Ok(())
    }
}
