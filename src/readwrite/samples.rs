use npyz::WriterBuilder;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::chain::Samples;
use crate::errors::{EpiError, Result};

/// Writes chain traces as CSV and the pooled posterior samples as a NPY matrix.
pub struct SampleWriter {
    path: PathBuf,
    names: Vec<String>,
}

impl SampleWriter {
    pub fn new(path: &Path, names: Vec<String>) -> Result<Self> {
        fs::create_dir_all(path).map_err(|err| {
            EpiError::OutputError(format!("Failed to create {}: {err}", path.display()))
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            names,
        })
    }

    pub fn trace_path(&self, chain: usize) -> PathBuf {
        self.path.join(format!("trace_{chain}.csv"))
    }

    pub fn matrix_path(&self) -> PathBuf {
        self.path.join("samples.npy")
    }

    /// Write the trace of one chain, one row per sample.
    pub fn write_trace(&self, chain: usize, samples: &Samples) -> Result<()> {
        let path = self.trace_path(chain);
        let error = |err: csv::Error| {
            EpiError::OutputError(format!("Failed to write to {}: {err}", path.display()))
        };
        let mut writer = csv::WriterBuilder::new().from_path(&path).map_err(error)?;

        let mut header = vec![
            "update".to_string(),
            "likelihood".to_string(),
            "infections".to_string(),
        ];
        header.extend(self.names.iter().cloned());
        writer.write_record(&header).map_err(error)?;

        for sample in samples.iter() {
            let mut record = vec![
                sample.update.to_string(),
                sample.likelihood.to_string(),
                sample.infections.to_string(),
            ];
            record.extend(sample.parameters.iter().map(|value| value.to_string()));
            writer.write_record(&record).map_err(error)?;
        }
        writer.flush().map_err(|err| error(err.into()))?;
        log::info!("Wrote {} samples to {}", samples.len(), path.display());
        Ok(())
    }

    /// Write the parameters of all samples as a `samples x parameters` matrix.
    pub fn write_matrix(&self, chains: &[Samples]) -> Result<()> {
        let path = self.matrix_path();
        let file = fs::File::create(&path).map_err(|err| {
            EpiError::OutputError(format!("Failed to create {}: {err}", path.display()))
        })?;
        write_npy(&mut io::BufWriter::new(file), chains, self.names.len())
    }
}

pub fn write_npy(
    writer: &mut impl io::Write,
    chains: &[Samples],
    n_parameters: usize,
) -> Result<()> {
    let n_samples: usize = chains.iter().map(|samples| samples.len()).sum();
    let shape = &[n_samples as u64, n_parameters as u64];
    let mut npy_writer = npyz::WriteOptions::new()
        .default_dtype()
        .shape(shape)
        .writer(writer)
        .begin_nd()
        .map_err(|e| EpiError::OutputError(format!("{}", e)))?;
    npy_writer
        .extend(
            chains
                .iter()
                .flat_map(|samples| samples.iter())
                .flat_map(|sample| sample.parameters.iter().copied()),
        )
        .map_err(|e| EpiError::OutputError(format!("{}", e)))?;
    npy_writer
        .finish()
        .map_err(|e| EpiError::OutputError(format!("{}", e)))?;
    Ok(())
}
