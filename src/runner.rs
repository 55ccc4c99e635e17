use anyhow::{Result, anyhow};

use indicatif::{ProgressBar, ProgressStyle};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::args::{Args, Mode};
use crate::chain::{Chain, Samples};
use crate::config::{Observations, Settings};
use crate::core::{Coupler, Model, Population, simulate_direct};
use crate::observation::TransitionCounts;
use crate::readwrite::{SampleWriter, TrajectoryIO};

pub struct Runner {
    args: Args,
    settings: Settings,
    model: Arc<Model>,
    population: Arc<Population>,
}

impl Runner {
    pub fn new(args: Args) -> Result<Runner> {
        Self::setup_logger(&args);
        #[cfg(feature = "parallel")]
        Self::setup_rayon(&args);

        let settings = Self::load_settings(&args.settings)?;
        let model = Model::from_definition(&settings.model, &settings.population)?;
        let population = Population::from_definition(&settings.population, &model)?;
        log::info!(
            "Created population of {} individuals in {} areas",
            population.len(),
            population.n_areas()
        );

        fs::create_dir_all(&args.outdir)?;

        Ok(Self {
            args,
            settings,
            model: Arc::new(model),
            population: Arc::new(population),
        })
    }

    pub fn start(&self) -> Result<()> {
        match self.args.mode {
            Mode::Simulate => self.simulate(),
            Mode::Inference => self.infer(),
        }
    }

    /// Setup logging level and file
    fn setup_logger(args: &Args) {
        let log_level = match args.verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        };
        simple_logging::log_to_file(args.log_file.as_str(), log_level).unwrap_or_else(|_| {
            eprintln!("Unable to open log file.");
            std::process::exit(1);
        });
    }

    /// Setup rayon thread pool
    #[cfg(feature = "parallel")]
    fn setup_rayon(args: &Args) {
        if let Some(n_threads) = args.threads {
            println!("Setting number of threads to {}.", n_threads);
            rayon::ThreadPoolBuilder::new()
                .num_threads(n_threads)
                .build_global()
                .unwrap_or_else(|_| {
                    eprintln!("Unable to set number of threads.");
                    std::process::exit(1);
                });
        }
    }

    /// Load settings from file
    fn load_settings(path: &str) -> Result<Settings> {
        let settings: Settings = Settings::read_from_file(path)?;
        log::info!("Loaded settings\n{}", settings);
        Ok(settings)
    }

    fn progress_bar(&self, length: usize) -> Result<Option<ProgressBar>> {
        if self.args.disable_progress_bar {
            return Ok(None);
        }
        let bar = ProgressBar::new(length as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template(
                    "[{bar:40}] {pos:>7}/{len:7} [{elapsed_precise} / {duration_precise}] {msg}",
                )?
                .progress_chars("=> "),
        );
        Ok(Some(bar))
    }

    fn output_path(&self, name: &str) -> PathBuf {
        Path::new(self.args.outdir.as_str()).join(name)
    }

    fn simulate(&self) -> Result<()> {
        let replicates = self.args.replicates;
        log::info!("Simulating {replicates} trajectories...");
        let bar = self.progress_bar(replicates)?;

        let run = |replicate: usize| -> Result<usize> {
            let infections = self.simulate_replicate(replicate)?;
            if let Some(bar) = bar.as_ref() {
                bar.inc(1);
                bar.set_message(format!("{infections} infections"));
            }
            Ok(infections)
        };
        #[cfg(feature = "parallel")]
        let infections: Vec<usize> = (0..replicates)
            .into_par_iter()
            .map(run)
            .collect::<Result<_>>()?;
        #[cfg(not(feature = "parallel"))]
        let infections: Vec<usize> = (0..replicates).map(run).collect::<Result<_>>()?;

        if let Some(bar) = bar {
            bar.finish_with_message("Done.");
        }
        log::info!("Finished simulation with infections {infections:?}");
        Ok(())
    }

    fn simulate_replicate(&self, replicate: usize) -> Result<usize> {
        let seed = self.args.seed + replicate as u64;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let parameters = self.model.default_parameters();

        let trajectory = match self.args.direct {
            true => simulate_direct(&self.model, &self.population, &parameters, &mut rng)?,
            false => Coupler::new(
                self.model.clone(),
                self.population.clone(),
                self.settings.chain.consistency_checks,
            )
            .simulate(&parameters, &mut rng)?,
        };
        log::debug!(
            "Replicate {replicate} (seed {seed}) has {} infections",
            trajectory.n_infections()
        );

        trajectory.write_compartments(
            &self.model,
            &self.output_path(&format!("compartments_{replicate}.csv")),
        )?;
        trajectory.write_events(
            &self.model,
            &self.output_path(&format!("events_{replicate}.csv")),
        )?;
        Ok(trajectory.n_infections())
    }

    fn infer(&self) -> Result<()> {
        let path = self
            .args
            .observations
            .as_ref()
            .ok_or_else(|| anyhow!("Inference requires observations"))?;
        let observations = Observations::read(path)?;
        let observation = TransitionCounts::new(&observations, &self.model)?;
        log::info!("Loaded {} observations from {path}", observation.len());

        let names = self.model.parameters.iter().map(|p| p.name.clone()).collect();
        let writer = SampleWriter::new(Path::new(self.args.outdir.as_str()), names)?;

        let n_chains = self.args.replicates;
        let bar = self.progress_bar(n_chains * self.settings.chain.updates)?;

        let run = |index: usize| -> Result<Samples> {
            let samples = self.run_chain(index, observation.clone(), bar.as_ref())?;
            writer.write_trace(index, &samples)?;
            Ok(samples)
        };
        #[cfg(feature = "parallel")]
        let chains: Vec<Samples> = (0..n_chains)
            .into_par_iter()
            .map(run)
            .collect::<Result<_>>()?;
        #[cfg(not(feature = "parallel"))]
        let chains: Vec<Samples> = (0..n_chains).map(run).collect::<Result<_>>()?;

        writer.write_matrix(&chains)?;
        if let Some(bar) = bar {
            bar.finish_with_message("Done.");
        }
        log::info!("Finished inference with {n_chains} chains.");
        Ok(())
    }

    fn run_chain(
        &self,
        index: usize,
        observation: TransitionCounts,
        bar: Option<&ProgressBar>,
    ) -> Result<Samples> {
        let seed = self.args.seed + index as u64;
        let mut chain = Chain::new(
            self.model.clone(),
            self.population.clone(),
            observation,
            self.settings.chain.clone(),
            seed,
        )?;
        log::info!(
            "Chain {index} starts at {:?} with likelihood {}",
            chain.parameters(),
            chain.likelihood()
        );

        let samples = chain.run(|chain| {
            if let Some(bar) = bar {
                bar.inc(1);
                bar.set_message(format!("likelihood={:.3}", chain.likelihood()));
            }
        })?;

        log::info!(
            r###"
        chain={index}
        acceptance={:?}
        jumps={:?}"###,
            chain.acceptance_rates(),
            chain.jumps()
        );
        chain.trajectory().write_compartments(
            &self.model,
            &self.output_path(&format!("posterior_compartments_{index}.csv")),
        )?;
        Ok(samples)
    }
}
