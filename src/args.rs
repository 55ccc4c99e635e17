use clap::{Parser, ValueEnum};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Simulate trajectories under the configured parameter values.
    Simulate,
    /// Run model-based proposal chains against observations.
    Inference,
}

#[derive(Parser, Debug)]
#[clap(
    author,
    version,
    about,
    long_about = None,
    name = "epimbp",
)]
pub struct Args {
    /// What to run.
    #[clap(value_enum)]
    pub mode: Mode,

    /// Path to settings (yaml file).
    #[clap(long)]
    pub settings: String,

    /// Path to observed transition counts (csv file), required for inference.
    #[clap(long)]
    pub observations: Option<String>,

    /// Directory for output files.
    #[clap(long, short, default_value = "output")]
    pub outdir: String,

    /// Seed of the first chain or simulation.
    #[clap(long, default_value_t = 0)]
    pub seed: u64,

    /// Number of simulations or chains.
    #[clap(long, short = 'n', default_value_t = 1)]
    pub replicates: usize,

    /// Simulate with the direct event-driven simulator instead of a coupling pass.
    #[clap(long)]
    pub direct: bool,

    /// Increase logging verbosity.
    #[clap(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Path to log file.
    #[clap(long, default_value = "epimbp.log")]
    pub log_file: String,

    /// Disable the progress bar.
    #[clap(long)]
    pub disable_progress_bar: bool,

    /// Number of threads to use.
    #[cfg(feature = "parallel")]
    #[clap(long)]
    pub threads: Option<usize>,
}
