use anyhow::Result;
use clap::Parser;

use epimbp::args::Args;
use epimbp::runner::Runner;

fn main() -> Result<()> {
    let args = Args::parse();
    let runner = Runner::new(args)?;
    runner.start()
}
