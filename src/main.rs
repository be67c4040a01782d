//! CLI entry point for patch dataset generation, restoration training and frame extraction

use carekit::io::cli::{Cli, Pipeline};
use carekit::io::configuration::DEFAULT_LOG_FILTER;
use clap::Parser;

fn main() -> carekit::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(DEFAULT_LOG_FILTER))
        .init();

    let cli = Cli::parse();
    let pipeline = Pipeline::new(cli);
    pipeline.process()
}
