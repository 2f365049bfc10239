// Needs libtorch, see the tch crate for LIBTORCH / LD_LIBRARY_PATH setup.

use anyhow::Result;
use clap::Parser;

mod artifacts;
mod config;
mod dataloader;
mod early_stopping;
mod error;
mod labels;
mod model;
mod pipeline;
mod predict;
mod split;
mod submission;
mod train;
mod transform_pipeline;
mod utils;

use config::{Cli, Command};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::Train(config) => pipeline::run_train(&config),
        Command::Predict(config) => pipeline::run_predict(&config),
    }
}
