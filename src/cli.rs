//! Uses clap to define the CLI interface declaratively.
use std::path::PathBuf;

use clap::{ArgAction, Parser};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Descriptors to watch and poller settings, as toml or yaml
    #[arg(short, default_value = "epwatch.toml", long, value_name = "FILE")]
    pub config: PathBuf,

    /// More log output; repeat for more detail
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }
}
