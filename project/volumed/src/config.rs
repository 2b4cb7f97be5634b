use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;

/// Which filesystem backend to use for volume materialization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum DriverChoice {
    /// Probe the storage root and pick btrfs when available.
    Auto,
    Btrfs,
    Naive,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub storage_root: PathBuf,
    pub reaper_interval: Duration,
    pub driver: DriverChoice,
}
