// SPDX-License-Identifier: Apache-2.0
// Copyright Sentinel Sensor Authors

//! Command-line arguments. CLI values override the environment.

pub use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "sentineld", about = "ARP spoofing detection sensor")]
pub struct CmdArgs {
    /// Interface to capture on; repeat for multiple. Overrides
    /// SENTINEL_INTERFACES.
    #[arg(short, long = "interface")]
    pub interface: Vec<String>,

    /// Number of worker lanes.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Dispatch strategy: round-robin, least-loaded or affinity.
    #[arg(long)]
    pub strategy: Option<String>,

    /// Path of the alert database.
    #[arg(long = "db")]
    pub database: Option<PathBuf>,

    /// Path of the classifier checkpoint.
    #[arg(long)]
    pub model: Option<PathBuf>,

    /// List capturable interfaces and exit.
    #[arg(long)]
    pub list_interfaces: bool,
}
