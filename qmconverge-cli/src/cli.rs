//! Command-line argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// qmconverge - converge QEMU VMs towards a declared manifest
#[derive(Parser, Debug)]
#[command(name = "qmconverge")]
#[command(about = "qmconverge - converge QEMU VMs towards a declared manifest")]
#[command(version)]
pub struct Args {
    /// Path to configuration file (optional, defaults used if not found)
    #[arg(short, long, env = "QMCONVERGE_CONFIG")]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Maximum number of VMs talking to the hypervisor at once
    #[arg(long)]
    pub max_parallel: Option<usize>,

    /// Path to the state file
    #[arg(long, env = "QMCONVERGE_STATE")]
    pub state: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create or update every VM in the manifest, then read them back
    Apply {
        /// Desired-state manifest (YAML)
        manifest: PathBuf,
    },

    /// Re-read every managed VM and refresh the state file
    Refresh,

    /// Stop and delete a managed VM
    Destroy {
        /// VM name as it appears in the state file
        name: String,
    },

    /// Adopt an existing VM by name into the state file
    Import {
        /// VM name on the cluster
        name: String,
    },
}
