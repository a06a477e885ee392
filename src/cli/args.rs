use std::path::PathBuf;

use clap::Parser;

use crate::conflict::ConflictStrategy;

/// Configuration-aware transitive dependency resolution for module descriptors.
#[derive(Debug, Parser)]
#[clap(version)]
pub struct CliArgs {
    #[clap(subcommand)]
    pub cmd: Command,
    /// Location of the module descriptor
    #[clap(short, long, default_value = "module.toml")]
    pub module_location: PathBuf,
    /// Root of the file-system repository [default: $HOME/.modresolve/repository]
    #[clap(short, long)]
    pub repository_directory: Option<PathBuf>,
    /// Log debug messages
    #[clap(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Parser)]
pub enum Command {
    /// Resolves the dependencies of the module descriptor
    Resolve {
        /// Configurations to resolve, `*` for every public one
        #[clap(short = 'c', long = "confs", value_delimiter = ',', default_value = "*")]
        configurations: Vec<String>,
        /// Conflict manager: latest, strict or all
        #[clap(long)]
        conflict: Option<ConflictStrategy>,
        /// Maximum number of resolver calls in flight
        #[clap(short, long)]
        workers: Option<usize>,
        /// Retries of transient resolver failures
        #[clap(long)]
        retries: Option<usize>,
        /// Write the report to this file instead of the standard output
        #[clap(long)]
        report: Option<PathBuf>,
        /// Only resolve direct dependencies
        #[clap(long)]
        intransitive: bool,
        /// Abort at the first dependency that cannot be found
        #[clap(long)]
        fail_fast: bool,
    },
    /// Parses the module descriptor and reports every problem found
    Check,
}
