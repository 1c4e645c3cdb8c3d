//! CLI command definitions and dispatch for the `waypoint` binary.
//!
//! Uses clap derive macros for argument parsing. Instance commands take the
//! instance UUID; `start` and `status` also accept a workflow name.

pub mod catalog;
pub mod progress;
pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

/// Run declared tool workflows with durable checkpoints and resume.
#[derive(Parser)]
#[command(name = "waypoint", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Data directory (checkpoints, outputs, default config).
    #[arg(long, global = true, env = "WAYPOINT_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Config file to use instead of `<data_dir>/config.toml`.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a new instance of a workflow and run it to completion or failure.
    Start {
        /// Workflow name from the catalog, or a path to a definition file.
        workflow: String,

        /// Start parameter as key=value (repeatable). Values that parse as
        /// JSON are used as JSON.
        #[arg(long = "param", short = 'p', value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Start parameters as one JSON object. `--param` entries override it.
        #[arg(long = "params", value_name = "JSON")]
        params_json: Option<String>,
    },

    /// Show active and failed instances, or one workflow's / instance's state.
    Status {
        /// Workflow name or instance UUID (omit for every active or failed instance).
        target: Option<String>,
    },

    /// Resume an interrupted instance from its first incomplete step.
    Resume {
        /// Instance UUID.
        instance: String,

        /// Reopen a failed instance without asking.
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// Cancel an in-progress instance at its next step boundary.
    Cancel {
        /// Instance UUID.
        instance: String,

        /// Mark the instance failed right away. Use only when no process is
        /// running it.
        #[arg(long)]
        now: bool,
    },

    /// Resume every in-progress instance left behind by a crash.
    Recover,

    /// List registered tools and whether their environment is ready.
    Tools,

    /// List workflow definitions in the catalog.
    Workflows,

    /// Print the JSON Schema of a file format.
    Schema {
        /// Which format.
        #[arg(value_enum)]
        kind: SchemaKind,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SchemaKind {
    /// Workflow definition YAML.
    Workflow,
    /// Tool registry TOML.
    Tools,
}
