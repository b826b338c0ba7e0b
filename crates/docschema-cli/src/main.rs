//! docschema command-line tool.
//!
//! Infers, compares and evolves the schema of document collections stored
//! in a local sled database.

mod commands;
mod config;
mod database;

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::FileConfig;

/// docschema command-line tool
#[derive(Parser, Debug)]
#[command(name = "docschema")]
#[command(version, about = "Schema inference, drift detection and migrations for document collections")]
pub struct Args {
    /// Path to the data directory (overrides config and environment).
    #[arg(short, long, global = true)]
    pub data_path: Option<PathBuf>,

    /// Collection name (overrides config and environment).
    #[arg(short, long, global = true)]
    pub collection: Option<String>,

    /// Directory holding .docschema.yml and .docschema.local.yml.
    #[arg(long, global = true, default_value = ".")]
    pub config_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

impl Args {
    /// Flags that override file and environment settings.
    pub fn overrides(&self) -> FileConfig {
        FileConfig {
            data_path: self.data_path.clone(),
            collection: self.collection.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write a default config file.
    Init {
        /// Config file path.
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Load JSON Lines documents into the collection.
    Import {
        /// JSON Lines file, one document per line.
        #[arg(long)]
        file: PathBuf,

        /// Documents per insert.
        #[arg(long, default_value_t = 1000)]
        batch_size: usize,
    },

    /// Sample the collection and infer its schema.
    Analyze {
        #[command(flatten)]
        sampling: SamplingArgs,

        /// Save the report as a schema file (.yml or .json).
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Compare two schema files.
    Diff {
        /// Source schema file.
        #[arg(long = "from")]
        source: PathBuf,

        /// Target schema file.
        #[arg(long = "to")]
        target: PathBuf,
    },

    /// Detect drift between an expected schema and live data.
    #[command(subcommand)]
    Drift(DriftCommand),

    /// Recommend indexes for frequently present fields.
    Indexes {
        /// Schema file.
        #[arg(long)]
        schema: PathBuf,
    },

    /// Generate a migration plan between two schema files.
    Plan {
        /// Source schema file.
        #[arg(long = "from")]
        source: PathBuf,

        /// Target schema file.
        #[arg(long = "to")]
        target: PathBuf,

        /// Plan the way back from target to source.
        #[arg(long)]
        rollback: bool,

        #[arg(long, value_enum, default_value_t = StrategyArg::Eager)]
        strategy: StrategyArg,

        /// Documents per batch.
        #[arg(long, default_value_t = 1000)]
        batch_size: usize,

        /// Write the plan here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Apply a migration plan to the collection.
    Migrate {
        /// Migration plan JSON file.
        #[arg(long)]
        plan: PathBuf,

        /// Target schema file.
        #[arg(long = "to")]
        target: PathBuf,

        /// Execute remove_field steps.
        #[arg(long)]
        allow_remove: bool,

        /// Count matching documents without writing.
        #[arg(long)]
        dry_run: bool,

        /// Pause between batches, in milliseconds.
        #[arg(long, default_value_t = 0)]
        rate_limit_ms: u64,

        /// Continue from the last recorded checkpoint of this plan.
        #[arg(long, conflicts_with_all = ["resume_from", "start_step"])]
        resume: bool,

        /// Resume the start step after this _id (hex).
        #[arg(long)]
        resume_from: Option<String>,

        /// First step to run; earlier steps are reported as completed.
        #[arg(long, default_value_t = 0)]
        start_step: usize,
    },

    /// Validate documents against a schema.
    #[command(subcommand)]
    Validate(ValidateCommand),

    /// Run an operation across every collection in the database.
    #[command(subcommand)]
    Db(DbCommand),
}

#[derive(Subcommand, Debug)]
pub enum DriftCommand {
    /// Sample the collection once and compare it with an expected schema.
    /// Exits with status 1 when drift is found.
    Detect {
        /// Expected schema file.
        #[arg(long)]
        schema: PathBuf,

        #[command(flatten)]
        sampling: SamplingArgs,
    },

    /// Compare two schema files as expected and observed.
    Compare {
        /// Expected schema file.
        #[arg(long = "from")]
        source: PathBuf,

        /// Observed schema file.
        #[arg(long = "to")]
        target: PathBuf,
    },

    /// Re-check drift on an interval.
    Monitor {
        /// Expected schema file.
        #[arg(long)]
        schema: PathBuf,

        #[command(flatten)]
        sampling: SamplingArgs,

        /// Seconds between checks.
        #[arg(long, default_value_t = 300)]
        interval: u64,

        /// Stop after this many checks.
        #[arg(long)]
        runs: Option<usize>,

        /// POST every report as JSON to this URL.
        #[arg(long)]
        webhook: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ValidateCommand {
    /// Validate a sample of documents.
    Test {
        /// Schema file.
        #[arg(long)]
        schema: PathBuf,

        /// Documents to sample.
        #[arg(long, default_value_t = 10_000)]
        sample: usize,

        /// Maximum number of invalid documents to list.
        #[arg(long, default_value_t = 100)]
        max_errors: usize,
    },

    /// Print the equivalent $jsonSchema validator.
    Export {
        /// Schema file.
        #[arg(long)]
        schema: PathBuf,
    },

    /// Enforce a schema on every later insert and update of the collection.
    Apply {
        /// Schema file.
        #[arg(long)]
        schema: PathBuf,

        #[arg(long, value_enum, default_value_t = LevelArg::Moderate)]
        level: LevelArg,

        #[arg(long, value_enum, default_value_t = ActionArg::Error)]
        action: ActionArg,
    },

    /// Stop enforcing the collection's schema.
    Remove,
}

#[derive(Subcommand, Debug)]
pub enum DbCommand {
    /// Analyze every collection.
    Analyze {
        #[command(flatten)]
        sampling: SamplingArgs,

        /// Write the combined report here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Save one schema file per collection.
    Export {
        #[command(flatten)]
        sampling: SamplingArgs,

        /// Output directory.
        #[arg(long)]
        out_dir: PathBuf,

        /// Write JSON instead of YAML.
        #[arg(long)]
        json: bool,
    },

    /// Detect drift for every collection with a schema file.
    /// Exits with status 1 when any collection drifted.
    Drift {
        /// Directory of expected schema files named after collections.
        #[arg(long)]
        schema_dir: PathBuf,

        #[command(flatten)]
        sampling: SamplingArgs,
    },

    /// Validate every collection with a schema file.
    /// Exits with status 1 when any document is invalid.
    Validate {
        /// Directory of schema files named after collections.
        #[arg(long)]
        schema_dir: PathBuf,

        /// Documents to sample per collection.
        #[arg(long, default_value_t = 10_000)]
        sample: usize,

        /// Maximum number of invalid documents to list per collection.
        #[arg(long, default_value_t = 100)]
        max_errors: usize,
    },

    /// Write a plan for every collection whose schema changed.
    Migrate {
        /// Directory of source schema files.
        #[arg(long)]
        from_dir: PathBuf,

        /// Directory of target schema files.
        #[arg(long)]
        to_dir: PathBuf,

        /// Directory for the `<collection>.plan.json` files.
        #[arg(long)]
        out_dir: PathBuf,

        #[arg(long, value_enum, default_value_t = StrategyArg::Eager)]
        strategy: StrategyArg,

        /// Documents per batch.
        #[arg(long, default_value_t = 1000)]
        batch_size: usize,
    },
}

/// Sampling limits shared by analysis commands.
#[derive(ClapArgs, Debug, Clone)]
pub struct SamplingArgs {
    /// Documents to sample.
    #[arg(long, default_value_t = 10_000)]
    pub sample: usize,

    /// Deepest nesting level to descend into.
    #[arg(long, default_value_t = 8)]
    pub max_depth: usize,

    /// Array elements inspected per array.
    #[arg(long, default_value_t = 5)]
    pub max_array_items: usize,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyArg {
    Eager,
    Lazy,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelArg {
    Off,
    Moderate,
    Strict,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionArg {
    Error,
    Warn,
}

#[tokio::main]
async fn main() {
    // Logs go to stderr; stdout carries JSON output.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docschema=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    match commands::run(args).await {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
