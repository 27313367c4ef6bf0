use crate::config::{Config, RunConfig};
use crate::error::Result;
use crate::ui::OutputMode;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "raw-extract")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Extract a full or incremental slice of a source database into raw files")]
#[command(
    long_about = "raw-extract connects to a source database, reads either every row or the rows \
                  belonging to one run date, and writes them as JSON Lines files under \
                  <output-dir>/env=<env>/run_date=<date>/ for the transform stage."
)]
#[command(after_help = "EXAMPLES:\n  \
    raw-extract --env prod --full-reload false --run-date 2024-01-01 \\\n    \
    --src-dsn postgres://etl@db/app --output-dir /data/raw\n  \
    raw-extract --env dev --full-reload true --run-date 2024-01-01 \\\n    \
    --src-dsn sqlite://app.db --output-dir raw --config jobs/orders.toml --dry-run")]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Target environment identifier
    #[arg(long = "env", value_name = "ENV")]
    pub env: String,

    /// Extract the full dataset (true) or only the run date's slice (false)
    #[arg(long = "full-reload", value_name = "true|false")]
    pub full_reload: String,

    /// Logical date the run represents
    #[arg(long = "run-date", value_name = "YYYY-MM-DD")]
    pub run_date: String,

    /// Connection string for the source database
    #[arg(long = "src-dsn", value_name = "DSN")]
    pub src_dsn: String,

    /// Destination directory for raw output files
    #[arg(long = "output-dir", value_name = "DIR")]
    pub output_dir: PathBuf,

    /// Configuration file path
    #[arg(short, long, help = "Path to TOML job configuration file")]
    pub config: Option<PathBuf>,

    /// Output format for results
    #[arg(long, value_enum, default_value_t = OutputFormat::Human)]
    pub output_format: OutputFormat,

    /// Verbose output level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-essential output)
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Dry run (show what would be done without executing)
    #[arg(long, help = "Validate arguments and print the extraction plan without connecting")]
    pub dry_run: bool,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable colored output
    Human,
    /// JSON formatted output
    Json,
    /// Plain text output
    Plain,
}

impl Cli {
    /// Validate the five run flags into a `RunConfig`. No I/O happens here.
    pub fn run_config(&self) -> Result<RunConfig> {
        RunConfig::builder()
            .with_environment(Some(self.env.clone()))
            .with_full_reload(Some(self.full_reload.clone()))
            .with_run_date(Some(self.run_date.clone()))
            .with_source_connection(Some(self.src_dsn.clone()))
            .with_output_directory(Some(self.output_dir.clone()))
            .build()
    }

    pub fn load_config(&self) -> Result<Config> {
        let config = Config::load_with_defaults(self.config.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn output_mode(&self) -> OutputMode {
        match self.output_format {
            OutputFormat::Human => OutputMode::Human,
            OutputFormat::Json => OutputMode::Json,
            OutputFormat::Plain => OutputMode::Plain,
        }
    }

    pub fn verbosity_level(&self) -> u8 {
        if self.quiet {
            0
        } else {
            self.verbose
        }
    }
}
