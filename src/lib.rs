pub mod cli;
pub mod config;
pub mod error;
pub mod extractor;
pub mod logging;
pub mod source;
pub mod ui;

// Public API re-exports
pub use cli::{Cli, OutputFormat};
pub use config::{Config, ExtractionMode, OutputConfig, RunConfig, SourceConfig, TableSpec};
pub use error::{ErrorCategory, ExtractError, Result, UserFriendlyError};

// Core functionality re-exports
pub use extractor::{ExtractionProgress, ExtractionReport, OutputManager, TableSummary};
pub use source::{Selection, SourceDatabase, SourceKind};
pub use ui::{OutputFormatter, OutputMode, PlannedTable, ProgressManager};

use source::{build_select, redact_dsn};
use tracing::info;

/// Runs one extraction: connect, select, write the partition.
pub struct Extractor {
    config: Config,
    output_formatter: OutputFormatter,
    progress_manager: ProgressManager,
}

impl Extractor {
    /// Create an extractor from validated job settings.
    pub fn new(config: Config, output_mode: OutputMode, verbose: u8, quiet: bool) -> Result<Self> {
        config.validate()?;

        let output_formatter = OutputFormatter::new(output_mode, verbose, quiet);
        let progress_manager = ProgressManager::new(!quiet && output_mode == OutputMode::Human);

        Ok(Self {
            config,
            output_formatter,
            progress_manager,
        })
    }

    pub fn from_cli(cli_args: &Cli) -> Result<Self> {
        let config = cli_args.load_config()?;
        Self::new(
            config,
            cli_args.output_mode(),
            cli_args.verbosity_level(),
            cli_args.quiet,
        )
    }

    /// Produce the raw files for `run`. Success means the partition is in place.
    pub async fn run(&self, run: &RunConfig) -> Result<()> {
        self.extract(run).await.map(|_| ())
    }

    /// Same as [`Extractor::run`], returning the manifest contents.
    pub async fn extract(&self, run: &RunConfig) -> Result<ExtractionReport> {
        let output_manager =
            OutputManager::for_run(run).with_sync_files(self.config.output.sync_files);

        self.output_formatter.start_operation(&format!(
            "Extracting env={} run_date={} ({})",
            run.environment(),
            run.run_date(),
            run.mode()
        ));
        info!(
            environment = run.environment(),
            run_date = %run.run_date(),
            mode = %run.mode(),
            tables = self.config.tables.len(),
            "Starting raw extraction"
        );

        // Step 1: Connect to the source
        let mut source = self.connect(run).await?;

        // Step 2: Stage the partition
        let staged = output_manager.prepare()?;

        // Step 3: Extract every configured table
        let mut progress = ExtractionProgress::new(self.config.tables.len());
        let mut summaries = Vec::with_capacity(self.config.tables.len());

        if self.config.tables.is_empty() {
            self.output_formatter
                .warning("No tables configured; writing an empty partition");
        }

        for table in &self.config.tables {
            let summary = self
                .extract_table(&mut source, table, run, &staged, &mut progress)
                .await?;
            summaries.push(summary);
        }

        let target = source.target().to_string();
        let driver = source.kind().to_string();
        source.close().await;

        // Step 4: Manifest and commit
        let report = ExtractionReport::new(
            run,
            &target,
            &driver,
            output_manager.partition_relative_path(),
            summaries,
            &progress,
        );

        if self.config.output.write_manifest {
            staged.write_manifest(&report)?;
        }

        let partition = staged.commit()?;
        info!(
            partition = %partition.display(),
            rows = report.total_rows,
            bytes = report.total_bytes,
            "Committed partition"
        );

        self.output_formatter
            .success(&format!("Wrote partition {}", partition.display()));
        self.output_formatter.print_extraction_summary(&progress);

        Ok(report)
    }

    async fn connect(&self, run: &RunConfig) -> Result<SourceDatabase> {
        let spinner = self
            .progress_manager
            .create_connect_spinner(&redact_dsn(run.source_connection()));

        let result =
            SourceDatabase::connect(run.source_connection(), self.config.connect_timeout_duration())
                .await;

        match result {
            Ok(source) => {
                spinner.finish_and_clear();
                self.output_formatter
                    .info(&format!("Connected to {} source", source.kind()));
                Ok(source)
            }
            Err(e) => {
                spinner.abandon();
                Err(e)
            }
        }
    }

    async fn extract_table(
        &self,
        source: &mut SourceDatabase,
        table: &TableSpec,
        run: &RunConfig,
        staged: &extractor::StagedPartition,
        progress: &mut ExtractionProgress,
    ) -> Result<TableSummary> {
        let selection = Selection::for_table(table, run.mode(), run.run_date());
        progress.start_table(table.name.clone());
        info!(table = %table.name, selection = %selection, "Extracting table");

        let table_progress = self.progress_manager.create_table_progress(&table.name);
        let mut writer = staged.create_raw_file(table)?;

        let streamed = source
            .stream_table(table, &selection, |record| {
                writer.write_record(&record)?;
                ui::progress::update_table_progress(&table_progress, progress, writer.rows());
                Ok(())
            })
            .await;

        if let Err(e) = streamed {
            table_progress.abandon();
            return Err(e);
        }

        let output = writer.finish(staged.sync_files())?;
        ui::progress::finish_progress_with_summary(
            &table_progress,
            &format!("{}: {} rows", table.name, output.rows),
            progress.elapsed(),
        );
        progress.finish_table(&output);

        Ok(TableSummary {
            table: table.name.clone(),
            selection: selection.to_string(),
            output,
        })
    }

    /// Describe what a run would read without touching the source or the filesystem.
    pub fn plan(&self, run: &RunConfig) -> Result<Vec<PlannedTable>> {
        let kind = SourceKind::from_dsn(run.source_connection())?;

        Ok(self
            .config
            .tables
            .iter()
            .map(|table| {
                let selection = Selection::for_table(table, run.mode(), run.run_date());
                PlannedTable {
                    table: table.name.clone(),
                    query: build_select(kind, table, &selection),
                    selection: selection.to_string(),
                }
            })
            .collect())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn output_formatter(&self) -> &OutputFormatter {
        &self.output_formatter
    }

    pub fn progress_manager(&self) -> &ProgressManager {
        &self.progress_manager
    }

    /// Handle error with user-friendly output
    pub fn handle_error(&self, error: &ExtractError) {
        self.progress_manager
            .suspend(|| self.output_formatter.print_user_friendly_error(error));
    }
}

pub fn version_info() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
