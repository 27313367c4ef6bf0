use clap::Parser;
use raw_extract::source::redact_dsn;
use raw_extract::{
    logging, Cli, ExtractError, Extractor, OutputFormatter, OutputManager, RunConfig,
};
use std::process;
use tracing::debug;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let exit_code = run().await;
    process::exit(exit_code);
}

async fn run() -> i32 {
    // Parse CLI arguments; clap exits with status 2 on a missing flag
    let cli = Cli::parse();

    logging::init_logging(cli.verbosity_level(), cli.quiet);

    // Validate the run flags before anything touches the network or disk
    let run_config = match cli.run_config() {
        Ok(run_config) => run_config,
        Err(e) => {
            print_startup_error(&cli, &e);
            return e.exit_code();
        }
    };
    debug!(
        environment = run_config.environment(),
        run_date = %run_config.run_date(),
        source = %redact_dsn(run_config.source_connection()),
        "Validated run flags"
    );

    let extractor = match Extractor::from_cli(&cli) {
        Ok(extractor) => extractor,
        Err(e) => {
            print_startup_error(&cli, &e);
            return e.exit_code();
        }
    };

    if cli.dry_run {
        return handle_dry_run(&extractor, &run_config);
    }

    match extractor.extract(&run_config).await {
        Ok(report) => {
            extractor.output_formatter().print_extraction_report(&report);
            0
        }
        Err(e) => {
            extractor.handle_error(&e);
            e.exit_code()
        }
    }
}

fn handle_dry_run(extractor: &Extractor, run_config: &RunConfig) -> i32 {
    let formatter = extractor.output_formatter();

    formatter.info("DRY RUN MODE - nothing will be read or written");
    formatter.print_separator();

    let plan = match extractor.plan(run_config) {
        Ok(plan) => plan,
        Err(e) => {
            extractor.handle_error(&e);
            return e.exit_code();
        }
    };

    let partition = OutputManager::for_run(run_config).partition_directory();
    formatter.print_plan(&partition.display().to_string(), &plan);

    formatter.print_separator();
    formatter.success("Dry run completed successfully");
    formatter.info("Run without --dry-run to perform the extraction");

    0
}

fn print_startup_error(cli: &Cli, error: &ExtractError) {
    let formatter = OutputFormatter::new(cli.output_mode(), cli.verbosity_level(), cli.quiet);
    formatter.print_user_friendly_error(error);
}
