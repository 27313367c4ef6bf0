//! Diagnostic logging for the extractor.
//!
//! User-facing status lines go through [`crate::ui::OutputFormatter`] on stdout;
//! `tracing` events go to stderr so they never mix with JSON output.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is not set.
pub fn default_filter(verbosity: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }

    match verbosity {
        0 => "warn",
        1 => "warn,raw_extract=info",
        2 => "info,raw_extract=debug",
        _ => "debug,raw_extract=trace",
    }
}

/// Install the global subscriber. A second call is a no-op.
pub fn init_logging(verbosity: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity, quiet)));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbosity >= 2),
        )
        .try_init();
}
