pub mod output;
pub mod progress;

pub use output::{OutputFormatter, OutputMode, PlannedTable};
pub use progress::ProgressManager;
