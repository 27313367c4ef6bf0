pub mod output_manager;
pub mod raw_writer;

pub use output_manager::{ExtractionReport, OutputManager, StagedPartition, TableSummary, MANIFEST_FILE};
pub use raw_writer::{ExtractionProgress, RawFileSummary, RawFileWriter};
