use crate::error::{ExtractError, Result};
use crate::source::RawRecord;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ExtractionProgress {
    pub tables_processed: usize,
    pub total_tables: usize,
    pub rows_written: u64,
    pub bytes_written: u64,
    pub current_table: Option<String>,
    pub start_time: Instant,
}

impl ExtractionProgress {
    pub fn new(total_tables: usize) -> Self {
        Self {
            tables_processed: 0,
            total_tables,
            rows_written: 0,
            bytes_written: 0,
            current_table: None,
            start_time: Instant::now(),
        }
    }

    pub fn start_table<S: Into<String>>(&mut self, table: S) {
        self.current_table = Some(table.into());
    }

    pub fn finish_table(&mut self, summary: &RawFileSummary) {
        self.tables_processed += 1;
        self.rows_written += summary.rows;
        self.bytes_written += summary.bytes;
        self.current_table = None;
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// What one finished raw file holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFileSummary {
    pub file: String,
    pub rows: u64,
    pub bytes: u64,
}

/// Writes one JSON object per line into a raw file.
pub struct RawFileWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    rows: u64,
    bytes: u64,
}

impl RawFileWriter {
    pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_buffer_size(path, Self::DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size<P: AsRef<Path>>(path: P, buffer_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ExtractError::write(parent, e))?;
        }

        let file = File::create(&path).map_err(|e| ExtractError::write(&path, e))?;

        Ok(Self {
            writer: BufWriter::with_capacity(buffer_size.max(4096), file),
            path,
            rows: 0,
            bytes: 0,
        })
    }

    pub fn write_record(&mut self, record: &RawRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record).map_err(|source| ExtractError::Serialize {
            what: format!("row {} of {}", self.rows + 1, self.path.display()),
            source,
        })?;
        line.push(b'\n');

        self.writer
            .write_all(&line)
            .map_err(|e| ExtractError::write(&self.path, e))?;

        self.rows += 1;
        self.bytes += line.len() as u64;
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Flush and close the file. With `sync` the data is on disk before this returns.
    pub fn finish(self, sync: bool) -> Result<RawFileSummary> {
        let path = self.path;
        let file = self
            .writer
            .into_inner()
            .map_err(|e| ExtractError::write(&path, e.into_error()))?;

        if sync {
            file.sync_all().map_err(|e| ExtractError::write(&path, e))?;
        }

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();

        Ok(RawFileSummary {
            file: file_name,
            rows: self.rows,
            bytes: self.bytes,
        })
    }
}
