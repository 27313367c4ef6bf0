use crate::config::{ExtractionMode, RunConfig, TableSpec, RUN_DATE_FORMAT};
use crate::error::{ExtractError, Result};
use crate::extractor::{ExtractionProgress, RawFileSummary, RawFileWriter};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

pub const MANIFEST_FILE: &str = "_manifest.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionReport {
    pub environment: String,
    pub run_date: NaiveDate,
    pub mode: ExtractionMode,
    pub source: String,
    pub driver: String,
    pub partition: String,
    pub tables: Vec<TableSummary>,
    pub total_rows: u64,
    pub total_bytes: u64,
    pub extracted_at: DateTime<Utc>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSummary {
    pub table: String,
    pub selection: String,
    #[serde(flatten)]
    pub output: RawFileSummary,
}

impl ExtractionReport {
    pub fn new(
        run: &RunConfig,
        source: &str,
        driver: &str,
        partition: &Path,
        tables: Vec<TableSummary>,
        progress: &ExtractionProgress,
    ) -> Self {
        Self {
            environment: run.environment().to_string(),
            run_date: run.run_date(),
            mode: run.mode(),
            source: source.to_string(),
            driver: driver.to_string(),
            partition: partition.to_string_lossy().to_string(),
            tables,
            total_rows: progress.rows_written,
            total_bytes: progress.bytes_written,
            extracted_at: Utc::now(),
            duration_ms: progress.elapsed().as_millis() as u64,
        }
    }
}

/// Decides where a run's partition lives and owns the commit into place.
pub struct OutputManager {
    base_path: PathBuf,
    partition: PathBuf,
    sync_files: bool,
}

impl OutputManager {
    pub fn new<P: Into<PathBuf>>(base_path: P, environment: &str, run_date: NaiveDate) -> Self {
        let partition = PathBuf::from(format!("env={}", environment))
            .join(format!("run_date={}", run_date.format(RUN_DATE_FORMAT)));

        Self {
            base_path: base_path.into(),
            partition,
            sync_files: true,
        }
    }

    pub fn for_run(run: &RunConfig) -> Self {
        Self::new(run.output_directory(), run.environment(), run.run_date())
    }

    pub fn with_sync_files(mut self, sync: bool) -> Self {
        self.sync_files = sync;
        self
    }

    /// `env=<env>/run_date=<date>`, relative to the output directory.
    pub fn partition_relative_path(&self) -> &Path {
        &self.partition
    }

    pub fn partition_directory(&self) -> PathBuf {
        self.base_path.join(&self.partition)
    }

    /// Create a hidden staging directory beside the partition. Nothing becomes
    /// visible under the partition path until `StagedPartition::commit`.
    pub fn prepare(&self) -> Result<StagedPartition> {
        self.validate_paths()?;

        let destination = self.partition_directory();
        let parent = destination
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.base_path.clone());
        fs::create_dir_all(&parent).map_err(|e| ExtractError::write(&parent, e))?;
        recover_replaced_partition(&parent, &destination)?;

        let prefix = format!(
            ".staging-{}-",
            destination
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default()
        );
        let staging = tempfile::Builder::new()
            .prefix(&prefix)
            .tempdir_in(&parent)
            .map_err(|e| ExtractError::write(&parent, e))?;
        open_permissions(staging.path())?;

        debug!(staging = %staging.path().display(), "Created staging directory");

        Ok(StagedPartition {
            staging,
            destination,
            sync_files: self.sync_files,
        })
    }

    fn validate_paths(&self) -> Result<()> {
        if !self.base_path.exists() {
            fs::create_dir_all(&self.base_path).map_err(|e| ExtractError::Permission {
                path: format!(
                    "Cannot create output directory {}: {}",
                    self.base_path.display(),
                    e
                ),
            })?;
        }

        if !self.base_path.is_dir() {
            return Err(ExtractError::Permission {
                path: format!("{} is not a directory", self.base_path.display()),
            });
        }

        let test_file = self.base_path.join(".raw-extract_write_test");
        match fs::File::create(&test_file) {
            Ok(_) => {
                let _ = fs::remove_file(&test_file);
            }
            Err(e) => {
                return Err(ExtractError::Permission {
                    path: format!(
                        "No write permission for directory {}: {}",
                        self.base_path.display(),
                        e
                    ),
                });
            }
        }

        Ok(())
    }
}

/// A partition being written. Dropping it without `commit` discards everything.
pub struct StagedPartition {
    staging: TempDir,
    destination: PathBuf,
    sync_files: bool,
}

impl StagedPartition {
    pub fn path(&self) -> &Path {
        self.staging.path()
    }

    pub fn sync_files(&self) -> bool {
        self.sync_files
    }

    pub fn create_raw_file(&self, table: &TableSpec) -> Result<RawFileWriter> {
        RawFileWriter::create(self.staging.path().join(table.file_name()))
    }

    pub fn write_manifest(&self, report: &ExtractionReport) -> Result<()> {
        let path = self.staging.path().join(MANIFEST_FILE);
        let content =
            serde_json::to_string_pretty(report).map_err(|source| ExtractError::Serialize {
                what: "run manifest".to_string(),
                source,
            })?;

        fs::write(&path, content).map_err(|e| ExtractError::write(&path, e))?;

        if self.sync_files {
            fs::File::open(&path)
                .and_then(|file| file.sync_all())
                .map_err(|e| ExtractError::write(&path, e))?;
        }

        Ok(())
    }

    /// Move the staged files into the partition path, replacing an earlier run's
    /// partition for the same environment and date.
    pub fn commit(self) -> Result<PathBuf> {
        let destination = self.destination.clone();
        let replaced = if destination.exists() {
            let backup = self.backup_path();
            fs::rename(&destination, &backup).map_err(|e| ExtractError::write(&destination, e))?;
            Some(backup)
        } else {
            None
        };

        if let Err(e) = fs::rename(self.staging.path(), &destination) {
            if let Some(ref backup) = replaced {
                if let Err(restore) = fs::rename(backup, &destination) {
                    warn!(
                        backup = %backup.display(),
                        error = %restore,
                        "Could not restore previous partition"
                    );
                }
            }
            return Err(ExtractError::write(&destination, e));
        }

        if let Some(backup) = replaced {
            if let Err(e) = fs::remove_dir_all(&backup) {
                warn!(backup = %backup.display(), error = %e, "Could not remove replaced partition");
            }
        }

        sync_parent_directory(&destination);
        Ok(destination)
    }

    fn backup_path(&self) -> PathBuf {
        let name = self
            .destination
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let suffix = self
            .staging
            .path()
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();

        self.destination
            .with_file_name(format!(".replaced-{}{}", name, suffix))
    }
}

/// Handle `.replaced-*` directories left by a commit that died between its two
/// renames: restore the newest one if the partition is missing, drop the rest.
fn recover_replaced_partition(parent: &Path, destination: &Path) -> Result<()> {
    let name = match destination.file_name() {
        Some(name) => name.to_string_lossy().to_string(),
        None => return Ok(()),
    };
    let prefix = format!(".replaced-{}", name);

    let entries = fs::read_dir(parent).map_err(|e| ExtractError::write(parent, e))?;
    let mut leftovers: Vec<(std::time::SystemTime, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
        .map(|entry| {
            let modified = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .unwrap_or(std::time::UNIX_EPOCH);
            (modified, entry.path())
        })
        .collect();
    leftovers.sort();

    if !destination.exists() {
        if let Some((_, newest)) = leftovers.pop() {
            warn!(
                backup = %newest.display(),
                partition = %destination.display(),
                "Restoring partition left behind by an interrupted commit"
            );
            fs::rename(&newest, destination).map_err(|e| ExtractError::write(destination, e))?;
        }
    }

    for (_, stale) in leftovers {
        debug!(backup = %stale.display(), "Removing replaced partition");
        fs::remove_dir_all(&stale).map_err(|e| ExtractError::write(&stale, e))?;
    }

    Ok(())
}

/// Temporary directories are created owner-only; a committed partition is read by other stages.
#[cfg(unix)]
fn open_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .map_err(|e| ExtractError::write(path, e))
}

#[cfg(not(unix))]
fn open_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn sync_parent_directory(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Err(e) = fs::File::open(parent).and_then(|dir| dir.sync_all()) {
            debug!(directory = %parent.display(), error = %e, "Could not sync directory");
        }
    }
}

#[cfg(not(unix))]
fn sync_parent_directory(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn run_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn write_table(staged: &StagedPartition, name: &str, rows: usize) -> RawFileSummary {
        let mut writer = staged.create_raw_file(&TableSpec::new(name)).unwrap();
        for id in 0..rows {
            let record = json!({ "id": id }).as_object().unwrap().clone();
            writer.write_record(&record).unwrap();
        }
        writer.finish(staged.sync_files()).unwrap()
    }

    #[test]
    fn test_partition_layout() {
        let manager = OutputManager::new("/data/raw", "prod", run_date());
        assert_eq!(
            manager.partition_relative_path(),
            Path::new("env=prod/run_date=2024-01-01")
        );
        assert_eq!(
            manager.partition_directory(),
            PathBuf::from("/data/raw/env=prod/run_date=2024-01-01")
        );
    }

    #[test]
    fn test_nothing_visible_until_commit() {
        let temp_dir = TempDir::new().unwrap();
        let manager = OutputManager::new(temp_dir.path(), "prod", run_date());

        let staged = manager.prepare().unwrap();
        write_table(&staged, "orders", 3);
        assert!(!manager.partition_directory().exists());

        let committed = staged.commit().unwrap();
        assert_eq!(committed, manager.partition_directory());
        assert!(committed.join("orders.jsonl").exists());

        let leftovers: Vec<_> = fs::read_dir(committed.parent().unwrap())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(leftovers, vec!["run_date=2024-01-01".to_string()]);
    }

    #[test]
    fn test_dropped_stage_leaves_no_partition() {
        let temp_dir = TempDir::new().unwrap();
        let manager = OutputManager::new(temp_dir.path(), "prod", run_date());

        let staged = manager.prepare().unwrap();
        let staging_path = staged.path().to_path_buf();
        write_table(&staged, "orders", 1);
        drop(staged);

        assert!(!staging_path.exists());
        assert!(!manager.partition_directory().exists());
    }

    #[test]
    fn test_commit_replaces_previous_partition() {
        let temp_dir = TempDir::new().unwrap();
        let manager = OutputManager::new(temp_dir.path(), "prod", run_date()).with_sync_files(false);

        let first = manager.prepare().unwrap();
        write_table(&first, "stale_table", 1);
        first.commit().unwrap();

        let second = manager.prepare().unwrap();
        write_table(&second, "orders", 2);
        let committed = second.commit().unwrap();

        assert!(committed.join("orders.jsonl").exists());
        assert!(!committed.join("stale_table.jsonl").exists());

        let entries = fs::read_dir(committed.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_interrupted_commit_is_recovered() {
        let temp_dir = TempDir::new().unwrap();
        let manager = OutputManager::new(temp_dir.path(), "prod", run_date()).with_sync_files(false);
        let env_dir = temp_dir.path().join("env=prod");

        let first = manager.prepare().unwrap();
        write_table(&first, "orders", 1);
        let committed = first.commit().unwrap();

        // Simulate a crash after the old partition was moved aside.
        let backup = env_dir.join(".replaced-run_date=2024-01-01.staging-x");
        fs::rename(&committed, &backup).unwrap();
        assert!(!committed.exists());

        let staged = manager.prepare().unwrap();
        assert!(committed.join("orders.jsonl").exists());
        assert!(!backup.exists());
        drop(staged);

        // A stale backup next to a live partition is removed.
        fs::create_dir_all(&backup).unwrap();
        let _staged = manager.prepare().unwrap();
        assert!(!backup.exists());
        assert!(committed.join("orders.jsonl").exists());
    }

    #[test]
    fn test_manifest_is_written_into_stage() {
        let temp_dir = TempDir::new().unwrap();
        let manager = OutputManager::new(temp_dir.path(), "prod", run_date());
        let run = RunConfig::new(
            "prod",
            true,
            run_date(),
            "postgres://etl:***@db/app",
            temp_dir.path(),
        )
        .unwrap();

        let staged = manager.prepare().unwrap();
        let mut progress = ExtractionProgress::new(1);
        let output = write_table(&staged, "orders", 2);
        progress.finish_table(&output);

        let report = ExtractionReport::new(
            &run,
            "postgres://etl:***@db/app",
            "postgres",
            manager.partition_relative_path(),
            vec![TableSummary {
                table: "orders".to_string(),
                selection: "full".to_string(),
                output,
            }],
            &progress,
        );
        staged.write_manifest(&report).unwrap();
        let committed = staged.commit().unwrap();

        let manifest: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(committed.join(MANIFEST_FILE)).unwrap())
                .unwrap();
        assert_eq!(manifest["environment"], "prod");
        assert_eq!(manifest["run_date"], "2024-01-01");
        assert_eq!(manifest["mode"], "full");
        assert_eq!(manifest["total_rows"], 2);
        assert_eq!(manifest["tables"][0]["file"], "orders.jsonl");
        assert_eq!(manifest["tables"][0]["rows"], 2);
    }

    #[test]
    fn test_output_path_that_is_a_file_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("not-a-dir");
        fs::write(&blocker, "x").unwrap();

        let manager = OutputManager::new(&blocker, "prod", run_date());
        let error = manager.prepare().err().unwrap();
        assert_eq!(error.category(), crate::error::ErrorCategory::Write);
    }
}
