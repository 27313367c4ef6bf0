use crate::error::{ExtractError, Result};
use crate::source::{validate_identifier, SourceKind};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const RUN_DATE_FORMAT: &str = "%Y-%m-%d";

/// Everything one invocation needs. Built once from the command line and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    environment: String,
    full_reload: bool,
    run_date: NaiveDate,
    source_connection: String,
    output_directory: PathBuf,
}

impl RunConfig {
    pub fn new<E, S, P>(
        environment: E,
        full_reload: bool,
        run_date: NaiveDate,
        source_connection: S,
        output_directory: P,
    ) -> Result<Self>
    where
        E: Into<String>,
        S: Into<String>,
        P: Into<PathBuf>,
    {
        let environment = environment.into();
        validate_environment(&environment)?;

        let source_connection = source_connection.into();
        if source_connection.trim().is_empty() {
            return Err(ExtractError::invalid_argument("src-dsn", "must not be empty"));
        }
        SourceKind::from_dsn(&source_connection)?;

        let output_directory = output_directory.into();
        if output_directory.as_os_str().is_empty() {
            return Err(ExtractError::invalid_argument("output-dir", "must not be empty"));
        }

        Ok(Self {
            environment,
            full_reload,
            run_date,
            source_connection,
            output_directory,
        })
    }

    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder::default()
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn full_reload(&self) -> bool {
        self.full_reload
    }

    pub fn run_date(&self) -> NaiveDate {
        self.run_date
    }

    pub fn source_connection(&self) -> &str {
        &self.source_connection
    }

    pub fn output_directory(&self) -> &Path {
        &self.output_directory
    }

    pub fn mode(&self) -> ExtractionMode {
        if self.full_reload {
            ExtractionMode::Full
        } else {
            ExtractionMode::Incremental
        }
    }
}

/// Collects the raw flag values and rejects the set if any one is missing or malformed.
#[derive(Debug, Default, Clone)]
pub struct RunConfigBuilder {
    environment: Option<String>,
    full_reload: Option<String>,
    run_date: Option<String>,
    source_connection: Option<String>,
    output_directory: Option<PathBuf>,
}

impl RunConfigBuilder {
    pub fn with_environment(mut self, environment: Option<String>) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_full_reload(mut self, full_reload: Option<String>) -> Self {
        self.full_reload = full_reload;
        self
    }

    pub fn with_run_date(mut self, run_date: Option<String>) -> Self {
        self.run_date = run_date;
        self
    }

    pub fn with_source_connection(mut self, dsn: Option<String>) -> Self {
        self.source_connection = dsn;
        self
    }

    pub fn with_output_directory(mut self, output_dir: Option<PathBuf>) -> Self {
        self.output_directory = output_dir;
        self
    }

    pub fn build(self) -> Result<RunConfig> {
        let environment = required("env", self.environment)?;
        let full_reload = parse_full_reload(&required("full-reload", self.full_reload)?)?;
        let run_date = parse_run_date(&required("run-date", self.run_date)?)?;
        let source_connection = required("src-dsn", self.source_connection)?;
        let output_directory = required("output-dir", self.output_directory)?;

        RunConfig::new(
            environment,
            full_reload,
            run_date,
            source_connection,
            output_directory,
        )
    }
}

fn required<T>(flag: &str, value: Option<T>) -> Result<T> {
    value.ok_or_else(|| ExtractError::invalid_argument(flag, "is required"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMode {
    Full,
    Incremental,
}

impl fmt::Display for ExtractionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionMode::Full => write!(f, "full"),
            ExtractionMode::Incremental => write!(f, "incremental"),
        }
    }
}

pub fn parse_full_reload(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(ExtractError::invalid_argument(
            "full-reload",
            format!("expected true or false, got '{}'", other),
        )),
    }
}

pub fn parse_run_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), RUN_DATE_FORMAT).map_err(|e| {
        ExtractError::invalid_argument(
            "run-date",
            format!("expected a YYYY-MM-DD calendar date, got '{}' ({})", value, e),
        )
    })
}

/// The environment names a partition directory, so it has to be a safe path segment.
pub fn validate_environment(environment: &str) -> Result<()> {
    if environment.is_empty() {
        return Err(ExtractError::invalid_argument("env", "must not be empty"));
    }

    if environment.len() > 64 {
        return Err(ExtractError::invalid_argument(
            "env",
            "must be 64 characters or less",
        ));
    }

    if environment.starts_with('.') {
        return Err(ExtractError::invalid_argument("env", "cannot start with a dot"));
    }

    let valid = environment
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if !valid {
        return Err(ExtractError::invalid_argument(
            "env",
            "only ASCII letters, digits, hyphens, underscores and dots are allowed",
        ));
    }

    Ok(())
}

/// Job settings read from TOML. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub output: OutputConfig,
    pub tables: Vec<TableSpec>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Seconds to wait for the source to accept a connection.
    pub connect_timeout: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    pub write_manifest: bool,
    /// fsync each raw file before the partition is committed
    pub sync_files: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TableSpec {
    pub name: String,
    #[serde(default)]
    pub incremental_column: Option<String>,
    #[serde(default)]
    pub select: Vec<String>,
}

impl TableSpec {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            incremental_column: None,
            select: Vec::new(),
        }
    }

    pub fn with_incremental_column<S: Into<String>>(mut self, column: S) -> Self {
        self.incremental_column = Some(column.into());
        self
    }

    pub fn with_select(mut self, columns: Vec<String>) -> Self {
        self.select = columns;
        self
    }

    /// `sales.orders` is written as `sales.orders.jsonl`.
    pub fn file_name(&self) -> String {
        format!("{}.jsonl", self.name)
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            connect_timeout: 30,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            write_manifest: true,
            sync_files: true,
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ExtractError::config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            ExtractError::config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| {
            ExtractError::config(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })?;

        Ok(config)
    }

    pub fn load_with_defaults<P: AsRef<Path>>(config_path: Option<P>) -> Result<Self> {
        match config_path {
            Some(path) => Self::load_from_file(path),
            None => {
                let default_paths = ["raw-extract.toml", ".raw-extract.toml"];

                for default_path in &default_paths {
                    if Path::new(default_path).exists() {
                        return Self::load_from_file(default_path);
                    }
                }

                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.connect_timeout == 0 {
            return Err(ExtractError::config(
                "source.connect_timeout must be greater than 0",
            ));
        }

        let mut seen = HashSet::new();
        for table in &self.tables {
            validate_identifier(&table.name).map_err(|message| {
                ExtractError::config(format!("Invalid table name '{}': {}", table.name, message))
            })?;

            if !seen.insert(table.name.to_lowercase()) {
                return Err(ExtractError::config(format!(
                    "Table '{}' is listed more than once",
                    table.name
                )));
            }

            if let Some(ref column) = table.incremental_column {
                validate_identifier(column).map_err(|message| {
                    ExtractError::config(format!(
                        "Invalid incremental column '{}' for table '{}': {}",
                        column, table.name, message
                    ))
                })?;
            }

            if table.select.iter().any(|expr| expr.trim().is_empty()) {
                return Err(ExtractError::config(format!(
                    "Table '{}' has an empty entry in select",
                    table.name
                )));
            }

            // Select entries are column expressions, never extra statements.
            if let Some(expr) = table
                .select
                .iter()
                .find(|expr| expr.contains(';') || expr.contains("--") || expr.contains("/*"))
            {
                return Err(ExtractError::config(format!(
                    "Table '{}' has a select entry with a statement separator or comment: {}",
                    table.name, expr
                )));
            }
        }

        Ok(())
    }

    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.source.connect_timeout)
    }
}
