use std::path::Path;
use thiserror::Error;

/// The three ways a run can fail. Every `ExtractError` belongs to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Connection,
    Write,
}

impl ErrorCategory {
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "ValidationError",
            ErrorCategory::Connection => "ConnectionError",
            ErrorCategory::Write => "WriteError",
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorCategory::Validation => 2,
            ErrorCategory::Connection => 3,
            ErrorCategory::Write => 4,
        }
    }
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Invalid value for --{flag}: {message}")]
    InvalidArgument { flag: String, message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Unsupported source driver '{scheme}'")]
    UnsupportedSource { scheme: String },

    #[error("Failed to connect to source {target}: {source}")]
    Connection {
        target: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Timed out connecting to source {target} after {seconds} seconds")]
    ConnectTimeout { target: String, seconds: u64 },

    #[error("Failed to read table {table}: {source}")]
    Query {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Column {column} of table {table} has a type that cannot be written as raw JSON")]
    UnsupportedColumn { table: String, column: String },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize {what}: {source}")]
    Serialize {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Permission denied: {path}")]
    Permission { path: String },
}

impl ExtractError {
    pub fn invalid_argument<F: Into<String>, M: Into<String>>(flag: F, message: M) -> Self {
        ExtractError::InvalidArgument {
            flag: flag.into(),
            message: message.into(),
        }
    }

    pub fn config<M: Into<String>>(message: M) -> Self {
        ExtractError::Config {
            message: message.into(),
        }
    }

    pub fn write<P: AsRef<Path>>(path: P, source: std::io::Error) -> Self {
        ExtractError::Write {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ExtractError::InvalidArgument { .. }
            | ExtractError::Config { .. }
            | ExtractError::UnsupportedSource { .. } => ErrorCategory::Validation,
            ExtractError::Connection { .. }
            | ExtractError::ConnectTimeout { .. }
            | ExtractError::Query { .. }
            | ExtractError::UnsupportedColumn { .. } => ErrorCategory::Connection,
            ExtractError::Write { .. }
            | ExtractError::Serialize { .. }
            | ExtractError::Permission { .. } => ErrorCategory::Write,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.category().exit_code()
    }
}

pub trait UserFriendlyError {
    fn user_message(&self) -> String;
    fn suggestion(&self) -> Option<String>;
}

impl UserFriendlyError for ExtractError {
    fn user_message(&self) -> String {
        format!("{}: {}", self.category().label(), self)
    }

    fn suggestion(&self) -> Option<String> {
        match self {
            ExtractError::InvalidArgument { flag, .. } if flag == "full-reload" => Some(
                "Pass --full-reload true for a full snapshot or --full-reload false for an incremental slice.".to_string()
            ),
            ExtractError::InvalidArgument { flag, .. } if flag == "run-date" => Some(
                "Pass the run date as YYYY-MM-DD, e.g. --run-date 2024-01-01.".to_string()
            ),
            ExtractError::InvalidArgument { .. } => Some(
                "Run with --help to see the expected format of each flag.".to_string()
            ),
            ExtractError::Config { .. } => Some(
                "Check your configuration file syntax and ensure every table has a valid name.".to_string()
            ),
            ExtractError::UnsupportedSource { .. } => Some(
                "Use a sqlite://, postgres:// or mysql:// connection string.".to_string()
            ),
            ExtractError::Connection { .. } | ExtractError::ConnectTimeout { .. } => Some(
                "Verify the source is reachable and the credentials in --src-dsn are correct.".to_string()
            ),
            ExtractError::Query { .. } => Some(
                "Check that the table exists and that the source user can read it; run with --dry-run to see the query.".to_string()
            ),
            ExtractError::UnsupportedColumn { .. } => Some(
                "List the table's columns under `select` in the configuration file and cast the column to text.".to_string()
            ),
            ExtractError::Write { .. } | ExtractError::Permission { .. } => Some(
                "Ensure the output directory exists or can be created and is writable.".to_string()
            ),
            ExtractError::Serialize { .. } => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ExtractError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories_and_exit_codes() {
        let validation = ExtractError::invalid_argument("run-date", "not a date");
        assert_eq!(validation.category(), ErrorCategory::Validation);
        assert_eq!(validation.exit_code(), 2);

        let connection = ExtractError::ConnectTimeout {
            target: "postgres://db/app".to_string(),
            seconds: 5,
        };
        assert_eq!(connection.category(), ErrorCategory::Connection);
        assert_eq!(connection.exit_code(), 3);

        let write = ExtractError::write(
            "/tmp/out",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(write.category(), ErrorCategory::Write);
        assert_eq!(write.exit_code(), 4);
    }

    #[test]
    fn test_user_friendly_messages() {
        let error = ExtractError::invalid_argument("full-reload", "expected true or false, got 'yes'");
        let message = error.user_message();
        assert!(message.starts_with("ValidationError"));
        assert!(message.contains("--full-reload"));
        assert!(error.suggestion().unwrap().contains("--full-reload true"));
    }

    #[test]
    fn test_read_failures_carry_suggestions() {
        let query = ExtractError::Query {
            table: "orders".to_string(),
            source: sqlx::Error::RowNotFound,
        };
        assert!(query.user_message().starts_with("ConnectionError"));
        assert!(query.suggestion().unwrap().contains("table exists"));

        let column = ExtractError::UnsupportedColumn {
            table: "orders".to_string(),
            column: "window".to_string(),
        };
        assert_eq!(column.exit_code(), 3);
        assert!(column.user_message().contains("Column window of table orders"));
        assert!(column.suggestion().unwrap().contains("cast the column to text"));
    }
}
