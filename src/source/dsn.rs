use crate::error::{ExtractError, Result};
use std::fmt;
use url::Url;

/// Database family named by the scheme of a connection string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Sqlite,
    Postgres,
    MySql,
}

impl SourceKind {
    pub fn from_dsn(dsn: &str) -> Result<Self> {
        let scheme = dsn
            .split_once(':')
            .map(|(scheme, _)| scheme.to_ascii_lowercase())
            .ok_or_else(|| {
                ExtractError::invalid_argument(
                    "src-dsn",
                    "expected a connection URL such as postgres://user@host/db",
                )
            })?;

        match scheme.as_str() {
            "sqlite" => Ok(SourceKind::Sqlite),
            "postgres" | "postgresql" => Ok(SourceKind::Postgres),
            "mysql" | "mariadb" => Ok(SourceKind::MySql),
            _ => Err(ExtractError::UnsupportedSource { scheme }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Sqlite => "sqlite",
            SourceKind::Postgres => "postgres",
            SourceKind::MySql => "mysql",
        }
    }

    /// Quote a validated identifier, keeping `schema.table` as two quoted parts.
    pub fn quote_identifier(&self, identifier: &str) -> String {
        let (open, close) = match self {
            SourceKind::MySql => ('`', '`'),
            SourceKind::Sqlite | SourceKind::Postgres => ('"', '"'),
        };

        identifier
            .split('.')
            .map(|part| format!("{}{}{}", open, part, close))
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mask the password of a connection string so it can be shown or logged.
pub fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut url) => {
            if url.password().is_some() && url.set_password(Some("***")).is_err() {
                return format!("{}://***", url.scheme());
            }
            url.to_string()
        }
        Err(_) => match dsn.split_once(':') {
            Some((scheme, _)) => format!("{}:***", scheme),
            None => "***".to_string(),
        },
    }
}
