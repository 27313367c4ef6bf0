use crate::config::{ExtractionMode, TableSpec, RUN_DATE_FORMAT};
use crate::source::SourceKind;
use chrono::NaiveDate;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

const MAX_IDENTIFIER_LEN: usize = 63;

/// Which rows of a table a run reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Full,
    /// Half-open `[from, until)` on `column`. `until` is `None` only for the last representable date.
    Window {
        column: String,
        from: NaiveDate,
        until: Option<NaiveDate>,
    },
}

impl Selection {
    pub fn for_table(table: &TableSpec, mode: ExtractionMode, run_date: NaiveDate) -> Self {
        match (mode, &table.incremental_column) {
            (ExtractionMode::Incremental, Some(column)) => Selection::Window {
                column: column.clone(),
                from: run_date,
                until: run_date.succ_opt(),
            },
            _ => Selection::Full,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Selection::Full)
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::Full => write!(f, "full"),
            Selection::Window {
                column,
                from,
                until: Some(until),
            } => write!(f, "{} in [{}, {})", column, from, until),
            Selection::Window {
                column,
                from,
                until: None,
            } => write!(f, "{} >= {}", column, from),
        }
    }
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*$").expect("identifier pattern is valid")
    })
}

/// Accepts `name` or `schema.name`, each part a plain SQL identifier.
pub fn validate_identifier(identifier: &str) -> std::result::Result<(), String> {
    if identifier.is_empty() {
        return Err("identifier must not be empty".to_string());
    }

    let parts: Vec<&str> = identifier.split('.').collect();
    if parts.len() > 2 {
        return Err("at most one schema qualifier is allowed".to_string());
    }

    for part in parts {
        if part.len() > MAX_IDENTIFIER_LEN {
            return Err(format!(
                "identifier parts must be {} characters or less",
                MAX_IDENTIFIER_LEN
            ));
        }

        if !identifier_pattern().is_match(part) {
            return Err(
                "only letters, digits, underscores and dollar signs are allowed, starting with a letter or underscore"
                    .to_string(),
            );
        }
    }

    Ok(())
}

/// Build the SELECT for one table. Identifiers must already have passed
/// `validate_identifier`; dates are rendered from parsed values only.
pub fn build_select(kind: SourceKind, table: &TableSpec, selection: &Selection) -> String {
    let columns = if table.select.is_empty() {
        "*".to_string()
    } else {
        table.select.join(", ")
    };

    let mut sql = format!(
        "SELECT {} FROM {}",
        columns,
        kind.quote_identifier(&table.name)
    );

    if let Selection::Window {
        column,
        from,
        until,
    } = selection
    {
        let column = kind.quote_identifier(column);
        sql.push_str(&format!(
            " WHERE {} >= '{}'",
            column,
            from.format(RUN_DATE_FORMAT)
        ));
        if let Some(until) = until {
            sql.push_str(&format!(
                " AND {} < '{}'",
                column,
                until.format(RUN_DATE_FORMAT)
            ));
        }
    }

    sql
}
