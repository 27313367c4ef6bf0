use crate::config::TableSpec;
use crate::error::{ExtractError, Result};
use crate::source::value::{self, ValueKind};
use crate::source::{build_select, redact_dsn, Selection, SourceKind};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures::{Stream, TryStreamExt};
use serde_json::{Map, Value};
use sqlx::mysql::{MySqlConnection, MySqlRow};
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::types::{Decimal, JsonValue, Uuid};
use sqlx::{Column, ColumnIndex, Connection, Decode, Row, Type, TypeInfo, ValueRef};
use std::time::Duration;
use tracing::{debug, info};

pub type RawRecord = Map<String, Value>;

/// Driver-specific connection. Each variant decodes its own column types.
enum SourceConnection {
    Sqlite(SqliteConnection),
    Postgres(PgConnection),
    MySql(MySqlConnection),
}

impl SourceConnection {
    async fn open(kind: SourceKind, dsn: &str) -> std::result::Result<Self, sqlx::Error> {
        let connection = match kind {
            SourceKind::Sqlite => SourceConnection::Sqlite(SqliteConnection::connect(dsn).await?),
            SourceKind::Postgres => SourceConnection::Postgres(PgConnection::connect(dsn).await?),
            SourceKind::MySql => SourceConnection::MySql(MySqlConnection::connect(dsn).await?),
        };
        Ok(connection)
    }

    async fn close(self) -> std::result::Result<(), sqlx::Error> {
        match self {
            SourceConnection::Sqlite(connection) => connection.close().await,
            SourceConnection::Postgres(connection) => connection.close().await,
            SourceConnection::MySql(connection) => connection.close().await,
        }
    }
}

/// A single open connection to the source system.
pub struct SourceDatabase {
    connection: SourceConnection,
    kind: SourceKind,
    target: String,
}

impl SourceDatabase {
    pub async fn connect(dsn: &str, timeout: Duration) -> Result<Self> {
        let kind = SourceKind::from_dsn(dsn)?;
        let target = redact_dsn(dsn);

        debug!(source = %target, driver = %kind, "Connecting to source database");
        let connection = match tokio::time::timeout(timeout, SourceConnection::open(kind, dsn)).await
        {
            Ok(Ok(connection)) => connection,
            Ok(Err(source)) => return Err(ExtractError::Connection { target, source }),
            Err(_) => {
                return Err(ExtractError::ConnectTimeout {
                    target,
                    seconds: timeout.as_secs(),
                })
            }
        };

        info!(source = %target, driver = %kind, "Connected to source database");

        Ok(Self {
            connection,
            kind,
            target,
        })
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// The connection string with its password masked.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Stream the selected rows of `table` into `on_row`, one record at a time.
    /// Returns the number of rows read.
    pub async fn stream_table<F>(
        &mut self,
        table: &TableSpec,
        selection: &Selection,
        mut on_row: F,
    ) -> Result<u64>
    where
        F: FnMut(RawRecord) -> Result<()>,
    {
        let sql = build_select(self.kind, table, selection);
        debug!(table = %table.name, %sql, "Running extraction query");

        let count = match &mut self.connection {
            SourceConnection::Sqlite(connection) => {
                let rows = sqlx::query(&sql).fetch(connection);
                drain(rows, table, &mut on_row, decode_sqlite).await?
            }
            SourceConnection::Postgres(connection) => {
                let rows = sqlx::query(&sql).fetch(connection);
                drain(rows, table, &mut on_row, decode_postgres).await?
            }
            SourceConnection::MySql(connection) => {
                let rows = sqlx::query(&sql).fetch(connection);
                drain(rows, table, &mut on_row, decode_mysql).await?
            }
        };

        debug!(table = %table.name, rows = count, "Finished reading table");
        Ok(count)
    }

    pub async fn close(self) {
        if let Err(e) = self.connection.close().await {
            debug!(error = %e, "Source connection did not close cleanly");
        }
    }
}

async fn drain<R, S, F>(
    mut rows: S,
    table: &TableSpec,
    on_row: &mut F,
    decode: fn(&R, usize) -> Option<Value>,
) -> Result<u64>
where
    R: Row,
    S: Stream<Item = std::result::Result<R, sqlx::Error>> + Unpin,
    F: FnMut(RawRecord) -> Result<()>,
{
    let mut count = 0u64;

    while let Some(row) = rows.try_next().await.map_err(|source| ExtractError::Query {
        table: table.name.clone(),
        source,
    })? {
        on_row(row_to_record(&table.name, &row, decode)?)?;
        count += 1;
    }

    Ok(count)
}

fn row_to_record<R: Row>(
    table: &str,
    row: &R,
    decode: fn(&R, usize) -> Option<Value>,
) -> Result<RawRecord> {
    let mut record = Map::with_capacity(row.columns().len());

    for column in row.columns() {
        let value = decode(row, column.ordinal()).ok_or_else(|| ExtractError::UnsupportedColumn {
            table: table.to_string(),
            column: column.name().to_string(),
        })?;
        record.insert(column.name().to_string(), value);
    }

    Ok(record)
}

/// SQLite values carry their storage class; the declared column type only
/// refines how integers are rendered.
fn decode_sqlite(row: &SqliteRow, index: usize) -> Option<Value> {
    let raw = row.try_get_raw(index).ok()?;
    if raw.is_null() {
        return Some(Value::Null);
    }

    let storage = raw.type_info().name().to_string();
    let declared = row.column(index).type_info().name().to_string();

    match storage.as_str() {
        "INTEGER" => {
            let number = row.try_get::<i64, _>(index).ok()?;
            match declared.as_str() {
                "BOOLEAN" => Some(Value::Bool(number != 0)),
                // Unix seconds
                "DATETIME" => DateTime::from_timestamp(number, 0).map(value::timestamp_tz_value),
                "DATE" => {
                    DateTime::from_timestamp(number, 0).map(|at| value::date_value(at.date_naive()))
                }
                _ => Some(Value::from(number)),
            }
        }
        "REAL" => row.try_get::<f64, _>(index).ok().map(value::float_value),
        "TEXT" => row.try_get::<String, _>(index).ok().map(Value::String),
        "BLOB" => row
            .try_get::<Vec<u8>, _>(index)
            .ok()
            .map(|bytes| value::bytes_value(&bytes)),
        _ => None,
    }
}

fn decode_postgres(row: &PgRow, index: usize) -> Option<Value> {
    if row.try_get_raw(index).ok()?.is_null() {
        return Some(Value::Null);
    }

    let kind = ValueKind::for_postgres(row.column(index).type_info().name())?;
    decode_kind(row, index, kind)
}

fn decode_mysql(row: &MySqlRow, index: usize) -> Option<Value> {
    if row.try_get_raw(index).ok()?.is_null() {
        return Some(Value::Null);
    }

    match ValueKind::for_mysql(row.column(index).type_info().name())? {
        ValueKind::UInt64 => row.try_get::<u64, _>(index).ok().map(Value::from),
        kind => decode_kind(row, index, kind),
    }
}

/// Decode one non-null value for drivers with a typed wire protocol.
fn decode_kind<'r, R>(row: &'r R, index: usize, kind: ValueKind) -> Option<Value>
where
    R: Row,
    usize: ColumnIndex<R>,
    bool: Decode<'r, R::Database> + Type<R::Database>,
    i16: Decode<'r, R::Database> + Type<R::Database>,
    i32: Decode<'r, R::Database> + Type<R::Database>,
    i64: Decode<'r, R::Database> + Type<R::Database>,
    f32: Decode<'r, R::Database> + Type<R::Database>,
    f64: Decode<'r, R::Database> + Type<R::Database>,
    Decimal: Decode<'r, R::Database> + Type<R::Database>,
    String: Decode<'r, R::Database> + Type<R::Database>,
    Uuid: Decode<'r, R::Database> + Type<R::Database>,
    JsonValue: Decode<'r, R::Database> + Type<R::Database>,
    NaiveDate: Decode<'r, R::Database> + Type<R::Database>,
    NaiveTime: Decode<'r, R::Database> + Type<R::Database>,
    NaiveDateTime: Decode<'r, R::Database> + Type<R::Database>,
    DateTime<Utc>: Decode<'r, R::Database> + Type<R::Database>,
    Vec<u8>: Decode<'r, R::Database> + Type<R::Database>,
{
    let decoded = match kind {
        ValueKind::Bool => Value::Bool(row.try_get::<bool, _>(index).ok()?),
        ValueKind::Int16 => Value::from(row.try_get::<i16, _>(index).ok()?),
        ValueKind::Int32 => Value::from(row.try_get::<i32, _>(index).ok()?),
        ValueKind::Int64 => Value::from(row.try_get::<i64, _>(index).ok()?),
        ValueKind::Float32 => value::float_value(f64::from(row.try_get::<f32, _>(index).ok()?)),
        ValueKind::Float64 => value::float_value(row.try_get::<f64, _>(index).ok()?),
        ValueKind::Decimal => Value::String(row.try_get::<Decimal, _>(index).ok()?.to_string()),
        ValueKind::Text => Value::String(row.try_get::<String, _>(index).ok()?),
        ValueKind::Uuid => Value::String(row.try_get::<Uuid, _>(index).ok()?.to_string()),
        ValueKind::Json => row.try_get::<JsonValue, _>(index).ok()?,
        ValueKind::Date => value::date_value(row.try_get::<NaiveDate, _>(index).ok()?),
        ValueKind::Time => value::time_value(row.try_get::<NaiveTime, _>(index).ok()?),
        ValueKind::Timestamp => value::timestamp_value(row.try_get::<NaiveDateTime, _>(index).ok()?),
        ValueKind::TimestampTz => {
            value::timestamp_tz_value(row.try_get::<DateTime<Utc>, _>(index).ok()?)
        }
        ValueKind::Bytes => value::bytes_value(&row.try_get::<Vec<u8>, _>(index).ok()?),
        // Only MySQL reports unsigned columns; it decodes them itself.
        ValueKind::UInt64 => return None,
    };
    Some(decoded)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::ExtractionMode;
    use chrono::NaiveDate;
    use std::path::Path;
    use tempfile::TempDir;

    pub(crate) async fn seed_sqlite(path: &Path, statements: &[&str]) -> String {
        let dsn = format!("sqlite://{}", path.display());
        let mut connection = SqliteConnection::connect(&format!("{}?mode=rwc", dsn))
            .await
            .unwrap();
        for statement in statements {
            sqlx::query(statement).execute(&mut connection).await.unwrap();
        }
        connection.close().await.unwrap();
        dsn
    }

    pub(crate) const ORDERS_FIXTURE: &[&str] = &[
        "CREATE TABLE orders (id INTEGER PRIMARY KEY, customer TEXT, amount REAL, note TEXT, updated_at TEXT NOT NULL)",
        "INSERT INTO orders VALUES (1, 'acme', 19.5, NULL, '2023-12-31 23:59:59')",
        "INSERT INTO orders VALUES (2, 'globex', 5.0, 'rush', '2024-01-01 00:00:00')",
        "INSERT INTO orders VALUES (3, 'initech', 12.25, NULL, '2024-01-01 18:30:00')",
        "INSERT INTO orders VALUES (4, 'acme', 7.75, NULL, '2024-01-02 00:00:00')",
    ];

    pub(crate) const EVENTS_FIXTURE: &[&str] = &[
        "CREATE TABLE events (id INTEGER PRIMARY KEY, active BOOLEAN, happened_on DATE, amount NUMERIC, payload BLOB, updated_at DATETIME NOT NULL)",
        "INSERT INTO events VALUES (1, 1, '2023-12-31', 10.5, x'0aff', '2023-12-31 22:00:00')",
        "INSERT INTO events VALUES (2, 0, '2024-01-01', 3, NULL, '2024-01-01 08:30:00')",
        "INSERT INTO events VALUES (3, 1, '2024-01-01', NULL, NULL, '2024-01-01 23:59:59')",
        "INSERT INTO events VALUES (4, 0, '2024-01-02', 1, NULL, '2024-01-02 00:00:00')",
    ];

    async fn collect(
        database: &mut SourceDatabase,
        table: &TableSpec,
        selection: &Selection,
    ) -> Vec<RawRecord> {
        let mut records = Vec::new();
        let count = database
            .stream_table(table, selection, |record| {
                records.push(record);
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(count as usize, records.len());
        records
    }

    #[tokio::test]
    async fn test_stream_full_and_incremental() {
        let temp_dir = TempDir::new().unwrap();
        let dsn = seed_sqlite(&temp_dir.path().join("source.db"), ORDERS_FIXTURE).await;

        let mut database = SourceDatabase::connect(&dsn, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(database.kind(), SourceKind::Sqlite);

        let orders = TableSpec::new("orders").with_incremental_column("updated_at");
        let run_date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();

        let full = collect(&mut database, &orders, &Selection::Full).await;
        assert_eq!(full.len(), 4);

        let window = Selection::for_table(&orders, ExtractionMode::Incremental, run_date);
        let slice = collect(&mut database, &orders, &window).await;
        let ids: Vec<i64> = slice.iter().map(|r| r["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![2, 3]);

        database.close().await;
    }

    #[tokio::test]
    async fn test_values_are_decoded_by_type() {
        let temp_dir = TempDir::new().unwrap();
        let dsn = seed_sqlite(&temp_dir.path().join("source.db"), ORDERS_FIXTURE).await;
        let mut database = SourceDatabase::connect(&dsn, Duration::from_secs(5))
            .await
            .unwrap();

        let records = collect(&mut database, &TableSpec::new("orders"), &Selection::Full).await;
        let first = &records[0];
        assert_eq!(first["id"], Value::from(1));
        assert_eq!(first["customer"], Value::from("acme"));
        assert_eq!(first["amount"], Value::from(19.5));
        assert_eq!(first["note"], Value::Null);
    }

    #[tokio::test]
    async fn test_missing_table_is_a_query_error() {
        let temp_dir = TempDir::new().unwrap();
        let dsn = seed_sqlite(&temp_dir.path().join("source.db"), ORDERS_FIXTURE).await;
        let mut database = SourceDatabase::connect(&dsn, Duration::from_secs(5))
            .await
            .unwrap();

        let result = database
            .stream_table(&TableSpec::new("missing"), &Selection::Full, |_| Ok(()))
            .await;
        assert!(matches!(result, Err(ExtractError::Query { .. })));
    }

    #[tokio::test]
    async fn test_unreachable_source_is_a_connection_error() {
        let temp_dir = TempDir::new().unwrap();
        let dsn = format!("sqlite://{}", temp_dir.path().join("absent.db").display());

        let error = SourceDatabase::connect(&dsn, Duration::from_secs(5))
            .await
            .err()
            .unwrap();
        assert_eq!(error.category(), crate::error::ErrorCategory::Connection);
    }

    #[tokio::test]
    async fn test_typed_columns_are_decoded() {
        let temp_dir = TempDir::new().unwrap();
        let dsn = seed_sqlite(&temp_dir.path().join("source.db"), EVENTS_FIXTURE).await;
        let mut database = SourceDatabase::connect(&dsn, Duration::from_secs(5))
            .await
            .unwrap();

        let events = TableSpec::new("events").with_incremental_column("updated_at");
        let run_date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();

        let full = collect(&mut database, &events, &Selection::Full).await;
        assert_eq!(full.len(), 4);
        assert_eq!(full[0]["active"], Value::Bool(true));
        assert_eq!(full[0]["happened_on"], Value::from("2023-12-31"));
        assert_eq!(full[0]["amount"], Value::from(10.5));
        assert_eq!(full[0]["payload"], Value::from("0aff"));
        assert_eq!(full[0]["updated_at"], Value::from("2023-12-31 22:00:00"));
        assert_eq!(full[1]["active"], Value::Bool(false));
        assert_eq!(full[1]["amount"], Value::from(3));
        assert_eq!(full[2]["amount"], Value::Null);

        let window = Selection::for_table(&events, ExtractionMode::Incremental, run_date);
        let slice = collect(&mut database, &events, &window).await;
        let ids: Vec<i64> = slice.iter().map(|r| r["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![2, 3]);

        database.close().await;
    }

    #[tokio::test]
    async fn test_undecodable_column_names_table_and_column() {
        let temp_dir = TempDir::new().unwrap();
        let dsn = seed_sqlite(&temp_dir.path().join("source.db"), ORDERS_FIXTURE).await;
        let mut connection = SqliteConnection::connect(&dsn).await.unwrap();

        let row = sqlx::query("SELECT id FROM orders")
            .fetch_one(&mut connection)
            .await
            .unwrap();
        let error = row_to_record("orders", &row, |_, _| None).unwrap_err();

        assert!(matches!(
            error,
            ExtractError::UnsupportedColumn { ref table, ref column } if table == "orders" && column == "id"
        ));
    }

    #[tokio::test]
    async fn test_epoch_datetime_is_rendered_as_iso_8601() {
        let temp_dir = TempDir::new().unwrap();
        let dsn = seed_sqlite(
            &temp_dir.path().join("source.db"),
            &[
                "CREATE TABLE ticks (id INTEGER PRIMARY KEY, at DATETIME, day DATE)",
                "INSERT INTO ticks VALUES (1, 1704067200, 1704067200)",
            ],
        )
        .await;
        let mut database = SourceDatabase::connect(&dsn, Duration::from_secs(5))
            .await
            .unwrap();

        let records = collect(&mut database, &TableSpec::new("ticks"), &Selection::Full).await;
        assert_eq!(records[0]["at"], Value::from("2024-01-01T00:00:00Z"));
        assert_eq!(records[0]["day"], Value::from("2024-01-01"));
    }
}
