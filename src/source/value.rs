use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use serde_json::Value;

/// How a source column is read and rendered into a raw record.
///
/// Dates and times become ISO-8601 strings. Decimals and UUIDs become strings
/// so no precision is lost. Binary values become lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Bool,
    Int16,
    Int32,
    Int64,
    UInt64,
    Float32,
    Float64,
    Decimal,
    Text,
    Uuid,
    Json,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Bytes,
}

impl ValueKind {
    /// Map a Postgres type name (as reported by the driver) to its rendering.
    pub fn for_postgres(type_name: &str) -> Option<Self> {
        let kind = match type_name {
            "BOOL" => ValueKind::Bool,
            "INT2" => ValueKind::Int16,
            "INT4" => ValueKind::Int32,
            "INT8" => ValueKind::Int64,
            "FLOAT4" => ValueKind::Float32,
            "FLOAT8" => ValueKind::Float64,
            "NUMERIC" => ValueKind::Decimal,
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => ValueKind::Text,
            "UUID" => ValueKind::Uuid,
            "JSON" | "JSONB" => ValueKind::Json,
            "DATE" => ValueKind::Date,
            "TIME" => ValueKind::Time,
            "TIMESTAMP" => ValueKind::Timestamp,
            "TIMESTAMPTZ" => ValueKind::TimestampTz,
            "BYTEA" => ValueKind::Bytes,
            _ => return None,
        };
        Some(kind)
    }

    /// Map a MySQL/MariaDB type name to its rendering.
    pub fn for_mysql(type_name: &str) -> Option<Self> {
        if type_name.ends_with(" UNSIGNED") {
            return Some(ValueKind::UInt64);
        }

        let kind = match type_name {
            "BOOLEAN" => ValueKind::Bool,
            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => ValueKind::Int64,
            "FLOAT" => ValueKind::Float32,
            "DOUBLE" => ValueKind::Float64,
            "DECIMAL" => ValueKind::Decimal,
            "CHAR" | "VARCHAR" | "TINYTEXT" | "TEXT" | "MEDIUMTEXT" | "LONGTEXT" | "ENUM"
            | "SET" => ValueKind::Text,
            "JSON" => ValueKind::Json,
            "DATE" => ValueKind::Date,
            "TIME" => ValueKind::Time,
            "DATETIME" => ValueKind::Timestamp,
            "TIMESTAMP" => ValueKind::TimestampTz,
            "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
                ValueKind::Bytes
            }
            _ => return None,
        };
        Some(kind)
    }
}

pub fn float_value(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

pub fn date_value(value: NaiveDate) -> Value {
    Value::String(value.format("%Y-%m-%d").to_string())
}

pub fn time_value(value: NaiveTime) -> Value {
    Value::String(value.format("%H:%M:%S%.f").to_string())
}

pub fn timestamp_value(value: NaiveDateTime) -> Value {
    Value::String(value.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
}

pub fn timestamp_tz_value(value: DateTime<Utc>) -> Value {
    Value::String(value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

pub fn bytes_value(bytes: &[u8]) -> Value {
    Value::String(to_hex(bytes))
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_type_names() {
        assert_eq!(ValueKind::for_postgres("TIMESTAMPTZ"), Some(ValueKind::TimestampTz));
        assert_eq!(ValueKind::for_postgres("DATE"), Some(ValueKind::Date));
        assert_eq!(ValueKind::for_postgres("UUID"), Some(ValueKind::Uuid));
        assert_eq!(ValueKind::for_postgres("JSONB"), Some(ValueKind::Json));
        assert_eq!(ValueKind::for_postgres("NUMERIC"), Some(ValueKind::Decimal));
        assert_eq!(ValueKind::for_postgres("INTERVAL"), None);
        assert_eq!(ValueKind::for_postgres("INT4[]"), None);
    }

    #[test]
    fn test_mysql_type_names() {
        assert_eq!(ValueKind::for_mysql("BIGINT UNSIGNED"), Some(ValueKind::UInt64));
        assert_eq!(ValueKind::for_mysql("BOOLEAN"), Some(ValueKind::Bool));
        assert_eq!(ValueKind::for_mysql("DATETIME"), Some(ValueKind::Timestamp));
        assert_eq!(ValueKind::for_mysql("LONGTEXT"), Some(ValueKind::Text));
        assert_eq!(ValueKind::for_mysql("VARBINARY"), Some(ValueKind::Bytes));
        assert_eq!(ValueKind::for_mysql("GEOMETRY"), None);
    }

    #[test]
    fn test_temporal_values_are_iso_8601() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let time = NaiveTime::from_hms_milli_opt(8, 30, 0, 250).unwrap();

        assert_eq!(date_value(date), Value::from("2024-01-01"));
        assert_eq!(time_value(time), Value::from("08:30:00.250"));
        assert_eq!(
            timestamp_value(date.and_time(time)),
            Value::from("2024-01-01T08:30:00.250")
        );
        assert_eq!(
            timestamp_tz_value(DateTime::from_timestamp(1_704_067_200, 0).unwrap()),
            Value::from("2024-01-01T00:00:00Z")
        );
    }

    #[test]
    fn test_float_and_bytes() {
        assert_eq!(float_value(2.5), Value::from(2.5));
        assert_eq!(float_value(f64::NAN), Value::Null);
        assert_eq!(bytes_value(&[0x00, 0xab, 0x10]), Value::from("00ab10"));
    }
}
