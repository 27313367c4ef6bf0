pub mod database;
pub mod dsn;
pub mod selection;
pub mod value;

pub use database::{RawRecord, SourceDatabase};
pub use dsn::{redact_dsn, SourceKind};
pub use selection::{build_select, validate_identifier, Selection};
pub use value::ValueKind;
