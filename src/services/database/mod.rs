mod backend;
mod manager;
mod query;
mod schema;
mod types;

pub use backend::{SqlBackend, run_query_tool};
pub use manager::{SqlDatabase, normalize_connection_string, redact_connection_string};
pub use query::is_select_query;
pub use types::{CellValue, ColumnDetail, Dialect, SchemaMetadata, format_rows, truncate_word};
