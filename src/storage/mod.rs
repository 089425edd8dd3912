pub mod context;
pub mod error;
pub mod executor;
pub mod repository;
pub mod row;
pub mod sqlite;

pub use context::QueryContext;
pub use error::{StorageError, StorageResult};
pub use executor::{SqlExecutor, DEFAULT_QUERY_TIMEOUT};
pub use repository::{UrlRepository, OPERATION_TIMEOUT};
pub use row::{FromValue, Row, Rows, Scan, SingleRow, Value};
pub use sqlite::SqliteExecutor;
