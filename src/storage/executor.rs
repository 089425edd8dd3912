use crate::storage::{QueryContext, Rows, SingleRow, StorageResult, Value};
use async_trait::async_trait;
use std::time::Duration;

/// Bound applied to calls whose context carries no deadline.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(3);

/// Storage-engine-agnostic statement execution.
///
/// Implementations must impose their default timeout when `ctx` has no
/// deadline, return [`crate::storage::StorageError::Cancelled`] without
/// dispatching when `ctx` is already cancelled, and hand rows out as
/// [`crate::storage::Row`]s.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Run a mutating statement and return the number of rows it changed.
    async fn execute(&self, ctx: &QueryContext, statement: &str, args: &[Value])
        -> StorageResult<u64>;

    /// Run a statement returning zero or more rows.
    async fn query_many(
        &self,
        ctx: &QueryContext,
        statement: &str,
        args: &[Value],
    ) -> StorageResult<Rows>;

    /// Run a statement returning at most one row. Failures surface when the
    /// handle is scanned.
    async fn query_one(&self, ctx: &QueryContext, statement: &str, args: &[Value]) -> SingleRow;

    /// Release the underlying connection. Call at most once.
    async fn close(&self) -> StorageResult<()>;
}
