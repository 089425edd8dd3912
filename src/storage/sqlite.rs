use crate::storage::executor::DEFAULT_QUERY_TIMEOUT;
use crate::storage::{
    QueryContext, Row, Rows, SingleRow, SqlExecutor, StorageError, StorageResult, Value,
};
use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Connection, Row as _, Sqlite, SqlitePool, TypeInfo, ValueRef};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn, Span};

/// Rows a cursor's producer may read ahead of the consumer.
const CURSOR_BUFFER: usize = 32;

/// SQLite-backed [`SqlExecutor`].
///
/// The pool holds exactly one connection and keeps it open, so concurrent
/// callers queue on the pool and in-memory databases survive between calls.
pub struct SqliteExecutor {
    pool: SqlitePool,
    default_timeout: Duration,
    span: Span,
}

impl SqliteExecutor {
    pub fn new(pool: SqlitePool, span: Span) -> Self {
        Self {
            pool,
            default_timeout: DEFAULT_QUERY_TIMEOUT,
            span,
        }
    }

    /// Open the database and ping it before handing out the executor.
    pub async fn connect(
        database_url: &str,
        connect_timeout: Duration,
        span: Span,
    ) -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .acquire_timeout(connect_timeout)
            .connect_with(options)
            .await
            .map_err(|e| {
                error!(parent: &span, error = %e, "Failed to establish database connection");
                StorageError::Connection(e.to_string())
            })?;

        let ping = async {
            let mut conn = pool.acquire().await?;
            conn.ping().await?;
            Ok::<_, sqlx::Error>(())
        };
        let outcome = match tokio::time::timeout(connect_timeout, ping).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("ping timed out after {:?}", connect_timeout)),
        };
        if let Err(message) = outcome {
            pool.close().await;
            error!(parent: &span, error = %message, "Failed to ping database connection");
            return Err(StorageError::Connection(message));
        }

        info!(parent: &span, "Successfully established SQLite connection");
        Ok(Self::new(pool, span))
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn bounded(&self, ctx: &QueryContext) -> QueryContext {
        match ctx.deadline() {
            Some(_) => ctx.clone(),
            None => ctx.with_timeout(self.default_timeout),
        }
    }

    fn observe<T>(&self, op: &'static str, result: StorageResult<T>) -> StorageResult<T> {
        observe(&self.span, op, result)
    }
}

fn observe<T>(span: &Span, op: &'static str, result: StorageResult<T>) -> StorageResult<T> {
    match &result {
        Err(e) if e.is_retryable() => {
            warn!(parent: span, op, error = %e, "Database call interrupted")
        }
        Err(StorageError::NotFound) | Ok(_) => {}
        Err(e) => error!(parent: span, op, error = %e, "Database call failed"),
    }
    result
}

fn bind_args<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    args: &[Value],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for arg in args {
        query = match arg {
            Value::Null => query.bind(None::<i64>),
            Value::Integer(v) => query.bind(*v),
            Value::Real(v) => query.bind(*v),
            Value::Text(v) => query.bind(v.clone()),
            Value::Blob(v) => query.bind(v.clone()),
        };
    }
    query
}

fn decode_row(row: &SqliteRow) -> StorageResult<Row> {
    let columns = row
        .columns()
        .iter()
        .map(|column| column.name().to_string())
        .collect();

    let mut values = Vec::with_capacity(row.len());
    for idx in 0..row.len() {
        let raw = row.try_get_raw(idx)?;
        if raw.is_null() {
            values.push(Value::Null);
            continue;
        }
        let value = match raw.type_info().name() {
            "INTEGER" | "BIGINT" | "BOOLEAN" => Value::Integer(row.try_get_unchecked(idx)?),
            "REAL" | "NUMERIC" => Value::Real(row.try_get_unchecked(idx)?),
            "BLOB" => Value::Blob(row.try_get_unchecked(idx)?),
            _ => Value::Text(row.try_get_unchecked(idx)?),
        };
        values.push(value);
    }

    Ok(Row::new(columns, values))
}

#[async_trait]
impl SqlExecutor for SqliteExecutor {
    async fn execute(
        &self,
        ctx: &QueryContext,
        statement: &str,
        args: &[Value],
    ) -> StorageResult<u64> {
        let ctx = self.bounded(ctx);
        debug!(parent: &self.span, statement, args = args.len(), "Exec query");

        let query = bind_args(sqlx::query(statement), args);
        let result = ctx
            .run(async {
                let done = query.execute(&self.pool).await?;
                Ok::<_, StorageError>(done.rows_affected())
            })
            .await;

        self.observe("execute", result)
    }

    async fn query_many(
        &self,
        ctx: &QueryContext,
        statement: &str,
        args: &[Value],
    ) -> StorageResult<Rows> {
        let ctx = self.bounded(ctx);
        debug!(parent: &self.span, statement, args = args.len(), "Query");

        let (tx, mut rx) = mpsc::channel(CURSOR_BUFFER);
        let pool = self.pool.clone();
        let span = self.span.clone();
        let statement = statement.to_string();
        let args = args.to_vec();

        // The producer owns the statement and feeds the cursor until it is
        // drained, dropped or the context ends.
        tokio::spawn(async move {
            let streamed = ctx
                .run(async {
                    let mut stream = bind_args(sqlx::query(&statement), &args).fetch(&pool);
                    while let Some(row) = stream.try_next().await? {
                        let decoded = decode_row(&row)?;
                        if tx.send(Ok(decoded)).await.is_err() {
                            break;
                        }
                    }
                    Ok::<_, StorageError>(())
                })
                .await;
            if let Err(e) = observe(&span, "query_many", streamed) {
                let _ = tx.send(Err(e)).await;
            }
        });

        // Statement failures surface here rather than on the first advance.
        match rx.recv().await {
            Some(Ok(first)) => Ok(Rows::new(rx, Some(first))),
            Some(Err(e)) => Err(e),
            None => Ok(Rows::new(rx, None)),
        }
    }

    async fn query_one(&self, ctx: &QueryContext, statement: &str, args: &[Value]) -> SingleRow {
        let ctx = self.bounded(ctx);
        debug!(parent: &self.span, statement, args = args.len(), "QueryRow");

        let query = bind_args(sqlx::query(statement), args);
        let result = ctx
            .run(async {
                match query.fetch_optional(&self.pool).await? {
                    Some(row) => decode_row(&row).map(Some),
                    None => Ok::<_, StorageError>(None),
                }
            })
            .await;

        SingleRow::new(self.observe("query_one", result))
    }

    async fn close(&self) -> StorageResult<()> {
        self.pool.close().await;
        info!(parent: &self.span, "Closed SQLite connection");
        Ok(())
    }
}
