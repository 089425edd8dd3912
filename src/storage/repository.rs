use crate::models::ShortenedUrl;
use crate::storage::{QueryContext, Row, Scan, SqlExecutor, StorageError, StorageResult};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn, Span};

/// Bound every repository operation places on its storage call.
pub const OPERATION_TIMEOUT: Duration = Duration::from_secs(3);

const SCHEMA: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS url_info (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        short_code TEXT NOT NULL,
        original_url TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        status INTEGER NOT NULL DEFAULT 1 CHECK (status IN (0, 1))
    )
    "#,
    // Only one active row per short code; deactivated rows may repeat it.
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_url_info_active_code
    ON url_info(short_code) WHERE status = 1
    "#,
    "CREATE INDEX IF NOT EXISTS idx_url_info_original_url ON url_info(original_url)",
];

const INSERT: &str = r#"
    INSERT INTO url_info (short_code, original_url, created_at, status)
    VALUES (?, ?, COALESCE(?, CAST(strftime('%s', 'now') AS INTEGER)), 1)
    RETURNING id, short_code, original_url, created_at
"#;

const SELECT_BY_CODE: &str = r#"
    SELECT id, short_code, original_url, created_at
    FROM url_info
    WHERE short_code = ? AND status = 1
"#;

const SELECT_BY_ORIGINAL_URL: &str = r#"
    SELECT id, short_code, original_url, created_at
    FROM url_info
    WHERE original_url = ? AND status = 1
    ORDER BY id DESC
    LIMIT 1
"#;

const SELECT_EXISTS: &str = "SELECT 1 FROM url_info WHERE short_code = ? AND status = 1 LIMIT 1";

const DEACTIVATE: &str = "UPDATE url_info SET status = 0 WHERE id = ? AND status = 1";

const SELECT_ACTIVE_PAGE: &str = r#"
    SELECT id, short_code, original_url, created_at
    FROM url_info
    WHERE status = 1
    ORDER BY id DESC
    LIMIT ? OFFSET ?
"#;

impl Scan for ShortenedUrl {
    fn scan(row: &Row) -> StorageResult<Self> {
        let (id, short_code, original_url, created_at) = <(i64, String, String, i64)>::scan(row)?;
        Ok(Self {
            id,
            short_code,
            original_url,
            created_at,
        })
    }
}

/// Short code mappings stored in the `url_info` table.
///
/// Rows are never removed: [`UrlRepository::delete`] flips `status` to 0 and
/// every read filters on `status = 1`.
pub struct UrlRepository {
    db: Arc<dyn SqlExecutor>,
    timeout: Duration,
    span: Span,
}

impl UrlRepository {
    pub fn new(db: Arc<dyn SqlExecutor>, span: Span) -> Self {
        Self {
            db,
            timeout: OPERATION_TIMEOUT,
            span,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Create the table and indexes if they are missing.
    pub async fn init(&self, ctx: &QueryContext) -> StorageResult<()> {
        for statement in SCHEMA {
            let ctx = ctx.with_timeout(self.timeout);
            let result = self.db.execute(&ctx, statement, &[]).await;
            self.record("init", &"url_info", result)?;
        }
        Ok(())
    }

    /// Insert a new active mapping and return it as stored.
    ///
    /// The insert and the read-back are one statement, so a returned row is
    /// the confirmation that the write committed.
    pub async fn create(
        &self,
        ctx: &QueryContext,
        url: &ShortenedUrl,
    ) -> StorageResult<ShortenedUrl> {
        let ctx = ctx.with_timeout(self.timeout);
        let created_at = (url.created_at != 0).then_some(url.created_at);

        let stored = self
            .db
            .query_one(
                &ctx,
                INSERT,
                &[
                    url.short_code.as_str().into(),
                    url.original_url.as_str().into(),
                    created_at.into(),
                ],
            )
            .await
            .scan();

        let stored = match stored {
            Err(StorageError::NotFound) => Err(StorageError::NotAffected),
            other => other,
        };
        self.record("create", &url.short_code, stored)
    }

    pub async fn get_by_short_code(
        &self,
        ctx: &QueryContext,
        short_code: &str,
    ) -> StorageResult<ShortenedUrl> {
        let ctx = ctx.with_timeout(self.timeout);
        let url = self
            .db
            .query_one(&ctx, SELECT_BY_CODE, &[short_code.into()])
            .await
            .scan();
        self.record("get_by_short_code", &short_code, url)
    }

    /// Most recent active mapping for `original_url`.
    pub async fn get_by_original_url(
        &self,
        ctx: &QueryContext,
        original_url: &str,
    ) -> StorageResult<ShortenedUrl> {
        let ctx = ctx.with_timeout(self.timeout);
        let url = self
            .db
            .query_one(&ctx, SELECT_BY_ORIGINAL_URL, &[original_url.into()])
            .await
            .scan();
        self.record("get_by_original_url", &original_url, url)
    }

    /// Whether an active mapping uses `short_code`. Only execution failures
    /// are errors.
    pub async fn exists(&self, ctx: &QueryContext, short_code: &str) -> StorageResult<bool> {
        let ctx = ctx.with_timeout(self.timeout);
        let found = self
            .db
            .query_one(&ctx, SELECT_EXISTS, &[short_code.into()])
            .await
            .scan::<(i64,)>();

        match found {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound) => Ok(false),
            Err(e) => self.record("exists", &short_code, Err(e)),
        }
    }

    /// Soft delete: deactivate the active row with `id`.
    pub async fn delete(&self, ctx: &QueryContext, id: i64) -> StorageResult<()> {
        let ctx = ctx.with_timeout(self.timeout);
        let affected = self.db.execute(&ctx, DEACTIVATE, &[id.into()]).await;
        let affected = self.record("delete", &id, affected)?;
        if affected == 0 {
            return self.record("delete", &id, Err(StorageError::NotFound));
        }
        Ok(())
    }

    /// Active mappings, newest first.
    pub async fn list_active(
        &self,
        ctx: &QueryContext,
        limit: i64,
        offset: i64,
    ) -> StorageResult<Vec<ShortenedUrl>> {
        let ctx = ctx.with_timeout(self.timeout);
        let urls = match self
            .db
            .query_many(&ctx, SELECT_ACTIVE_PAGE, &[limit.into(), offset.into()])
            .await
        {
            Ok(rows) => rows.scan_all().await,
            Err(e) => Err(e),
        };
        self.record("list_active", &format_args!("{limit}/{offset}"), urls)
    }

    fn record<T>(
        &self,
        op: &'static str,
        input: &dyn Display,
        result: StorageResult<T>,
    ) -> StorageResult<T> {
        match &result {
            Ok(_) => {}
            Err(StorageError::NotFound) => {
                debug!(parent: &self.span, op, input = %input, "No matching url")
            }
            Err(e) if e.is_retryable() => {
                warn!(
                    parent: &self.span,
                    op,
                    input = %input,
                    error = %e,
                    "Repository call interrupted"
                )
            }
            Err(e) => {
                error!(
                    parent: &self.span,
                    op,
                    input = %input,
                    error = %e,
                    "Repository call failed"
                )
            }
        }
        result
    }
}
