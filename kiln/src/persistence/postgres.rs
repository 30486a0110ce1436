use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use tracing::debug;

use crate::error::StoreError;
use crate::job::{JobFilter, JobId, JobKind, JobStatus};
use crate::store::{CommonColumns, JobRow, KindColumns, KindTables};

/// Schema for every per-kind table.
pub const MIGRATION: &str = include_str!("../../migrations/001_generation_jobs.sql");

const COMMON_COLUMNS: &str = "id, owner_id, status, progress, current_step, error_message, \
     retry_count, max_retries, created_at, updated_at, started_at, completed_at";
const COMMON_COLUMN_COUNT: usize = 12;

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

fn kind_columns(kind: JobKind) -> &'static [&'static str] {
    match kind {
        JobKind::Story => &["prompt", "age_group", "page_count", "title", "pages"],
        JobKind::Illustration => &["prompt", "style", "width", "height", "image_url"],
        JobKind::Cartoonize => &["source_image_url", "style", "image_url"],
        JobKind::ColoringPage => &["subject", "line_detail", "image_url"],
    }
}

fn select_sql(kind: JobKind) -> String {
    format!(
        "SELECT {COMMON_COLUMNS}, {} FROM {}",
        kind_columns(kind).join(", "),
        kind.table()
    )
}

fn insert_sql(kind: JobKind) -> String {
    let columns = kind_columns(kind);
    let placeholders: Vec<String> = (1..=COMMON_COLUMN_COUNT + columns.len())
        .map(|n| format!("${n}"))
        .collect();
    format!(
        "INSERT INTO {} ({COMMON_COLUMNS}, {}) VALUES ({})",
        kind.table(),
        columns.join(", "),
        placeholders.join(", ")
    )
}

/// Binds follow the insert column order, so `$1` is always the id.
fn update_sql(kind: JobKind) -> String {
    let common = COMMON_COLUMNS
        .split(',')
        .map(str::trim)
        .enumerate()
        .skip(1)
        .map(|(i, column)| format!("{column} = ${}", i + 1));
    let specific = kind_columns(kind)
        .iter()
        .enumerate()
        .map(|(i, column)| format!("{column} = ${}", COMMON_COLUMN_COUNT + i + 1));
    let assignments: Vec<String> = common.chain(specific).collect();
    format!(
        "UPDATE {} SET {} WHERE id = $1",
        kind.table(),
        assignments.join(", ")
    )
}

fn bind_row<'q>(query: PgQuery<'q>, row: &'q JobRow) -> PgQuery<'q> {
    let c = &row.common;
    let query = query
        .bind(c.id)
        .bind(&c.owner_id)
        .bind(&c.status)
        .bind(c.progress)
        .bind(&c.current_step)
        .bind(&c.error_message)
        .bind(c.retry_count)
        .bind(c.max_retries)
        .bind(c.created_at)
        .bind(c.updated_at)
        .bind(c.started_at)
        .bind(c.completed_at);

    match &row.columns {
        KindColumns::Story {
            prompt,
            age_group,
            page_count,
            title,
            pages,
        } => query
            .bind(prompt)
            .bind(age_group)
            .bind(*page_count)
            .bind(title)
            .bind(pages),
        KindColumns::Illustration {
            prompt,
            style,
            width,
            height,
            image_url,
        } => query
            .bind(prompt)
            .bind(style)
            .bind(*width)
            .bind(*height)
            .bind(image_url),
        KindColumns::Cartoonize {
            source_image_url,
            style,
            image_url,
        } => query.bind(source_image_url).bind(style).bind(image_url),
        KindColumns::ColoringPage {
            subject,
            line_detail,
            image_url,
        } => query.bind(subject).bind(line_detail).bind(image_url),
    }
}

fn decode_row(kind: JobKind, row: &PgRow) -> Result<JobRow, StoreError> {
    let decode = |err: sqlx::Error| {
        let id = row
            .try_get::<uuid::Uuid, _>("id")
            .map(|id| id.to_string())
            .unwrap_or_else(|_| "<unknown>".to_string());
        StoreError::decode(kind.table(), id, err)
    };

    let common = CommonColumns {
        id: row.try_get("id").map_err(decode)?,
        owner_id: row.try_get("owner_id").map_err(decode)?,
        status: row.try_get("status").map_err(decode)?,
        progress: row.try_get("progress").map_err(decode)?,
        current_step: row.try_get("current_step").map_err(decode)?,
        error_message: row.try_get("error_message").map_err(decode)?,
        retry_count: row.try_get("retry_count").map_err(decode)?,
        max_retries: row.try_get("max_retries").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
        started_at: row.try_get("started_at").map_err(decode)?,
        completed_at: row.try_get("completed_at").map_err(decode)?,
    };

    let columns = match kind {
        JobKind::Story => KindColumns::Story {
            prompt: row.try_get("prompt").map_err(decode)?,
            age_group: row.try_get("age_group").map_err(decode)?,
            page_count: row.try_get("page_count").map_err(decode)?,
            title: row.try_get("title").map_err(decode)?,
            pages: row.try_get("pages").map_err(decode)?,
        },
        JobKind::Illustration => KindColumns::Illustration {
            prompt: row.try_get("prompt").map_err(decode)?,
            style: row.try_get("style").map_err(decode)?,
            width: row.try_get("width").map_err(decode)?,
            height: row.try_get("height").map_err(decode)?,
            image_url: row.try_get("image_url").map_err(decode)?,
        },
        JobKind::Cartoonize => KindColumns::Cartoonize {
            source_image_url: row.try_get("source_image_url").map_err(decode)?,
            style: row.try_get("style").map_err(decode)?,
            image_url: row.try_get("image_url").map_err(decode)?,
        },
        JobKind::ColoringPage => KindColumns::ColoringPage {
            subject: row.try_get("subject").map_err(decode)?,
            line_detail: row.try_get("line_detail").map_err(decode)?,
            image_url: row.try_get("image_url").map_err(decode)?,
        },
    };

    Ok(JobRow { common, columns })
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// PostgreSQL-backed per-kind tables.
#[derive(Debug, Clone)]
pub struct PgKindTables {
    pool: PgPool,
}

impl PgKindTables {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the per-kind tables if they do not exist yet.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::raw_sql(MIGRATION).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl KindTables for PgKindTables {
    async fn fetch(&self, kind: JobKind, id: JobId) -> Result<Option<JobRow>, StoreError> {
        let sql = format!("{} WHERE id = $1", select_sql(kind));
        match sqlx::query(&sql).bind(id.0).fetch_optional(&self.pool).await {
            Ok(Some(row)) => decode_row(kind, &row).map(Some),
            Ok(None) | Err(sqlx::Error::RowNotFound) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn fetch_pending(
        &self,
        kind: JobKind,
        filter: &JobFilter,
        limit: usize,
    ) -> Result<Vec<JobRow>, StoreError> {
        let sql = format!(
            r#"{}
            WHERE status = $1
              AND ($2::text IS NULL OR owner_id = $2)
            ORDER BY created_at ASC
            LIMIT $3"#,
            select_sql(kind)
        );
        let rows = sqlx::query(&sql)
            .bind(JobStatus::Pending.as_str())
            .bind(&filter.owner_id)
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await?;

        debug!(table = kind.table(), rows = rows.len(), "fetched pending rows");
        rows.iter().map(|row| decode_row(kind, row)).collect()
    }

    async fn fetch_filtered(
        &self,
        kind: JobKind,
        filter: &JobFilter,
        limit: usize,
    ) -> Result<Vec<JobRow>, StoreError> {
        let sql = format!(
            r#"{}
            WHERE ($1::text IS NULL OR owner_id = $1)
              AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC
            LIMIT $3"#,
            select_sql(kind)
        );
        let rows = sqlx::query(&sql)
            .bind(&filter.owner_id)
            .bind(filter.status.map(|status| status.as_str()))
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(|row| decode_row(kind, row)).collect()
    }

    async fn insert(&self, row: &JobRow) -> Result<(), StoreError> {
        let sql = insert_sql(row.kind());
        bind_row(sqlx::query(&sql), row).execute(&self.pool).await?;
        Ok(())
    }

    async fn update(&self, row: &JobRow) -> Result<bool, StoreError> {
        let sql = update_sql(row.kind());
        let result = bind_row(sqlx::query(&sql), row).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_placeholders_cover_every_column() {
        let sql = insert_sql(JobKind::Story);
        assert!(sql.starts_with("INSERT INTO story_jobs"));
        assert!(sql.contains("$17"));
        assert!(!sql.contains("$18"));
    }

    #[test]
    fn test_update_keeps_id_as_first_bind() {
        let sql = update_sql(JobKind::Cartoonize);
        assert!(sql.ends_with("WHERE id = $1"));
        assert!(sql.contains("owner_id = $2"));
        assert!(sql.contains("completed_at = $12"));
        assert!(sql.contains("source_image_url = $13"));
        assert!(sql.contains("image_url = $15"));
        assert!(!sql.contains("SET id"));
    }

    #[test]
    fn test_select_reads_from_kind_table() {
        assert!(select_sql(JobKind::ColoringPage).ends_with("FROM coloring_page_jobs"));
    }
}
