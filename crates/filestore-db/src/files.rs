//! File record repository
//!
//! Rows of `filestore_file`. Cascade delete, link and drafts cleanup each run
//! in one transaction and lock the rows they touch.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use filestore::{FileMeta, FileRecord, FileRepository, FileStatus, FileStoreResult, ImageDimensions};
use filestore_core::{Entity, Id};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::debug;

use crate::{RepositoryError, RepositoryResult};

const COLUMNS: &str = "id, token, location, url, status, source_file_id, created_at, \
    meta_filename, meta_extension, meta_md5, meta_mime_type, meta_size, \
    meta_is_image, meta_image_width, meta_image_height";

/// Insert of a record with no source; $13 is its status
const INSERT_ROOT: &str = r#"
    INSERT INTO filestore_file (
        token, location, url, created_at,
        meta_filename, meta_extension, meta_md5, meta_mime_type, meta_size,
        meta_is_image, meta_image_width, meta_image_height,
        status, source_file_id
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, NULL)
    RETURNING id, status
"#;

/// Insert of a derived record; $13 is the source id. Inserts nothing if the
/// source is gone.
const INSERT_DERIVED: &str = r#"
    INSERT INTO filestore_file (
        token, location, url, created_at,
        meta_filename, meta_extension, meta_md5, meta_mime_type, meta_size,
        meta_is_image, meta_image_width, meta_image_height,
        status, source_file_id
    )
    SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
        CASE WHEN p.status = 'linked' THEN 'thumb' ELSE 'draft' END,
        p.id
    FROM filestore_file p
    WHERE p.id = $13
    FOR SHARE
    RETURNING id, status
"#;

/// File row from database
#[derive(Debug, Clone, FromRow)]
pub struct FileRow {
    pub id: i64,
    pub token: String,
    pub location: String,
    pub url: Option<String>,
    pub status: String,
    pub source_file_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub meta_filename: Option<String>,
    pub meta_extension: Option<String>,
    pub meta_md5: Option<String>,
    pub meta_mime_type: Option<String>,
    pub meta_size: i64,
    pub meta_is_image: bool,
    pub meta_image_width: Option<i32>,
    pub meta_image_height: Option<i32>,
}

impl TryFrom<FileRow> for FileRecord {
    type Error = RepositoryError;

    fn try_from(row: FileRow) -> Result<Self, Self::Error> {
        // uploaded, thumbok, normalok and ready are never written
        let status = FileStatus::from_str(&row.status).ok_or_else(|| {
            RepositoryError::Validation(format!(
                "{} {} has unknown status {:?}",
                FileRecord::TYPE_NAME,
                row.id,
                row.status
            ))
        })?;

        let image = match (row.meta_is_image, row.meta_image_width, row.meta_image_height) {
            (true, Some(w), Some(h)) => Some(ImageDimensions {
                width: u32::try_from(w).map_err(|_| {
                    RepositoryError::Validation(format!("file {} has width {}", row.id, w))
                })?,
                height: u32::try_from(h).map_err(|_| {
                    RepositoryError::Validation(format!("file {} has height {}", row.id, h))
                })?,
            }),
            _ => None,
        };

        Ok(FileRecord {
            id: Some(row.id),
            token: row.token,
            location: row.location,
            url: row.url,
            status,
            source_file_id: row.source_file_id,
            created_at: row.created_at,
            meta: FileMeta {
                filename: row.meta_filename,
                extension: row.meta_extension,
                md5: row.meta_md5,
                mime_type: row.meta_mime_type,
                size: row.meta_size,
                image,
            },
        })
    }
}

fn into_records(rows: Vec<FileRow>) -> RepositoryResult<Vec<FileRecord>> {
    rows.into_iter().map(FileRecord::try_from).collect()
}

/// PostgreSQL file repository
#[derive(Clone)]
pub struct PgFileRepository {
    pool: PgPool,
}

impl PgFileRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a record; returns the new id and the stored status.
    ///
    /// A derived row's status is read from its source inside the statement,
    /// with the source row share-locked so a concurrent link waits for it.
    pub async fn insert_row(&self, record: &FileRecord) -> RepositoryResult<(Id, FileStatus)> {
        let image = record.meta.image;
        let sql = match record.source_file_id {
            None => INSERT_ROOT,
            Some(_) => INSERT_DERIVED,
        };

        let query = sqlx::query_as::<_, (i64, String)>(sql)
            .bind(&record.token)
            .bind(&record.location)
            .bind(&record.url)
            .bind(record.created_at)
            .bind(&record.meta.filename)
            .bind(&record.meta.extension)
            .bind(&record.meta.md5)
            .bind(&record.meta.mime_type)
            .bind(record.meta.size)
            .bind(image.is_some())
            .bind(image.map(|d| d.width as i32))
            .bind(image.map(|d| d.height as i32));
        let query = match record.source_file_id {
            None => query.bind(record.status.as_str()),
            Some(source) => query.bind(source),
        };

        let inserted = query
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::from_write(e, &record.token))?;

        let (id, status) = inserted.ok_or_else(|| {
            RepositoryError::Validation(format!(
                "source file {:?} of {} does not exist",
                record.source_file_id, record.token
            ))
        })?;
        let status = FileStatus::from_str(&status).ok_or_else(|| {
            RepositoryError::Validation(format!("file {} stored with status {:?}", id, status))
        })?;

        Ok((id, status))
    }

    pub async fn find_row_by_id(&self, id: Id) -> RepositoryResult<Option<FileRecord>> {
        let row = sqlx::query_as::<_, FileRow>(&format!(
            "SELECT {} FROM filestore_file WHERE id = $1",
            COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(FileRecord::try_from).transpose()
    }

    pub async fn find_row_by_token(&self, token: &str) -> RepositoryResult<Option<FileRecord>> {
        let row = sqlx::query_as::<_, FileRow>(&format!(
            "SELECT {} FROM filestore_file WHERE token = $1",
            COLUMNS
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        row.map(FileRecord::try_from).transpose()
    }

    pub async fn find_children_rows(&self, id: Id) -> RepositoryResult<Vec<FileRecord>> {
        let rows = sqlx::query_as::<_, FileRow>(&format!(
            "SELECT {} FROM filestore_file WHERE source_file_id = $1 ORDER BY id",
            COLUMNS
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        into_records(rows)
    }

    pub async fn find_page(&self, limit: i64, offset: i64) -> RepositoryResult<Vec<FileRecord>> {
        let rows = sqlx::query_as::<_, FileRow>(&format!(
            "SELECT {} FROM filestore_file ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2",
            COLUMNS
        ))
        .bind(limit.max(0))
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await?;

        into_records(rows)
    }

    pub async fn count_rows(&self) -> RepositoryResult<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM filestore_file")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn link_token(&self, token: &str) -> RepositoryResult<Option<FileRecord>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, FileRow>(&format!(
            "UPDATE filestore_file SET status = $1 WHERE token = $2 RETURNING {}",
            COLUMNS
        ))
        .bind(FileStatus::Linked.as_str())
        .bind(token)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        let children = sqlx::query("UPDATE filestore_file SET status = $1 WHERE source_file_id = $2")
            .bind(FileStatus::Thumb.as_str())
            .bind(row.id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        debug!(token = %token, children = children, "Linked");

        FileRecord::try_from(row).map(Some)
    }

    /// Lock `roots` and everything derived from them, deepest first
    async fn lock_trees(
        tx: &mut Transaction<'_, Postgres>,
        roots: &[Id],
    ) -> RepositoryResult<Vec<FileRow>> {
        let rows = sqlx::query_as::<_, FileRow>(&format!(
            r#"
            WITH RECURSIVE tree (node_id, depth) AS (
                SELECT id, 0 FROM filestore_file WHERE id = ANY($1)
                UNION ALL
                SELECT f.id, t.depth + 1
                FROM filestore_file f
                JOIN tree t ON f.source_file_id = t.node_id
            )
            SELECT {}
            FROM filestore_file
            JOIN tree ON tree.node_id = filestore_file.id
            ORDER BY tree.depth DESC, filestore_file.id DESC
            FOR UPDATE OF filestore_file
            "#,
            COLUMNS
        ))
        .bind(roots)
        .fetch_all(&mut **tx)
        .await?;

        // A row reachable from two roots appears twice; keep its deepest position
        let mut seen = HashSet::new();
        Ok(rows.into_iter().filter(|r| seen.insert(r.id)).collect())
    }

    async fn delete_rows(
        tx: &mut Transaction<'_, Postgres>,
        rows: &[FileRow],
    ) -> RepositoryResult<()> {
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        sqlx::query("DELETE FROM filestore_file WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn delete_tree(&self, id: Id) -> RepositoryResult<Vec<FileRecord>> {
        let mut tx = self.pool.begin().await?;

        let rows = Self::lock_trees(&mut tx, &[id]).await?;
        if rows.is_empty() {
            tx.rollback().await?;
            return Ok(Vec::new());
        }
        Self::delete_rows(&mut tx, &rows).await?;

        tx.commit().await?;

        into_records(rows)
    }

    pub async fn delete_expired_drafts(&self, cutoff: DateTime<Utc>) -> RepositoryResult<Vec<FileRecord>> {
        let mut tx = self.pool.begin().await?;

        // Rows linked before this lock is taken no longer match
        let expired = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT id FROM filestore_file
            WHERE status = $1 AND created_at < $2
            FOR UPDATE
            "#,
        )
        .bind(FileStatus::Draft.as_str())
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await?;

        if expired.is_empty() {
            tx.commit().await?;
            return Ok(Vec::new());
        }

        let rows = Self::lock_trees(&mut tx, &expired).await?;
        Self::delete_rows(&mut tx, &rows).await?;

        tx.commit().await?;

        debug!(roots = expired.len(), removed = rows.len(), "Expired drafts deleted");

        into_records(rows)
    }
}

#[async_trait]
impl FileRepository for PgFileRepository {
    async fn insert(&self, record: &mut FileRecord) -> FileStoreResult<Id> {
        let (id, status) = self.insert_row(record).await?;
        record.id = Some(id);
        record.status = status;
        Ok(id)
    }

    async fn find_by_id(&self, id: Id) -> FileStoreResult<Option<FileRecord>> {
        Ok(self.find_row_by_id(id).await?)
    }

    async fn find_by_token(&self, token: &str) -> FileStoreResult<Option<FileRecord>> {
        Ok(self.find_row_by_token(token).await?)
    }

    async fn find_children(&self, id: Id) -> FileStoreResult<Vec<FileRecord>> {
        Ok(self.find_children_rows(id).await?)
    }

    async fn find_all(&self, limit: i64, offset: i64) -> FileStoreResult<Vec<FileRecord>> {
        Ok(self.find_page(limit, offset).await?)
    }

    async fn count(&self) -> FileStoreResult<i64> {
        Ok(self.count_rows().await?)
    }

    async fn mark_linked(&self, token: &str) -> FileStoreResult<Option<FileRecord>> {
        Ok(self.link_token(token).await?)
    }

    async fn delete_cascade(&self, id: Id) -> FileStoreResult<Vec<FileRecord>> {
        Ok(self.delete_tree(id).await?)
    }

    async fn delete_drafts_before(&self, cutoff: DateTime<Utc>) -> FileStoreResult<Vec<FileRecord>> {
        Ok(self.delete_expired_drafts(cutoff).await?)
    }
}
