//! Schema bootstrap

use sqlx::PgPool;
use tracing::info;

use crate::RepositoryResult;

/// Statements creating the file table and its indexes; each is idempotent
pub const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS filestore_file (
        id BIGSERIAL PRIMARY KEY,
        token TEXT NOT NULL UNIQUE,
        location TEXT NOT NULL UNIQUE,
        url TEXT NULL,
        status TEXT NOT NULL DEFAULT 'draft',
        source_file_id BIGINT NULL REFERENCES filestore_file(id) ON DELETE CASCADE,
        created_at TIMESTAMPTZ NOT NULL,
        meta_filename TEXT NULL,
        meta_extension TEXT NULL,
        meta_md5 TEXT NULL,
        meta_mime_type TEXT NULL,
        meta_size BIGINT NOT NULL DEFAULT 0,
        meta_is_image BOOLEAN NOT NULL DEFAULT FALSE,
        meta_image_width INT NULL,
        meta_image_height INT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS filestore_file_source_idx ON filestore_file (source_file_id)",
    "CREATE INDEX IF NOT EXISTS filestore_file_status_created_idx ON filestore_file (status, created_at)",
];

/// Create the schema if it does not exist yet
pub async fn migrate(pool: &PgPool) -> RepositoryResult<()> {
    for statement in STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }

    info!("Schema ready");
    Ok(())
}
