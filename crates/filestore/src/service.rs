//! File Record Store
//!
//! Orchestrates file records against the metadata repository and the blob
//! store: provisioning, ingest, thumbnails, linking, and reclamation.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use filestore_core::config::FilesConfig;
use filestore_core::{Id, Timestamped};
use tracing::{debug, info, instrument, warn};

use crate::error::{FileStoreError, FileStoreResult};
use crate::metadata;
use crate::model::FileRecord;
use crate::repository::FileRepository;
use crate::storage::Storage;
use crate::thumbnail::{self, ThumbnailFormat, ThumbnailSpec};

/// File store configuration
#[derive(Debug, Clone)]
pub struct FileStoreConfig {
    /// Drafts younger than this survive `cleanup_expired_drafts`
    pub draft_grace: Duration,
    /// Thumbnail derived from every ingested image
    pub thumbnail: Option<ThumbnailSpec>,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            draft_grace: Duration::from_secs(86400), // 24 hours
            thumbnail: None,
        }
    }
}

impl FileStoreConfig {
    pub fn from_files_config(config: &FilesConfig) -> FileStoreResult<Self> {
        let thumbnail = match &config.thumbnail {
            Some(t) => Some(ThumbnailSpec::new(
                t.max_width,
                t.max_height,
                t.format.parse::<ThumbnailFormat>()?,
            )),
            None => None,
        };

        Ok(Self {
            draft_grace: Duration::from_secs(config.draft_grace_seconds),
            thumbnail,
        })
    }
}

/// File record store
pub struct FileRecordStore<R: FileRepository + ?Sized, S: Storage + ?Sized> {
    repo: Arc<R>,
    storage: Arc<S>,
    config: FileStoreConfig,
}

impl<R: FileRepository + ?Sized, S: Storage + ?Sized> FileRecordStore<R, S> {
    pub fn new(repo: Arc<R>, storage: Arc<S>, config: FileStoreConfig) -> Self {
        Self {
            repo,
            storage,
            config,
        }
    }

    pub fn config(&self) -> &FileStoreConfig {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Allocate a draft record with a fresh token and location.
    ///
    /// Nothing is persisted and no blob is written.
    pub fn provision(&self) -> FileRecord {
        let mut record = FileRecord::provision();
        record.url = self.storage.public_url(&record.location);
        record
    }

    /// Ingest a local file uploaded as `original_filename`
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub async fn ingest(&self, path: &Path, original_filename: &str) -> FileStoreResult<FileRecord> {
        let data = tokio::fs::read(path).await.map_err(|e| {
            FileStoreError::Ingest(format!("cannot read {}: {}", path.display(), e))
        })?;

        self.ingest_bytes(Bytes::from(data), original_filename).await
    }

    /// Ingest uploaded content.
    ///
    /// The configured thumbnail is derived from images; failing to derive it
    /// does not fail the ingest.
    #[instrument(skip(self, data), fields(size = data.len()))]
    pub async fn ingest_bytes(&self, data: Bytes, original_filename: &str) -> FileStoreResult<FileRecord> {
        let record = self.store_new(data, original_filename, None).await?;

        if let (true, Some(spec)) = (record.is_image(), self.config.thumbnail) {
            if let Err(e) = self
                .create_thumbnail(&record, spec.max_width, spec.max_height, spec.format)
                .await
            {
                warn!(token = %record.token, error = %e, "Thumbnail generation failed");
            }
        }

        Ok(record)
    }

    /// Write the blob, then persist the record. A failed write persists nothing.
    ///
    /// The repository settles a derived record's status against its source.
    async fn store_new(
        &self,
        data: Bytes,
        filename: &str,
        source_file_id: Option<Id>,
    ) -> FileStoreResult<FileRecord> {
        let mut record = self.provision();
        record.source_file_id = source_file_id;
        record.meta = metadata::probe(&data, filename);

        self.storage
            .put(&record.location, data)
            .await
            .map_err(|e| {
                FileStoreError::Ingest(format!("blob write to {} failed: {}", record.location, e))
            })?;

        if let Err(e) = self.repo.insert(&mut record).await {
            if let Err(cleanup) = self.storage.delete(&record.location).await {
                warn!(location = %record.location, error = %cleanup, "Orphaned blob left behind");
            }
            return Err(e);
        }

        info!(
            id = ?record.id,
            token = %record.token,
            filename = record.meta.filename.as_deref().unwrap_or(""),
            size = record.meta.size,
            "File stored"
        );

        Ok(record)
    }

    /// Derive a scaled-down copy of an image record.
    ///
    /// Thumbnails are never derived from thumbnails.
    #[instrument(skip(self, original), fields(source = ?original.id))]
    pub async fn create_thumbnail(
        &self,
        original: &FileRecord,
        max_width: u32,
        max_height: u32,
        format: ThumbnailFormat,
    ) -> FileStoreResult<FileRecord> {
        let id = original
            .id
            .ok_or_else(|| FileStoreError::not_found(&original.token))?;
        let source = self
            .repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| FileStoreError::not_found(id))?;

        if source.is_derived() {
            return Err(FileStoreError::UnsupportedFormat(format!(
                "{} is itself a derived file",
                source.token
            )));
        }
        if !source.is_image() {
            return Err(FileStoreError::UnsupportedFormat(format!(
                "{} is not an image",
                source.token
            )));
        }

        let data = self.storage.get(&source.location).await?;
        let spec = ThumbnailSpec::new(max_width, max_height, format);
        let (encoded, dims) = tokio::task::spawn_blocking(move || thumbnail::render(&data, &spec))
            .await
            .map_err(|e| FileStoreError::Internal(format!("thumbnail task failed: {}", e)))??;

        let filename = thumbnail::thumbnail_filename(source.display_name(), format);

        let thumb = self.store_new(Bytes::from(encoded), &filename, Some(id)).await?;

        debug!(
            token = %thumb.token,
            width = dims.width,
            height = dims.height,
            "Thumbnail created"
        );

        Ok(thumb)
    }

    /// Mark the record as attached to an owner. Idempotent.
    #[instrument(skip(self))]
    pub async fn link(&self, token: &str, owner_id: Id) -> FileStoreResult<FileRecord> {
        let record = self
            .repo
            .mark_linked(token)
            .await?
            .ok_or_else(|| FileStoreError::not_found(token))?;

        info!(id = ?record.id, token = %token, owner_id = owner_id, "File linked");

        Ok(record)
    }

    /// Drop the record an owner no longer references
    pub async fn unlink(&self, token: &str) -> FileStoreResult<()> {
        let record = self.get_by_token(token).await?;
        match record.id {
            Some(id) => self.delete(id).await,
            None => Err(FileStoreError::not_found(token)),
        }
    }

    /// Delete a record and every record derived from it, then their blobs.
    ///
    /// Blob deletion failures are logged; the database deletion stands.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: Id) -> FileStoreResult<()> {
        let removed = self.repo.delete_cascade(id).await?;
        if removed.is_empty() {
            return Err(FileStoreError::not_found(id));
        }

        self.remove_blobs(&removed).await;

        info!(id = id, removed = removed.len(), "File deleted");

        Ok(())
    }

    /// Delete the record only while it is still a draft.
    ///
    /// Returns whether the record was deleted.
    pub async fn discard_draft(&self, token: &str) -> FileStoreResult<bool> {
        let record = self.get_by_token(token).await?;
        if !record.is_draft() || record.is_derived() {
            debug!(
                token = %token,
                status = %record.status,
                age_secs = record.age(chrono::Utc::now()).num_seconds(),
                "Not a draft, keeping"
            );
            return Ok(false);
        }

        match record.id {
            Some(id) => self.delete(id).await.map(|_| true),
            None => Err(FileStoreError::not_found(token)),
        }
    }

    /// Delete every draft older than `grace`, with its derived records
    #[instrument(skip(self))]
    pub async fn cleanup_drafts(&self, grace: Duration) -> FileStoreResult<usize> {
        let cutoff = chrono::Duration::from_std(grace)
            .ok()
            .and_then(|grace| chrono::Utc::now().checked_sub_signed(grace));
        let Some(cutoff) = cutoff else {
            warn!(?grace, "Grace period reaches past the earliest timestamp, nothing can expire");
            return Ok(0);
        };

        let removed = self.repo.delete_drafts_before(cutoff).await?;
        self.remove_blobs(&removed).await;

        info!(count = removed.len(), "Expired drafts cleaned up");

        Ok(removed.len())
    }

    /// `cleanup_drafts` with the configured grace period
    pub async fn cleanup_expired_drafts(&self) -> FileStoreResult<usize> {
        self.cleanup_drafts(self.config.draft_grace).await
    }

    async fn remove_blobs(&self, removed: &[FileRecord]) {
        for record in removed {
            if let Err(e) = self.storage.delete(&record.location).await {
                warn!(
                    location = %record.location,
                    storage = self.storage.name(),
                    error = %e,
                    "Failed to delete blob"
                );
            }
        }
    }

    /// Get a record by id
    pub async fn get(&self, id: Id) -> FileStoreResult<FileRecord> {
        self.repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| FileStoreError::not_found(id))
    }

    /// Get a record by token
    pub async fn get_by_token(&self, token: &str) -> FileStoreResult<FileRecord> {
        self.repo
            .find_by_token(token)
            .await?
            .ok_or_else(|| FileStoreError::not_found(token))
    }

    /// Records derived from `id`
    pub async fn children(&self, id: Id) -> FileStoreResult<Vec<FileRecord>> {
        self.repo.find_children(id).await
    }

    /// Page of records with the total count
    pub async fn list(&self, limit: i64, offset: i64) -> FileStoreResult<(Vec<FileRecord>, i64)> {
        let records = self.repo.find_all(limit, offset).await?;
        let total = self.repo.count().await?;
        Ok((records, total))
    }

    /// Record and blob content
    pub async fn read(&self, token: &str) -> FileStoreResult<(FileRecord, Bytes)> {
        let record = self.get_by_token(token).await?;
        let data = self.storage.get(&record.location).await?;
        Ok((record, data))
    }
}
