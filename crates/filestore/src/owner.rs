//! Owner-side lifecycle of file references
//!
//! An owning entity stores a token in one of its columns. It calls
//! [`FileField::on_save`] after persisting a change to that column and
//! [`FileField::on_delete`] when it is removed, so the referenced record is
//! linked and reclaimed in step with the owner.

use std::sync::Arc;

use filestore_core::Id;
use tracing::{debug, warn};

use crate::error::{FileStoreError, FileStoreResult};
use crate::model::{is_token, FileRecord};
use crate::repository::FileRepository;
use crate::service::FileRecordStore;
use crate::storage::Storage;

/// A token-holding column on an owning entity
pub struct FileField<R: FileRepository + ?Sized, S: Storage + ?Sized> {
    name: String,
    store: Arc<FileRecordStore<R, S>>,
}

impl<R: FileRepository + ?Sized, S: Storage + ?Sized> Clone for FileField<R, S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            store: self.store.clone(),
        }
    }
}

impl<R: FileRepository + ?Sized, S: Storage + ?Sized> FileField<R, S> {
    pub fn new(name: impl Into<String>, store: Arc<FileRecordStore<R, S>>) -> Self {
        Self {
            name: name.into(),
            store,
        }
    }

    /// Column name on the owner
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reconcile after the owner saved `current` over `previous`.
    ///
    /// The record no longer referenced is deleted and the new one linked.
    /// Returns the linked record, if any.
    pub async fn on_save(
        &self,
        owner_id: Id,
        previous: Option<&str>,
        current: Option<&str>,
    ) -> FileStoreResult<Option<FileRecord>> {
        if previous == current {
            return Ok(None);
        }

        if let Some(old) = previous {
            self.release(old).await?;
        }

        match current {
            Some(token) => {
                let record = self.store.link(token, owner_id).await?;
                debug!(field = %self.name, owner_id = owner_id, token = %token, "Field value linked");
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Reclaim the referenced record of an owner being deleted
    pub async fn on_delete(&self, current: Option<&str>) -> FileStoreResult<()> {
        match current {
            Some(token) => self.release(token).await,
            None => Ok(()),
        }
    }

    /// Record referenced by a raw column value.
    ///
    /// Values that are not tokens resolve to `None`.
    pub async fn resolve(&self, value: &str) -> FileStoreResult<Option<FileRecord>> {
        if !is_token(value) {
            return Ok(None);
        }
        self.store.get_by_token(value).await.map(Some)
    }

    /// Public URL of the referenced record, if its backend serves one
    pub async fn url(&self, value: &str) -> FileStoreResult<Option<String>> {
        Ok(self.resolve(value).await?.and_then(|record| record.url))
    }

    /// Filename the referenced record was uploaded as
    pub async fn filename(&self, value: &str) -> FileStoreResult<Option<String>> {
        Ok(self.resolve(value).await?.and_then(|record| record.meta.filename))
    }

    async fn release(&self, token: &str) -> FileStoreResult<()> {
        match self.store.unlink(token).await {
            Ok(()) => Ok(()),
            Err(FileStoreError::NotFound(_)) => {
                warn!(field = %self.name, token = %token, "Referenced file already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
