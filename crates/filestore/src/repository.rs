//! File record persistence
//!
//! Every multi-row mutation is a single method so implementations can run it
//! inside one transaction.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use filestore_core::Id;
use tokio::sync::RwLock;

use crate::error::{FileStoreError, FileStoreResult};
use crate::model::{FileRecord, FileStatus};

/// Metadata store for file records
#[async_trait]
pub trait FileRepository: Send + Sync {
    /// Persist a new record and assign its id.
    ///
    /// A derived record takes its status from the stored source at insert
    /// time: Thumb under a Linked source, Draft otherwise.
    async fn insert(&self, record: &mut FileRecord) -> FileStoreResult<Id>;

    /// Get a record by id
    async fn find_by_id(&self, id: Id) -> FileStoreResult<Option<FileRecord>>;

    /// Get a record by token
    async fn find_by_token(&self, token: &str) -> FileStoreResult<Option<FileRecord>>;

    /// Records derived directly from `id`
    async fn find_children(&self, id: Id) -> FileStoreResult<Vec<FileRecord>>;

    /// Page of records, newest first
    async fn find_all(&self, limit: i64, offset: i64) -> FileStoreResult<Vec<FileRecord>>;

    /// Count all records
    async fn count(&self) -> FileStoreResult<i64>;

    /// Set the record to Linked and its direct children to Thumb.
    ///
    /// Returns `None` if no record has this token.
    async fn mark_linked(&self, token: &str) -> FileStoreResult<Option<FileRecord>>;

    /// Delete a record and everything derived from it, children first.
    ///
    /// Returns the removed records in deletion order; empty if `id` is unknown.
    async fn delete_cascade(&self, id: Id) -> FileStoreResult<Vec<FileRecord>>;

    /// Delete every Draft created before `cutoff`, with everything derived from it
    async fn delete_drafts_before(&self, cutoff: DateTime<Utc>) -> FileStoreResult<Vec<FileRecord>>;
}

/// In-memory file repository for testing and database-less runs
pub struct MemoryFileRepository {
    records: RwLock<Vec<FileRecord>>,
    next_id: AtomicI64,
}

impl Default for MemoryFileRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFileRepository {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Post-order walk: descendants of `id` first, `id` last
    fn collect_tree(records: &[FileRecord], id: Id, out: &mut Vec<Id>) {
        for child in records.iter().filter(|r| r.source_file_id == Some(id)) {
            if let Some(child_id) = child.id {
                Self::collect_tree(records, child_id, out);
            }
        }
        out.push(id);
    }

    fn remove_ids(records: &mut Vec<FileRecord>, ids: &[Id]) -> Vec<FileRecord> {
        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(pos) = records.iter().position(|r| r.id == Some(*id)) {
                removed.push(records.remove(pos));
            }
        }
        removed
    }
}

#[async_trait]
impl FileRepository for MemoryFileRepository {
    async fn insert(&self, record: &mut FileRecord) -> FileStoreResult<Id> {
        let mut records = self.records.write().await;

        if records
            .iter()
            .any(|r| r.token == record.token || r.location == record.location)
        {
            return Err(FileStoreError::Database(format!(
                "duplicate token or location: {}",
                record.token
            )));
        }
        if let Some(source) = record.source_file_id {
            let parent = records
                .iter()
                .find(|r| r.id == Some(source))
                .ok_or_else(|| {
                    FileStoreError::Database(format!("source file {} does not exist", source))
                })?;
            record.status = if parent.is_linked() {
                FileStatus::Thumb
            } else {
                FileStatus::Draft
            };
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        record.id = Some(id);
        records.push(record.clone());

        Ok(id)
    }

    async fn find_by_id(&self, id: Id) -> FileStoreResult<Option<FileRecord>> {
        let records = self.records.read().await;
        Ok(records.iter().find(|r| r.id == Some(id)).cloned())
    }

    async fn find_by_token(&self, token: &str) -> FileStoreResult<Option<FileRecord>> {
        let records = self.records.read().await;
        Ok(records.iter().find(|r| r.token == token).cloned())
    }

    async fn find_children(&self, id: Id) -> FileStoreResult<Vec<FileRecord>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| r.source_file_id == Some(id))
            .cloned()
            .collect())
    }

    async fn find_all(&self, limit: i64, offset: i64) -> FileStoreResult<Vec<FileRecord>> {
        let records = self.records.read().await;
        let mut sorted: Vec<FileRecord> = records.clone();
        sorted.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(sorted
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count(&self) -> FileStoreResult<i64> {
        Ok(self.records.read().await.len() as i64)
    }

    async fn mark_linked(&self, token: &str) -> FileStoreResult<Option<FileRecord>> {
        let mut records = self.records.write().await;

        let Some(pos) = records.iter().position(|r| r.token == token) else {
            return Ok(None);
        };
        records[pos].status = FileStatus::Linked;
        let linked = records[pos].clone();

        for child in records
            .iter_mut()
            .filter(|r| r.source_file_id.is_some() && r.source_file_id == linked.id)
        {
            child.status = FileStatus::Thumb;
        }

        Ok(Some(linked))
    }

    async fn delete_cascade(&self, id: Id) -> FileStoreResult<Vec<FileRecord>> {
        let mut records = self.records.write().await;

        if !records.iter().any(|r| r.id == Some(id)) {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        Self::collect_tree(&records, id, &mut ids);

        Ok(Self::remove_ids(&mut records, &ids))
    }

    async fn delete_drafts_before(&self, cutoff: DateTime<Utc>) -> FileStoreResult<Vec<FileRecord>> {
        let mut records = self.records.write().await;

        let expired: Vec<Id> = records
            .iter()
            .filter(|r| r.status == FileStatus::Draft && r.created_at < cutoff)
            .filter_map(|r| r.id)
            .collect();

        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for id in expired {
            if seen.contains(&id) {
                continue;
            }
            let mut tree = Vec::new();
            Self::collect_tree(&records, id, &mut tree);
            for member in tree {
                if seen.insert(member) {
                    ids.push(member);
                }
            }
        }

        Ok(Self::remove_ids(&mut records, &ids))
    }
}
