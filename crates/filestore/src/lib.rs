//! # filestore
//!
//! File record lifecycle management.
//!
//! ## Features
//!
//! - Blob storage abstraction (local filesystem, in-memory)
//! - Content probing: MD5, MIME type, image dimensions
//! - Thumbnail derivation (PNG, JPEG, GIF)
//! - Draft / linked / thumb lifecycle with cascading deletion
//! - Reclamation of abandoned drafts
//! - Owner-side field orchestration and delivery headers
//!
//! ## Example
//!
//! ```rust,ignore
//! use filestore::{FileRecordStore, MemoryFileRepository, MemoryStorage};
//! use std::sync::Arc;
//!
//! let repo = Arc::new(MemoryFileRepository::new());
//! let storage = Arc::new(MemoryStorage::new());
//! let store = FileRecordStore::new(repo, storage, Default::default());
//!
//! // Upload, then attach to an owner
//! let record = store.ingest_bytes(bytes::Bytes::from(file_data), "photo.jpg").await?;
//! store.link(&record.token, owner_id).await?;
//! ```

pub mod delivery;
pub mod error;
pub mod metadata;
pub mod model;
pub mod owner;
pub mod repository;
pub mod service;
pub mod storage;
pub mod thumbnail;

#[cfg(test)]
pub(crate) mod testing;

pub use delivery::{delivery_headers, Disposition};
pub use error::{FileStoreError, FileStoreResult};
pub use model::{FileMeta, FileRecord, FileStatus, ImageDimensions, TOKEN_PREFIX};
pub use owner::FileField;
pub use repository::{FileRepository, MemoryFileRepository};
pub use service::{FileRecordStore, FileStoreConfig};
pub use storage::{LocalStorage, MemoryStorage, Storage, StorageError, StorageResult};
pub use thumbnail::{ThumbnailFormat, ThumbnailSpec};
