//! File record model

use chrono::{DateTime, Utc};
use filestore_core::{Entity, Id, Identifiable, Timestamped};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix every token starts with
pub const TOKEN_PREFIX: &str = "token-";

/// Lifecycle status of a file record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// Uploaded, not attached to any owner yet
    #[default]
    Draft,
    /// Referenced by an owner
    Linked,
    /// Derived rendition of another record
    Thumb,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Linked => "linked",
            Self::Thumb => "thumb",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "linked" => Some(Self::Linked),
            "thumb" => Some(Self::Thumb),
            _ => None,
        }
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pixel dimensions of an image file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

/// Metadata gathered while ingesting file content
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMeta {
    /// Original filename as supplied by the uploader
    pub filename: Option<String>,
    /// Lower-cased extension of the original filename
    pub extension: Option<String>,
    /// Hex MD5 digest of the content
    pub md5: Option<String>,
    /// MIME type sniffed from the content
    pub mime_type: Option<String>,
    /// Size in bytes
    pub size: i64,
    /// Set only for raster images
    pub image: Option<ImageDimensions>,
}

impl FileMeta {
    pub fn is_image(&self) -> bool {
        self.image.is_some()
    }
}

/// A file record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Row ID
    pub id: Option<Id>,
    /// External handle
    pub token: String,
    /// Blob key in the storage backend
    pub location: String,
    /// Public URL of the blob, when the backend exposes one
    pub url: Option<String>,
    pub status: FileStatus,
    /// Record this one was derived from
    pub source_file_id: Option<Id>,
    pub created_at: DateTime<Utc>,
    pub meta: FileMeta,
}

impl FileRecord {
    /// Allocate a fresh draft record with a new token and location
    pub fn provision() -> Self {
        Self {
            id: None,
            token: generate_token(),
            location: generate_location(),
            url: None,
            status: FileStatus::Draft,
            source_file_id: None,
            created_at: Utc::now(),
            meta: FileMeta::default(),
        }
    }

    /// Mark this record as derived from `source`
    pub fn derived_from(mut self, source: Id) -> Self {
        self.source_file_id = Some(source);
        self
    }

    pub fn is_draft(&self) -> bool {
        self.status == FileStatus::Draft
    }

    pub fn is_linked(&self) -> bool {
        self.status == FileStatus::Linked
    }

    pub fn is_derived(&self) -> bool {
        self.source_file_id.is_some()
    }

    pub fn is_image(&self) -> bool {
        self.meta.is_image()
    }

    /// Filename to present to clients
    pub fn display_name(&self) -> &str {
        self.meta.filename.as_deref().unwrap_or(&self.location)
    }
}

impl Identifiable for FileRecord {
    fn id(&self) -> Option<Id> {
        self.id
    }
}

impl Timestamped for FileRecord {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Entity for FileRecord {
    const TABLE_NAME: &'static str = "filestore_file";
    const TYPE_NAME: &'static str = "File";
}

/// Generate a unique token
pub fn generate_token() -> String {
    format!("{}{}", TOKEN_PREFIX, Uuid::new_v4().simple())
}

/// Generate a unique blob key
pub fn generate_location() -> String {
    format!("file-{}.bin", Uuid::new_v4().simple())
}

/// Whether a value looks like a file token rather than a row id
pub fn is_token(value: &str) -> bool {
    value.starts_with(TOKEN_PREFIX)
}

/// Extension of `filename`, lower-cased; `tmp` counts as no extension
pub fn extension_of(filename: &str) -> Option<String> {
    let ext = std::path::Path::new(filename)
        .extension()
        .and_then(|s| s.to_str())?
        .to_lowercase();

    if ext.is_empty() || ext == "tmp" {
        None
    } else {
        Some(ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provision() {
        let record = FileRecord::provision();

        assert!(record.token.starts_with("token-"));
        assert!(record.location.starts_with("file-"));
        assert!(record.location.ends_with(".bin"));
        assert_eq!(record.status, FileStatus::Draft);
        assert!(record.is_new_record());
        assert!(!record.is_derived());
        assert!(!record.is_image());
    }

    #[test]
    fn test_status_conversion() {
        assert_eq!(FileStatus::Linked.as_str(), "linked");
        assert_eq!(FileStatus::from_str("thumb"), Some(FileStatus::Thumb));
        assert_eq!(FileStatus::from_str("thumbok"), None);
        assert_eq!(FileStatus::from_str("ready"), None);
        assert_eq!(FileStatus::default(), FileStatus::Draft);
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&FileStatus::Linked).unwrap();
        assert_eq!(json, "\"linked\"");
    }

    #[test]
    fn test_extension() {
        assert_eq!(extension_of("Photo.JPG"), Some("jpg".to_string()));
        assert_eq!(extension_of("archive.tar.gz"), Some("gz".to_string()));
        assert_eq!(extension_of("upload.tmp"), None);
        assert_eq!(extension_of("README"), None);
    }

    #[test]
    fn test_is_token() {
        assert!(is_token(&generate_token()));
        assert!(!is_token("42"));
    }

    #[test]
    fn test_display_name_falls_back_to_location() {
        let mut record = FileRecord::provision();
        assert_eq!(record.display_name(), record.location);

        record.meta.filename = Some("cv.pdf".to_string());
        assert_eq!(record.display_name(), "cv.pdf");
    }

    #[test]
    fn test_derived_from() {
        let thumb = FileRecord::provision().derived_from(3);
        assert_eq!(thumb.source_file_id, Some(3));
        assert!(thumb.is_derived());
    }
}
