//! Shared application state

use std::sync::Arc;

use filestore::{FileRecordStore, FileRepository, Storage};
use filestore_core::config::AppConfig;
use filestore_db::Database;

/// Store over whichever repository and blob backend the server was started with
pub type Files = FileRecordStore<dyn FileRepository, dyn Storage>;

#[derive(Clone)]
pub struct AppState {
    pub files: Arc<Files>,
    pub config: AppConfig,
    /// Pool behind the repository; `None` when running on in-memory records
    pub db: Option<Database>,
}

impl AppState {
    pub fn new(files: Arc<Files>, config: AppConfig) -> Self {
        Self {
            files,
            config,
            db: None,
        }
    }

    pub fn with_database(mut self, db: Option<Database>) -> Self {
        self.db = db;
        self
    }
}
