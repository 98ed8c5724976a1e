//! # filestore-db
//!
//! PostgreSQL persistence for Filestore using SQLx:
//!
//! - Connection pool management
//! - Schema bootstrap
//! - `PgFileRepository`, the transactional `FileRepository` implementation
//!
//! ## Example
//!
//! ```ignore
//! use filestore_db::{Database, DatabaseConfig, PgFileRepository};
//!
//! let config = DatabaseConfig::from_env();
//! let db = Database::connect(&config).await?;
//! filestore_db::schema::migrate(db.pool()).await?;
//!
//! let repo = PgFileRepository::new(db.pool().clone());
//! let record = repo.find_by_token("token-...").await?;
//! ```

pub mod files;
pub mod pool;
pub mod repository;
pub mod schema;

// Re-exports
pub use files::{FileRow, PgFileRepository};
pub use pool::{Database, DatabaseConfig};
pub use repository::{RepositoryError, RepositoryResult};
