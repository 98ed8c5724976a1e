//! # filestore-core
//!
//! Core types, traits, and configuration shared by the Filestore crates.
//!
//! - Primary key type and identity traits
//! - Application configuration loaded from the environment

pub mod config;
pub mod traits;

pub use config::{AppConfig, ConfigError, ThumbnailConfig};
pub use traits::*;
