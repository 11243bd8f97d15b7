//! # Jukebox Common Library
//!
//! Shared code for the jukebox workspace:
//! - Error type and result alias
//! - Configuration loading
//! - Database bootstrap and row models
//! - Event types broadcast by the playback service
//! - Timestamp helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod time;

pub use config::AppConfig;
pub use error::{Error, Result};
