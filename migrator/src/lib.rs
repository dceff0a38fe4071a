//! bibmigrate: load dumps of a legacy digital library into the new storage model

pub mod config;
pub mod db;
pub mod dump;
pub mod error;
pub mod loader;
pub mod source;
pub mod store;

pub use error::{MigrateError, Result};
