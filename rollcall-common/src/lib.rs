//! # Rollcall Common Library
//!
//! Shared code for the Rollcall attendance services:
//! - Database initialization, migrations and persisted models
//! - Settings table access and lock-retry helper
//! - Bootstrap configuration loading
//! - Hardware response envelope types
//! - Time parsing utilities

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use error::{Error, Result};
