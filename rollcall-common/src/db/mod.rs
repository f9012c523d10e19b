//! Database initialization, schema and shared queries

pub mod init;
pub mod migrations;
pub mod models;
pub mod retry;
pub mod settings;

pub use init::*;
pub use migrations::*;
pub use models::*;
pub use retry::retry_on_lock;
pub use settings::{ensure_setting, get_setting, set_setting, DEFAULT_SETTINGS};
