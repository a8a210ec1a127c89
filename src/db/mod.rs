//! Database module for the notifier.
//!
//! Provides SQLite storage for connection definitions and the monitored list.

mod models;
mod store;

pub use models::*;
pub use store::*;
