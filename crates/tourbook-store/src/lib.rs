//! # tourbook-store
//!
//! SQLite persistence for the tour catalog and the notification subscriber
//! directory.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection`; async callers share it behind a mutex.

pub mod database;
pub mod migrations;
pub mod models;
pub mod subscribers;
pub mod tours;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
