//! SQLite backend for the reconciliation engine.
//!
//! [`SqliteDatabase`] implements the backend traits on top of the free functions in [`db`].
mod sqlite_impl;

pub mod db;
pub use sqlite_impl::SqliteDatabase;
