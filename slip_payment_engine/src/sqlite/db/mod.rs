//! # SQLite Database methods
//!
//! This module contains "low-level" SQLite database interactions.
//!
//! All these interaction are maintained by simple functions (rather than stateful structs) that accept a
//! `&mut SqliteConnection` argument. Callers can obtain a connection from a pool, or open a transaction and pass
//! `&mut tx` through to several of them, so that a whole payment is written atomically.
use std::env;

use log::info;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Error as SqlxError,
    SqlitePool,
};

use crate::config::DEFAULT_DATABASE_URL;

pub mod customers;
pub mod installments;
pub mod orders;
pub mod pawns;
pub mod payments;

pub fn db_url() -> String {
    let result = env::var("SPE_DATABASE_URL").unwrap_or_else(|_| {
        info!("🗃️ SPE_DATABASE_URL is not set. Using the default.");
        DEFAULT_DATABASE_URL.to_string()
    });
    info!("🗃️ Using database URL: {result}");
    result
}

pub async fn new_pool(url: &str, max_connections: u32) -> Result<SqlitePool, SqlxError> {
    let options = url.parse::<SqliteConnectOptions>()?.foreign_keys(true);
    let pool = SqlitePoolOptions::new().max_connections(max_connections).connect_with(options).await?;
    Ok(pool)
}
