//! Data layer module
//!
//! Handles tenant data persistence:
//! - SQLite database operations (one database per tenant)
//! - Record models

mod database;
mod models;

pub use database::Database;
pub use models::*;
