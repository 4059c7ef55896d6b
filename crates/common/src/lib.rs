//! Shared building blocks for the Herald notification delivery service:
//! configuration, database pool, error types, and the persisted data model.

pub mod config;
pub mod db;
pub mod error;
pub mod types;
