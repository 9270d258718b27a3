//! Infrastructure layer for taskloom.
//!
//! Implements the ports defined in `taskloom-core`: SQLite run and
//! breakpoint storage, the filesystem task record store, subprocess and HTTP
//! agent adapters, and the `config.toml` loader.

pub mod agent;
pub mod config;
pub mod filesystem;
pub mod sqlite;
