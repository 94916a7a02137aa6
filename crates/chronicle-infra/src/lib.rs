//! Infrastructure layer for Chronicle.
//!
//! Contains implementations of the repository traits defined in `chronicle-core`:
//! SQLite storage for the message archive and its scenes, the global config
//! loader, and data directory resolution.

pub mod config;
pub mod filesystem;
pub mod sqlite;
