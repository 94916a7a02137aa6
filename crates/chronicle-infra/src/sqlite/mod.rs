//! SQLite storage layer.
//!
//! Repository implementations backed by SQLite with WAL mode and split
//! read/write connection pools.

pub mod archive;
pub mod pool;
pub mod scene_store;

mod row;
