//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (chronicle-infra) implements. The core crate never depends on any
//! specific storage technology.

pub mod archive;
pub mod scene;
