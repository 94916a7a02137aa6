//! Shared domain types for Chronicle.
//!
//! This crate contains the core domain types used across the Chronicle
//! workspace: archived messages and their location keys, scene groups,
//! segmentation runs and outcomes, configuration, and error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod message;
pub mod scene;
