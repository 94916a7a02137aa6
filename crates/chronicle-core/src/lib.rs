//! Segmentation engine and repository trait definitions for Chronicle.
//!
//! This crate defines the "ports" (repository and sink traits) that the
//! infrastructure layer implements, plus the scene segmentation algorithm
//! itself. It depends only on `chronicle-types` -- never on
//! `chronicle-infra` or any database/IO crate.

pub mod repository;
pub mod segment;
pub mod service;
