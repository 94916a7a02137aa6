//! Service layer orchestrating repositories and the segmentation engine.

pub mod segmentation;
