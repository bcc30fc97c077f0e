#![forbid(unsafe_code)]

//! Test harness for pinmap.
//!
//! Provides [`HeadlessMap`], an in-memory [`pinmap_core::MapEngine`] with an
//! operation journal and controllable image loads, and [`ClusterIndex`], the
//! deterministic clustering it uses to answer rendering and expansion-zoom
//! queries.

pub mod cluster_index;
pub mod headless;

pub use cluster_index::ClusterIndex;
pub use headless::{EngineOp, HeadlessMap, ImageLoadMode};
