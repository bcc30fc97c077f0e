#![forbid(unsafe_code)]

//! Core: value types, declarative style specs, and the map-engine capability.
//!
//! # Role in pinmap
//! `pinmap-core` is the vocabulary layer. It owns the identity and geometry
//! types, the declarative source/layer specifications that describe clustered
//! user pins, the click/hover event model, and the [`engine::MapEngine`]
//! trait that stands in for the rendering engine.
//!
//! # Primary responsibilities
//! - **Identity**: [`id::UserId`] and the immutable [`id::IdSet`] used by filters.
//! - **Style**: [`style::ClusterSourceConfig`], [`style::FilterPredicate`], and
//!   the three [`style::LayerSpec`] variants.
//! - **Events**: [`feature::RenderedFeature`] and [`feature::ClickEvent`].
//! - **Engine**: the object-safe capability trait and its error type.
//! - **Config**: [`config::MapConfig`] with env and JSON loading.
//!
//! # How it fits in the system
//! `pinmap-runtime` drives a [`engine::MapHandle`] through install, bind, and
//! rebuild cycles using the specs defined here. `pinmap-harness` implements
//! the same trait headlessly so the runtime can be tested without a renderer.

pub mod config;
pub mod engine;
pub mod feature;
pub mod geometry;
pub mod id;
#[cfg(feature = "logging")]
pub mod logging;
pub mod style;

pub use config::{ConfigError, LifecyclePolicy, MapConfig, Palette};
pub use engine::{
    CameraTarget, Cursor, EngineError, EventHandler, EventKind, FeatureState, HandlerId,
    IconImage, ImageOptions, MapEngine, MapHandle, Spawner,
};
pub use feature::{ClickEvent, ClusterId, RenderedFeature, UserFeatureCollection};
pub use geometry::{LngLat, ScreenPoint};
pub use id::{IdSet, UserId};
pub use style::{
    ClusterSourceConfig, FilterPredicate, LayerRole, LayerSet, LayerSpec, StepScale,
};
