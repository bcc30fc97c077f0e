#![forbid(unsafe_code)]

//! The rendering-engine capability.
//!
//! [`MapEngine`] is the narrow surface pinmap needs from a map renderer:
//! sources, layers, event handlers, images, cluster expansion queries, the
//! camera, feature-state, and the cursor. Implementations use interior
//! mutability and are shared as [`MapHandle`] on a single UI thread.
//!
//! # Design
//!
//! The trait is object-safe. Asynchronous capabilities return
//! [`LocalBoxFuture`]s that own everything they need (`'static`), so callers
//! can hold them across teardown and rebuild cycles without borrowing the
//! engine.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | Source already exists | `add_source` twice | [`EngineError::SourceExists`] |
//! | Source in use | `remove_source` before its layers | [`EngineError::SourceInUse`] |
//! | Layer without source | `add_layer` first | [`EngineError::MissingSource`] |
//! | Duplicate image | `add_image` twice | [`EngineError::ImageExists`] |
//! | Unknown cluster | stale `cluster_id` | [`EngineError::UnknownCluster`] |

use std::fmt;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use futures::task::LocalSpawn;

use crate::feature::{ClickEvent, ClusterId};
use crate::geometry::LngLat;
use crate::id::UserId;
use crate::style::{ClusterSourceConfig, LayerSpec};

/// Shared handle to an engine.
pub type MapHandle = Rc<dyn MapEngine>;

/// Single-threaded executor used for continuations of engine futures.
pub type Spawner = Rc<dyn LocalSpawn>;

/// Callback registered for a (layer, event) pair.
pub type EventHandler = Rc<dyn Fn(&ClickEvent)>;

/// Errors reported by an engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("source '{0}' already exists")]
    SourceExists(String),
    #[error("source '{0}' does not exist")]
    MissingSource(String),
    #[error("source '{source_id}' is still used by layer '{layer_id}'")]
    SourceInUse { source_id: String, layer_id: String },
    #[error("layer '{0}' already exists")]
    LayerExists(String),
    #[error("layer '{0}' does not exist")]
    MissingLayer(String),
    #[error("image '{0}' already exists")]
    ImageExists(String),
    #[error("failed to load image '{url}': {reason}")]
    ImageLoad { url: String, reason: String },
    #[error("cluster {0:?} is not part of the current cluster index")]
    UnknownCluster(ClusterId),
    #[error("handler {0:?} is not registered")]
    UnknownHandler(HandlerId),
}

/// Pointer events a layer handler can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Click,
    MouseEnter,
    MouseLeave,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Click => "click",
            Self::MouseEnter => "mouseenter",
            Self::MouseLeave => "mouseleave",
        })
    }
}

/// Opaque token returned by [`MapEngine::on`], required to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(pub u64);

/// Decoded bitmap handed to [`MapEngine::add_image`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IconImage {
    pub width: u32,
    pub height: u32,
    /// RGBA8, row-major.
    pub pixels: Vec<u8>,
}

/// How an image is registered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageOptions {
    /// Signed-distance-field image, tintable at paint time.
    pub sdf: bool,
    pub pixel_ratio: f32,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            sdf: false,
            pixel_ratio: 1.0,
        }
    }
}

/// Where the camera should end up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraTarget {
    pub center: LngLat,
    pub zoom: f64,
}

/// Per-feature UI state overlaid on source data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureState {
    pub selected: bool,
}

/// Canvas cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cursor {
    #[default]
    Default,
    Pointer,
}

/// Capability surface of a map renderer.
pub trait MapEngine {
    fn has_source(&self, source_id: &str) -> bool;

    /// # Errors
    ///
    /// [`EngineError::SourceExists`] if `source_id` is taken.
    fn add_source(&self, source_id: &str, source: &ClusterSourceConfig) -> Result<(), EngineError>;

    /// # Errors
    ///
    /// [`EngineError::MissingSource`] if absent, [`EngineError::SourceInUse`]
    /// while a layer still references it.
    fn remove_source(&self, source_id: &str) -> Result<(), EngineError>;

    fn has_layer(&self, layer_id: &str) -> bool;

    /// Add a layer on top of the existing ones.
    ///
    /// # Errors
    ///
    /// [`EngineError::LayerExists`] or [`EngineError::MissingSource`].
    fn add_layer(&self, layer: &LayerSpec) -> Result<(), EngineError>;

    /// # Errors
    ///
    /// [`EngineError::MissingLayer`] if absent.
    fn remove_layer(&self, layer_id: &str) -> Result<(), EngineError>;

    /// Register `handler` for `kind` events on `layer_id`.
    fn on(&self, layer_id: &str, kind: EventKind, handler: EventHandler) -> HandlerId;

    /// # Errors
    ///
    /// [`EngineError::UnknownHandler`] if `handler` is not registered for
    /// this (layer, kind) pair.
    fn off(&self, layer_id: &str, kind: EventKind, handler: HandlerId) -> Result<(), EngineError>;

    fn has_image(&self, image_id: &str) -> bool;

    /// Fetch and decode an image.
    fn load_image(&self, url: &str) -> LocalBoxFuture<'static, Result<IconImage, EngineError>>;

    /// # Errors
    ///
    /// [`EngineError::ImageExists`] if `image_id` is taken.
    fn add_image(
        &self,
        image_id: &str,
        image: IconImage,
        options: ImageOptions,
    ) -> Result<(), EngineError>;

    /// Minimum zoom at which the members of `cluster` no longer share a
    /// cluster.
    fn cluster_expansion_zoom(
        &self,
        source_id: &str,
        cluster: ClusterId,
    ) -> LocalBoxFuture<'static, Result<f64, EngineError>>;

    /// Animate the camera to `target`.
    fn ease_to(&self, target: CameraTarget);

    /// # Errors
    ///
    /// [`EngineError::MissingSource`] if `source_id` is absent.
    fn set_feature_state(
        &self,
        source_id: &str,
        feature: UserId,
        state: FeatureState,
    ) -> Result<(), EngineError>;

    fn set_cursor(&self, cursor: Cursor);
}
