#![forbid(unsafe_code)]

//! Headless map engine for CI testing.
//!
//! `HeadlessMap` implements [`MapEngine`] entirely in memory. It is designed
//! for:
//!
//! - **Lifecycle verification**: every mutating call is journaled as an
//!   [`EngineOp`] so tests can assert exact add/remove ordering.
//! - **Leak detection**: bindings are tracked per (layer, event) and
//!   bindings whose layer is gone are reported by
//!   [`HeadlessMap::dangling_bindings`].
//! - **Race reproduction**: image loads can be deferred and completed on
//!   demand, so several registration attempts can be left in flight.
//! - **Clustering**: each added source builds a [`ClusterIndex`] over the
//!   dataset served at its URL, restricted by the source filter.
//!
//! # Example
//!
//! ```
//! use pinmap_core::{ClusterSourceConfig, LngLat, MapEngine, UserId};
//! use pinmap_harness::HeadlessMap;
//!
//! let map = HeadlessMap::new();
//! map.serve("https://api.test/geojson/users", vec![(UserId(1), LngLat::new(2.35, 48.85))]);
//! map.add_source("users", &ClusterSourceConfig::new("https://api.test/geojson/users"))
//!     .unwrap();
//! assert_eq!(map.source_points("users"), vec![UserId(1)]);
//! ```
//!
//! # Engine rules enforced
//!
//! Same as a real renderer: no duplicate sources, layers, or images; layers
//! need an existing source; a source cannot be removed while a layer still
//! reads from it.

use std::cell::RefCell;
use std::collections::BTreeMap;

use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::{self, LocalBoxFuture};
use pinmap_core::engine::{
    CameraTarget, Cursor, EngineError, EventHandler, EventKind, FeatureState, HandlerId,
    IconImage, ImageOptions, MapEngine,
};
use pinmap_core::feature::{ClickEvent, ClusterId, RenderedFeature, UserFeatureCollection};
use pinmap_core::geometry::LngLat;
use pinmap_core::id::UserId;
use pinmap_core::style::{ClusterSourceConfig, LayerSpec};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

use crate::cluster_index::ClusterIndex;

/// A journaled engine mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineOp {
    AddSource(String),
    RemoveSource(String),
    AddLayer(String),
    RemoveLayer(String),
    On { layer: String, kind: EventKind },
    Off { layer: String, kind: EventKind },
    LoadImage(String),
    AddImage(String),
    EaseTo(CameraTarget),
    SetFeatureState { source: String, id: UserId, state: FeatureState },
    SetCursor(Cursor),
}

/// When image loads resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageLoadMode {
    /// The returned future is already complete.
    #[default]
    Immediate,
    /// Loads stay pending until [`HeadlessMap::complete_image_loads`].
    Deferred,
}

#[derive(Debug)]
struct SourceEntry {
    config: ClusterSourceConfig,
    index: ClusterIndex,
    feature_state: FxHashMap<UserId, FeatureState>,
}

struct Binding {
    id: HandlerId,
    layer: String,
    kind: EventKind,
    handler: EventHandler,
}

type PendingLoad = (String, oneshot::Sender<Result<IconImage, EngineError>>);

struct State {
    datasets: FxHashMap<String, Vec<(UserId, LngLat)>>,
    sources: BTreeMap<String, SourceEntry>,
    /// Paint order, bottom first.
    layers: Vec<LayerSpec>,
    bindings: Vec<Binding>,
    next_handler: u64,
    images: BTreeMap<String, (IconImage, ImageOptions)>,
    image_mode: ImageLoadMode,
    failing_images: FxHashSet<String>,
    pending_images: Vec<PendingLoad>,
    camera: CameraTarget,
    cursor: Cursor,
    ops: Vec<EngineOp>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            datasets: FxHashMap::default(),
            sources: BTreeMap::new(),
            layers: Vec::new(),
            bindings: Vec::new(),
            next_handler: 1,
            images: BTreeMap::new(),
            image_mode: ImageLoadMode::default(),
            failing_images: FxHashSet::default(),
            pending_images: Vec::new(),
            camera: CameraTarget {
                center: LngLat::default(),
                zoom: 1.0,
            },
            cursor: Cursor::default(),
            ops: Vec::new(),
        }
    }
}

/// In-memory [`MapEngine`].
#[derive(Default)]
pub struct HeadlessMap {
    state: RefCell<State>,
}

impl std::fmt::Debug for HeadlessMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("HeadlessMap")
            .field("sources", &state.sources.keys().collect::<Vec<_>>())
            .field("layers", &state.layers.iter().map(LayerSpec::id).collect::<Vec<_>>())
            .field("bindings", &state.bindings.len())
            .field("images", &state.images.keys().collect::<Vec<_>>())
            .field("pending_images", &state.pending_images.len())
            .finish()
    }
}

/// Bitmap returned for every successful load.
fn placeholder_icon() -> IconImage {
    IconImage {
        width: 2,
        height: 2,
        pixels: vec![255; 16],
    }
}

impl HeadlessMap {
    /// Create an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // -- Datasets ---------------------------------------------------------

    /// Serve `points` at `url` for sources added afterwards.
    pub fn serve(&self, url: impl Into<String>, points: Vec<(UserId, LngLat)>) {
        self.state.borrow_mut().datasets.insert(url.into(), points);
    }

    /// Serve a GeoJSON feature collection at `url`. Returns the number of
    /// usable points.
    ///
    /// # Errors
    ///
    /// Returns the decode error if `doc` is not a feature collection.
    pub fn serve_geojson(
        &self,
        url: impl Into<String>,
        doc: serde_json::Value,
    ) -> Result<usize, serde_json::Error> {
        let points = UserFeatureCollection::from_value(doc)?.points();
        let count = points.len();
        self.serve(url, points);
        Ok(count)
    }

    // -- Image loading control -------------------------------------------

    /// Leave subsequent image loads pending until completed explicitly.
    pub fn defer_image_loads(&self) {
        self.state.borrow_mut().image_mode = ImageLoadMode::Deferred;
    }

    /// Make loads of `url` fail.
    pub fn fail_image(&self, url: impl Into<String>) {
        self.state.borrow_mut().failing_images.insert(url.into());
    }

    /// Number of loads waiting for completion.
    #[must_use]
    pub fn pending_image_loads(&self) -> usize {
        self.state.borrow().pending_images.len()
    }

    /// Resolve every pending load. Returns how many were resolved. The
    /// awaiting tasks still need their executor to run.
    pub fn complete_image_loads(&self) -> usize {
        let (pending, failing) = {
            let mut state = self.state.borrow_mut();
            (
                std::mem::take(&mut state.pending_images),
                state.failing_images.clone(),
            )
        };
        let count = pending.len();
        for (url, tx) in pending {
            let result = if failing.contains(&url) {
                Err(EngineError::ImageLoad {
                    url,
                    reason: "request failed".to_string(),
                })
            } else {
                Ok(placeholder_icon())
            };
            // The receiver may have been dropped by a cancelled registration.
            let _ = tx.send(result);
        }
        count
    }

    // -- Inspection -------------------------------------------------------

    /// Journal of mutating calls, oldest first.
    #[must_use]
    pub fn ops(&self) -> Vec<EngineOp> {
        self.state.borrow().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.state.borrow_mut().ops.clear();
    }

    /// Config a source was added with.
    #[must_use]
    pub fn source(&self, source_id: &str) -> Option<ClusterSourceConfig> {
        self.state
            .borrow()
            .sources
            .get(source_id)
            .map(|entry| entry.config.clone())
    }

    #[must_use]
    pub fn source_ids(&self) -> Vec<String> {
        self.state.borrow().sources.keys().cloned().collect()
    }

    /// Layer ids in paint order, bottom first.
    #[must_use]
    pub fn layer_ids(&self) -> Vec<String> {
        self.state
            .borrow()
            .layers
            .iter()
            .map(|l| l.id().to_string())
            .collect()
    }

    #[must_use]
    pub fn layer(&self, layer_id: &str) -> Option<LayerSpec> {
        self.state
            .borrow()
            .layers
            .iter()
            .find(|l| l.id() == layer_id)
            .cloned()
    }

    /// Every live binding as (layer, event), sorted.
    #[must_use]
    pub fn bindings(&self) -> Vec<(String, EventKind)> {
        let mut out: Vec<_> = self
            .state
            .borrow()
            .bindings
            .iter()
            .map(|b| (b.layer.clone(), b.kind))
            .collect();
        out.sort();
        out
    }

    #[must_use]
    pub fn binding_count(&self, layer_id: &str, kind: EventKind) -> usize {
        self.state
            .borrow()
            .bindings
            .iter()
            .filter(|b| b.layer == layer_id && b.kind == kind)
            .count()
    }

    /// Bindings on layers that no longer exist.
    #[must_use]
    pub fn dangling_bindings(&self) -> Vec<(String, EventKind)> {
        let state = self.state.borrow();
        let mut out: Vec<_> = state
            .bindings
            .iter()
            .filter(|b| !state.layers.iter().any(|l| l.id() == b.layer))
            .map(|b| (b.layer.clone(), b.kind))
            .collect();
        out.sort();
        out
    }

    /// Registered image ids.
    #[must_use]
    pub fn image_ids(&self) -> Vec<String> {
        self.state.borrow().images.keys().cloned().collect()
    }

    #[must_use]
    pub fn image_options(&self, image_id: &str) -> Option<ImageOptions> {
        self.state.borrow().images.get(image_id).map(|(_, o)| *o)
    }

    #[must_use]
    pub fn camera(&self) -> CameraTarget {
        self.state.borrow().camera
    }

    /// Jump the camera without journaling, as a user pan would.
    pub fn jump_to(&self, target: CameraTarget) {
        self.state.borrow_mut().camera = target;
    }

    #[must_use]
    pub fn cursor(&self) -> Cursor {
        self.state.borrow().cursor
    }

    #[must_use]
    pub fn feature_state(&self, source_id: &str, id: UserId) -> Option<FeatureState> {
        self.state
            .borrow()
            .sources
            .get(source_id)
            .and_then(|entry| entry.feature_state.get(&id).copied())
    }

    /// Ids queryable from a source after filtering, ascending.
    #[must_use]
    pub fn source_points(&self, source_id: &str) -> Vec<UserId> {
        self.state
            .borrow()
            .sources
            .get(source_id)
            .map(|entry| entry.index.ids().collect())
            .unwrap_or_default()
    }

    /// Members of a cluster in a source's current index.
    #[must_use]
    pub fn cluster_members(&self, source_id: &str, cluster: ClusterId) -> Option<Vec<UserId>> {
        self.state
            .borrow()
            .sources
            .get(source_id)
            .and_then(|entry| entry.index.members(cluster))
    }

    /// Features painted by `layer_id` at the current camera zoom.
    #[must_use]
    pub fn rendered_features(&self, layer_id: &str) -> Vec<RenderedFeature> {
        let state = self.state.borrow();
        let Some(layer) = state.layers.iter().find(|l| l.id() == layer_id) else {
            return Vec::new();
        };
        let Some(entry) = state.sources.get(layer.source()) else {
            return Vec::new();
        };
        let want_clusters = layer.role().renders_clusters();
        entry
            .index
            .features_at(state.camera.zoom)
            .into_iter()
            .filter(|f| f.is_cluster() == want_clusters)
            .map(|mut f| {
                if let Some(id) = f.id {
                    f.state = entry.feature_state.get(&id).copied().unwrap_or_default();
                }
                f
            })
            .collect()
    }

    // -- Event dispatch ---------------------------------------------------

    /// Deliver `event` to every `kind` handler on `layer_id`. Returns how
    /// many handlers ran. Layers that do not exist receive nothing.
    pub fn dispatch(&self, layer_id: &str, kind: EventKind, event: &ClickEvent) -> usize {
        // Collect handlers first so they can call back into the engine.
        let handlers: Vec<EventHandler> = {
            let state = self.state.borrow();
            if !state.layers.iter().any(|l| l.id() == layer_id) {
                return 0;
            }
            state
                .bindings
                .iter()
                .filter(|b| b.layer == layer_id && b.kind == kind)
                .map(|b| b.handler.clone())
                .collect()
        };
        trace!(layer_id, %kind, handlers = handlers.len(), "dispatch");
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    /// Click on `layer_id` over `features`.
    pub fn click(&self, layer_id: &str, features: Vec<RenderedFeature>) -> usize {
        self.dispatch(layer_id, EventKind::Click, &ClickEvent::on_features(features))
    }

    pub fn hover_enter(&self, layer_id: &str) -> usize {
        self.dispatch(layer_id, EventKind::MouseEnter, &ClickEvent::default())
    }

    pub fn hover_leave(&self, layer_id: &str) -> usize {
        self.dispatch(layer_id, EventKind::MouseLeave, &ClickEvent::default())
    }
}

impl MapEngine for HeadlessMap {
    fn has_source(&self, source_id: &str) -> bool {
        self.state.borrow().sources.contains_key(source_id)
    }

    fn add_source(&self, source_id: &str, source: &ClusterSourceConfig) -> Result<(), EngineError> {
        let mut state = self.state.borrow_mut();
        if state.sources.contains_key(source_id) {
            return Err(EngineError::SourceExists(source_id.to_string()));
        }
        let points: Vec<_> = state
            .datasets
            .get(&source.data_url)
            .map(|points| {
                points
                    .iter()
                    .filter(|(id, _)| source.filter.matches(*id))
                    .copied()
                    .collect()
            })
            .unwrap_or_default();
        let index = ClusterIndex::new(
            points,
            source.cluster_radius,
            source.cluster_max_zoom,
            source.cluster,
        );
        state.sources.insert(
            source_id.to_string(),
            SourceEntry {
                config: source.clone(),
                index,
                feature_state: FxHashMap::default(),
            },
        );
        state.ops.push(EngineOp::AddSource(source_id.to_string()));
        Ok(())
    }

    fn remove_source(&self, source_id: &str) -> Result<(), EngineError> {
        let mut state = self.state.borrow_mut();
        if !state.sources.contains_key(source_id) {
            return Err(EngineError::MissingSource(source_id.to_string()));
        }
        if let Some(layer) = state.layers.iter().find(|l| l.source() == source_id) {
            return Err(EngineError::SourceInUse {
                source_id: source_id.to_string(),
                layer_id: layer.id().to_string(),
            });
        }
        state.sources.remove(source_id);
        state.ops.push(EngineOp::RemoveSource(source_id.to_string()));
        Ok(())
    }

    fn has_layer(&self, layer_id: &str) -> bool {
        self.state.borrow().layers.iter().any(|l| l.id() == layer_id)
    }

    fn add_layer(&self, layer: &LayerSpec) -> Result<(), EngineError> {
        let mut state = self.state.borrow_mut();
        if state.layers.iter().any(|l| l.id() == layer.id()) {
            return Err(EngineError::LayerExists(layer.id().to_string()));
        }
        if !state.sources.contains_key(layer.source()) {
            return Err(EngineError::MissingSource(layer.source().to_string()));
        }
        state.layers.push(layer.clone());
        state.ops.push(EngineOp::AddLayer(layer.id().to_string()));
        Ok(())
    }

    fn remove_layer(&self, layer_id: &str) -> Result<(), EngineError> {
        let mut state = self.state.borrow_mut();
        let Some(pos) = state.layers.iter().position(|l| l.id() == layer_id) else {
            return Err(EngineError::MissingLayer(layer_id.to_string()));
        };
        state.layers.remove(pos);
        state.ops.push(EngineOp::RemoveLayer(layer_id.to_string()));
        Ok(())
    }

    fn on(&self, layer_id: &str, kind: EventKind, handler: EventHandler) -> HandlerId {
        let mut state = self.state.borrow_mut();
        let id = HandlerId(state.next_handler);
        state.next_handler += 1;
        state.bindings.push(Binding {
            id,
            layer: layer_id.to_string(),
            kind,
            handler,
        });
        state.ops.push(EngineOp::On {
            layer: layer_id.to_string(),
            kind,
        });
        id
    }

    fn off(&self, layer_id: &str, kind: EventKind, handler: HandlerId) -> Result<(), EngineError> {
        let mut state = self.state.borrow_mut();
        let Some(pos) = state
            .bindings
            .iter()
            .position(|b| b.id == handler && b.layer == layer_id && b.kind == kind)
        else {
            return Err(EngineError::UnknownHandler(handler));
        };
        state.bindings.remove(pos);
        state.ops.push(EngineOp::Off {
            layer: layer_id.to_string(),
            kind,
        });
        Ok(())
    }

    fn has_image(&self, image_id: &str) -> bool {
        self.state.borrow().images.contains_key(image_id)
    }

    fn load_image(&self, url: &str) -> LocalBoxFuture<'static, Result<IconImage, EngineError>> {
        let mut state = self.state.borrow_mut();
        state.ops.push(EngineOp::LoadImage(url.to_string()));
        match state.image_mode {
            ImageLoadMode::Immediate => {
                let result = if state.failing_images.contains(url) {
                    Err(EngineError::ImageLoad {
                        url: url.to_string(),
                        reason: "request failed".to_string(),
                    })
                } else {
                    Ok(placeholder_icon())
                };
                future::ready(result).boxed_local()
            }
            ImageLoadMode::Deferred => {
                let (tx, rx) = oneshot::channel();
                state.pending_images.push((url.to_string(), tx));
                let url = url.to_string();
                async move {
                    rx.await.unwrap_or_else(|_| {
                        Err(EngineError::ImageLoad {
                            url,
                            reason: "load abandoned".to_string(),
                        })
                    })
                }
                .boxed_local()
            }
        }
    }

    fn add_image(
        &self,
        image_id: &str,
        image: IconImage,
        options: ImageOptions,
    ) -> Result<(), EngineError> {
        let mut state = self.state.borrow_mut();
        if state.images.contains_key(image_id) {
            return Err(EngineError::ImageExists(image_id.to_string()));
        }
        state.images.insert(image_id.to_string(), (image, options));
        state.ops.push(EngineOp::AddImage(image_id.to_string()));
        Ok(())
    }

    fn cluster_expansion_zoom(
        &self,
        source_id: &str,
        cluster: ClusterId,
    ) -> LocalBoxFuture<'static, Result<f64, EngineError>> {
        let state = self.state.borrow();
        let result = match state.sources.get(source_id) {
            None => Err(EngineError::MissingSource(source_id.to_string())),
            Some(entry) => entry
                .index
                .expansion_zoom(cluster)
                .ok_or(EngineError::UnknownCluster(cluster)),
        };
        future::ready(result).boxed_local()
    }

    fn ease_to(&self, target: CameraTarget) {
        let mut state = self.state.borrow_mut();
        state.camera = target;
        state.ops.push(EngineOp::EaseTo(target));
    }

    fn set_feature_state(
        &self,
        source_id: &str,
        feature: UserId,
        feature_state: FeatureState,
    ) -> Result<(), EngineError> {
        let mut state = self.state.borrow_mut();
        let Some(entry) = state.sources.get_mut(source_id) else {
            return Err(EngineError::MissingSource(source_id.to_string()));
        };
        entry.feature_state.insert(feature, feature_state);
        state.ops.push(EngineOp::SetFeatureState {
            source: source_id.to_string(),
            id: feature,
            state: feature_state,
        });
        Ok(())
    }

    fn set_cursor(&self, cursor: Cursor) {
        let mut state = self.state.borrow_mut();
        state.cursor = cursor;
        state.ops.push(EngineOp::SetCursor(cursor));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use pinmap_core::style::{LayerRole, LayerSet, Palette};
    use std::cell::Cell;
    use std::rc::Rc;

    const URL: &str = "https://api.test/geojson/users";

    fn layers() -> LayerSet {
        LayerSet::for_source("users", "user-pin", &Palette::default())
    }

    #[test]
    fn layer_requires_source() {
        let map = HeadlessMap::new();
        let set = layers();
        let err = map.add_layer(set.get(LayerRole::Cluster)).unwrap_err();
        assert_eq!(err, EngineError::MissingSource("users".to_string()));
    }

    #[test]
    fn source_in_use_cannot_be_removed() {
        let map = HeadlessMap::new();
        map.add_source("users", &ClusterSourceConfig::new(URL)).unwrap();
        map.add_layer(layers().get(LayerRole::Cluster)).unwrap();
        assert!(matches!(
            map.remove_source("users"),
            Err(EngineError::SourceInUse { .. })
        ));
        map.remove_layer("users-clusters").unwrap();
        map.remove_source("users").unwrap();
        assert!(map.source_ids().is_empty());
    }

    #[test]
    fn duplicate_source_and_image_rejected() {
        let map = HeadlessMap::new();
        map.add_source("users", &ClusterSourceConfig::new(URL)).unwrap();
        assert_eq!(
            map.add_source("users", &ClusterSourceConfig::new(URL)),
            Err(EngineError::SourceExists("users".to_string()))
        );
        map.add_image("pin", placeholder_icon(), ImageOptions::default())
            .unwrap();
        assert_eq!(
            map.add_image("pin", placeholder_icon(), ImageOptions::default()),
            Err(EngineError::ImageExists("pin".to_string()))
        );
    }

    #[test]
    fn filter_restricts_indexed_points() {
        let map = HeadlessMap::new();
        map.serve(
            URL,
            (1..=5).map(|i| (UserId(i), LngLat::new(i as f64, 0.0))).collect(),
        );
        let ids: pinmap_core::IdSet = [UserId(2), UserId(4), UserId(9)].iter().collect();
        let config = ClusterSourceConfig::new(URL)
            .with_filter(pinmap_core::FilterPredicate::from_ids(Some(ids)));
        map.add_source("users", &config).unwrap();
        assert_eq!(map.source_points("users"), vec![UserId(2), UserId(4)]);
    }

    #[test]
    fn dispatch_skips_missing_layers_and_counts_handlers() {
        let map = HeadlessMap::new();
        let hits = Rc::new(Cell::new(0));
        let seen = Rc::clone(&hits);
        map.on(
            "users-clusters",
            EventKind::Click,
            Rc::new(move |_: &ClickEvent| seen.set(seen.get() + 1)),
        );
        assert_eq!(map.click("users-clusters", Vec::new()), 0);
        assert_eq!(map.dangling_bindings().len(), 1);

        map.add_source("users", &ClusterSourceConfig::new(URL)).unwrap();
        map.add_layer(layers().get(LayerRole::Cluster)).unwrap();
        assert_eq!(map.click("users-clusters", Vec::new()), 1);
        assert_eq!(hits.get(), 1);
        assert!(map.dangling_bindings().is_empty());
    }

    #[test]
    fn off_requires_matching_binding() {
        let map = HeadlessMap::new();
        let id = map.on("a", EventKind::Click, Rc::new(|_: &ClickEvent| {}));
        assert_eq!(
            map.off("a", EventKind::MouseEnter, id),
            Err(EngineError::UnknownHandler(id))
        );
        map.off("a", EventKind::Click, id).unwrap();
        assert!(map.bindings().is_empty());
    }

    #[test]
    fn deferred_loads_resolve_on_completion() {
        let map = HeadlessMap::new();
        map.defer_image_loads();
        map.fail_image("bad.png");
        let good = map.load_image("good.png");
        let bad = map.load_image("bad.png");
        assert_eq!(map.pending_image_loads(), 2);
        assert_eq!(map.complete_image_loads(), 2);
        assert!(block_on(good).is_ok());
        assert!(matches!(block_on(bad), Err(EngineError::ImageLoad { .. })));
    }

    #[test]
    fn serve_geojson_counts_usable_points() {
        let map = HeadlessMap::new();
        let doc = serde_json::json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "geometry": {"type": "Point", "coordinates": [1.0, 2.0]},
                    "properties": {"id": 10}
                },
                {
                    "type": "Feature",
                    "geometry": {"type": "Point", "coordinates": [1.0, 2.0]},
                    "properties": {"name": "no id"}
                }
            ]
        });
        assert_eq!(map.serve_geojson(URL, doc).unwrap(), 1);
    }

    #[test]
    fn feature_state_requires_source_and_shows_in_render() {
        let map = HeadlessMap::new();
        let state = FeatureState { selected: true };
        assert!(map.set_feature_state("users", UserId(1), state).is_err());

        map.serve(URL, vec![(UserId(1), LngLat::new(0.0, 0.0))]);
        map.add_source("users", &ClusterSourceConfig::new(URL)).unwrap();
        let set = layers();
        for layer in set.install_order() {
            map.add_layer(layer).unwrap();
        }
        map.set_feature_state("users", UserId(1), state).unwrap();
        let rendered = map.rendered_features(set.id_of(LayerRole::UnclusteredPoint));
        assert_eq!(rendered.len(), 1);
        assert!(rendered[0].state.selected);
        assert!(map.rendered_features(set.id_of(LayerRole::Cluster)).is_empty());
    }
}
