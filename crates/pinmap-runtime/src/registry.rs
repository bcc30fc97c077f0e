#![forbid(unsafe_code)]

//! Layer/source registry: atomic install and uninstall of a clustered source
//! and its three layers.
//!
//! # Design
//!
//! [`install`] returns an [`InstalledClusters`] handle, and consuming that
//! handle through [`InstalledClusters::uninstall`] is the only way to take
//! the rendering state down again. Uninstall always unbinds attached event
//! handlers first, then removes layers in reverse paint order, then the
//! source, so the engine never sees a source removed under live layers or
//! handlers left on removed layers.
//!
//! # Invariants
//!
//! 1. Layers are added `[Cluster, ClusterCount, UnclusteredPoint]` and
//!    removed in the exact reverse.
//! 2. Partial installation is never left behind: a failing layer rolls back
//!    every layer added before it and the source.
//! 3. Installing over an existing source is refused with
//!    [`LifecycleError::AlreadyInstalled`].
//! 4. Every installation owns a teardown token that is cancelled when it is
//!    uninstalled, so asynchronous work started on its behalf can stop.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | Double install | source already present | `AlreadyInstalled`, engine untouched |
//! | Layer rejected | engine refuses a layer | rollback, `PartialInstall` |
//! | Vanished source | removed behind our back | `NotInstalled`, remaining steps still run |

use pinmap_core::engine::{EngineError, MapEngine};
use pinmap_core::style::{ClusterSourceConfig, LayerRole, LayerSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, warn};

use crate::error::LifecycleError;
use crate::router::Bindings;

/// Live rendering state for one clustered source.
#[derive(Debug)]
#[must_use = "installed layers stay on the map until `uninstall` is called"]
pub struct InstalledClusters {
    source_id: String,
    /// Install order.
    layer_ids: [String; 3],
    bindings: Option<Bindings>,
    teardown: CancellationToken,
}

/// Add `source` under `source_id`, then its layers in paint order.
///
/// # Errors
///
/// - [`LifecycleError::AlreadyInstalled`] if the source exists.
/// - [`LifecycleError::SourceMismatch`] if `layers` read from another source.
/// - [`LifecycleError::PartialInstall`] if a layer is rejected (after
///   rollback).
pub fn install(
    map: &dyn MapEngine,
    source_id: &str,
    source: &ClusterSourceConfig,
    layers: &LayerSet,
) -> Result<InstalledClusters, LifecycleError> {
    let _span = debug_span!(
        "install",
        source_id,
        restricted = source.filter.is_restricted()
    )
    .entered();

    if layers.source() != source_id {
        return Err(LifecycleError::SourceMismatch {
            expected: source_id.to_string(),
            found: layers.source().to_string(),
        });
    }
    if map.has_source(source_id) {
        return Err(LifecycleError::AlreadyInstalled(source_id.to_string()));
    }
    map.add_source(source_id, source).map_err(|err| match err {
        EngineError::SourceExists(id) => LifecycleError::AlreadyInstalled(id),
        other => LifecycleError::Engine(other),
    })?;

    let mut added: Vec<&str> = Vec::with_capacity(3);
    for layer in layers.install_order() {
        if let Err(cause) = map.add_layer(layer) {
            rollback(map, source_id, &added);
            return Err(LifecycleError::PartialInstall {
                source_id: source_id.to_string(),
                layer_id: layer.id().to_string(),
                cause,
            });
        }
        added.push(layer.id());
    }

    debug!(layers = ?added, "cluster layers installed");
    Ok(InstalledClusters {
        source_id: source_id.to_string(),
        layer_ids: [
            layers.id_of(LayerRole::Cluster).to_string(),
            layers.id_of(LayerRole::ClusterCount).to_string(),
            layers.id_of(LayerRole::UnclusteredPoint).to_string(),
        ],
        bindings: None,
        teardown: CancellationToken::new(),
    })
}

fn rollback(map: &dyn MapEngine, source_id: &str, added: &[&str]) {
    for layer_id in added.iter().rev() {
        if let Err(err) = map.remove_layer(layer_id) {
            warn!(layer_id, %err, "rollback could not remove layer");
        }
    }
    if let Err(err) = map.remove_source(source_id) {
        warn!(source_id, %err, "rollback could not remove source");
    }
}

impl InstalledClusters {
    #[must_use]
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Layer ids in install order.
    #[must_use]
    pub fn layer_ids(&self) -> [&str; 3] {
        [&self.layer_ids[0], &self.layer_ids[1], &self.layer_ids[2]]
    }

    #[must_use]
    pub fn layer_id(&self, role: LayerRole) -> &str {
        match role {
            LayerRole::Cluster => &self.layer_ids[0],
            LayerRole::ClusterCount => &self.layer_ids[1],
            LayerRole::UnclusteredPoint => &self.layer_ids[2],
        }
    }

    /// Handlers currently attached to this installation.
    #[must_use]
    pub fn bindings(&self) -> Option<&Bindings> {
        self.bindings.as_ref()
    }

    /// Token cancelled when this installation is uninstalled.
    #[must_use]
    pub fn teardown_token(&self) -> CancellationToken {
        self.teardown.clone()
    }

    /// Attach `bindings`, unbinding any previously attached set first so a
    /// (layer, event) pair never accumulates handlers.
    ///
    /// # Errors
    ///
    /// Propagates the engine error if the previous set fails to unbind; the
    /// new set is attached regardless.
    pub fn attach(&mut self, map: &dyn MapEngine, bindings: Bindings) -> Result<(), EngineError> {
        let previous = self.bindings.replace(bindings);
        match previous {
            Some(old) => old.unbind(map),
            None => Ok(()),
        }
    }

    /// Unbind and drop attached handlers, keeping layers installed.
    ///
    /// # Errors
    ///
    /// Propagates the first engine error from unbinding.
    pub fn detach(&mut self, map: &dyn MapEngine) -> Result<(), EngineError> {
        match self.bindings.take() {
            Some(bindings) => bindings.unbind(map),
            None => Ok(()),
        }
    }

    /// Tear down handlers, layers (reverse order), then the source.
    ///
    /// Every step runs even if an earlier one fails; the first failure is
    /// returned.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::NotInstalled`] if the source or a layer is already
    /// gone, [`LifecycleError::Engine`] for other engine failures.
    pub fn uninstall(mut self, map: &dyn MapEngine) -> Result<(), LifecycleError> {
        let _span = debug_span!("uninstall", source_id = %self.source_id).entered();
        self.teardown.cancel();

        let mut first_err: Option<LifecycleError> = None;
        if let Err(err) = self.detach(map) {
            first_err.get_or_insert(LifecycleError::Engine(err));
        }
        for layer_id in self.layer_ids.iter().rev() {
            if let Err(err) = map.remove_layer(layer_id) {
                first_err.get_or_insert(self.classify(err));
            }
        }
        if let Err(err) = map.remove_source(&self.source_id) {
            first_err.get_or_insert(self.classify(err));
        }

        match first_err {
            None => {
                debug!("cluster layers uninstalled");
                Ok(())
            }
            Some(err) => Err(err),
        }
    }

    fn classify(&self, err: EngineError) -> LifecycleError {
        match err {
            EngineError::MissingSource(_) | EngineError::MissingLayer(_) => {
                LifecycleError::NotInstalled(self.source_id.clone())
            }
            other => LifecycleError::Engine(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pinmap_core::config::MapConfig;
    use pinmap_core::engine::{EventKind, MapHandle};
    use pinmap_core::feature::ClickEvent;
    use pinmap_core::style::{FilterPredicate, LayerSpec};
    use pinmap_harness::{EngineOp, HeadlessMap};
    use std::rc::Rc;

    fn fixtures() -> (MapConfig, ClusterSourceConfig, LayerSet) {
        let config = MapConfig::default();
        let source = config.source_config(FilterPredicate::All);
        let layers = config.layer_set();
        (config, source, layers)
    }

    #[test]
    fn install_adds_source_then_layers_in_paint_order() {
        let map = HeadlessMap::new();
        let (config, source, layers) = fixtures();
        let installed = install(&map, &config.source_id, &source, &layers).unwrap();
        assert_eq!(
            map.ops(),
            vec![
                EngineOp::AddSource("users".into()),
                EngineOp::AddLayer("users-clusters".into()),
                EngineOp::AddLayer("users-cluster-count".into()),
                EngineOp::AddLayer("users-unclustered-points".into()),
            ]
        );
        assert_eq!(
            installed.layer_ids(),
            [
                "users-clusters",
                "users-cluster-count",
                "users-unclustered-points"
            ]
        );
        installed.uninstall(&map).unwrap();
    }

    #[test]
    fn uninstall_removes_layers_in_reverse_then_source() {
        let map = HeadlessMap::new();
        let (config, source, layers) = fixtures();
        let installed = install(&map, &config.source_id, &source, &layers).unwrap();
        map.clear_ops();
        installed.uninstall(&map).unwrap();
        assert_eq!(
            map.ops(),
            vec![
                EngineOp::RemoveLayer("users-unclustered-points".into()),
                EngineOp::RemoveLayer("users-cluster-count".into()),
                EngineOp::RemoveLayer("users-clusters".into()),
                EngineOp::RemoveSource("users".into()),
            ]
        );
        assert!(map.source_ids().is_empty());
        assert!(map.layer_ids().is_empty());
    }

    #[test]
    fn double_install_is_refused_without_touching_engine() {
        let map = HeadlessMap::new();
        let (config, source, layers) = fixtures();
        let installed = install(&map, &config.source_id, &source, &layers).unwrap();
        map.clear_ops();
        let err = install(&map, &config.source_id, &source, &layers).unwrap_err();
        assert_eq!(err, LifecycleError::AlreadyInstalled("users".into()));
        assert!(map.ops().is_empty());
        installed.uninstall(&map).unwrap();
    }

    #[test]
    fn reinstall_is_observably_identical() {
        let map = HeadlessMap::new();
        let (config, source, layers) = fixtures();
        let installed = install(&map, &config.source_id, &source, &layers).unwrap();
        let before_source = map.source("users");
        let before_layers: Vec<Option<LayerSpec>> =
            map.layer_ids().iter().map(|id| map.layer(id)).collect();

        installed.uninstall(&map).unwrap();
        let again = install(&map, &config.source_id, &source, &layers).unwrap();

        assert_eq!(map.source("users"), before_source);
        let after_layers: Vec<Option<LayerSpec>> =
            map.layer_ids().iter().map(|id| map.layer(id)).collect();
        assert_eq!(after_layers, before_layers);
        again.uninstall(&map).unwrap();
    }

    #[test]
    fn failing_layer_rolls_back_everything() {
        let map = HeadlessMap::new();
        let (config, source, layers) = fixtures();
        // Occupy the count layer id under a different source.
        let squatter = MapConfig {
            source_id: "squat".into(),
            ..MapConfig::default()
        };
        map.add_source("squat", &squatter.source_config(FilterPredicate::All))
            .unwrap();
        let mut blocking = squatter.layer_set().get(LayerRole::ClusterCount).clone();
        if let LayerSpec::ClusterCount(layer) = &mut blocking {
            layer.id = "users-cluster-count".into();
        }
        map.add_layer(&blocking).unwrap();
        map.clear_ops();

        let err = install(&map, &config.source_id, &source, &layers).unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::PartialInstall { ref layer_id, .. } if layer_id == "users-cluster-count"
        ));
        assert_eq!(
            map.ops(),
            vec![
                EngineOp::AddSource("users".into()),
                EngineOp::AddLayer("users-clusters".into()),
                EngineOp::RemoveLayer("users-clusters".into()),
                EngineOp::RemoveSource("users".into()),
            ]
        );
        assert_eq!(map.source_ids(), vec!["squat".to_string()]);
    }

    #[test]
    fn mismatched_layer_source_is_rejected() {
        let map = HeadlessMap::new();
        let (_, source, layers) = fixtures();
        let err = install(&map, "members", &source, &layers).unwrap_err();
        assert!(matches!(err, LifecycleError::SourceMismatch { .. }));
        assert!(map.source_ids().is_empty());
    }

    #[test]
    fn vanished_source_reports_not_installed_and_still_cleans_layers() {
        let map = HeadlessMap::new();
        let (config, source, layers) = fixtures();
        let installed = install(&map, &config.source_id, &source, &layers).unwrap();
        for id in layers.uninstall_order() {
            map.remove_layer(id.id()).unwrap();
        }
        map.remove_source("users").unwrap();
        let err = installed.uninstall(&map).unwrap_err();
        assert_eq!(err, LifecycleError::NotInstalled("users".into()));
    }

    #[test]
    fn uninstall_unbinds_before_removing_layers_and_cancels_teardown() {
        let map = Rc::new(HeadlessMap::new());
        let handle: MapHandle = map.clone();
        let (config, source, layers) = fixtures();
        let mut installed = install(handle.as_ref(), &config.source_id, &source, &layers).unwrap();
        let token = installed.teardown_token();
        let bindings = Bindings::from_handlers(vec![(
            installed.layer_id(LayerRole::Cluster).to_string(),
            EventKind::Click,
            handle.on(
                installed.layer_id(LayerRole::Cluster),
                EventKind::Click,
                Rc::new(|_: &ClickEvent| {}),
            ),
        )]);
        installed.attach(handle.as_ref(), bindings).unwrap();
        map.clear_ops();

        installed.uninstall(handle.as_ref()).unwrap();
        let ops = map.ops();
        assert_eq!(
            ops[0],
            EngineOp::Off {
                layer: "users-clusters".into(),
                kind: EventKind::Click
            }
        );
        assert!(token.is_cancelled());
        assert!(map.bindings().is_empty());
        assert!(map.dangling_bindings().is_empty());
    }
}
