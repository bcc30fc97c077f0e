#![forbid(unsafe_code)]

//! Interaction router: click and hover handlers for the clustered layers.
//!
//! # Design
//!
//! [`bind`] registers a fixed handler set against an installation and
//! returns the engine's [`HandlerId`]s wrapped in [`Bindings`]. Unbinding
//! consumes that value, so each registration is removed exactly once and
//! with the same identity it was registered under.
//!
//! Handlers hold a `Weak` engine handle: a map dropped by its owner simply
//! stops reacting. Cluster clicks start an expansion query on the
//! [`Spawner`]; the resulting camera move is skipped if the installation was
//! torn down while the query was in flight.
//!
//! # Invariants
//!
//! 1. At most one handler per (layer, event) pair per `Bindings`.
//! 2. A point click with no feature, or a feature without a user id, never
//!    reaches the callback.
//! 3. A cluster click with no `cluster_id` issues no expansion query.
//!
//! # Failure Modes
//!
//! - Expansion queries that fail are logged at `debug` and ignored.
//! - A spawner that refuses work logs a warning; the click is dropped.

use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};

use futures::future::{Either, select};
use futures::pin_mut;
use futures::task::LocalSpawnExt;
use pinmap_core::engine::{
    CameraTarget, Cursor, EngineError, EventHandler, EventKind, HandlerId, MapEngine, MapHandle,
    Spawner,
};
use pinmap_core::feature::{ClickEvent, RenderedFeature};
use pinmap_core::id::UserId;
use pinmap_core::style::LayerRole;
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, trace, warn};

use crate::registry::InstalledClusters;

/// Callback receiving the id of a clicked user pin.
pub type PointClickCallback = Rc<dyn Fn(UserId)>;

/// Router knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterOptions {
    /// Show a pointer cursor while hovering clickable layers.
    pub pointer_cursor: bool,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            pointer_cursor: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct BoundHandler {
    layer: String,
    kind: EventKind,
    id: HandlerId,
}

/// Handlers registered by one [`bind`] call.
#[must_use = "dropping Bindings leaves handlers registered; call `unbind`"]
#[derive(Debug, PartialEq, Eq)]
pub struct Bindings {
    handlers: Vec<BoundHandler>,
}

impl Bindings {
    pub(crate) fn from_handlers(handlers: Vec<(String, EventKind, HandlerId)>) -> Self {
        Self {
            handlers: handlers
                .into_iter()
                .map(|(layer, kind, id)| BoundHandler { layer, kind, id })
                .collect(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered (layer, event) pairs, in registration order.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, EventKind)> + '_ {
        self.handlers.iter().map(|h| (h.layer.as_str(), h.kind))
    }

    #[must_use]
    pub fn contains(&self, layer_id: &str, kind: EventKind) -> bool {
        self.pairs().any(|(l, k)| l == layer_id && k == kind)
    }

    /// Unregister every handler, newest first. All handlers are attempted;
    /// the first failure is returned.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownHandler`] if the engine no longer knows one of
    /// the ids.
    pub fn unbind(self, map: &dyn MapEngine) -> Result<(), EngineError> {
        let _span = debug_span!("unbind", handlers = self.handlers.len()).entered();
        let mut first_err = None;
        for handler in self.handlers.into_iter().rev() {
            if let Err(err) = map.off(&handler.layer, handler.kind, handler.id) {
                warn!(layer = %handler.layer, kind = %handler.kind, %err, "unbind failed");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl fmt::Display for Bindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (layer, kind)) in self.pairs().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{layer}:{kind}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Binding
// ---------------------------------------------------------------------------

/// Register the interaction handlers for `installed`.
///
/// - Cluster layer click: ease to the cluster's expansion zoom.
/// - Point layer click: `on_point_click(user_id)` when a callback is given.
/// - Hover on either clickable layer: pointer cursor, if enabled.
pub fn bind(
    map: &MapHandle,
    installed: &InstalledClusters,
    on_point_click: Option<PointClickCallback>,
    spawner: &Spawner,
    options: RouterOptions,
) -> Bindings {
    let cluster_layer = installed.layer_id(LayerRole::Cluster);
    let point_layer = installed.layer_id(LayerRole::UnclusteredPoint);
    let _span = debug_span!(
        "bind",
        cluster_layer,
        point_layer,
        point_callback = on_point_click.is_some(),
        pointer_cursor = options.pointer_cursor
    )
    .entered();

    let weak = Rc::downgrade(map);
    let mut handlers = Vec::with_capacity(6);
    let mut register = |layer: &str, kind: EventKind, handler: EventHandler| {
        let id = map.on(layer, kind, handler);
        handlers.push((layer.to_string(), kind, id));
    };

    register(
        cluster_layer,
        EventKind::Click,
        cluster_click_handler(
            weak.clone(),
            installed.source_id().to_string(),
            Rc::clone(spawner),
            installed.teardown_token(),
        ),
    );
    if let Some(callback) = on_point_click {
        register(point_layer, EventKind::Click, point_click_handler(callback));
    }
    if options.pointer_cursor {
        for layer in [cluster_layer, point_layer] {
            register(layer, EventKind::MouseEnter, cursor_handler(weak.clone(), Cursor::Pointer));
            register(layer, EventKind::MouseLeave, cursor_handler(weak.clone(), Cursor::Default));
        }
    }

    let bindings = Bindings::from_handlers(handlers);
    debug!(%bindings, "handlers bound");
    bindings
}

fn point_click_handler(callback: PointClickCallback) -> EventHandler {
    Rc::new(move |event: &ClickEvent| {
        let Some(id) = event.features.first().and_then(RenderedFeature::user_id) else {
            trace!("point click without a user feature");
            return;
        };
        debug!(user = %id, "user pin clicked");
        callback(id);
    })
}

fn cursor_handler(map: Weak<dyn MapEngine>, cursor: Cursor) -> EventHandler {
    Rc::new(move |_: &ClickEvent| {
        if let Some(map) = map.upgrade() {
            map.set_cursor(cursor);
        }
    })
}

fn cluster_click_handler(
    map: Weak<dyn MapEngine>,
    source_id: String,
    spawner: Spawner,
    teardown: CancellationToken,
) -> EventHandler {
    Rc::new(move |event: &ClickEvent| {
        let Some(map) = map.upgrade() else {
            return;
        };
        let Some(expansion) = expand_cluster(&map, &source_id, event, teardown.clone()) else {
            trace!("cluster click without a cluster feature");
            return;
        };
        if let Err(err) = spawner.spawn_local(async move {
            expansion.await;
        }) {
            warn!(%err, "could not spawn cluster expansion");
        }
    })
}

// ---------------------------------------------------------------------------
// Cluster expansion
// ---------------------------------------------------------------------------

/// How a cluster expansion ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExpansionOutcome {
    /// The camera was eased to the target.
    Eased(CameraTarget),
    /// The engine could not answer the query.
    QueryFailed,
    /// The installation was torn down before the answer arrived.
    Superseded,
}

/// Start an expansion query for the first feature of `event`.
///
/// Returns `None`, without touching the engine, if that feature carries no
/// `cluster_id`. The returned future eases the camera to the cluster's
/// geometry at the expansion zoom unless `teardown` fires first.
pub fn expand_cluster(
    map: &MapHandle,
    source_id: &str,
    event: &ClickEvent,
    teardown: CancellationToken,
) -> Option<impl Future<Output = ExpansionOutcome> + 'static> {
    let feature = event.features.first()?;
    let cluster = feature.cluster_id()?;
    let center = feature.geometry;
    let query = map.cluster_expansion_zoom(source_id, cluster);
    let map = Rc::clone(map);
    debug!(?cluster, "expanding cluster");

    Some(async move {
        let zoom = {
            let cancelled = teardown.cancelled();
            pin_mut!(cancelled);
            match select(query, cancelled).await {
                Either::Left((Ok(zoom), _)) => zoom,
                Either::Left((Err(err), _)) => {
                    debug!(%err, ?cluster, "cluster expansion query failed");
                    return ExpansionOutcome::QueryFailed;
                }
                Either::Right(_) => {
                    debug!(?cluster, "dropping expansion for torn-down layers");
                    return ExpansionOutcome::Superseded;
                }
            }
        };
        // The query may resolve on the same turn teardown happened.
        if teardown.is_cancelled() {
            return ExpansionOutcome::Superseded;
        }
        let target = CameraTarget { center, zoom };
        map.ease_to(target);
        ExpansionOutcome::Eased(target)
    })
}
