#![forbid(unsafe_code)]

//! Filter rebuilder: swap the visible user set by tearing down and
//! reinstalling the clustered source.
//!
//! # Design
//!
//! Cluster membership is computed by the engine when a source is added, so a
//! new filter cannot be patched into a live source. [`UserClusterMap::apply_filter`]
//! runs a full cycle instead:
//!
//! 1. cancel the previous icon registration,
//! 2. uninstall the previous installation (handlers, layers, source),
//! 3. install a fresh source carrying the new filter and its layers,
//! 4. bind the interaction handlers,
//! 5. start a new icon registration and hand it back to the caller.
//!
//! All state lives behind `RefCell`s whose borrows never span an engine call,
//! so the cycle can be triggered from inside a click callback.
//!
//! # Invariants
//!
//! 1. At most one installation exists per rebuilder; handler count per
//!    (layer, event) pair stays at most one across any number of cycles.
//! 2. Every installation's source filter is exactly the requested id set.
//! 3. A failed install leaves the map without the source (see
//!    [`crate::registry::install`]) and the rebuilder unmounted.
//!
//! # Failure Modes
//!
//! Lifecycle violations (double install, missing source on uninstall) follow
//! [`LifecyclePolicy`]: `Strict` returns them, `Lenient` logs them at `error`
//! and carries on.

use std::cell::RefCell;
use std::fmt;

use pinmap_core::config::{LifecyclePolicy, MapConfig};
use pinmap_core::engine::{FeatureState, MapHandle, Spawner};
use pinmap_core::id::{IdSet, UserId};
use pinmap_core::style::FilterPredicate;
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, error, info};

use crate::error::{LifecycleError, MapError};
use crate::icon::{IconOutcome, IconRegistration, IconSpec};
use crate::registry::{self, InstalledClusters};
use crate::results::{ResultPage, id_set_from_pages};
use crate::router::{self, PointClickCallback, RouterOptions};

/// Owner of the clustered users layers on one map.
pub struct UserClusterMap {
    map: MapHandle,
    config: MapConfig,
    spawner: Spawner,
    installed: RefCell<Option<InstalledClusters>>,
    filter: RefCell<FilterPredicate>,
    icon_cancel: RefCell<Option<CancellationToken>>,
}

impl fmt::Debug for UserClusterMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserClusterMap")
            .field("source_id", &self.config.source_id)
            .field("installed", &self.is_installed())
            .field("restricted", &self.filter.borrow().is_restricted())
            .finish_non_exhaustive()
    }
}

impl UserClusterMap {
    /// Nothing is installed until the first [`apply_filter`](Self::apply_filter).
    #[must_use]
    pub fn new(map: MapHandle, config: MapConfig, spawner: Spawner) -> Self {
        Self {
            map,
            config,
            spawner,
            installed: RefCell::new(None),
            filter: RefCell::new(FilterPredicate::All),
            icon_cancel: RefCell::new(None),
        }
    }

    #[must_use]
    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    #[must_use]
    pub fn map(&self) -> &MapHandle {
        &self.map
    }

    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.installed.borrow().is_some()
    }

    /// Filter of the current installation; `All` when unmounted.
    #[must_use]
    pub fn current_filter(&self) -> FilterPredicate {
        self.filter.borrow().clone()
    }

    /// Rebuild the layers so only `ids` are rendered, or every user when
    /// `ids` is `None`.
    ///
    /// The returned registration must be polled for the marker icon to load.
    /// It is cancelled by the next cycle or by [`unmount`](Self::unmount).
    ///
    /// # Errors
    ///
    /// - [`MapError::Lifecycle`] for partial installs and layer/source
    ///   mismatches, and for lifecycle violations under
    ///   [`LifecyclePolicy::Strict`].
    /// - [`MapError::Engine`] if the previous handlers could not be unbound
    ///   or the engine rejected any other step.
    ///
    /// On error the rebuilder is left unmounted with an `All` filter.
    pub fn apply_filter(
        &self,
        ids: Option<IdSet>,
        on_point_click: Option<PointClickCallback>,
    ) -> Result<IconRegistration, MapError> {
        let filter = FilterPredicate::from_ids(ids);
        let _span = debug_span!(
            "apply_filter",
            source_id = %self.config.source_id,
            restricted = filter.is_restricted(),
            ids = filter.members().map_or(0, IdSet::len)
        )
        .entered();

        self.cancel_icon();
        self.teardown()?;

        let source = self.config.source_config(filter.clone());
        let layers = self.config.layer_set();
        let mut installed =
            match registry::install(self.map.as_ref(), &self.config.source_id, &source, &layers) {
                Ok(installed) => installed,
                Err(err) => {
                    self.violation(err)?;
                    // Lenient: a foreign source already occupies the id.
                    return Ok(IconRegistration::ready(IconOutcome::Superseded));
                }
            };

        let bindings = router::bind(
            &self.map,
            &installed,
            on_point_click,
            &self.spawner,
            RouterOptions {
                pointer_cursor: self.config.pointer_cursor,
            },
        );
        if let Err(err) = installed.attach(self.map.as_ref(), bindings) {
            let rollback = installed.uninstall(self.map.as_ref());
            debug!(?rollback, "uninstalled after failed attach");
            return Err(err.into());
        }

        *self.installed.borrow_mut() = Some(installed);
        *self.filter.borrow_mut() = filter;

        let cancel = CancellationToken::new();
        *self.icon_cancel.borrow_mut() = Some(cancel.clone());
        info!("user clusters rebuilt");
        Ok(IconRegistration::new(
            self.map.clone(),
            IconSpec::from_config(&self.config),
            cancel,
        ))
    }

    /// Rebuild for the users found across `pages`.
    ///
    /// # Errors
    ///
    /// As [`apply_filter`](Self::apply_filter).
    pub fn show_results<'a, I>(
        &self,
        pages: I,
        on_point_click: Option<PointClickCallback>,
    ) -> Result<IconRegistration, MapError>
    where
        I: IntoIterator<Item = &'a ResultPage>,
    {
        self.apply_filter(Some(id_set_from_pages(pages)), on_point_click)
    }

    /// Mark a user's pin as selected or not.
    ///
    /// # Errors
    ///
    /// [`MapError::NotMounted`] without an installation, [`MapError::Engine`]
    /// if the engine rejects the update.
    pub fn set_selected(&self, user: UserId, selected: bool) -> Result<(), MapError> {
        let source_id = match self.installed.borrow().as_ref() {
            Some(installed) => installed.source_id().to_string(),
            None => return Err(MapError::NotMounted),
        };
        self.map
            .set_feature_state(&source_id, user, FeatureState { selected })?;
        Ok(())
    }

    /// Remove handlers, layers, and the source, and stop any pending icon
    /// registration. Unmounting twice is a no-op.
    ///
    /// # Errors
    ///
    /// As the teardown step of [`apply_filter`](Self::apply_filter).
    pub fn unmount(&self) -> Result<(), MapError> {
        let _span = debug_span!("unmount", source_id = %self.config.source_id).entered();
        self.cancel_icon();
        self.teardown()
    }

    fn cancel_icon(&self) {
        if let Some(token) = self.icon_cancel.borrow_mut().take() {
            token.cancel();
        }
    }

    fn teardown(&self) -> Result<(), MapError> {
        let previous = self.installed.borrow_mut().take();
        *self.filter.borrow_mut() = FilterPredicate::All;
        match previous {
            None => Ok(()),
            Some(installed) => match installed.uninstall(self.map.as_ref()) {
                Ok(()) => Ok(()),
                Err(err) => self.violation(err),
            },
        }
    }

    fn violation(&self, err: LifecycleError) -> Result<(), MapError> {
        match err {
            err if err.is_violation() && self.config.lifecycle == LifecyclePolicy::Lenient => {
                error!(%err, "lifecycle violation ignored");
                Ok(())
            }
            LifecycleError::Engine(cause) => Err(MapError::Engine(cause)),
            err => Err(err.into()),
        }
    }
}
