#![forbid(unsafe_code)]

//! Runtime: lifecycle, interaction, and filtering for clustered user pins.
//!
//! # Role in pinmap
//! `pinmap-runtime` drives a [`pinmap_core::MapHandle`]. It installs the
//! clustered users source with its three layers, routes clicks and hovers,
//! registers the marker icon, and rebuilds everything when the visible user
//! set changes.
//!
//! # Primary responsibilities
//! - **Registry**: atomic install/uninstall with rollback ([`registry`]).
//! - **Router**: click/hover handlers and cluster expansion ([`router`]).
//! - **Icon**: race-tolerant marker registration ([`icon`]).
//! - **Rebuilder**: the filter cycle behind [`UserClusterMap`] ([`rebuild`]).
//! - **Results**: search result pages to filter sets ([`results`]).
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//!
//! use futures::executor::{LocalPool, block_on};
//! use pinmap_core::{IdSet, MapConfig, Spawner, UserId};
//! use pinmap_harness::HeadlessMap;
//! use pinmap_runtime::UserClusterMap;
//!
//! let map = Rc::new(HeadlessMap::new());
//! let pool = LocalPool::new();
//! let spawner: Spawner = Rc::new(pool.spawner());
//! let clusters = UserClusterMap::new(map.clone(), MapConfig::default(), spawner);
//!
//! let only: IdSet = [UserId(7), UserId(3)].iter().collect();
//! let icon = clusters.apply_filter(Some(only), None).unwrap();
//! block_on(icon).unwrap();
//! assert!(clusters.is_installed());
//! ```

pub mod error;
pub mod icon;
pub mod rebuild;
pub mod registry;
pub mod results;
pub mod router;

pub use error::{IconError, LifecycleError, MapError};
pub use icon::{IconOutcome, IconRegistration, IconSpec, ensure_icon_registered};
pub use rebuild::UserClusterMap;
pub use registry::{InstalledClusters, install};
pub use results::{ResultPage, SearchResult, UserSummary, extract_ids, id_set_from_pages};
pub use router::{
    Bindings, ExpansionOutcome, PointClickCallback, RouterOptions, bind, expand_cluster,
};
