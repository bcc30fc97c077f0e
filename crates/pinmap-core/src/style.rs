#![forbid(unsafe_code)]

//! Declarative source and layer specifications.
//!
//! Everything in this module is plain data. The runtime builds fresh values
//! for each install cycle and hands them to the engine; nothing here is
//! shared mutable state.
//!
//! # Invariants
//!
//! 1. A [`LayerSet`] always holds exactly one layer of each [`LayerRole`],
//!    all bound to the same source name.
//! 2. [`LayerSet::install_order`] is `[Cluster, ClusterCount, UnclusteredPoint]`
//!    and [`LayerSet::uninstall_order`] is its exact reverse.
//! 3. Cluster layers select features with `point_count`; the point layer
//!    selects features without it, so every feature paints in exactly one
//!    role.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::id::{IdSet, UserId};

// ---------------------------------------------------------------------------
// Filter predicate
// ---------------------------------------------------------------------------

/// Which features a clustered source admits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FilterPredicate {
    /// Render every feature.
    #[default]
    All,
    /// Render only features whose promoted id is in the set.
    Members(Arc<IdSet>),
}

impl FilterPredicate {
    /// Build a predicate from an optional ID set. `None` means no filter.
    #[must_use]
    pub fn from_ids(ids: Option<IdSet>) -> Self {
        match ids {
            None => Self::All,
            Some(set) => Self::Members(Arc::new(set)),
        }
    }

    /// Evaluate the predicate for a feature id.
    #[inline]
    #[must_use]
    pub fn matches(&self, id: UserId) -> bool {
        match self {
            Self::All => true,
            Self::Members(set) => set.contains(id),
        }
    }

    /// Whether a filter is present.
    #[must_use]
    pub fn is_restricted(&self) -> bool {
        matches!(self, Self::Members(_))
    }

    /// The member set, if restricted.
    #[must_use]
    pub fn members(&self) -> Option<&IdSet> {
        match self {
            Self::All => None,
            Self::Members(set) => Some(set),
        }
    }

    /// Style expression `["in", ["get", <prop>], ["literal", [...]]]`, or
    /// `None` when unrestricted.
    #[must_use]
    pub fn to_expression(&self, promote_id: &str) -> Option<Value> {
        let set = self.members()?;
        let literal: Vec<i64> = set.iter().map(UserId::get).collect();
        Some(json!(["in", ["get", promote_id], ["literal", literal]]))
    }
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// A clustered GeoJSON source.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSourceConfig {
    /// Endpoint serving the feature collection.
    pub data_url: String,
    /// Whether point clustering is enabled.
    pub cluster: bool,
    /// Highest zoom at which points are still clustered.
    pub cluster_max_zoom: u8,
    /// Grouping radius in pixels.
    pub cluster_radius: u16,
    /// Property promoted to feature identity.
    pub promote_id: String,
    pub filter: FilterPredicate,
}

impl ClusterSourceConfig {
    /// Clustered source for `data_url` with default clustering parameters and
    /// no filter.
    #[must_use]
    pub fn new(data_url: impl Into<String>) -> Self {
        Self {
            data_url: data_url.into(),
            cluster: true,
            cluster_max_zoom: 14,
            cluster_radius: 50,
            promote_id: "id".to_string(),
            filter: FilterPredicate::All,
        }
    }

    /// A copy of this config with `filter` replacing the current predicate.
    #[must_use]
    pub fn with_filter(&self, filter: FilterPredicate) -> Self {
        Self {
            filter,
            ..self.clone()
        }
    }

    /// Style document for the engine.
    #[must_use]
    pub fn to_style_json(&self) -> Value {
        let mut doc = json!({
            "type": "geojson",
            "data": self.data_url,
            "cluster": self.cluster,
            "clusterMaxZoom": self.cluster_max_zoom,
            "clusterRadius": self.cluster_radius,
            "promoteId": self.promote_id,
        });
        if let Some(expr) = self.filter.to_expression(&self.promote_id) {
            doc["filter"] = expr;
        }
        doc
    }
}

// ---------------------------------------------------------------------------
// Paint helpers
// ---------------------------------------------------------------------------

/// Step function over an integer input (`["step", input, base, t1, v1, ...]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepScale<T> {
    pub base: T,
    pub stops: Vec<(u32, T)>,
}

impl<T: Serialize> StepScale<T> {
    fn to_expression(&self, property: &str) -> Value {
        let mut expr = vec![json!("step"), json!(["get", property]), json!(self.base)];
        for (threshold, value) in &self.stops {
            expr.push(json!(threshold));
            expr.push(json!(value));
        }
        Value::Array(expr)
    }
}

/// Colours used by the cluster and point layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Palette {
    pub cluster_small: String,
    pub cluster_medium: String,
    pub cluster_large: String,
    pub pin: String,
    pub pin_selected: String,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            cluster_small: "#51bbd6".to_string(),
            cluster_medium: "#f1f075".to_string(),
            cluster_large: "#f28cb1".to_string(),
            pin: "#00a398".to_string(),
            pin_selected: "#e76f51".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Layers
// ---------------------------------------------------------------------------

/// Circle per cluster, coloured and sized by `point_count`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterLayer {
    pub id: String,
    pub source: String,
    pub color: StepScale<String>,
    pub radius: StepScale<f64>,
}

/// Abbreviated `point_count` label above each cluster circle.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterCountLayer {
    pub id: String,
    pub source: String,
    pub text_field: String,
    pub fonts: Vec<String>,
    pub text_size: f64,
}

/// Icon for an individual user, tinted by the `selected` feature-state.
#[derive(Debug, Clone, PartialEq)]
pub struct UnclusteredPointLayer {
    pub id: String,
    pub source: String,
    pub icon_image: String,
    pub icon_anchor: String,
    pub icon_size: f64,
    pub color: String,
    pub selected_color: String,
}

/// Which of the three cluster layers a spec is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerRole {
    Cluster,
    ClusterCount,
    UnclusteredPoint,
}

impl LayerRole {
    /// Whether features rendered by this role are clusters.
    #[must_use]
    pub const fn renders_clusters(self) -> bool {
        matches!(self, Self::Cluster | Self::ClusterCount)
    }
}

/// One of the three visual layers bound to a clustered source.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerSpec {
    Cluster(ClusterLayer),
    ClusterCount(ClusterCountLayer),
    UnclusteredPoint(UnclusteredPointLayer),
}

impl LayerSpec {
    /// Layer identity.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Cluster(l) => &l.id,
            Self::ClusterCount(l) => &l.id,
            Self::UnclusteredPoint(l) => &l.id,
        }
    }

    /// Name of the source this layer reads from.
    #[must_use]
    pub fn source(&self) -> &str {
        match self {
            Self::Cluster(l) => &l.source,
            Self::ClusterCount(l) => &l.source,
            Self::UnclusteredPoint(l) => &l.source,
        }
    }

    #[must_use]
    pub fn role(&self) -> LayerRole {
        match self {
            Self::Cluster(_) => LayerRole::Cluster,
            Self::ClusterCount(_) => LayerRole::ClusterCount,
            Self::UnclusteredPoint(_) => LayerRole::UnclusteredPoint,
        }
    }

    /// Style document for the engine.
    #[must_use]
    pub fn to_style_json(&self) -> Value {
        match self {
            Self::Cluster(l) => json!({
                "id": l.id,
                "type": "circle",
                "source": l.source,
                "filter": ["has", "point_count"],
                "paint": {
                    "circle-color": l.color.to_expression("point_count"),
                    "circle-radius": l.radius.to_expression("point_count"),
                },
            }),
            Self::ClusterCount(l) => json!({
                "id": l.id,
                "type": "symbol",
                "source": l.source,
                "filter": ["has", "point_count"],
                "layout": {
                    "text-field": l.text_field,
                    "text-font": l.fonts,
                    "text-size": l.text_size,
                },
            }),
            Self::UnclusteredPoint(l) => json!({
                "id": l.id,
                "type": "symbol",
                "source": l.source,
                "filter": ["!", ["has", "point_count"]],
                "layout": {
                    "icon-image": l.icon_image,
                    "icon-anchor": l.icon_anchor,
                    "icon-size": l.icon_size,
                    "icon-allow-overlap": true,
                },
                "paint": {
                    "icon-color": [
                        "case",
                        ["boolean", ["feature-state", "selected"], false],
                        l.selected_color,
                        l.color,
                    ],
                },
            }),
        }
    }
}

/// The three layers of a clustered source, in paint order.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSet {
    layers: [LayerSpec; 3],
}

impl LayerSet {
    /// Default layers for `source`, painting pins with `icon_id`.
    #[must_use]
    pub fn for_source(source: &str, icon_id: &str, palette: &Palette) -> Self {
        let cluster = ClusterLayer {
            id: format!("{source}-clusters"),
            source: source.to_string(),
            color: StepScale {
                base: palette.cluster_small.clone(),
                stops: vec![
                    (100, palette.cluster_medium.clone()),
                    (750, palette.cluster_large.clone()),
                ],
            },
            radius: StepScale {
                base: 20.0,
                stops: vec![(100, 30.0), (750, 40.0)],
            },
        };
        let count = ClusterCountLayer {
            id: format!("{source}-cluster-count"),
            source: source.to_string(),
            text_field: "{point_count_abbreviated}".to_string(),
            fonts: vec![
                "DIN Offc Pro Medium".to_string(),
                "Arial Unicode MS Bold".to_string(),
            ],
            text_size: 12.0,
        };
        let point = UnclusteredPointLayer {
            id: format!("{source}-unclustered-points"),
            source: source.to_string(),
            icon_image: icon_id.to_string(),
            icon_anchor: "bottom".to_string(),
            icon_size: 1.0,
            color: palette.pin.clone(),
            selected_color: palette.pin_selected.clone(),
        };
        Self {
            layers: [
                LayerSpec::Cluster(cluster),
                LayerSpec::ClusterCount(count),
                LayerSpec::UnclusteredPoint(point),
            ],
        }
    }

    /// Source all three layers read from.
    #[must_use]
    pub fn source(&self) -> &str {
        self.layers[0].source()
    }

    /// Layers in the order they must be added.
    #[must_use]
    pub fn install_order(&self) -> [&LayerSpec; 3] {
        [&self.layers[0], &self.layers[1], &self.layers[2]]
    }

    /// Layers in the order they must be removed.
    #[must_use]
    pub fn uninstall_order(&self) -> [&LayerSpec; 3] {
        [&self.layers[2], &self.layers[1], &self.layers[0]]
    }

    /// Layer filling `role`.
    #[must_use]
    pub fn get(&self, role: LayerRole) -> &LayerSpec {
        match role {
            LayerRole::Cluster => &self.layers[0],
            LayerRole::ClusterCount => &self.layers[1],
            LayerRole::UnclusteredPoint => &self.layers[2],
        }
    }

    /// Id of the layer filling `role`.
    #[must_use]
    pub fn id_of(&self, role: LayerRole) -> &str {
        self.get(role).id()
    }
}
