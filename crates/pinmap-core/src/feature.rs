#![forbid(unsafe_code)]

//! Rendered features, click events, and the user feature collection.
//!
//! Features are owned by the rendering engine. This crate only reads the
//! properties handed over in events, so every accessor is tolerant of
//! missing or mistyped properties and returns `None` instead of failing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::engine::FeatureState;
use crate::geometry::{LngLat, ScreenPoint};
use crate::id::UserId;

/// Identifier the clustering source assigns to an aggregated cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(pub u64);

/// A feature as reported by the engine under the cursor.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderedFeature {
    /// Promoted id, present for individual user points.
    pub id: Option<UserId>,
    pub geometry: LngLat,
    pub properties: Map<String, Value>,
    pub state: FeatureState,
}

impl RenderedFeature {
    /// A user pin.
    #[must_use]
    pub fn point(id: UserId, geometry: LngLat) -> Self {
        let mut properties = Map::new();
        properties.insert("id".to_string(), Value::from(id.get()));
        Self {
            id: Some(id),
            geometry,
            properties,
            state: FeatureState::default(),
        }
    }

    /// An aggregated cluster of `point_count` users.
    #[must_use]
    pub fn cluster(cluster_id: ClusterId, point_count: u32, geometry: LngLat) -> Self {
        let mut properties = Map::new();
        properties.insert("cluster".to_string(), Value::Bool(true));
        properties.insert("cluster_id".to_string(), Value::from(cluster_id.0));
        properties.insert("point_count".to_string(), Value::from(point_count));
        properties.insert(
            "point_count_abbreviated".to_string(),
            Value::String(abbreviate_count(point_count)),
        );
        Self {
            id: None,
            geometry,
            properties,
            state: FeatureState::default(),
        }
    }

    /// `cluster_id` property, if present and numeric.
    #[must_use]
    pub fn cluster_id(&self) -> Option<ClusterId> {
        self.properties
            .get("cluster_id")
            .and_then(Value::as_u64)
            .map(ClusterId)
    }

    /// `point_count` property, if present and numeric.
    #[must_use]
    pub fn point_count(&self) -> Option<u32> {
        self.properties
            .get("point_count")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
    }

    #[must_use]
    pub fn is_cluster(&self) -> bool {
        self.properties.contains_key("point_count")
    }

    /// Promoted id, falling back to the raw `id` property.
    #[must_use]
    pub fn user_id(&self) -> Option<UserId> {
        self.id.or_else(|| {
            self.properties
                .get("id")
                .and_then(Value::as_i64)
                .map(UserId)
        })
    }
}

/// Abbreviated count label (`1234` → `1.2k`), matching the style token
/// `{point_count_abbreviated}`.
#[must_use]
pub fn abbreviate_count(count: u32) -> String {
    match count {
        0..=999 => count.to_string(),
        1_000..=9_999 => {
            let tenths = (count + 50) / 100;
            if tenths % 10 == 0 {
                format!("{}k", tenths / 10)
            } else {
                format!("{}.{}k", tenths / 10, tenths % 10)
            }
        }
        _ => format!("{}k", (count + 500) / 1_000),
    }
}

/// A pointer event delivered to a layer handler.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClickEvent {
    pub point: ScreenPoint,
    pub lng_lat: LngLat,
    /// Features under the cursor on the handler's layer, topmost first.
    pub features: Vec<RenderedFeature>,
}

impl ClickEvent {
    /// Event over the given features, positioned on the first one.
    #[must_use]
    pub fn on_features(features: Vec<RenderedFeature>) -> Self {
        let lng_lat = features.first().map(|f| f.geometry).unwrap_or_default();
        Self {
            point: ScreenPoint::default(),
            lng_lat,
            features,
        }
    }

    /// Event over empty background.
    #[must_use]
    pub fn empty(lng_lat: LngLat) -> Self {
        Self {
            point: ScreenPoint::default(),
            lng_lat,
            features: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// GeoJSON users endpoint
// ---------------------------------------------------------------------------

/// The `/geojson/users` feature collection.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UserFeatureCollection {
    #[serde(default)]
    pub features: Vec<UserFeature>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserFeature {
    #[serde(default)]
    pub geometry: Option<PointGeometry>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PointGeometry {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub coordinates: Vec<f64>,
}

impl UserFeatureCollection {
    /// Parse a feature collection from JSON text.
    ///
    /// # Errors
    ///
    /// Returns the parse error when `text` is not a feature collection.
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Parse a feature collection from an already-decoded document.
    ///
    /// # Errors
    ///
    /// Returns the conversion error when `value` is not a feature collection.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// `(id, position)` of every usable point. Features without a numeric
    /// `id` or without a Point geometry are skipped.
    #[must_use]
    pub fn points(&self) -> Vec<(UserId, LngLat)> {
        self.features
            .iter()
            .filter_map(|feature| {
                let id = feature.properties.get("id").and_then(Value::as_i64)?;
                let geometry = feature.geometry.as_ref()?;
                if geometry.kind != "Point" {
                    return None;
                }
                let position = LngLat::from_position(&geometry.coordinates)?;
                Some((UserId(id), position))
            })
            .collect()
    }
}
