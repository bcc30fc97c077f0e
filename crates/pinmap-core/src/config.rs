#![forbid(unsafe_code)]

//! Map configuration with JSON and environment loading.
//!
//! Defaults describe the production users map. `from_env` layers
//! `PINMAP_*` overrides on top; unparsable values are ignored with a
//! warning so a typo never takes the map down.
//!
//! | Variable | Field |
//! |----------|-------|
//! | `PINMAP_API_BASE_URL` | `api_base_url` |
//! | `PINMAP_SOURCE_ID` | `source_id` |
//! | `PINMAP_CLUSTER_MAX_ZOOM` | `cluster_max_zoom` |
//! | `PINMAP_CLUSTER_RADIUS` | `cluster_radius` |
//! | `PINMAP_ICON_URL` | `icon_url` |
//! | `PINMAP_POINTER_CURSOR` | `pointer_cursor` |
//! | `PINMAP_LIFECYCLE` | `lifecycle` (`strict` / `lenient`) |

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::style::{ClusterSourceConfig, FilterPredicate, LayerSet};

pub use crate::style::Palette;

/// Path of the users feature collection below the API base URL.
pub const USERS_GEOJSON_PATH: &str = "/geojson/users";

/// Highest zoom a style accepts.
pub const MAX_ZOOM: u8 = 24;

/// Errors from configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// How lifecycle violations (double install, missing source on uninstall)
/// are handled by the filter rebuilder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecyclePolicy {
    /// Return the violation to the caller.
    Strict,
    /// Log the violation and skip the step.
    Lenient,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Strict
        } else {
            Self::Lenient
        }
    }
}

impl FromStr for LifecyclePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "lenient" => Ok(Self::Lenient),
            other => Err(ConfigError::Invalid(format!(
                "unknown lifecycle policy '{other}'"
            ))),
        }
    }
}

/// Settings for the clustered users map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    pub api_base_url: String,
    pub source_id: String,
    pub cluster_max_zoom: u8,
    /// Cluster grouping radius in pixels.
    pub cluster_radius: u16,
    pub icon_id: String,
    pub icon_url: String,
    pub icon_pixel_ratio: f32,
    /// Switch to a pointer cursor over clickable layers.
    pub pointer_cursor: bool,
    pub lifecycle: LifecyclePolicy,
    pub palette: Palette,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8888".to_string(),
            source_id: "users".to_string(),
            cluster_max_zoom: 14,
            cluster_radius: 50,
            icon_id: "user-pin".to_string(),
            icon_url: "/img/user-pin-sdf.png".to_string(),
            icon_pixel_ratio: 2.0,
            pointer_cursor: true,
            lifecycle: LifecyclePolicy::default(),
            palette: Palette::default(),
        }
    }
}

#[inline]
fn env_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_override<T: FromStr>(key: &str, value: &str) -> Option<T> {
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(key, value, "ignoring unparsable config override");
            None
        }
    }
}

impl MapConfig {
    /// Defaults with `PINMAP_*` environment overrides applied.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Parse from JSON; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] on malformed JSON, [`ConfigError::Invalid`] if
    /// the result fails [`MapConfig::validate`].
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides looked up through `get_env`.
    #[must_use]
    pub fn with_env_overrides<F>(mut self, get_env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = get_env("PINMAP_API_BASE_URL") {
            self.api_base_url = url;
        }
        if let Some(id) = get_env("PINMAP_SOURCE_ID") {
            self.source_id = id;
        }
        if let Some(v) = get_env("PINMAP_CLUSTER_MAX_ZOOM")
            .and_then(|v| parse_override("PINMAP_CLUSTER_MAX_ZOOM", &v))
        {
            self.cluster_max_zoom = v;
        }
        if let Some(v) = get_env("PINMAP_CLUSTER_RADIUS")
            .and_then(|v| parse_override("PINMAP_CLUSTER_RADIUS", &v))
        {
            self.cluster_radius = v;
        }
        if let Some(url) = get_env("PINMAP_ICON_URL") {
            self.icon_url = url;
        }
        if let Some(raw) = get_env("PINMAP_POINTER_CURSOR") {
            match env_flag(&raw) {
                Some(flag) => self.pointer_cursor = flag,
                None => warn!(value = %raw, "ignoring unparsable PINMAP_POINTER_CURSOR"),
            }
        }
        if let Some(v) =
            get_env("PINMAP_LIFECYCLE").and_then(|v| parse_override("PINMAP_LIFECYCLE", &v))
        {
            self.lifecycle = v;
        }
        self
    }

    /// Check field ranges.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("api_base_url is empty".to_string()));
        }
        if self.source_id.trim().is_empty() {
            return Err(ConfigError::Invalid("source_id is empty".to_string()));
        }
        if self.icon_id.trim().is_empty() {
            return Err(ConfigError::Invalid("icon_id is empty".to_string()));
        }
        if self.cluster_radius == 0 {
            return Err(ConfigError::Invalid("cluster_radius must be > 0".to_string()));
        }
        if self.cluster_max_zoom > MAX_ZOOM {
            return Err(ConfigError::Invalid(format!(
                "cluster_max_zoom {} exceeds {MAX_ZOOM}",
                self.cluster_max_zoom
            )));
        }
        Ok(())
    }

    /// Feature collection endpoint.
    #[must_use]
    pub fn data_url(&self) -> String {
        format!(
            "{}{USERS_GEOJSON_PATH}",
            self.api_base_url.trim_end_matches('/')
        )
    }

    /// Fresh source config carrying `filter`.
    #[must_use]
    pub fn source_config(&self, filter: FilterPredicate) -> ClusterSourceConfig {
        ClusterSourceConfig {
            data_url: self.data_url(),
            cluster: true,
            cluster_max_zoom: self.cluster_max_zoom,
            cluster_radius: self.cluster_radius,
            promote_id: "id".to_string(),
            filter,
        }
    }

    /// Fresh layer set bound to `source_id`.
    #[must_use]
    pub fn layer_set(&self) -> LayerSet {
        LayerSet::for_source(&self.source_id, &self.icon_id, &self.palette)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn data_url_joins_path_once() {
        let config = MapConfig {
            api_base_url: "https://api.example.org/".to_string(),
            ..MapConfig::default()
        };
        assert_eq!(config.data_url(), "https://api.example.org/geojson/users");
    }

    #[test]
    fn env_overrides_apply() {
        let config = MapConfig::default().with_env_overrides(env(&[
            ("PINMAP_API_BASE_URL", "https://maps.test"),
            ("PINMAP_CLUSTER_RADIUS", "80"),
            ("PINMAP_CLUSTER_MAX_ZOOM", "12"),
            ("PINMAP_POINTER_CURSOR", "off"),
            ("PINMAP_LIFECYCLE", "Lenient"),
        ]));
        assert_eq!(config.api_base_url, "https://maps.test");
        assert_eq!(config.cluster_radius, 80);
        assert_eq!(config.cluster_max_zoom, 12);
        assert!(!config.pointer_cursor);
        assert_eq!(config.lifecycle, LifecyclePolicy::Lenient);
    }

    #[test]
    fn bad_env_values_are_ignored() {
        let config = MapConfig::default().with_env_overrides(env(&[
            ("PINMAP_CLUSTER_RADIUS", "wide"),
            ("PINMAP_POINTER_CURSOR", "maybe"),
            ("PINMAP_LIFECYCLE", "chaotic"),
        ]));
        let defaults = MapConfig::default();
        assert_eq!(config.cluster_radius, defaults.cluster_radius);
        assert_eq!(config.pointer_cursor, defaults.pointer_cursor);
        assert_eq!(config.lifecycle, defaults.lifecycle);
    }

    #[test]
    fn json_fills_defaults() {
        let config =
            MapConfig::from_json_str(r#"{"source_id": "members", "lifecycle": "strict"}"#)
                .expect("valid config");
        assert_eq!(config.source_id, "members");
        assert_eq!(config.lifecycle, LifecyclePolicy::Strict);
        assert_eq!(config.cluster_radius, 50);
        assert_eq!(config.layer_set().source(), "members");
    }

    #[test]
    fn json_validation_rejects_zero_radius() {
        let err = MapConfig::from_json_str(r#"{"cluster_radius": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = MapConfig::from_json_str("{").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn source_config_carries_filter() {
        let config = MapConfig::default();
        let source = config.source_config(FilterPredicate::All);
        assert_eq!(source.data_url, config.data_url());
        assert_eq!(source.cluster_radius, config.cluster_radius);
        assert!(!source.filter.is_restricted());
    }
}
