use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sdk::{LatLng, PixelSize, PolygonStyle};

#[derive(Debug, Error)]
#[error("invalid map configuration: {0}")]
pub struct ConfigError(#[from] serde_json::Error);

/// Marker image sizing. The anchor is the pixel inside the image that sits on
/// the coordinate, measured from the top-left corner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerSize {
    pub size: PixelSize,
    pub anchor_x: f64,
    pub anchor_y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PinStyle {
    pub icon_base_path: String,
    pub normal: MarkerSize,
    pub selected: MarkerSize,
}

impl Default for PinStyle {
    fn default() -> Self {
        Self {
            icon_base_path: "/images/markers".to_string(),
            normal: MarkerSize {
                size: PixelSize::new(32.0, 40.0),
                anchor_x: 16.0,
                anchor_y: 40.0,
            },
            selected: MarkerSize {
                size: PixelSize::new(48.0, 60.0),
                anchor_x: 24.0,
                anchor_y: 60.0,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RegionStyle {
    pub normal: PolygonStyle,
    pub hover: PolygonStyle,
}

impl Default for RegionStyle {
    fn default() -> Self {
        Self {
            normal: PolygonStyle {
                fill_color: "#4C9AFF".to_string(),
                fill_opacity: 0.2,
                stroke_color: "#0052CC".to_string(),
                stroke_opacity: 0.8,
                stroke_weight: 2.0,
            },
            hover: PolygonStyle {
                fill_color: "#FF8B00".to_string(),
                fill_opacity: 0.45,
                stroke_color: "#0052CC".to_string(),
                stroke_opacity: 0.8,
                stroke_weight: 2.0,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MapConfig {
    pub center: LatLng,
    pub zoom: u8,
    pub pins: PinStyle,
    pub regions: RegionStyle,
    /// Gap in pixels between the cursor and the tooltip's top-left corner.
    pub tooltip_offset: f64,
    /// Addresses remembered across passes; 0 disables cross-pass memoization.
    pub geocode_cache_capacity: usize,
    pub fit_to_regions: bool,
    pub log_level: String,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            // Seoul City Hall
            center: LatLng::new(37.5665, 126.9780),
            zoom: 5,
            pins: PinStyle::default(),
            regions: RegionStyle::default(),
            tooltip_offset: 12.0,
            geocode_cache_capacity: 500,
            fit_to_regions: true,
            log_level: "info".to_string(),
        }
    }
}

impl MapConfig {
    /// Blank input yields the defaults; present keys override them.
    pub fn from_json(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(input)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_input_gives_defaults() {
        assert_eq!(MapConfig::from_json("  ").unwrap(), MapConfig::default());
    }

    #[test]
    fn partial_json_overrides_only_named_fields() {
        let config = MapConfig::from_json(
            r#"{"zoom": 7, "tooltipOffset": 4, "pins": {"iconBasePath": "/static/pins"}}"#,
        )
        .unwrap();
        assert_eq!(config.zoom, 7);
        assert_eq!(config.tooltip_offset, 4.0);
        assert_eq!(config.pins.icon_base_path, "/static/pins");
        assert_eq!(config.pins.selected, PinStyle::default().selected);
        assert_eq!(config.geocode_cache_capacity, 500);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(MapConfig::from_json("{zoom:").is_err());
    }
}
