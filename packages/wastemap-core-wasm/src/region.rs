use async_trait::async_trait;
use log::warn;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::geometry::Ring;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegionError {
    #[error("no collection region is defined for category '{0}'")]
    NoRegionDefined(String),
    #[error("none of the {total} regions could be drawn")]
    RenderFailed { total: usize },
    #[error("failed to load regions: {0}")]
    FetchFailed(String),
}

impl RegionError {
    /// Message shown to the operator in the map overlay.
    pub fn user_message(&self) -> String {
        match self {
            RegionError::NoRegionDefined(category) => {
                format!("'{}' 카테고리에 지정된 수거 구역이 없습니다.", category)
            }
            RegionError::RenderFailed { total } => {
                format!("구역 {}개를 지도에 표시하지 못했습니다. 구역 데이터를 확인해 주세요.", total)
            }
            RegionError::FetchFailed(_) => "구역 정보를 불러오지 못했습니다.".to_string(),
        }
    }
}

/// Loads the region features for one waste category.
#[async_trait(?Send)]
pub trait PolygonProvider {
    async fn fetch_polygons(&self, category: &str) -> Result<RegionResponse, RegionError>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegionResponse {
    pub region_areas: RegionAreas,
}

impl RegionResponse {
    pub fn from_json(input: &str) -> Result<Self, RegionError> {
        serde_json::from_str(input).map_err(|e| RegionError::FetchFailed(e.to_string()))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegionAreas {
    #[serde(default)]
    pub features: Vec<RawFeature>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FeatureId {
    Number(i64),
    Text(String),
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureId::Number(n) => write!(f, "{}", n),
            FeatureId::Text(s) => f.write_str(s),
        }
    }
}

/// A feature as the region service sends it; nothing here is trusted yet.
#[derive(Debug, Clone, Deserialize)]
pub struct RawFeature {
    #[serde(default)]
    pub id: Option<FeatureId>,
    #[serde(default)]
    pub team: Option<Value>,
    #[serde(default)]
    pub truck: Option<Value>,
    #[serde(default)]
    pub geometry: Option<RawGeometry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawGeometry {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub coordinates: Value,
}

/// A region whose boundary passed validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolygonFeature {
    pub id: String,
    pub team: Option<Value>,
    pub truck: Option<Value>,
    #[serde(rename = "coordinates", serialize_with = "serialize_ring")]
    pub ring: Ring,
}

impl PolygonFeature {
    pub fn team_name(&self) -> Option<String> {
        self.team.as_ref().and_then(descriptor_name)
    }

    pub fn truck_name(&self) -> Option<String> {
        self.truck.as_ref().and_then(descriptor_name)
    }
}

/// The validated regions of one category.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionData {
    pub category: String,
    pub features: Vec<PolygonFeature>,
}

/// Validates every feature, logging and skipping the ones whose geometry is
/// unusable.
pub fn validate_features(features: Vec<RawFeature>) -> Vec<PolygonFeature> {
    features
        .into_iter()
        .enumerate()
        .filter_map(|(index, raw)| {
            let id = raw
                .id
                .map(|id| id.to_string())
                .unwrap_or_else(|| format!("feature-{}", index));
            let Some(geometry) = raw.geometry else {
                warn!("region {} has no geometry; skipped", id);
                return None;
            };
            match Ring::from_coordinates(&geometry.coordinates) {
                Ok(ring) => Some(PolygonFeature {
                    id,
                    team: raw.team,
                    truck: raw.truck,
                    ring,
                }),
                Err(e) => {
                    warn!(
                        "region {} ({}) skipped: {}",
                        id,
                        geometry.kind.as_deref().unwrap_or("untyped"),
                        e
                    );
                    None
                }
            }
        })
        .collect()
}

const NAME_KEYS: [&str; 5] = ["name", "team_nm", "truck_nm", "vehicle_no", "car_no"];

fn descriptor_name(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => NAME_KEYS
            .iter()
            .find_map(|key| map.get(*key))
            .and_then(descriptor_name),
        _ => None,
    }
}

fn serialize_ring<S: Serializer>(ring: &Ring, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(ring.line_string().coords().map(|c| [c.x, c.y]))
}
