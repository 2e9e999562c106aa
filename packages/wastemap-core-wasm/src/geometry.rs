//! Normalization of region coordinate payloads.
//!
//! The region service is inconsistent about GeoJSON nesting depth: a polygon
//! arrives either as a bare ring `[[lng, lat], ...]` or as a ring list
//! `[[[lng, lat], ...], ...]`. The shape is sniffed exactly once into
//! [`RingShape`] and every caller downstream only sees a validated [`Ring`].

use geo::BoundingRect;
use geo_types::{Coord, LineString};
use serde_json::Value;
use thiserror::Error;

use crate::sdk::{Bounds, LatLng};

pub const MIN_RING_POINTS: usize = 3;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeometryError {
    #[error("coordinates are neither a ring nor a list of rings")]
    UnrecognizedShape,
    #[error("coordinate {index} is not a [lng, lat] pair of finite numbers")]
    InvalidPair { index: usize },
    #[error("ring has {found} distinct points, at least {} required", MIN_RING_POINTS)]
    TooFewPoints { found: usize },
}

/// The two payload layouts the region service produces.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RingShape<'a> {
    Flat(&'a [Value]),
    Nested(&'a [Value]),
}

impl<'a> RingShape<'a> {
    pub fn sniff(coordinates: &'a Value) -> Result<Self, GeometryError> {
        let outer = coordinates.as_array().ok_or(GeometryError::UnrecognizedShape)?;
        let first = outer.first().ok_or(GeometryError::TooFewPoints { found: 0 })?;

        if as_pair(first).is_some() {
            return Ok(RingShape::Flat(outer));
        }
        match first.as_array() {
            Some(ring) if ring.first().and_then(as_pair).is_some() => Ok(RingShape::Nested(ring)),
            _ => Err(GeometryError::UnrecognizedShape),
        }
    }

    /// The candidate ring, before pair validation.
    pub fn ring(&self) -> &'a [Value] {
        match self {
            RingShape::Flat(ring) | RingShape::Nested(ring) => *ring,
        }
    }
}

/// A validated exterior ring; `x` is longitude and `y` latitude.
#[derive(Debug, Clone, PartialEq)]
pub struct Ring(LineString<f64>);

impl Ring {
    pub fn from_coordinates(coordinates: &Value) -> Result<Self, GeometryError> {
        let shape = RingShape::sniff(coordinates)?;
        Self::from_values(shape.ring())
    }

    fn from_values(values: &[Value]) -> Result<Self, GeometryError> {
        let coords = values
            .iter()
            .enumerate()
            .map(|(index, value)| {
                as_pair(value)
                    .map(|(x, y)| Coord { x, y })
                    .ok_or(GeometryError::InvalidPair { index })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let found = distinct_count(&coords);
        if found < MIN_RING_POINTS {
            return Err(GeometryError::TooFewPoints { found });
        }
        Ok(Ring(LineString::new(coords)))
    }

    pub fn line_string(&self) -> &LineString<f64> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0 .0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0 .0.is_empty()
    }

    /// Vertices converted to the map SDK's latitude-first order.
    pub fn to_path(&self) -> Vec<LatLng> {
        self.0.coords().map(|c| LatLng::new(c.y, c.x)).collect()
    }

    pub fn bounds(&self) -> Option<Bounds> {
        self.0.bounding_rect().map(|rect| Bounds {
            south_west: LatLng::new(rect.min().y, rect.min().x),
            north_east: LatLng::new(rect.max().y, rect.max().x),
        })
    }
}

/// Smallest box covering every ring.
pub fn union_bounds<'a, I>(rings: I) -> Option<Bounds>
where
    I: IntoIterator<Item = &'a Ring>,
{
    rings
        .into_iter()
        .filter_map(Ring::bounds)
        .reduce(|acc, b| Bounds {
            south_west: LatLng::new(
                acc.south_west.lat.min(b.south_west.lat),
                acc.south_west.lng.min(b.south_west.lng),
            ),
            north_east: LatLng::new(
                acc.north_east.lat.max(b.north_east.lat),
                acc.north_east.lng.max(b.north_east.lng),
            ),
        })
}

fn as_pair(value: &Value) -> Option<(f64, f64)> {
    match value.as_array()?.as_slice() {
        [x, y] => {
            let (x, y) = (x.as_f64()?, y.as_f64()?);
            (x.is_finite() && y.is_finite()).then_some((x, y))
        }
        _ => None,
    }
}

fn distinct_count(coords: &[Coord<f64>]) -> usize {
    let mut seen: Vec<(u64, u64)> = coords.iter().map(|c| (c.x.to_bits(), c.y.to_bits())).collect();
    seen.sort_unstable();
    seen.dedup();
    seen.len()
}
