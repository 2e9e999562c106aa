//! The narrow surface the pin and polygon managers use to mutate the map.
//!
//! Everything the managers need from the third-party map library goes
//! through [`MapSdk`]. Overlays are referred to by opaque handles that the
//! implementation hands out, so the managers never touch SDK objects directly
//! and a recording double can stand in for the browser in tests.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SdkError {
    #[error("map SDK rejected {operation}: {reason}")]
    Rejected {
        operation: &'static str,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Finite and inside the WGS84 range.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelSize {
    pub width: f64,
    pub height: f64,
}

impl PixelSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

impl ScreenPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

macro_rules! handle_type {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);
    };
}

handle_type!(MapHandle);
handle_type!(MarkerHandle);
handle_type!(PolygonHandle);
handle_type!(ListenerHandle);

/// An overlay that can carry event listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverlayRef {
    Marker(MarkerHandle),
    Polygon(PolygonHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapEventKind {
    Click,
    MouseOver,
    MouseOut,
    MouseMove,
}

impl MapEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MapEventKind::Click => "click",
            MapEventKind::MouseOver => "mouseover",
            MapEventKind::MouseOut => "mouseout",
            MapEventKind::MouseMove => "mousemove",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "click" => Some(MapEventKind::Click),
            "mouseover" => Some(MapEventKind::MouseOver),
            "mouseout" => Some(MapEventKind::MouseOut),
            "mousemove" => Some(MapEventKind::MouseMove),
            _ => None,
        }
    }
}

/// An SDK callback forwarded back into the core. `point` is the cursor in
/// client coordinates when the SDK reports one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayEvent {
    pub target: OverlayRef,
    pub kind: MapEventKind,
    pub point: Option<ScreenPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapOptions {
    pub center: LatLng,
    pub zoom: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerOptions {
    pub position: LatLng,
    pub image_url: String,
    pub size: PixelSize,
    /// Pixel offset of the coordinate inside the image.
    pub offset: ScreenPoint,
    pub title: String,
    pub z_index: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolygonStyle {
    pub fill_color: String,
    pub fill_opacity: f64,
    pub stroke_color: String,
    pub stroke_opacity: f64,
    pub stroke_weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolygonOptions {
    /// Vertices in SDK order: latitude first.
    pub path: Vec<LatLng>,
    pub style: PolygonStyle,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bounds {
    pub south_west: LatLng,
    pub north_east: LatLng,
}

/// Imperative operations on a live map instance.
///
/// Implementations own the SDK objects behind each handle. Removing a handle
/// that is already gone must be a no-op.
pub trait MapSdk {
    fn create_map(&mut self, container: &str, options: &MapOptions) -> Result<MapHandle, SdkError>;
    fn destroy_map(&mut self, map: MapHandle);
    fn set_center(&mut self, map: MapHandle, center: LatLng);
    fn set_zoom(&mut self, map: MapHandle, zoom: u8);
    fn fit_bounds(&mut self, map: MapHandle, bounds: &Bounds);

    fn create_marker(
        &mut self,
        map: MapHandle,
        options: &MarkerOptions,
    ) -> Result<MarkerHandle, SdkError>;
    fn remove_marker(&mut self, marker: MarkerHandle);

    fn create_polygon(
        &mut self,
        map: MapHandle,
        options: &PolygonOptions,
    ) -> Result<PolygonHandle, SdkError>;
    fn remove_polygon(&mut self, polygon: PolygonHandle);
    fn set_polygon_style(&mut self, polygon: PolygonHandle, style: &PolygonStyle);

    fn open_info_window(&mut self, map: MapHandle, anchor: MarkerHandle, html: &str);
    fn close_info_window(&mut self);

    /// Registers interest in `kind` on `target`; the host forwards matching
    /// callbacks as [`OverlayEvent`]s.
    fn add_listener(&mut self, target: OverlayRef, kind: MapEventKind) -> ListenerHandle;
    fn remove_listener(&mut self, listener: ListenerHandle);
}
