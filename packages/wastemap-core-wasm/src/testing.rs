//! Test doubles for the map SDK, the geocoder and the region service.

use async_trait::async_trait;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use crate::geocode::{GeocodeError, Geocoder};
use crate::pins::{Address, Record, RecordId, TeamAssignment};
use crate::region::{PolygonProvider, RegionError, RegionResponse};
use crate::sdk::*;

#[derive(Debug, Clone, PartialEq)]
pub enum SdkCall {
    CreateMap(MapOptions),
    DestroyMap(MapHandle),
    SetCenter(LatLng),
    SetZoom(u8),
    FitBounds(Bounds),
    CreateMarker(MarkerHandle, MarkerOptions),
    RemoveMarker(MarkerHandle),
    CreatePolygon(PolygonHandle, PolygonOptions),
    RemovePolygon(PolygonHandle),
    SetPolygonStyle(PolygonHandle, PolygonStyle),
    OpenInfoWindow(MarkerHandle, String),
    CloseInfoWindow,
    AddListener(ListenerHandle, OverlayRef, MapEventKind),
    RemoveListener(ListenerHandle),
}

/// Records every call and tracks which overlays are alive.
#[derive(Debug, Default)]
pub struct FakeSdk {
    calls: Vec<SdkCall>,
    next_id: u32,
    fail_map: bool,
    marker_failures: usize,
    polygon_failures: usize,
    markers: HashSet<MarkerHandle>,
    polygons: HashSet<PolygonHandle>,
    listeners: HashMap<ListenerHandle, (OverlayRef, MapEventKind)>,
}

impl FakeSdk {
    pub fn failing_map() -> Self {
        Self {
            fail_map: true,
            ..Self::default()
        }
    }

    /// Rejects the next `count` marker creations.
    pub fn failing_markers(count: usize) -> Self {
        Self {
            marker_failures: count,
            ..Self::default()
        }
    }

    /// Rejects the next `count` polygon creations.
    pub fn failing_polygons(count: usize) -> Self {
        Self {
            polygon_failures: count,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> &[SdkCall] {
        &self.calls
    }

    pub fn count(&self, predicate: impl Fn(&SdkCall) -> bool) -> usize {
        self.calls.iter().filter(|c| predicate(c)).count()
    }

    pub fn live_markers(&self) -> usize {
        self.markers.len()
    }

    pub fn live_polygons(&self) -> usize {
        self.polygons.len()
    }

    pub fn live_listeners(&self) -> usize {
        self.listeners.len()
    }

    pub fn listens(&self, target: OverlayRef, kind: MapEventKind) -> bool {
        self.listeners.values().any(|l| *l == (target, kind))
    }

    fn next(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }
}

fn rejected(operation: &'static str) -> SdkError {
    SdkError::Rejected {
        operation,
        reason: "rejected by test double".to_string(),
    }
}

impl MapSdk for FakeSdk {
    fn create_map(
        &mut self,
        _container: &str,
        options: &MapOptions,
    ) -> Result<MapHandle, SdkError> {
        if self.fail_map {
            return Err(rejected("create_map"));
        }
        self.calls.push(SdkCall::CreateMap(options.clone()));
        Ok(MapHandle(self.next()))
    }

    fn destroy_map(&mut self, map: MapHandle) {
        self.calls.push(SdkCall::DestroyMap(map));
    }

    fn set_center(&mut self, _map: MapHandle, center: LatLng) {
        self.calls.push(SdkCall::SetCenter(center));
    }

    fn set_zoom(&mut self, _map: MapHandle, zoom: u8) {
        self.calls.push(SdkCall::SetZoom(zoom));
    }

    fn fit_bounds(&mut self, _map: MapHandle, bounds: &Bounds) {
        self.calls.push(SdkCall::FitBounds(*bounds));
    }

    fn create_marker(
        &mut self,
        _map: MapHandle,
        options: &MarkerOptions,
    ) -> Result<MarkerHandle, SdkError> {
        if self.marker_failures > 0 {
            self.marker_failures -= 1;
            return Err(rejected("create_marker"));
        }
        let handle = MarkerHandle(self.next());
        self.markers.insert(handle);
        self.calls.push(SdkCall::CreateMarker(handle, options.clone()));
        Ok(handle)
    }

    fn remove_marker(&mut self, marker: MarkerHandle) {
        self.markers.remove(&marker);
        self.calls.push(SdkCall::RemoveMarker(marker));
    }

    fn create_polygon(
        &mut self,
        _map: MapHandle,
        options: &PolygonOptions,
    ) -> Result<PolygonHandle, SdkError> {
        if self.polygon_failures > 0 {
            self.polygon_failures -= 1;
            return Err(rejected("create_polygon"));
        }
        let handle = PolygonHandle(self.next());
        self.polygons.insert(handle);
        self.calls.push(SdkCall::CreatePolygon(handle, options.clone()));
        Ok(handle)
    }

    fn remove_polygon(&mut self, polygon: PolygonHandle) {
        self.polygons.remove(&polygon);
        self.calls.push(SdkCall::RemovePolygon(polygon));
    }

    fn set_polygon_style(&mut self, polygon: PolygonHandle, style: &PolygonStyle) {
        self.calls.push(SdkCall::SetPolygonStyle(polygon, style.clone()));
    }

    fn open_info_window(&mut self, _map: MapHandle, anchor: MarkerHandle, html: &str) {
        self.calls.push(SdkCall::OpenInfoWindow(anchor, html.to_string()));
    }

    fn close_info_window(&mut self) {
        self.calls.push(SdkCall::CloseInfoWindow);
    }

    fn add_listener(&mut self, target: OverlayRef, kind: MapEventKind) -> ListenerHandle {
        let handle = ListenerHandle(self.next());
        self.listeners.insert(handle, (target, kind));
        self.calls.push(SdkCall::AddListener(handle, target, kind));
        handle
    }

    fn remove_listener(&mut self, listener: ListenerHandle) {
        self.listeners.remove(&listener);
        self.calls.push(SdkCall::RemoveListener(listener));
    }
}

/// Resolves from a fixed table and records every lookup.
#[derive(Debug, Default)]
pub struct FakeGeocoder {
    table: HashMap<String, LatLng>,
    calls: RefCell<Vec<String>>,
}

impl FakeGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, address: &str, position: LatLng) -> Self {
        self.table.insert(address.to_string(), position);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

#[async_trait(?Send)]
impl Geocoder for FakeGeocoder {
    async fn resolve_address(&self, address: &str) -> Result<LatLng, GeocodeError> {
        self.calls.borrow_mut().push(address.to_string());
        self.table
            .get(address)
            .copied()
            .ok_or_else(|| GeocodeError::NotFound(address.to_string()))
    }
}

/// Serves canned region payloads per category.
#[derive(Debug, Default)]
pub struct FakePolygonProvider {
    payloads: HashMap<String, Value>,
    fetches: RefCell<Vec<String>>,
}

impl FakePolygonProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, category: &str, payload: Value) -> Self {
        self.payloads.insert(category.to_string(), payload);
        self
    }

    pub fn fetches(&self) -> Vec<String> {
        self.fetches.borrow().clone()
    }
}

#[async_trait(?Send)]
impl PolygonProvider for FakePolygonProvider {
    async fn fetch_polygons(&self, category: &str) -> Result<RegionResponse, RegionError> {
        self.fetches.borrow_mut().push(category.to_string());
        let payload = self
            .payloads
            .get(category)
            .ok_or_else(|| RegionError::FetchFailed(format!("HTTP 404 for {}", category)))?;
        RegionResponse::from_json(&payload.to_string())
    }
}

pub struct RecordBuilder(Record);

pub fn record(id: i64, address: &str) -> RecordBuilder {
    RecordBuilder(Record {
        id: RecordId::Number(id),
        address: Address {
            address: address.to_string(),
            region_nm: String::new(),
        },
        coordinates: None,
        datetime: "2024-03-01T00:00:00".to_string(),
        content: format!("complaint {}", id),
        status: "received".to_string(),
        teams: Vec::new(),
        is_repeat: false,
    })
}

impl RecordBuilder {
    pub fn repeat(mut self, is_repeat: bool) -> Self {
        self.0.is_repeat = is_repeat;
        self
    }

    pub fn at(mut self, datetime: &str) -> Self {
        self.0.datetime = datetime.to_string();
        self
    }

    pub fn content(mut self, content: &str) -> Self {
        self.0.content = content.to_string();
        self
    }

    pub fn status(mut self, status: &str) -> Self {
        self.0.status = status.to_string();
        self
    }

    pub fn coords(mut self, lat: f64, lng: f64) -> Self {
        self.0.coordinates = Some(LatLng::new(lat, lng));
        self
    }

    pub fn categories(mut self, categories: &[&str]) -> Self {
        self.0.teams = categories
            .iter()
            .map(|c| TeamAssignment {
                category: c.to_string(),
                ..TeamAssignment::default()
            })
            .collect();
        self
    }

    pub fn build(self) -> Record {
        self.0
    }
}
