//! Browser surface: adapters from host JS objects to the core traits, and the
//! exported [`WasteMap`] handle.
//!
//! The host supplies a `MapAdapter` object wrapping the map SDK plus two
//! helpers on `wasmJsHelpers` (`geocodeAddress`, `fetchRegionPolygons`) that
//! return Promises. SDK callbacks come back through [`WasteMap::dispatch`].

use async_trait::async_trait;
use log::{debug, warn};
use serde::Serialize;
use std::cell::RefCell;
use std::fmt::Display;
use std::rc::Rc;
use thiserror::Error;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::{future_to_promise, JsFuture};

use crate::config::{ConfigError, MapConfig};
use crate::console;
use crate::geocode::{GeocodeError, Geocoder};
use crate::map_view::MapView;
use crate::pins::{Record, RecordId};
use crate::polygon_manager::FetchRequest;
use crate::region::{PolygonProvider, RegionError, RegionResponse};
use crate::sdk::*;
use crate::session::{Readiness, SessionError};
use crate::tooltip::ContainerRect;

#[wasm_bindgen]
extern "C" {
    /// Host wrapper around the map SDK. Overlays are identified by the
    /// numeric ids it returns.
    pub type MapAdapter;

    #[wasm_bindgen(method, catch, js_name = createMap)]
    fn create_map(this: &MapAdapter, container: &str, options: JsValue) -> Result<u32, JsValue>;
    #[wasm_bindgen(method, catch, js_name = destroyMap)]
    fn destroy_map(this: &MapAdapter, map: u32) -> Result<(), JsValue>;
    #[wasm_bindgen(method, catch, js_name = setCenter)]
    fn set_center(this: &MapAdapter, map: u32, lat: f64, lng: f64) -> Result<(), JsValue>;
    #[wasm_bindgen(method, catch, js_name = setZoom)]
    fn set_zoom(this: &MapAdapter, map: u32, zoom: u8) -> Result<(), JsValue>;
    #[wasm_bindgen(method, catch, js_name = fitBounds)]
    fn fit_bounds(this: &MapAdapter, map: u32, bounds: JsValue) -> Result<(), JsValue>;

    #[wasm_bindgen(method, catch, js_name = createMarker)]
    fn create_marker(this: &MapAdapter, map: u32, options: JsValue) -> Result<u32, JsValue>;
    #[wasm_bindgen(method, catch, js_name = removeMarker)]
    fn remove_marker(this: &MapAdapter, marker: u32) -> Result<(), JsValue>;

    #[wasm_bindgen(method, catch, js_name = createPolygon)]
    fn create_polygon(this: &MapAdapter, map: u32, options: JsValue) -> Result<u32, JsValue>;
    #[wasm_bindgen(method, catch, js_name = removePolygon)]
    fn remove_polygon(this: &MapAdapter, polygon: u32) -> Result<(), JsValue>;
    #[wasm_bindgen(method, catch, js_name = setPolygonStyle)]
    fn set_polygon_style(this: &MapAdapter, polygon: u32, style: JsValue) -> Result<(), JsValue>;

    #[wasm_bindgen(method, catch, js_name = openInfoWindow)]
    fn open_info_window(
        this: &MapAdapter,
        map: u32,
        marker: u32,
        html: &str,
    ) -> Result<(), JsValue>;
    #[wasm_bindgen(method, catch, js_name = closeInfoWindow)]
    fn close_info_window(this: &MapAdapter) -> Result<(), JsValue>;

    #[wasm_bindgen(method, catch, js_name = addListener)]
    fn add_listener(
        this: &MapAdapter,
        listener: u32,
        target_kind: &str,
        target: u32,
        event: &str,
    ) -> Result<(), JsValue>;
    #[wasm_bindgen(method, catch, js_name = removeListener)]
    fn remove_listener(this: &MapAdapter, listener: u32) -> Result<(), JsValue>;

    // Resolves to `{lat, lng}`, or null when the address is unknown.
    #[wasm_bindgen(js_namespace = wasmJsHelpers, catch, js_name = geocodeAddress)]
    fn geocode_address(address: &str) -> Result<js_sys::Promise, JsValue>;

    // Resolves to the region service payload, as text or parsed JSON.
    #[wasm_bindgen(js_namespace = wasmJsHelpers, catch, js_name = fetchRegionPolygons)]
    fn fetch_region_polygons(category: &str) -> Result<js_sys::Promise, JsValue>;
}

fn describe(value: &JsValue) -> String {
    if let Some(text) = value.as_string() {
        return text;
    }
    match value.dyn_ref::<js_sys::Error>() {
        Some(error) => String::from(error.message()),
        None => format!("{:?}", value),
    }
}

fn to_js<T: Serialize + ?Sized>(value: &T) -> Result<JsValue, serde_wasm_bindgen::Error> {
    value.serialize(&serde_wasm_bindgen::Serializer::json_compatible())
}

fn js_error(name: &str, message: &dyn Display, user_message: Option<&str>) -> JsValue {
    let error = js_sys::Error::new(&message.to_string());
    error.set_name(name);
    if let Some(text) = user_message {
        let key = JsValue::from_str("userMessage");
        let _ = js_sys::Reflect::set(&error, &key, &JsValue::from_str(text));
    }
    error.into()
}

impl From<RegionError> for JsValue {
    fn from(error: RegionError) -> Self {
        js_error("RegionError", &error, Some(&error.user_message()))
    }
}

impl From<SessionError> for JsValue {
    fn from(error: SessionError) -> Self {
        js_error("SessionError", &error, None)
    }
}

impl From<ConfigError> for JsValue {
    fn from(error: ConfigError) -> Self {
        js_error("ConfigError", &error, None)
    }
}

/// [`MapSdk`] over the host's `MapAdapter`. Failures of fire-and-forget
/// calls are logged; the SDK state they refer to is owned by the host.
pub struct JsMapSdk {
    adapter: MapAdapter,
    next_listener: u32,
}

impl JsMapSdk {
    pub fn new(adapter: MapAdapter) -> Self {
        Self {
            adapter,
            next_listener: 0,
        }
    }
}

fn report(operation: &str, result: Result<(), JsValue>) {
    if let Err(e) = result {
        warn!("map SDK {} failed: {}", operation, describe(&e));
    }
}

fn rejected(operation: &'static str) -> impl Fn(JsValue) -> SdkError {
    move |e| SdkError::Rejected {
        operation,
        reason: describe(&e),
    }
}

fn options_value<T: Serialize>(operation: &'static str, options: &T) -> Result<JsValue, SdkError> {
    to_js(options).map_err(|e| SdkError::Rejected {
        operation,
        reason: e.to_string(),
    })
}

impl MapSdk for JsMapSdk {
    fn create_map(&mut self, container: &str, options: &MapOptions) -> Result<MapHandle, SdkError> {
        let options = options_value("create_map", options)?;
        self.adapter
            .create_map(container, options)
            .map(MapHandle)
            .map_err(rejected("create_map"))
    }

    fn destroy_map(&mut self, map: MapHandle) {
        report("destroyMap", self.adapter.destroy_map(map.0));
    }

    fn set_center(&mut self, map: MapHandle, center: LatLng) {
        report("setCenter", self.adapter.set_center(map.0, center.lat, center.lng));
    }

    fn set_zoom(&mut self, map: MapHandle, zoom: u8) {
        report("setZoom", self.adapter.set_zoom(map.0, zoom));
    }

    fn fit_bounds(&mut self, map: MapHandle, bounds: &Bounds) {
        match to_js(bounds) {
            Ok(value) => report("fitBounds", self.adapter.fit_bounds(map.0, value)),
            Err(e) => warn!("bounds not serializable: {}", e),
        }
    }

    fn create_marker(
        &mut self,
        map: MapHandle,
        options: &MarkerOptions,
    ) -> Result<MarkerHandle, SdkError> {
        let options = options_value("create_marker", options)?;
        self.adapter
            .create_marker(map.0, options)
            .map(MarkerHandle)
            .map_err(rejected("create_marker"))
    }

    fn remove_marker(&mut self, marker: MarkerHandle) {
        report("removeMarker", self.adapter.remove_marker(marker.0));
    }

    fn create_polygon(
        &mut self,
        map: MapHandle,
        options: &PolygonOptions,
    ) -> Result<PolygonHandle, SdkError> {
        let options = options_value("create_polygon", options)?;
        self.adapter
            .create_polygon(map.0, options)
            .map(PolygonHandle)
            .map_err(rejected("create_polygon"))
    }

    fn remove_polygon(&mut self, polygon: PolygonHandle) {
        report("removePolygon", self.adapter.remove_polygon(polygon.0));
    }

    fn set_polygon_style(&mut self, polygon: PolygonHandle, style: &PolygonStyle) {
        match to_js(style) {
            Ok(value) => report(
                "setPolygonStyle",
                self.adapter.set_polygon_style(polygon.0, value),
            ),
            Err(e) => warn!("polygon style not serializable: {}", e),
        }
    }

    fn open_info_window(&mut self, map: MapHandle, anchor: MarkerHandle, html: &str) {
        report("openInfoWindow", self.adapter.open_info_window(map.0, anchor.0, html));
    }

    fn close_info_window(&mut self) {
        report("closeInfoWindow", self.adapter.close_info_window());
    }

    fn add_listener(&mut self, target: OverlayRef, kind: MapEventKind) -> ListenerHandle {
        self.next_listener += 1;
        let listener = ListenerHandle(self.next_listener);
        let (target_kind, id) = match target {
            OverlayRef::Marker(marker) => ("marker", marker.0),
            OverlayRef::Polygon(polygon) => ("polygon", polygon.0),
        };
        report(
            "addListener",
            self.adapter.add_listener(listener.0, target_kind, id, kind.as_str()),
        );
        listener
    }

    fn remove_listener(&mut self, listener: ListenerHandle) {
        report("removeListener", self.adapter.remove_listener(listener.0));
    }
}

/// Geocodes through `wasmJsHelpers.geocodeAddress`.
pub struct JsGeocoder;

#[async_trait(?Send)]
impl Geocoder for JsGeocoder {
    async fn resolve_address(&self, address: &str) -> Result<LatLng, GeocodeError> {
        let provider_error = |e: JsValue| GeocodeError::Provider {
            address: address.to_string(),
            reason: describe(&e),
        };
        let promise = geocode_address(address).map_err(provider_error)?;
        let value = JsFuture::from(promise).await.map_err(provider_error)?;
        if value.is_null() || value.is_undefined() {
            return Err(GeocodeError::NotFound(address.to_string()));
        }

        let field = |name: &str| {
            js_sys::Reflect::get(&value, &JsValue::from_str(name))
                .ok()
                .and_then(|v| v.as_f64())
        };
        match (field("lat"), field("lng")) {
            (Some(lat), Some(lng)) => Ok(LatLng::new(lat, lng)),
            _ => Err(GeocodeError::NotFound(address.to_string())),
        }
    }
}

/// Loads regions through `wasmJsHelpers.fetchRegionPolygons`.
pub struct JsPolygonProvider;

#[async_trait(?Send)]
impl PolygonProvider for JsPolygonProvider {
    async fn fetch_polygons(&self, category: &str) -> Result<RegionResponse, RegionError> {
        let failed = |e: JsValue| RegionError::FetchFailed(describe(&e));
        let promise = fetch_region_polygons(category).map_err(failed)?;
        let value = JsFuture::from(promise).await.map_err(failed)?;
        let text = match value.as_string() {
            Some(text) => text,
            None => js_sys::JSON::stringify(&value).map_err(failed)?.into(),
        };
        RegionResponse::from_json(&text)
    }
}

fn readiness_label(readiness: &Readiness) -> &'static str {
    match readiness {
        Readiness::NotLoaded => "not-loaded",
        Readiness::Loading => "loading",
        Readiness::Ready => "ready",
        Readiness::Failed(_) => "failed",
    }
}

fn record_id(value: &JsValue) -> Option<RecordId> {
    if let Some(text) = value.as_string() {
        return Some(RecordId::Text(text));
    }
    let number = value.as_f64()?;
    (number.fract() == 0.0 && number.is_finite()).then(|| RecordId::Number(number as i64))
}

fn overlay_event(
    target_kind: &str,
    target: u32,
    event: &str,
    x: Option<f64>,
    y: Option<f64>,
) -> Option<OverlayEvent> {
    let target = match target_kind {
        "marker" => OverlayRef::Marker(MarkerHandle(target)),
        "polygon" => OverlayRef::Polygon(PolygonHandle(target)),
        _ => return None,
    };
    Some(OverlayEvent {
        target,
        kind: MapEventKind::parse(event)?,
        point: x.zip(y).map(|(x, y)| ScreenPoint::new(x, y)),
    })
}

/// A call reached the map while another one still holds it, e.g. an SDK
/// callback fired synchronously from inside a render.
#[derive(Debug, Error, PartialEq)]
#[error("map is busy with another call")]
pub struct MapBusy;

impl From<MapBusy> for JsValue {
    fn from(error: MapBusy) -> Self {
        js_error("MapBusy", &error, None)
    }
}

fn read<T, R>(cell: &RefCell<T>, f: impl FnOnce(&T) -> R) -> Result<R, MapBusy> {
    let value = cell.try_borrow().map_err(|_| MapBusy)?;
    Ok(f(&value))
}

fn write<T, R>(cell: &RefCell<T>, f: impl FnOnce(&mut T) -> R) -> Result<R, MapBusy> {
    let mut value = cell.try_borrow_mut().map_err(|_| MapBusy)?;
    Ok(f(&mut value))
}

/// One map with its pins and collection regions.
#[wasm_bindgen]
pub struct WasteMap {
    view: Rc<RefCell<MapView<JsMapSdk>>>,
}

#[wasm_bindgen]
impl WasteMap {
    /// `config_json` may be empty for the defaults.
    #[wasm_bindgen(constructor)]
    pub fn new(adapter: MapAdapter, config_json: &str) -> Result<WasteMap, JsValue> {
        let config = MapConfig::from_json(config_json)?;
        console::init(console::parse_level(&config.log_level));
        debug!("map created with zoom {}", config.zoom);
        Ok(WasteMap {
            view: Rc::new(RefCell::new(MapView::new(JsMapSdk::new(adapter), &config))),
        })
    }

    pub fn readiness(&self) -> Result<String, JsValue> {
        Ok(read(&self.view, |v| readiness_label(v.readiness()).to_string())?)
    }

    #[wasm_bindgen(js_name = markLoading)]
    pub fn mark_loading(&self) -> Result<(), JsValue> {
        Ok(write(&self.view, |v| v.mark_loading())?)
    }

    #[wasm_bindgen(js_name = onSdkLoaded)]
    pub fn on_sdk_loaded(&self) -> Result<(), JsValue> {
        Ok(write(&self.view, |v| v.on_sdk_loaded())??)
    }

    #[wasm_bindgen(js_name = onSdkFailed)]
    pub fn on_sdk_failed(&self, reason: &str) -> Result<(), JsValue> {
        Ok(write(&self.view, |v| v.on_sdk_failed(reason))?)
    }

    pub fn mount(&self, container: &str) -> Result<(), JsValue> {
        Ok(write(&self.view, |v| v.mount(container))??)
    }

    pub fn unmount(&self) -> Result<(), JsValue> {
        Ok(write(&self.view, |v| v.unmount())?)
    }

    #[wasm_bindgen(js_name = setView)]
    pub fn set_view(&self, lat: f64, lng: f64, zoom: u8) -> Result<(), JsValue> {
        Ok(write(&self.view, |v| v.set_view(LatLng::new(lat, lng), zoom))?)
    }

    /// Runs a pin pass. Resolves to `{status, markers?}`. Repeating the
    /// latest input only creates markers an earlier render left out.
    #[wasm_bindgen(js_name = updatePins)]
    pub fn update_pins(
        &self,
        records_json: &str,
        selected: JsValue,
    ) -> Result<js_sys::Promise, JsValue> {
        let records: Vec<Record> = serde_json::from_str(records_json)
            .map_err(|e| js_error("InvalidRecords", &e, None))?;
        let selected = record_id(&selected);
        let pending = write(&self.view, |v| v.begin_pins(&records, selected.as_ref()))?;
        let Some(pending) = pending else {
            let outcome = write(&self.view, |v| v.redraw_pins())?;
            return Ok(js_sys::Promise::resolve(&to_js(&outcome)?));
        };

        let view = Rc::clone(&self.view);
        Ok(future_to_promise(async move {
            let resolved = pending.resolve(&JsGeocoder).await;
            let outcome = write(&view, |v| v.finish_pins(resolved))?;
            Ok(to_js(&outcome)?)
        }))
    }

    #[wasm_bindgen(js_name = isGeocoding)]
    pub fn is_geocoding(&self) -> Result<bool, JsValue> {
        Ok(read(&self.view, |v| v.pins().is_geocoding())?)
    }

    pub fn pins(&self) -> Result<JsValue, JsValue> {
        Ok(read(&self.view, |v| to_js(v.pins().pins()))??)
    }

    #[wasm_bindgen(js_name = pinForRecord)]
    pub fn pin_for_record(&self, id: JsValue) -> Result<JsValue, JsValue> {
        let id = record_id(&id);
        Ok(read(&self.view, |v| {
            to_js(&id.as_ref().and_then(|id| v.pins().pin_for_record(id)))
        })??)
    }

    pub fn unplaced(&self) -> Result<usize, JsValue> {
        Ok(read(&self.view, |v| v.pins().unplaced())?)
    }

    /// Selects the region category. Call [`WasteMap::load_regions`] after a
    /// change while regions are shown.
    #[wasm_bindgen(js_name = setCategory)]
    pub fn set_category(&self, category: &str) -> Result<(), JsValue> {
        Ok(write(&self.view, |v| v.set_category(category))?)
    }

    /// Shows or hides regions. Resolves to `{status, polygons?, bounds?}` and
    /// rejects with an error carrying `userMessage`.
    #[wasm_bindgen(js_name = toggleRegions)]
    pub fn toggle_regions(&self) -> Result<js_sys::Promise, JsValue> {
        let request = write(&self.view, |v| v.toggle_regions())?;
        self.run_fetch(request)
    }

    /// Fetches regions for the current category, or redraws loaded regions
    /// the map did not fully accept.
    #[wasm_bindgen(js_name = loadRegions)]
    pub fn load_regions(&self) -> Result<js_sys::Promise, JsValue> {
        let request = write(&self.view, |v| v.request_regions())?;
        self.run_fetch(request)
    }

    #[wasm_bindgen(js_name = regionsVisible)]
    pub fn regions_visible(&self) -> Result<bool, JsValue> {
        Ok(read(&self.view, |v| v.regions().is_visible())?)
    }

    #[wasm_bindgen(js_name = regionsLoading)]
    pub fn regions_loading(&self) -> Result<bool, JsValue> {
        Ok(read(&self.view, |v| v.regions().loading())?)
    }

    /// Operator-facing text for the last region failure.
    #[wasm_bindgen(js_name = regionError)]
    pub fn region_error(&self) -> Result<Option<String>, JsValue> {
        Ok(read(&self.view, |v| v.regions().error().map(RegionError::user_message))?)
    }

    /// Tooltip content for the hovered region, or null.
    pub fn hover(&self) -> Result<JsValue, JsValue> {
        Ok(read(&self.view, |v| to_js(&v.regions().hover()))??)
    }

    /// Forwards an SDK callback. Returns the event for the host (pin or
    /// region click) or null.
    pub fn dispatch(
        &self,
        target_kind: &str,
        target: u32,
        event: &str,
        x: Option<f64>,
        y: Option<f64>,
    ) -> Result<JsValue, JsValue> {
        let Some(event) = overlay_event(target_kind, target, event, x, y) else {
            debug!("ignoring {} event on {} {}", event, target_kind, target);
            return Ok(JsValue::NULL);
        };
        // The SDK may fire synchronously from inside a call we are making.
        match write(&self.view, |v| v.dispatch(&event)) {
            Ok(outbound) => Ok(to_js(&outbound)?),
            Err(MapBusy) => {
                debug!("ignoring re-entrant {:?}", event);
                Ok(JsValue::NULL)
            }
        }
    }

    /// Tooltip top-left relative to the container, or null.
    #[wasm_bindgen(js_name = tooltipPosition)]
    pub fn tooltip_position(
        &self,
        left: f64,
        top: f64,
        width: f64,
        height: f64,
        tooltip_width: f64,
        tooltip_height: f64,
    ) -> Result<JsValue, JsValue> {
        let container = ContainerRect {
            left,
            top,
            width,
            height,
        };
        let tooltip = PixelSize::new(tooltip_width, tooltip_height);
        Ok(read(&self.view, |v| to_js(&v.tooltip_position(&container, tooltip)))??)
    }
}

impl WasteMap {
    fn run_fetch(&self, request: Option<FetchRequest>) -> Result<js_sys::Promise, JsValue> {
        let Some(request) = request else {
            let outcome = write(&self.view, |v| v.redraw_regions())??;
            return Ok(js_sys::Promise::resolve(&to_js(&outcome)?));
        };
        let view = Rc::clone(&self.view);
        Ok(future_to_promise(async move {
            let outcome = request.run(&JsPolygonProvider).await;
            let result = write(&view, |v| v.apply_regions(outcome))??;
            Ok(to_js(&result)?)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_events_parse_from_host_arguments() {
        let event = overlay_event("polygon", 4, "mousemove", Some(1.0), Some(2.0)).unwrap();
        assert_eq!(event.target, OverlayRef::Polygon(PolygonHandle(4)));
        assert_eq!(event.kind, MapEventKind::MouseMove);
        assert_eq!(event.point, Some(ScreenPoint::new(1.0, 2.0)));

        let click = overlay_event("marker", 9, "click", None, Some(2.0)).unwrap();
        assert_eq!(click.point, None);

        assert!(overlay_event("circle", 1, "click", None, None).is_none());
        assert!(overlay_event("marker", 1, "dblclick", None, None).is_none());
    }

    #[test]
    fn held_view_reports_busy_instead_of_panicking() {
        let cell = RefCell::new(3);
        let held = cell.borrow_mut();

        assert_eq!(read(&cell, |n| *n), Err(MapBusy));
        assert_eq!(write(&cell, |n| *n += 1), Err(MapBusy));

        drop(held);
        assert_eq!(write(&cell, |n| *n += 1), Ok(()));
        assert_eq!(read(&cell, |n| *n), Ok(4));
    }

    #[test]
    fn shared_borrows_do_not_block_reads() {
        let cell = RefCell::new("ready");
        let _held = cell.borrow();

        assert_eq!(read(&cell, |s| s.len()), Ok(5));
        assert_eq!(write(&cell, |s| s.len()), Err(MapBusy));
    }

    #[test]
    fn readiness_labels_are_stable() {
        assert_eq!(readiness_label(&Readiness::NotLoaded), "not-loaded");
        assert_eq!(readiness_label(&Readiness::Failed("x".to_string())), "failed");
    }
}

#[cfg(all(test, target_arch = "wasm32"))]
mod wasm_tests {
    use super::*;
    use wasm_bindgen_test::*;

    #[wasm_bindgen_test]
    fn region_errors_carry_a_user_message() {
        let value: JsValue = RegionError::NoRegionDefined("음식물".to_string()).into();
        let message = js_sys::Reflect::get(&value, &JsValue::from_str("userMessage")).unwrap();
        assert!(message.as_string().unwrap().contains("음식물"));
    }

    #[wasm_bindgen_test]
    fn record_ids_accept_numbers_and_strings() {
        assert_eq!(record_id(&JsValue::from_f64(7.0)), Some(RecordId::Number(7)));
        assert_eq!(record_id(&JsValue::from_str("c-1")), Some(RecordId::Text("c-1".to_string())));
        assert_eq!(record_id(&JsValue::from_f64(1.5)), None);
        assert_eq!(record_id(&JsValue::NULL), None);
    }
}
