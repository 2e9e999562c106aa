//! One mounted map with its pins and regions.
//!
//! Owns the session and both managers, forwards SDK callbacks to whichever
//! manager owns the target overlay, and tears every overlay down before the
//! instance is released.

use log::{debug, warn};
use serde::Serialize;

use crate::config::MapConfig;
use crate::geocode::Geocoder;
use crate::pin_manager::{PassOutcome, PendingPass, PinClick, PinManager, ResolvedPass};
use crate::pins::{Record, RecordId};
use crate::polygon_manager::{
    FetchOutcome, FetchRequest, PolygonClick, PolygonManager, RegionOutcome,
};
use crate::region::{PolygonProvider, RegionError};
use crate::sdk::{LatLng, MapSdk, OverlayEvent, OverlayRef, PixelSize, ScreenPoint};
use crate::session::{MapSession, Readiness, SessionError};
use crate::tooltip::{clamp_tooltip, ContainerRect};

/// Events handed back to the host application.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum OutboundEvent {
    #[serde(rename = "pinClick")]
    PinClick(PinClick),
    #[serde(rename = "polygonClick")]
    PolygonClick(PolygonClick),
}

pub struct MapView<S: MapSdk> {
    session: MapSession<S>,
    pins: PinManager,
    regions: PolygonManager,
    tooltip_offset: f64,
    fit_to_regions: bool,
}

impl<S: MapSdk> MapView<S> {
    pub fn new(sdk: S, config: &MapConfig) -> Self {
        Self {
            session: MapSession::new(sdk, config.center, config.zoom),
            pins: PinManager::new(config.pins.clone(), config.geocode_cache_capacity),
            regions: PolygonManager::new(config.regions.clone()),
            tooltip_offset: config.tooltip_offset,
            fit_to_regions: config.fit_to_regions,
        }
    }

    pub fn session(&self) -> &MapSession<S> {
        &self.session
    }

    pub fn readiness(&self) -> &Readiness {
        self.session.readiness()
    }

    pub fn pins(&self) -> &PinManager {
        &self.pins
    }

    pub fn regions(&self) -> &PolygonManager {
        &self.regions
    }

    pub fn mark_loading(&mut self) {
        self.session.mark_loading();
    }

    pub fn on_sdk_loaded(&mut self) -> Result<(), SessionError> {
        self.session.on_sdk_loaded()?;
        self.catch_up();
        Ok(())
    }

    pub fn on_sdk_failed(&mut self, reason: &str) {
        self.session.on_sdk_failed(reason);
    }

    pub fn mount(&mut self, container: &str) -> Result<(), SessionError> {
        self.session.mount(container)?;
        self.catch_up();
        Ok(())
    }

    pub fn set_view(&mut self, center: LatLng, zoom: u8) {
        self.session.set_view(center, zoom);
    }

    pub fn begin_pins(
        &mut self,
        records: &[Record],
        selected: Option<&RecordId>,
    ) -> Option<PendingPass> {
        self.pins.begin(records, selected)
    }

    pub fn finish_pins(&mut self, pass: ResolvedPass) -> PassOutcome {
        self.pins.finish(pass, self.session.ready().as_mut())
    }

    pub async fn update_pins<G>(
        &mut self,
        geocoder: &G,
        records: &[Record],
        selected: Option<&RecordId>,
    ) -> PassOutcome
    where
        G: Geocoder + ?Sized,
    {
        self.pins.sync(&mut self.session, geocoder, records, selected).await
    }

    /// Creates markers an earlier render could not. A no-op while a pass is
    /// geocoding, since its result replaces the pins anyway.
    pub fn redraw_pins(&mut self) -> PassOutcome {
        if self.pins.is_geocoding() {
            return PassOutcome::Unchanged;
        }
        self.pins.render(self.session.ready().as_mut())
    }

    pub fn set_category(&mut self, category: &str) {
        self.regions.set_category(category, self.session.ready().as_mut());
    }

    /// Shows or hides regions; showing may require a fetch.
    pub fn toggle_regions(&mut self) -> Option<FetchRequest> {
        self.regions.toggle(self.session.ready().as_mut())
    }

    /// Fetch needed after a category change while regions are shown.
    pub fn request_regions(&mut self) -> Option<FetchRequest> {
        self.regions.request_fetch()
    }

    pub fn apply_regions(&mut self, outcome: FetchOutcome) -> Result<RegionOutcome, RegionError> {
        let result = self.regions.apply(outcome, self.session.ready().as_mut());
        self.fit(&result);
        result
    }

    pub async fn load_regions<P>(&mut self, provider: &P) -> Result<RegionOutcome, RegionError>
    where
        P: PolygonProvider + ?Sized,
    {
        let result = self.regions.load(&mut self.session, provider).await;
        self.fit(&result);
        result
    }

    /// Draws loaded regions that are not all on the map yet.
    pub fn redraw_regions(&mut self) -> Result<RegionOutcome, RegionError> {
        if !self.regions.needs_render() {
            return Ok(RegionOutcome::Idle);
        }
        let result = self.regions.render(self.session.ready().as_mut());
        self.fit(&result);
        result
    }

    /// Routes an SDK callback to the manager owning its target.
    pub fn dispatch(&mut self, event: &OverlayEvent) -> Option<OutboundEvent> {
        let mut map = self.session.ready()?;
        match event.target {
            OverlayRef::Marker(_) => self
                .pins
                .handle_event(&mut map, event)
                .map(OutboundEvent::PinClick),
            OverlayRef::Polygon(_) => self
                .regions
                .handle_event(&mut map, event)
                .map(OutboundEvent::PolygonClick),
        }
    }

    /// Where the region tooltip goes, relative to the container, or `None`
    /// when no region is hovered.
    pub fn tooltip_position(
        &self,
        container: &ContainerRect,
        tooltip: PixelSize,
    ) -> Option<ScreenPoint> {
        let point = self.regions.hover()?.point?;
        Some(clamp_tooltip(point, container, tooltip, self.tooltip_offset))
    }

    /// Clears every marker and polygon, then releases the instance.
    pub fn unmount(&mut self) {
        if let Some(mut map) = self.session.ready() {
            self.pins.clear_markers(&mut map);
            self.regions.clear_polygons(&mut map);
        }
        self.session.unmount();
    }

    /// Draws whatever was resolved while the instance did not exist.
    fn catch_up(&mut self) {
        if !self.session.is_ready() {
            return;
        }
        let pins = self.redraw_pins();
        debug!("pins after map ready: {:?}", pins);
        let regions = self.redraw_regions();
        debug!("regions after map ready: {:?}", regions);
    }

    fn fit(&mut self, result: &Result<RegionOutcome, RegionError>) {
        match result {
            Ok(RegionOutcome::Rendered {
                bounds: Some(bounds), ..
            }) if self.fit_to_regions => self.session.fit_bounds(bounds),
            Err(e) => warn!("{}", e),
            _ => {}
        }
    }
}
