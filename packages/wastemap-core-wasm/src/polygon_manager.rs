//! Category-scoped region polygons: fetch, validate, render and hover.
//!
//! Like the pin pass, a fetch is split so the manager is not borrowed across
//! the await: [`PolygonManager::request_fetch`] hands out a [`FetchRequest`]
//! stamped with the current generation, and [`PolygonManager::apply`] ignores
//! any outcome whose generation has since moved on.

use log::{debug, info, warn};
use serde::Serialize;

use crate::config::RegionStyle;
use crate::geometry::union_bounds;
use crate::region::{
    validate_features, PolygonFeature, PolygonProvider, RegionData, RegionError, RegionResponse,
};
use crate::sdk::{
    Bounds, ListenerHandle, MapEventKind, MapHandle, MapSdk, OverlayEvent, OverlayRef,
    PolygonHandle, PolygonOptions, ScreenPoint,
};
use crate::session::{MapSession, ReadyMap};

const POLYGON_EVENTS: [MapEventKind; 4] = [
    MapEventKind::Click,
    MapEventKind::MouseOver,
    MapEventKind::MouseOut,
    MapEventKind::MouseMove,
];

#[derive(Debug, Clone)]
pub struct PolygonRecord {
    pub polygon: PolygonHandle,
    pub feature: PolygonFeature,
    listeners: Vec<ListenerHandle>,
}

/// What the tooltip shows while the cursor is over a region.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HoverState {
    #[serde(skip)]
    pub polygon: PolygonHandle,
    pub feature_id: String,
    pub team: Option<String>,
    pub truck: Option<String>,
    pub point: Option<ScreenPoint>,
}

/// Raised when a region is clicked.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolygonClick {
    pub polygon: PolygonFeature,
    pub map: MapHandle,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub category: String,
    generation: u64,
}

impl FetchRequest {
    pub async fn run<P>(self, provider: &P) -> FetchOutcome
    where
        P: PolygonProvider + ?Sized,
    {
        let result = provider.fetch_polygons(&self.category).await;
        FetchOutcome {
            category: self.category,
            generation: self.generation,
            result,
        }
    }
}

#[derive(Debug)]
pub struct FetchOutcome {
    category: String,
    generation: u64,
    result: Result<RegionResponse, RegionError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum RegionOutcome {
    /// Nothing to fetch or render.
    Idle,
    /// The category changed or regions were hidden while fetching.
    Stale,
    /// Regions were validated but the map instance does not exist yet.
    Deferred,
    Rendered { polygons: usize, bounds: Option<Bounds> },
}

pub struct PolygonManager {
    style: RegionStyle,
    category: Option<String>,
    visible: bool,
    generation: u64,
    loading: bool,
    data: Option<RegionData>,
    polygons: Vec<PolygonRecord>,
    // Every loaded feature has a polygon on the map.
    drawn: bool,
    hover: Option<HoverState>,
    error: Option<RegionError>,
}

impl PolygonManager {
    pub fn new(style: RegionStyle) -> Self {
        Self {
            style,
            category: None,
            visible: false,
            generation: 0,
            loading: false,
            data: None,
            polygons: Vec::new(),
            drawn: false,
            hover: None,
            error: None,
        }
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&RegionError> {
        self.error.as_ref()
    }

    pub fn hover(&self) -> Option<&HoverState> {
        self.hover.as_ref()
    }

    pub fn data(&self) -> Option<&RegionData> {
        self.data.as_ref()
    }

    pub fn polygons(&self) -> &[PolygonRecord] {
        &self.polygons
    }

    /// True when regions are shown for a category that has nothing loaded,
    /// nothing pending and no recorded failure.
    pub fn needs_fetch(&self) -> bool {
        self.visible
            && self.category.is_some()
            && self.data.is_none()
            && !self.loading
            && self.error.is_none()
    }

    /// Validated regions exist but not all of them are on the map.
    pub fn needs_render(&self) -> bool {
        self.visible && !self.drawn && self.data.as_ref().is_some_and(|d| !d.features.is_empty())
    }

    /// Selects a category without fetching. Switching to another category
    /// drops what was loaded for the previous one.
    pub fn set_category<S: MapSdk>(&mut self, category: &str, map: Option<&mut ReadyMap<'_, S>>) {
        let category = category.trim();
        let next = (!category.is_empty()).then(|| category.to_string());
        if next == self.category {
            return;
        }
        debug!("region category {:?} -> {:?}", self.category, next);
        self.reset(map);
        self.category = next;
    }

    /// Flips visibility. Showing returns a fetch request when regions for the
    /// current category still have to be loaded; hiding clears everything.
    pub fn toggle<S: MapSdk>(&mut self, map: Option<&mut ReadyMap<'_, S>>) -> Option<FetchRequest> {
        self.visible = !self.visible;
        if self.visible {
            self.request_fetch()
        } else {
            self.reset(map);
            None
        }
    }

    pub fn request_fetch(&mut self) -> Option<FetchRequest> {
        if !self.needs_fetch() {
            return None;
        }
        let category = self.category.clone()?;
        self.generation += 1;
        self.loading = true;
        Some(FetchRequest {
            category,
            generation: self.generation,
        })
    }

    /// Validates a fetch outcome and renders it when a map is available.
    pub fn apply<S: MapSdk>(
        &mut self,
        outcome: FetchOutcome,
        map: Option<&mut ReadyMap<'_, S>>,
    ) -> Result<RegionOutcome, RegionError> {
        if outcome.generation != self.generation || !self.visible {
            debug!("discarding stale regions for '{}'", outcome.category);
            return Ok(RegionOutcome::Stale);
        }
        self.loading = false;

        let response = match outcome.result {
            Ok(response) => response,
            Err(e) => return Err(self.fail(e)),
        };
        let raw = response.region_areas.features;
        if raw.is_empty() {
            return Err(self.fail(RegionError::NoRegionDefined(outcome.category)));
        }
        let total = raw.len();
        let features = validate_features(raw);
        if features.is_empty() {
            return Err(self.fail(RegionError::RenderFailed { total }));
        }
        debug!("{} of {} regions valid for '{}'", features.len(), total, outcome.category);

        self.data = Some(RegionData {
            category: outcome.category,
            features,
        });
        self.render(map)
    }

    /// Draws the loaded regions, replacing any already drawn.
    pub fn render<S: MapSdk>(
        &mut self,
        map: Option<&mut ReadyMap<'_, S>>,
    ) -> Result<RegionOutcome, RegionError> {
        let Some(data) = self.data.as_ref() else {
            return Ok(RegionOutcome::Idle);
        };
        let Some(map) = map else {
            return Ok(RegionOutcome::Deferred);
        };

        let features = data.features.clone();
        self.teardown(map.sdk);
        for feature in features {
            let options = PolygonOptions {
                path: feature.ring.to_path(),
                style: self.style.normal.clone(),
            };
            let polygon = match map.sdk.create_polygon(map.map, &options) {
                Ok(polygon) => polygon,
                Err(e) => {
                    warn!("region {} not drawn: {}", feature.id, e);
                    continue;
                }
            };
            let listeners = POLYGON_EVENTS
                .iter()
                .map(|kind| map.sdk.add_listener(OverlayRef::Polygon(polygon), *kind))
                .collect();
            self.polygons.push(PolygonRecord {
                polygon,
                feature,
                listeners,
            });
        }

        let total = self.data.as_ref().map_or(0, |d| d.features.len());
        // A partial draw is completed by the next render.
        self.drawn = self.polygons.len() == total;
        if self.polygons.is_empty() {
            return Err(self.fail(RegionError::RenderFailed { total }));
        }
        let bounds = union_bounds(self.polygons.iter().map(|p| &p.feature.ring));
        info!("rendered {} of {} regions", self.polygons.len(), total);
        Ok(RegionOutcome::Rendered {
            polygons: self.polygons.len(),
            bounds,
        })
    }

    /// Fetches and renders in one go for callers that can hold the manager
    /// across the await.
    pub async fn load<S, P>(
        &mut self,
        session: &mut MapSession<S>,
        provider: &P,
    ) -> Result<RegionOutcome, RegionError>
    where
        S: MapSdk,
        P: PolygonProvider + ?Sized,
    {
        let Some(request) = self.request_fetch() else {
            if self.needs_render() {
                return self.render(session.ready().as_mut());
            }
            return Ok(RegionOutcome::Idle);
        };
        let outcome = request.run(provider).await;
        self.apply(outcome, session.ready().as_mut())
    }

    /// Handles a polygon event; a click yields a [`PolygonClick`] for the host.
    pub fn handle_event<S: MapSdk>(
        &mut self,
        map: &mut ReadyMap<'_, S>,
        event: &OverlayEvent,
    ) -> Option<PolygonClick> {
        let OverlayRef::Polygon(handle) = event.target else {
            return None;
        };
        let record = self.polygons.iter().find(|p| p.polygon == handle)?;
        match event.kind {
            MapEventKind::Click => Some(PolygonClick {
                polygon: record.feature.clone(),
                map: map.map,
            }),
            MapEventKind::MouseOver => {
                map.sdk.set_polygon_style(handle, &self.style.hover);
                self.hover = Some(HoverState {
                    polygon: handle,
                    feature_id: record.feature.id.clone(),
                    team: record.feature.team_name(),
                    truck: record.feature.truck_name(),
                    point: event.point,
                });
                None
            }
            MapEventKind::MouseMove => {
                if let Some(hover) = self.hover.as_mut().filter(|h| h.polygon == handle) {
                    hover.point = event.point.or(hover.point);
                }
                None
            }
            MapEventKind::MouseOut => {
                map.sdk.set_polygon_style(handle, &self.style.normal);
                if self.hover.as_ref().is_some_and(|h| h.polygon == handle) {
                    self.hover = None;
                }
                None
            }
        }
    }

    /// Removes drawn polygons but keeps the loaded regions so they can be
    /// drawn again on a new map instance.
    pub fn clear_polygons<S: MapSdk>(&mut self, map: &mut ReadyMap<'_, S>) {
        self.teardown(map.sdk);
    }

    fn reset<S: MapSdk>(&mut self, map: Option<&mut ReadyMap<'_, S>>) {
        // Outstanding fetches belong to the previous state.
        self.generation += 1;
        match map {
            Some(map) => self.teardown(map.sdk),
            None => {
                if !self.polygons.is_empty() {
                    warn!("dropping {} region records without a map", self.polygons.len());
                }
                self.polygons.clear();
                self.drawn = false;
                self.hover = None;
            }
        }
        self.data = None;
        self.error = None;
        self.loading = false;
    }

    fn teardown<S: MapSdk>(&mut self, sdk: &mut S) {
        for record in self.polygons.drain(..) {
            for listener in record.listeners {
                sdk.remove_listener(listener);
            }
            sdk.remove_polygon(record.polygon);
        }
        self.drawn = false;
        self.hover = None;
    }

    fn fail(&mut self, error: RegionError) -> RegionError {
        warn!("regions unavailable: {}", error);
        self.error = Some(error.clone());
        error
    }
}
