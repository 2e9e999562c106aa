//! Keeps one marker per placed address on the map.
//!
//! A pass runs in three steps so that no borrow of the manager is held while
//! geocoding is in flight:
//!
//! 1. [`PinManager::begin`] hashes the input, groups records by address and
//!    returns a [`PendingPass`] (or `None` when the input is unchanged).
//! 2. [`PendingPass::resolve`] geocodes the addresses that still need it.
//! 3. [`PinManager::finish`] drops the result if a newer pass has begun,
//!    otherwise diffs the pins and rebuilds markers only when they changed.

use log::{debug, warn};
use serde::Serialize;
use std::collections::HashMap;

use crate::config::PinStyle;
use crate::geocode::{self, GeocodeCache, Geocoder};
use crate::markers::{info_window_html, marker_options};
use crate::pins::{group_records, input_hash, pin_hash, AddressGroup, PinData, Record, RecordId};
use crate::sdk::{
    LatLng, ListenerHandle, MapEventKind, MapHandle, MapSdk, MarkerHandle, OverlayEvent, OverlayRef,
};
use crate::session::{MapSession, ReadyMap};

const MARKER_EVENTS: [MapEventKind; 2] = [MapEventKind::Click, MapEventKind::MouseOver];

/// A live marker and what it shows.
#[derive(Debug, Clone)]
pub struct MarkerRecord {
    pub marker: MarkerHandle,
    pub pin: PinData,
    pub html: String,
    listeners: Vec<ListenerHandle>,
}

/// Raised when a marker is clicked.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PinClick {
    pub pin: PinData,
    pub marker: MarkerHandle,
    pub map: MapHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum PassOutcome {
    /// Input or pins hash matched what is already on the map.
    Unchanged,
    /// A newer pass began while this one was geocoding.
    Stale,
    /// Pins were stored but the map instance does not exist yet.
    Deferred,
    Rendered { markers: usize },
}

/// Grouped input waiting on the geocoder.
#[derive(Debug)]
pub struct PendingPass {
    input_hash: u64,
    selected: Option<RecordId>,
    placed: Vec<(AddressGroup, LatLng)>,
    awaiting: Vec<AddressGroup>,
    cached: HashMap<String, LatLng>,
    addresses: Vec<String>,
    unplaceable: usize,
}

impl PendingPass {
    /// Unique addresses this pass still has to geocode.
    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    pub async fn resolve<G>(self, geocoder: &G) -> ResolvedPass
    where
        G: Geocoder + ?Sized,
    {
        let resolved = if self.addresses.is_empty() {
            HashMap::new()
        } else {
            geocode::resolve(geocoder, &self.addresses).await
        };
        self.into_resolved(resolved)
    }

    /// Merges geocoder results back into the groups. Groups whose address is
    /// still unknown are counted and dropped.
    pub fn into_resolved(self, fresh: HashMap<String, LatLng>) -> ResolvedPass {
        let mut placed = self.placed;
        let mut unplaced = self.unplaceable;
        for group in self.awaiting {
            let position = group
                .geocode_address()
                .and_then(|address| fresh.get(address).or_else(|| self.cached.get(address)))
                .copied();
            match position {
                Some(position) => placed.push((group, position)),
                None => unplaced += 1,
            }
        }
        placed.sort_by(|a, b| a.0.key.cmp(&b.0.key));

        ResolvedPass {
            input_hash: self.input_hash,
            selected: self.selected,
            pins: placed
                .into_iter()
                .map(|(group, position)| group.into_pin(position))
                .collect(),
            unplaced,
            fresh,
        }
    }
}

#[derive(Debug)]
pub struct ResolvedPass {
    input_hash: u64,
    selected: Option<RecordId>,
    pins: Vec<PinData>,
    unplaced: usize,
    fresh: HashMap<String, LatLng>,
}

impl ResolvedPass {
    pub fn pins(&self) -> &[PinData] {
        &self.pins
    }
}

pub struct PinManager {
    style: PinStyle,
    cache: GeocodeCache,
    current_input: Option<u64>,
    rendered: Option<u64>,
    geocoding: bool,
    pins: Vec<PinData>,
    selected: Option<RecordId>,
    unplaced: usize,
    markers: Vec<MarkerRecord>,
    open_info: Option<String>,
}

impl PinManager {
    pub fn new(style: PinStyle, cache_capacity: usize) -> Self {
        Self {
            style,
            cache: GeocodeCache::new(cache_capacity),
            current_input: None,
            rendered: None,
            geocoding: false,
            pins: Vec::new(),
            selected: None,
            unplaced: 0,
            markers: Vec::new(),
            open_info: None,
        }
    }

    pub fn is_geocoding(&self) -> bool {
        self.geocoding
    }

    /// Pins from the latest accepted pass, in address order.
    pub fn pins(&self) -> &[PinData] {
        &self.pins
    }

    pub fn pin_for_record(&self, id: &RecordId) -> Option<&PinData> {
        self.pins.iter().find(|pin| pin.contains_record(id))
    }

    /// Address groups the latest pass could not place on the map.
    pub fn unplaced(&self) -> usize {
        self.unplaced
    }

    pub fn markers(&self) -> &[MarkerRecord] {
        &self.markers
    }

    /// Starts a pass, or returns `None` when the input matches the latest
    /// pass already started.
    pub fn begin(
        &mut self,
        records: &[Record],
        selected: Option<&RecordId>,
    ) -> Option<PendingPass> {
        let hash = input_hash(records, selected);
        if self.current_input == Some(hash) {
            return None;
        }
        self.current_input = Some(hash);

        let mut placed = Vec::new();
        let mut awaiting = Vec::new();
        let mut unplaceable = 0;
        for group in group_records(records) {
            if let Some(position) = group.representative.valid_coordinates() {
                placed.push((group, position));
            } else if group.geocode_address().is_some() {
                awaiting.push(group);
            } else {
                unplaceable += 1;
            }
        }

        let wanted: Vec<String> = awaiting
            .iter()
            .filter_map(|g| g.geocode_address().map(str::to_string))
            .collect();
        let (cached, addresses) = self.cache.partition(&wanted);
        self.geocoding = !addresses.is_empty();
        debug!(
            "pin pass: {} records, {} groups placed, {} cached, {} to geocode",
            records.len(),
            placed.len(),
            cached.len(),
            addresses.len()
        );

        Some(PendingPass {
            input_hash: hash,
            selected: selected.cloned(),
            placed,
            awaiting,
            cached,
            addresses,
            unplaceable,
        })
    }

    /// Accepts a resolved pass if it is still the latest and reconciles the
    /// markers when a map is available.
    pub fn finish<S: MapSdk>(
        &mut self,
        pass: ResolvedPass,
        map: Option<&mut ReadyMap<'_, S>>,
    ) -> PassOutcome {
        self.cache.extend(&pass.fresh);
        if self.current_input != Some(pass.input_hash) {
            debug!("discarding stale pin pass");
            return PassOutcome::Stale;
        }
        self.geocoding = false;
        self.pins = pass.pins;
        self.selected = pass.selected;
        self.unplaced = pass.unplaced;
        if self.unplaced > 0 {
            debug!("{} address groups could not be placed", self.unplaced);
        }
        self.render(map)
    }

    /// Rebuilds markers if the pins differ from what is on the map.
    pub fn render<S: MapSdk>(&mut self, map: Option<&mut ReadyMap<'_, S>>) -> PassOutcome {
        let hash = pin_hash(&self.pins, self.selected.as_ref());
        if self.rendered == Some(hash) {
            return PassOutcome::Unchanged;
        }
        let Some(map) = map else {
            return PassOutcome::Deferred;
        };

        self.teardown(map.sdk);
        let mut complete = true;
        for pin in &self.pins {
            let selected = self
                .selected
                .as_ref()
                .is_some_and(|id| pin.contains_record(id));
            let options = marker_options(&self.style, pin, selected);
            let marker = match map.sdk.create_marker(map.map, &options) {
                Ok(marker) => marker,
                Err(e) => {
                    warn!("marker for '{}' not created: {}", pin.id, e);
                    complete = false;
                    continue;
                }
            };
            let listeners = MARKER_EVENTS
                .iter()
                .map(|kind| map.sdk.add_listener(OverlayRef::Marker(marker), *kind))
                .collect();
            self.markers.push(MarkerRecord {
                marker,
                pin: pin.clone(),
                html: info_window_html(pin),
                listeners,
            });
        }
        // A partial rebuild is retried by the next render.
        self.rendered = complete.then_some(hash);
        debug!("rendered {} of {} markers", self.markers.len(), self.pins.len());
        PassOutcome::Rendered {
            markers: self.markers.len(),
        }
    }

    /// Convenience for callers that can hold the manager across the await.
    pub async fn sync<S, G>(
        &mut self,
        session: &mut MapSession<S>,
        geocoder: &G,
        records: &[Record],
        selected: Option<&RecordId>,
    ) -> PassOutcome
    where
        S: MapSdk,
        G: Geocoder + ?Sized,
    {
        let Some(pending) = self.begin(records, selected) else {
            if self.geocoding {
                return PassOutcome::Unchanged;
            }
            // Same input: only retry markers a previous render could not create.
            return self.render(session.ready().as_mut());
        };
        let resolved = pending.resolve(geocoder).await;
        self.finish(resolved, session.ready().as_mut())
    }

    /// Handles a marker event; a click yields a [`PinClick`] for the host.
    pub fn handle_event<S: MapSdk>(
        &mut self,
        map: &mut ReadyMap<'_, S>,
        event: &OverlayEvent,
    ) -> Option<PinClick> {
        let OverlayRef::Marker(handle) = event.target else {
            return None;
        };
        let record = self.markers.iter().find(|m| m.marker == handle)?;
        match event.kind {
            MapEventKind::Click => {
                let click = PinClick {
                    pin: record.pin.clone(),
                    marker: handle,
                    map: map.map,
                };
                if self.open_info.take().is_some() {
                    map.sdk.close_info_window();
                }
                Some(click)
            }
            MapEventKind::MouseOver => {
                if self.open_info.as_deref() != Some(record.html.as_str()) {
                    map.sdk.open_info_window(map.map, handle, &record.html);
                    self.open_info = Some(record.html.clone());
                }
                None
            }
            MapEventKind::MouseOut | MapEventKind::MouseMove => None,
        }
    }

    /// Removes every marker, e.g. before unmounting or swapping the map
    /// instance. The pins are kept so the next render rebuilds them.
    pub fn clear_markers<S: MapSdk>(&mut self, map: &mut ReadyMap<'_, S>) {
        self.teardown(map.sdk);
        self.rendered = None;
    }

    fn teardown<S: MapSdk>(&mut self, sdk: &mut S) {
        if self.open_info.take().is_some() {
            sdk.close_info_window();
        }
        for record in self.markers.drain(..) {
            for listener in record.listeners {
                sdk.remove_listener(listener);
            }
            sdk.remove_marker(record.marker);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{record, FakeGeocoder, FakeSdk, SdkCall};
    use futures::executor::block_on;

    fn ready_session() -> MapSession<FakeSdk> {
        let mut session = MapSession::new(FakeSdk::default(), LatLng::new(37.5, 127.0), 5);
        session.on_sdk_loaded().unwrap();
        session.mount("map").unwrap();
        session
    }

    fn geocoder() -> FakeGeocoder {
        FakeGeocoder::new()
            .with("A", LatLng::new(37.1, 127.1))
            .with("B", LatLng::new(37.2, 127.2))
            .with("C", LatLng::new(37.3, 127.3))
    }

    fn marker_ops(sdk: &FakeSdk) -> usize {
        sdk.count(|c| matches!(c, SdkCall::CreateMarker(..) | SdkCall::RemoveMarker(_)))
    }

    #[test]
    fn repeat_scenario_yields_two_pins() {
        let mut session = ready_session();
        let mut pins = PinManager::new(PinStyle::default(), 0);
        let records = vec![
            record(1, "A").repeat(false).build(),
            record(2, "A").repeat(true).build(),
            record(3, "B").repeat(false).build(),
        ];

        let outcome = block_on(pins.sync(&mut session, &geocoder(), &records, None));

        assert_eq!(outcome, PassOutcome::Rendered { markers: 2 });
        assert_eq!(pins.pins().len(), 2);
        assert!(pins.pins().iter().find(|p| p.id == "A").unwrap().is_repeat);
        assert_eq!(session.sdk().live_markers(), 2);
    }

    #[test]
    fn unchanged_input_does_no_marker_work() {
        let mut session = ready_session();
        let mut pins = PinManager::new(PinStyle::default(), 0);
        let geo = geocoder();
        let records = vec![record(1, "A").build(), record(2, "B").build()];

        block_on(pins.sync(&mut session, &geo, &records, None));
        let ops = marker_ops(session.sdk());
        let lookups = geo.calls().len();

        let outcome = block_on(pins.sync(&mut session, &geo, &records.clone(), None));

        assert_eq!(outcome, PassOutcome::Unchanged);
        assert_eq!(marker_ops(session.sdk()), ops);
        assert_eq!(geo.calls().len(), lookups);
    }

    #[test]
    fn reordered_input_with_same_pins_skips_reconciliation() {
        let mut session = ready_session();
        let mut pins = PinManager::new(PinStyle::default(), 16);
        let geo = geocoder();
        let records = vec![record(1, "A").build(), record(2, "B").build()];
        let reordered = vec![records[1].clone(), records[0].clone()];

        block_on(pins.sync(&mut session, &geo, &records, None));
        let ops = marker_ops(session.sdk());

        let outcome = block_on(pins.sync(&mut session, &geo, &reordered, None));

        assert_eq!(outcome, PassOutcome::Unchanged);
        assert_eq!(marker_ops(session.sdk()), ops);
        // Served from the cross-pass cache.
        assert_eq!(geo.calls().len(), 2);
    }

    #[test]
    fn marker_count_matches_resolvable_addresses() {
        let mut session = ready_session();
        let mut pins = PinManager::new(PinStyle::default(), 0);
        let records = vec![
            record(1, "A").build(),
            record(2, "A").build(),
            record(3, "nowhere").build(),
            record(4, "C").build(),
            record(5, "far").coords(37.9, 126.9).build(),
        ];

        block_on(pins.sync(&mut session, &geocoder(), &records, None));

        assert_eq!(pins.markers().len(), 3);
        assert_eq!(session.sdk().live_markers(), 3);
        assert_eq!(pins.unplaced(), 1);
    }

    #[test]
    fn records_with_coordinates_skip_geocoding() {
        let mut session = ready_session();
        let mut pins = PinManager::new(PinStyle::default(), 0);
        let geo = geocoder();
        let records = vec![record(1, "A").coords(35.0, 129.0).build(), record(2, "B").build()];

        block_on(pins.sync(&mut session, &geo, &records, None));

        assert_eq!(geo.calls(), vec!["B".to_string()]);
        let a = pins.pin_for_record(&RecordId::Number(1)).unwrap();
        assert_eq!(a.position(), LatLng::new(35.0, 129.0));
    }

    #[test]
    fn stale_pass_cannot_overwrite_newer_result() {
        let mut session = ready_session();
        let mut pins = PinManager::new(PinStyle::default(), 0);
        let geo = geocoder();
        let old = vec![record(1, "A").build()];
        let new = vec![record(1, "B").build(), record(2, "C").build()];

        let first = pins.begin(&old, None).unwrap();
        let second = pins.begin(&new, None).unwrap();
        assert!(pins.is_geocoding());

        let second = block_on(second.resolve(&geo));
        assert_eq!(
            pins.finish(second, session.ready().as_mut()),
            PassOutcome::Rendered { markers: 2 }
        );
        assert!(!pins.is_geocoding());

        let first = block_on(first.resolve(&geo));
        assert_eq!(pins.finish(first, session.ready().as_mut()), PassOutcome::Stale);

        assert_eq!(session.sdk().live_markers(), 2);
        assert!(pins.pins().iter().all(|p| p.id != "A"));
    }

    #[test]
    fn rebuild_tears_down_before_creating() {
        let mut session = ready_session();
        let mut pins = PinManager::new(PinStyle::default(), 0);
        let geo = geocoder();

        block_on(pins.sync(&mut session, &geo, &[record(1, "A").build()], None));
        block_on(pins.sync(&mut session, &geo, &[record(1, "A").status("done").build()], None));

        let calls = session.sdk().calls();
        let removed = calls.iter().position(|c| matches!(c, SdkCall::RemoveMarker(_))).unwrap();
        let last_created = calls
            .iter()
            .rposition(|c| matches!(c, SdkCall::CreateMarker(..)))
            .unwrap();
        assert!(removed < last_created);
        assert_eq!(session.sdk().live_markers(), 1);
        assert_eq!(session.sdk().live_listeners(), 2);
    }

    #[test]
    fn selection_enlarges_the_pin_holding_the_record() {
        let mut session = ready_session();
        let mut pins = PinManager::new(PinStyle::default(), 0);
        let records = vec![record(1, "A").build(), record(2, "A").build(), record(3, "B").build()];

        block_on(pins.sync(&mut session, &geocoder(), &records, Some(&RecordId::Number(2))));

        let sizes: Vec<f64> = session
            .sdk()
            .calls()
            .iter()
            .filter_map(|c| match c {
                SdkCall::CreateMarker(_, options) => Some(options.size.width),
                _ => None,
            })
            .collect();
        let style = PinStyle::default();
        assert_eq!(sizes, vec![style.selected.size.width, style.normal.size.width]);
    }

    #[test]
    fn pins_wait_for_the_map_then_render() {
        let mut session = MapSession::new(FakeSdk::default(), LatLng::new(37.5, 127.0), 5);
        let mut pins = PinManager::new(PinStyle::default(), 0);

        let records = [record(1, "A").build()];
        let outcome = block_on(pins.sync(&mut session, &geocoder(), &records, None));
        assert_eq!(outcome, PassOutcome::Deferred);
        assert_eq!(pins.pins().len(), 1);

        session.on_sdk_loaded().unwrap();
        session.mount("map").unwrap();
        assert_eq!(pins.render(session.ready().as_mut()), PassOutcome::Rendered { markers: 1 });
    }

    #[test]
    fn hover_opens_info_window_once_and_click_closes_it() {
        let mut session = ready_session();
        let mut pins = PinManager::new(PinStyle::default(), 0);
        block_on(pins.sync(&mut session, &geocoder(), &[record(1, "A").build()], None));
        let marker = pins.markers()[0].marker;
        let hover = OverlayEvent {
            target: OverlayRef::Marker(marker),
            kind: MapEventKind::MouseOver,
            point: None,
        };

        let mut map = session.ready().unwrap();
        assert!(pins.handle_event(&mut map, &hover).is_none());
        assert!(pins.handle_event(&mut map, &hover).is_none());
        let click = pins
            .handle_event(&mut map, &OverlayEvent { kind: MapEventKind::Click, ..hover })
            .unwrap();

        assert_eq!(click.pin.id, "A");
        assert_eq!(click.marker, marker);
        assert_eq!(session.sdk().count(|c| matches!(c, SdkCall::OpenInfoWindow(..))), 1);
        assert_eq!(session.sdk().count(|c| matches!(c, SdkCall::CloseInfoWindow)), 1);
    }

    #[test]
    fn rejected_marker_is_created_on_the_next_render() {
        let sdk = FakeSdk::failing_markers(1);
        let mut session = MapSession::new(sdk, LatLng::new(37.5, 127.0), 5);
        session.on_sdk_loaded().unwrap();
        session.mount("map").unwrap();
        let mut pins = PinManager::new(PinStyle::default(), 0);
        let geo = geocoder();
        let records = vec![record(1, "A").build(), record(2, "B").build()];

        let first = block_on(pins.sync(&mut session, &geo, &records, None));
        assert_eq!(first, PassOutcome::Rendered { markers: 1 });

        let retry = block_on(pins.sync(&mut session, &geo, &records, None));

        assert_eq!(retry, PassOutcome::Rendered { markers: 2 });
        assert_eq!(session.sdk().live_markers(), pins.pins().len());
        assert_eq!(
            block_on(pins.sync(&mut session, &geo, &records, None)),
            PassOutcome::Unchanged
        );
    }

    #[test]
    fn each_marker_listens_for_click_and_hover() {
        let mut session = ready_session();
        let mut pins = PinManager::new(PinStyle::default(), 0);
        block_on(pins.sync(&mut session, &geocoder(), &[record(1, "A").build()], None));
        let marker = OverlayRef::Marker(pins.markers()[0].marker);

        assert!(session.sdk().listens(marker, MapEventKind::Click));
        assert!(session.sdk().listens(marker, MapEventKind::MouseOver));
        assert!(!session.sdk().listens(marker, MapEventKind::MouseOut));
    }

    #[test]
    fn clear_markers_removes_everything_and_allows_rebuild() {
        let mut session = ready_session();
        let mut pins = PinManager::new(PinStyle::default(), 0);
        let records = [record(1, "A").build(), record(2, "B").build()];
        block_on(pins.sync(&mut session, &geocoder(), &records, None));

        pins.clear_markers(&mut session.ready().unwrap());

        assert_eq!(session.sdk().live_markers(), 0);
        assert_eq!(session.sdk().live_listeners(), 0);
        assert!(pins.markers().is_empty());
        assert_eq!(pins.render(session.ready().as_mut()), PassOutcome::Rendered { markers: 2 });
    }
}
