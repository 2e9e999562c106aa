//! Lifecycle of the single map instance behind a mounted container.
//!
//! The SDK script loads asynchronously and the container may be mounted
//! before or after it finishes. The instance is created once both are
//! present; until then every overlay operation is unreachable because the
//! managers can only act through a [`ReadyMap`].

use log::{debug, info, warn};
use thiserror::Error;

use crate::sdk::{Bounds, LatLng, MapHandle, MapOptions, MapSdk, SdkError};

#[derive(Debug, Clone, PartialEq)]
pub enum Readiness {
    NotLoaded,
    Loading,
    Ready,
    Failed(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    #[error("a map is already mounted in '{0}'")]
    AlreadyMounted(String),
    #[error(transparent)]
    Sdk(#[from] SdkError),
}

pub struct MapSession<S: MapSdk> {
    sdk: S,
    readiness: Readiness,
    sdk_loaded: bool,
    container: Option<String>,
    map: Option<MapHandle>,
    view: MapOptions,
}

/// Proof that a map instance exists; the only way to reach the SDK for
/// overlay work.
pub struct ReadyMap<'a, S: MapSdk> {
    pub sdk: &'a mut S,
    pub map: MapHandle,
}

impl<S: MapSdk> MapSession<S> {
    pub fn new(sdk: S, center: LatLng, zoom: u8) -> Self {
        Self {
            sdk,
            readiness: Readiness::NotLoaded,
            sdk_loaded: false,
            container: None,
            map: None,
            view: MapOptions { center, zoom },
        }
    }

    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    pub fn is_ready(&self) -> bool {
        self.readiness == Readiness::Ready
    }

    pub fn handle(&self) -> Option<MapHandle> {
        self.map
    }

    pub fn container(&self) -> Option<&str> {
        self.container.as_deref()
    }

    pub fn sdk(&self) -> &S {
        &self.sdk
    }

    /// The host has started loading the SDK script.
    pub fn mark_loading(&mut self) {
        if matches!(self.readiness, Readiness::NotLoaded | Readiness::Failed(_)) {
            self.readiness = Readiness::Loading;
        }
    }

    pub fn on_sdk_failed(&mut self, reason: &str) {
        warn!("map SDK failed to load: {}", reason);
        self.readiness = Readiness::Failed(reason.to_string());
    }

    /// The SDK script finished loading. Creates the instance if a container
    /// is already mounted.
    pub fn on_sdk_loaded(&mut self) -> Result<(), SessionError> {
        self.sdk_loaded = true;
        if self.container.is_some() {
            self.create_instance()
        } else {
            self.readiness = Readiness::Loading;
            Ok(())
        }
    }

    /// Binds the session to `container`. Mounting the same container again is
    /// a no-op; a different one requires [`MapSession::unmount`] first.
    pub fn mount(&mut self, container: &str) -> Result<(), SessionError> {
        if let Some(current) = self.container.as_deref() {
            if current != container {
                return Err(SessionError::AlreadyMounted(current.to_string()));
            }
            // Same container: retry creation if an earlier attempt failed.
            return if self.sdk_loaded {
                self.create_instance()
            } else {
                Ok(())
            };
        }
        self.container = Some(container.to_string());
        if self.sdk_loaded {
            self.create_instance()
        } else {
            self.mark_loading();
            Ok(())
        }
    }

    fn create_instance(&mut self) -> Result<(), SessionError> {
        if self.map.is_some() {
            return Ok(());
        }
        let Some(container) = self.container.clone() else {
            return Ok(());
        };
        match self.sdk.create_map(&container, &self.view) {
            Ok(handle) => {
                info!("map instance created in '{}'", container);
                self.map = Some(handle);
                self.readiness = Readiness::Ready;
                Ok(())
            }
            Err(e) => {
                self.readiness = Readiness::Failed(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Applies center and zoom without recreating the instance. Values set
    /// before the instance exists are used when it is created.
    pub fn set_view(&mut self, center: LatLng, zoom: u8) {
        let previous = std::mem::replace(&mut self.view, MapOptions { center, zoom });
        let Some(map) = self.map else {
            return;
        };
        if previous.center != center {
            self.sdk.set_center(map, center);
        }
        if previous.zoom != zoom {
            self.sdk.set_zoom(map, zoom);
        }
    }

    pub fn fit_bounds(&mut self, bounds: &Bounds) {
        if let Some(map) = self.map {
            self.sdk.fit_bounds(map, bounds);
        }
    }

    pub fn ready(&mut self) -> Option<ReadyMap<'_, S>> {
        let map = self.map?;
        Some(ReadyMap {
            sdk: &mut self.sdk,
            map,
        })
    }

    /// Destroys the instance and forgets the container. Overlays must have
    /// been cleared by their managers beforehand.
    pub fn unmount(&mut self) {
        if let Some(map) = self.map.take() {
            self.sdk.destroy_map(map);
            debug!("map instance released");
        }
        self.container = None;
        self.readiness = if self.sdk_loaded {
            Readiness::Loading
        } else {
            Readiness::NotLoaded
        };
    }
}
